//! Pipeline orchestration: listing, reconciliation, and the per-key
//! fetch -> classify -> transform -> write -> verify round-trip.
//!
//! Keys are processed sequentially; the upstream wiki is rate-limited and
//! session-authenticated, so one title completes its round-trip before the
//! next begins. A failure on one key is recorded and the batch continues;
//! only configuration errors and a failed login abort a run.

use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

use futures::future;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::SyncConfig;
use crate::contract::{ContentSource, DocStore, SourceCatalog, SourceRecord, Stamp};
use crate::document::{Article, Author, DocKind, Document, PrimarySource};
use crate::error::SyncError;
use crate::page::{Classification, PageContext, SourcePage};
use crate::reconcile::{self, Mode};
use crate::transform::{self, TransformContext};

/// Where in the per-key pipeline a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Fetch,
    Classify,
    Transform,
    Write,
    Verify,
    Delete,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Fetch => "fetch",
            Stage::Classify => "classify",
            Stage::Transform => "transform",
            Stage::Write => "write",
            Stage::Verify => "verify",
            Stage::Delete => "delete",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One failed key, terminal for this run; the next run's diff retries it.
#[derive(Debug, Clone, Serialize)]
pub struct Failure {
    pub key: String,
    pub stage: Stage,
    pub message: String,
}

impl Failure {
    fn new(key: &str, stage: Stage, err: &SyncError) -> Failure {
        Failure {
            key: key.to_string(),
            stage,
            message: err.to_string(),
        }
    }

    fn msg(key: &str, stage: Stage, message: String) -> Failure {
        Failure {
            key: key.to_string(),
            stage,
            message,
        }
    }
}

/// Per-document-type section of the run report.
#[derive(Debug, Serialize)]
pub struct TypeReport {
    pub kind: DocKind,
    pub considered: usize,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub unpublishable: Vec<String>,
    pub failed: Vec<Failure>,
}

impl TypeReport {
    fn new(kind: DocKind) -> TypeReport {
        TypeReport {
            kind,
            considered: 0,
            created: 0,
            updated: 0,
            deleted: 0,
            unpublishable: Vec::new(),
            failed: Vec::new(),
        }
    }

    fn tally(&mut self, key: &str, outcome: Outcome) {
        match outcome {
            Outcome::Created => self.created += 1,
            Outcome::Updated => self.updated += 1,
            Outcome::Unpublishable => self.unpublishable.push(key.to_string()),
            Outcome::Removed => {
                self.deleted += 1;
                self.unpublishable.push(key.to_string());
            }
        }
    }
}

impl fmt::Display for TypeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{}: considered={} created={} updated={} deleted={} unpublishable={} failed={}",
            self.kind,
            self.considered,
            self.created,
            self.updated,
            self.deleted,
            self.unpublishable.len(),
            self.failed.len(),
        )?;
        for title in &self.unpublishable {
            writeln!(f, "  could not publish: {title}")?;
        }
        for failure in &self.failed {
            writeln!(
                f,
                "  FAILED [{}] {}: {}",
                failure.stage, failure.key, failure.message
            )?;
        }
        Ok(())
    }
}

/// Structured summary of one invocation.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub types: Vec<TypeReport>,
}

impl RunReport {
    pub fn failed_total(&self) -> usize {
        self.types.iter().map(|t| t.failed.len()).sum()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for report in &self.types {
            write!(f, "{report}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    /// Re-publish every indexed key whether stale or not.
    pub force: bool,
    /// Publish every source key; for an empty or freshly created index.
    pub rebuild: bool,
    /// Compute and report, but write nothing.
    pub dry_run: bool,
    /// Stop after reconciliation.
    pub report_only: bool,
    /// Publish exactly this title, bypassing reconciliation.
    pub title: Option<String>,
}

impl PublishOptions {
    fn mode(&self) -> Mode {
        if let Some(title) = &self.title {
            Mode::Single(title.clone())
        } else if self.rebuild {
            Mode::Rebuild
        } else if self.force {
            Mode::Force
        } else {
            Mode::Incremental
        }
    }
}

enum Outcome {
    Created,
    Updated,
    /// Matched no document variant; recorded, never written.
    Unpublishable,
    /// Fetched but no longer published; removed from the index.
    Removed,
}

fn warn_on_empty_source(kind: DocKind, source: &[Stamp], indexed: &[Stamp]) {
    if source.is_empty() && !indexed.is_empty() {
        warn!(
            kind = %kind,
            indexed = indexed.len(),
            "source listing is empty but the index is not; proceeding deletes every indexed document. This usually indicates a source-side outage, not real deletions"
        );
    }
}

/// Deletes run concurrently; different keys have no ordering requirement.
async fn delete_keys<D: DocStore>(
    store: &D,
    kind: DocKind,
    keys: &[String],
    dry_run: bool,
    report: &mut TypeReport,
) {
    if dry_run {
        report.deleted += keys.len();
        return;
    }
    let deletions = keys.iter().map(|key| store.delete(kind, key));
    for (key, result) in keys.iter().zip(future::join_all(deletions).await) {
        match result {
            Ok(()) => {
                debug!(kind = %kind, key = %key, "deleted");
                report.deleted += 1;
            }
            Err(err) => report.failed.push(Failure::new(key, Stage::Delete, &err)),
        }
    }
}

/// Upserts a document and reads it back. The index write path is not
/// synchronous-consistent; a write that reports success can still be
/// momentarily unreadable, and silent loss is worse than a slower,
/// verified path.
async fn write_and_verify<D: DocStore>(store: &D, doc: &Document) -> Result<(), Failure> {
    let kind = doc.kind();
    let key = doc.key().to_string();
    store
        .upsert(doc)
        .await
        .map_err(|e| Failure::new(&key, Stage::Write, &e))?;
    let found = store
        .get(kind, &key)
        .await
        .map_err(|e| Failure::new(&key, Stage::Verify, &e))?;
    if found.is_none() {
        let err = SyncError::Verify {
            kind,
            key: key.clone(),
        };
        return Err(Failure::new(&key, Stage::Verify, &err));
    }
    Ok(())
}

/// Reconciles and publishes author pages.
pub async fn publish_authors<W, D>(
    wiki: &W,
    store: &D,
    cfg: &SyncConfig,
    opts: &PublishOptions,
) -> Result<TypeReport, SyncError>
where
    W: ContentSource,
    D: DocStore,
{
    info!("publishing authors");
    let mut report = TypeReport::new(DocKind::Authors);

    let pages = wiki.published_pages().await?;
    let author_titles = wiki.author_titles().await?;
    let indexed = store.list(DocKind::Authors).await?;
    let source: Vec<Stamp> = pages
        .iter()
        .filter(|s| author_titles.contains(&s.key))
        .cloned()
        .collect();
    warn_on_empty_source(DocKind::Authors, &source, &indexed);

    let plan = reconcile::plan(&opts.mode(), &source, &indexed);
    report.considered = plan.len();
    info!(
        upsert = plan.upsert.len(),
        delete = plan.delete.len(),
        "author reconciliation complete"
    );
    if opts.report_only {
        return Ok(report);
    }

    delete_keys(store, DocKind::Authors, &plan.delete, opts.dry_run, &mut report).await;

    let published_titles: Vec<String> = pages.iter().map(|s| s.key.clone()).collect();
    let non_article: Vec<String> = cfg
        .non_article_titles
        .iter()
        .map(|t| t.to_lowercase())
        .collect();

    for (n, key) in plan.upsert.iter().enumerate() {
        info!(n = n + 1, total = plan.upsert.len(), title = %key, "author");
        let ctx = PageContext {
            published_titles: &published_titles,
            author_titles: &author_titles,
            articles_az: &[],
            category_whitelist: &[],
            non_article_titles: &non_article,
            databox_specs: &cfg.databoxes,
            restricted_field: cfg.restricted_field.as_deref(),
            transform: TransformContext {
                hidden_selectors: &cfg.hidden_tags,
                hidden_comments: cfg.hidden_tag_comments,
                printed: false,
            },
        };
        let result: Result<Outcome, Failure> = async {
            let raw = wiki
                .page_source(key)
                .await
                .map_err(|e| Failure::new(key, Stage::Fetch, &e))?;
            let mut page = SourcePage::build(&raw, &[], &ctx);
            if page.classification() != Classification::Author {
                return Ok(Outcome::Unpublishable);
            }
            if !page.published && !cfg.show_unpublished {
                debug!(title = %key, "no longer published, removing from index");
                if !opts.dry_run {
                    store
                        .delete(DocKind::Authors, key)
                        .await
                        .map_err(|e| Failure::new(key, Stage::Delete, &e))?;
                }
                return Ok(Outcome::Removed);
            }
            page.author_articles = wiki
                .backlinks(key)
                .await
                .map_err(|e| Failure::new(key, Stage::Fetch, &e))?;
            let doc = Document::Author(Author::from_page(&page));
            let existing = store
                .get(DocKind::Authors, key)
                .await
                .map_err(|e| Failure::new(key, Stage::Write, &e))?;
            let outcome = if existing.is_some() {
                Outcome::Updated
            } else {
                Outcome::Created
            };
            if opts.dry_run {
                return Ok(outcome);
            }
            write_and_verify(store, &doc).await?;
            Ok(outcome)
        }
        .await;
        match result {
            Ok(outcome) => report.tally(key, outcome),
            Err(failure) => {
                error!(title = %key, stage = %failure.stage, error = %failure.message, "author failed");
                report.failed.push(failure);
            }
        }
    }
    Ok(report)
}

/// Reconciles and publishes articles, upserting each article's embedded
/// primary sources along the way.
pub async fn publish_articles<W, C, D>(
    wiki: &W,
    catalog: &C,
    store: &D,
    cfg: &SyncConfig,
    opts: &PublishOptions,
) -> Result<TypeReport, SyncError>
where
    W: ContentSource,
    C: SourceCatalog,
    D: DocStore,
{
    info!("publishing articles");
    let mut report = TypeReport::new(DocKind::Articles);

    let pages = wiki.published_pages().await?;
    let author_titles = wiki.author_titles().await?;
    let category_whitelist: Vec<String> = wiki
        .article_categories()
        .await?
        .iter()
        .filter_map(|t| t.strip_prefix("Category:"))
        .map(String::from)
        .collect();
    let indexed = store.list(DocKind::Articles).await?;
    // Author pages are excluded from the article set.
    let source: Vec<Stamp> = pages
        .iter()
        .filter(|s| !author_titles.contains(&s.key))
        .cloned()
        .collect();
    warn_on_empty_source(DocKind::Articles, &source, &indexed);

    let plan = reconcile::plan(&opts.mode(), &source, &indexed);
    report.considered = plan.len();
    info!(
        upsert = plan.upsert.len(),
        delete = plan.delete.len(),
        "article reconciliation complete"
    );
    if opts.report_only {
        return Ok(report);
    }

    delete_keys(store, DocKind::Articles, &plan.delete, opts.dry_run, &mut report).await;

    let published_titles: Vec<String> = pages.iter().map(|s| s.key.clone()).collect();
    let mut articles_az: Vec<String> = source.iter().map(|s| s.key.clone()).collect();
    articles_az.sort();
    let non_article: Vec<String> = cfg
        .non_article_titles
        .iter()
        .map(|t| t.to_lowercase())
        .collect();

    for (n, key) in plan.upsert.iter().enumerate() {
        info!(n = n + 1, total = plan.upsert.len(), title = %key, "article");
        let ctx = PageContext {
            published_titles: &published_titles,
            author_titles: &author_titles,
            articles_az: &articles_az,
            category_whitelist: &category_whitelist,
            non_article_titles: &non_article,
            databox_specs: &cfg.databoxes,
            restricted_field: cfg.restricted_field.as_deref(),
            transform: TransformContext {
                hidden_selectors: &cfg.hidden_tags,
                hidden_comments: cfg.hidden_tag_comments,
                printed: false,
            },
        };
        let result: Result<Outcome, Failure> = async {
            let raw = wiki
                .page_source(key)
                .await
                .map_err(|e| Failure::new(key, Stage::Fetch, &e))?;
            let ids: Vec<String> = raw
                .images
                .iter()
                .filter_map(|img| transform::extract_source_id(img))
                .collect();
            let records = catalog
                .for_ids(&ids)
                .await
                .map_err(|e| Failure::new(key, Stage::Fetch, &e))?;
            let page = SourcePage::build(&raw, &records, &ctx);
            if page.classification() != Classification::Article {
                return Ok(Outcome::Unpublishable);
            }
            if !page.published && !cfg.show_unpublished {
                debug!(title = %key, "no longer published, removing from index");
                if !opts.dry_run {
                    store
                        .delete(DocKind::Articles, key)
                        .await
                        .map_err(|e| Failure::new(key, Stage::Delete, &e))?;
                }
                return Ok(Outcome::Removed);
            }
            // The page's primary sources land in the sidebar; they are
            // written before the article that references them.
            for rec in &records {
                debug!(source = %rec.encyclopedia_id, "upserting page source");
                let doc = PrimarySource::from_record(rec, &cfg.sources)
                    .map_err(|e| Failure::new(key, Stage::Transform, &e))?;
                if !opts.dry_run {
                    store
                        .upsert(&Document::Source(doc))
                        .await
                        .map_err(|e| Failure::new(key, Stage::Write, &e))?;
                }
            }
            let doc = Document::Article(Article::from_page(&page, &cfg.hidden_categories));
            let existing = store
                .get(DocKind::Articles, key)
                .await
                .map_err(|e| Failure::new(key, Stage::Write, &e))?;
            let outcome = if existing.is_some() {
                Outcome::Updated
            } else {
                Outcome::Created
            };
            if opts.dry_run {
                return Ok(outcome);
            }
            write_and_verify(store, &doc).await?;
            Ok(outcome)
        }
        .await;
        match result {
            Ok(outcome) => report.tally(key, outcome),
            Err(failure) => {
                error!(title = %key, stage = %failure.stage, error = %failure.message, "article failed");
                report.failed.push(failure);
            }
        }
    }
    Ok(report)
}

/// Reconciles and publishes the full primary-source catalog.
pub async fn publish_sources<C, D>(
    catalog: &C,
    store: &D,
    cfg: &SyncConfig,
    opts: &PublishOptions,
) -> Result<TypeReport, SyncError>
where
    C: SourceCatalog,
    D: DocStore,
{
    info!("publishing sources");
    let mut report = TypeReport::new(DocKind::Sources);

    let records = catalog.published().await?;
    let indexed = store.list(DocKind::Sources).await?;
    let mut source: Vec<Stamp> = Vec::new();
    let mut by_id: HashMap<&str, &SourceRecord> = HashMap::new();
    for rec in &records {
        match rec.modified_at() {
            Ok(modified) => {
                source.push(Stamp::new(rec.encyclopedia_id.clone(), modified));
                by_id.insert(rec.encyclopedia_id.as_str(), rec);
            }
            Err(err) => report
                .failed
                .push(Failure::new(&rec.encyclopedia_id, Stage::Fetch, &err)),
        }
    }
    warn_on_empty_source(DocKind::Sources, &source, &indexed);

    let plan = reconcile::plan(&opts.mode(), &source, &indexed);
    report.considered = plan.len();
    info!(
        upsert = plan.upsert.len(),
        delete = plan.delete.len(),
        "source reconciliation complete"
    );
    if opts.report_only {
        return Ok(report);
    }

    delete_keys(store, DocKind::Sources, &plan.delete, opts.dry_run, &mut report).await;

    for (n, key) in plan.upsert.iter().enumerate() {
        info!(n = n + 1, total = plan.upsert.len(), source = %key, "source");
        let result: Result<Outcome, Failure> = async {
            let rec = by_id.get(key.as_str()).ok_or_else(|| {
                Failure::msg(
                    key,
                    Stage::Fetch,
                    format!("\"{key}\" is not in the source catalog"),
                )
            })?;
            let doc = PrimarySource::from_record(rec, &cfg.sources)
                .map_err(|e| Failure::new(key, Stage::Transform, &e))?;
            let existing = store
                .get(DocKind::Sources, key)
                .await
                .map_err(|e| Failure::new(key, Stage::Write, &e))?;
            let outcome = if existing.is_some() {
                Outcome::Updated
            } else {
                Outcome::Created
            };
            if opts.dry_run {
                return Ok(outcome);
            }
            write_and_verify(store, &Document::Source(doc)).await?;
            Ok(outcome)
        }
        .await;
        match result {
            Ok(outcome) => report.tally(key, outcome),
            Err(failure) => {
                error!(source = %key, stage = %failure.stage, error = %failure.message, "source failed");
                report.failed.push(failure);
            }
        }
    }
    Ok(report)
}

/// Full run: authors, then articles, then the source catalog.
pub async fn publish_all<W, C, D>(
    wiki: &W,
    catalog: &C,
    store: &D,
    cfg: &SyncConfig,
    opts: &PublishOptions,
) -> Result<RunReport, SyncError>
where
    W: ContentSource,
    C: SourceCatalog,
    D: DocStore,
{
    let started = Instant::now();
    let authors = publish_authors(wiki, store, cfg, opts).await?;
    let articles = publish_articles(wiki, catalog, store, cfg, opts).await?;
    let sources = publish_sources(catalog, store, cfg, opts).await?;
    let report = RunReport {
        types: vec![authors, articles, sources],
    };
    info!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        failed = report.failed_total(),
        "run complete"
    );
    Ok(report)
}
