//! Persisted document variants.
//!
//! Each variant has a fixed schema with a primary key derived from a
//! caller-visible identifier (page title or encyclopedia id), so upserts
//! are idempotent across re-publishes. Databox payloads ride along as
//! structured data; they are never flattened onto the typed fields.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::SourcesConfig;
use crate::contract::SourceRecord;
use crate::error::SyncError;
use crate::page::SourcePage;
use crate::transform::{self, Databox};

/// Document type discriminator; doubles as the index name suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocKind {
    Articles,
    Authors,
    Sources,
}

impl DocKind {
    pub const ALL: [DocKind; 3] = [DocKind::Articles, DocKind::Authors, DocKind::Sources];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocKind::Articles => "articles",
            DocKind::Authors => "authors",
            DocKind::Sources => "sources",
        }
    }
}

impl fmt::Display for DocKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A published encyclopedia article.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub url_title: String,
    pub title: String,
    pub title_sort: String,
    pub description: String,
    pub body: String,
    pub modified: DateTime<Utc>,
    pub published: bool,
    pub published_front: bool,
    pub published_restricted: bool,
    pub categories: Vec<String>,
    /// (lng, lat)
    pub coordinates: Option<(f64, f64)>,
    /// Byline display names; full author pages are separate documents.
    pub authors: Vec<String>,
    /// Parsed `[surname, given name]` pairs from the citation block.
    pub authors_citation: Vec<Vec<String>>,
    pub source_ids: Vec<String>,
    pub prev_page: Option<String>,
    pub next_page: Option<String>,
    pub databoxes: Vec<Databox>,
}

impl Article {
    /// Builds the persisted article from a fetched page.
    ///
    /// The page's categories were already intersected with the article-type
    /// whitelist; the hidden-category denylist is applied here so an
    /// indexed article never carries an internal editorial category.
    pub fn from_page(page: &SourcePage, hidden_categories: &[String]) -> Article {
        Article {
            url_title: page.url_title.clone(),
            title: page.title.trim().to_string(),
            title_sort: page.title_sort.clone(),
            description: page.description.clone(),
            body: page.body.trim().to_string(),
            modified: page.modified,
            published: page.published,
            published_front: page.published_front,
            published_restricted: page.published_restricted,
            categories: page
                .categories
                .iter()
                .filter(|c| !hidden_categories.contains(*c))
                .cloned()
                .collect(),
            coordinates: page.coordinates,
            authors: page.authors.display.clone(),
            authors_citation: page.authors.parsed.clone(),
            source_ids: page.source_ids.clone(),
            prev_page: page.prev_page.clone(),
            next_page: page.next_page.clone(),
            databoxes: page.databoxes.clone(),
        }
    }
}

/// An author biography page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Author {
    pub url_title: String,
    pub title: String,
    pub title_sort: String,
    pub body: String,
    pub modified: DateTime<Utc>,
    pub published: bool,
    pub article_titles: Vec<String>,
}

impl Author {
    pub fn from_page(page: &SourcePage) -> Author {
        Author {
            url_title: page.url_title.clone(),
            title: page.title.trim().to_string(),
            title_sort: page.title_sort.clone(),
            body: page.body.trim().to_string(),
            modified: page.modified,
            published: page.published,
            article_titles: page.author_articles.clone(),
        }
    }
}

/// A primary-source media record from the metadata service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrimarySource {
    pub encyclopedia_id: String,
    pub catalog_id: i64,
    pub densho_id: String,
    pub institution_id: String,
    pub collection_name: String,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    pub published: bool,
    pub creative_commons: bool,
    /// Title of the article this source illustrates.
    pub headword: String,
    pub original: String,
    pub original_size: i64,
    pub original_url: String,
    pub original_path: String,
    pub display: String,
    pub display_size: i64,
    pub display_url: String,
    pub display_path: String,
    pub streaming_url: String,
    pub external_url: String,
    pub media_format: String,
    pub aspect_ratio: String,
    pub caption: String,
    pub caption_extended: String,
    pub transcript: String,
    pub courtesy: String,
    pub filename: String,
    pub img_path: String,
}

impl PrimarySource {
    pub fn from_record(rec: &SourceRecord, cfg: &SourcesConfig) -> Result<PrimarySource, SyncError> {
        let streaming_url = match &cfg.streaming_prefix {
            Some(prefix) => rec.streaming_url.replace(prefix.as_str(), ""),
            None => rec.streaming_url.clone(),
        };
        // Fullsize image for the thumbnail: prefer the display variant.
        let (filename, img_path) = if !rec.display.is_empty() {
            let f = basename(&rec.display);
            let p = bucket_path(&cfg.media_bucket, &f);
            (f, p)
        } else if !rec.original.is_empty() {
            let f = basename(&rec.original);
            let p = bucket_path(&cfg.media_bucket, &f);
            (f, p)
        } else {
            (String::new(), String::new())
        };
        Ok(PrimarySource {
            encyclopedia_id: rec.encyclopedia_id.clone(),
            catalog_id: rec.id,
            densho_id: rec.densho_id.clone(),
            institution_id: rec.institution_id.clone(),
            collection_name: rec.collection_name.clone(),
            created: rec.created_at()?,
            modified: rec.modified_at()?,
            published: rec.published,
            creative_commons: rec.creative_commons,
            headword: rec.headword.clone(),
            original: basename(&rec.original),
            original_size: rec.original_size,
            original_url: rec.original.clone(),
            original_path: rec.original.replace(cfg.media_url.as_str(), ""),
            display: basename(&rec.display),
            display_size: rec.display_size,
            display_url: rec.display.clone(),
            display_path: rec.display.replace(cfg.media_url.as_str(), ""),
            streaming_url,
            external_url: transform::fix_external_url(&rec.external_url),
            media_format: rec.media_format.clone(),
            aspect_ratio: rec.aspect_ratio.clone(),
            caption: rec.caption.trim().to_string(),
            caption_extended: rec.caption_extended.trim().to_string(),
            transcript: rec.transcript.trim().to_string(),
            courtesy: rec.courtesy.trim().to_string(),
            filename,
            img_path,
        })
    }
}

fn basename(url: &str) -> String {
    url.rsplit('/').next().unwrap_or(url).to_string()
}

fn bucket_path(bucket: &str, filename: &str) -> String {
    if bucket.is_empty() {
        filename.to_string()
    } else {
        format!("{}/{}", bucket.trim_end_matches('/'), filename)
    }
}

/// A persisted document, one of the three variants.
#[derive(Debug, Clone)]
pub enum Document {
    Article(Article),
    Author(Author),
    Source(PrimarySource),
}

impl Document {
    pub fn kind(&self) -> DocKind {
        match self {
            Document::Article(_) => DocKind::Articles,
            Document::Author(_) => DocKind::Authors,
            Document::Source(_) => DocKind::Sources,
        }
    }

    /// Primary key in the index.
    pub fn key(&self) -> &str {
        match self {
            Document::Article(a) => &a.url_title,
            Document::Author(a) => &a.url_title,
            Document::Source(s) => &s.encyclopedia_id,
        }
    }

    pub fn to_value(&self) -> Result<serde_json::Value, SyncError> {
        let value = match self {
            Document::Article(a) => serde_json::to_value(a)?,
            Document::Author(a) => serde_json::to_value(a)?,
            Document::Source(s) => serde_json::to_value(s)?,
        };
        Ok(value)
    }

    pub fn from_value(kind: DocKind, value: serde_json::Value) -> Result<Document, SyncError> {
        let doc = match kind {
            DocKind::Articles => Document::Article(serde_json::from_value(value)?),
            DocKind::Authors => Document::Author(serde_json::from_value(value)?),
            DocKind::Sources => Document::Source(serde_json::from_value(value)?),
        };
        Ok(doc)
    }
}
