//! Command-line surface: argument parsing and orchestration glue.
//!
//! All business logic lives in `wikisync-core`; this module loads the
//! config, builds the concrete clients, brackets each publishing batch
//! with wiki login/logout, and prints run reports.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};

use wikisync_core::config::SyncConfig;
use wikisync_core::contract::{ContentSource, DocStore, SourceCatalog};
use wikisync_core::document::DocKind;
use wikisync_core::publish::{self, PublishOptions, RunReport, TypeReport};
use wikisync_core::sources::SourcesClient;
use wikisync_core::wiki::WikiSession;

use crate::docstore::SearchIndexClient;
use crate::load_config::load_config;

/// CLI for wikisync: publish wiki content to the search index.
#[derive(Parser)]
#[clap(
    name = "wikisync",
    version,
    about = "Publish wiki articles, authors and primary sources to the search index"
)]
pub struct Cli {
    /// Path to the YAML config file
    #[clap(long, global = true, default_value = "/etc/wikisync/wikisync.yml")]
    pub config: PathBuf,
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print configuration settings
    Config,
    /// Print wiki and index document counts
    Status,
    /// Create the document indices
    Create,
    /// Delete the document indices (requires --confirm)
    Destroy {
        /// Yes I really want to delete the indices
        #[clap(long)]
        confirm: bool,
    },
    /// Delete and recreate the document indices (requires --confirm)
    Reset {
        #[clap(long)]
        confirm: bool,
    },
    /// Synchronize authors, articles and primary sources
    Sync {
        #[clap(flatten)]
        opts: PublishArgs,
    },
    /// Synchronize author pages
    Authors {
        #[clap(flatten)]
        opts: PublishArgs,
        /// Single author to publish
        #[clap(long)]
        title: Option<String>,
    },
    /// Synchronize articles
    Articles {
        #[clap(flatten)]
        opts: PublishArgs,
        /// Single article to publish
        #[clap(long)]
        title: Option<String>,
    },
    /// Synchronize primary sources
    Sources {
        #[clap(flatten)]
        opts: PublishArgs,
        /// Single source to publish
        #[clap(long = "source-id")]
        source_id: Option<String>,
    },
    /// List indexed keys for a doctype
    List { doctype: Doctype },
    /// Print a single indexed document
    Get {
        doctype: Doctype,
        key: String,
        /// Print the raw JSON record
        #[clap(long)]
        json: bool,
        /// Include the body text
        #[clap(long)]
        body: bool,
    },
    /// Delete a single indexed document (requires --confirm)
    Delete {
        doctype: Doctype,
        key: String,
        #[clap(long)]
        confirm: bool,
    },
}

#[derive(Args, Debug, Default, Clone)]
pub struct PublishArgs {
    /// Report what would change, then stop
    #[clap(long)]
    pub report: bool,
    /// Trial run with no changes made
    #[clap(long)]
    pub dryrun: bool,
    /// Update records whether they need it or not
    #[clap(long)]
    pub force: bool,
    /// Publish every source record; for a freshly created index
    #[clap(long)]
    pub rebuild: bool,
}

impl PublishArgs {
    fn to_options(&self, title: Option<String>) -> PublishOptions {
        PublishOptions {
            force: self.force,
            rebuild: self.rebuild,
            dry_run: self.dryrun,
            report_only: self.report,
            title,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum Doctype {
    Articles,
    Authors,
    Sources,
}

impl From<Doctype> for DocKind {
    fn from(d: Doctype) -> DocKind {
        match d {
            Doctype::Articles => DocKind::Articles,
            Doctype::Authors => DocKind::Authors,
            Doctype::Sources => DocKind::Sources,
        }
    }
}

/// Async CLI entrypoint, also used by integration tests.
pub async fn run(cli: Cli) -> Result<()> {
    let cfg = load_config(&cli.config)?;

    match cli.command {
        Commands::Config => {
            print_config(&cfg);
            Ok(())
        }
        Commands::Status => status(&cfg).await,
        Commands::Create => {
            let store = SearchIndexClient::new(&cfg.docstore)?;
            store.create_indices().await?;
            Ok(())
        }
        Commands::Destroy { confirm } => {
            if !confirm {
                println!("Add '--confirm' if you're sure you want to do this.");
                return Ok(());
            }
            let store = SearchIndexClient::new(&cfg.docstore)?;
            store.delete_indices().await?;
            Ok(())
        }
        Commands::Reset { confirm } => {
            if !confirm {
                println!("Add '--confirm' if you're sure you want to do this.");
                return Ok(());
            }
            let store = SearchIndexClient::new(&cfg.docstore)?;
            store.delete_indices().await?;
            store.create_indices().await?;
            Ok(())
        }
        Commands::Sync { opts } => {
            let report = sync_all(&cfg, &opts.to_options(None)).await?;
            print!("{report}");
            Ok(())
        }
        Commands::Authors { opts, title } => {
            let store = SearchIndexClient::new(&cfg.docstore)?;
            let session = WikiSession::login(&cfg.wiki).await?;
            let result = publish::publish_authors(&session, &store, &cfg, &opts.to_options(title)).await;
            session.logout().await;
            print_type_report(result?);
            Ok(())
        }
        Commands::Articles { opts, title } => {
            let store = SearchIndexClient::new(&cfg.docstore)?;
            let catalog = SourcesClient::new(&cfg.sources)?;
            let session = WikiSession::login(&cfg.wiki).await?;
            let result =
                publish::publish_articles(&session, &catalog, &store, &cfg, &opts.to_options(title))
                    .await;
            session.logout().await;
            print_type_report(result?);
            Ok(())
        }
        Commands::Sources { opts, source_id } => {
            let store = SearchIndexClient::new(&cfg.docstore)?;
            let catalog = SourcesClient::new(&cfg.sources)?;
            let report =
                publish::publish_sources(&catalog, &store, &cfg, &opts.to_options(source_id))
                    .await?;
            print_type_report(report);
            Ok(())
        }
        Commands::List { doctype } => {
            let store = SearchIndexClient::new(&cfg.docstore)?;
            let stamps = store.list(doctype.into()).await?;
            let total = stamps.len();
            for (n, stamp) in stamps.iter().enumerate() {
                println!("{}/{}| {} {}", n + 1, total, stamp.modified, stamp.key);
            }
            Ok(())
        }
        Commands::Get {
            doctype,
            key,
            json,
            body,
        } => get(&cfg, doctype.into(), &key, json, body).await,
        Commands::Delete {
            doctype,
            key,
            confirm,
        } => {
            if !confirm {
                println!("Add '--confirm' if you're sure you want to do this.");
                return Ok(());
            }
            let store = SearchIndexClient::new(&cfg.docstore)?;
            let kind: DocKind = doctype.into();
            store.delete(kind, &key).await?;
            println!("deleted {kind} \"{key}\"");
            Ok(())
        }
    }
}

async fn sync_all(cfg: &SyncConfig, opts: &PublishOptions) -> Result<RunReport> {
    let store = SearchIndexClient::new(&cfg.docstore)?;
    let catalog = SourcesClient::new(&cfg.sources)?;
    // The session is acquired once for the whole batch and released even
    // when the batch errors out.
    let session = WikiSession::login(&cfg.wiki).await?;
    let result = publish::publish_all(&session, &catalog, &store, cfg, opts).await;
    session.logout().await;
    Ok(result?)
}

fn print_type_report(report: TypeReport) {
    print!("{report}");
}

fn print_config(cfg: &SyncConfig) {
    println!("wikisync commands will use the following settings:");
    println!();
    println!("WIKI_API_URL:     {}", cfg.wiki.api_url);
    println!("WIKI_USERNAME:    {}", cfg.wiki.username);
    println!("SOURCES_API_URL:  {}", cfg.sources.api_url);
    println!("DOCSTORE_URL:     {}", cfg.docstore.url);
    println!("INDEX_PREFIX:     {}", cfg.docstore.index_prefix);
    println!("HIDDEN_TAGS:      {:?}", cfg.hidden_tags);
    println!("HIDDEN_CATEGORIES:{:?}", cfg.hidden_categories);
    println!("DATABOXES:        {:?}", cfg.databoxes);
    println!("SHOW_UNPUBLISHED: {}", cfg.show_unpublished);
}

async fn status(cfg: &SyncConfig) -> Result<()> {
    println!("wiki: {}", cfg.wiki.api_url);
    let session = WikiSession::login(&cfg.wiki).await?;
    let pages = session.published_pages().await;
    let authors = session.author_titles().await;
    session.logout().await;
    let pages = pages?;
    let authors = authors?;
    let articles = pages.iter().filter(|p| !authors.contains(&p.key)).count();
    println!("  authors:  {}", authors.len());
    println!("  articles: {articles}");

    let catalog = SourcesClient::new(&cfg.sources)?;
    println!("sources api: {}", cfg.sources.api_url);
    println!("  sources:  {}", catalog.published().await?.len());

    let store = SearchIndexClient::new(&cfg.docstore)?;
    println!("docstore: {}", cfg.docstore.url);
    for (kind, count) in store.counts().await? {
        println!("  {kind}: {count}");
    }
    Ok(())
}

async fn get(cfg: &SyncConfig, kind: DocKind, key: &str, json: bool, body: bool) -> Result<()> {
    let store = SearchIndexClient::new(&cfg.docstore)?;
    let Some(doc) = store.get(kind, key).await? else {
        println!("{kind} \"{key}\" not found");
        return Ok(());
    };
    let mut value = doc.to_value()?;
    if !body {
        if let Some(obj) = value.as_object_mut() {
            obj.remove("body");
        }
    }
    if json {
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }
    if let Some(obj) = value.as_object() {
        let width = obj.keys().map(String::len).max().unwrap_or(0);
        for (k, v) in obj {
            println!("{:width$}: {}", k, v, width = width);
        }
    }
    Ok(())
}
