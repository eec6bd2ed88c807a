//! Trait contracts between the pipeline and its collaborators.
//!
//! The orchestrator only ever talks to the wiki, the primary-source
//! catalog and the document store through these traits, so every piece of
//! the pipeline can be exercised against `mockall` mocks. Real
//! implementations: [`crate::wiki::WikiSession`],
//! [`crate::sources::SourcesClient`], and the docstore HTTP client in the
//! CLI crate.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use mockall::automock;
use serde::{Deserialize, Serialize};

use crate::document::{DocKind, Document};
use crate::error::SyncError;

/// One entry of a timestamped key listing, from either side of the diff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stamp {
    pub key: String,
    pub modified: DateTime<Utc>,
}

impl Stamp {
    pub fn new(key: impl Into<String>, modified: DateTime<Utc>) -> Stamp {
        Stamp {
            key: key.into(),
            modified,
        }
    }
}

/// A wiki page as fetched, before any classification or cleanup.
#[derive(Debug, Clone)]
pub struct RawPage {
    /// Title the page was requested under; the document key.
    pub url_title: String,
    pub display_title: String,
    /// Rendered HTML body from the wiki parser.
    pub html: String,
    /// Category names without the `Category:` prefix.
    pub categories: Vec<String>,
    /// Explicit sort key, empty when the page does not set one.
    pub default_sort: String,
    /// Filenames of images embedded in the page.
    pub images: Vec<String>,
    /// Timestamp of the latest revision.
    pub modified: DateTime<Utc>,
}

/// One primary-source record as served by the metadata service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceRecord {
    pub id: i64,
    pub encyclopedia_id: String,
    pub densho_id: String,
    pub institution_id: String,
    pub collection_name: String,
    pub created: String,
    pub modified: String,
    pub published: bool,
    pub creative_commons: bool,
    pub headword: String,
    pub original: String,
    pub original_size: i64,
    pub display: String,
    pub display_size: i64,
    pub streaming_url: String,
    pub external_url: String,
    pub media_format: String,
    pub aspect_ratio: String,
    pub caption: String,
    pub caption_extended: String,
    pub transcript: String,
    pub courtesy: String,
}

impl SourceRecord {
    pub fn created_at(&self) -> Result<DateTime<Utc>, SyncError> {
        parse_timestamp(&self.created)
    }

    pub fn modified_at(&self) -> Result<DateTime<Utc>, SyncError> {
        parse_timestamp(&self.modified)
    }
}

/// Accepts RFC 3339 and the catalog's legacy `YYYY-MM-DD HH:MM:SS` form.
pub fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, SyncError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Ok(ts.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S") {
        return Ok(naive.and_utc());
    }
    Err(SyncError::BadResponse(format!(
        "unparseable timestamp \"{text}\""
    )))
}

/// Read access to the authoring wiki.
///
/// Implementations hold an authenticated session; acquiring and releasing
/// that session is the implementor's concern, not part of the contract.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// All published pages with the timestamp of their latest revision,
    /// sorted by title.
    async fn published_pages(&self) -> Result<Vec<Stamp>, SyncError>;

    /// Titles of all members of the Authors category.
    async fn author_titles(&self) -> Result<Vec<String>, SyncError>;

    /// Members of the Articles category: the article-type category
    /// whitelist, with their `Category:` prefixes.
    async fn article_categories(&self) -> Result<Vec<String>, SyncError>;

    /// Rendered page detail plus revision timestamp for a single title.
    async fn page_source(&self, title: &str) -> Result<RawPage, SyncError>;

    /// Titles of pages linking to the given page ("articles by author").
    async fn backlinks(&self, title: &str) -> Result<Vec<String>, SyncError>;
}

/// Read access to the primary-source metadata service.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait SourceCatalog: Send + Sync {
    /// All published primary-source records.
    async fn published(&self) -> Result<Vec<SourceRecord>, SyncError>;

    /// Records for the given encyclopedia ids; unknown ids are skipped.
    async fn for_ids(&self, ids: &[String]) -> Result<Vec<SourceRecord>, SyncError>;
}

/// Typed access to the document store, one index per document variant.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait DocStore: Send + Sync {
    /// Keys and last-modified timestamps of every indexed document of the
    /// given kind.
    async fn list(&self, kind: DocKind) -> Result<Vec<Stamp>, SyncError>;

    /// Fetches a document; `None` means it does not exist yet.
    async fn get(&self, kind: DocKind, key: &str) -> Result<Option<Document>, SyncError>;

    async fn exists(&self, kind: DocKind, key: &str) -> Result<bool, SyncError>;

    /// Creates or wholesale-overwrites a document.
    async fn upsert(&self, doc: &Document) -> Result<(), SyncError>;

    /// Deletes a document; deleting an absent key is not an error.
    async fn delete(&self, kind: DocKind, key: &str) -> Result<(), SyncError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_timestamp_forms() {
        assert_eq!(
            parse_timestamp("2019-01-01T12:00:00Z").unwrap(),
            parse_timestamp("2019-01-01 12:00:00").unwrap()
        );
        assert!(parse_timestamp("last tuesday").is_err());
    }
}
