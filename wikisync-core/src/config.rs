use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::SyncError;

/// Titles that are published but are site furniture, never articles.
pub const NON_ARTICLE_TITLES: &[&str] = &["about", "categories", "contact", "contents", "search"];

/// Top-level domain configuration for a sync run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub wiki: WikiConfig,
    pub sources: SourcesConfig,
    pub docstore: DocstoreConfig,
    /// Internal editorial categories, stripped from article category lists.
    #[serde(default)]
    pub hidden_categories: Vec<String>,
    /// Subtrees removed from page bodies, as `attr=value` selectors.
    #[serde(default)]
    pub hidden_tags: Vec<TagSelector>,
    /// Replace each hidden subtree with an HTML comment instead of
    /// deleting it silently.
    #[serde(default = "default_true")]
    pub hidden_tag_comments: bool,
    /// Published pages that must never be classified as articles.
    #[serde(default = "default_non_article_titles")]
    pub non_article_titles: Vec<String>,
    /// Databox marker divs to extract, with their storage prefixes.
    #[serde(default)]
    pub databoxes: Vec<DataboxSpec>,
    /// Databox field whose presence marks a page as published to the
    /// restricted channel.
    #[serde(default)]
    pub restricted_field: Option<String>,
    /// Publish pages even when they are not in the Published category.
    #[serde(default)]
    pub show_unpublished: bool,
}

fn default_true() -> bool {
    true
}

fn default_non_article_titles() -> Vec<String> {
    NON_ARTICLE_TITLES.iter().map(|t| t.to_string()).collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WikiConfig {
    pub api_url: String,
    pub username: String,
    pub password: String,
    /// HTTP Basic auth in front of the editors' wiki, when reached from
    /// outside the LAN.
    #[serde(default)]
    pub http_user: Option<String>,
    #[serde(default)]
    pub http_pass: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    pub api_url: String,
    #[serde(default)]
    pub http_user: Option<String>,
    #[serde(default)]
    pub http_pass: Option<String>,
    /// Bucket path prefix for resolved media files.
    #[serde(default)]
    pub media_bucket: String,
    /// URL prefix stripped from original/display URLs to obtain
    /// store-relative paths.
    #[serde(default)]
    pub media_url: String,
    /// Streaming server prefix stripped from streaming URLs.
    #[serde(default)]
    pub streaming_prefix: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocstoreConfig {
    pub url: String,
    pub index_prefix: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    30
}

impl SyncConfig {
    pub fn trace_loaded(&self) {
        info!(
            wiki_api = %self.wiki.api_url,
            sources_api = %self.sources.api_url,
            docstore = %self.docstore.url,
            index_prefix = %self.docstore.index_prefix,
            databoxes = self.databoxes.len(),
            hidden_tags = self.hidden_tags.len(),
            "Loaded SyncConfig"
        );
        debug!(?self, "SyncConfig loaded (full debug)");
    }
}

/// A subtree selector in `attr=value` form, e.g. `id=rgdatabox-CoreDisplay`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TagSelector {
    pub attr: String,
    pub value: String,
}

impl TagSelector {
    pub fn parse(combo: &str) -> Result<Self, SyncError> {
        match combo.split_once('=') {
            Some((attr, value)) if !attr.is_empty() && !value.is_empty() => Ok(TagSelector {
                attr: attr.trim().to_string(),
                value: value.trim().to_string(),
            }),
            _ => Err(SyncError::Config(format!(
                "hidden tag selector format: \"attr=value\", got \"{combo}\""
            ))),
        }
    }
}

impl TryFrom<String> for TagSelector {
    type Error = SyncError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        TagSelector::parse(&s)
    }
}

impl From<TagSelector> for String {
    fn from(t: TagSelector) -> String {
        format!("{}={}", t.attr, t.value)
    }
}

/// One databox marker div and the prefix its fields are stored under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataboxSpec {
    pub div_id: String,
    pub prefix: String,
}

/// Parses the compact `DIVID:PREFIX;DIVID:PREFIX` databox spec string.
///
/// Malformed specs are a fatal configuration error: the pipeline must not
/// start publishing with a half-understood databox map.
pub fn parse_databox_specs(spec: &str) -> Result<Vec<DataboxSpec>, SyncError> {
    let mut specs = Vec::new();
    for keyval in spec.split(';') {
        let keyval = keyval.trim();
        if keyval.is_empty() {
            continue;
        }
        let (div_id, prefix) = keyval.split_once(':').ok_or_else(|| {
            SyncError::Config(format!(
                "databox format: \"DIVID:PREFIX;DIVID:PREFIX\", got \"{keyval}\""
            ))
        })?;
        if div_id.trim().is_empty() || prefix.trim().is_empty() {
            return Err(SyncError::Config(format!(
                "databox format: \"DIVID:PREFIX;DIVID:PREFIX\", got \"{keyval}\""
            )));
        }
        specs.push(DataboxSpec {
            div_id: div_id.trim().to_string(),
            prefix: prefix.trim().to_string(),
        });
    }
    Ok(specs)
}
