//! Loads and adapts the YAML config file into the core `SyncConfig`.
//!
//! This is the only place untrusted YAML is parsed. Loose, string-typed
//! fields (databox specs, hidden-tag selectors) are validated here, before
//! any network activity: a half-understood config must not publish
//! anything. Secrets may be overridden from the environment.

use std::env;
use std::fs;
use std::path::Path;

use anyhow::Result;
use serde::Deserialize;
use tracing::{error, info};

use wikisync_core::config::{
    parse_databox_specs, DocstoreConfig, SourcesConfig, SyncConfig, TagSelector, WikiConfig,
    NON_ARTICLE_TITLES,
};

/// Environment variable overriding the wiki API password from the file.
pub const WIKI_PASSWORD_ENV: &str = "WIKISYNC_WIKI_PASSWORD";

#[derive(Debug, Deserialize)]
struct RawConfig {
    wiki: WikiConfig,
    sources: SourcesConfig,
    docstore: DocstoreConfig,
    #[serde(default)]
    hidden_categories: Vec<String>,
    /// `attr=value` selector strings.
    #[serde(default)]
    hidden_tags: Vec<String>,
    #[serde(default = "default_true")]
    hidden_tag_comments: bool,
    #[serde(default)]
    non_article_titles: Option<Vec<String>>,
    /// Compact `DIVID:PREFIX;DIVID:PREFIX` spec string.
    #[serde(default)]
    databoxes: String,
    #[serde(default)]
    restricted_field: Option<String>,
    #[serde(default)]
    show_unpublished: bool,
}

fn default_true() -> bool {
    true
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<SyncConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let content = fs::read_to_string(path_ref).map_err(|e| {
        error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
        anyhow::anyhow!("Failed to read config file {:?}: {}", path_ref, e)
    })?;

    let raw: RawConfig = serde_yaml::from_str(&content).map_err(|e| {
        error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
        anyhow::anyhow!("Failed to parse config YAML: {e}")
    })?;

    let hidden_tags = raw
        .hidden_tags
        .iter()
        .map(|combo| TagSelector::parse(combo))
        .collect::<Result<Vec<_>, _>>()?;
    let databoxes = parse_databox_specs(&raw.databoxes)?;

    let mut cfg = SyncConfig {
        wiki: raw.wiki,
        sources: raw.sources,
        docstore: raw.docstore,
        hidden_categories: raw.hidden_categories,
        hidden_tags,
        hidden_tag_comments: raw.hidden_tag_comments,
        non_article_titles: raw.non_article_titles.unwrap_or_else(|| {
            NON_ARTICLE_TITLES.iter().map(|t| t.to_string()).collect()
        }),
        databoxes,
        restricted_field: raw.restricted_field,
        show_unpublished: raw.show_unpublished,
    };
    if let Ok(password) = env::var(WIKI_PASSWORD_ENV) {
        cfg.wiki.password = password;
    }
    cfg.trace_loaded();
    Ok(cfg)
}
