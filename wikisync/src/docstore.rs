//! HTTP client for the document store.
//!
//! Implements the core `DocStore` contract against an
//! Elasticsearch-compatible JSON API, one index per document variant,
//! plus the index admin plumbing (create/delete/status) used by the CLI.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde_json::{json, Value};
use tracing::{debug, info};

use wikisync_core::config::DocstoreConfig;
use wikisync_core::contract::{parse_timestamp, DocStore, Stamp};
use wikisync_core::document::{DocKind, Document};
use wikisync_core::error::SyncError;

/// Documents per listing request; comfortably above the collection size.
const MAX_SIZE: usize = 10_000;

pub struct SearchIndexClient {
    http: reqwest::Client,
    base: Url,
    prefix: String,
}

impl SearchIndexClient {
    pub fn new(cfg: &DocstoreConfig) -> Result<SearchIndexClient, SyncError> {
        let base = Url::parse(&cfg.url)
            .map_err(|e| SyncError::Config(format!("invalid docstore url \"{}\": {e}", cfg.url)))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        Ok(SearchIndexClient {
            http,
            base,
            prefix: cfg.index_prefix.clone(),
        })
    }

    pub fn index_name(&self, kind: DocKind) -> String {
        format!("{}-{}", self.prefix, kind.as_str())
    }

    fn url(&self, segments: &[&str]) -> Result<Url, SyncError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| SyncError::Config(format!("docstore url \"{}\" cannot be a base", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn check(resp: reqwest::Response) -> Result<reqwest::Response, SyncError> {
        let status = resp.status();
        if status.is_success() {
            Ok(resp)
        } else {
            Err(SyncError::Api {
                status,
                url: resp.url().to_string(),
            })
        }
    }

    pub async fn ping(&self) -> Result<(), SyncError> {
        Self::check(self.http.get(self.base.clone()).send().await?)?;
        Ok(())
    }

    /// Creates one index per document variant. Mappings are permissive;
    /// only the fields the pipeline relies on are typed.
    pub async fn create_indices(&self) -> Result<(), SyncError> {
        for kind in DocKind::ALL {
            let url = self.url(&[self.index_name(kind).as_str()])?;
            let body = json!({
                "mappings": {
                    "properties": {
                        "modified": {"type": "date"},
                        "published": {"type": "boolean"},
                    }
                }
            });
            info!(index = %self.index_name(kind), "creating index");
            Self::check(self.http.put(url).json(&body).send().await?)?;
        }
        Ok(())
    }

    /// Deletes the indices; absent indices are not an error.
    pub async fn delete_indices(&self) -> Result<(), SyncError> {
        for kind in DocKind::ALL {
            let url = self.url(&[self.index_name(kind).as_str()])?;
            info!(index = %self.index_name(kind), "deleting index");
            let resp = self.http.delete(url).send().await?;
            if resp.status() != StatusCode::NOT_FOUND {
                Self::check(resp)?;
            }
        }
        Ok(())
    }

    /// Indexed document counts per variant.
    pub async fn counts(&self) -> Result<Vec<(DocKind, u64)>, SyncError> {
        let mut counts = Vec::new();
        for kind in DocKind::ALL {
            let url = self.url(&[self.index_name(kind).as_str(), "_count"])?;
            let resp = self.http.get(url).send().await?;
            if resp.status() == StatusCode::NOT_FOUND {
                counts.push((kind, 0));
                continue;
            }
            let v: Value = Self::check(resp)?.json().await?;
            counts.push((kind, v["count"].as_u64().unwrap_or(0)));
        }
        Ok(counts)
    }
}

#[async_trait]
impl DocStore for SearchIndexClient {
    async fn list(&self, kind: DocKind) -> Result<Vec<Stamp>, SyncError> {
        let url = self.url(&[self.index_name(kind).as_str(), "_search"])?;
        let body = json!({
            "size": MAX_SIZE,
            "_source": ["modified"],
            "query": {"match_all": {}},
        });
        let v: Value = Self::check(self.http.post(url).json(&body).send().await?)?
            .json()
            .await?;
        let mut stamps = Vec::new();
        if let Some(hits) = v["hits"]["hits"].as_array() {
            for hit in hits {
                let Some(id) = hit["_id"].as_str() else {
                    continue;
                };
                let Some(modified) = hit["_source"]["modified"].as_str() else {
                    continue;
                };
                stamps.push(Stamp::new(id, parse_timestamp(modified)?));
            }
        }
        debug!(kind = %kind, count = stamps.len(), "listed index");
        Ok(stamps)
    }

    async fn get(&self, kind: DocKind, key: &str) -> Result<Option<Document>, SyncError> {
        let url = self.url(&[self.index_name(kind).as_str(), "_doc", key])?;
        let resp = self.http.get(url).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let v: Value = Self::check(resp)?.json().await?;
        if !v["found"].as_bool().unwrap_or(false) {
            return Ok(None);
        }
        Ok(Some(Document::from_value(kind, v["_source"].clone())?))
    }

    async fn exists(&self, kind: DocKind, key: &str) -> Result<bool, SyncError> {
        let url = self.url(&[self.index_name(kind).as_str(), "_doc", key])?;
        let resp = self.http.head(url).send().await?;
        Ok(resp.status().is_success())
    }

    async fn upsert(&self, doc: &Document) -> Result<(), SyncError> {
        let url = self.url(&[self.index_name(doc.kind()).as_str(), "_doc", doc.key()])?;
        let body = doc.to_value()?;
        debug!(kind = %doc.kind(), key = %doc.key(), "upserting");
        Self::check(self.http.put(url).json(&body).send().await?)?;
        Ok(())
    }

    async fn delete(&self, kind: DocKind, key: &str) -> Result<(), SyncError> {
        let url = self.url(&[self.index_name(kind).as_str(), "_doc", key])?;
        debug!(kind = %kind, key = %key, "deleting");
        let resp = self.http.delete(url).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::check(resp)?;
        Ok(())
    }
}
