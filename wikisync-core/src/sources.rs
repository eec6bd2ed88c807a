//! Client for the primary-source metadata service.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::config::SourcesConfig;
use crate::contract::{SourceCatalog, SourceRecord};
use crate::error::SyncError;

pub struct SourcesClient {
    http: reqwest::Client,
    cfg: SourcesConfig,
}

impl SourcesClient {
    pub fn new(cfg: &SourcesConfig) -> Result<SourcesClient, SyncError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        Ok(SourcesClient {
            http,
            cfg: cfg.clone(),
        })
    }

    async fn get_records(&self, url: &str) -> Result<Vec<SourceRecord>, SyncError> {
        debug!(url, "GET");
        let req = self
            .http
            .get(url)
            .header("content-type", "application/json");
        let req = match &self.cfg.http_user {
            Some(user) => req.basic_auth(user, self.cfg.http_pass.as_deref()),
            None => req,
        };
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SyncError::Api {
                status,
                url: resp.url().to_string(),
            });
        }
        Ok(resp.json::<Vec<SourceRecord>>().await?)
    }
}

#[async_trait]
impl SourceCatalog for SourcesClient {
    async fn published(&self) -> Result<Vec<SourceRecord>, SyncError> {
        let url = format!("{}/sources/", self.cfg.api_url.trim_end_matches('/'));
        let records = self.get_records(&url).await?;
        debug!(count = records.len(), "retrieved source catalog");
        Ok(records)
    }

    async fn for_ids(&self, ids: &[String]) -> Result<Vec<SourceRecord>, SyncError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!(
            "{}/sources/{}",
            self.cfg.api_url.trim_end_matches('/'),
            ids.join(",")
        );
        self.get_records(&url).await
    }
}
