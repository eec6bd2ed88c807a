use thiserror::Error;

use crate::document::DocKind;

/// Core error taxonomy for the sync pipeline.
///
/// `Config` and `Auth` are fatal: the orchestrator aborts before (or
/// instead of) touching the network. Everything else is recorded per key
/// in the run report and the batch continues.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{url} returned HTTP {status}")]
    Api { status: reqwest::StatusCode, url: String },
    #[error("unexpected response from {0}")]
    BadResponse(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("wiki page \"{0}\" does not exist")]
    MissingPage(String),
    #[error("{kind} \"{key}\" not found in index")]
    NotFound { kind: DocKind, key: String },
    #[error("{kind} \"{key}\" was written but could not be read back")]
    Verify { kind: DocKind, key: String },
}
