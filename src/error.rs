//! Error types
//!
//! Configuration problems are fatal and surface before any request is made.
//! Fetch errors are scoped to a single request and are carried as values by
//! the orchestrator rather than propagated.

use std::time::Duration;
use thiserror::Error;

/// Invalid or missing configuration, detected before any I/O
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required configuration: {0}")]
    MissingField(&'static str),

    #[error("invalid {field} format: {reason}")]
    InvalidKey { field: &'static str, reason: &'static str },

    #[error("invalid API gateway URL: {0}")]
    InvalidGateway(String),

    #[error("unsupported sampling interval: {0} minutes (expected one of 1, 5, 10, 15, 30, 60)")]
    UnsupportedInterval(u32),

    #[error("unknown timezone: {0}")]
    UnknownTimezone(String),

    #[error("project '{0}' not found in configuration")]
    UnknownProject(String),

    #[error("invalid date range: {0}")]
    InvalidRange(String),

    #[error("{0} must be greater than zero")]
    NotPositive(&'static str),
}

/// Failure of one remote call
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status} from {url}: {body}")]
    Status { status: u16, url: String, body: String },

    #[error("platform rejected request (code {code}): {message}")]
    Api { code: i64, message: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("request cancelled")]
    Cancelled,
}

/// Failure of an export run as a whole
#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to create platform client: {0}")]
    Client(#[source] FetchError),

    #[error("failed to list {what}: {source}")]
    Catalogue {
        what: &'static str,
        #[source]
        source: FetchError,
    },

    #[error("failed to write output: {0:#}")]
    Output(anyhow::Error),

    #[error("export cancelled")]
    Cancelled,
}
