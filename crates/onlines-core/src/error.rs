//! Error types for the site adapters
//!
//! Every failure inside the pipeline is one of these variants. Site rules and
//! the transport return them; the [`Adapter`](crate::pipeline::Adapter) logs
//! them and degrades to an empty outcome. OnlineError implements Serialize so
//! a host can forward the message verbatim.

use serde::{Serialize, Serializer};
use thiserror::Error;

/// Error type for adapter operations
#[derive(Error, Debug)]
pub enum OnlineError {
    /// Transport-level failure (connect, DNS, TLS, body read)
    #[error("Network failure: {0}")]
    Network(#[from] reqwest::Error),

    /// The request did not finish within its deadline
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Upstream answered with a non-success status
    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    /// 2xx response with an unusable or empty body
    #[error("Empty upstream response: {0}")]
    UpstreamEmpty(String),

    /// Body present but no extraction rule matched
    #[error("Nothing extracted: {0}")]
    ExtractionMiss(String),

    /// Search or catalog lookup yielded zero results
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid URL or locator
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Upstream JSON did not match the expected shape
    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration surface
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Serialize OnlineError as a string
impl Serialize for OnlineError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Result type alias for adapter operations
pub type Result<T> = std::result::Result<T, OnlineError>;
