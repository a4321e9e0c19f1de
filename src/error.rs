//! Error types for the research pipeline.

use thiserror::Error;

/// Errors that can occur during a research run.
#[derive(Error, Debug)]
pub enum Error {
    /// The generative service's quota is exhausted. Never retried and never
    /// absorbed by a fail-open path; terminates the whole run.
    #[error("generation quota exhausted: {0}")]
    QuotaExhausted(String),

    /// A gateway call failed after the gateway's own transient retries.
    #[error("gateway error: {0}")]
    Gateway(String),

    /// A structured reply could not be interpreted against the requested
    /// response schema.
    #[error("malformed reply: {0}")]
    MalformedReply(String),
}

impl Error {
    /// Whether this error must unwind the entire run instead of being
    /// recorded as a per-item failure.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::QuotaExhausted(_))
    }
}

/// Result type for dossier operations.
pub type Result<T> = std::result::Result<T, Error>;
