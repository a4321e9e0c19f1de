//! Generative-call gateway boundary.
//!
//! The pipeline never talks to a language service directly; every call goes
//! through the [`Gateway`] trait. Implementations own transport, rate-limit
//! backoff, and transient retries. [`Error::QuotaExhausted`] must surface
//! immediately without retry so the orchestration layer can unwind the run.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A file reference forwarded to the generative service alongside a prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub uri: String,
    pub mime_type: String,
}

/// One request to the generative service.
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    /// Fully rendered prompt text.
    pub prompt: String,
    /// Attachments passed through to the service.
    pub attachments: Vec<Attachment>,
    /// JSON Schema the structured reply must satisfy.
    pub response_schema: serde_json::Value,
    /// Enable search tooling for this call.
    pub search: bool,
}

impl GatewayRequest {
    /// Create a request for a schema-constrained reply.
    pub fn new(prompt: impl Into<String>, response_schema: serde_json::Value) -> Self {
        Self {
            prompt: prompt.into(),
            attachments: Vec::new(),
            response_schema,
            search: false,
        }
    }

    /// Enable search tooling.
    pub fn with_search(mut self) -> Self {
        self.search = true;
        self
    }

    /// Attach files to the request.
    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }
}

/// A search result surfaced by the gateway's search tooling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchReference {
    pub url: String,
    #[serde(default)]
    pub title: String,
}

/// Parsed reply from the generative service.
#[derive(Debug, Clone, Default)]
pub struct GatewayReply {
    /// Structured value, expected to satisfy the request schema.
    pub value: serde_json::Value,
    /// Search-result metadata, populated when search tooling ran.
    pub references: Vec<SearchReference>,
    /// Raw reply text, kept for fallback reference extraction.
    pub text: String,
}

impl GatewayReply {
    /// Wrap a structured value with no search metadata.
    pub fn structured(value: serde_json::Value) -> Self {
        Self {
            value,
            references: Vec::new(),
            text: String::new(),
        }
    }
}

/// The external generative-language service invocation boundary.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Invoke the service with a prompt and a response shape.
    async fn invoke(&self, request: GatewayRequest) -> Result<GatewayReply>;
}

/// Deserialize a structured reply, or `None` when the value fails schema
/// validation or does not fit the target type.
pub fn try_parse_reply<T: DeserializeOwned>(
    reply: &GatewayReply,
    schema: &serde_json::Value,
) -> Option<T> {
    if let Ok(validator) = jsonschema::validator_for(schema) {
        if !validator.is_valid(&reply.value) {
            return None;
        }
    }
    serde_json::from_value(reply.value.clone()).ok()
}

/// Deserialize a structured reply, falling back to `default` on any schema or
/// shape mismatch. One malformed reply never aborts a batch.
pub fn parse_reply<T: DeserializeOwned>(
    reply: &GatewayReply,
    schema: &serde_json::Value,
    default: T,
) -> T {
    try_parse_reply(reply, schema).unwrap_or(default)
}

/// Truncate text to a character budget without splitting a code point.
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}
