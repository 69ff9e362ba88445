// redactgate-http/src/errors.rs
//! Error taxonomy for the HTTP middleware layer.
//!
//! Every rejection maps to an explicit variant with an HTTP status, and the
//! client-facing body never carries internal detail (pattern names, store
//! addresses, detector internals stay in the logs).

use serde_json::json;
use thiserror::Error;

use redactgate_core::{ContextSensitivity, RedactError};

/// Errors produced by guards, streaming redaction, and the idempotency
/// layer.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SecurityError {
    /// Request content type is not on the allow-list.
    #[error("Unsupported content type: {0}")]
    ContentTypeRejected(String),

    /// Declared or observed payload size exceeds the configured ceiling.
    #[error("Payload too large: {size} bytes exceeds limit of {limit}")]
    PayloadTooLarge { size: usize, limit: usize },

    /// Compressed request used a disallowed or malformed encoding.
    #[error("Rejected compressed payload: {0}")]
    CompressionRejected(String),

    /// The redaction detector failed; propagated only when the tier policy
    /// is fail-closed.
    #[error("Redaction failed at tier {tier}: {source}")]
    DetectorFailure {
        tier: ContextSensitivity,
        #[source]
        source: RedactError,
    },

    /// Multipart body could not be parsed.
    #[error("Malformed multipart body: {0}")]
    MalformedMultipart(String),

    /// Another request with the same idempotency key is still in flight.
    #[error("Request with this idempotency key is already being processed")]
    IdempotencyConflict,

    /// The idempotency store could not be reached.
    #[error("Idempotency store unavailable: {0}")]
    StoreUnavailable(String),

    /// The body stream ended before `more_body: false` was seen.
    #[error("Body stream closed unexpectedly")]
    StreamClosed,

    /// The downstream handler failed.
    #[error("Handler error: {0}")]
    Handler(#[from] anyhow::Error),
}

impl SecurityError {
    /// The HTTP status this error maps to.
    pub fn status(&self) -> u16 {
        match self {
            SecurityError::ContentTypeRejected(_) => 415,
            SecurityError::PayloadTooLarge { .. } => 413,
            SecurityError::CompressionRejected(_) => 415,
            SecurityError::DetectorFailure { .. } => 422,
            SecurityError::MalformedMultipart(_) => 400,
            SecurityError::IdempotencyConflict => 409,
            SecurityError::StoreUnavailable(_) => 503,
            SecurityError::StreamClosed => 400,
            SecurityError::Handler(_) => 500,
        }
    }

    /// A JSON body safe to return to the client. Internal detail (store
    /// addresses, detector errors) is deliberately omitted.
    pub fn error_body(&self) -> Vec<u8> {
        let (code, message) = match self {
            SecurityError::ContentTypeRejected(ct) => (
                "unsupported_content_type",
                format!("Content type '{}' is not allowed", ct),
            ),
            SecurityError::PayloadTooLarge { limit, .. } => (
                "payload_too_large",
                format!("Payload exceeds the {} byte limit", limit),
            ),
            SecurityError::CompressionRejected(_) => (
                "compression_rejected",
                "Compressed payload was rejected".to_string(),
            ),
            SecurityError::DetectorFailure { .. } => (
                "redaction_failed",
                "The request could not be processed safely".to_string(),
            ),
            SecurityError::MalformedMultipart(_) => (
                "malformed_multipart",
                "Multipart body could not be parsed".to_string(),
            ),
            SecurityError::IdempotencyConflict => (
                "idempotency_conflict",
                "A request with this idempotency key is already in progress".to_string(),
            ),
            SecurityError::StoreUnavailable(_) => (
                "store_unavailable",
                "A backing service is temporarily unavailable".to_string(),
            ),
            SecurityError::StreamClosed => (
                "stream_closed",
                "Request body ended unexpectedly".to_string(),
            ),
            SecurityError::Handler(_) => (
                "internal_error",
                "Internal server error".to_string(),
            ),
        };
        json!({ "error": { "code": code, "message": message } })
            .to_string()
            .into_bytes()
    }
}
