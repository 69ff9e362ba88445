// redactgate-http/src/lib.rs
//! # RedactGate HTTP Middleware
//!
//! `redactgate-http` wraps an HTTP application in a defense-in-depth
//! security layer built on the `redactgate-core` detection engine:
//!
//! * **Guards** (`guards`): content-type allow-listing, declared-size
//!   ceilings, and a compression guard with bounded decompression.
//! * **Streaming redaction** (`stream`): chunk-boundary-safe application
//!   of the detector to request and response bodies with O(overlap)
//!   memory.
//! * **Idempotency** (`idempotency`): at-most-once handler execution for
//!   mutating requests carrying an `Idempotency-Key`, with in-memory and
//!   Redis backends.
//! * **Multipart scrubbing** (`multipart`): text parts redacted, binary
//!   parts dropped by policy.
//! * **Log scrubbing** (`scrub`): a `log::Log` wrapper that redacts every
//!   line before it reaches the sink.
//! * **Composition** (`bundle`): `SecurityBundle` chains everything in a
//!   fixed order with tier-aware fail-open/fail-closed semantics.
//!
//! The transport model (`transport`) is deliberately framework-agnostic:
//! bodies are `(bytes, more_body)` chunk sequences, so an adapter for a
//! concrete server only maps between its native types and these.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use redactgate_core::{ContextualRedactor, RedactionAuditLogger, RedactionConfig};
//! use redactgate_http::bundle::{SecurityBundle, SecurityConfig};
//! use redactgate_http::idempotency::MemoryIdempotencyStore;
//! use redactgate_http::transport::{BodyStream, Handler, RequestHead, Response, StaticSubjectProvider};
//! use redactgate_http::errors::SecurityError;
//! use async_trait::async_trait;
//!
//! struct App;
//!
//! #[async_trait]
//! impl Handler for App {
//!     async fn handle(&self, _head: RequestHead, body: BodyStream) -> Result<Response, SecurityError> {
//!         let bytes = body.collect(1 << 20).await?;
//!         Ok(Response::new(200, BodyStream::from_bytes(bytes)))
//!     }
//! }
//!
//! # async fn build() -> anyhow::Result<()> {
//! let redactor = Arc::new(ContextualRedactor::new(RedactionConfig::load_default_rules()?)?);
//! let bundle = SecurityBundle::new(
//!     SecurityConfig::default(),
//!     redactor,
//!     MemoryIdempotencyStore::new(),
//!     Arc::new(StaticSubjectProvider::default()),
//!     Arc::new(App),
//!     Arc::new(RedactionAuditLogger::new()),
//! );
//! let response = bundle.handle(RequestHead::new("GET", "/health"), BodyStream::empty()).await;
//! assert_eq!(response.head.status, 200);
//! # Ok(())
//! # }
//! ```

pub mod bundle;
pub mod errors;
pub mod guards;
pub mod idempotency;
pub mod multipart;
pub mod scrub;
pub mod stream;
pub mod transport;

/// Re-exports the composed middleware and its configuration.
pub use bundle::{SecurityBundle, SecurityConfig};

/// Re-exports the error taxonomy.
pub use errors::SecurityError;

/// Re-exports the guards.
pub use guards::{CompressionGuard, ContentTypeGuard};

/// Re-exports the idempotency layer and its backends.
pub use idempotency::{
    IdempotencyLayer, IdempotencyStore, MemoryIdempotencyStore, RedisIdempotencyStore,
};

/// Re-exports the streaming redactor and the pluggable transform type.
pub use stream::{DetectorFn, StreamingRedactor, DEFAULT_OVERLAP};

/// Re-exports the log scrubber.
pub use scrub::ScrubbingLogger;

/// Re-exports the transport model.
pub use transport::{
    body_channel, BodyChunk, BodyStream, Handler, Headers, RequestHead, Response, ResponseHead,
    StoredResponse, SubjectContext, SubjectContextProvider,
};
