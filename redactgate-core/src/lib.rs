// redactgate-core/src/lib.rs
//! # RedactGate Core Library
//!
//! `redactgate-core` provides the platform-independent detection and
//! redaction logic behind the RedactGate HTTP security middleware. It
//! defines the data structures for redaction rules, compiles those rules
//! into executable form, detects secrets by pattern and by entropy
//! analysis, applies tier-based redaction policy, and records every
//! redaction decision in an audit trail.
//!
//! The library is pure and stateless with respect to transport concerns:
//! it transforms text and reports what it did, and leaves streaming,
//! guards, and idempotency to `redactgate-http`.
//!
//! ## Modules
//!
//! * `config`: Defines `RedactionRule`s and `RedactionConfig` for specifying sensitive patterns.
//! * `compiler`: Compiles rule sets into cached, executable `CompiledRules`.
//! * `detector`: The `SecretDetector`, combining pattern matching with entropy analysis.
//! * `redactor`: The `ContextualRedactor`, applying tier policy and splicing replacements.
//! * `tier`: The `ContextSensitivity` ordering and the `TierPolicy` category table.
//! * `normalize`: Unicode normalization and evasion detection for adversarial input.
//! * `validators`: Programmatic validation for specific data types (Luhn, etc.).
//! * `matches`: Data structures for detailed reporting of detection and redaction events.
//! * `audit`: The buffered `RedactionAuditLogger` and its pluggable `AuditSink`s.
//! * `errors`: The `RedactError` taxonomy for fallible operations.
//!
//! ## Usage Example
//!
//! ```rust
//! use redactgate_core::{ContextSensitivity, ContextualRedactor, RedactionConfig};
//! use anyhow::Result;
//!
//! fn main() -> Result<()> {
//!     // 1. Load default redaction rules.
//!     let config = RedactionConfig::load_default_rules()?;
//!
//!     // 2. Build a redactor with the default tier policy.
//!     let redactor = ContextualRedactor::new(config)?;
//!
//!     // 3. Redact at the caller's sensitivity tier.
//!     let input = "my key is sk-1234567890abcdef1234567890abcdef12345678";
//!     let result = redactor.redact(input, ContextSensitivity::Confidential);
//!     assert!(result.was_redacted());
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! Fallible operations return `Result`; detector failures surface as
//! [`RedactError`] variants so callers can choose fail-open or fail-closed
//! handling by tier rather than by error identity.
//!
//! ## Design Principles
//!
//! * **Single detection path:** buffered and streaming callers run the
//!   same `SecretDetector`, so tier semantics cannot drift between modes.
//! * **Fail toward redaction:** ambiguity in policy or rule lookup
//!   resolves to redacting, never to passing raw text through.
//! * **No raw secrets at rest:** everything persisted (audit events,
//!   applied-redaction records) carries lengths, scores, and hashes only.

// All modules must be declared before they can be used.
pub mod audit;
pub mod compiler;
pub mod config;
pub mod detector;
pub mod errors;
pub mod matches;
pub mod normalize;
pub mod redactor;
pub mod tier;
pub mod validators;

/// Re-exports the public configuration types and functions for managing redaction rules.
pub use config::{
    merge_rules,
    DetectorConfig,
    RedactionConfig,
    RedactionRule,
    MAX_PATTERN_LENGTH,
};

/// Re-exports the custom error type for clear error reporting.
pub use errors::RedactError;

/// Re-exports the detection and redaction entry points.
pub use detector::SecretDetector;
pub use redactor::ContextualRedactor;

/// Re-exports tier policy types.
pub use tier::{ContextSensitivity, TierPolicy};

/// Re-exports types for detailed redaction matches and sensitive data reporting.
pub use matches::{redact_sensitive, AppliedRedaction, RedactionResult, SecretMatch};

/// Re-exports Unicode anti-evasion helpers.
pub use normalize::{detect_evasion_attempt, normalize_for_detection};

/// Re-exports the audit trail API.
pub use audit::{
    AuditEvent,
    AuditEventType,
    AuditQuery,
    AuditSink,
    JsonlSink,
    MemorySink,
    RedactionAuditLogger,
};
