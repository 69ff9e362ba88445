// redactgate-core/src/matches.rs
//! Provides core data structures and utility functions for managing secret
//! matches and sensitive data logging within the `redactgate-core` library.

use lazy_static::lazy_static;
use log::debug;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::tier::ContextSensitivity;

lazy_static! {
    /// A static boolean that is initialized once to determine if PII is allowed in debug logs.
    static ref PII_DEBUG_ALLOWED: bool = {
        std::env::var("REDACTGATE_ALLOW_DEBUG_PII")
            .map(|s| s.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    };
}

/// Represents a single detected secret within a text.
///
/// Byte offsets refer to the normalized text the detector ran over.
/// Ordering by `start` matters for replacement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SecretMatch {
    /// The kind of secret found (rule name for pattern matches,
    /// `high_entropy_secret` for entropy catches).
    pub secret_type: String,
    pub start: usize,
    pub end: usize,
    /// The raw matched text. Never logged without `redact_sensitive`.
    pub matched_text: String,
    /// Detection confidence in [0, 1].
    pub confidence: f64,
    /// Shannon entropy of the matched text.
    pub entropy_score: f64,
    /// Name of the pattern rule that fired, absent for entropy matches.
    pub pattern_name: Option<String>,
    /// The placeholder spliced in place of the match.
    pub replacement_text: String,
}

/// A `SecretMatch`-derived record safe to persist: it carries positions and
/// scores but not the raw secret.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedRedaction {
    pub secret_type: String,
    pub pattern_name: Option<String>,
    pub start: usize,
    pub end: usize,
    pub confidence: f64,
    pub entropy_score: f64,
    pub replacement_text: String,
    /// Canonical hash of the original match, for dedupe and audit joins.
    pub sample_hash: String,
}

impl AppliedRedaction {
    pub fn from_match(m: &SecretMatch) -> Self {
        Self {
            secret_type: m.secret_type.clone(),
            pattern_name: m.pattern_name.clone(),
            start: m.start,
            end: m.end,
            confidence: m.confidence,
            entropy_score: m.entropy_score,
            replacement_text: m.replacement_text.clone(),
            sample_hash: canonical_sample_hash(&m.secret_type, &m.matched_text),
        }
    }
}

/// The outcome of one buffered-text redaction call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedactionResult {
    pub original_text: String,
    pub redacted_text: String,
    pub redactions_applied: Vec<AppliedRedaction>,
    pub tier: ContextSensitivity,
    pub processing_time_ms: f64,
    pub total_secrets_found: usize,
    /// Shannon entropy of the whole (normalized) input.
    pub entropy_score: f64,
    /// True when the input showed Unicode evasion markers.
    pub evasion_detected: bool,
}

impl RedactionResult {
    /// Whether any redaction was applied.
    pub fn was_redacted(&self) -> bool {
        !self.redactions_applied.is_empty()
    }
}

pub fn redact_sensitive(s: &str) -> String {
    const MAX_LEN: usize = 8;
    if s.len() <= MAX_LEN {
        "[REDACTED]".to_string()
    } else {
        format!("[REDACTED: {} chars]", s.len())
    }
}

fn get_loggable_content(sensitive_content: &str) -> String {
    if *PII_DEBUG_ALLOWED {
        sensitive_content.to_string()
    } else {
        redact_sensitive(sensitive_content)
    }
}

pub fn log_secret_match_debug(module_path: &str, secret_type: &str, original: &str, replacement: &str) {
    debug!(
        "{} Found SecretMatch: Type='{}', Original='{}', Replacement='{}'",
        module_path,
        secret_type,
        get_loggable_content(original),
        replacement
    );
}

/// Canonical, whitespace- and case-insensitive hash of a matched snippet.
pub fn canonical_sample_hash(rule_id: &str, snippet: &str) -> String {
    let normalized = snippet
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    let mut hasher = Sha256::new();
    hasher.update(rule_id.as_bytes());
    hasher.update(b":");
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}
