// redactgate-core/src/audit.rs
//! Audit trail for redaction activity.
//!
//! Every redaction attempt produces an immutable [`AuditEvent`]. Events are
//! appended to an in-memory buffer and written to a pluggable
//! [`AuditSink`]; a sink failure retains the event in the buffer instead of
//! dropping it, and another flush is attempted when the buffer reaches its
//! capacity threshold. Audit logging never returns an error into the
//! request path.
//!
//! The buffer is single-process. Durability across restarts or multiple
//! instances requires a durable sink (the JSONL file sink here, or an
//! external queue behind the `AuditSink` trait); this is an operational
//! constraint, not a correctness guarantee.

use std::collections::{HashMap, VecDeque};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::RedactError;
use crate::matches::RedactionResult;
use crate::tier::ContextSensitivity;

/// Default buffer size that triggers an opportunistic flush.
pub const DEFAULT_FLUSH_THRESHOLD: usize = 100;

/// How many recent events the logger retains for queries, independent of
/// sink flushes.
const HISTORY_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    Applied,
    Skipped,
    Failed,
    PolicyViolation,
    ConfigChanged,
}

/// One immutable audit record. Contains lengths, scores, and hashes, never
/// raw matched text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    pub user_id: Option<String>,
    pub context_id: Option<String>,
    pub request_id: Option<String>,
    pub tier: ContextSensitivity,
    pub patterns_matched: Vec<String>,
    pub entropy_score: Option<f64>,
    pub original_length: usize,
    pub redacted_length: usize,
    pub processing_time_ms: f64,
    pub confidence_scores: HashMap<String, f64>,
    pub metadata: HashMap<String, String>,
}

/// Filters for [`RedactionAuditLogger::get_audit_events`].
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub event_type: Option<AuditEventType>,
    pub tier: Option<ContextSensitivity>,
    pub user_id: Option<String>,
    pub request_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

/// Aggregate view over recent events, for monitoring/alerting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RedactionStatistics {
    pub window_start: DateTime<Utc>,
    pub total_events: usize,
    pub events_by_type: HashMap<String, usize>,
    pub total_patterns_matched: usize,
    pub average_processing_time_ms: f64,
}

/// Durable destination for audit events.
///
/// Implementations must be safe for concurrent use; a returned error means
/// the batch was not persisted and the caller keeps it buffered.
pub trait AuditSink: Send + Sync {
    fn write(&self, events: &[AuditEvent]) -> Result<(), RedactError>;
}

/// Sink that accumulates events in memory. Useful for tests and as a
/// default when no durable storage is configured.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl AuditSink for MemorySink {
    fn write(&self, events: &[AuditEvent]) -> Result<(), RedactError> {
        self.events.lock().unwrap().extend_from_slice(events);
        Ok(())
    }
}

/// Append-only JSONL file sink.
#[derive(Debug)]
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

impl AuditSink for JsonlSink {
    fn write(&self, events: &[AuditEvent]) -> Result<(), RedactError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| RedactError::AuditSinkError(e.to_string()))?;
        for event in events {
            let line = serde_json::to_string(event)
                .map_err(|e| RedactError::AuditSinkError(e.to_string()))?;
            writeln!(file, "{}", line).map_err(|e| RedactError::AuditSinkError(e.to_string()))?;
        }
        Ok(())
    }
}

struct LoggerState {
    buffer: Vec<AuditEvent>,
    history: VecDeque<AuditEvent>,
}

/// Buffered, queryable audit logger with a pluggable durable sink.
pub struct RedactionAuditLogger {
    sink: Option<Box<dyn AuditSink>>,
    state: Mutex<LoggerState>,
    flush_threshold: usize,
}

impl std::fmt::Debug for RedactionAuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedactionAuditLogger")
            .field("has_sink", &self.sink.is_some())
            .field("flush_threshold", &self.flush_threshold)
            .finish()
    }
}

impl RedactionAuditLogger {
    /// Buffer-only logger (no durable sink).
    pub fn new() -> Self {
        Self::with_sink_option(None, DEFAULT_FLUSH_THRESHOLD)
    }

    /// Logger writing through to `sink`, flushing immediately on each event
    /// and retaining failures in the buffer.
    pub fn with_sink(sink: Box<dyn AuditSink>) -> Self {
        Self::with_sink_option(Some(sink), DEFAULT_FLUSH_THRESHOLD)
    }

    fn with_sink_option(sink: Option<Box<dyn AuditSink>>, flush_threshold: usize) -> Self {
        Self {
            sink,
            state: Mutex::new(LoggerState {
                buffer: Vec::new(),
                history: VecDeque::new(),
            }),
            flush_threshold,
        }
    }

    /// Records a completed redaction call. Returns the event id.
    pub fn log_redaction_event(
        &self,
        result: &RedactionResult,
        user_id: Option<&str>,
        context_id: Option<&str>,
        request_id: Option<&str>,
    ) -> String {
        let patterns_matched: Vec<String> = result
            .redactions_applied
            .iter()
            .map(|r| r.secret_type.clone())
            .collect();
        let confidence_scores: HashMap<String, f64> = result
            .redactions_applied
            .iter()
            .map(|r| (r.secret_type.clone(), r.confidence))
            .collect();

        let event_type = if result.was_redacted() {
            AuditEventType::Applied
        } else {
            AuditEventType::Skipped
        };

        let mut metadata = HashMap::new();
        if result.evasion_detected {
            metadata.insert("evasion_detected".to_string(), "true".to_string());
        }

        self.record(AuditEvent {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type,
            user_id: user_id.map(str::to_string),
            context_id: context_id.map(str::to_string),
            request_id: request_id.map(str::to_string),
            tier: result.tier,
            patterns_matched,
            entropy_score: Some(result.entropy_score),
            original_length: result.original_text.len(),
            redacted_length: result.redacted_text.len(),
            processing_time_ms: result.processing_time_ms,
            confidence_scores,
            metadata,
        })
    }

    /// Records a policy violation (guard rejection, disallowed payload).
    pub fn log_policy_violation(
        &self,
        tier: ContextSensitivity,
        detail: &str,
        request_id: Option<&str>,
    ) -> String {
        let mut metadata = HashMap::new();
        metadata.insert("detail".to_string(), detail.to_string());
        self.record(AuditEvent {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: AuditEventType::PolicyViolation,
            user_id: None,
            context_id: None,
            request_id: request_id.map(str::to_string),
            tier,
            patterns_matched: Vec::new(),
            entropy_score: None,
            original_length: 0,
            redacted_length: 0,
            processing_time_ms: 0.0,
            confidence_scores: HashMap::new(),
            metadata,
        })
    }

    /// Records a detector failure (the fail-open/fail-closed wrapper calls
    /// this regardless of which way the failure propagated).
    pub fn log_redaction_failure(
        &self,
        tier: ContextSensitivity,
        error: &str,
        request_id: Option<&str>,
    ) -> String {
        let mut metadata = HashMap::new();
        metadata.insert("error".to_string(), error.to_string());
        self.record(AuditEvent {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: AuditEventType::Failed,
            user_id: None,
            context_id: None,
            request_id: request_id.map(str::to_string),
            tier,
            patterns_matched: Vec::new(),
            entropy_score: None,
            original_length: 0,
            redacted_length: 0,
            processing_time_ms: 0.0,
            confidence_scores: HashMap::new(),
            metadata,
        })
    }

    /// Records a summary event for a streaming transform (per request
    /// direction, no buffered `RedactionResult` exists on that path).
    pub fn log_stream_event(
        &self,
        tier: ContextSensitivity,
        chunks_redacted: usize,
        request_id: Option<&str>,
    ) -> String {
        let event_type = if chunks_redacted > 0 {
            AuditEventType::Applied
        } else {
            AuditEventType::Skipped
        };
        let mut metadata = HashMap::new();
        metadata.insert("chunks_redacted".to_string(), chunks_redacted.to_string());
        metadata.insert("mode".to_string(), "streaming".to_string());
        self.record(AuditEvent {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type,
            user_id: None,
            context_id: None,
            request_id: request_id.map(str::to_string),
            tier,
            patterns_matched: Vec::new(),
            entropy_score: None,
            original_length: 0,
            redacted_length: 0,
            processing_time_ms: 0.0,
            confidence_scores: HashMap::new(),
            metadata,
        })
    }

    /// Returns recent events matching `query`, newest last.
    pub fn get_audit_events(&self, query: &AuditQuery) -> Vec<AuditEvent> {
        let state = self.state.lock().unwrap();
        let mut out: Vec<AuditEvent> = state
            .history
            .iter()
            .filter(|e| {
                query.event_type.map_or(true, |t| e.event_type == t)
                    && query.tier.map_or(true, |t| e.tier == t)
                    && query
                        .user_id
                        .as_deref()
                        .map_or(true, |u| e.user_id.as_deref() == Some(u))
                    && query
                        .request_id
                        .as_deref()
                        .map_or(true, |r| e.request_id.as_deref() == Some(r))
                    && query.since.map_or(true, |s| e.timestamp >= s)
            })
            .cloned()
            .collect();
        if let Some(limit) = query.limit {
            let excess = out.len().saturating_sub(limit);
            out.drain(..excess);
        }
        out
    }

    /// Aggregates recent events within `window` back from now.
    pub fn get_redaction_statistics(&self, window: Duration) -> RedactionStatistics {
        let window_start = Utc::now() - window;
        let events = self.get_audit_events(&AuditQuery {
            since: Some(window_start),
            ..Default::default()
        });

        let mut events_by_type: HashMap<String, usize> = HashMap::new();
        let mut total_patterns_matched = 0usize;
        let mut total_time = 0.0f64;
        for e in &events {
            let key = match e.event_type {
                AuditEventType::Applied => "applied",
                AuditEventType::Skipped => "skipped",
                AuditEventType::Failed => "failed",
                AuditEventType::PolicyViolation => "policy_violation",
                AuditEventType::ConfigChanged => "config_changed",
            };
            *events_by_type.entry(key.to_string()).or_insert(0) += 1;
            total_patterns_matched += e.patterns_matched.len();
            total_time += e.processing_time_ms;
        }

        let average_processing_time_ms = if events.is_empty() {
            0.0
        } else {
            total_time / events.len() as f64
        };

        RedactionStatistics {
            window_start,
            total_events: events.len(),
            events_by_type,
            total_patterns_matched,
            average_processing_time_ms,
        }
    }

    /// Number of events currently awaiting a durable write.
    pub fn pending(&self) -> usize {
        self.state.lock().unwrap().buffer.len()
    }

    /// Forces a flush attempt of the buffered events. Best-effort.
    pub fn flush(&self) {
        let mut state = self.state.lock().unwrap();
        self.flush_locked(&mut state);
    }

    fn record(&self, event: AuditEvent) -> String {
        let id = event.id.clone();
        let mut state = self.state.lock().unwrap();

        state.history.push_back(event.clone());
        while state.history.len() > HISTORY_CAPACITY {
            state.history.pop_front();
        }

        state.buffer.push(event);
        // Write through immediately when a durable sink is configured;
        // otherwise (or on sink failure) events sit buffered until the
        // threshold forces another attempt.
        if self.sink.is_some() || state.buffer.len() >= self.flush_threshold {
            self.flush_locked(&mut state);
        }
        id
    }

    fn flush_locked(&self, state: &mut LoggerState) {
        let Some(sink) = &self.sink else {
            // No sink: cap the buffer so an unconfigured logger cannot grow
            // without bound.
            let excess = state.buffer.len().saturating_sub(self.flush_threshold);
            if excess > 0 {
                state.buffer.drain(..excess);
            }
            return;
        };
        if state.buffer.is_empty() {
            return;
        }
        match sink.write(&state.buffer) {
            Ok(()) => state.buffer.clear(),
            Err(e) => {
                warn!("Audit sink write failed, retaining {} events: {}", state.buffer.len(), e);
            }
        }
    }
}

impl Default for RedactionAuditLogger {
    fn default() -> Self {
        Self::new()
    }
}
