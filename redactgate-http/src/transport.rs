// redactgate-http/src/transport.rs
//! Framework-agnostic HTTP transport types.
//!
//! The middleware operates on a small request/response model instead of a
//! specific web framework: heads carry method, path, and headers; bodies
//! arrive as a stream of chunks with a `more_body` continuation flag. An
//! adapter for a concrete framework only has to map to and from these
//! types.

use std::collections::VecDeque;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use redactgate_core::ContextSensitivity;

use crate::errors::SecurityError;

/// One piece of a request or response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyChunk {
    pub bytes: Vec<u8>,
    /// True while more chunks follow; the final chunk carries `false`.
    pub more_body: bool,
}

impl BodyChunk {
    pub fn new(bytes: impl Into<Vec<u8>>, more_body: bool) -> Self {
        Self { bytes: bytes.into(), more_body }
    }

    /// A terminal chunk with no payload.
    pub fn end() -> Self {
        Self { bytes: Vec::new(), more_body: false }
    }
}

/// Case-insensitive header map. Header names are stored lowercase;
/// lookups fold the query to lowercase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.entries
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Replaces any existing values for `name`.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let name = name.to_ascii_lowercase();
        self.entries.retain(|(k, _)| *k != name);
        self.entries.push((name, value.into()));
    }

    /// Appends without replacing (for multi-value headers).
    pub fn append(&mut self, name: &str, value: impl Into<String>) {
        self.entries.push((name.to_ascii_lowercase(), value.into()));
    }

    pub fn remove(&mut self, name: &str) {
        let name = name.to_ascii_lowercase();
        self.entries.retain(|(k, _)| *k != name);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Parsed `Content-Length`, if present and well-formed.
    pub fn content_length(&self) -> Option<usize> {
        self.get("content-length").and_then(|v| v.trim().parse().ok())
    }
}

impl<S: Into<String>, T: Into<String>> FromIterator<(S, T)> for Headers {
    fn from_iter<I: IntoIterator<Item = (S, T)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (k, v) in iter {
            headers.append(&k.into(), v.into());
        }
        headers
    }
}

/// The non-body part of an incoming request.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: String,
    pub path: String,
    pub headers: Headers,
}

impl RequestHead {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into().to_ascii_uppercase(),
            path: path.into(),
            headers: Headers::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }
}

/// The non-body part of an outgoing response.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: u16,
    pub headers: Headers,
}

impl ResponseHead {
    pub fn new(status: u16) -> Self {
        Self { status, headers: Headers::new() }
    }
}

/// A body as the middleware consumes it: either fully buffered chunks or a
/// live channel fed by the server runtime.
#[derive(Debug)]
pub enum BodyStream {
    Buffered(VecDeque<BodyChunk>),
    Channel(mpsc::Receiver<BodyChunk>),
}

impl BodyStream {
    /// An empty, already-terminated body.
    pub fn empty() -> Self {
        BodyStream::Buffered(VecDeque::from([BodyChunk::end()]))
    }

    /// A single-chunk buffered body.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        BodyStream::Buffered(VecDeque::from([BodyChunk::new(bytes, false)]))
    }

    /// A buffered body from explicit chunks.
    pub fn from_chunks(chunks: Vec<BodyChunk>) -> Self {
        BodyStream::Buffered(chunks.into())
    }

    /// Next chunk, or an error if the stream ended without a terminal
    /// chunk.
    pub async fn next_chunk(&mut self) -> Result<BodyChunk, SecurityError> {
        match self {
            BodyStream::Buffered(chunks) => chunks.pop_front().ok_or(SecurityError::StreamClosed),
            BodyStream::Channel(rx) => rx.recv().await.ok_or(SecurityError::StreamClosed),
        }
    }

    /// Drains the whole stream into one buffer, enforcing `limit` bytes.
    pub async fn collect(mut self, limit: usize) -> Result<Vec<u8>, SecurityError> {
        let mut out = Vec::new();
        loop {
            let chunk = self.next_chunk().await?;
            if out.len() + chunk.bytes.len() > limit {
                return Err(SecurityError::PayloadTooLarge {
                    size: out.len() + chunk.bytes.len(),
                    limit,
                });
            }
            out.extend_from_slice(&chunk.bytes);
            if !chunk.more_body {
                return Ok(out);
            }
        }
    }
}

/// Creates a channel-backed body stream and its sender half.
pub fn body_channel(capacity: usize) -> (mpsc::Sender<BodyChunk>, BodyStream) {
    let (tx, rx) = mpsc::channel(capacity);
    (tx, BodyStream::Channel(rx))
}

/// A fully materialized response, as stored for idempotent replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Vec<u8>,
}

/// A complete in-flight response: head plus body stream.
#[derive(Debug)]
pub struct Response {
    pub head: ResponseHead,
    pub body: BodyStream,
}

impl Response {
    pub fn new(status: u16, body: BodyStream) -> Self {
        Self { head: ResponseHead::new(status), body }
    }

    pub fn from_stored(stored: StoredResponse) -> Self {
        Self {
            head: ResponseHead { status: stored.status, headers: stored.headers },
            body: BodyStream::from_bytes(stored.body),
        }
    }
}

/// The application behind the middleware.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, head: RequestHead, body: BodyStream) -> Result<Response, SecurityError>;
}

/// Who is making the request, resolved by the embedding application.
#[derive(Debug, Clone, Default)]
pub struct SubjectContext {
    pub user_id: Option<String>,
    pub context_id: Option<String>,
    /// Tier override from the subject; when absent, route configuration
    /// decides.
    pub tier: Option<ContextSensitivity>,
}

/// Resolves the subject for a request, typically from auth state.
#[async_trait]
pub trait SubjectContextProvider: Send + Sync {
    async fn resolve(&self, head: &RequestHead) -> SubjectContext;
}

/// Provider that returns a fixed subject. Default resolves to an anonymous
/// subject with no tier override.
#[derive(Debug, Clone, Default)]
pub struct StaticSubjectProvider {
    pub subject: SubjectContext,
}

#[async_trait]
impl SubjectContextProvider for StaticSubjectProvider {
    async fn resolve(&self, _head: &RequestHead) -> SubjectContext {
        self.subject.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_case_insensitive() {
        let mut headers = Headers::new();
        headers.set("Content-Type", "application/json");
        assert_eq!(headers.get("content-type"), Some("application/json"));
        assert_eq!(headers.get("CONTENT-TYPE"), Some("application/json"));
        headers.remove("Content-type");
        assert!(!headers.contains("content-type"));
    }

    #[test]
    fn test_content_length_parsing() {
        let headers: Headers = [("Content-Length", "128")].into_iter().collect();
        assert_eq!(headers.content_length(), Some(128));
        let bad: Headers = [("Content-Length", "not-a-number")].into_iter().collect();
        assert_eq!(bad.content_length(), None);
    }

    #[tokio::test]
    async fn test_buffered_stream_yields_chunks_in_order() {
        let mut stream = BodyStream::from_chunks(vec![
            BodyChunk::new(b"hello ".to_vec(), true),
            BodyChunk::new(b"world".to_vec(), false),
        ]);
        assert_eq!(stream.next_chunk().await.unwrap().bytes, b"hello ");
        let last = stream.next_chunk().await.unwrap();
        assert_eq!(last.bytes, b"world");
        assert!(!last.more_body);
    }

    #[tokio::test]
    async fn test_collect_enforces_limit() {
        let stream = BodyStream::from_chunks(vec![
            BodyChunk::new(vec![0u8; 64], true),
            BodyChunk::new(vec![0u8; 64], false),
        ]);
        let err = stream.collect(100).await.unwrap_err();
        assert!(matches!(err, SecurityError::PayloadTooLarge { .. }));
    }

    #[tokio::test]
    async fn test_channel_stream_end_without_terminal_chunk_errors() {
        let (tx, mut stream) = body_channel(4);
        tx.send(BodyChunk::new(b"partial".to_vec(), true)).await.unwrap();
        drop(tx);
        assert_eq!(stream.next_chunk().await.unwrap().bytes, b"partial");
        assert!(matches!(stream.next_chunk().await, Err(SecurityError::StreamClosed)));
    }
}
