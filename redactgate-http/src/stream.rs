// redactgate-http/src/stream.rs
//! Chunk-boundary-safe streaming redaction.
//!
//! Applies a whole-text transform to a body delivered as `(bytes,
//! more_body)` chunks without buffering the body: a tail window of
//! `overlap` characters is carried between chunks so a secret straddling a
//! chunk boundary is still seen by the detector in one piece. Memory is
//! O(overlap), never O(body size).
//!
//! Two buffers cross chunk boundaries:
//! - `tail`: the trailing `overlap` characters of the previous *redacted*
//!   text, withheld from emission because they might still combine with
//!   the next chunk to form a secret. Carrying the redacted form (rather
//!   than the raw input) keeps output lossless when a replacement changed
//!   the chunk's length; re-scanning it is safe because the transform is
//!   idempotent on its own placeholders;
//! - `partial`: up to 3 trailing bytes of an incomplete UTF-8 sequence, so
//!   a multi-byte character split across chunks is never corrupted.

use std::sync::Arc;

use log::debug;

use redactgate_core::{normalize_for_detection, ContextSensitivity, RedactError};

use crate::errors::SecurityError;

/// Default tail window, sized to exceed the longest default secret
/// pattern.
pub const DEFAULT_OVERLAP: usize = 64;

/// The pluggable whole-text transform. Must be deterministic for a given
/// `(text, tier)` pair.
pub type DetectorFn =
    Arc<dyn Fn(&str, ContextSensitivity) -> Result<String, RedactError> + Send + Sync>;

/// Per-direction streaming state. Exclusively owned by one request task;
/// no interior locking is needed.
#[derive(Debug, Default)]
struct StreamState {
    tail: String,
    partial: Vec<u8>,
    bytes_seen: usize,
    chunks_redacted: usize,
}

/// Applies a [`DetectorFn`] to a chunked body with a bounded carry window.
pub struct StreamingRedactor {
    detector: DetectorFn,
    tier: ContextSensitivity,
    overlap: usize,
    byte_limit: Option<usize>,
    state: StreamState,
}

impl std::fmt::Debug for StreamingRedactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingRedactor")
            .field("tier", &self.tier)
            .field("overlap", &self.overlap)
            .field("byte_limit", &self.byte_limit)
            .finish()
    }
}

impl StreamingRedactor {
    pub fn new(detector: DetectorFn, tier: ContextSensitivity, overlap: usize) -> Self {
        Self {
            detector,
            tier,
            overlap,
            byte_limit: None,
            state: StreamState::default(),
        }
    }

    /// Enforces a running ceiling on total input bytes (request side).
    pub fn with_byte_limit(mut self, limit: usize) -> Self {
        self.byte_limit = Some(limit);
        self
    }

    /// How many chunks produced output different from their input.
    pub fn chunks_redacted(&self) -> usize {
        self.state.chunks_redacted
    }

    /// Processes one chunk and returns the text safe to emit for it.
    ///
    /// Non-final chunks may return an empty string while text accumulates
    /// in the tail window; the final chunk (`more_body == false`) always
    /// flushes everything held back.
    pub fn push_chunk(&mut self, bytes: &[u8], more_body: bool) -> Result<String, SecurityError> {
        self.state.bytes_seen += bytes.len();
        if let Some(limit) = self.byte_limit {
            if self.state.bytes_seen > limit {
                return Err(SecurityError::PayloadTooLarge {
                    size: self.state.bytes_seen,
                    limit,
                });
            }
        }

        // Prepend any partial UTF-8 sequence carried from the previous
        // chunk, then split off a new incomplete suffix. On the final
        // chunk nothing may be held back, so trailing garbage decodes
        // lossily instead.
        let mut buf = std::mem::take(&mut self.state.partial);
        buf.extend_from_slice(bytes);
        let chunk_text = if more_body {
            let (complete, partial) = split_complete_utf8(buf);
            self.state.partial = partial;
            String::from_utf8_lossy(&complete).into_owned()
        } else {
            String::from_utf8_lossy(&buf).into_owned()
        };

        let text = format!("{}{}", self.state.tail, chunk_text);
        let redacted = (self.detector)(&text, self.tier)
            .map_err(|source| SecurityError::DetectorFailure { tier: self.tier, source })?;
        // Unicode normalization alone is not a redaction: a chunk counts
        // only when the output differs from both the raw input and its
        // normalized form.
        if redacted != text && redacted != normalize_for_detection(&text) {
            self.state.chunks_redacted += 1;
        }

        if !more_body {
            // Final chunk: flush everything, including the held-back tail.
            self.state.tail.clear();
            return Ok(redacted);
        }

        let redacted_chars = redacted.chars().count();
        if redacted_chars <= self.overlap {
            // Not enough accumulated text to be safe to emit anything yet.
            self.state.tail = redacted;
            return Ok(String::new());
        }

        // Withhold the last `overlap` characters of the redacted text and
        // carry them into the next chunk's scan window.
        let emit = head_chars(&redacted, redacted_chars - self.overlap).to_string();
        self.state.tail = tail_chars(&redacted, self.overlap).to_string();
        debug!(
            "stream chunk: emitting {} chars, holding {}",
            emit.chars().count(),
            self.overlap
        );
        Ok(emit)
    }
}

/// Prefix of `s` containing at most `n` characters.
fn head_chars(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Suffix of `s` containing at most `n` characters.
fn tail_chars(s: &str, n: usize) -> &str {
    let total = s.chars().count();
    let skip = total.saturating_sub(n);
    match s.char_indices().nth(skip) {
        Some((idx, _)) => &s[idx..],
        None => "",
    }
}

/// Splits `buf` into a complete-UTF-8 prefix and an incomplete trailing
/// sequence (at most 3 bytes).
fn split_complete_utf8(buf: Vec<u8>) -> (Vec<u8>, Vec<u8>) {
    let mut split = buf.len();
    // Walk back over at most 3 continuation bytes to the last leading byte.
    for back in 1..=3.min(buf.len()) {
        let idx = buf.len() - back;
        let byte = buf[idx];
        if byte & 0b1100_0000 == 0b1000_0000 {
            continue;
        }
        let needed = if byte & 0b1000_0000 == 0 {
            1
        } else if byte & 0b1110_0000 == 0b1100_0000 {
            2
        } else if byte & 0b1111_0000 == 0b1110_0000 {
            3
        } else if byte & 0b1111_1000 == 0b1111_0000 {
            4
        } else {
            // Invalid leading byte; let lossy decoding deal with it.
            break;
        };
        if buf.len() - idx < needed {
            split = idx;
        }
        break;
    }
    let mut complete = buf;
    let partial = complete.split_off(split);
    (complete, partial)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask_detector(needle: &'static str, mask: &'static str) -> DetectorFn {
        Arc::new(move |text, _tier| Ok(text.replace(needle, mask)))
    }

    fn run_chunks(
        redactor: &mut StreamingRedactor,
        chunks: &[&[u8]],
    ) -> Result<String, SecurityError> {
        let mut out = String::new();
        for (i, chunk) in chunks.iter().enumerate() {
            let more = i + 1 < chunks.len();
            out.push_str(&redactor.push_chunk(chunk, more)?);
        }
        Ok(out)
    }

    #[test]
    fn test_secret_across_chunk_boundary() {
        let mut redactor = StreamingRedactor::new(
            mask_detector("SECRET_TOKEN", "<MASK>"),
            ContextSensitivity::Internal,
            6,
        );
        let out = run_chunks(&mut redactor, &[b"hello SECR", b"ET_TOKEN world"]).unwrap();
        assert!(out.contains("<MASK>"), "output was {:?}", out);
        assert!(!out.contains("SECRET_TOKEN"));
        assert_eq!(out, "hello <MASK> world");
    }

    #[test]
    fn test_chunk_boundary_equivalence_for_all_splits() {
        let text = "prefix SECRET_TOKEN suffix";
        let single = text.replace("SECRET_TOKEN", "<MASK>");
        for split in 0..=text.len() {
            let mut redactor = StreamingRedactor::new(
                mask_detector("SECRET_TOKEN", "<MASK>"),
                ContextSensitivity::Internal,
                "SECRET_TOKEN".len(),
            );
            let out = run_chunks(
                &mut redactor,
                &[&text.as_bytes()[..split], &text.as_bytes()[split..]],
            )
            .unwrap();
            assert_eq!(out, single, "split at byte {}", split);
        }
    }

    #[test]
    fn test_single_final_chunk_passthrough() {
        let mut redactor = StreamingRedactor::new(
            mask_detector("SECRET_TOKEN", "<MASK>"),
            ContextSensitivity::Internal,
            64,
        );
        let out = redactor.push_chunk(b"nothing sensitive here", false).unwrap();
        assert_eq!(out, "nothing sensitive here");
    }

    #[test]
    fn test_short_chunks_accumulate_in_tail() {
        let mut redactor = StreamingRedactor::new(
            mask_detector("SECRET_TOKEN", "<MASK>"),
            ContextSensitivity::Internal,
            64,
        );
        // Shorter than the overlap: nothing may be emitted yet.
        let early = redactor.push_chunk(b"tiny", true).unwrap();
        assert_eq!(early, "");
        let rest = redactor.push_chunk(b" chunk", false).unwrap();
        assert_eq!(rest, "tiny chunk");
    }

    #[test]
    fn test_multibyte_char_split_across_chunks() {
        let mut redactor = StreamingRedactor::new(
            Arc::new(|text, _| Ok(text.to_string())),
            ContextSensitivity::Internal,
            4,
        );
        let text = "caf\u{e9} ol\u{e9}!";
        let bytes = text.as_bytes();
        // Split in the middle of the two-byte 'é'.
        let split = 4;
        assert!(std::str::from_utf8(&bytes[..split]).is_err());
        let mut out = String::new();
        out.push_str(&redactor.push_chunk(&bytes[..split], true).unwrap());
        out.push_str(&redactor.push_chunk(&bytes[split..], false).unwrap());
        assert_eq!(out, text);
    }

    #[test]
    fn test_byte_limit_enforced_mid_stream() {
        let mut redactor = StreamingRedactor::new(
            Arc::new(|text, _| Ok(text.to_string())),
            ContextSensitivity::Internal,
            8,
        )
        .with_byte_limit(16);
        redactor.push_chunk(&[b'a'; 10], true).unwrap();
        let err = redactor.push_chunk(&[b'b'; 10], true).unwrap_err();
        assert!(matches!(err, SecurityError::PayloadTooLarge { .. }));
    }

    #[test]
    fn test_detector_error_propagates() {
        let mut redactor = StreamingRedactor::new(
            Arc::new(|_, _| Err(redactgate_core::RedactError::DetectorFailure("down".into()))),
            ContextSensitivity::Restricted,
            8,
        );
        let err = redactor.push_chunk(b"anything", false).unwrap_err();
        assert!(matches!(err, SecurityError::DetectorFailure { .. }));
    }

    #[test]
    fn test_chunks_redacted_counter() {
        let mut redactor = StreamingRedactor::new(
            mask_detector("SECRET_TOKEN", "<MASK>"),
            ContextSensitivity::Internal,
            6,
        );
        run_chunks(&mut redactor, &[b"plain text then ", b"SECRET_TOKEN end"]).unwrap();
        assert_eq!(redactor.chunks_redacted(), 1);
    }

    #[test]
    fn test_normalization_alone_not_counted_as_redaction() {
        let mut redactor = StreamingRedactor::new(
            Arc::new(|text, _| Ok(normalize_for_detection(text))),
            ContextSensitivity::Internal,
            4,
        );
        // Fullwidth letters normalize to ASCII but nothing is redacted.
        let out = redactor
            .push_chunk("\u{FF21}\u{FF30}\u{FF29} docs".as_bytes(), false)
            .unwrap();
        assert_eq!(out, "API docs");
        assert_eq!(redactor.chunks_redacted(), 0);
    }

    #[test]
    fn test_split_complete_utf8() {
        let full = "héllo".as_bytes().to_vec();
        let (complete, partial) = split_complete_utf8(full.clone());
        assert_eq!(complete, full);
        assert!(partial.is_empty());

        // "h" followed by the first byte of a two-byte sequence.
        let mut truncated = b"h".to_vec();
        truncated.push("é".as_bytes()[0]);
        let (complete, partial) = split_complete_utf8(truncated);
        assert_eq!(complete, b"h");
        assert_eq!(partial.len(), 1);

        // A four-byte emoji missing its last byte.
        let mut emoji = "ab\u{1F600}".as_bytes().to_vec();
        emoji.pop();
        let (complete, partial) = split_complete_utf8(emoji);
        assert_eq!(complete, b"ab");
        assert_eq!(partial.len(), 3);
    }
}
