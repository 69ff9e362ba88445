// redactgate-http/src/guards.rs
//! Request guards applied before any body byte is read.
//!
//! `ContentTypeGuard` and `CompressionGuard` are pure header inspection;
//! they short-circuit with a client error before the pipeline spends
//! resources on the body. Decompression, when an encoding is allow-listed,
//! is bounded so a compression bomb cannot exhaust memory.

use std::io::Read;

use flate2::read::{GzDecoder, ZlibDecoder};
use log::warn;

use crate::errors::SecurityError;
use crate::transport::Headers;

/// Content-type prefixes accepted by default.
pub const DEFAULT_ALLOWED_TYPES: &[&str] =
    &["text/", "application/json", "application/x-www-form-urlencoded"];

/// Encodings treated as compressed and therefore rejected unless
/// allow-listed.
const COMPRESSED_ENCODINGS: &[&str] = &["gzip", "deflate", "br", "compress"];

/// Rejects bodies whose declared content type or length could bypass or
/// exhaust the redaction pipeline.
#[derive(Debug, Clone)]
pub struct ContentTypeGuard {
    allowed_prefixes: Vec<String>,
    max_body_bytes: usize,
    reject_disallowed: bool,
}

impl ContentTypeGuard {
    pub fn new(allowed_prefixes: Vec<String>, max_body_bytes: usize, reject_disallowed: bool) -> Self {
        Self { allowed_prefixes, max_body_bytes, reject_disallowed }
    }

    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes
    }

    /// Header-only check; consumes no body.
    pub fn check(&self, headers: &Headers) -> Result<(), SecurityError> {
        if let Some(declared) = headers.content_length() {
            if declared > self.max_body_bytes {
                return Err(SecurityError::PayloadTooLarge {
                    size: declared,
                    limit: self.max_body_bytes,
                });
            }
        }

        if self.reject_disallowed {
            // Requests without a body have no content type to police.
            let Some(content_type) = headers.get("content-type") else {
                return Ok(());
            };
            let essence = content_type
                .split(';')
                .next()
                .unwrap_or(content_type)
                .trim()
                .to_ascii_lowercase();
            if !self.allowed_prefixes.iter().any(|p| essence.starts_with(p.as_str())) {
                return Err(SecurityError::ContentTypeRejected(essence));
            }
        }
        Ok(())
    }
}

impl Default for ContentTypeGuard {
    fn default() -> Self {
        Self::new(
            DEFAULT_ALLOWED_TYPES.iter().map(|s| s.to_string()).collect(),
            10 * 1024 * 1024,
            true,
        )
    }
}

/// Rejects compressed request bodies unless the encoding is allow-listed,
/// and bounds decompression of the ones that are.
#[derive(Debug, Clone)]
pub struct CompressionGuard {
    allowed_encodings: Vec<String>,
    max_decompressed_size: usize,
}

impl CompressionGuard {
    pub fn new(allowed_encodings: Vec<String>, max_decompressed_size: usize) -> Self {
        Self {
            allowed_encodings: allowed_encodings
                .into_iter()
                .map(|e| e.to_ascii_lowercase())
                .collect(),
            max_decompressed_size,
        }
    }

    /// Strict mode: no compressed encoding accepted at all.
    pub fn strict(max_decompressed_size: usize) -> Self {
        Self::new(Vec::new(), max_decompressed_size)
    }

    /// Checks the declared request encoding. `identity` and absence always
    /// pass.
    pub fn check(&self, headers: &Headers) -> Result<(), SecurityError> {
        let Some(encoding) = headers.get("content-encoding") else {
            return Ok(());
        };
        for token in encoding.split(',') {
            let token = token.trim().to_ascii_lowercase();
            if token.is_empty() || token == "identity" {
                continue;
            }
            if COMPRESSED_ENCODINGS.contains(&token.as_str())
                && !self.allowed_encodings.iter().any(|e| *e == token)
            {
                return Err(SecurityError::CompressionRejected(token));
            }
            if !COMPRESSED_ENCODINGS.contains(&token.as_str()) {
                warn!("Unknown content-encoding token '{}', rejecting", token);
                return Err(SecurityError::CompressionRejected(token));
            }
        }
        Ok(())
    }

    /// Decompresses an allow-listed body with a hard output ceiling.
    ///
    /// Reads at most `max_decompressed_size + 1` bytes from the decoder so
    /// a compression bomb fails fast instead of expanding in memory.
    pub fn decompress(&self, encoding: &str, body: &[u8]) -> Result<Vec<u8>, SecurityError> {
        let encoding = encoding.trim().to_ascii_lowercase();
        if !self.allowed_encodings.iter().any(|e| *e == encoding) {
            return Err(SecurityError::CompressionRejected(encoding));
        }

        let mut out = Vec::new();
        let limit = self.max_decompressed_size as u64 + 1;
        let read = match encoding.as_str() {
            "gzip" => GzDecoder::new(body).take(limit).read_to_end(&mut out),
            "deflate" => ZlibDecoder::new(body).take(limit).read_to_end(&mut out),
            other => return Err(SecurityError::CompressionRejected(other.to_string())),
        };
        read.map_err(|e| SecurityError::CompressionRejected(format!("decode failed: {}", e)))?;

        if out.len() > self.max_decompressed_size {
            return Err(SecurityError::PayloadTooLarge {
                size: out.len(),
                limit: self.max_decompressed_size,
            });
        }
        Ok(out)
    }
}

impl Default for CompressionGuard {
    fn default() -> Self {
        Self::strict(10 * 1024 * 1024)
    }
}

/// Redaction changes body length; the declared length cannot be trusted
/// once a transform has run.
pub fn strip_content_length(headers: &mut Headers) {
    headers.remove("content-length");
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    #[test]
    fn test_octet_stream_rejected() {
        let guard = ContentTypeGuard::default();
        let headers: Headers = [("Content-Type", "application/octet-stream")].into_iter().collect();
        let err = guard.check(&headers).unwrap_err();
        assert_eq!(err.status(), 415);
    }

    #[test]
    fn test_json_with_charset_allowed() {
        let guard = ContentTypeGuard::default();
        let headers: Headers =
            [("Content-Type", "application/json; charset=utf-8")].into_iter().collect();
        guard.check(&headers).unwrap();
    }

    #[test]
    fn test_missing_content_type_allowed() {
        let guard = ContentTypeGuard::default();
        guard.check(&Headers::new()).unwrap();
    }

    #[test]
    fn test_declared_length_over_limit_rejected() {
        let guard = ContentTypeGuard::default();
        let eleven_mb = 11 * 1024 * 1024;
        let headers: Headers = [
            ("Content-Type", "application/json".to_string()),
            ("Content-Length", eleven_mb.to_string()),
        ]
        .into_iter()
        .collect();
        let err = guard.check(&headers).unwrap_err();
        assert_eq!(err.status(), 413);
    }

    #[test]
    fn test_gzip_rejected_in_strict_mode() {
        let guard = CompressionGuard::default();
        let headers: Headers = [("Content-Encoding", "gzip")].into_iter().collect();
        let err = guard.check(&headers).unwrap_err();
        assert_eq!(err.status(), 415);
    }

    #[test]
    fn test_identity_encoding_passes() {
        let guard = CompressionGuard::default();
        let headers: Headers = [("Content-Encoding", "identity")].into_iter().collect();
        guard.check(&headers).unwrap();
    }

    #[test]
    fn test_allow_listed_gzip_passes_and_decompresses() {
        let guard = CompressionGuard::new(vec!["gzip".to_string()], 1024);
        let headers: Headers = [("Content-Encoding", "gzip")].into_iter().collect();
        guard.check(&headers).unwrap();

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"hello compressed world").unwrap();
        let compressed = encoder.finish().unwrap();
        let decompressed = guard.decompress("gzip", &compressed).unwrap();
        assert_eq!(decompressed, b"hello compressed world");
    }

    #[test]
    fn test_decompression_bomb_bounded() {
        let guard = CompressionGuard::new(vec!["gzip".to_string()], 64);
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&vec![b'a'; 10_000]).unwrap();
        let bomb = encoder.finish().unwrap();
        let err = guard.decompress("gzip", &bomb).unwrap_err();
        assert_eq!(err.status(), 413);
    }

    #[test]
    fn test_strip_content_length() {
        let mut headers: Headers = [("Content-Length", "42")].into_iter().collect();
        strip_content_length(&mut headers);
        assert!(!headers.contains("content-length"));
    }
}
