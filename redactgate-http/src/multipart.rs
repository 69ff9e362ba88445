// redactgate-http/src/multipart.rs
//! Multipart form scrubbing.
//!
//! `multipart/form-data` bodies are the one place the middleware cannot
//! treat the payload as a single text stream: each part carries its own
//! headers and may be binary. Policy: text parts go through the detector
//! like any other body; binary parts are dropped from the reassembled
//! body rather than passed through unscanned.

use log::warn;

use redactgate_core::ContextSensitivity;

use crate::errors::SecurityError;
use crate::stream::DetectorFn;

/// What one scrub pass did.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct MultipartOutcome {
    pub parts_scrubbed: usize,
    pub parts_dropped: usize,
}

/// Extracts the boundary parameter from a `multipart/form-data` content
/// type.
pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let param = param.trim();
        let value = param.strip_prefix("boundary=")?;
        Some(value.trim_matches('"').to_string())
    })
}

/// Scrubs a buffered multipart body, returning the reassembled bytes and
/// what happened to each part.
pub fn scrub_multipart(
    body: &[u8],
    boundary: &str,
    detector: &DetectorFn,
    tier: ContextSensitivity,
) -> Result<(Vec<u8>, MultipartOutcome), SecurityError> {
    let delimiter = format!("--{}", boundary);
    let delim_bytes = delimiter.as_bytes();

    let mut sections = split_on(body, delim_bytes);
    if sections.len() < 2 {
        return Err(SecurityError::MalformedMultipart(
            "boundary not found in body".to_string(),
        ));
    }
    // Everything before the first delimiter is preamble; everything after
    // the closing `--` marker is epilogue.
    sections.remove(0);
    let mut outcome = MultipartOutcome::default();
    let mut kept_parts: Vec<Vec<u8>> = Vec::new();

    for section in &sections {
        let section = strip_leading_crlf(section);
        if section.starts_with(b"--") {
            // Closing marker.
            break;
        }
        let Some(split_at) = find(section, b"\r\n\r\n") else {
            return Err(SecurityError::MalformedMultipart(
                "part missing header terminator".to_string(),
            ));
        };
        let (header_bytes, rest) = section.split_at(split_at);
        let content = strip_trailing_crlf(&rest[4..]);

        let headers = String::from_utf8_lossy(header_bytes);
        if !part_is_text(&headers, content) {
            warn!("Dropping binary multipart part");
            outcome.parts_dropped += 1;
            continue;
        }

        let text = String::from_utf8_lossy(content);
        let scrubbed = detector(&text, tier)
            .map_err(|source| SecurityError::DetectorFailure { tier, source })?;
        if scrubbed != text {
            outcome.parts_scrubbed += 1;
        }

        let mut part = Vec::new();
        part.extend_from_slice(header_bytes);
        part.extend_from_slice(b"\r\n\r\n");
        part.extend_from_slice(scrubbed.as_bytes());
        kept_parts.push(part);
    }

    let mut out = Vec::new();
    for part in &kept_parts {
        out.extend_from_slice(delim_bytes);
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(part);
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(delim_bytes);
    out.extend_from_slice(b"--\r\n");

    Ok((out, outcome))
}

/// A part is text when its declared type is textual (or absent) and its
/// content decodes without NUL bytes.
fn part_is_text(headers: &str, content: &[u8]) -> bool {
    let declared_text = headers
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            if name.trim().eq_ignore_ascii_case("content-type") {
                Some(value.trim().to_ascii_lowercase())
            } else {
                None
            }
        })
        .map_or(true, |ct| {
            ct.starts_with("text/") || ct.starts_with("application/json")
        });
    declared_text && !content.contains(&0) && std::str::from_utf8(content).is_ok()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn split_on<'a>(data: &'a [u8], delim: &[u8]) -> Vec<&'a [u8]> {
    let mut out = Vec::new();
    let mut rest = data;
    while let Some(pos) = find(rest, delim) {
        out.push(&rest[..pos]);
        rest = &rest[pos + delim.len()..];
    }
    out.push(rest);
    out
}

fn strip_leading_crlf(s: &[u8]) -> &[u8] {
    s.strip_prefix(b"\r\n").unwrap_or(s)
}

fn strip_trailing_crlf(s: &[u8]) -> &[u8] {
    s.strip_suffix(b"\r\n").unwrap_or(s)
}
