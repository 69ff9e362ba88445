// redactgate-entropy/src/context/mod.rs
use daachorse::DoubleArrayAhoCorasick;
extern crate alloc;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

/// Scans for keywords surrounding a potential secret with word-boundary awareness.
pub struct ContextScanner {
    automaton: DoubleArrayAhoCorasick<usize>,
}

impl fmt::Debug for ContextScanner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextScanner")
            .field("automaton", &"<DoubleArrayAhoCorasick>")
            .finish()
    }
}

impl ContextScanner {
    /// Creates a new scanner with a default list of suspicious keywords.
    pub fn new() -> Self {
        let patterns = vec![
            "key", "api", "token", "secret", "password", "passwd", "pwd",
            "auth", "bearer", "access", "credential", "private",
            "client", "aws", "gcp", "azure", "stripe", "ghp",
        ];

        let automaton = DoubleArrayAhoCorasick::new(patterns)
            .expect("Failed to build Aho-Corasick automaton for context scanning");

        Self { automaton }
    }

    /// Creates a scanner over an explicit keyword list.
    ///
    /// Keywords are matched byte-for-byte; callers wanting case-insensitive
    /// matching should supply lowercase keywords and scan lowercased text.
    pub fn with_keywords<I, S>(keywords: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        let patterns: Vec<Vec<u8>> = keywords
            .into_iter()
            .map(|k| k.as_ref().to_vec())
            .collect();
        if patterns.is_empty() {
            return None;
        }
        DoubleArrayAhoCorasick::new(patterns)
            .ok()
            .map(|automaton| Self { automaton })
    }

    /// Scans a window of bytes for any keyword.
    /// Employs word-boundary checks to ensure "key" doesn't match "monkey".
    pub fn scan_window(&self, window: &[u8]) -> bool {
        for matched in self.automaton.find_iter(window) {
            let m_start = matched.start();
            let m_end = matched.end();

            // Word boundary check: ensure keyword is not surrounded by alphanumeric chars
            let prefix_ok = m_start == 0 || !window[m_start - 1].is_ascii_alphanumeric();
            let suffix_ok = m_end == window.len() || !window[m_end].is_ascii_alphanumeric();

            if prefix_ok && suffix_ok {
                return true;
            }
        }
        false
    }

    /// Scans the context on both sides of a candidate span for keywords.
    ///
    /// `window_size` bounds how far before `start` and after `end` is
    /// inspected. The candidate itself is excluded so a secret cannot vouch
    /// for its own context.
    pub fn scan_surrounding_context(
        &self,
        text: &[u8],
        start: usize,
        end: usize,
        window_size: usize,
    ) -> bool {
        let before_start = start.saturating_sub(window_size);
        if start > before_start && self.scan_window(&text[before_start..start]) {
            return true;
        }
        let after_end = end.saturating_add(window_size).min(text.len());
        if after_end > end && self.scan_window(&text[end..after_end]) {
            return true;
        }
        false
    }
}

impl Default for ContextScanner {
    fn default() -> Self {
        Self::new()
    }
}

/// Lowercases ASCII bytes of a window into an owned buffer for
/// case-insensitive keyword scans.
pub fn ascii_lowercase(window: &[u8]) -> Vec<u8> {
    window.iter().map(|b| b.to_ascii_lowercase()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_boundary_rejects_substring() {
        let scanner = ContextScanner::new();
        assert!(!scanner.scan_window(b"the monkey jumped"));
        assert!(scanner.scan_window(b"the api key is"));
    }

    #[test]
    fn test_surrounding_context_before_and_after() {
        let scanner = ContextScanner::new();
        let text = b"aws credentials follow: XXXXXXXXXXXXXXXX";
        assert!(scanner.scan_surrounding_context(text, 24, 40, 50));

        let text_after = b"XXXXXXXXXXXXXXXX is the secret value";
        assert!(scanner.scan_surrounding_context(text_after, 0, 16, 50));
    }

    #[test]
    fn test_surrounding_context_out_of_window() {
        let scanner = ContextScanner::new();
        // Keyword exists but is outside the 4-byte window.
        let text = b"secret________________XXXX";
        assert!(!scanner.scan_surrounding_context(text, 22, 26, 4));
    }

    #[test]
    fn test_with_keywords_custom_list() {
        let scanner = ContextScanner::with_keywords(["dsn", "database"]).unwrap();
        assert!(scanner.scan_window(b"database url ="));
        assert!(!scanner.scan_window(b"no match here"));
    }

    #[test]
    fn test_with_keywords_empty_is_none() {
        let empty: [&str; 0] = [];
        assert!(ContextScanner::with_keywords(empty).is_none());
    }
}
