// redactgate-entropy/src/entropy/mod.rs
use alloc::vec::Vec;
use libm::log2;

/// Calculates the Shannon entropy of a byte slice.
///
/// Returns the entropy in bits per symbol.
pub fn shannon_entropy(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }

    let mut frequencies = [0usize; 256];
    for &byte in data {
        frequencies[byte as usize] += 1;
    }

    let len = data.len() as f64;
    let mut entropy = 0.0;

    for &count in frequencies.iter() {
        if count > 0 {
            let p = count as f64 / len;
            entropy -= p * log2(p);
        }
    }

    entropy
}

fn is_base64_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'=')
}

/// Shannon entropy computed only over the base64 alphabet subset of the input.
///
/// Bytes outside the base64 alphabet are ignored, so a candidate embedded in
/// surrounding punctuation still scores on its payload alone.
pub fn base64_entropy(s: &str) -> f64 {
    let filtered: Vec<u8> = s.bytes().filter(|b| is_base64_byte(*b)).collect();
    shannon_entropy(&filtered)
}

/// Shannon entropy computed only over the hexadecimal subset of the input.
pub fn hex_entropy(s: &str) -> f64 {
    let filtered: Vec<u8> = s.bytes().filter(|b| b.is_ascii_hexdigit()).collect();
    shannon_entropy(&filtered)
}
