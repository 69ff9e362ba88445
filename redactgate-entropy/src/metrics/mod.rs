// redactgate-entropy/src/metrics/mod.rs
use libm::sqrt;

use crate::entropy::{base64_entropy, hex_entropy, shannon_entropy};

/// The full set of randomness measurements for one candidate string.
///
/// Consumers treat these as a scoring oracle; no single field is a hard
/// secret/not-secret gate on its own.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntropyMetrics {
    /// Shannon entropy over all bytes of the candidate.
    pub shannon: f64,
    /// Shannon entropy over the base64-alphabet subset.
    pub base64: f64,
    /// Shannon entropy over the hexadecimal subset.
    pub hex: f64,
    /// Candidate length in bytes.
    pub length: usize,
    /// Number of distinct byte values present.
    pub unique_chars: usize,
    /// `unique_chars / length`, in [0, 1].
    pub char_diversity: f64,
}

/// Computes all entropy and diversity measurements for a candidate.
pub fn entropy_metrics(s: &str) -> EntropyMetrics {
    let bytes = s.as_bytes();
    let mut seen = [false; 256];
    let mut unique_chars = 0usize;
    for &b in bytes {
        if !seen[b as usize] {
            seen[b as usize] = true;
            unique_chars += 1;
        }
    }

    let length = bytes.len();
    let char_diversity = if length == 0 {
        0.0
    } else {
        unique_chars as f64 / length as f64
    };

    EntropyMetrics {
        shannon: shannon_entropy(bytes),
        base64: base64_entropy(s),
        hex: hex_entropy(s),
        length,
        unique_chars,
        char_diversity,
    }
}

/// Statistics for a set of entropy values used to determine baseline randomness.
#[derive(Debug, Clone, Copy)]
pub struct EntropyStats {
    /// The arithmetic mean of the sampled entropy values.
    pub mean: f64,
    /// The standard deviation, representing the variance in the sampled context.
    pub std_dev: f64,
}

/// Calculates mean and standard deviation for a slice of values.
///
/// This is used to establish a "normal" range of entropy for a given text
/// so that high-entropy outliers (potential secrets) can be identified.
pub fn compute_stats(values: &[f64]) -> EntropyStats {
    if values.is_empty() {
        return EntropyStats { mean: 0.0, std_dev: 0.0 };
    }

    let len = values.len() as f64;
    let mean = values.iter().sum::<f64>() / len;

    let variance = values
        .iter()
        .map(|value| {
            let diff = mean - value;
            diff * diff
        })
        .sum::<f64>()
        / len;

    EntropyStats {
        mean,
        std_dev: sqrt(variance),
    }
}
