// redactgate-core/src/normalize.rs
//! Unicode anti-evasion normalization.
//!
//! All detection runs on normalized text so an attacker cannot hide a
//! secret behind confusable characters. The pipeline applies:
//! 1. NFKC normalization (folds fullwidth, mathematical-bold, and other
//!    compatibility forms to their canonical ASCII where one exists)
//! 2. Zero-width / invisible code point stripping
//! 3. Homoglyph folding (Cyrillic/Greek lookalikes to Latin)
//!
//! `detect_evasion_attempt` is an audit signal, never a blocking gate on
//! its own.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use unicode_normalization::UnicodeNormalization;

/// Zero-width and invisible code points stripped before detection.
const ZERO_WIDTH: &[char] = &[
    '\u{200B}', // zero width space
    '\u{200C}', // zero width non-joiner
    '\u{200D}', // zero width joiner
    '\u{2060}', // word joiner
    '\u{FEFF}', // zero width no-break space / BOM
    '\u{00AD}', // soft hyphen
    '\u{180E}', // mongolian vowel separator
];

/// Cross-script homoglyphs folded to their Latin equivalents.
///
/// NFKC already folds fullwidth and mathematical styled letters, so this
/// table only needs the visually-confusable Cyrillic and Greek letters.
static HOMOGLYPHS: Lazy<HashMap<char, char>> = Lazy::new(|| {
    let pairs: &[(char, char)] = &[
        // Cyrillic lowercase
        ('\u{0430}', 'a'), // а
        ('\u{0435}', 'e'), // е
        ('\u{043E}', 'o'), // о
        ('\u{0440}', 'p'), // р
        ('\u{0441}', 'c'), // с
        ('\u{0443}', 'y'), // у
        ('\u{0445}', 'x'), // х
        ('\u{0456}', 'i'), // і
        ('\u{0458}', 'j'), // ј
        ('\u{0455}', 's'), // ѕ
        // Cyrillic uppercase
        ('\u{0410}', 'A'),
        ('\u{0412}', 'B'),
        ('\u{0415}', 'E'),
        ('\u{041A}', 'K'),
        ('\u{041C}', 'M'),
        ('\u{041D}', 'H'),
        ('\u{041E}', 'O'),
        ('\u{0420}', 'P'),
        ('\u{0421}', 'C'),
        ('\u{0422}', 'T'),
        ('\u{0425}', 'X'),
        // Greek
        ('\u{03B1}', 'a'), // α
        ('\u{03BF}', 'o'), // ο
        ('\u{03C1}', 'p'), // ρ
        ('\u{03BD}', 'v'), // ν
        ('\u{03B9}', 'i'), // ι
        ('\u{0391}', 'A'),
        ('\u{0392}', 'B'),
        ('\u{0395}', 'E'),
        ('\u{0397}', 'H'),
        ('\u{0399}', 'I'),
        ('\u{039A}', 'K'),
        ('\u{039C}', 'M'),
        ('\u{039D}', 'N'),
        ('\u{039F}', 'O'),
        ('\u{03A1}', 'P'),
        ('\u{03A4}', 'T'),
        ('\u{03A5}', 'Y'),
        ('\u{03A7}', 'X'),
    ];
    pairs.iter().copied().collect()
});

/// Canonicalizes text for secret detection.
///
/// Must be applied before any pattern or entropy detection runs; detectors
/// operate on the returned string, and redaction offsets refer to it.
pub fn normalize_for_detection(text: &str) -> String {
    text.nfkc()
        .filter(|c| !ZERO_WIDTH.contains(c))
        .map(|c| *HOMOGLYPHS.get(&c).unwrap_or(&c))
        .collect()
}

/// Rough script classification for the evasion heuristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Script {
    Latin,
    Cyrillic,
    Greek,
    Arabic,
    Hebrew,
    Cjk,
    Other,
}

fn classify_script(c: char) -> Option<Script> {
    if !c.is_alphabetic() {
        return None;
    }
    let cp = c as u32;
    Some(match cp {
        0x0041..=0x024F => Script::Latin,
        0x0370..=0x03FF => Script::Greek,
        0x0400..=0x04FF => Script::Cyrillic,
        0x0590..=0x05FF => Script::Hebrew,
        0x0600..=0x06FF => Script::Arabic,
        0x3040..=0x30FF | 0x4E00..=0x9FFF => Script::Cjk,
        _ => Script::Other,
    })
}

/// Flags text that looks like a deliberate evasion attempt: zero-width
/// characters, known homoglyphs, or more than two concurrent scripts.
///
/// Used for audit signaling; normalization already defuses the evasion.
pub fn detect_evasion_attempt(text: &str) -> bool {
    let mut scripts: Vec<Script> = Vec::new();
    for c in text.chars() {
        if ZERO_WIDTH.contains(&c) || HOMOGLYPHS.contains_key(&c) {
            return true;
        }
        if let Some(script) = classify_script(c) {
            if !scripts.contains(&script) {
                scripts.push(script);
                if scripts.len() > 2 {
                    return true;
                }
            }
        }
    }
    false
}
