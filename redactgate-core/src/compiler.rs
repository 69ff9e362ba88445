//! compiler.rs - Manages the compilation and caching of redaction rules.
//!
//! This module provides a thread-safe, cached mechanism to convert a
//! `RedactionConfig` into `CompiledRules`, which are optimized for
//! efficient detection. It uses a global, shared cache to avoid
//! redundant compilation.

use anyhow::Result;
use lazy_static::lazy_static;
use log::{debug, warn};
use regex::{Regex, RegexBuilder};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, RwLock};

use redactgate_entropy::context::ContextScanner;

use crate::config::{RedactionConfig, RedactionRule, MAX_PATTERN_LENGTH};
use crate::errors::RedactError;

/// Represents a single compiled redaction rule.
///
/// Holds a compiled regular expression along with the metadata the detector
/// and the tier policy engine need at match time.
pub struct CompiledRule {
    /// The compiled regular expression used for matching.
    pub regex: Regex,
    /// The string to replace matches of this rule's pattern with.
    pub replace_with: String,
    /// The unique name of the redaction rule.
    pub name: String,
    /// Fixed confidence assigned to matches of this rule.
    pub confidence: f64,
    /// Minimum confidence required for a tier to apply the rule.
    pub min_confidence: f64,
    /// Policy category of the rule.
    pub category: String,
    /// A flag indicating if this rule requires additional programmatic validation.
    pub programmatic_validation: bool,
    /// Context keyword scanner; present only when the rule declares
    /// `context_words`. Keywords are stored lowercase, scanned against a
    /// lowercased window.
    pub context_scanner: Option<ContextScanner>,
}

impl std::fmt::Debug for CompiledRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledRule")
            .field("name", &self.name)
            .field("category", &self.category)
            .field("confidence", &self.confidence)
            .field("has_context_scanner", &self.context_scanner.is_some())
            .finish()
    }
}

/// Represents a collection of all compiled rules for efficient detection.
#[derive(Debug)]
pub struct CompiledRules {
    /// A vector of `CompiledRule` instances ready for application.
    pub rules: Vec<CompiledRule>,
}

lazy_static! {
    /// A thread-safe, global cache for compiled rules.
    /// The key is a hash of the serialized `RedactionConfig`.
    static ref COMPILED_RULES_CACHE: RwLock<HashMap<u64, Arc<CompiledRules>>> =
        RwLock::new(HashMap::new());
}

/// Hashes the `RedactionConfig` to create a stable, unique key for the cache.
///
/// To ensure determinism, the rules are sorted by name before hashing.
fn hash_config(config: &RedactionConfig) -> u64 {
    let mut hasher = DefaultHasher::new();
    let mut rules_to_hash = config.rules.clone();

    rules_to_hash.sort_by(|a, b| a.name.cmp(&b.name));
    rules_to_hash.hash(&mut hasher);
    config.detector.hash(&mut hasher);
    hasher.finish()
}

/// Compiles a list of `RedactionRule`s into `CompiledRules` for efficient matching.
///
/// Pattern-less rules (the entropy rule) are skipped here; the entropy
/// detector consults them directly from the config.
pub fn compile_rules(rules_to_compile: Vec<RedactionRule>) -> Result<CompiledRules, RedactError> {
    debug!("Starting compilation of {} rules.", rules_to_compile.len());

    let mut compiled_rules = Vec::new();
    let mut compilation_errors = Vec::new();

    for rule in rules_to_compile {
        if let Some(false) = rule.enabled {
            debug!("Skipping disabled rule '{}'.", rule.name);
            continue;
        }

        let pattern = match rule.pattern.as_ref() {
            Some(pattern) => pattern,
            None => {
                debug!("Skipping pattern-less rule '{}' (entropy-driven).", rule.name);
                continue;
            }
        };

        if pattern.len() > MAX_PATTERN_LENGTH {
            compilation_errors.push(RedactError::PatternLengthExceeded(
                rule.name,
                pattern.len(),
                MAX_PATTERN_LENGTH,
            ));
            continue;
        }

        let regex_result = RegexBuilder::new(pattern)
            .multi_line(rule.multiline)
            .size_limit(10 * (1 << 20)) // 10 MB limit for compiled regex
            .build();

        match regex_result {
            Ok(regex) => {
                let context_scanner = if rule.context_words.is_empty() {
                    None
                } else {
                    let lowered: Vec<String> = rule
                        .context_words
                        .iter()
                        .map(|w| w.to_ascii_lowercase())
                        .collect();
                    let scanner = ContextScanner::with_keywords(lowered.iter());
                    if scanner.is_none() {
                        warn!(
                            "Rule '{}': failed to build context scanner; context guard disabled.",
                            rule.name
                        );
                    }
                    scanner
                };

                compiled_rules.push(CompiledRule {
                    regex,
                    replace_with: rule.replace_with,
                    name: rule.name,
                    confidence: rule.confidence,
                    min_confidence: rule.min_confidence,
                    category: rule.category,
                    programmatic_validation: rule.programmatic_validation,
                    context_scanner,
                });
            }
            Err(e) => {
                compilation_errors.push(RedactError::RuleCompilationError(rule.name, e));
            }
        }
    }

    if !compilation_errors.is_empty() {
        let error_message = compilation_errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<String>>()
            .join("\n");
        Err(RedactError::Fatal(format!(
            "Failed to compile {} rule(s):\n{}",
            compilation_errors.len(),
            error_message
        )))
    } else {
        debug!("Finished compiling rules. Total compiled: {}.", compiled_rules.len());
        Ok(CompiledRules { rules: compiled_rules })
    }
}

/// Gets a `CompiledRules` instance from the cache or compiles them if not found.
///
/// This is the public entry point for retrieving compiled rules. It returns an `Arc`
/// to a `CompiledRules` instance, allowing for cheap sharing.
pub fn get_or_compile_rules(config: &RedactionConfig) -> Result<Arc<CompiledRules>> {
    let cache_key = hash_config(config);

    {
        let cache = COMPILED_RULES_CACHE.read().unwrap();
        if let Some(rules) = cache.get(&cache_key) {
            debug!("Serving compiled rules from cache for key: {}", &cache_key);
            return Ok(Arc::clone(rules));
        }
    }

    debug!("Compiled rules not found in cache. Compiling now.");
    let compiled = compile_rules(config.rules.clone())?;
    let compiled_arc = Arc::new(compiled);

    COMPILED_RULES_CACHE
        .write()
        .unwrap()
        .insert(cache_key, Arc::clone(&compiled_arc));

    debug!("Successfully compiled and cached rules for key: {}", &cache_key);
    Ok(compiled_arc)
}
