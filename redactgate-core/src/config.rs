//! Configuration management for `redactgate-core`.
//!
//! This module defines the core data structures for redaction rules and
//! detector settings. It handles serialization/deserialization of YAML
//! configurations and provides utilities for loading, merging, and
//! validating these configs. Rules are loaded once at process start;
//! nothing in this module mutates configuration afterwards.

use anyhow::{anyhow, Context, Result};
use log::{debug, info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::path::Path;

/// Maximum allowed length for a regex pattern string.
pub const MAX_PATTERN_LENGTH: usize = 500;

/// Represents a single redaction rule.
///
/// Pattern-bearing rules drive the regex sub-detector; the pattern-less
/// `high_entropy_secret` rule carries the replacement and confidence floor
/// for the entropy sub-detector.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RedactionRule {
    /// Unique identifier for the rule (e.g., "aws_access_key").
    pub name: String,
    /// Human-readable description of what the rule targets.
    pub description: Option<String>,
    /// The regex pattern string; `None` for the entropy rule.
    pub pattern: Option<String>,
    /// The string to replace matches with.
    pub replace_with: String,
    /// Fixed confidence assigned to matches of this rule, in [0, 1].
    pub confidence: f64,
    /// Minimum confidence a match must carry to be redacted under a tier.
    pub min_confidence: f64,
    /// Policy category the rule belongs to (credentials, tokens, pii, ...).
    pub category: String,
    /// When non-empty, a match only counts if one of these words appears
    /// within the detector's context window around the match.
    pub context_words: Vec<String>,
    /// If true, requires external programmatic validation (e.g., Luhn).
    pub programmatic_validation: bool,
    /// If true, enables multiline mode for the regex engine.
    pub multiline: bool,
    /// Explicit override for enabling/disabling the rule.
    pub enabled: Option<bool>,
    /// Security severity level (e.g., "high", "medium").
    pub severity: Option<String>,
}

impl Hash for RedactionRule {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.description.hash(state);
        self.pattern.hash(state);
        self.replace_with.hash(state);
        self.confidence.to_bits().hash(state);
        self.min_confidence.to_bits().hash(state);
        self.category.hash(state);
        self.context_words.hash(state);
        self.programmatic_validation.hash(state);
        self.multiline.hash(state);
        self.enabled.hash(state);
        self.severity.hash(state);
    }
}

impl Default for RedactionRule {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: None,
            pattern: None,
            replace_with: "<REDACTED>".to_string(),
            confidence: 0.8,
            min_confidence: 0.5,
            category: "credentials".to_string(),
            context_words: Vec::new(),
            programmatic_validation: false,
            multiline: false,
            enabled: None,
            severity: None,
        }
    }
}

/// Settings for the entropy sub-detector.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Minimum Shannon entropy for an entropy candidate (default: 4.5).
    pub min_entropy: f64,
    /// Minimum character diversity for an entropy candidate (default: 0.6).
    pub min_diversity: f64,
    /// Minimum candidate length in bytes (default: 20).
    pub min_candidate_len: usize,
    /// Maximum candidate length in bytes (default: 200).
    pub max_candidate_len: usize,
    /// How far around a match context words are searched, in bytes (default: 50).
    pub context_window: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_entropy: 4.5,
            min_diversity: 0.6,
            min_candidate_len: 20,
            max_candidate_len: 200,
            context_window: 50,
        }
    }
}

impl Hash for DetectorConfig {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.min_entropy.to_bits().hash(state);
        self.min_diversity.to_bits().hash(state);
        self.min_candidate_len.hash(state);
        self.max_candidate_len.hash(state);
        self.context_window.hash(state);
    }
}

/// Represents the top-level configuration structure for redactgate.
#[derive(Debug, Default, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct RedactionConfig {
    /// The redaction rule table.
    pub rules: Vec<RedactionRule>,
    /// Entropy sub-detector settings.
    pub detector: DetectorConfig,
}

impl RedactionConfig {
    /// Loads redaction rules from a YAML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading custom rules from: {}", path.display());
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: RedactionConfig = serde_yml::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        validate_rules(&config.rules)?;
        info!("Loaded {} rules from file {}.", config.rules.len(), path.display());

        Ok(config)
    }

    /// Loads default redaction rules from the embedded configuration.
    pub fn load_default_rules() -> Result<Self> {
        debug!("Loading default rules from embedded string...");
        let default_yaml = include_str!("../config/default_rules.yaml");
        let config: RedactionConfig =
            serde_yml::from_str(default_yaml).context("Failed to parse default rules")?;

        debug!("Loaded {} default rules.", config.rules.len());
        Ok(config)
    }

    /// Looks up a rule by name.
    pub fn rule(&self, name: &str) -> Option<&RedactionRule> {
        self.rules.iter().find(|r| r.name == name)
    }
}

/// Merges user-defined rules and detector settings with defaults.
///
/// User rules replace default rules of the same name; detector settings
/// from the user config win wholesale when provided.
pub fn merge_rules(
    default_config: RedactionConfig,
    user_config: Option<RedactionConfig>,
) -> RedactionConfig {
    debug!(
        "merge_rules called. Initial default rules count: {}",
        default_config.rules.len()
    );

    let mut final_rules_map: HashMap<String, RedactionRule> = default_config
        .rules
        .into_iter()
        .map(|rule| (rule.name.clone(), rule))
        .collect();

    let mut final_detector = default_config.detector;

    if let Some(user_cfg) = user_config {
        debug!("User config provided. Merging {} user rules.", user_cfg.rules.len());
        for user_rule in user_cfg.rules {
            final_rules_map.insert(user_rule.name.clone(), user_rule);
        }
        final_detector = user_cfg.detector;
    }

    let final_rules: Vec<RedactionRule> = final_rules_map.into_values().collect();
    debug!("Final total rules after merge: {}", final_rules.len());

    RedactionConfig {
        rules: final_rules,
        detector: final_detector,
    }
}

/// Validates rule integrity (names, regex compilation, confidence ranges).
pub fn validate_rules(rules: &[RedactionRule]) -> Result<()> {
    let mut rule_names = HashSet::new();
    let mut errors = Vec::new();

    for rule in rules {
        if rule.name.is_empty() {
            errors.push("A rule has an empty `name` field.".to_string());
        } else if !rule_names.insert(rule.name.clone()) {
            errors.push(format!("Duplicate rule name found: '{}'.", rule.name));
        }

        if !(0.0..=1.0).contains(&rule.confidence) {
            errors.push(format!(
                "Rule '{}': confidence {} is outside [0, 1].",
                rule.name, rule.confidence
            ));
        }
        if !(0.0..=1.0).contains(&rule.min_confidence) {
            errors.push(format!(
                "Rule '{}': min_confidence {} is outside [0, 1].",
                rule.name, rule.min_confidence
            ));
        }
        if rule.category.is_empty() {
            errors.push(format!("Rule '{}' has an empty `category` field.", rule.name));
        }

        match &rule.pattern {
            Some(pattern) => {
                if pattern.is_empty() {
                    errors.push(format!("Rule '{}' has an empty `pattern` field.", rule.name));
                    continue;
                }
                if pattern.len() > MAX_PATTERN_LENGTH {
                    errors.push(format!(
                        "Rule '{}': pattern length ({}) exceeds maximum allowed ({}).",
                        rule.name,
                        pattern.len(),
                        MAX_PATTERN_LENGTH
                    ));
                    continue;
                }
                if let Err(e) = Regex::new(pattern) {
                    errors.push(format!("Rule '{}' has an invalid regex pattern: {}", rule.name, e));
                }
            }
            None => {
                // Pattern-less rules are only meaningful for the entropy detector.
                if rule.category != "entropy" {
                    warn!(
                        "Rule '{}' has no pattern and is not an entropy rule; it will never match.",
                        rule.name
                    );
                }
            }
        }
    }

    if !errors.is_empty() {
        let full_error_message = format!("Rule validation failed:\n{}", errors.join("\n"));
        Err(anyhow!(full_error_message))
    } else {
        Ok(())
    }
}
