// redactgate-core/src/tier.rs
//! Sensitivity tiers and the tier-to-rule-category policy table.
//!
//! A tier classifies how aggressively a given request/response context must
//! be redacted. Tiers are totally ordered; the set of rule categories
//! enabled at a tier is always a superset of those enabled at any
//! less-strict tier, so raising the tier can only add redactions.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Ordered sensitivity classification for a redaction context.
///
/// Ordering matters: `Public < Internal < Confidential < Restricted <
/// Secrets`. The derived `Ord` follows declaration order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum ContextSensitivity {
    Public,
    #[default]
    Internal,
    Confidential,
    Restricted,
    Secrets,
}

impl ContextSensitivity {
    /// Numeric level, used for threshold comparisons (fail-closed policy).
    pub fn level(self) -> u8 {
        match self {
            ContextSensitivity::Public => 0,
            ContextSensitivity::Internal => 1,
            ContextSensitivity::Confidential => 2,
            ContextSensitivity::Restricted => 3,
            ContextSensitivity::Secrets => 4,
        }
    }

    /// Inverse of [`level`](Self::level); values above the range clamp to
    /// `Secrets` so an out-of-range configuration fails toward strictness.
    pub fn from_level(level: u8) -> Self {
        match level {
            0 => ContextSensitivity::Public,
            1 => ContextSensitivity::Internal,
            2 => ContextSensitivity::Confidential,
            3 => ContextSensitivity::Restricted,
            _ => ContextSensitivity::Secrets,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ContextSensitivity::Public => "public",
            ContextSensitivity::Internal => "internal",
            ContextSensitivity::Confidential => "confidential",
            ContextSensitivity::Restricted => "restricted",
            ContextSensitivity::Secrets => "secrets",
        }
    }

    fn all() -> [ContextSensitivity; 5] {
        [
            ContextSensitivity::Public,
            ContextSensitivity::Internal,
            ContextSensitivity::Confidential,
            ContextSensitivity::Restricted,
            ContextSensitivity::Secrets,
        ]
    }
}

impl fmt::Display for ContextSensitivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps each tier to the set of rule categories enabled at that tier.
///
/// The default table is built cumulatively, which makes the superset
/// invariant hold by construction. Tier `Secrets` additionally redacts every
/// detector match regardless of category; that mandatory behavior lives in
/// the redactor, not here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierPolicy {
    enabled: BTreeMap<ContextSensitivity, BTreeSet<String>>,
}

impl TierPolicy {
    /// Builds a policy from per-tier category additions.
    ///
    /// `additions` lists, for each tier in ascending order, the categories
    /// that become enabled starting at that tier. Each tier inherits
    /// everything below it.
    pub fn cumulative(additions: &[(ContextSensitivity, &[&str])]) -> Self {
        let mut enabled = BTreeMap::new();
        let mut acc: BTreeSet<String> = BTreeSet::new();
        for tier in ContextSensitivity::all() {
            for (t, cats) in additions {
                if *t == tier {
                    acc.extend(cats.iter().map(|c| c.to_string()));
                }
            }
            enabled.insert(tier, acc.clone());
        }
        Self { enabled }
    }

    /// The categories enabled for `tier`.
    pub fn categories_for(&self, tier: ContextSensitivity) -> &BTreeSet<String> {
        // Every tier is present by construction.
        &self.enabled[&tier]
    }

    /// Whether `category` is enabled at `tier`.
    pub fn is_enabled(&self, tier: ContextSensitivity, category: &str) -> bool {
        self.enabled[&tier].contains(category)
    }
}

impl Default for TierPolicy {
    /// The complete default policy table.
    ///
    /// Credentials and tokens are redacted at every tier including `Public`:
    /// a leaked key is a leaked key regardless of how public the endpoint
    /// is. PII joins at `Confidential`, financial data and entropy-based
    /// catches at `Restricted`.
    fn default() -> Self {
        Self::cumulative(&[
            (ContextSensitivity::Public, &["credentials", "tokens"]),
            (ContextSensitivity::Internal, &["network"]),
            (ContextSensitivity::Confidential, &["pii"]),
            (ContextSensitivity::Restricted, &["financial", "entropy"]),
        ])
    }
}
