//! Provenance classification
//!
//! Maps an opaque data-source identifier (typically an app package name) to a
//! priority tier. The vendor tokens are plain data so the table can be tested
//! and extended without touching the reconciler.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Priority class of a data source, highest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvenanceTier {
    Primary,
    Secondary,
    Other,
}

impl ProvenanceTier {
    /// Tiers in reconciliation order
    pub const ORDERED: [ProvenanceTier; 3] = [
        ProvenanceTier::Primary,
        ProvenanceTier::Secondary,
        ProvenanceTier::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProvenanceTier::Primary => "primary",
            ProvenanceTier::Secondary => "secondary",
            ProvenanceTier::Other => "other",
        }
    }

    /// Name of the vendor family reported to users
    pub fn label(&self) -> &'static str {
        match self {
            ProvenanceTier::Primary => "Samsung Health",
            ProvenanceTier::Secondary => "Google Fit",
            ProvenanceTier::Other => "Other",
        }
    }
}

impl fmt::Display for ProvenanceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Samsung Health and Galaxy Watch package fragments
pub const PRIMARY_TOKENS: &[&str] = &["shealth", "com.sec.android", "samsung", "gear"];

/// Google Fit package fragments
pub const SECONDARY_TOKENS: &[&str] = &["google.android.apps.fitness"];

/// A single matching rule: lowercase token and the tier it assigns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvenanceRule {
    pub token: String,
    pub tier: ProvenanceTier,
}

/// Ordered rule table; the first matching rule wins
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvenanceRules {
    rules: Vec<ProvenanceRule>,
}

impl Default for ProvenanceRules {
    fn default() -> Self {
        Self::with_extra_tokens(&[], &[])
    }
}

impl ProvenanceRules {
    /// Build the default table with extra tokens appended to each tier.
    ///
    /// Primary rules always precede secondary rules, so a source matching
    /// both lists is classified as primary.
    pub fn with_extra_tokens(extra_primary: &[String], extra_secondary: &[String]) -> Self {
        let primary = PRIMARY_TOKENS
            .iter()
            .map(|t| t.to_string())
            .chain(extra_primary.iter().cloned())
            .map(|token| (token, ProvenanceTier::Primary));
        let secondary = SECONDARY_TOKENS
            .iter()
            .map(|t| t.to_string())
            .chain(extra_secondary.iter().cloned())
            .map(|token| (token, ProvenanceTier::Secondary));

        let rules = primary
            .chain(secondary)
            .map(|(token, tier)| ProvenanceRule {
                token: token.trim().to_lowercase(),
                tier,
            })
            .filter(|rule| !rule.token.is_empty())
            .collect();

        Self { rules }
    }

    pub fn rules(&self) -> &[ProvenanceRule] {
        &self.rules
    }

    /// Classify a source id. Total: unmatched sources are `Other`.
    pub fn classify(&self, source_id: &str) -> ProvenanceTier {
        let source = source_id.to_lowercase();
        self.rules
            .iter()
            .find(|rule| source.contains(rule.token.as_str()))
            .map(|rule| rule.tier)
            .unwrap_or(ProvenanceTier::Other)
    }
}

/// Classify with the default rule table
pub fn classify(source_id: &str) -> ProvenanceTier {
    ProvenanceRules::default().classify(source_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_samsung_sources_are_primary() {
        assert_eq!(classify("com.sec.android.app.shealth"), ProvenanceTier::Primary);
        assert_eq!(classify("com.samsung.android.wear"), ProvenanceTier::Primary);
        assert_eq!(classify("com.example.gear.sync"), ProvenanceTier::Primary);
    }

    #[test]
    fn test_google_fit_is_secondary() {
        assert_eq!(
            classify("com.google.android.apps.fitness"),
            ProvenanceTier::Secondary
        );
    }

    #[test]
    fn test_matching_is_case_insensitive() {
        assert_eq!(classify("COM.SEC.ANDROID.APP.SHEALTH"), ProvenanceTier::Primary);
        assert_eq!(
            classify("Com.Google.Android.Apps.Fitness"),
            ProvenanceTier::Secondary
        );
    }

    #[test]
    fn test_unmatched_defaults_to_other() {
        assert_eq!(classify("com.strava"), ProvenanceTier::Other);
        assert_eq!(classify(""), ProvenanceTier::Other);
    }

    #[test]
    fn test_primary_checked_before_secondary() {
        let rules = ProvenanceRules::with_extra_tokens(&[], &["samsung".to_string()]);
        assert_eq!(rules.classify("samsung.bridge"), ProvenanceTier::Primary);
    }

    #[test]
    fn test_extra_tokens_extend_table() {
        let rules = ProvenanceRules::with_extra_tokens(
            &["Garmin".to_string()],
            &["fitbit".to_string(), "  ".to_string()],
        );
        assert_eq!(rules.classify("com.garmin.android.apps.connectmobile"), ProvenanceTier::Primary);
        assert_eq!(rules.classify("com.fitbit.FitbitMobile"), ProvenanceTier::Secondary);
        assert_eq!(rules.rules().len(), PRIMARY_TOKENS.len() + SECONDARY_TOKENS.len() + 2);
    }

    #[test]
    fn test_tier_ordering() {
        assert!(ProvenanceTier::Primary < ProvenanceTier::Secondary);
        assert!(ProvenanceTier::Secondary < ProvenanceTier::Other);
        assert_eq!(ProvenanceTier::ORDERED[0], ProvenanceTier::Primary);
    }
}
