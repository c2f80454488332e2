use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

use super::stats::DistributionStats;

/// Result of one skew analysis pass.
///
/// Serialized as the `skew_analysis.json` artifact. Every field defaults so
/// partial reports (for example `{"error": "...", "skewed_keys": []}`) still
/// load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkewProfile {
    pub total_records: u64,
    pub unique_keys: u64,
    pub average_records_per_key: f64,
    pub skew_threshold: f64,
    pub skewed_keys: BTreeSet<String>,
    pub skewed_keys_count: usize,
    pub top_keys: Vec<(String, u64)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distribution_stats: Option<DistributionStats>,
}

impl SkewProfile {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_skewed(&self, key: &str) -> bool {
        self.skewed_keys.contains(key)
    }

    pub fn has_skew(&self) -> bool {
        !self.skewed_keys.is_empty()
    }

    /// A profile carrying only a known key set, as when the keys come from
    /// configuration rather than from an analysis.
    pub fn from_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let skewed_keys: BTreeSet<String> = keys
            .into_iter()
            .map(Into::into)
            .filter(|k: &String| !k.is_empty())
            .collect();
        Self {
            skewed_keys_count: skewed_keys.len(),
            skewed_keys,
            ..Self::default()
        }
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Parse an analysis report, degrading to "no skewed keys" when it is
    /// not valid JSON.
    pub fn parse_lenient(text: &str) -> Self {
        match serde_json::from_str::<SkewProfile>(text) {
            Ok(mut profile) => {
                profile.skewed_keys.retain(|k| !k.is_empty());
                profile.skewed_keys_count = profile.skewed_keys.len();
                profile
            }
            Err(e) => {
                tracing::warn!("Could not parse skew analysis output: {}", e);
                Self::empty()
            }
        }
    }

    pub async fn from_file(path: &Path) -> Self {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => Self::parse_lenient(&text),
            Err(e) => {
                tracing::warn!("Could not read skew analysis {}: {}", path.display(), e);
                Self::empty()
            }
        }
    }

    /// Comma-separated form handed to external stages.
    pub fn key_list(&self) -> String {
        self.skewed_keys
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }
}
