use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::profile::SkewProfile;
use super::stats::DistributionStats;
use crate::record::{self, Record};

const TOP_KEYS: usize = 10;

/// Classifies primary keys as skewed with a threshold that adapts to both
/// the dataset size and the average key frequency:
///
/// ```text
/// threshold = max(threshold_factor * total, average_multiplier * total / unique)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SkewDetector {
    pub threshold_factor: f64,
    pub average_multiplier: f64,
}

impl Default for SkewDetector {
    fn default() -> Self {
        Self {
            threshold_factor: 0.01,
            average_multiplier: 5.0,
        }
    }
}

impl SkewDetector {
    pub fn new(threshold_factor: f64, average_multiplier: f64) -> Self {
        Self {
            threshold_factor,
            average_multiplier,
        }
    }

    pub fn threshold(&self, total_records: u64, unique_keys: usize) -> f64 {
        if unique_keys == 0 {
            return 0.0;
        }
        let average = total_records as f64 / unique_keys as f64;
        (self.threshold_factor * total_records as f64).max(self.average_multiplier * average)
    }

    /// Analyze a newline-delimited dataset.
    pub fn analyze_text(&self, text: &str) -> SkewProfile {
        self.analyze(record::lines(text))
    }

    pub fn analyze<'a, I>(&self, lines: I) -> SkewProfile
    where
        I: IntoIterator<Item = &'a str>,
    {
        let counts = count_keys(lines);
        self.profile_from_counts(&counts)
    }

    pub fn profile_from_counts(&self, counts: &HashMap<String, u64>) -> SkewProfile {
        let total_records: u64 = counts.values().sum();
        if total_records == 0 {
            return SkewProfile::empty();
        }

        let unique_keys = counts.len();
        let average = total_records as f64 / unique_keys as f64;
        let threshold = self.threshold(total_records, unique_keys);

        let skewed_keys: std::collections::BTreeSet<String> = counts
            .iter()
            .filter(|&(_, &count)| count as f64 > threshold)
            .map(|(key, _)| key.clone())
            .collect();

        let mut ranked: Vec<(String, u64)> =
            counts.iter().map(|(k, &c)| (k.clone(), c)).collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(TOP_KEYS);

        let values: Vec<u64> = counts.values().copied().collect();

        tracing::info!(
            "Skew analysis: {} records, {} keys, threshold {:.2}, {} skewed",
            total_records,
            unique_keys,
            threshold,
            skewed_keys.len()
        );

        SkewProfile {
            total_records,
            unique_keys: unique_keys as u64,
            average_records_per_key: average,
            skew_threshold: threshold,
            skewed_keys_count: skewed_keys.len(),
            skewed_keys,
            top_keys: ranked,
            distribution_stats: DistributionStats::from_counts(&values),
        }
    }
}

/// Count primary keys. Lines without a tab are reported and skipped.
pub fn count_keys<'a, I>(lines: I) -> HashMap<String, u64>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut counts: HashMap<String, u64> = HashMap::new();
    let mut malformed = 0usize;

    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        let record = Record::parse(line);
        if !record.has_value() {
            malformed += 1;
            tracing::warn!("Skipping line without key separator: {:?}", line);
            continue;
        }
        *counts.entry(record.primary_key().to_string()).or_default() += 1;
    }

    if malformed > 0 {
        tracing::warn!("Skew analysis skipped {} malformed lines", malformed);
    }
    counts
}
