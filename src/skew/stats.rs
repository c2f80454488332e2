use serde::{Deserialize, Serialize};

/// Summary of the per-key record counts. Observability only; mitigation
/// never looks at it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionStats {
    pub min: u64,
    pub max: u64,
    pub median: f64,
    pub mean: f64,
    pub std_dev: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

impl DistributionStats {
    pub fn from_counts(counts: &[u64]) -> Option<Self> {
        if counts.is_empty() {
            return None;
        }

        let mut sorted = counts.to_vec();
        sorted.sort_unstable();

        let n = sorted.len() as f64;
        let mean = sorted.iter().map(|&c| c as f64).sum::<f64>() / n;
        let variance = sorted
            .iter()
            .map(|&c| {
                let delta = c as f64 - mean;
                delta * delta
            })
            .sum::<f64>()
            / n;

        Some(Self {
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            median: percentile(&sorted, 50.0),
            mean,
            std_dev: variance.sqrt(),
            p90: percentile(&sorted, 90.0),
            p95: percentile(&sorted, 95.0),
            p99: percentile(&sorted, 99.0),
        })
    }
}

/// Percentile of an ascending, non-empty slice, interpolating linearly
/// between the two closest ranks.
pub fn percentile(sorted: &[u64], pct: f64) -> f64 {
    debug_assert!(!sorted.is_empty());
    let rank = (pct / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let weight = rank - lower as f64;
    sorted[lower] as f64 + (sorted[upper] as f64 - sorted[lower] as f64) * weight
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_empty_counts() {
        assert!(DistributionStats::from_counts(&[]).is_none());
    }

    #[test]
    fn test_single_count() {
        let stats = DistributionStats::from_counts(&[4]).unwrap();
        assert_eq!(stats.min, 4);
        assert_eq!(stats.max, 4);
        assert!(approx(stats.median, 4.0));
        assert!(approx(stats.std_dev, 0.0));
        assert!(approx(stats.p99, 4.0));
    }

    #[test]
    fn test_two_keys() {
        let stats = DistributionStats::from_counts(&[6, 1]).unwrap();
        assert_eq!(stats.min, 1);
        assert_eq!(stats.max, 6);
        assert!(approx(stats.median, 3.5));
        assert!(approx(stats.mean, 3.5));
        assert!(approx(stats.std_dev, 2.5));
        assert!(approx(stats.p90, 5.5));
        assert!(approx(stats.p95, 5.75));
        assert!(approx(stats.p99, 5.95));
    }

    #[test]
    fn test_percentile_interpolates() {
        let sorted = [1, 2, 3, 4];
        assert!(approx(percentile(&sorted, 50.0), 2.5));
        assert!(approx(percentile(&sorted, 0.0), 1.0));
        assert!(approx(percentile(&sorted, 100.0), 4.0));
        assert!(approx(percentile(&sorted, 90.0), 3.7));
    }
}
