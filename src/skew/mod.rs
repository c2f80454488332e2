//! Skew detection and mitigation for the join job.
//!
//! The detector runs once over the aggregation output; the resulting
//! [`SkewProfile`] parameterizes a [`Salter`] that both join map stages
//! apply independently.

pub mod detector;
pub mod profile;
pub mod salter;
pub mod stats;

pub use detector::{count_keys, SkewDetector};
pub use profile::SkewProfile;
pub use salter::{
    default_num_salts, KeyNormalizer, NormalizationMode, Salter, DEFAULT_NUM_SALTS,
    DEFAULT_SALT_DELIMITER,
};
pub use stats::DistributionStats;
