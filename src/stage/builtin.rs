//! In-process implementations of the join-side stages.

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{Stage, StageError, StageOutput};
use crate::join::{self, tag_activity, tag_profile};
use crate::record::{self, RecordError, TaggedRecord};
use crate::skew::{KeyNormalizer, Salter};

type Tagger = fn(&str, &Salter) -> Result<Vec<TaggedRecord>, RecordError>;

fn map_lines(input: &str, salter: &Salter, tagger: Tagger, label: &str) -> StageOutput {
    let mut output = StageOutput::default();
    for line in record::lines(input) {
        match tagger(line, salter) {
            Ok(records) => {
                for record in records {
                    output.stdout.push_str(&record.to_string());
                    output.stdout.push('\n');
                }
            }
            Err(e) => {
                warn!("{label}: {e}");
                output.diagnostics.push(format!("{label}: {e}"));
            }
        }
    }
    output
}

/// Tags `UserID \t activity` lines with `A:` and salts skewed keys.
pub struct ActivityMapStage {
    salter: Salter,
}

impl ActivityMapStage {
    pub fn new(salter: Salter) -> Self {
        Self { salter }
    }
}

#[async_trait]
impl Stage for ActivityMapStage {
    fn name(&self) -> &str {
        "activity mapper"
    }

    async fn run(&self, input: &str) -> Result<StageOutput, StageError> {
        Ok(map_lines(
            input,
            &self.salter,
            tag_activity,
            "ACTIVITY_MAPPER_ERROR",
        ))
    }
}

/// Tags profile lines with `P:` and salts skewed keys.
pub struct ProfileMapStage {
    salter: Salter,
}

impl ProfileMapStage {
    pub fn new(salter: Salter) -> Self {
        Self { salter }
    }
}

#[async_trait]
impl Stage for ProfileMapStage {
    fn name(&self) -> &str {
        "profile mapper"
    }

    async fn run(&self, input: &str) -> Result<StageOutput, StageError> {
        Ok(map_lines(
            input,
            &self.salter,
            tag_profile,
            "PROFILE_MAPPER_ERROR",
        ))
    }
}

/// Joins a sorted stream of tagged records.
pub struct JoinReduceStage {
    normalizer: KeyNormalizer,
}

impl JoinReduceStage {
    pub fn new(normalizer: KeyNormalizer) -> Self {
        Self { normalizer }
    }
}

#[async_trait]
impl Stage for JoinReduceStage {
    fn name(&self) -> &str {
        "join reducer"
    }

    async fn run(&self, input: &str) -> Result<StageOutput, StageError> {
        let outcome = join::assemble(record::lines(input), self.normalizer.clone());
        for diagnostic in &outcome.diagnostics {
            warn!("{diagnostic}");
        }
        debug!(
            "Join reducer: {} keys, {} joined, {} unmatched, {} malformed",
            outcome.stats.keys,
            outcome.stats.emitted,
            outcome.stats.unmatched,
            outcome.stats.malformed
        );

        Ok(StageOutput {
            stdout: record::join_lines(outcome.records.iter().map(ToString::to_string)),
            diagnostics: outcome.diagnostics,
        })
    }
}
