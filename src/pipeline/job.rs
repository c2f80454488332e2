use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::{JobConfig, JoinJobConfig};
use crate::error::{PipelineError, Result};
use crate::record;
use crate::shuffle;
use crate::skew::KeyNormalizer;
use crate::stage::{build_stage, Stage, StageContext, StageOutput};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobName {
    Cleansing,
    Aggregation,
    Trending,
    Join,
    All,
}

impl JobName {
    pub fn as_str(self) -> &'static str {
        match self {
            JobName::Cleansing => "cleansing",
            JobName::Aggregation => "aggregation",
            JobName::Trending => "trending",
            JobName::Join => "join",
            JobName::All => "all",
        }
    }
}

impl fmt::Display for JobName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What one job produced, before it is written out.
#[derive(Debug, Clone, Default)]
pub struct JobOutput {
    pub text: String,
    pub records: usize,
    pub diagnostics: Vec<String>,
    pub duration: Duration,
}

impl JobOutput {
    fn empty(diagnostics: Vec<String>, started: Instant) -> Self {
        Self {
            diagnostics,
            duration: started.elapsed(),
            ..Self::default()
        }
    }
}

async fn run_stage(job: JobName, stage: &dyn Stage, input: &str) -> Result<StageOutput> {
    debug!("[{job}] {}", stage.name());
    stage
        .run(input)
        .await
        .map_err(|e| PipelineError::stage(job.as_str(), e))
}

/// map → sort → [combine → sort] → reduce over one input buffer.
pub struct SingleInputJob {
    name: JobName,
    mapper: Arc<dyn Stage>,
    combiner: Option<Arc<dyn Stage>>,
    reducer: Arc<dyn Stage>,
}

impl SingleInputJob {
    pub fn new(
        name: JobName,
        mapper: Arc<dyn Stage>,
        combiner: Option<Arc<dyn Stage>>,
        reducer: Arc<dyn Stage>,
    ) -> Self {
        Self {
            name,
            mapper,
            combiner,
            reducer,
        }
    }

    pub fn from_config(name: JobName, config: &JobConfig, ctx: &StageContext) -> Self {
        Self::new(
            name,
            build_stage(&format!("{name} mapper"), &config.mapper, ctx),
            config
                .combiner
                .as_ref()
                .map(|spec| build_stage(&format!("{name} combiner"), spec, ctx)),
            build_stage(&format!("{name} reducer"), &config.reducer, ctx),
        )
    }

    pub async fn execute(&self, input: &str) -> Result<JobOutput> {
        let started = Instant::now();
        let job = self.name;
        let mut diagnostics = Vec::new();

        let mapped = run_stage(job, self.mapper.as_ref(), input).await?;
        diagnostics.extend(mapped.diagnostics);
        let mut sorted = shuffle::shuffle(&mapped.stdout);
        if sorted.is_empty() {
            warn!("[{job}] mapper produced no output");
            return Ok(JobOutput::empty(diagnostics, started));
        }
        debug!("[{job}] {} mapped records", sorted.len());

        if let Some(combiner) = &self.combiner {
            let combined =
                run_stage(job, combiner.as_ref(), &record::join_lines(&sorted)).await?;
            diagnostics.extend(combined.diagnostics);
            sorted = shuffle::shuffle(&combined.stdout);
            debug!("[{job}] {} combined records", sorted.len());
        }

        let reduced = run_stage(job, self.reducer.as_ref(), &record::join_lines(&sorted)).await?;
        diagnostics.extend(reduced.diagnostics);

        let output = JobOutput {
            records: record::lines(&reduced.stdout).count(),
            text: reduced.stdout,
            diagnostics,
            duration: started.elapsed(),
        };
        info!(
            "[{job}] completed in {:.2?}: {} records",
            output.duration, output.records
        );
        Ok(output)
    }
}

/// Two map stages over the activity and profile inputs, one global sort,
/// one join reducer.
///
/// The sort groups on the key as `normalizer` sees it, so a salt family
/// reaches the reducer as one run even next to look-alike raw keys.
pub struct JoinJob {
    activity_mapper: Arc<dyn Stage>,
    profile_mapper: Arc<dyn Stage>,
    reducer: Arc<dyn Stage>,
    normalizer: KeyNormalizer,
}

impl JoinJob {
    pub fn new(
        activity_mapper: Arc<dyn Stage>,
        profile_mapper: Arc<dyn Stage>,
        reducer: Arc<dyn Stage>,
        normalizer: KeyNormalizer,
    ) -> Self {
        Self {
            activity_mapper,
            profile_mapper,
            reducer,
            normalizer,
        }
    }

    pub fn from_config(config: &JoinJobConfig, ctx: &StageContext) -> Self {
        Self::new(
            build_stage("join activity mapper", &config.activity_mapper, ctx),
            build_stage("join profile mapper", &config.profile_mapper, ctx),
            build_stage("join reducer", &config.reducer, ctx),
            ctx.normalizer.clone(),
        )
    }

    pub async fn execute(&self, activity: &str, profiles: &str) -> Result<JobOutput> {
        let started = Instant::now();
        let job = JobName::Join;
        let mut diagnostics = Vec::new();

        let activity_out = run_stage(job, self.activity_mapper.as_ref(), activity).await?;
        diagnostics.extend(activity_out.diagnostics);
        let profile_out = run_stage(job, self.profile_mapper.as_ref(), profiles).await?;
        diagnostics.extend(profile_out.diagnostics);

        let sorted = shuffle::shuffle_grouped(
            [activity_out.stdout.as_str(), profile_out.stdout.as_str()],
            &self.normalizer,
        );
        if sorted.is_empty() {
            warn!("[{job}] mappers produced no output");
            return Ok(JobOutput::empty(diagnostics, started));
        }
        debug!("[{job}] {} tagged records after shuffle", sorted.len());

        let reduced = run_stage(job, self.reducer.as_ref(), &record::join_lines(&sorted)).await?;
        diagnostics.extend(reduced.diagnostics);

        let output = JobOutput {
            records: record::lines(&reduced.stdout).count(),
            text: reduced.stdout,
            diagnostics,
            duration: started.elapsed(),
        };
        info!(
            "[{job}] completed in {:.2?}: {} joined records",
            output.duration, output.records
        );
        Ok(output)
    }
}
