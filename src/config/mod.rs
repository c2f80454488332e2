//! Pipeline configuration.
//!
//! Everything a stage needs is carried by an explicit [`StageSettings`]
//! value handed over when the stage is built; external stages get it
//! translated into environment variables.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::path::PathBuf;

use crate::error::{PipelineError, Result};
use crate::skew::{
    NormalizationMode, Salter, SkewDetector, SkewProfile, DEFAULT_NUM_SALTS,
    DEFAULT_SALT_DELIMITER,
};
use crate::subprocess::ProcessCommand;

pub mod loader;

pub use loader::{load_config, DEFAULT_CONFIG_FILE};

/// Tells the trending reducer to derive its threshold from the data.
pub const DYNAMIC_TRENDING_THRESHOLD: f64 = -1.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub skew: SkewConfig,
    pub jobs: JobsConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("data"),
            output_dir: PathBuf::from("output"),
            skew: SkewConfig::default(),
            jobs: JobsConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        self.skew.validate()?;
        for (job, spec) in self.jobs.stage_specs() {
            if let StageSpec::External(command) = spec {
                if command.program.trim().is_empty() {
                    return Err(PipelineError::Config(format!(
                        "job '{job}' has an external stage with an empty program"
                    )));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkewConfig {
    /// Size of the salt family for each skewed key.
    pub num_salts: usize,
    pub threshold_factor: f64,
    pub average_multiplier: f64,
    pub key_delimiter: char,
    pub normalization: NormalizationMode,
    /// Known skewed keys for a stand-alone join run.
    pub skewed_keys: Vec<String>,
    /// A previously written analysis to take the skewed keys from.
    pub profile: Option<PathBuf>,
    /// External analyzer whose JSON stdout replaces the built-in detector.
    pub analyzer: Option<ExternalCommand>,
}

impl Default for SkewConfig {
    fn default() -> Self {
        let detector = SkewDetector::default();
        Self {
            num_salts: DEFAULT_NUM_SALTS,
            threshold_factor: detector.threshold_factor,
            average_multiplier: detector.average_multiplier,
            key_delimiter: DEFAULT_SALT_DELIMITER,
            normalization: NormalizationMode::default(),
            skewed_keys: Vec::new(),
            profile: None,
            analyzer: None,
        }
    }
}

impl SkewConfig {
    pub fn validate(&self) -> Result<()> {
        self.num_salts()?;
        if !self.threshold_factor.is_finite() || self.threshold_factor < 0.0 {
            return Err(PipelineError::Config(format!(
                "skew.threshold_factor must be a non-negative number, got {}",
                self.threshold_factor
            )));
        }
        if !self.average_multiplier.is_finite() || self.average_multiplier <= 0.0 {
            return Err(PipelineError::Config(format!(
                "skew.average_multiplier must be positive, got {}",
                self.average_multiplier
            )));
        }
        Ok(())
    }

    pub fn num_salts(&self) -> Result<NonZeroUsize> {
        NonZeroUsize::new(self.num_salts)
            .ok_or_else(|| PipelineError::Config("skew.num_salts must be at least 1".to_string()))
    }

    pub fn detector(&self) -> SkewDetector {
        SkewDetector::new(self.threshold_factor, self.average_multiplier)
    }

    pub fn salter(&self, profile: &SkewProfile) -> Result<Salter> {
        Ok(Salter::from_profile(profile, self.num_salts()?).with_delimiter(self.key_delimiter))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobsConfig {
    #[serde(default = "JobConfig::cleansing")]
    pub cleansing: JobConfig,
    #[serde(default = "JobConfig::aggregation")]
    pub aggregation: JobConfig,
    #[serde(default = "JobConfig::trending")]
    pub trending: JobConfig,
    #[serde(default)]
    pub join: JoinJobConfig,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            cleansing: JobConfig::cleansing(),
            aggregation: JobConfig::aggregation(),
            trending: JobConfig::trending(),
            join: JoinJobConfig::default(),
        }
    }
}

impl JobsConfig {
    fn stage_specs(&self) -> Vec<(&'static str, &StageSpec)> {
        let mut specs = Vec::new();
        for (name, job) in [
            ("cleansing", &self.cleansing),
            ("aggregation", &self.aggregation),
            ("trending", &self.trending),
        ] {
            specs.push((name, &job.mapper));
            specs.extend(job.combiner.iter().map(|c| (name, c)));
            specs.push((name, &job.reducer));
        }
        specs.push(("join", &self.join.activity_mapper));
        specs.push(("join", &self.join.profile_mapper));
        specs.push(("join", &self.join.reducer));
        specs
    }
}

/// map → sort → [combine → sort] → reduce
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    pub mapper: StageSpec,
    #[serde(default)]
    pub combiner: Option<StageSpec>,
    pub reducer: StageSpec,
    #[serde(default)]
    pub settings: StageSettings,
}

impl JobConfig {
    fn scripts(mapper: &str, combiner: Option<&str>, reducer: &str) -> Self {
        Self {
            mapper: StageSpec::python(mapper),
            combiner: combiner.map(StageSpec::python),
            reducer: StageSpec::python(reducer),
            settings: StageSettings::default(),
        }
    }

    pub fn cleansing() -> Self {
        Self::scripts("cleansing_mapper.py", None, "cleansing_reducer.py")
    }

    pub fn aggregation() -> Self {
        Self::scripts(
            "action_aggregation_mapper.py",
            None,
            "action_aggregation_reducer.py",
        )
    }

    pub fn trending() -> Self {
        let mut job = Self::scripts(
            "trending_content_mapper.py",
            Some("trending_content_combiner.py"),
            "trending_content_reducer.py",
        );
        job.settings.trending_threshold = Some(DYNAMIC_TRENDING_THRESHOLD);
        job
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JoinJobConfig {
    pub activity_mapper: StageSpec,
    pub profile_mapper: StageSpec,
    pub reducer: StageSpec,
    pub settings: StageSettings,
}

impl Default for JoinJobConfig {
    fn default() -> Self {
        Self {
            activity_mapper: StageSpec::Builtin {
                name: BuiltinStage::ActivityMapper,
            },
            profile_mapper: StageSpec::Builtin {
                name: BuiltinStage::ProfileMapper,
            },
            reducer: StageSpec::Builtin {
                name: BuiltinStage::JoinReducer,
            },
            settings: StageSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageSpec {
    External(ExternalCommand),
    Builtin { name: BuiltinStage },
}

impl StageSpec {
    /// A stage script run by `python3` from the `src/` directory.
    pub fn python(script: &str) -> Self {
        StageSpec::External(ExternalCommand {
            program: "python3".to_string(),
            args: vec![format!("src/{script}")],
            env: BTreeMap::new(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinStage {
    ActivityMapper,
    ProfileMapper,
    JoinReducer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl ExternalCommand {
    pub fn to_process_command(&self, settings: &StageSettings) -> ProcessCommand {
        let mut command = ProcessCommand::new(&self.program, self.args.iter().cloned());
        command.env.extend(settings.to_env());
        command
            .env
            .extend(self.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        command
    }
}

/// Configuration handed to a stage when it is built.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageSettings {
    /// Filled in from the skew analysis at run time.
    #[serde(skip)]
    pub skewed_keys: Vec<String>,
    #[serde(skip)]
    pub num_salts: Option<usize>,
    pub trending_threshold: Option<f64>,
    pub trending_strategy: Option<String>,
    pub trending_value: Option<f64>,
    pub like_weight: Option<f64>,
    pub share_weight: Option<f64>,
    pub env: BTreeMap<String, String>,
}

impl StageSettings {
    pub fn with_skew(mut self, salter: &Salter) -> Self {
        self.skewed_keys = salter.skewed_keys().iter().cloned().collect();
        self.num_salts = Some(salter.num_salts());
        self
    }

    /// Environment form understood by the stage scripts.
    pub fn to_env(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        if let Some(num_salts) = self.num_salts {
            env.insert("skewed.keys".to_string(), self.skewed_keys.join(","));
            env.insert("skew.num_salts".to_string(), num_salts.to_string());
        }
        let numbers = [
            ("TRENDING_THRESHOLD", self.trending_threshold),
            ("TRENDING_VALUE", self.trending_value),
            ("LIKE_WEIGHT", self.like_weight),
            ("SHARE_WEIGHT", self.share_weight),
        ];
        for (name, value) in numbers {
            if let Some(value) = value {
                env.insert(name.to_string(), value.to_string());
            }
        }
        if let Some(strategy) = &self.trending_strategy {
            env.insert("TRENDING_STRATEGY".to_string(), strategy.clone());
        }
        env.extend(self.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        env
    }
}
