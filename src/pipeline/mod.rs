//! Pipeline orchestrator.
//!
//! Composes stages into the named jobs and sequences them. Jobs hand data to
//! each other through files in the output directory, so every job can also
//! be run on its own against the input directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::{JobConfig, PipelineConfig, StageSettings, DYNAMIC_TRENDING_THRESHOLD};
use crate::error::Result;
use crate::skew::{Salter, SkewProfile};
use crate::stage::StageContext;
use crate::subprocess::ProcessRunner;

pub mod job;
pub mod layout;

pub use job::{JobName, JobOutput, JoinJob, SingleInputJob};
pub use layout::{read_input, write_output, Layout};

#[derive(Debug, Clone)]
pub struct JobReport {
    pub job: JobName,
    pub output: PathBuf,
    pub records: usize,
    pub diagnostics: usize,
    pub duration: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    pub jobs: Vec<JobReport>,
    /// Set when a skew analysis ran as part of this invocation.
    pub skew: Option<SkewProfile>,
    pub skew_artifact: Option<PathBuf>,
    pub duration: Duration,
}

impl PipelineReport {
    /// Every file this run wrote, in job order.
    pub fn generated_files(&self) -> Vec<(String, &Path)> {
        let mut files: Vec<(String, &Path)> = self
            .jobs
            .iter()
            .map(|report| (report.job.to_string(), report.output.as_path()))
            .collect();
        if let Some(path) = &self.skew_artifact {
            files.push(("skew analysis".to_string(), path.as_path()));
        }
        files
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    runner: Arc<dyn ProcessRunner>,
    layout: Layout,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, runner: Arc<dyn ProcessRunner>) -> Self {
        let layout = Layout::new(&config.input_dir, &config.output_dir);
        Self {
            config,
            runner,
            layout,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub async fn run(&self, job: JobName) -> Result<PipelineReport> {
        let started = Instant::now();
        self.config.validate()?;
        self.layout.ensure_output_dir().await?;
        info!(
            "Running job '{}' ({} -> {})",
            job,
            self.layout.input_dir.display(),
            self.layout.output_dir.display()
        );

        let mut report = PipelineReport::default();
        let paths = &self.layout;
        match job {
            JobName::Cleansing => {
                report.jobs.push(self.run_cleansing().await?);
            }
            JobName::Aggregation => {
                report.jobs.push(self.run_aggregation(&paths.input_dir).await?);
            }
            JobName::Trending => {
                report.jobs.push(self.run_trending(&paths.input_dir).await?);
            }
            JobName::Join => {
                let profile = self.configured_profile().await;
                let activity = paths.input(layout::USER_ACTIVITY_INPUT);
                report.jobs.push(self.run_join(&activity, &profile).await?);
            }
            JobName::All => {
                let cleansing = self.run_cleansing().await?;
                let cleansed = cleansing.output.clone();
                report.jobs.push(cleansing);

                let aggregation = self.run_aggregation(&cleansed).await?;
                let activity = aggregation.output.clone();
                report.jobs.push(aggregation);

                let profile = self.detect_skew(&activity).await?;
                report.skew_artifact = Some(self.layout.output(layout::SKEW_ANALYSIS));

                report.jobs.push(self.run_trending(&cleansed).await?);
                report.jobs.push(self.run_join(&activity, &profile).await?);
                report.skew = Some(profile);
            }
        }

        report.duration = started.elapsed();
        info!("Workflow completed in {:.2?}", report.duration);
        Ok(report)
    }

    async fn run_cleansing(&self) -> Result<JobReport> {
        let input = self.layout.input(layout::SOCIAL_MEDIA_LOGS);
        self.run_single(
            JobName::Cleansing,
            &self.config.jobs.cleansing,
            &input,
            layout::CLEANSED_DATA,
        )
        .await
    }

    async fn run_aggregation(&self, input: &Path) -> Result<JobReport> {
        self.run_single(
            JobName::Aggregation,
            &self.config.jobs.aggregation,
            input,
            layout::USER_ACTIVITY,
        )
        .await
    }

    async fn run_trending(&self, input: &Path) -> Result<JobReport> {
        let mut config = self.config.jobs.trending.clone();
        config
            .settings
            .trending_threshold
            .get_or_insert(DYNAMIC_TRENDING_THRESHOLD);
        self.run_single(
            JobName::Trending,
            &config,
            input,
            layout::TRENDING_CONTENT,
        )
        .await
    }

    async fn run_single(
        &self,
        name: JobName,
        config: &JobConfig,
        input: &Path,
        output_name: &str,
    ) -> Result<JobReport> {
        info!("Starting job: {output_name}");
        let text = read_input(input).await?;
        let ctx = StageContext::plain(Arc::clone(&self.runner), config.settings.clone());
        let output = SingleInputJob::from_config(name, config, &ctx)
            .execute(&text)
            .await?;
        self.finish_job(name, output_name, output).await
    }

    async fn run_join(&self, activity: &Path, profile: &SkewProfile) -> Result<JobReport> {
        info!("Starting job: {}", layout::JOINED_DATA);
        let activity_text = read_input(activity).await?;
        let profile_text = read_input(&self.layout.input(layout::USER_PROFILES)).await?;

        let salter = self.config.skew.salter(profile)?;
        if salter.is_enabled() {
            info!(
                "Salting {} skewed keys into {} partitions each",
                salter.skewed_keys().len(),
                salter.num_salts()
            );
        }
        let ctx = self.join_context(salter);
        let output = JoinJob::from_config(&self.config.jobs.join, &ctx)
            .execute(&activity_text, &profile_text)
            .await?;
        self.finish_job(JobName::Join, layout::JOINED_DATA, output).await
    }

    fn join_context(&self, salter: Salter) -> StageContext {
        let settings: StageSettings = self.config.jobs.join.settings.clone().with_skew(&salter);
        StageContext {
            runner: Arc::clone(&self.runner),
            normalizer: self.config.skew.normalization.normalizer_for(&salter),
            salter,
            settings,
        }
    }

    async fn finish_job(
        &self,
        name: JobName,
        output_name: &str,
        output: JobOutput,
    ) -> Result<JobReport> {
        let path = self.layout.output(output_name);
        write_output(&path, &output.text).await?;
        if !output.diagnostics.is_empty() {
            warn!(
                "[{name}] {} records reported as malformed",
                output.diagnostics.len()
            );
        }
        Ok(JobReport {
            job: name,
            output: path,
            records: output.records,
            diagnostics: output.diagnostics.len(),
            duration: output.duration,
        })
    }

    /// Analyze the activity dataset and write `skew_analysis.json`.
    ///
    /// An external analyzer that fails or prints something unparseable
    /// yields an empty profile; the join then runs unsalted.
    pub async fn detect_skew(&self, activity: &Path) -> Result<SkewProfile> {
        info!("Running skew analysis on {}", activity.display());
        let text = read_input(activity).await?;
        let artifact = self.layout.output(layout::SKEW_ANALYSIS);

        let (profile, raw) = match &self.config.skew.analyzer {
            Some(analyzer) => {
                let command = analyzer
                    .to_process_command(&StageSettings::default())
                    .with_stdin(text);
                match self.runner.run(command).await {
                    Ok(output) if output.status.success() => {
                        (SkewProfile::parse_lenient(&output.stdout), output.stdout)
                    }
                    Ok(output) => {
                        warn!(
                            "Skew analyzer failed with {}; continuing without skewed keys",
                            output.status
                        );
                        (SkewProfile::empty(), output.stdout)
                    }
                    Err(e) => {
                        warn!("Skew analyzer could not run: {e}; continuing without skewed keys");
                        (SkewProfile::empty(), String::new())
                    }
                }
            }
            None => {
                let profile = self.config.skew.detector().analyze_text(&text);
                let raw = match profile.to_json_pretty() {
                    Ok(json) => json,
                    Err(e) => {
                        warn!("Could not serialize skew analysis: {e}");
                        String::new()
                    }
                };
                (profile, raw)
            }
        };

        write_output(&artifact, &raw).await?;
        if profile.has_skew() {
            info!("Skewed keys: {}", profile.key_list());
        } else {
            info!("No skewed keys detected");
        }
        Ok(profile)
    }

    /// Skewed keys for a stand-alone join. An explicit key list (file,
    /// `MRPIPE_SKEWED_KEYS` or `--skewed-keys`) wins over a saved analysis.
    pub async fn configured_profile(&self) -> SkewProfile {
        let skew = &self.config.skew;
        if !skew.skewed_keys.is_empty() {
            match &skew.profile {
                Some(path) => info!(
                    "Using configured skewed keys; ignoring saved analysis {}",
                    path.display()
                ),
                None => debug!("Using configured skewed keys"),
            }
            return SkewProfile::from_keys(skew.skewed_keys.iter().cloned());
        }
        match &skew.profile {
            Some(path) => {
                info!("Loading skewed keys from {}", path.display());
                SkewProfile::from_file(path).await
            }
            None => SkewProfile::empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExternalCommand, StageSpec};
    use crate::subprocess::MockProcessRunner;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn external(program: &str) -> StageSpec {
        StageSpec::External(ExternalCommand {
            program: program.to_string(),
            args: Vec::new(),
            env: BTreeMap::new(),
        })
    }

    fn echo_job() -> JobConfig {
        JobConfig {
            mapper: external("cat"),
            combiner: None,
            reducer: external("cat"),
            settings: StageSettings::default(),
        }
    }

    fn setup(files: &[(&str, &str)]) -> (TempDir, PipelineConfig) {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("data");
        std::fs::create_dir(&input).unwrap();
        for (name, content) in files {
            std::fs::write(input.join(name), content).unwrap();
        }
        let mut config = PipelineConfig {
            input_dir: input,
            output_dir: dir.path().join("output"),
            ..PipelineConfig::default()
        };
        config.jobs.cleansing = echo_job();
        config.jobs.aggregation = echo_job();
        config.jobs.trending = echo_job();
        (dir, config)
    }

    fn echo_runner() -> MockProcessRunner {
        let runner = MockProcessRunner::new();
        runner.expect_command("cat").echoes_stdin().finish();
        runner
    }

    #[tokio::test]
    async fn test_cleansing_writes_sorted_output() {
        let (_dir, config) = setup(&[(layout::SOCIAL_MEDIA_LOGS, "b\t2\na\t1\n")]);
        let pipeline = Pipeline::new(config, Arc::new(echo_runner()));

        let report = pipeline.run(JobName::Cleansing).await.unwrap();
        let output = std::fs::read_to_string(&report.jobs[0].output).unwrap();
        assert_eq!(output, "a\t1\nb\t2\n");
        assert!(report.skew.is_none());
    }

    #[tokio::test]
    async fn test_standalone_join_uses_configured_keys() {
        let (_dir, mut config) = setup(&[
            (layout::USER_ACTIVITY_INPUT, "hot\tposts:9\ncold\tposts:1\n"),
            (layout::USER_PROFILES, "hot,Max,Rome\ncold,Ann,Oslo\n"),
        ]);
        config.skew.skewed_keys = vec!["hot".to_string()];
        config.skew.num_salts = 4;
        let pipeline = Pipeline::new(config, Arc::new(MockProcessRunner::new()));

        let report = pipeline.run(JobName::Join).await.unwrap();
        let joined = std::fs::read_to_string(&report.jobs[0].output).unwrap();
        assert_eq!(
            joined,
            "cold\tcold,Ann,Oslo\tposts:1\nhot\thot,Max,Rome\tposts:9\n"
        );
        assert_eq!(report.jobs[0].records, 2);
    }

    #[tokio::test]
    async fn test_configured_keys_win_over_saved_analysis() {
        let (dir, mut config) = setup(&[]);
        let saved = dir.path().join("skew_analysis.json");
        std::fs::write(&saved, r#"{"skewed_keys": ["old"]}"#).unwrap();
        config.skew.profile = Some(saved);
        config.skew.skewed_keys = vec!["hot".to_string()];

        let pipeline = Pipeline::new(config, Arc::new(MockProcessRunner::new()));
        let profile = pipeline.configured_profile().await;
        assert!(profile.is_skewed("hot"));
        assert!(!profile.is_skewed("old"));
    }

    #[tokio::test]
    async fn test_saved_analysis_used_without_configured_keys() {
        let (dir, mut config) = setup(&[]);
        let saved = dir.path().join("skew_analysis.json");
        std::fs::write(&saved, r#"{"skewed_keys": ["old"]}"#).unwrap();
        config.skew.profile = Some(saved);

        let pipeline = Pipeline::new(config, Arc::new(MockProcessRunner::new()));
        assert!(pipeline.configured_profile().await.is_skewed("old"));
    }

    #[tokio::test]
    async fn test_all_runs_every_job_in_order() {
        let mut activity = String::new();
        for _ in 0..30 {
            activity.push_str("hot\tposts:1\n");
        }
        for i in 0..20 {
            activity.push_str(&format!("u{i:02}\tposts:2\n"));
        }
        let (_dir, config) = setup(&[
            (layout::SOCIAL_MEDIA_LOGS, &activity),
            (layout::USER_PROFILES, "hot,Max,Rome\nu00,Ann,Oslo\n"),
        ]);
        let pipeline = Pipeline::new(config, Arc::new(echo_runner()));

        let report = pipeline.run(JobName::All).await.unwrap();
        let jobs: Vec<JobName> = report.jobs.iter().map(|r| r.job).collect();
        assert_eq!(
            jobs,
            vec![
                JobName::Cleansing,
                JobName::Aggregation,
                JobName::Trending,
                JobName::Join
            ]
        );

        let profile = report.skew.as_ref().unwrap();
        assert!(profile.is_skewed("hot"));
        let artifact = pipeline.layout().output(layout::SKEW_ANALYSIS);
        let saved = SkewProfile::from_file(&artifact).await;
        assert_eq!(saved.skewed_keys, profile.skewed_keys);

        let joined = std::fs::read_to_string(pipeline.layout().output(layout::JOINED_DATA)).unwrap();
        assert_eq!(
            joined,
            "hot\thot,Max,Rome\tposts:1\nu00\tu00,Ann,Oslo\tposts:2\n"
        );
        assert_eq!(report.generated_files().len(), 5);
    }

    #[tokio::test]
    async fn test_all_halts_on_first_failure() {
        let (_dir, mut config) = setup(&[(layout::SOCIAL_MEDIA_LOGS, "a\t1\n")]);
        config.jobs.aggregation.reducer = external("fail");
        let runner = echo_runner();
        runner.expect_command("fail").returns_exit_code(1).finish();
        let pipeline = Pipeline::new(config, Arc::new(runner));

        let err = pipeline.run(JobName::All).await.unwrap_err();
        assert!(err.to_string().contains("aggregation"));
        assert!(pipeline.layout().output(layout::CLEANSED_DATA).exists());
        assert!(!pipeline.layout().output(layout::TRENDING_CONTENT).exists());
        assert!(!pipeline.layout().output(layout::JOINED_DATA).exists());
    }

    #[tokio::test]
    async fn test_unparseable_analyzer_output_degrades() {
        let (_dir, mut config) = setup(&[
            (layout::SOCIAL_MEDIA_LOGS, "u1\tposts:1\n"),
            (layout::USER_PROFILES, "u1,Ann,Oslo\n"),
        ]);
        config.skew.analyzer = Some(ExternalCommand {
            program: "analyzer".to_string(),
            args: Vec::new(),
            env: BTreeMap::new(),
        });
        let runner = echo_runner();
        runner
            .expect_command("analyzer")
            .returns_stdout("not json")
            .finish();
        let pipeline = Pipeline::new(config, Arc::new(runner));

        let report = pipeline.run(JobName::All).await.unwrap();
        assert!(!report.skew.unwrap().has_skew());
        assert_eq!(report.jobs.last().unwrap().records, 1);
        let artifact = pipeline.layout().output(layout::SKEW_ANALYSIS);
        assert_eq!(std::fs::read_to_string(artifact).unwrap(), "not json");
    }

    #[tokio::test]
    async fn test_analyzer_result_drives_salting() {
        let (_dir, mut config) = setup(&[
            (layout::SOCIAL_MEDIA_LOGS, "u1\tposts:1\n"),
            (layout::USER_PROFILES, "u1,Ann,Oslo\n"),
        ]);
        config.skew.analyzer = Some(ExternalCommand {
            program: "analyzer".to_string(),
            args: vec!["src/skew_detection.py".to_string()],
            env: BTreeMap::new(),
        });
        config.jobs.join.activity_mapper = external("activity-mapper");
        let runner = echo_runner();
        runner
            .expect_command("analyzer")
            .returns_stdout(r#"{"skewed_keys": ["u1"]}"#)
            .finish();
        runner
            .expect_command("activity-mapper")
            .returns_stdout("u1_0\tA:posts:1\n")
            .finish();
        let pipeline = Pipeline::new(config, Arc::new(runner.clone()));

        let report = pipeline.run(JobName::All).await.unwrap();
        assert_eq!(report.jobs.last().unwrap().records, 1);

        let call = runner
            .get_call_history()
            .into_iter()
            .find(|c| c.program == "activity-mapper")
            .unwrap();
        assert_eq!(call.env["skewed.keys"], "u1");
        assert_eq!(call.env["skew.num_salts"], "10");
    }

    #[tokio::test]
    async fn test_missing_input_fails() {
        let (_dir, config) = setup(&[]);
        let pipeline = Pipeline::new(config, Arc::new(echo_runner()));
        let err = pipeline.run(JobName::Cleansing).await.unwrap_err();
        assert!(matches!(err, crate::error::PipelineError::MissingInput { .. }));
    }
}
