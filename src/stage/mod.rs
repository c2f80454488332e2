//! Stage runner.
//!
//! A stage turns one text buffer into another. External stages pipe the
//! buffer through a child process; built-in stages implement the join-side
//! map and reduce steps in process. Either way the caller sees a
//! [`StageOutput`]: the primary output plus whatever the stage reported on
//! its error channel.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::config::{BuiltinStage, StageSettings, StageSpec};
use crate::skew::{KeyNormalizer, Salter};
use crate::subprocess::{ExitStatus, ProcessError, ProcessRunner};

pub mod builtin;
pub mod external;

pub use builtin::{ActivityMapStage, JoinReduceStage, ProfileMapStage};
pub use external::ExternalStage;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageOutput {
    pub stdout: String,
    pub diagnostics: Vec<String>,
}

#[derive(Error, Debug)]
pub enum StageError {
    #[error("stage '{stage}' could not be started: {source}")]
    Spawn {
        stage: String,
        #[source]
        source: ProcessError,
    },

    #[error("stage '{stage}' failed with {status}{}", stderr_suffix(.stderr))]
    Failed {
        stage: String,
        status: ExitStatus,
        stderr: String,
    },
}

fn stderr_suffix(stderr: &str) -> String {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {stderr}")
    }
}

#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, input: &str) -> Result<StageOutput, StageError>;
}

/// Everything needed to turn a [`StageSpec`] into a runnable stage.
#[derive(Clone)]
pub struct StageContext {
    pub runner: Arc<dyn ProcessRunner>,
    pub salter: Salter,
    pub normalizer: KeyNormalizer,
    pub settings: StageSettings,
}

impl StageContext {
    /// A context with no skew handling: keys pass through untouched.
    pub fn plain(runner: Arc<dyn ProcessRunner>, settings: StageSettings) -> Self {
        Self {
            runner,
            salter: Salter::disabled(),
            normalizer: KeyNormalizer::Identity,
            settings,
        }
    }
}

pub fn build_stage(label: &str, spec: &StageSpec, ctx: &StageContext) -> Arc<dyn Stage> {
    match spec {
        StageSpec::External(command) => Arc::new(ExternalStage::new(
            label,
            command.to_process_command(&ctx.settings),
            Arc::clone(&ctx.runner),
        )),
        StageSpec::Builtin { name } => match name {
            BuiltinStage::ActivityMapper => Arc::new(ActivityMapStage::new(ctx.salter.clone())),
            BuiltinStage::ProfileMapper => Arc::new(ProfileMapStage::new(ctx.salter.clone())),
            BuiltinStage::JoinReducer => Arc::new(JoinReduceStage::new(ctx.normalizer.clone())),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExternalCommand;
    use crate::subprocess::MockProcessRunner;
    use std::collections::BTreeMap;
    use std::num::NonZeroUsize;

    fn context(runner: MockProcessRunner) -> StageContext {
        let salter = Salter::new(["hot"], NonZeroUsize::new(2).unwrap());
        StageContext {
            runner: Arc::new(runner),
            normalizer: salter.normalizer(),
            settings: StageSettings::default().with_skew(&salter),
            salter,
        }
    }

    #[tokio::test]
    async fn test_build_external_stage_passes_settings() {
        let runner = MockProcessRunner::new();
        runner.expect_command("python3").echoes_stdin().finish();
        let spec = StageSpec::External(ExternalCommand {
            program: "python3".to_string(),
            args: vec!["src/m.py".to_string()],
            env: BTreeMap::new(),
        });

        let stage = build_stage("join activity mapper", &spec, &context(runner.clone()));
        assert_eq!(stage.name(), "join activity mapper");
        let output = stage.run("a\tb\n").await.unwrap();
        assert_eq!(output.stdout, "a\tb\n");

        let call = &runner.get_call_history()[0];
        assert_eq!(call.env["skewed.keys"], "hot");
        assert_eq!(call.env["skew.num_salts"], "2");
    }

    #[tokio::test]
    async fn test_build_builtin_stages_share_salter() {
        let ctx = context(MockProcessRunner::new());
        let activity = build_stage(
            "activity",
            &StageSpec::Builtin {
                name: BuiltinStage::ActivityMapper,
            },
            &ctx,
        );
        let profile = build_stage(
            "profile",
            &StageSpec::Builtin {
                name: BuiltinStage::ProfileMapper,
            },
            &ctx,
        );

        let a = activity.run("hot\tposts:1\n").await.unwrap();
        let p = profile.run("hot,Ann,Oslo\n").await.unwrap();
        assert_eq!(a.stdout.lines().count(), 2);
        assert_eq!(p.stdout.lines().count(), 2);
    }

    #[test]
    fn test_failed_error_message() {
        let err = StageError::Failed {
            stage: "reducer".to_string(),
            status: ExitStatus::Error(2),
            stderr: "boom\n".to_string(),
        };
        assert_eq!(err.to_string(), "stage 'reducer' failed with exit code 2: boom");

        let quiet = StageError::Failed {
            stage: "reducer".to_string(),
            status: ExitStatus::Signal(9),
            stderr: String::new(),
        };
        assert_eq!(quiet.to_string(), "stage 'reducer' failed with signal 9");
    }
}
