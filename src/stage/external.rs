use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{Stage, StageError, StageOutput};
use crate::subprocess::{ProcessCommand, ProcessRunner};

/// A stage backed by an external program: input on stdin, records on
/// stdout, diagnostics on stderr.
pub struct ExternalStage {
    name: String,
    command: ProcessCommand,
    runner: Arc<dyn ProcessRunner>,
}

impl ExternalStage {
    pub fn new(name: &str, command: ProcessCommand, runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            name: name.to_string(),
            command,
            runner,
        }
    }

    pub fn command(&self) -> &ProcessCommand {
        &self.command
    }
}

#[async_trait]
impl Stage for ExternalStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, input: &str) -> Result<StageOutput, StageError> {
        debug!(
            "Running {} ({}) on {} bytes",
            self.name,
            self.command.display(),
            input.len()
        );
        let command = self.command.clone().with_stdin(input);

        let output = self
            .runner
            .run(command)
            .await
            .map_err(|source| StageError::Spawn {
                stage: self.name.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(StageError::Failed {
                stage: self.name.clone(),
                status: output.status,
                stderr: output.stderr,
            });
        }

        let diagnostics: Vec<String> = output
            .stderr
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(str::to_string)
            .collect();
        for line in &diagnostics {
            warn!("{}: {}", self.name, line);
        }

        Ok(StageOutput {
            stdout: output.stdout,
            diagnostics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subprocess::{ExitStatus, MockProcessRunner, ProcessError, TokioProcessRunner};

    fn stage(runner: MockProcessRunner, program: &str) -> ExternalStage {
        ExternalStage::new(
            "mapper",
            ProcessCommand::new(program, ["script.py"]),
            Arc::new(runner),
        )
    }

    #[tokio::test]
    async fn test_stdout_and_diagnostics() {
        let runner = MockProcessRunner::new();
        runner
            .expect_command("python3")
            .returns_stdout("k\t1\n")
            .returns_stderr("MAPPER_ERROR: bad line\n\n")
            .finish();

        let output = stage(runner.clone(), "python3").run("raw\n").await.unwrap();
        assert_eq!(output.stdout, "k\t1\n");
        assert_eq!(output.diagnostics, vec!["MAPPER_ERROR: bad line"]);

        let history = runner.get_call_history();
        assert_eq!(history[0].stdin.as_deref(), Some("raw\n"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_fails() {
        let runner = MockProcessRunner::new();
        runner
            .expect_command("python3")
            .returns_stderr("Traceback")
            .returns_exit_code(1)
            .finish();

        match stage(runner, "python3").run("x\n").await {
            Err(StageError::Failed { stage, status, stderr }) => {
                assert_eq!(stage, "mapper");
                assert_eq!(status, ExitStatus::Error(1));
                assert_eq!(stderr, "Traceback");
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_output_is_success() {
        let runner = MockProcessRunner::new();
        runner.expect_command("python3").finish();

        let output = stage(runner, "python3").run("x\n").await.unwrap();
        assert!(output.stdout.is_empty());
        assert!(output.diagnostics.is_empty());
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let stage = ExternalStage::new(
            "reducer",
            ProcessCommand::new("mrpipe-no-such-program", Vec::<String>::new()),
            Arc::new(TokioProcessRunner),
        );
        match stage.run("x\n").await {
            Err(StageError::Spawn {
                source: ProcessError::CommandNotFound(program),
                ..
            }) => assert_eq!(program, "mrpipe-no-such-program"),
            other => panic!("expected spawn error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_real_process_pipeline_stage() {
        let stage = ExternalStage::new(
            "upper",
            ProcessCommand::new("tr", ["a-z", "A-Z"]),
            Arc::new(TokioProcessRunner),
        );
        let output = stage.run("ab\tc\n").await.unwrap();
        assert_eq!(output.stdout, "AB\tC\n");
    }
}
