use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use super::error::ProcessError;

/// A fully-described invocation of an external program.
#[derive(Debug, Clone, Default)]
pub struct ProcessCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Added on top of the inherited environment; these take precedence.
    pub env: HashMap<String, String>,
    pub working_dir: Option<PathBuf>,
    pub stdin: Option<String>,
}

impl ProcessCommand {
    pub fn new<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    Error(i32),
    Signal(i32),
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Success)
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            ExitStatus::Success => Some(0),
            ExitStatus::Error(code) => Some(*code),
            ExitStatus::Signal(_) => None,
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Success => write!(f, "exit code 0"),
            ExitStatus::Error(code) => write!(f, "exit code {code}"),
            ExitStatus::Signal(signal) => write!(f, "signal {signal}"),
        }
    }
}

#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, command: ProcessCommand) -> Result<ProcessOutput, ProcessError>;
}

pub struct TokioProcessRunner;

impl TokioProcessRunner {
    fn log_command_start(command: &ProcessCommand) {
        tracing::debug!("Executing subprocess: {}", command.display());

        if !command.env.is_empty() {
            tracing::trace!("Environment overrides: {:?}", command.env);
        }

        if let Some(ref dir) = command.working_dir {
            tracing::trace!("Working directory: {:?}", dir);
        }

        if let Some(ref stdin) = command.stdin {
            tracing::trace!("Stdin provided: {} bytes", stdin.len());
        }
    }

    fn configure_command(command: &ProcessCommand) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&command.program);
        cmd.args(&command.args);

        for (key, value) in &command.env {
            cmd.env(key, value);
        }

        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }

        if command.stdin.is_some() {
            cmd.stdin(std::process::Stdio::piped());
        } else {
            cmd.stdin(std::process::Stdio::null());
        }
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        cmd.kill_on_drop(true);
        cmd
    }

    /// Feed stdin from a separate task so a child that writes before it has
    /// drained its input cannot deadlock against a full pipe.
    fn spawn_stdin_writer(
        child: &mut tokio::process::Child,
        stdin_data: Option<String>,
    ) -> Option<tokio::task::JoinHandle<std::io::Result<()>>> {
        let data = stdin_data?;
        let mut stdin = child.stdin.take()?;
        Some(tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            stdin.write_all(data.as_bytes()).await?;
            stdin.shutdown().await
        }))
    }

    async fn join_stdin_writer(
        writer: Option<tokio::task::JoinHandle<std::io::Result<()>>>,
        program: &str,
    ) -> Result<(), ProcessError> {
        let Some(writer) = writer else {
            return Ok(());
        };
        match writer.await {
            Ok(Ok(())) => Ok(()),
            // The child may legitimately exit before consuming all of its input.
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                tracing::debug!("'{}' closed stdin before reading all input", program);
                Ok(())
            }
            Ok(Err(e)) => Err(ProcessError::Io(e)),
            Err(e) => Err(ProcessError::InternalError {
                message: format!("stdin writer for '{program}' panicked: {e}"),
            }),
        }
    }

    fn parse_exit_status(status: std::process::ExitStatus) -> ExitStatus {
        if status.success() {
            ExitStatus::Success
        } else if let Some(code) = status.code() {
            ExitStatus::Error(code)
        } else {
            Self::parse_signal_status(status)
        }
    }

    #[cfg(unix)]
    fn parse_signal_status(status: std::process::ExitStatus) -> ExitStatus {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            ExitStatus::Signal(signal)
        } else {
            ExitStatus::Error(1)
        }
    }

    #[cfg(not(unix))]
    fn parse_signal_status(_status: std::process::ExitStatus) -> ExitStatus {
        ExitStatus::Error(1)
    }

    fn log_result(result: &ProcessOutput, command: &ProcessCommand) {
        let command_str = command.display();

        match &result.status {
            ExitStatus::Success => {
                tracing::debug!(
                    "Subprocess completed successfully in {:?}: {}",
                    result.duration,
                    command_str
                );
                tracing::trace!("Stdout length: {} bytes", result.stdout.len());
                tracing::trace!("Stderr length: {} bytes", result.stderr.len());
            }
            ExitStatus::Error(code) => {
                tracing::debug!(
                    "Subprocess failed with exit code {} in {:?}: {}",
                    code,
                    result.duration,
                    command_str
                );
            }
            ExitStatus::Signal(signal) => {
                tracing::warn!(
                    "Subprocess terminated by signal {} in {:?}: {}",
                    signal,
                    result.duration,
                    command_str
                );
            }
        }
    }

    fn map_spawn_error(error: std::io::Error, command: &ProcessCommand) -> ProcessError {
        if error.kind() == std::io::ErrorKind::NotFound {
            ProcessError::CommandNotFound(command.program.clone())
        } else {
            tracing::error!("Failed to spawn '{}': {:?}", command.program, error);
            ProcessError::SpawnFailed {
                command: command.display(),
                source: error,
            }
        }
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, command: ProcessCommand) -> Result<ProcessOutput, ProcessError> {
        let start = Instant::now();
        Self::log_command_start(&command);

        let mut cmd = Self::configure_command(&command);
        let mut child = cmd
            .spawn()
            .map_err(|e| Self::map_spawn_error(e, &command))?;

        let writer = Self::spawn_stdin_writer(&mut child, command.stdin.clone());
        let output = child.wait_with_output().await?;
        Self::join_stdin_writer(writer, &command.program).await?;

        let result = ProcessOutput {
            status: Self::parse_exit_status(output.status),
            stdout: decode_output(output.stdout, &command.program, "stdout"),
            stderr: decode_output(output.stderr, &command.program, "stderr"),
            duration: start.elapsed(),
        };

        Self::log_result(&result, &command);
        Ok(result)
    }
}

/// Captured output is expected to be UTF-8; invalid bytes are replaced and
/// reported.
fn decode_output(bytes: Vec<u8>, program: &str, stream: &str) -> String {
    String::from_utf8(bytes).unwrap_or_else(|e| {
        tracing::warn!(
            "'{}' wrote invalid UTF-8 to {} at byte {}; replacing invalid sequences",
            program,
            stream,
            e.utf8_error().valid_up_to()
        );
        String::from_utf8_lossy(e.as_bytes()).into_owned()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_output() {
        assert_eq!(decode_output(b"ok\n".to_vec(), "cat", "stdout"), "ok\n");
        assert_eq!(
            decode_output(b"a\xffb".to_vec(), "cat", "stdout"),
            "a\u{FFFD}b"
        );
    }

    #[test]
    fn test_exit_status_display() {
        assert_eq!(ExitStatus::Success.to_string(), "exit code 0");
        assert_eq!(ExitStatus::Error(3).to_string(), "exit code 3");
        assert_eq!(ExitStatus::Signal(9).to_string(), "signal 9");
    }

    #[test]
    fn test_exit_status_code() {
        assert_eq!(ExitStatus::Success.code(), Some(0));
        assert_eq!(ExitStatus::Error(2).code(), Some(2));
        assert_eq!(ExitStatus::Signal(15).code(), None);
        assert!(!ExitStatus::Signal(15).success());
    }

    #[test]
    fn test_command_display() {
        let command = ProcessCommand::new("python3", ["src/cleansing_mapper.py"]);
        assert_eq!(command.display(), "python3 src/cleansing_mapper.py");
        assert_eq!(ProcessCommand::new("cat", Vec::<String>::new()).display(), "cat");
    }

    #[cfg(unix)]
    #[test]
    fn test_parse_exit_status() {
        use std::os::unix::process::ExitStatusExt;

        let status = std::process::ExitStatus::from_raw(0);
        assert_eq!(TokioProcessRunner::parse_exit_status(status), ExitStatus::Success);

        // Exit code 1
        let status = std::process::ExitStatus::from_raw(256);
        assert_eq!(TokioProcessRunner::parse_exit_status(status), ExitStatus::Error(1));

        // Killed by SIGKILL
        let status = std::process::ExitStatus::from_raw(9);
        assert_eq!(TokioProcessRunner::parse_exit_status(status), ExitStatus::Signal(9));
    }
}
