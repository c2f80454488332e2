use std::path::PathBuf;
use thiserror::Error;

use crate::stage::StageError;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Job '{job}' failed: {source}")]
    Stage {
        job: String,
        #[source]
        source: StageError,
    },

    #[error("Input not found: {}", .path.display())]
    MissingInput { path: PathBuf },

    #[error("Failed to read input {}: {source}", .path.display())]
    ReadInput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write output {}: {source}", .path.display())]
    WriteOutput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    pub fn stage(job: impl Into<String>, source: StageError) -> Self {
        PipelineError::Stage {
            job: job.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
