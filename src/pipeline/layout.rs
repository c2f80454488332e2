use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::error::{PipelineError, Result};

pub const SOCIAL_MEDIA_LOGS: &str = "social_media_logs.txt";
pub const USER_PROFILES: &str = "user_profiles.txt";
/// Activity input for a stand-alone join run.
pub const USER_ACTIVITY_INPUT: &str = "user_activity.txt";

pub const CLEANSED_DATA: &str = "cleansed_data.txt";
pub const USER_ACTIVITY: &str = "user_activity.txt";
pub const TRENDING_CONTENT: &str = "trending_content.txt";
pub const JOINED_DATA: &str = "joined_data.txt";
pub const SKEW_ANALYSIS: &str = "skew_analysis.json";

/// Where each job reads from and writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl Layout {
    pub fn new(input_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
        }
    }

    pub fn input(&self, name: &str) -> PathBuf {
        self.input_dir.join(name)
    }

    pub fn output(&self, name: &str) -> PathBuf {
        self.output_dir.join(name)
    }

    pub async fn ensure_output_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|source| PipelineError::WriteOutput {
                path: self.output_dir.clone(),
                source,
            })
    }
}

/// Read a job input. A directory is merged: every regular file in it, in
/// name order, concatenated with line boundaries preserved.
pub async fn read_input(path: &Path) -> Result<String> {
    let read_err = |source| PipelineError::ReadInput {
        path: path.to_path_buf(),
        source,
    };

    let metadata = match fs::metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(PipelineError::MissingInput {
                path: path.to_path_buf(),
            })
        }
        Err(e) => return Err(read_err(e)),
    };

    if !metadata.is_dir() {
        return fs::read_to_string(path).await.map_err(read_err);
    }

    let mut files = Vec::new();
    let mut entries = fs::read_dir(path).await.map_err(read_err)?;
    while let Some(entry) = entries.next_entry().await.map_err(read_err)? {
        if entry.file_type().await.map_err(read_err)?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();

    let mut merged = String::new();
    for file in &files {
        let content = fs::read_to_string(file)
            .await
            .map_err(|source| PipelineError::ReadInput {
                path: file.clone(),
                source,
            })?;
        merged.push_str(&content);
        if !content.is_empty() && !content.ends_with('\n') {
            merged.push('\n');
        }
    }
    debug!(
        "Merged {} files from {} ({} bytes)",
        files.len(),
        path.display(),
        merged.len()
    );
    Ok(merged)
}

pub async fn write_output(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents)
        .await
        .map_err(|source| PipelineError::WriteOutput {
            path: path.to_path_buf(),
            source,
        })
}
