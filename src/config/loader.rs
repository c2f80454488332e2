use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use super::PipelineConfig;

/// Looked up in the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "mrpipe.toml";

/// Load the configuration: defaults, then the TOML file, then `MRPIPE_*`
/// environment overrides. An explicit path must exist; the default file is
/// optional. Validation is left to the caller, after any CLI overrides.
pub async fn load_config(explicit: Option<&Path>) -> Result<PipelineConfig> {
    let path = match explicit {
        Some(path) => {
            if !path.exists() {
                return Err(anyhow!("Configuration file not found: {}", path.display()));
            }
            Some(path.to_path_buf())
        }
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG_FILE);
            default.exists().then_some(default)
        }
    };

    let mut config = match path {
        Some(path) => {
            debug!("Loading configuration from {}", path.display());
            let content = fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            PipelineConfig::from_toml_str(&content)
                .with_context(|| format!("Invalid configuration in {}", path.display()))?
        }
        None => PipelineConfig::default(),
    };

    config.merge_env_vars();
    Ok(config)
}

impl PipelineConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn merge_env_vars(&mut self) {
        self.merge_env_from(|name| std::env::var(name).ok());
    }

    pub fn merge_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("MRPIPE_INPUT_DIR") {
            self.input_dir = PathBuf::from(dir);
        }

        if let Some(dir) = lookup("MRPIPE_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(dir);
        }

        if let Some(keys) = lookup("MRPIPE_SKEWED_KEYS") {
            self.skew.skewed_keys = keys
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Some(value) = lookup("MRPIPE_NUM_SALTS") {
            match value.parse::<usize>() {
                Ok(n) => self.skew.num_salts = n,
                Err(_) => warn!("Ignoring MRPIPE_NUM_SALTS={value}: not a number"),
            }
        }
    }
}
