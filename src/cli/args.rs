//! CLI argument structures

use clap::Parser;
use std::path::PathBuf;

use crate::config::PipelineConfig;
use crate::pipeline::JobName;

/// Run MapReduce jobs over local files
#[derive(Parser, Debug)]
#[command(name = "mrpipe")]
#[command(about = "mrpipe - Single-host MapReduce pipeline with skew-aware joins", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Job to run
    #[arg(short, long, value_enum)]
    pub job: JobName,

    /// Directory holding the job inputs
    #[arg(short, long, value_name = "DIR")]
    pub input_dir: Option<PathBuf>,

    /// Directory the job outputs are written to
    #[arg(short, long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Path to configuration file (default: ./mrpipe.toml if present)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Comma-separated skewed keys for a stand-alone join
    #[arg(long, value_name = "KEYS", value_delimiter = ',')]
    pub skewed_keys: Option<Vec<String>>,

    /// Number of salts per skewed key
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
    pub num_salts: Option<u32>,

    /// Enable verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Command-line flags win over the file and the environment.
    pub fn apply_overrides(&self, config: &mut PipelineConfig) {
        if let Some(dir) = &self.input_dir {
            config.input_dir = dir.clone();
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        if let Some(keys) = &self.skewed_keys {
            config.skew.skewed_keys = keys
                .iter()
                .map(|k| k.trim())
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(n) = self.num_salts {
            config.skew.num_salts = n as usize;
        }
    }
}
