//! Command-line entry point: argument parsing, configuration layering and
//! the run report printed at the end.

pub mod args;

pub use args::Cli;

use anyhow::Result;
use tracing::{debug, info};

use crate::config::load_config;
use crate::pipeline::{JobName, Pipeline, PipelineReport};
use crate::subprocess::production_runner;

/// Filter directive for a `-v` count, unless `MRPIPE_LOG_LEVEL` is set.
pub fn get_log_level(verbose: u8) -> String {
    if verbose == 0 {
        if let Ok(level) = std::env::var("MRPIPE_LOG_LEVEL") {
            return level;
        }
    }
    match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
    .to_string()
}

pub async fn execute(cli: Cli) -> Result<PipelineReport> {
    let mut config = load_config(cli.config.as_deref()).await?;
    cli.apply_overrides(&mut config);
    config.validate()?;
    debug!("Effective configuration: {:?}", config);

    let pipeline = Pipeline::new(config, production_runner());
    let report = pipeline.run(cli.job).await?;

    for job in &report.jobs {
        info!(
            "{}: {} records, {} diagnostics, {:.2?}",
            job.job, job.records, job.diagnostics, job.duration
        );
    }
    if cli.job == JobName::All {
        println!("Generated files:");
        for (name, path) in report.generated_files() {
            println!("  - {name}: {}", path.display());
        }
    }
    Ok(report)
}
