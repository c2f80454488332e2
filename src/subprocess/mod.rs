//! Subprocess abstraction used by external pipeline stages.
//!
//! Stages talk to a [`ProcessRunner`] rather than to `tokio::process`
//! directly so the orchestrator can be driven by [`MockProcessRunner`] in
//! tests.

pub mod error;
pub mod mock;
pub mod runner;


pub use error::ProcessError;
pub use mock::{MockCommandConfig, MockProcessRunner};
pub use runner::{ExitStatus, ProcessCommand, ProcessOutput, ProcessRunner, TokioProcessRunner};

use std::sync::Arc;

/// The runner used outside of tests.
pub fn production_runner() -> Arc<dyn ProcessRunner> {
    Arc::new(TokioProcessRunner)
}
