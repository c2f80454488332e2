//! # mrpipe
//!
//! A single-host emulation of a Hadoop-style MapReduce pipeline, with a
//! skew-aware reduce-side join.
//!
//! ## Usage
//!
//! ```bash
//! mrpipe --job <cleansing|aggregation|trending|join|all> [--input-dir DIR] [--output-dir DIR]
//! ```
//!
//! ## Modules
//!
//! - `record` - Tab-separated record codec and join origin tags
//! - `shuffle` - Sort-based shuffle between stages
//! - `skew` - Skew detection, salting and key normalization
//! - `join` - Join map-side tagging and the reduce-side join assembler
//! - `stage` - External and built-in stages behind one trait
//! - `subprocess` - Process runner abstraction for external stages
//! - `pipeline` - Job composition and the `all` sequence
//! - `config` - TOML configuration with environment overrides
//! - `cli` - Command-line arguments and entry point
pub mod cli;
pub mod config;
pub mod error;
pub mod join;
pub mod pipeline;
pub mod record;
pub mod shuffle;
pub mod skew;
pub mod stage;
pub mod subprocess;


pub use error::{PipelineError, Result};
pub use pipeline::{JobName, Pipeline, PipelineReport};
