//! Library half of the `schemaprobe` binary.
//!
//! Argument parsing, the multi-table runner, and report output live here so
//! they can be tested without spawning the binary.

pub mod cli;
pub mod report;
pub mod runner;

pub use cli::{Cli, Command};
pub use report::ProbeReport;
pub use runner::run_plan;
