//! Command-line interface definition.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Default number of tables probed at once.
pub const DEFAULT_CONCURRENCY: usize = 4;

#[derive(Debug, Parser)]
#[command(name = "schemaprobe")]
#[command(about = "Adaptive schema discovery for PostgREST-style record stores")]
#[command(version)]
#[command(long_about = "
SchemaProbe - learn a table's real shape by inserting candidate rows

When the only access to a table is a REST facade that accepts or rejects
whole rows, SchemaProbe submits candidate records, reads each rejection,
adjusts the candidate and tries again until a row is accepted.
Accepted probe rows are deleted immediately.

CREDENTIALS:
  The store URL and API key are read from SCHEMAPROBE_URL and
  SCHEMAPROBE_API_KEY (or --url / --api-key). The key is never logged.

EXAMPLES:
  schemaprobe probe --plan plan.json --output report.json
  schemaprobe simulate --plan plan.json
  schemaprobe sweep --table bookings --prefix probe_
  schemaprobe classify 'null value in column \"status\" violates not-null constraint' --code 23502
")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Probe tables from a plan against a live store
    Probe(ProbeArgs),
    /// Run a plan against its simulated tables, offline
    Simulate(SimulateArgs),
    /// Delete probe rows left behind by interrupted runs
    Sweep(SweepArgs),
    /// Show how an error message would be classified
    Classify(ClassifyArgs),
}

#[derive(Debug, Args)]
pub struct GlobalArgs {
    /// Increase verbosity
    #[arg(
        short,
        long,
        global = true,
        action = clap::ArgAction::Count,
        help = "Increase verbosity (-v, -vv)"
    )]
    pub verbose: u8,

    /// Suppress output
    #[arg(short, long, global = true, help = "Suppress all output except errors")]
    pub quiet: bool,
}

/// Live store connection settings.
#[derive(Debug, Args)]
pub struct StoreArgs {
    /// Store base URL
    #[arg(long, env = "SCHEMAPROBE_URL", help = "Store base URL (the /rest/v1 suffix is optional)")]
    pub url: String,

    /// Store API key
    #[arg(long, env = "SCHEMAPROBE_API_KEY", hide_env_values = true)]
    pub api_key: String,

    /// Per-request timeout in seconds
    #[arg(long, default_value = "30")]
    pub timeout: u64,

    /// Non-default schema to target
    #[arg(long)]
    pub schema: Option<String>,
}

#[derive(Debug, Args)]
pub struct PlanArgs {
    /// Probe plan file
    #[arg(long, value_name = "FILE")]
    pub plan: PathBuf,

    /// Only probe these tables (repeatable)
    #[arg(long = "table", value_name = "NAME")]
    pub tables: Vec<String>,

    /// Write the JSON report here instead of stdout
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Tables probed at once
    #[arg(long, default_value_t = DEFAULT_CONCURRENCY)]
    pub concurrency: usize,
}

#[derive(Debug, Args)]
pub struct ProbeArgs {
    #[command(flatten)]
    pub plan: PlanArgs,

    #[command(flatten)]
    pub store: StoreArgs,
}

#[derive(Debug, Args)]
pub struct SimulateArgs {
    #[command(flatten)]
    pub plan: PlanArgs,
}

#[derive(Debug, Args)]
pub struct SweepArgs {
    /// Table to clean
    #[arg(long)]
    pub table: String,

    /// Key column holding probe keys
    #[arg(long, default_value = "id")]
    pub key_column: String,

    /// Probe key prefix
    #[arg(long, default_value = schemaprobe_core::config::DEFAULT_KEY_PREFIX)]
    pub prefix: String,

    #[command(flatten)]
    pub store: StoreArgs,
}

#[derive(Debug, Args)]
pub struct ClassifyArgs {
    /// Error message as returned by the store
    pub message: String,

    /// Error code, if the store sent one
    #[arg(long)]
    pub code: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_classify() {
        let cli = Cli::try_parse_from([
            "schemaprobe",
            "-vv",
            "classify",
            "permission denied",
            "--code",
            "42501",
        ])
        .unwrap();

        assert_eq!(cli.global.verbose, 2);
        let Command::Classify(args) = cli.command else {
            unreachable!("expected classify");
        };
        assert_eq!(args.message, "permission denied");
        assert_eq!(args.code.as_deref(), Some("42501"));
    }

    #[test]
    fn test_parse_simulate_defaults() {
        let cli = Cli::try_parse_from(["schemaprobe", "simulate", "--plan", "plan.json"]).unwrap();
        let Command::Simulate(args) = cli.command else {
            unreachable!("expected simulate");
        };
        assert_eq!(args.plan.concurrency, DEFAULT_CONCURRENCY);
        assert!(args.plan.tables.is_empty());
        assert!(args.plan.output.is_none());
    }

    #[test]
    fn test_parse_sweep_defaults() {
        let cli = Cli::try_parse_from([
            "schemaprobe",
            "sweep",
            "--table",
            "bookings",
            "--url",
            "https://example.supabase.co",
            "--api-key",
            "secret",
        ])
        .unwrap();
        let Command::Sweep(args) = cli.command else {
            unreachable!("expected sweep");
        };
        assert_eq!(args.key_column, "id");
        assert_eq!(args.prefix, "probe_");
        assert_eq!(args.store.timeout, 30);
    }

    #[test]
    fn test_plan_is_required() {
        assert!(Cli::try_parse_from(["schemaprobe", "simulate"]).is_err());
    }
}
