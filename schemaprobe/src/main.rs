//! Adaptive schema discovery tool.
//!
//! This binary learns the shape of tables behind a PostgREST-style API by
//! inserting candidate rows and refining them from each rejection.
//!
//! # Safety Guarantees
//! - Every accepted probe row is deleted before its run ends
//! - Probing per table is bounded by an attempt budget
//! - API keys are never logged or written to reports

use anyhow::{Context, Result, bail};
use clap::Parser;
use schemaprobe::cli::{ClassifyArgs, Cli, Command, PlanArgs, SimulateArgs};
use schemaprobe::{ProbeReport, run_plan};
use schemaprobe_core::store::MemoryStore;
use schemaprobe_core::{ProbePlan, StoreError, classify, init_logging};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.global.verbose, cli.global.quiet)?;

    let success = match cli.command {
        Command::Probe(args) => live::probe(args).await?,
        Command::Simulate(args) => simulate(args).await?,
        Command::Sweep(args) => live::sweep(args).await?,
        Command::Classify(args) => classify_message(&args)?,
    };

    if !success {
        std::process::exit(2);
    }
    Ok(())
}

/// Cancels the returned token on Ctrl-C; running probes stop between attempts.
fn cancel_on_interrupt() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; finishing current attempts");
            child.cancel();
        }
    });
    token
}

/// Prints the summary and writes or prints the report.
async fn emit_report(report: &ProbeReport, args: &PlanArgs) -> Result<bool> {
    for line in report.summary_lines() {
        eprintln!("{}", line);
    }

    match &args.output {
        Some(path) => {
            report.save(path).await?;
            info!("✓ Report saved to {}", path.display());
        }
        None => println!("{}", report.to_json()?),
    }
    Ok(report.is_success())
}

async fn simulate(args: SimulateArgs) -> Result<bool> {
    let plan = ProbePlan::from_file(&args.plan.plan)?;
    if plan.simulated_tables.is_empty() {
        bail!(
            "plan {} has no simulated_tables to run against",
            args.plan.plan.display()
        );
    }

    let store = MemoryStore::with_tables(plan.simulated_tables.clone());
    let report = run_plan(
        &store,
        &plan,
        &args.plan.tables,
        args.plan.concurrency,
        &cancel_on_interrupt(),
    )
    .await?;

    let leftover: usize = plan.tables.iter().map(|t| store.row_count(&t.table)).sum();
    if leftover > 0 {
        warn!(rows = leftover, "Simulated tables still hold rows after the run");
    }

    emit_report(&report, &args.plan).await
}

fn classify_message(args: &ClassifyArgs) -> Result<bool> {
    let error = StoreError::rejected(args.code.as_deref(), args.message.clone());
    let class = classify(&error);
    println!(
        "{}",
        serde_json::to_string_pretty(&class).context("Failed to serialize classification")?
    );
    Ok(true)
}

#[cfg(feature = "postgrest")]
mod live {
    use super::{cancel_on_interrupt, emit_report};
    use anyhow::Result;
    use schemaprobe::cli::{ProbeArgs, StoreArgs, SweepArgs};
    use schemaprobe::run_plan;
    use schemaprobe_core::ProbePlan;
    use schemaprobe_core::seed::sweep_orphans;
    use schemaprobe_core::store::{PostgrestStore, StoreConnectionConfig};
    use std::time::Duration;
    use tracing::info;

    fn connect(args: StoreArgs) -> Result<PostgrestStore> {
        let mut config = StoreConnectionConfig::new(args.url)
            .with_request_timeout(Duration::from_secs(args.timeout));
        if let Some(schema) = args.schema {
            config = config.with_schema(schema);
        }
        info!("Target: {}", config);
        Ok(PostgrestStore::new(config, args.api_key)?)
    }

    pub(super) async fn probe(args: ProbeArgs) -> Result<bool> {
        let plan = ProbePlan::from_file(&args.plan.plan)?;
        let store = connect(args.store)?;
        let report = run_plan(
            &store,
            &plan,
            &args.plan.tables,
            args.plan.concurrency,
            &cancel_on_interrupt(),
        )
        .await?;
        emit_report(&report, &args.plan).await
    }

    pub(super) async fn sweep(args: SweepArgs) -> Result<bool> {
        let store = connect(args.store)?;
        let deleted = sweep_orphans(&store, &args.table, &args.key_column, &args.prefix).await?;
        info!("✓ Sweep of {} complete", args.table);
        println!("Deleted {} probe row(s) from {}", deleted, args.table);
        Ok(true)
    }
}

#[cfg(not(feature = "postgrest"))]
mod live {
    use anyhow::{Result, bail};
    use schemaprobe::cli::{ProbeArgs, SweepArgs};

    pub(super) async fn probe(_args: ProbeArgs) -> Result<bool> {
        bail!("Live probing not available. Compile with --features postgrest")
    }

    pub(super) async fn sweep(_args: SweepArgs) -> Result<bool> {
        bail!("Live sweeps not available. Compile with --features postgrest")
    }
}
