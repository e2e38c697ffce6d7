//! Multi-table plan execution.
//!
//! Each table gets its own engine run; runs share the store but no state, so
//! several tables are probed at once up to the requested concurrency.

use crate::report::{ProbeReport, TableFailure};
use futures::stream::{self, StreamExt};
use schemaprobe_core::{
    DiscoveryEngine, DiscoveryResult, ProbeError, ProbePlan, RecordStore, Result, TablePlan,
    prepare_request,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Picks the tables to probe, in plan order.
///
/// # Errors
/// Returns error if a requested table is not in the plan
pub fn select_tables<'p>(plan: &'p ProbePlan, requested: &[String]) -> Result<Vec<&'p TablePlan>> {
    if requested.is_empty() {
        return Ok(plan.tables.iter().collect());
    }
    requested
        .iter()
        .map(|name| {
            plan.table(name).ok_or_else(|| {
                ProbeError::configuration(format!("table '{}' is not in the plan", name))
            })
        })
        .collect()
}

async fn probe_table<S>(
    store: &S,
    plan: &ProbePlan,
    table: &TablePlan,
    cancel: &CancellationToken,
) -> Result<DiscoveryResult>
where
    S: RecordStore + ?Sized,
{
    let request = prepare_request(store, table).await?;
    let engine = DiscoveryEngine::new(store, plan.config_for(table))?;
    engine.run_with_cancel(request, cancel).await
}

/// Probes the selected tables of a plan and collects a report.
///
/// Per-table errors (a failed seed lookup, say) are recorded as failures
/// and do not stop the other tables.
///
/// # Errors
/// Returns error if a requested table is not in the plan
pub async fn run_plan<S>(
    store: &S,
    plan: &ProbePlan,
    requested: &[String],
    concurrency: usize,
    cancel: &CancellationToken,
) -> Result<ProbeReport>
where
    S: RecordStore + ?Sized,
{
    let tables = select_tables(plan, requested)?;
    info!(tables = tables.len(), store = %store.describe(), "Probing plan");

    let mut outcomes: Vec<(usize, &TablePlan, Result<DiscoveryResult>)> =
        stream::iter(tables.into_iter().enumerate())
            .map(|(index, table)| async move {
                (index, table, probe_table(store, plan, table, cancel).await)
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;
    outcomes.sort_by_key(|(index, _, _)| *index);

    let mut report = ProbeReport::new(store.describe());
    for (_, table, outcome) in outcomes {
        match outcome {
            Ok(result) => report.results.push(result),
            Err(e) => {
                error!(table = %table.table, error = %e, "Table probe failed");
                report.failures.push(TableFailure {
                    table: table.table.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    info!(
        accepted = report.accepted(),
        exhausted = report.exhausted(),
        failed = report.failures.len(),
        "✓ Plan complete"
    );
    Ok(report)
}
