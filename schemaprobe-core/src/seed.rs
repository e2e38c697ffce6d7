//! Pre-run helpers: foreign-key seeding and orphan sweeps.
//!
//! Neither is part of the probing loop. Seeding turns a [`TablePlan`] into a
//! [`ProbeRequest`] by looking up real keys for foreign-key columns, and the
//! sweep removes probe rows left behind by an interrupted run.

use crate::config::TablePlan;
use crate::engine::ProbeRequest;
use crate::models::FieldCandidate;
use crate::store::{Filter, RecordStore};
use crate::{ProbeError, Result};
use tracing::{debug, info, warn};

/// Rows fetched per sweep pass.
const SWEEP_BATCH: u32 = 100;
/// Upper bound on sweep passes so a store that ignores deletes cannot loop us.
const MAX_SWEEP_PASSES: u32 = 50;

/// Builds a probe request from a plan, resolving foreign-key seeds.
///
/// Seeds with no matching row are skipped with a warning.
///
/// # Errors
/// Returns error if a seed lookup fails at the store
pub async fn prepare_request<S>(store: &S, plan: &TablePlan) -> Result<ProbeRequest>
where
    S: RecordStore + ?Sized,
{
    let mut request = ProbeRequest::new(plan.table.clone(), plan.pool());
    for (column, values) in &plan.enum_pools {
        request = request.with_enum_pool(column.clone(), values.clone());
    }
    for (column, hint) in &plan.type_hints {
        request = request.with_type_hint(column.clone(), *hint);
    }

    for seed in &plan.seeds {
        let rows = store
            .select(&seed.table, &seed.filters, 1)
            .await
            .map_err(|e| {
                ProbeError::store(
                    format!("Failed to seed '{}' from '{}'", seed.column, seed.table),
                    e,
                )
            })?;

        let Some(key) = rows
            .first()
            .and_then(|row| row.get(&seed.key_column))
            .filter(|v| !v.is_null())
        else {
            warn!(
                column = %seed.column,
                source = %seed.table,
                "No row available to seed foreign key"
            );
            continue;
        };

        if request.pool.get(&seed.column).is_some() {
            debug!(column = %seed.column, "Plan already has a candidate; seed ignored");
            continue;
        }

        let candidate = if seed.reserve {
            FieldCandidate::reserve(seed.column.clone(), key.clone())
        } else {
            FieldCandidate::new(seed.column.clone(), key.clone(), 0)
        };
        debug!(column = %seed.column, source = %seed.table, "Seeded foreign key");
        request.pool.insert(candidate);
    }

    Ok(request)
}

/// Deletes rows whose key starts with `prefix`.
///
/// Returns the number of rows deleted. Stops when a pass finds nothing, or
/// when a pass deletes nothing it found.
///
/// # Errors
/// Returns error if the prefix is empty or the store rejects the lookup
pub async fn sweep_orphans<S>(
    store: &S,
    table: &str,
    key_column: &str,
    prefix: &str,
) -> Result<u32>
where
    S: RecordStore + ?Sized,
{
    if prefix.is_empty() {
        return Err(ProbeError::configuration(
            "refusing to sweep with an empty key prefix",
        ));
    }

    let filter = [Filter::starts_with(key_column, prefix)];
    let mut deleted: u32 = 0;

    for _ in 0..MAX_SWEEP_PASSES {
        let rows = store
            .select(table, &filter, SWEEP_BATCH)
            .await
            .map_err(|e| ProbeError::store(format!("Failed to list probe rows in '{}'", table), e))?;
        if rows.is_empty() {
            break;
        }

        let mut pass_deleted: u32 = 0;
        for row in &rows {
            // Only ever delete keys this tool could have generated.
            let Some(key) = row
                .get(key_column)
                .filter(|k| k.as_str().is_some_and(|s| s.starts_with(prefix)))
            else {
                warn!(table, "Store returned a row outside the probe prefix; skipped");
                continue;
            };
            match store.delete(table, key_column, key).await {
                Ok(()) => pass_deleted = pass_deleted.saturating_add(1),
                Err(e) => warn!(table, error = %e, "Failed to delete orphaned probe row"),
            }
        }

        deleted = deleted.saturating_add(pass_deleted);
        if pass_deleted == 0 {
            break;
        }
    }

    if deleted > 0 {
        info!(table, deleted, "Swept orphaned probe rows");
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ColumnKind, ColumnSpec, MemoryStore, StoreError, TableSpec};
    use serde_json::json;

    fn aircraft_store() -> MemoryStore {
        MemoryStore::with_tables([TableSpec::new(
            "aircraft",
            vec![
                ColumnSpec::new("id", ColumnKind::Text),
                ColumnSpec::new("tail", ColumnKind::Text),
            ],
        )])
    }

    fn row(id: &str) -> crate::store::Record {
        let mut r = crate::store::Record::new();
        r.insert("id".to_string(), json!(id));
        r
    }

    #[tokio::test]
    async fn test_prepare_request_seeds_reserve_candidate() {
        let store = aircraft_store();
        store.seed_row("aircraft", row("ac-1"));

        let plan: TablePlan = serde_json::from_value(json!({
            "table": "bookings",
            "candidates": [{"key": "status", "value": "Pending"}],
            "enum_pools": {"status": ["Confirmed"]},
            "seeds": [{"column": "aircraft_id", "table": "aircraft"}]
        }))
        .unwrap();

        let request = prepare_request(&store, &plan).await.unwrap();
        let seeded = request.pool.get("aircraft_id").unwrap();
        assert_eq!(seeded.value, json!("ac-1"));
        assert!(!seeded.is_included());
        assert_eq!(request.enum_pools["status"], vec![json!("Confirmed")]);
    }

    #[tokio::test]
    async fn test_prepare_request_skips_empty_seed_table() {
        let store = aircraft_store();
        let mut plan = TablePlan::new("bookings");
        plan.seeds.push(crate::config::ForeignKeySeed {
            column: "aircraft_id".to_string(),
            table: "aircraft".to_string(),
            key_column: "id".to_string(),
            filters: Vec::new(),
            reserve: false,
        });

        let request = prepare_request(&store, &plan).await.unwrap();
        assert!(request.pool.is_empty());
    }

    #[tokio::test]
    async fn test_prepare_request_propagates_store_errors() {
        let store = MemoryStore::new();
        let mut plan = TablePlan::new("bookings");
        plan.seeds.push(crate::config::ForeignKeySeed {
            column: "aircraft_id".to_string(),
            table: "missing".to_string(),
            key_column: "id".to_string(),
            filters: Vec::new(),
            reserve: true,
        });

        let result = prepare_request(&store, &plan).await;
        assert!(matches!(result, Err(ProbeError::Store { .. })));
    }

    #[tokio::test]
    async fn test_sweep_removes_only_prefixed_rows() {
        let store = aircraft_store();
        for id in ["probe_1", "probe_2", "N123AB"] {
            store.seed_row("aircraft", row(id));
        }

        let deleted = sweep_orphans(&store, "aircraft", "id", "probe_").await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.row_count("aircraft"), 1);
    }

    #[tokio::test]
    async fn test_sweep_keeps_rows_matching_only_as_wildcard() {
        let store = aircraft_store();
        for id in ["probe_1", "probeXreal", "probes-2024", "probe"] {
            store.seed_row("aircraft", row(id));
        }

        let deleted = sweep_orphans(&store, "aircraft", "id", "probe_").await.unwrap();
        assert_eq!(deleted, 1);

        let remaining: Vec<String> = store
            .rows("aircraft")
            .iter()
            .filter_map(|r| r.get("id").and_then(|v| v.as_str()).map(str::to_string))
            .collect();
        assert_eq!(remaining, vec!["probeXreal", "probes-2024", "probe"]);
    }

    #[tokio::test]
    async fn test_sweep_terminates_when_deletes_fail() {
        let store = aircraft_store();
        store.seed_row("aircraft", row("probe_1"));
        store.fail_deletes_with(StoreError::rejected(Some("42501"), "permission denied"));

        let deleted = sweep_orphans(&store, "aircraft", "id", "probe_").await.unwrap();
        assert_eq!(deleted, 0);
        assert_eq!(store.row_count("aircraft"), 1);
    }

    #[tokio::test]
    async fn test_sweep_rejects_empty_prefix() {
        let store = aircraft_store();
        assert!(sweep_orphans(&store, "aircraft", "id", "").await.is_err());
    }
}
