//! Plan runs against simulated tables.
//!
//! These tests drive the same runner the binary uses, with a memory store
//! built from the plan's `simulated_tables` section.

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::uninlined_format_args)]

use schemaprobe::run_plan;
use schemaprobe_core::store::{MemoryStore, Record};
use schemaprobe_core::{ExhaustionReason, ProbePlan};
use serde_json::json;
use tokio_util::sync::CancellationToken;

const PLAN: &str = r#"{
    "discovery": {
        "max_attempts": 10,
        "key_strategy": {"strategy": "prefixed", "prefix": "probe_"}
    },
    "tables": [
        {
            "table": "bookings",
            "candidates": [
                {"key": "status", "value": "Pending", "priority": 1},
                {"key": "passenger_name", "value": "Probe Passenger"}
            ],
            "enum_pools": {"status": ["Confirmed", "Cancelled"]},
            "seeds": [{"column": "aircraft_id", "table": "aircraft"}]
        },
        {
            "table": "crew",
            "candidates": [{"key": "role", "value": "X"}],
            "enum_pools": {"role": ["X"]}
        }
    ],
    "simulated_tables": [
        {
            "name": "aircraft",
            "columns": [
                {"name": "id", "kind": {"type": "text"}},
                {"name": "tail_number", "kind": {"type": "text"}}
            ]
        },
        {
            "name": "bookings",
            "columns": [
                {"name": "id", "kind": {"type": "text"}, "nullable": false},
                {"name": "aircraft_id", "kind": {"type": "text"}, "nullable": false},
                {"name": "passenger_name", "kind": {"type": "text"}},
                {"name": "status", "kind": {"type": "enum", "type_name": "booking_status", "values": ["Confirmed", "Cancelled"]}}
            ]
        },
        {
            "name": "crew",
            "columns": [
                {"name": "id", "kind": {"type": "text"}},
                {"name": "role", "kind": {"type": "check", "values": ["captain", "first_officer"]}}
            ]
        }
    ]
}"#;

fn simulated(plan: &ProbePlan) -> MemoryStore {
    let store = MemoryStore::with_tables(plan.simulated_tables.clone());
    let mut aircraft = Record::new();
    aircraft.insert("id".to_string(), json!("ac-001"));
    aircraft.insert("tail_number".to_string(), json!("N123AB"));
    store.seed_row("aircraft", aircraft);
    store
}

#[tokio::test]
async fn test_simulated_plan_report() {
    let plan = ProbePlan::from_json(PLAN).unwrap();
    let store = simulated(&plan);

    let report = run_plan(&store, &plan, &[], 2, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.results.len(), 2);
    assert_eq!(report.results[0].table(), "bookings");
    assert_eq!(report.results[1].table(), "crew");

    let bookings = report.results[0].schema().expect("bookings accepted");
    assert_eq!(bookings.accepted_record.get("aircraft_id"), Some(&json!("ac-001")));
    assert_eq!(bookings.accepted_record.get("status"), Some(&json!("Confirmed")));

    let crew = report.results[1].exhaustion().expect("crew exhausted");
    assert_eq!(
        crew.reason,
        ExhaustionReason::EnumPoolExhausted {
            column: "role".to_string()
        }
    );

    assert_eq!(report.accepted(), 1);
    assert!(!report.is_success());
    assert_eq!(store.row_count("bookings"), 0);
    assert_eq!(store.row_count("crew"), 0);
    assert_eq!(store.row_count("aircraft"), 1);
}

#[tokio::test]
async fn test_table_subset() {
    let plan = ProbePlan::from_json(PLAN).unwrap();
    let store = simulated(&plan);

    let report = run_plan(
        &store,
        &plan,
        &["bookings".to_string()],
        1,
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(report.results.len(), 1);
    assert!(report.is_success());
}

#[tokio::test]
async fn test_seed_failure_recorded_per_table() {
    let plan = ProbePlan::from_json(PLAN).unwrap();
    // No aircraft table at all: the seed lookup itself fails.
    let store = MemoryStore::with_tables(
        plan.simulated_tables
            .iter()
            .filter(|t| t.name != "aircraft")
            .cloned(),
    );

    let report = run_plan(&store, &plan, &[], 4, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].table, "bookings");
    assert_eq!(report.results.len(), 1);
}

#[tokio::test]
async fn test_cancelled_plan_stops_before_inserting() {
    let plan = ProbePlan::from_json(PLAN).unwrap();
    let store = simulated(&plan);
    let token = CancellationToken::new();
    token.cancel();

    let report = run_plan(&store, &plan, &[], 2, &token).await.unwrap();

    assert!(report.results.iter().all(|r| matches!(
        r.exhaustion().map(|e| &e.reason),
        Some(ExhaustionReason::Cancelled)
    )));
    assert_eq!(store.insert_calls(), 0);
}

#[tokio::test]
async fn test_unknown_table_is_an_error() {
    let plan = ProbePlan::from_json(PLAN).unwrap();
    let store = simulated(&plan);

    let result = run_plan(
        &store,
        &plan,
        &["flights".to_string()],
        1,
        &CancellationToken::new(),
    )
    .await;
    assert!(result.is_err());
}
