//! Adaptive schema discovery.
//!
//! The engine probes one table at a time. Each attempt builds a record from
//! the candidate pool, submits it, and either stops (accepted, or nothing
//! left to try) or refines the pool from the rejection and goes again:
//!
//! ```text
//! Building -> Submitting -> Evaluating -> Accepted
//!                                      -> Refining -> Building
//!                                      -> Exhausted
//! ```
//!
//! # Guarantees
//! - At most `max_attempts` submissions per run
//! - Every accepted probe row is deleted before `run` returns
//! - A column rejected as unknown is never submitted again in the same run
//! - The insert is the only await point that touches the table; cancellation
//!   is observed between attempts, never during one

use crate::classify::{ErrorClass, classify};
use crate::config::DiscoveryConfig;
use crate::defaults::TypeHint;
use crate::models::{
    Attempt, CandidatePool, CandidateRecord, DiscoveredColumn, DiscoveredSchema,
    DiscoveryResult, EnumFinding, Exhaustion, ExhaustionReason, FieldCandidate, TypeGuess,
};
use crate::seed::sweep_orphans;
use crate::store::{Record, RecordStore, StoreError};
use crate::{ProbeError, Result};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Everything the engine needs to probe one table.
#[derive(Debug, Clone)]
pub struct ProbeRequest {
    /// Table to probe
    pub table: String,
    /// Initial candidate pool
    pub pool: CandidatePool,
    /// Values to try, in order, for enum- or check-constrained columns
    pub enum_pools: BTreeMap<String, Vec<Value>>,
    /// Explicit types for placeholder synthesis
    pub type_hints: BTreeMap<String, TypeHint>,
}

impl ProbeRequest {
    /// Creates a request with no enum pools or hints.
    pub fn new(table: impl Into<String>, pool: CandidatePool) -> Self {
        Self {
            table: table.into(),
            pool,
            enum_pools: BTreeMap::new(),
            type_hints: BTreeMap::new(),
        }
    }

    /// Builder method to add an enum pool for a column.
    pub fn with_enum_pool(mut self, column: impl Into<String>, values: Vec<Value>) -> Self {
        self.enum_pools.insert(column.into(), values);
        self
    }

    /// Builder method to add a type hint for a column.
    pub fn with_type_hint(mut self, column: impl Into<String>, hint: TypeHint) -> Self {
        self.type_hints.insert(column.into(), hint);
        self
    }
}

/// Outcome of applying one refinement.
enum Refinement {
    Retry,
    Stop(ExhaustionReason),
}

/// Mutable state of a single run. Never shared between runs.
struct RunState<'c> {
    config: &'c DiscoveryConfig,
    table: String,
    pool: CandidatePool,
    enum_pools: BTreeMap<String, Vec<Value>>,
    type_hints: BTreeMap<String, TypeHint>,
    /// Enum values rejected per column
    rejected_values: BTreeMap<String, Vec<Value>>,
    required: BTreeSet<String>,
    synthesized: BTreeSet<String>,
    unresolved: Vec<String>,
    attempts: Vec<Attempt>,
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl<'c> RunState<'c> {
    fn new(config: &'c DiscoveryConfig, request: ProbeRequest) -> Self {
        let mut pool = request.pool;
        // The key is generated per attempt; a candidate for it would collide.
        pool.remove(&config.key_column);

        Self {
            config,
            table: request.table,
            pool,
            enum_pools: request.enum_pools,
            type_hints: request.type_hints,
            rejected_values: BTreeMap::new(),
            required: BTreeSet::new(),
            synthesized: BTreeSet::new(),
            unresolved: Vec::new(),
            attempts: Vec::new(),
        }
    }

    fn build(&self) -> CandidateRecord {
        let mut record =
            CandidateRecord::new(self.config.key_column.clone(), self.config.key_strategy.generate());
        for candidate in self.pool.included() {
            record.push(candidate.key.clone(), candidate.value.clone());
        }
        record
    }

    fn stalled(detail: impl Into<String>) -> Refinement {
        Refinement::Stop(ExhaustionReason::Stalled {
            detail: detail.into(),
        })
    }

    fn refine(&mut self, record: &CandidateRecord, class: &ErrorClass) -> Refinement {
        match class {
            ErrorClass::UnknownColumn { column } => self.drop_unknown(record, column),
            ErrorClass::NotNullViolation { column } => self.require(record, column),
            ErrorClass::EnumViolation { value, .. } => match self.column_holding(record, value) {
                Some(column) => self.next_enum_value(record, &column),
                None => Self::stalled(format!(
                    "enum value \"{}\" does not match any submitted column",
                    value
                )),
            },
            ErrorClass::CheckViolation { constraint } => {
                match self.column_for_constraint(record, constraint) {
                    Some(column) => self.next_enum_value(record, &column),
                    None => Self::stalled(format!(
                        "check constraint \"{}\" does not name a submitted column",
                        constraint
                    )),
                }
            }
            ErrorClass::TypeMismatch {
                expected_type,
                value,
            } => self.retype(record, expected_type, value),
            ErrorClass::Unclassified => Refinement::Stop(ExhaustionReason::Unclassified),
        }
    }

    fn drop_unknown(&mut self, record: &CandidateRecord, column: &str) -> Refinement {
        if column == self.config.key_column {
            return Self::stalled(format!("store does not recognise key column '{}'", column));
        }
        if !record.contains(column) {
            return Self::stalled(format!("unknown column '{}' was not submitted", column));
        }
        self.pool.exclude(column);
        self.required.remove(column);
        debug!(table = %self.table, column, "Excluded unknown column");
        Refinement::Retry
    }

    fn require(&mut self, record: &CandidateRecord, column: &str) -> Refinement {
        if column == self.config.key_column {
            return Self::stalled(format!("key column '{}' reported as null", column));
        }
        if self.pool.is_excluded(column) {
            return Self::stalled(format!(
                "column '{}' is required but was reported as unknown",
                column
            ));
        }
        if let Some(value) = record.get(column)
            && !value.is_null()
        {
            return Self::stalled(format!(
                "column '{}' reported as null although a value was sent",
                column
            ));
        }

        self.required.insert(column.to_string());
        let priority = self.pool.next_top_priority();

        // Reserve candidates carry a caller-supplied value; promote it.
        if let Some(existing) = self.pool.get(column)
            && !existing.is_included()
            && !existing.value.is_null()
        {
            let promoted = FieldCandidate::new(column, existing.value.clone(), priority);
            self.pool.insert(promoted);
            debug!(table = %self.table, column, "Promoted reserve candidate");
            return Refinement::Retry;
        }

        let value = self.placeholder(column);
        debug!(table = %self.table, column, value = %value, "Synthesized required column");
        self.pool.insert(FieldCandidate::new(column, value, priority));
        self.synthesized.insert(column.to_string());
        Refinement::Retry
    }

    /// Picks a placeholder: hint, then enum pool, then the column name.
    fn placeholder(&self, column: &str) -> Value {
        if let Some(hint) = self.type_hints.get(column) {
            return hint.placeholder();
        }
        if let Some(value) = self.untried_enum_value(column) {
            return value;
        }
        TypeHint::from_column_name(column, self.config.key_strategy.uses_uuids()).placeholder()
    }

    fn untried_enum_value(&self, column: &str) -> Option<Value> {
        let rejected = self.rejected_values.get(column);
        self.enum_pools
            .get(column)?
            .iter()
            .find(|v| rejected.is_none_or(|r| !r.contains(v)))
            .cloned()
    }

    /// Finds the submitted column whose value the store quoted back.
    ///
    /// Columns with an enum pool win ties, then submission order.
    fn column_holding(&self, record: &CandidateRecord, value: &str) -> Option<String> {
        let matching: Vec<&str> = record
            .fields()
            .iter()
            .skip(1)
            .filter(|(_, v)| !v.is_null() && value_text(v) == value)
            .map(|(c, _)| c.as_str())
            .collect();

        matching
            .iter()
            .find(|c| self.enum_pools.contains_key(**c))
            .or_else(|| matching.first())
            .map(|c| c.to_string())
    }

    /// Resolves `<table>_<column>_check`, else the longest submitted column
    /// name contained in the constraint name.
    fn column_for_constraint(&self, record: &CandidateRecord, constraint: &str) -> Option<String> {
        let conventional = constraint
            .strip_prefix(&format!("{}_", self.table))
            .and_then(|rest| rest.strip_suffix("_check"));
        if let Some(column) = conventional
            && record.contains(column)
        {
            return Some(column.to_string());
        }

        record
            .columns()
            .skip(1)
            .filter(|c| constraint.contains(*c))
            .max_by_key(|c| c.len())
            .map(str::to_string)
    }

    fn next_enum_value(&mut self, record: &CandidateRecord, column: &str) -> Refinement {
        if let Some(current) = record.get(column) {
            let rejected = self.rejected_values.entry(column.to_string()).or_default();
            if !rejected.contains(current) {
                rejected.push(current.clone());
            }
        }

        let Some(next) = self.untried_enum_value(column) else {
            self.unresolved.push(column.to_string());
            return Refinement::Stop(ExhaustionReason::EnumPoolExhausted {
                column: column.to_string(),
            });
        };

        let priority = self
            .pool
            .get(column)
            .map(|c| c.priority)
            .filter(|p| *p >= 0)
            .unwrap_or_else(|| self.pool.next_top_priority());
        debug!(table = %self.table, column, value = %next, "Trying next enum value");
        self.pool.insert(FieldCandidate::new(column, next, priority));
        Refinement::Retry
    }

    fn retype(&mut self, record: &CandidateRecord, expected_type: &str, value: &str) -> Refinement {
        let matching: Vec<&str> = record
            .fields()
            .iter()
            .skip(1)
            .filter(|(c, v)| self.synthesized.contains(c) && value_text(v) == value)
            .map(|(c, _)| c.as_str())
            .collect();

        let ([column], Some(hint)) = (matching.as_slice(), TypeHint::from_sql_type(expected_type))
        else {
            return Refinement::Stop(ExhaustionReason::Unclassified);
        };
        let column = column.to_string();

        let replacement = hint.placeholder();
        if value_text(&replacement) == value {
            return Refinement::Stop(ExhaustionReason::Unclassified);
        }

        let priority = self
            .pool
            .get(&column)
            .map_or_else(|| self.pool.next_top_priority(), |c| c.priority);
        debug!(table = %self.table, column = %column, expected_type, "Re-synthesized with cast type");
        self.type_hints.insert(column.clone(), hint);
        self.pool
            .insert(FieldCandidate::new(column, replacement, priority));
        Refinement::Retry
    }

    fn enum_findings(&self, accepted: Option<&CandidateRecord>) -> Vec<EnumFinding> {
        self.rejected_values
            .iter()
            .map(|(column, rejected)| EnumFinding {
                column: column.clone(),
                rejected: rejected.clone(),
                accepted: accepted.and_then(|r| r.get(column)).cloned(),
            })
            .collect()
    }

    fn into_schema(self, record: CandidateRecord, row: Record) -> DiscoveredSchema {
        let mut columns: Vec<DiscoveredColumn> = Vec::new();

        for (name, submitted_value) in record.fields() {
            let sample = row.get(name).cloned().unwrap_or_else(|| submitted_value.clone());
            columns.push(DiscoveredColumn {
                name: name.clone(),
                type_guess: TypeGuess::from_value(&sample),
                required: self.required.contains(name),
                submitted: true,
                sample,
            });
        }
        for (name, value) in &row {
            if record.contains(name) {
                continue;
            }
            columns.push(DiscoveredColumn {
                name: name.clone(),
                type_guess: TypeGuess::from_value(value),
                required: self.required.contains(name),
                submitted: false,
                sample: value.clone(),
            });
        }

        let enum_findings = self.enum_findings(Some(&record));
        DiscoveredSchema {
            table: self.table,
            columns,
            accepted_record: record,
            attempts: self.attempts,
            enum_findings,
        }
    }

    fn into_exhaustion(mut self, reason: ExhaustionReason, last_error: Option<StoreError>) -> Exhaustion {
        if let ExhaustionReason::Stalled { .. } | ExhaustionReason::BudgetExhausted = reason {
            for column in &self.required {
                if !self.unresolved.contains(column) && self.pool.get(column).is_none() {
                    self.unresolved.push(column.clone());
                }
            }
        }
        Exhaustion {
            table: self.table,
            reason,
            attempts: self.attempts,
            last_error,
            unresolved: self.unresolved,
        }
    }
}

/// Probes tables through a record store.
///
/// Holds the store by reference; a single engine can run any number of
/// sequential or concurrent probes since runs share no state.
///
/// # Example
/// ```rust
/// use schemaprobe_core::{CandidatePool, DiscoveryConfig, DiscoveryEngine, ProbeRequest};
/// use schemaprobe_core::store::{ColumnKind, ColumnSpec, MemoryStore, TableSpec};
///
/// # async fn example() -> schemaprobe_core::Result<()> {
/// let store = MemoryStore::with_tables([TableSpec::new(
///     "aircraft",
///     vec![
///         ColumnSpec::new("id", ColumnKind::Text),
///         ColumnSpec::new("tail_number", ColumnKind::Text).required(),
///     ],
/// )]);
/// let engine = DiscoveryEngine::new(&store, DiscoveryConfig::new().with_key_prefix("probe_"))?;
///
/// let result = engine
///     .run(ProbeRequest::new("aircraft", CandidatePool::new()))
///     .await?;
/// assert!(result.is_accepted());
/// assert_eq!(store.row_count("aircraft"), 0);
/// # Ok(())
/// # }
/// ```
pub struct DiscoveryEngine<'s, S: RecordStore + ?Sized> {
    store: &'s S,
    config: DiscoveryConfig,
}

impl<'s, S: RecordStore + ?Sized> DiscoveryEngine<'s, S> {
    /// Creates an engine over a store.
    ///
    /// # Errors
    /// Returns error if the configuration is invalid
    pub fn new(store: &'s S, config: DiscoveryConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { store, config })
    }

    /// Engine configuration.
    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Probes one table until a record is accepted or nothing is left to try.
    ///
    /// # Errors
    /// Returns error only for invalid requests (e.g. an empty table name) or
    /// a failed pre-run sweep; store rejections are part of the result
    pub async fn run(&self, request: ProbeRequest) -> Result<DiscoveryResult> {
        self.run_with_cancel(request, &CancellationToken::new()).await
    }

    /// Like [`run`](Self::run), checking `cancel` before each attempt.
    ///
    /// # Errors
    /// Returns error only for invalid requests or a failed pre-run sweep
    pub async fn run_with_cancel(
        &self,
        request: ProbeRequest,
        cancel: &CancellationToken,
    ) -> Result<DiscoveryResult> {
        if request.table.trim().is_empty() {
            return Err(ProbeError::configuration("table name cannot be empty"));
        }

        if self.config.sweep_before_run
            && let Some(prefix) = self.config.key_strategy.prefix()
        {
            sweep_orphans(self.store, &request.table, &self.config.key_column, prefix).await?;
        }

        let mut state = RunState::new(&self.config, request);
        info!(
            table = %state.table,
            store = %self.store.describe(),
            candidates = state.pool.len(),
            budget = self.config.max_attempts,
            "Starting schema discovery"
        );

        let mut last_error: Option<StoreError> = None;
        for number in 1..=self.config.max_attempts {
            if cancel.is_cancelled() {
                info!(table = %state.table, attempts = state.attempts.len(), "Discovery cancelled");
                return Ok(DiscoveryResult::Exhausted(
                    state.into_exhaustion(ExhaustionReason::Cancelled, last_error),
                ));
            }
            if number > 1
                && let Some(ms) = self.config.throttle_ms
            {
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }

            let record = state.build();
            debug!(table = %state.table, attempt = number, columns = record.len(), "Submitting candidate");

            let error = match self.store.insert(&state.table, &record).await {
                Ok(row) => {
                    self.cleanup(&state.table, &record).await;
                    state.attempts.push(Attempt {
                        number,
                        record: record.clone(),
                        error: None,
                        class: None,
                    });
                    info!(table = %state.table, attempts = number, "✓ Candidate accepted");
                    return Ok(DiscoveryResult::Accepted(state.into_schema(record, row)));
                }
                Err(error) => error,
            };

            let class = classify(&error);
            debug!(table = %state.table, attempt = number, class = class.label(), error = %error, "Candidate rejected");
            state.attempts.push(Attempt {
                number,
                record: record.clone(),
                error: Some(error.clone()),
                class: Some(class.clone()),
            });

            if error.is_transport() {
                // The insert may have committed before the connection dropped.
                self.cleanup(&state.table, &record).await;
                warn!(table = %state.table, error = %error, "Transport failure; stopping");
                return Ok(DiscoveryResult::Exhausted(
                    state.into_exhaustion(ExhaustionReason::TransportFailure, Some(error)),
                ));
            }

            match state.refine(&record, &class) {
                Refinement::Retry => last_error = Some(error),
                Refinement::Stop(reason) => {
                    info!(table = %state.table, attempts = number, reason = %reason, "Discovery exhausted");
                    return Ok(DiscoveryResult::Exhausted(
                        state.into_exhaustion(reason, Some(error)),
                    ));
                }
            }
        }

        info!(table = %state.table, attempts = self.config.max_attempts, "Attempt budget exhausted");
        Ok(DiscoveryResult::Exhausted(
            state.into_exhaustion(ExhaustionReason::BudgetExhausted, last_error),
        ))
    }

    /// Best-effort removal of a probe row; failures are logged only.
    async fn cleanup(&self, table: &str, record: &CandidateRecord) {
        if let Err(e) = self
            .store
            .delete(table, record.key_column(), record.key())
            .await
        {
            warn!(table, key = %record.key(), error = %e, "Failed to delete probe row");
        }
    }
}
