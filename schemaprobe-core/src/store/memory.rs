//! In-process record store with declared table definitions.
//!
//! `MemoryStore` validates inserts the way PostgREST in front of PostgreSQL
//! does, and rejects them with the same codes and message shapes. That makes
//! it a faithful stand-in for offline dry runs (`schemaprobe simulate`) and
//! for tests of the discovery engine.
//!
//! Validation order per insert:
//! 1. table exists (`PGRST205`)
//! 2. every submitted column exists (`PGRST204`)
//! 3. every submitted value casts to its column type (`22P02`)
//! 4. required columns are present (`23502`, declaration order)
//! 5. check constraints hold (`23514`)
//! 6. the key is unique (`23505`)

use super::{Filter, Record, RecordStore, StoreError};
use crate::models::CandidateRecord;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

/// Column type of a simulated table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ColumnKind {
    Text,
    Integer,
    Numeric,
    Boolean,
    Uuid,
    Timestamp,
    Date,
    Json,
    /// Postgres enum type with a fixed label set
    Enum { type_name: String, values: Vec<String> },
    /// Text column guarded by `CHECK (col IN (...))`
    Check { values: Vec<String> },
}

impl ColumnKind {
    fn sql_name(&self) -> &str {
        match self {
            ColumnKind::Text | ColumnKind::Check { .. } => "text",
            ColumnKind::Integer => "integer",
            ColumnKind::Numeric => "numeric",
            ColumnKind::Boolean => "boolean",
            ColumnKind::Uuid => "uuid",
            ColumnKind::Timestamp => "timestamp with time zone",
            ColumnKind::Date => "date",
            ColumnKind::Json => "json",
            ColumnKind::Enum { type_name, .. } => type_name,
        }
    }

    /// Whether `value` (non-null) casts to this type.
    fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (ColumnKind::Json, _) => true,
            (_, Value::Object(_) | Value::Array(_)) => false,
            (ColumnKind::Text | ColumnKind::Check { .. }, _) => true,
            (ColumnKind::Integer, Value::Number(n)) => n.is_i64() || n.is_u64(),
            (ColumnKind::Integer, Value::String(s)) => s.trim().parse::<i64>().is_ok(),
            (ColumnKind::Numeric, Value::Number(_)) => true,
            (ColumnKind::Numeric, Value::String(s)) => s.trim().parse::<f64>().is_ok(),
            (ColumnKind::Boolean, Value::Bool(_)) => true,
            (ColumnKind::Boolean, Value::String(s)) => matches!(
                s.to_lowercase().as_str(),
                "true" | "false" | "t" | "f" | "yes" | "no" | "1" | "0"
            ),
            (ColumnKind::Uuid, Value::String(s)) => uuid::Uuid::parse_str(s).is_ok(),
            (ColumnKind::Timestamp, Value::String(s)) => {
                chrono::DateTime::parse_from_rfc3339(s).is_ok()
                    || chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
                    || chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
            }
            (ColumnKind::Date, Value::String(s)) => {
                chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
                    || chrono::DateTime::parse_from_rfc3339(s).is_ok()
            }
            (ColumnKind::Enum { values, .. }, Value::String(s)) => values.contains(s),
            _ => false,
        }
    }
}

/// Column of a simulated table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub kind: ColumnKind,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    /// Value stored when the column is omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

fn default_nullable() -> bool {
    true
}

impl ColumnSpec {
    /// Nullable column without a default.
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: true,
            default: None,
        }
    }

    /// Builder method to mark the column NOT NULL.
    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Builder method to set a column default.
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }
}

/// Definition of a simulated table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSpec {
    pub name: String,
    /// Primary key column
    #[serde(default = "default_key_column")]
    pub key_column: String,
    pub columns: Vec<ColumnSpec>,
}

fn default_key_column() -> String {
    "id".to_string()
}

impl TableSpec {
    /// Table keyed by `id`.
    pub fn new(name: impl Into<String>, columns: Vec<ColumnSpec>) -> Self {
        Self {
            name: name.into(),
            key_column: default_key_column(),
            columns,
        }
    }

    /// Builder method to set the key column.
    pub fn with_key_column(mut self, column: impl Into<String>) -> Self {
        self.key_column = column.into();
        self
    }

    fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }
}

#[derive(Debug, Default)]
struct TableState {
    spec: Option<TableSpec>,
    rows: Vec<Record>,
}

#[derive(Debug, Default)]
struct Inner {
    tables: BTreeMap<String, TableState>,
    insert_calls: u32,
    delete_calls: u32,
    insert_failure: Option<StoreError>,
    delete_failure: Option<StoreError>,
}

/// Simulated record store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Creates a store with no tables.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store from table definitions.
    pub fn with_tables(specs: impl IntoIterator<Item = TableSpec>) -> Self {
        let store = Self::new();
        for spec in specs {
            store.add_table(spec);
        }
        store
    }

    /// Declares (or redeclares) a table. Existing rows are kept.
    pub fn add_table(&self, spec: TableSpec) {
        if let Ok(mut inner) = self.inner.lock() {
            let state = inner.tables.entry(spec.name.clone()).or_default();
            state.spec = Some(spec);
        }
    }

    /// Adds a row directly, bypassing validation.
    pub fn seed_row(&self, table: &str, row: Record) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.tables.entry(table.to_string()).or_default().rows.push(row);
        }
    }

    /// Makes every subsequent insert fail with `error`.
    pub fn fail_inserts_with(&self, error: StoreError) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.insert_failure = Some(error);
        }
    }

    /// Makes every subsequent delete fail with `error`.
    pub fn fail_deletes_with(&self, error: StoreError) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.delete_failure = Some(error);
        }
    }

    /// Clears injected delete failures.
    pub fn clear_delete_failure(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.delete_failure = None;
        }
    }

    /// Rows currently stored in a table.
    pub fn rows(&self, table: &str) -> Vec<Record> {
        self.inner
            .lock()
            .map(|inner| {
                inner
                    .tables
                    .get(table)
                    .map(|state| state.rows.clone())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    /// Number of rows currently stored in a table.
    pub fn row_count(&self, table: &str) -> usize {
        self.rows(table).len()
    }

    /// Number of insert calls received, successful or not.
    pub fn insert_calls(&self) -> u32 {
        self.inner.lock().map(|i| i.insert_calls).unwrap_or(0)
    }

    /// Number of delete calls received.
    pub fn delete_calls(&self) -> u32 {
        self.inner.lock().map(|i| i.delete_calls).unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::transport("memory store lock poisoned"))
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn failing_row(spec: &TableSpec, row: &Record) -> String {
    let values: Vec<String> = spec
        .columns
        .iter()
        .map(|c| match row.get(&c.name) {
            Some(Value::Null) | None => "null".to_string(),
            Some(v) => render(v),
        })
        .collect();
    format!("Failing row contains ({}).", values.join(", "))
}

/// Validates a candidate against a table definition and builds the stored row.
fn validate(spec: &TableSpec, record: &CandidateRecord, rows: &[Record]) -> Result<Record, StoreError> {
    for column in record.columns() {
        if spec.column(column).is_none() {
            return Err(StoreError::rejected(
                Some("PGRST204"),
                format!(
                    "Could not find the '{}' column of '{}' in the schema cache",
                    column, spec.name
                ),
            )
            .with_status(400));
        }
    }

    for (column, value) in record.fields() {
        let Some(column_spec) = spec.column(column) else {
            continue;
        };
        if value.is_null() || column_spec.kind.accepts(value) {
            continue;
        }
        let message = match &column_spec.kind {
            ColumnKind::Enum { type_name, .. } => format!(
                "invalid input value for enum {}: \"{}\"",
                type_name,
                render(value)
            ),
            kind => format!(
                "invalid input syntax for type {}: \"{}\"",
                kind.sql_name(),
                render(value)
            ),
        };
        return Err(StoreError::rejected(Some("22P02"), message).with_status(400));
    }

    let mut row = Record::new();
    for column_spec in &spec.columns {
        let value = record
            .get(&column_spec.name)
            .cloned()
            .or_else(|| column_spec.default.clone())
            .unwrap_or(Value::Null);
        row.insert(column_spec.name.clone(), value);
    }

    for column_spec in &spec.columns {
        let missing = row.get(&column_spec.name).is_none_or(Value::is_null);
        if !column_spec.nullable && missing {
            return Err(StoreError::rejected(
                Some("23502"),
                format!(
                    "null value in column \"{}\" of relation \"{}\" violates not-null constraint",
                    column_spec.name, spec.name
                ),
            )
            .with_details(failing_row(spec, &row))
            .with_status(400));
        }
    }

    for column_spec in &spec.columns {
        if let ColumnKind::Check { values } = &column_spec.kind
            && let Some(value) = row.get(&column_spec.name)
            && !value.is_null()
            && !values.contains(&render(value))
        {
            return Err(StoreError::rejected(
                Some("23514"),
                format!(
                    "new row for relation \"{}\" violates check constraint \"{}_{}_check\"",
                    spec.name, spec.name, column_spec.name
                ),
            )
            .with_details(failing_row(spec, &row))
            .with_status(400));
        }
    }

    if let Some(key) = row.get(&spec.key_column)
        && !key.is_null()
        && rows.iter().any(|r| r.get(&spec.key_column) == Some(key))
    {
        return Err(StoreError::rejected(
            Some("23505"),
            format!(
                "duplicate key value violates unique constraint \"{}_pkey\"",
                spec.name
            ),
        )
        .with_details(format!(
            "Key ({})=({}) already exists.",
            spec.key_column,
            render(key)
        ))
        .with_status(409));
    }

    Ok(row)
}

fn missing_table(table: &str) -> StoreError {
    StoreError::rejected(
        Some("PGRST205"),
        format!(
            "Could not find the table 'public.{}' in the schema cache",
            table
        ),
    )
    .with_status(404)
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn insert(&self, table: &str, record: &CandidateRecord) -> Result<Record, StoreError> {
        let mut inner = self.lock()?;
        inner.insert_calls = inner.insert_calls.saturating_add(1);

        if let Some(error) = &inner.insert_failure {
            return Err(error.clone());
        }

        let state = inner
            .tables
            .get_mut(table)
            .ok_or_else(|| missing_table(table))?;
        let spec = state.spec.as_ref().ok_or_else(|| missing_table(table))?;

        let row = validate(spec, record, &state.rows)?;
        state.rows.push(row.clone());
        Ok(row)
    }

    async fn select(
        &self,
        table: &str,
        filters: &[Filter],
        limit: u32,
    ) -> Result<Vec<Record>, StoreError> {
        let inner = self.lock()?;
        let state = inner.tables.get(table).ok_or_else(|| missing_table(table))?;

        Ok(state
            .rows
            .iter()
            .filter(|row| filters.iter().all(|f| f.matches(row)))
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn delete(&self, table: &str, key_column: &str, key: &Value) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.delete_calls = inner.delete_calls.saturating_add(1);

        if let Some(error) = &inner.delete_failure {
            return Err(error.clone());
        }

        let state = inner
            .tables
            .get_mut(table)
            .ok_or_else(|| missing_table(table))?;
        state.rows.retain(|row| row.get(key_column) != Some(key));
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
