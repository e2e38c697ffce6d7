//! Core data models for schema discovery.
//!
//! These types describe what the engine knows about a table while probing it
//! (candidate pool, submitted records, attempt trace) and what it reports
//! once the run ends. They are serializable so the CLI can emit them as a
//! JSON report.

use crate::classify::ErrorClass;
use crate::store::{Record, StoreError};
use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeSet;

/// A hypothesis that column `key` exists and accepts `value`.
///
/// Candidates with a negative priority are held in reserve: they are not
/// sent until the store reports their column as required.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldCandidate {
    /// Column name
    pub key: String,
    /// Value to submit for the column
    pub value: Value,
    /// Higher goes first; negative means reserve
    #[serde(default)]
    pub priority: i32,
}

impl FieldCandidate {
    /// Creates a candidate with the given priority.
    pub fn new(key: impl Into<String>, value: impl Into<Value>, priority: i32) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            priority,
        }
    }

    /// Creates a reserve candidate that is only sent once its column is required.
    pub fn reserve(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(key, value, -1)
    }

    /// Whether this candidate is included when building a record.
    pub fn is_included(&self) -> bool {
        self.priority >= 0
    }
}

/// Mutable pool of field candidates for a single probing run.
///
/// Holds at most one candidate per column. Columns the store rejected as
/// unknown are remembered in an exclusion set and can never re-enter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CandidatePool {
    candidates: Vec<FieldCandidate>,
    excluded: BTreeSet<String>,
}

impl CandidatePool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a pool from candidates; later duplicates replace earlier ones.
    pub fn from_candidates(candidates: impl IntoIterator<Item = FieldCandidate>) -> Self {
        let mut pool = Self::new();
        for candidate in candidates {
            pool.insert(candidate);
        }
        pool
    }

    /// Inserts or replaces the candidate for `candidate.key`.
    ///
    /// Replacement keeps the original position so tie-breaks stay stable.
    /// Returns false when the column has been excluded.
    pub fn insert(&mut self, candidate: FieldCandidate) -> bool {
        if self.excluded.contains(&candidate.key) {
            return false;
        }
        match self.candidates.iter_mut().find(|c| c.key == candidate.key) {
            Some(existing) => *existing = candidate,
            None => self.candidates.push(candidate),
        }
        true
    }

    /// Removes a candidate without excluding its column.
    pub fn remove(&mut self, key: &str) -> Option<FieldCandidate> {
        let index = self.candidates.iter().position(|c| c.key == key)?;
        Some(self.candidates.remove(index))
    }

    /// Permanently removes a column from this run.
    ///
    /// Returns true if a candidate was present for it.
    pub fn exclude(&mut self, key: &str) -> bool {
        self.excluded.insert(key.to_string());
        self.remove(key).is_some()
    }

    /// Whether the column was excluded earlier in the run.
    pub fn is_excluded(&self, key: &str) -> bool {
        self.excluded.contains(key)
    }

    /// Looks up the candidate for a column.
    pub fn get(&self, key: &str) -> Option<&FieldCandidate> {
        self.candidates.iter().find(|c| c.key == key)
    }

    /// Included candidates in descending priority, insertion order on ties.
    pub fn included(&self) -> Vec<&FieldCandidate> {
        let mut included: Vec<&FieldCandidate> =
            self.candidates.iter().filter(|c| c.is_included()).collect();
        // sort_by is stable, which preserves insertion order for equal priorities
        included.sort_by(|a, b| b.priority.cmp(&a.priority));
        included
    }

    /// Priority one above every candidate currently in the pool.
    pub fn next_top_priority(&self) -> i32 {
        self.candidates
            .iter()
            .map(|c| c.priority)
            .max()
            .unwrap_or(0)
            .max(0)
            .saturating_add(1)
    }

    /// Iterates every candidate, reserve ones included.
    pub fn iter(&self) -> impl Iterator<Item = &FieldCandidate> {
        self.candidates.iter()
    }

    /// Columns excluded during the run.
    pub fn excluded(&self) -> impl Iterator<Item = &String> {
        self.excluded.iter()
    }

    /// Number of candidates, reserve ones included.
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    /// Whether the pool holds no candidates.
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

/// One hypothesized row, in submission order.
///
/// The first entry is always the generated probe key.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateRecord {
    fields: Vec<(String, Value)>,
}

impl CandidateRecord {
    /// Starts a record with its probe key.
    pub fn new(key_column: impl Into<String>, key: Value) -> Self {
        Self {
            fields: vec![(key_column.into(), key)],
        }
    }

    /// Appends a field, replacing any existing value for the column.
    pub fn push(&mut self, column: impl Into<String>, value: Value) {
        let column = column.into();
        match self.fields.iter_mut().find(|(c, _)| *c == column) {
            Some(entry) => entry.1 = value,
            None => self.fields.push((column, value)),
        }
    }

    /// Name of the key column.
    pub fn key_column(&self) -> &str {
        self.fields.first().map_or("", |(c, _)| c.as_str())
    }

    /// Probe key value.
    pub fn key(&self) -> &Value {
        self.fields.first().map_or(&Value::Null, |(_, v)| v)
    }

    /// Value submitted for a column.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, v)| v)
    }

    /// Whether the record carries a column.
    pub fn contains(&self, column: &str) -> bool {
        self.get(column).is_some()
    }

    /// Column names in submission order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(c, _)| c.as_str())
    }

    /// Column/value pairs in submission order.
    pub fn fields(&self) -> &[(String, Value)] {
        &self.fields
    }

    /// Number of columns including the key.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Always false; a record carries at least its key.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Converts to a JSON object for transport.
    pub fn to_record(&self) -> Record {
        self.fields.iter().cloned().collect()
    }
}

impl Serialize for CandidateRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (column, value) in &self.fields {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

/// Reads a JSON object in document order so the key stays first.
struct CandidateRecordVisitor;

impl<'de> Visitor<'de> for CandidateRecordVisitor {
    type Value = CandidateRecord;

    fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "an object whose first entry is the probe key")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let Some((key_column, key)) = access.next_entry::<String, Value>()? else {
            return Err(de::Error::invalid_length(0, &self));
        };
        let mut record = CandidateRecord::new(key_column, key);
        while let Some((column, value)) = access.next_entry::<String, Value>()? {
            record.push(column, value);
        }
        Ok(record)
    }
}

impl<'de> Deserialize<'de> for CandidateRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(CandidateRecordVisitor)
    }
}

/// Best-effort column type inferred from a JSON value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeGuess {
    Null,
    Boolean,
    Integer,
    Float,
    Uuid,
    Timestamp,
    Date,
    Text,
    Json,
    Array,
}

impl TypeGuess {
    /// Infers a type from a value. Strings are checked for UUID and ISO shapes.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Null => TypeGuess::Null,
            Value::Bool(_) => TypeGuess::Boolean,
            Value::Number(n) if n.is_i64() || n.is_u64() => TypeGuess::Integer,
            Value::Number(_) => TypeGuess::Float,
            Value::String(s) => Self::from_text(s),
            Value::Array(_) => TypeGuess::Array,
            Value::Object(_) => TypeGuess::Json,
        }
    }

    fn from_text(s: &str) -> Self {
        if uuid::Uuid::parse_str(s).is_ok() && s.len() == 36 {
            TypeGuess::Uuid
        } else if chrono::DateTime::parse_from_rfc3339(s).is_ok()
            || chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
        {
            TypeGuess::Timestamp
        } else if chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok() {
            TypeGuess::Date
        } else {
            TypeGuess::Text
        }
    }
}

impl std::fmt::Display for TypeGuess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TypeGuess::Null => "null",
            TypeGuess::Boolean => "boolean",
            TypeGuess::Integer => "integer",
            TypeGuess::Float => "float",
            TypeGuess::Uuid => "uuid",
            TypeGuess::Timestamp => "timestamp",
            TypeGuess::Date => "date",
            TypeGuess::Text => "text",
            TypeGuess::Json => "json",
            TypeGuess::Array => "array",
        };
        write!(f, "{}", name)
    }
}

/// One submission and the error that followed it, if any.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attempt {
    /// 1-based attempt number within the run
    pub number: u32,
    /// Record submitted
    pub record: CandidateRecord,
    /// Store error, absent for the accepted attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StoreError>,
    /// Classification of `error`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<ErrorClass>,
}

/// A column observed in the accepted row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredColumn {
    pub name: String,
    pub type_guess: TypeGuess,
    /// The store reported this column as not-null during the run
    pub required: bool,
    /// The engine sent this column (as opposed to a store-side default)
    pub submitted: bool,
    /// Value stored in the accepted row
    pub sample: Value,
}

/// Minimal schema learned from an accepted probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredSchema {
    pub table: String,
    pub columns: Vec<DiscoveredColumn>,
    /// The record the store accepted
    pub accepted_record: CandidateRecord,
    /// Full trace, the accepted attempt last
    pub attempts: Vec<Attempt>,
    /// Enum values the store accepted or rejected, per column
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enum_findings: Vec<EnumFinding>,
}

impl DiscoveredSchema {
    /// Looks up a discovered column.
    pub fn column(&self, name: &str) -> Option<&DiscoveredColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Columns reported as required during the run.
    pub fn required_columns(&self) -> impl Iterator<Item = &DiscoveredColumn> {
        self.columns.iter().filter(|c| c.required)
    }
}

/// Enum domain evidence gathered for one column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnumFinding {
    pub column: String,
    pub rejected: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted: Option<Value>,
}

/// Why a run stopped without an accepted record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ExhaustionReason {
    /// The store returned an error no refinement applies to
    Unclassified,
    /// The store could not be reached
    TransportFailure,
    /// Every enum value supplied for a column was rejected
    EnumPoolExhausted { column: String },
    /// The attempt budget ran out
    BudgetExhausted,
    /// A classified error named something the engine cannot change
    Stalled { detail: String },
    /// The caller cancelled the run between attempts
    Cancelled,
}

impl std::fmt::Display for ExhaustionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExhaustionReason::Unclassified => write!(f, "unclassified store error"),
            ExhaustionReason::TransportFailure => write!(f, "transport failure"),
            ExhaustionReason::EnumPoolExhausted { column } => {
                write!(f, "enum pool exhausted for column '{}'", column)
            }
            ExhaustionReason::BudgetExhausted => write!(f, "attempt budget exhausted"),
            ExhaustionReason::Stalled { detail } => write!(f, "stalled: {}", detail),
            ExhaustionReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Terminal output of a run that never got a record accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exhaustion {
    pub table: String,
    pub reason: ExhaustionReason,
    pub attempts: Vec<Attempt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<StoreError>,
    /// Columns whose constraints could not be satisfied
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unresolved: Vec<String>,
}

/// Outcome of one probing run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DiscoveryResult {
    Accepted(DiscoveredSchema),
    Exhausted(Exhaustion),
}

impl DiscoveryResult {
    /// Table the run probed.
    pub fn table(&self) -> &str {
        match self {
            DiscoveryResult::Accepted(schema) => &schema.table,
            DiscoveryResult::Exhausted(exhaustion) => &exhaustion.table,
        }
    }

    /// Attempt trace, in submission order.
    pub fn attempts(&self) -> &[Attempt] {
        match self {
            DiscoveryResult::Accepted(schema) => &schema.attempts,
            DiscoveryResult::Exhausted(exhaustion) => &exhaustion.attempts,
        }
    }

    /// Whether a record was accepted.
    pub fn is_accepted(&self) -> bool {
        matches!(self, DiscoveryResult::Accepted(_))
    }

    /// Schema, if accepted.
    pub fn schema(&self) -> Option<&DiscoveredSchema> {
        match self {
            DiscoveryResult::Accepted(schema) => Some(schema),
            DiscoveryResult::Exhausted(_) => None,
        }
    }

    /// Exhaustion details, if the run failed.
    pub fn exhaustion(&self) -> Option<&Exhaustion> {
        match self {
            DiscoveryResult::Accepted(_) => None,
            DiscoveryResult::Exhausted(exhaustion) => Some(exhaustion),
        }
    }
}
