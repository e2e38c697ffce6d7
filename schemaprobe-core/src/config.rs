//! Discovery configuration and declarative probe plans.
//!
//! - `DiscoveryConfig`: engine-wide settings (attempt budget, probe keys, throttle)
//! - `ProbePlan`: JSON document listing the tables to probe, their candidate
//!   pools, enum pools, type hints and foreign-key seeds
//!
//! # Example plan
//!
//! ```json
//! {
//!   "discovery": { "max_attempts": 20, "key_column": "id" },
//!   "tables": [
//!     {
//!       "table": "bookings",
//!       "candidates": [{ "key": "status", "value": "Pending" }],
//!       "enum_pools": { "status": ["Confirmed", "Cancelled"] },
//!       "seeds": [{ "column": "aircraft_id", "table": "aircraft" }]
//!     }
//!   ]
//! }
//! ```

use crate::defaults::TypeHint;
use crate::models::{CandidatePool, FieldCandidate};
use crate::store::{Filter, TableSpec};
use crate::{ProbeError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// Default attempt budget per table.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 20;
/// Default prefix for generated probe keys.
pub const DEFAULT_KEY_PREFIX: &str = "probe_";

/// How probe keys are generated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum KeyStrategy {
    /// Random v4 UUID, for `uuid` primary keys
    #[default]
    Uuid,
    /// `<prefix><32 hex chars>`, for text keys; enables orphan sweeps
    Prefixed { prefix: String },
}

impl KeyStrategy {
    /// Generates a fresh key. Never returns the same value twice.
    pub fn generate(&self) -> Value {
        let id = uuid::Uuid::new_v4();
        match self {
            KeyStrategy::Uuid => Value::String(id.to_string()),
            KeyStrategy::Prefixed { prefix } => {
                Value::String(format!("{}{}", prefix, id.simple()))
            }
        }
    }

    /// Prefix shared by every generated key, if any.
    pub fn prefix(&self) -> Option<&str> {
        match self {
            KeyStrategy::Uuid => None,
            KeyStrategy::Prefixed { prefix } => Some(prefix),
        }
    }

    /// Whether `*_id` placeholder columns should be UUIDs.
    pub fn uses_uuids(&self) -> bool {
        matches!(self, KeyStrategy::Uuid)
    }
}

/// Engine-wide discovery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Maximum submissions per table
    pub max_attempts: u32,
    /// Column that carries the generated probe key
    pub key_column: String,
    /// Key generation strategy
    pub key_strategy: KeyStrategy,
    /// Optional delay between attempts (milliseconds)
    pub throttle_ms: Option<u64>,
    /// Delete leftover probe rows (by key prefix) before each run
    pub sweep_before_run: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            key_column: "id".to_string(),
            key_strategy: KeyStrategy::default(),
            throttle_ms: None,
            sweep_before_run: false,
        }
    }
}

impl DiscoveryConfig {
    /// Creates a new config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to set the attempt budget.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Builder method to set the key column.
    pub fn with_key_column(mut self, column: impl Into<String>) -> Self {
        self.key_column = column.into();
        self
    }

    /// Builder method to use prefixed text keys.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_strategy = KeyStrategy::Prefixed {
            prefix: prefix.into(),
        };
        self
    }

    /// Builder method to set throttle delay.
    pub fn with_throttle_ms(mut self, ms: u64) -> Self {
        self.throttle_ms = Some(ms);
        self
    }

    /// Builder method to enable orphan sweeps before each run.
    pub fn with_sweep_before_run(mut self, enabled: bool) -> Self {
        self.sweep_before_run = enabled;
        self
    }

    /// Validates configuration values.
    ///
    /// # Errors
    /// Returns error if the budget is zero, the key column is blank, the key
    /// prefix is empty, or a sweep is requested without a key prefix
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(ProbeError::configuration(
                "max_attempts must be at least 1",
            ));
        }
        if self.key_column.trim().is_empty() {
            return Err(ProbeError::configuration("key_column cannot be empty"));
        }
        if let KeyStrategy::Prefixed { prefix } = &self.key_strategy
            && prefix.is_empty()
        {
            return Err(ProbeError::configuration("key prefix cannot be empty"));
        }
        if self.sweep_before_run && self.key_strategy.prefix().is_none() {
            return Err(ProbeError::configuration(
                "sweep_before_run requires a prefixed key strategy",
            ));
        }
        Ok(())
    }
}

/// Existing row whose key should be offered as a candidate value.
///
/// Used to satisfy foreign keys: the key of the first matching row in
/// `table` becomes the candidate for `column`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKeySeed {
    /// Column in the probed table
    pub column: String,
    /// Referenced table
    pub table: String,
    /// Key column in the referenced table
    #[serde(default = "default_seed_key_column")]
    pub key_column: String,
    /// Optional filters on the referenced table
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<Filter>,
    /// Hold the value in reserve until the column is reported as required
    #[serde(default = "default_true")]
    pub reserve: bool,
}

fn default_seed_key_column() -> String {
    "id".to_string()
}

fn default_true() -> bool {
    true
}

/// Probe definition for one table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TablePlan {
    /// Table to probe
    pub table: String,
    /// Initial candidate pool
    #[serde(default)]
    pub candidates: Vec<FieldCandidate>,
    /// Values to try, in order, when a column's value is rejected by an
    /// enum or check constraint
    #[serde(default)]
    pub enum_pools: BTreeMap<String, Vec<Value>>,
    /// Explicit types for placeholder synthesis
    #[serde(default)]
    pub type_hints: BTreeMap<String, TypeHint>,
    /// Foreign-key values to look up before probing
    #[serde(default)]
    pub seeds: Vec<ForeignKeySeed>,
    /// Per-table override of the attempt budget
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
}

impl TablePlan {
    /// Creates an empty plan for a table.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            candidates: Vec::new(),
            enum_pools: BTreeMap::new(),
            type_hints: BTreeMap::new(),
            seeds: Vec::new(),
            max_attempts: None,
        }
    }

    /// Candidate pool built from the declared candidates.
    pub fn pool(&self) -> CandidatePool {
        CandidatePool::from_candidates(self.candidates.iter().cloned())
    }
}

/// A file-backed set of table plans.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProbePlan {
    /// Engine settings shared by every table
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    /// Tables to probe
    #[serde(default)]
    pub tables: Vec<TablePlan>,
    /// Table definitions for offline simulation
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub simulated_tables: Vec<TableSpec>,
}

impl ProbePlan {
    /// Parses and validates a plan from JSON text.
    ///
    /// # Errors
    /// Returns error if the JSON is malformed or the plan is invalid
    pub fn from_json(json: &str) -> Result<Self> {
        let plan: ProbePlan = serde_json::from_str(json)
            .map_err(|e| ProbeError::serialization("Failed to parse probe plan", e))?;
        plan.validate()?;
        Ok(plan)
    }

    /// Reads and validates a plan file.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or the plan is invalid
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ProbeError::io(format!("Failed to read probe plan {}", path.display()), e)
        })?;
        Self::from_json(&text)
    }

    /// Validates the plan.
    ///
    /// # Errors
    /// Returns error if discovery settings are invalid, a table name is
    /// empty or repeated, or a per-table budget is zero
    pub fn validate(&self) -> Result<()> {
        self.discovery.validate()?;

        let mut seen = std::collections::BTreeSet::new();
        for table in &self.tables {
            if table.table.trim().is_empty() {
                return Err(ProbeError::configuration("table name cannot be empty"));
            }
            if !seen.insert(table.table.as_str()) {
                return Err(ProbeError::configuration(format!(
                    "table '{}' is listed more than once",
                    table.table
                )));
            }
            if table.max_attempts == Some(0) {
                return Err(ProbeError::configuration(format!(
                    "max_attempts for table '{}' must be at least 1",
                    table.table
                )));
            }
        }
        Ok(())
    }

    /// Finds the plan for a table.
    pub fn table(&self, name: &str) -> Option<&TablePlan> {
        self.tables.iter().find(|t| t.table == name)
    }

    /// Engine config for a table, applying its budget override.
    pub fn config_for(&self, table: &TablePlan) -> DiscoveryConfig {
        let mut config = self.discovery.clone();
        if let Some(attempts) = table.max_attempts {
            config.max_attempts = attempts;
        }
        config
    }
}
