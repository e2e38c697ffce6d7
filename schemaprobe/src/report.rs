//! Probe reports and their output.

use chrono::{DateTime, Utc};
use schemaprobe_core::{DiscoveryResult, ProbeError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A table that could not be probed at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableFailure {
    pub table: String,
    pub error: String,
}

/// Results of one plan run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeReport {
    pub generated_at: DateTime<Utc>,
    /// Store description (never includes credentials)
    pub store: String,
    pub results: Vec<DiscoveryResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<TableFailure>,
}

impl ProbeReport {
    /// Creates an empty report for a store.
    pub fn new(store: impl Into<String>) -> Self {
        Self {
            generated_at: Utc::now(),
            store: store.into(),
            results: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// Number of tables with an accepted record.
    pub fn accepted(&self) -> usize {
        self.results.iter().filter(|r| r.is_accepted()).count()
    }

    /// Number of tables that ran out of options.
    pub fn exhausted(&self) -> usize {
        self.results.len().saturating_sub(self.accepted())
    }

    /// Whether every table produced an accepted record.
    pub fn is_success(&self) -> bool {
        self.exhausted() == 0 && self.failures.is_empty()
    }

    /// One line per table, for the terminal.
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .results
            .iter()
            .map(|result| match result {
                DiscoveryResult::Accepted(schema) => format!(
                    "✓ {}: accepted after {} attempt(s), {} column(s), {} required",
                    schema.table,
                    schema.attempts.len(),
                    schema.columns.len(),
                    schema.required_columns().count()
                ),
                DiscoveryResult::Exhausted(exhaustion) => format!(
                    "✗ {}: {} after {} attempt(s)",
                    exhaustion.table,
                    exhaustion.reason,
                    exhaustion.attempts.len()
                ),
            })
            .collect();
        lines.extend(
            self.failures
                .iter()
                .map(|f| format!("✗ {}: {}", f.table, f.error)),
        );
        lines
    }

    /// Pretty JSON rendering of the report.
    ///
    /// # Errors
    /// Returns error if serialization fails
    pub fn to_json(&self) -> Result<String, ProbeError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| ProbeError::serialization("Failed to serialize probe report", e))
    }

    /// Writes the report as JSON.
    ///
    /// # Errors
    /// Returns error if serialization or the write fails
    pub async fn save(&self, path: &Path) -> Result<(), ProbeError> {
        let json = self.to_json()?;
        tokio::fs::write(path, json)
            .await
            .map_err(|e| ProbeError::io(format!("Failed to write to {}", path.display()), e))
    }
}
