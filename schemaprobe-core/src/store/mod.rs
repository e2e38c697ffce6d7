//! Record store traits and implementations.
//!
//! The discovery engine only ever talks to a store through [`RecordStore`],
//! a keyed-record collection with `insert`, `select`, and `delete`. The trait
//! is object-safe so callers can hold a `Box<dyn RecordStore>` picked at
//! runtime.
//!
//! # Module Structure
//! - `memory`: in-process simulated store with declared table specs
//! - `postgrest`: HTTP client for PostgREST-style REST facades (feature `postgrest`)

use crate::models::CandidateRecord;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod memory;
#[cfg(feature = "postgrest")]
pub mod postgrest;

pub use memory::{ColumnKind, ColumnSpec, MemoryStore, TableSpec};
#[cfg(feature = "postgrest")]
pub use postgrest::{PostgrestStore, StoreConnectionConfig};

/// A single row as returned by the store.
pub type Record = serde_json::Map<String, Value>;

/// Whether the store answered at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreErrorKind {
    /// The store processed the request and returned an error body
    Rejected,
    /// Connection, timeout, or protocol failure before a usable answer
    Transport,
}

impl std::fmt::Display for StoreErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreErrorKind::Rejected => write!(f, "rejected"),
            StoreErrorKind::Transport => write!(f, "transport failure"),
        }
    }
}

/// Structured failure returned by a store operation.
///
/// Mirrors the PostgREST error body (`code`, `message`, `details`, `hint`)
/// so the classifier can prefer the code and fall back to text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreError {
    /// Rejection or transport failure
    pub kind: StoreErrorKind,
    /// Machine-readable code (SQLSTATE or `PGRST*`), when the store sent one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Human-readable message
    pub message: String,
    /// Extra detail line, e.g. `Failing row contains (...)`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Store-provided hint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    /// HTTP status, when the store is reached over HTTP
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl StoreError {
    /// Creates a rejection with an optional code.
    pub fn rejected(code: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            kind: StoreErrorKind::Rejected,
            code: code.map(str::to_string),
            message: message.into(),
            details: None,
            hint: None,
            status: None,
        }
    }

    /// Creates a transport failure.
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            kind: StoreErrorKind::Transport,
            code: None,
            message: message.into(),
            details: None,
            hint: None,
            status: None,
        }
    }

    /// Builder method to attach details.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Builder method to attach a hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Builder method to attach an HTTP status.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Returns true for connection-level failures.
    pub fn is_transport(&self) -> bool {
        self.kind == StoreErrorKind::Transport
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} [{}]: {}", self.kind, code, self.message)?,
            None => write!(f, "{}: {}", self.kind, self.message)?,
        }
        if let Some(details) = &self.details {
            write!(f, " ({})", details)?;
        }
        Ok(())
    }
}

impl std::error::Error for StoreError {}

/// Row filter for [`RecordStore::select`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Filter {
    /// `column = value`
    Eq { column: String, value: Value },
    /// `column LIKE pattern`: `%` and `_` are wildcards, `\\` escapes
    Like { column: String, pattern: String },
}

impl Filter {
    /// Equality filter.
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq {
            column: column.into(),
            value: value.into(),
        }
    }

    /// Prefix match filter (`<prefix>%`).
    ///
    /// LIKE metacharacters in `prefix` are escaped, so `probe_` matches
    /// only keys that literally start with `probe_`.
    pub fn starts_with(column: impl Into<String>, prefix: &str) -> Self {
        let mut pattern = String::with_capacity(prefix.len().saturating_add(4));
        for c in prefix.chars() {
            if matches!(c, '\\' | '%' | '_') {
                pattern.push('\\');
            }
            pattern.push(c);
        }
        pattern.push('%');
        Self::Like {
            column: column.into(),
            pattern,
        }
    }

    /// Checks whether a record satisfies this filter.
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Filter::Eq { column, value } => record.get(column) == Some(value),
            Filter::Like { column, pattern } => match record.get(column) {
                Some(Value::String(s)) => like_matches(pattern, s),
                _ => false,
            },
        }
    }
}

enum LikeToken {
    Any,
    One,
    Char(char),
}

fn like_tokens(pattern: &str) -> Vec<LikeToken> {
    let mut tokens = Vec::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        tokens.push(match c {
            '%' => LikeToken::Any,
            '_' => LikeToken::One,
            '\\' => LikeToken::Char(chars.next().unwrap_or('\\')),
            other => LikeToken::Char(other),
        });
    }
    tokens
}

/// PostgreSQL LIKE semantics: `%` any run, `_` one character, `\\` escape.
fn like_matches(pattern: &str, text: &str) -> bool {
    let tokens = like_tokens(pattern);
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0usize, 0usize);
    // Pattern position after the last `%`, and the text position it resumes from.
    let mut resume: Option<(usize, usize)> = None;

    while let Some(current) = text.get(t) {
        match tokens.get(p) {
            Some(LikeToken::Any) => {
                p = p.saturating_add(1);
                resume = Some((p, t));
            }
            Some(LikeToken::One) => {
                p = p.saturating_add(1);
                t = t.saturating_add(1);
            }
            Some(LikeToken::Char(c)) if c == current => {
                p = p.saturating_add(1);
                t = t.saturating_add(1);
            }
            _ => match resume {
                Some((after_any, from)) => {
                    let next = from.saturating_add(1);
                    resume = Some((after_any, next));
                    p = after_any;
                    t = next;
                }
                None => return false,
            },
        }
    }

    tokens.iter().skip(p).all(|token| matches!(token, LikeToken::Any))
}

/// Keyed-record collection store probed by the discovery engine.
///
/// # Contract
/// - `insert` is a plain insert: a key conflict must fail, never upsert
/// - `delete` is best-effort cleanup; the engine logs but never propagates
///   its failures during a run
/// - Timeouts and retries are the implementation's concern; the engine
///   submits each attempt exactly once
///
/// # Object Safety
/// This trait is object-safe, allowing for dynamic dispatch through
/// `Box<dyn RecordStore>` or `Arc<dyn RecordStore>`.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Inserts a single record and returns the stored row.
    ///
    /// # Errors
    /// Returns the store's structured rejection, or a transport failure
    async fn insert(
        &self,
        table: &str,
        record: &CandidateRecord,
    ) -> std::result::Result<Record, StoreError>;

    /// Selects up to `limit` rows matching every filter.
    ///
    /// # Errors
    /// Returns the store's structured rejection, or a transport failure
    async fn select(
        &self,
        table: &str,
        filters: &[Filter],
        limit: u32,
    ) -> std::result::Result<Vec<Record>, StoreError>;

    /// Deletes the row whose `key_column` equals `key`.
    ///
    /// # Errors
    /// Returns the store's structured rejection, or a transport failure
    async fn delete(
        &self,
        table: &str,
        key_column: &str,
        key: &Value,
    ) -> std::result::Result<(), StoreError>;

    /// Short label for logs (never includes credentials)
    fn describe(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => Record::new(),
        }
    }

    #[test]
    fn test_store_error_display_includes_code_and_details() {
        let error = StoreError::rejected(Some("23502"), "null value in column \"total_price\"")
            .with_details("Failing row contains (1, null)");
        let rendered = error.to_string();

        assert!(rendered.starts_with("rejected [23502]"));
        assert!(rendered.contains("Failing row contains"));
    }

    #[test]
    fn test_transport_error_kind() {
        let error = StoreError::transport("connection refused");
        assert!(error.is_transport());
        assert_eq!(error.code, None);
    }

    #[test]
    fn test_filter_eq_matches() {
        let row = record(json!({"id": "a", "status": "Confirmed"}));
        assert!(Filter::eq("status", "Confirmed").matches(&row));
        assert!(!Filter::eq("status", "Pending").matches(&row));
        assert!(!Filter::eq("missing", "x").matches(&row));
    }

    #[test]
    fn test_filter_prefix_matches() {
        let row = record(json!({"id": "probe_1234"}));
        assert!(Filter::starts_with("id", "probe_").matches(&row));
        assert!(!Filter::starts_with("id", "other_").matches(&row));

        let numeric = record(json!({"id": 5}));
        assert!(!Filter::starts_with("id", "probe_").matches(&numeric));
    }

    #[test]
    fn test_prefix_escapes_like_metacharacters() {
        assert_eq!(
            Filter::starts_with("id", "probe_"),
            Filter::Like {
                column: "id".to_string(),
                pattern: r"probe\_%".to_string(),
            }
        );

        let lookalike = record(json!({"id": "probeXreal_customer_row"}));
        assert!(!Filter::starts_with("id", "probe_").matches(&lookalike));

        let percent = record(json!({"id": "50%_off"}));
        assert!(Filter::starts_with("id", "50%").matches(&percent));
        assert!(!Filter::starts_with("id", "50%").matches(&record(json!({"id": "500"}))));
    }

    #[test]
    fn test_like_matches_wildcards() {
        assert!(like_matches("%", "anything"));
        assert!(like_matches("probe_%", "probe_"));
        assert!(like_matches("%_check", "bookings_status_check"));
        assert!(like_matches("a%c%e", "abcde"));
        assert!(!like_matches("a%c%e", "abcdf"));
        assert!(like_matches("exact", "exact"));
        assert!(!like_matches("exact", "exactly"));
    }

    #[test]
    fn test_like_matches_single_character_wildcard() {
        assert!(like_matches("probe_%", "probeX1"));
        assert!(like_matches("a_c", "abc"));
        assert!(!like_matches("a_c", "ac"));
        assert!(like_matches("%n_", "banana"));
        assert!(!like_matches("%a_", "banana"));
        assert!(like_matches(r"probe\_%", "probe_1"));
        assert!(!like_matches(r"probe\_%", "probeX1"));
        assert!(like_matches(r"100\%", "100%"));
        assert!(!like_matches(r"100\%", "1000"));
    }
}
