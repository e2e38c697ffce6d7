//! Store error classification.
//!
//! Maps a [`StoreError`] to the refinement the discovery engine should apply.
//! Classification is pure: it looks at the error code first (SQLSTATE or
//! `PGRST*`) and falls back to matching the message text when the code is
//! missing or unfamiliar. Transport failures are never classified as
//! refinable.

use crate::store::StoreError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// PostgREST: column missing from the schema cache
pub const CODE_SCHEMA_CACHE_COLUMN: &str = "PGRST204";
/// SQLSTATE undefined_column
pub const CODE_UNDEFINED_COLUMN: &str = "42703";
/// SQLSTATE not_null_violation
pub const CODE_NOT_NULL: &str = "23502";
/// SQLSTATE invalid_text_representation (enum labels and type casts)
pub const CODE_INVALID_TEXT: &str = "22P02";
/// SQLSTATE check_violation
pub const CODE_CHECK: &str = "23514";

/// What a store rejection tells the engine about the table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "class", rename_all = "snake_case")]
pub enum ErrorClass {
    /// The store does not recognise `column`
    UnknownColumn { column: String },
    /// `column` must be present and non-null
    NotNullViolation { column: String },
    /// `value` is not a label of enum `enum_type`
    EnumViolation {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        enum_type: Option<String>,
        value: String,
    },
    /// A check constraint rejected the row
    CheckViolation { constraint: String },
    /// `value` could not be cast to `expected_type`
    TypeMismatch { expected_type: String, value: String },
    /// Nothing the engine can act on
    Unclassified,
}

impl ErrorClass {
    /// Whether the engine has a refinement for this class.
    pub fn is_refinable(&self) -> bool {
        !matches!(self, ErrorClass::Unclassified)
    }

    /// Short name for logs.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorClass::UnknownColumn { .. } => "unknown_column",
            ErrorClass::NotNullViolation { .. } => "not_null_violation",
            ErrorClass::EnumViolation { .. } => "enum_violation",
            ErrorClass::CheckViolation { .. } => "check_violation",
            ErrorClass::TypeMismatch { .. } => "type_mismatch",
            ErrorClass::Unclassified => "unclassified",
        }
    }
}

/// Pre-compiled message patterns.
struct MessagePatterns {
    unknown_column: Vec<Regex>,
    not_null: Regex,
    enum_value: Regex,
    check: Regex,
    type_mismatch: Regex,
}

impl MessagePatterns {
    fn instance() -> &'static Self {
        static PATTERNS: OnceLock<MessagePatterns> = OnceLock::new();
        PATTERNS.get_or_init(Self::compile)
    }

    #[allow(clippy::expect_used)]
    fn compile() -> Self {
        Self {
            unknown_column: vec![
                Regex::new(r"Could not find the '([^']+)' column of '[^']+'")
                    .expect("Invalid schema cache pattern"),
                Regex::new(r#"column "([^"]+)" of relation "[^"]+" does not exist"#)
                    .expect("Invalid relation column pattern"),
                Regex::new(r#"column "?(?:[\w]+\.)?([\w]+)"? does not exist"#)
                    .expect("Invalid bare column pattern"),
            ],
            not_null: Regex::new(
                r#"null value in column "([^"]+)"(?: of relation "[^"]+")? violates not-null constraint"#,
            )
            .expect("Invalid not-null pattern"),
            enum_value: Regex::new(r#"invalid input value for enum ([\w.]+): "((?:[^"\\]|\\.)*)""#)
                .expect("Invalid enum pattern"),
            check: Regex::new(r#"violates check constraint "([^"]+)""#)
                .expect("Invalid check pattern"),
            type_mismatch: Regex::new(
                r#"invalid input syntax for(?: type)? ([\w ]+?): "((?:[^"\\]|\\.)*)""#,
            )
            .expect("Invalid type mismatch pattern"),
        }
    }

    fn unknown_column(&self, message: &str) -> Option<ErrorClass> {
        self.unknown_column.iter().find_map(|pattern| {
            pattern
                .captures(message)
                .map(|caps| ErrorClass::UnknownColumn {
                    column: caps[1].to_string(),
                })
        })
    }

    fn not_null(&self, message: &str) -> Option<ErrorClass> {
        self.not_null
            .captures(message)
            .map(|caps| ErrorClass::NotNullViolation {
                column: caps[1].to_string(),
            })
    }

    fn invalid_text(&self, message: &str) -> Option<ErrorClass> {
        if let Some(caps) = self.enum_value.captures(message) {
            return Some(ErrorClass::EnumViolation {
                enum_type: Some(caps[1].to_string()),
                value: unescape(&caps[2]),
            });
        }
        self.type_mismatch
            .captures(message)
            .map(|caps| ErrorClass::TypeMismatch {
                expected_type: caps[1].trim().to_string(),
                value: unescape(&caps[2]),
            })
    }

    fn check(&self, message: &str) -> Option<ErrorClass> {
        self.check
            .captures(message)
            .map(|caps| ErrorClass::CheckViolation {
                constraint: caps[1].to_string(),
            })
    }

    /// Tries every pattern, most specific first.
    fn any(&self, message: &str) -> Option<ErrorClass> {
        self.not_null(message)
            .or_else(|| self.invalid_text(message))
            .or_else(|| self.check(message))
            .or_else(|| self.unknown_column(message))
    }
}

fn unescape(raw: &str) -> String {
    raw.replace("\\\"", "\"").replace("\\\\", "\\")
}

/// Classifies a store error.
///
/// # Example
///
/// ```rust
/// use schemaprobe_core::classify::{ErrorClass, classify};
/// use schemaprobe_core::store::StoreError;
///
/// let error = StoreError::rejected(
///     Some("23502"),
///     r#"null value in column "total_price" of relation "bookings" violates not-null constraint"#,
/// );
/// assert_eq!(
///     classify(&error),
///     ErrorClass::NotNullViolation { column: "total_price".to_string() }
/// );
/// ```
pub fn classify(error: &StoreError) -> ErrorClass {
    if error.is_transport() {
        return ErrorClass::Unclassified;
    }

    let patterns = MessagePatterns::instance();
    let message = error.message.as_str();

    let by_code = match error.code.as_deref() {
        Some(CODE_SCHEMA_CACHE_COLUMN) | Some(CODE_UNDEFINED_COLUMN) => {
            Some(patterns.unknown_column(message))
        }
        Some(CODE_NOT_NULL) => Some(patterns.not_null(message)),
        Some(CODE_INVALID_TEXT) => Some(patterns.invalid_text(message)),
        Some(CODE_CHECK) => Some(patterns.check(message)),
        _ => None,
    };

    match by_code {
        // Known code: the message only supplies the column or value.
        Some(class) => class.unwrap_or(ErrorClass::Unclassified),
        None => patterns.any(message).unwrap_or(ErrorClass::Unclassified),
    }
}
