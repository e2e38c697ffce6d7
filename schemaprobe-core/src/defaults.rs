//! Placeholder values for columns the store reports as required.
//!
//! When a not-null violation names a column the caller never supplied, the
//! engine has to invent a value. The type is taken from an explicit hint if
//! there is one, otherwise guessed from the column name.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Column type used to pick a placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeHint {
    Text,
    Integer,
    Number,
    Boolean,
    Uuid,
    Timestamp,
    Date,
    Json,
}

impl TypeHint {
    /// Default placeholder for this type.
    ///
    /// Timestamps and UUIDs are generated fresh on every call.
    pub fn placeholder(self) -> Value {
        match self {
            TypeHint::Text => json!("default"),
            TypeHint::Integer | TypeHint::Number => json!(0),
            TypeHint::Boolean => json!(false),
            TypeHint::Uuid => json!(uuid::Uuid::new_v4().to_string()),
            TypeHint::Timestamp => json!(chrono::Utc::now().to_rfc3339()),
            TypeHint::Date => json!(chrono::Utc::now().date_naive().to_string()),
            TypeHint::Json => json!({}),
        }
    }

    /// Maps a SQL type name from a cast error to a hint.
    ///
    /// ```rust
    /// use schemaprobe_core::defaults::TypeHint;
    ///
    /// assert_eq!(TypeHint::from_sql_type("bigint"), Some(TypeHint::Integer));
    /// assert_eq!(TypeHint::from_sql_type("timestamp with time zone"), Some(TypeHint::Timestamp));
    /// assert_eq!(TypeHint::from_sql_type("tsvector"), None);
    /// ```
    pub fn from_sql_type(sql_type: &str) -> Option<Self> {
        let lower = sql_type.trim().to_lowercase();
        let hint = match lower.as_str() {
            "integer" | "int" | "int2" | "int4" | "int8" | "smallint" | "bigint" => {
                TypeHint::Integer
            }
            "numeric" | "decimal" | "real" | "double precision" | "float4" | "float8"
            | "money" => TypeHint::Number,
            "boolean" | "bool" => TypeHint::Boolean,
            "uuid" => TypeHint::Uuid,
            "date" => TypeHint::Date,
            "json" | "jsonb" => TypeHint::Json,
            "text" | "character varying" | "varchar" | "character" | "char" | "citext" => {
                TypeHint::Text
            }
            t if t.starts_with("timestamp") => TypeHint::Timestamp,
            _ => return None,
        };
        Some(hint)
    }

    /// Guesses a hint from a column name.
    ///
    /// `uuid_ids` controls whether `*_id` columns are assumed to hold UUIDs.
    pub fn from_column_name(column: &str, uuid_ids: bool) -> Self {
        let name = column.to_lowercase();

        if name.ends_with("_at")
            || name.ends_with("_time")
            || name.ends_with("_timestamp")
            || name == "timestamp"
        {
            return TypeHint::Timestamp;
        }
        if name.ends_with("_date") || name == "date" {
            return TypeHint::Date;
        }
        if name.starts_with("is_") || name.starts_with("has_") {
            return TypeHint::Boolean;
        }
        if name.ends_with("_id") || name == "uuid" {
            return if uuid_ids {
                TypeHint::Uuid
            } else {
                TypeHint::Text
            };
        }

        const NUMERIC_WORDS: [&str; 12] = [
            "price", "amount", "total", "count", "quantity", "qty", "number", "cost", "fee",
            "capacity", "seats", "hours",
        ];
        if name
            .split('_')
            .any(|segment| NUMERIC_WORDS.contains(&segment))
        {
            return TypeHint::Number;
        }

        TypeHint::Text
    }
}
