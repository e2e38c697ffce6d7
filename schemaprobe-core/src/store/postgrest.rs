//! PostgREST record store client.
//!
//! Talks to `<url>/rest/v1/<table>` endpoints (Supabase layout) with an API
//! key sent as both `apikey` and bearer token.
//!
//! # Security
//! - The API key lives in a `Zeroizing<String>` and is cleared on drop
//! - The key is never part of a URL, a log line, or an error message
//! - `describe()` and `Display` only ever show the redacted base URL

use super::{Filter, Record, RecordStore, StoreError};
use crate::error::redact_url;
use crate::models::CandidateRecord;
use crate::{ProbeError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;
use zeroize::Zeroizing;

/// Connection settings for a PostgREST store.
///
/// Intentionally does NOT hold the API key; pass it to
/// [`PostgrestStore::new`] separately.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConnectionConfig {
    /// Project URL, e.g. `https://abc.supabase.co`
    pub url: String,
    /// Per-request timeout
    pub request_timeout: Duration,
    /// Non-default Postgres schema exposed by PostgREST
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
}

impl StoreConnectionConfig {
    /// Creates a config for a project URL with default timeout.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            request_timeout: Duration::from_secs(30),
            schema: None,
        }
    }

    /// Builder method to set the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Builder method to target a non-default schema.
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Resolves the REST base URL (always ending in `/rest/v1/`).
    ///
    /// # Errors
    /// Returns error if the URL cannot be parsed or is not http(s)
    pub fn rest_base(&self) -> Result<Url> {
        let mut url = Url::parse(&self.url).map_err(|_| {
            ProbeError::configuration(format!("Invalid store URL: {}", redact_url(&self.url)))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ProbeError::configuration(format!(
                "Store URL must be http or https, got '{}'",
                url.scheme()
            )));
        }

        url.set_query(None);
        let path = url.path().trim_end_matches('/').to_string();
        let path = if path.ends_with("/rest/v1") {
            format!("{}/", path)
        } else {
            format!("{}/rest/v1/", path)
        };
        url.set_path(&path);
        Ok(url)
    }
}

impl std::fmt::Display for StoreConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StoreConnectionConfig({})", redact_url(&self.url))
    }
}

/// PostgREST error body.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    code: Option<String>,
    message: Option<String>,
    details: Option<String>,
    hint: Option<String>,
}

/// Converts a non-2xx response body into a `StoreError`.
///
/// Falls back to the raw text when the body is not a PostgREST error object.
pub(crate) fn parse_error_body(status: u16, body: &str) -> StoreError {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) if parsed.message.is_some() || parsed.code.is_some() => StoreError {
            kind: super::StoreErrorKind::Rejected,
            code: parsed.code,
            message: parsed.message.unwrap_or_default(),
            details: parsed.details,
            hint: parsed.hint,
            status: Some(status),
        },
        _ => {
            let message = if body.trim().is_empty() {
                format!("HTTP {}", status)
            } else {
                body.trim().to_string()
            };
            StoreError::rejected(None, message).with_status(status)
        }
    }
}

/// Renders a filter value as PostgREST expects it in a query string.
fn filter_operand(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// Appends filters as PostgREST query parameters.
pub(crate) fn apply_filters(url: &mut Url, filters: &[Filter]) {
    let mut pairs = url.query_pairs_mut();
    for filter in filters {
        match filter {
            Filter::Eq { column, value } if value.is_null() => {
                pairs.append_pair(column, "is.null");
            }
            Filter::Eq { column, value } => {
                pairs.append_pair(column, &format!("eq.{}", filter_operand(value)));
            }
            Filter::Like { column, pattern } => {
                pairs.append_pair(column, &format!("like.{}", pattern.replace('%', "*")));
            }
        }
    }
}

/// Record store backed by a PostgREST HTTP API.
pub struct PostgrestStore {
    client: reqwest::Client,
    base: Url,
    api_key: Zeroizing<String>,
    config: StoreConnectionConfig,
}

impl std::fmt::Debug for PostgrestStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgrestStore")
            .field("base", &redact_url(self.base.as_str()))
            .field("api_key", &"****")
            .finish()
    }
}

impl PostgrestStore {
    /// Creates a client for a PostgREST endpoint.
    ///
    /// # Errors
    /// Returns error if the URL is invalid, the key is empty, or the HTTP
    /// client cannot be built
    pub fn new(config: StoreConnectionConfig, api_key: String) -> Result<Self> {
        let api_key = Zeroizing::new(api_key);
        if api_key.trim().is_empty() {
            return Err(ProbeError::configuration("API key cannot be empty"));
        }

        let base = config.rest_base()?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ProbeError::Http {
                context: "Failed to build HTTP client".to_string(),
                source: e,
            })?;

        Ok(Self {
            client,
            base,
            api_key,
            config,
        })
    }

    /// Connection settings (no credentials).
    pub fn connection_config(&self) -> &StoreConnectionConfig {
        &self.config
    }

    fn table_url(&self, table: &str) -> std::result::Result<Url, StoreError> {
        self.base
            .join(table)
            .map_err(|e| StoreError::transport(format!("Invalid table name '{}': {}", table, e)))
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(method, url)
            .header("apikey", self.api_key.as_str())
            .bearer_auth(self.api_key.as_str());
        if let Some(schema) = &self.config.schema {
            builder = builder
                .header("Accept-Profile", schema)
                .header("Content-Profile", schema);
        }
        builder
    }

    async fn send(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> std::result::Result<reqwest::Response, StoreError> {
        let resp = builder
            .send()
            .await
            .map_err(|e| StoreError::transport(e.without_url().to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(parse_error_body(status.as_u16(), &body));
        }
        Ok(resp)
    }
}

#[async_trait]
impl RecordStore for PostgrestStore {
    async fn insert(
        &self,
        table: &str,
        record: &CandidateRecord,
    ) -> std::result::Result<Record, StoreError> {
        let url = self.table_url(table)?;
        debug!(table, columns = record.len(), "POST insert");

        let resp = self
            .send(
                self.request(reqwest::Method::POST, url)
                    .header("Prefer", "return=representation")
                    .json(record),
            )
            .await?;

        let rows: Vec<Record> = resp
            .json()
            .await
            .map_err(|e| StoreError::transport(format!("Unreadable insert response: {}", e)))?;
        Ok(rows.into_iter().next().unwrap_or_default())
    }

    async fn select(
        &self,
        table: &str,
        filters: &[Filter],
        limit: u32,
    ) -> std::result::Result<Vec<Record>, StoreError> {
        let mut url = self.table_url(table)?;
        url.query_pairs_mut()
            .append_pair("select", "*")
            .append_pair("limit", &limit.to_string());
        apply_filters(&mut url, filters);
        debug!(table, filters = filters.len(), limit, "GET select");

        let resp = self.send(self.request(reqwest::Method::GET, url)).await?;
        resp.json()
            .await
            .map_err(|e| StoreError::transport(format!("Unreadable select response: {}", e)))
    }

    async fn delete(
        &self,
        table: &str,
        key_column: &str,
        key: &Value,
    ) -> std::result::Result<(), StoreError> {
        let mut url = self.table_url(table)?;
        apply_filters(&mut url, &[Filter::eq(key_column, key.clone())]);
        debug!(table, key_column, "DELETE");

        self.send(self.request(reqwest::Method::DELETE, url)).await?;
        Ok(())
    }

    fn describe(&self) -> String {
        redact_url(self.base.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rest_base_appends_path() {
        let base = StoreConnectionConfig::new("https://abc.supabase.co")
            .rest_base()
            .unwrap();
        assert_eq!(base.as_str(), "https://abc.supabase.co/rest/v1/");

        let base = StoreConnectionConfig::new("https://abc.supabase.co/rest/v1/")
            .rest_base()
            .unwrap();
        assert_eq!(base.as_str(), "https://abc.supabase.co/rest/v1/");

        let base = StoreConnectionConfig::new("http://localhost:3000/rest/v1?x=1")
            .rest_base()
            .unwrap();
        assert_eq!(base.as_str(), "http://localhost:3000/rest/v1/");
    }

    #[test]
    fn test_rest_base_rejects_bad_urls() {
        assert!(StoreConnectionConfig::new("not a url").rest_base().is_err());
        assert!(
            StoreConnectionConfig::new("ftp://example.com")
                .rest_base()
                .is_err()
        );
    }

    #[test]
    fn test_parse_postgrest_error_body() {
        let error = parse_error_body(
            400,
            r#"{"code":"23502","details":"Failing row contains (x, null).","hint":null,"message":"null value in column \"total_price\" of relation \"bookings\" violates not-null constraint"}"#,
        );

        assert_eq!(error.code.as_deref(), Some("23502"));
        assert!(error.message.contains("total_price"));
        assert_eq!(error.details.as_deref(), Some("Failing row contains (x, null)."));
        assert_eq!(error.status, Some(400));
        assert!(!error.is_transport());
    }

    #[test]
    fn test_parse_non_json_error_body() {
        let error = parse_error_body(502, "Bad Gateway");
        assert_eq!(error.code, None);
        assert_eq!(error.message, "Bad Gateway");

        let error = parse_error_body(500, "");
        assert_eq!(error.message, "HTTP 500");
    }

    #[test]
    fn test_apply_filters() {
        let mut url = Url::parse("https://abc.supabase.co/rest/v1/aircraft").unwrap();
        apply_filters(
            &mut url,
            &[
                Filter::eq("status", "active"),
                Filter::eq("seats", json!(4)),
                Filter::eq("retired_at", Value::Null),
                Filter::starts_with("id", "probe_"),
            ],
        );

        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("status".to_string(), "eq.active".to_string()),
                ("seats".to_string(), "eq.4".to_string()),
                ("retired_at".to_string(), "is.null".to_string()),
                ("id".to_string(), r"like.probe\_*".to_string()),
            ]
        );
    }

    #[test]
    fn test_store_requires_api_key() {
        let result = PostgrestStore::new(StoreConnectionConfig::new("https://abc.supabase.co"), " ".to_string());
        assert!(matches!(result, Err(ProbeError::Configuration { .. })));
    }

    #[test]
    fn test_debug_and_describe_hide_key() {
        let store = PostgrestStore::new(
            StoreConnectionConfig::new("https://abc.supabase.co"),
            "service-role-secret".to_string(),
        )
        .unwrap();

        assert!(!format!("{:?}", store).contains("service-role-secret"));
        assert_eq!(store.describe(), "https://abc.supabase.co/rest/v1/");
    }
}
