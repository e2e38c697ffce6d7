//! PostgREST store against a local one-shot HTTP responder.
//!
//! Each test serves a single canned response and inspects the raw request
//! the store sent: method, path, query, headers, and body.

#![cfg(feature = "postgrest")]
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::arithmetic_side_effects)]

use schemaprobe_core::store::{PostgrestStore, StoreConnectionConfig};
use schemaprobe_core::{CandidateRecord, Filter, RecordStore};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

const API_KEY: &str = "service-role-secret";

/// Request as seen on the wire. Header names are lower-cased.
struct CapturedRequest {
    method: String,
    target: String,
    headers: Vec<(String, String)>,
    body: String,
}

impl CapturedRequest {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    fn query(&self) -> Vec<(String, String)> {
        url::Url::parse(&format!("http://localhost{}", self.target))
            .unwrap()
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    fn path(&self) -> &str {
        self.target.split('?').next().unwrap()
    }
}

fn header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Serves one response and hands back the request that triggered it.
async fn serve_once(status: u16, body: &'static str) -> (String, JoinHandle<CapturedRequest>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];

        let head_len = loop {
            let n = socket.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed before headers");
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = header_end(&buf) {
                break pos;
            }
        };

        let head = String::from_utf8_lossy(&buf[..head_len]).to_string();
        let mut lines = head.split("\r\n");
        let request_line = lines.next().unwrap().to_string();
        let headers: Vec<(String, String)> = lines
            .filter_map(|l| l.split_once(':'))
            .map(|(n, v)| (n.trim().to_lowercase(), v.trim().to_string()))
            .collect();

        let content_length: usize = headers
            .iter()
            .find(|(n, _)| n == "content-length")
            .map_or(0, |(_, v)| v.parse().unwrap());
        let body_start = head_len + 4;
        while buf.len() < body_start + content_length {
            let n = socket.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed before body");
            buf.extend_from_slice(&chunk[..n]);
        }
        let request_body = String::from_utf8_lossy(&buf[body_start..body_start + content_length]).to_string();

        let response = format!(
            "HTTP/1.1 {} Canned\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.ok();

        let mut parts = request_line.split(' ');
        CapturedRequest {
            method: parts.next().unwrap().to_string(),
            target: parts.next().unwrap().to_string(),
            headers,
            body: request_body,
        }
    });

    (format!("http://{}", addr), handle)
}

fn store(url: &str) -> PostgrestStore {
    PostgrestStore::new(StoreConnectionConfig::new(url), API_KEY.to_string()).unwrap()
}

fn booking() -> CandidateRecord {
    let mut record = CandidateRecord::new("id", json!("probe_1"));
    record.push("status", json!("Confirmed"));
    record.push("aircraft_id", json!("ac-1"));
    record
}

#[tokio::test]
async fn test_insert_posts_record_and_returns_first_row() {
    let (url, server) = serve_once(
        201,
        r#"[{"id":"probe_1","status":"Confirmed","aircraft_id":"ac-1","created_at":"2024-01-01T00:00:00+00:00"}]"#,
    )
    .await;

    let row = store(&url).insert("bookings", &booking()).await.unwrap();
    assert_eq!(row.get("created_at"), Some(&json!("2024-01-01T00:00:00+00:00")));

    let request = server.await.unwrap();
    assert_eq!(request.method, "POST");
    assert_eq!(request.path(), "/rest/v1/bookings");
    assert_eq!(request.header("prefer"), Some("return=representation"));
    assert_eq!(request.header("apikey"), Some(API_KEY));
    assert_eq!(
        request.header("authorization"),
        Some(format!("Bearer {}", API_KEY).as_str())
    );
    assert_eq!(request.header("accept-profile"), None);
    assert_eq!(
        request.body,
        r#"{"id":"probe_1","status":"Confirmed","aircraft_id":"ac-1"}"#
    );
}

#[tokio::test]
async fn test_insert_with_empty_representation() {
    let (url, server) = serve_once(201, "[]").await;

    let row = store(&url).insert("bookings", &booking()).await.unwrap();
    assert!(row.is_empty());
    server.await.unwrap();
}

#[tokio::test]
async fn test_insert_rejection_parsed_from_body() {
    let (url, server) = serve_once(
        400,
        r#"{"code":"23502","details":"Failing row contains (probe_1, null).","hint":null,"message":"null value in column \"total_price\" of relation \"bookings\" violates not-null constraint"}"#,
    )
    .await;

    let error = store(&url).insert("bookings", &booking()).await.unwrap_err();
    assert!(!error.is_transport());
    assert_eq!(error.code.as_deref(), Some("23502"));
    assert_eq!(error.status, Some(400));
    assert!(error.message.contains("total_price"));
    server.await.unwrap();
}

#[tokio::test]
async fn test_unreadable_insert_response_is_transport() {
    let (url, server) = serve_once(201, "<html>proxy page</html>").await;

    let error = store(&url).insert("bookings", &booking()).await.unwrap_err();
    assert!(error.is_transport());
    assert!(error.message.starts_with("Unreadable insert response"));
    server.await.unwrap();
}

#[tokio::test]
async fn test_connection_refused_is_transport() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let error = store(&format!("http://{}", addr))
        .insert("bookings", &booking())
        .await
        .unwrap_err();
    assert!(error.is_transport());
    assert!(!error.message.contains(API_KEY));
}

#[tokio::test]
async fn test_select_encodes_filters_and_limit() {
    let (url, server) = serve_once(200, r#"[{"id":"probe_9"}]"#).await;

    let rows = store(&url)
        .select(
            "bookings",
            &[Filter::eq("status", "Confirmed"), Filter::starts_with("id", "probe_")],
            100,
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);

    let request = server.await.unwrap();
    assert_eq!(request.method, "GET");
    assert_eq!(request.path(), "/rest/v1/bookings");
    assert_eq!(
        request.query(),
        vec![
            ("select".to_string(), "*".to_string()),
            ("limit".to_string(), "100".to_string()),
            ("status".to_string(), "eq.Confirmed".to_string()),
            ("id".to_string(), r"like.probe\_*".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_delete_targets_key() {
    let (url, server) = serve_once(204, "").await;

    store(&url)
        .delete("bookings", "id", &json!("probe_1"))
        .await
        .unwrap();

    let request = server.await.unwrap();
    assert_eq!(request.method, "DELETE");
    assert_eq!(request.path(), "/rest/v1/bookings");
    assert_eq!(
        request.query(),
        vec![("id".to_string(), "eq.probe_1".to_string())]
    );
}

#[tokio::test]
async fn test_schema_profile_headers() {
    let (url, server) = serve_once(200, "[]").await;
    let store = PostgrestStore::new(
        StoreConnectionConfig::new(&url).with_schema("booking"),
        API_KEY.to_string(),
    )
    .unwrap();

    store.select("bookings", &[], 1).await.unwrap();

    let request = server.await.unwrap();
    assert_eq!(request.header("accept-profile"), Some("booking"));
    assert_eq!(request.header("content-profile"), Some("booking"));
}
