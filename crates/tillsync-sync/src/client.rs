//! # POS API Client
//!
//! HTTP access to the vendor's paginated transaction collection.
//!
//! ## Request / Response
//! ```text
//! GET {base_url}/transactions?date_from=…&date_to=…&page=N&per_page=M
//! Authorization: Bearer <token>
//!
//! 200 {"response": {"count": 1234, "data": [ {...}, ... ]}}
//! 200 {"response": [ {...}, ... ]}                  (count unknown)
//! 200 {"error": {"code": 10, "message": "..."}}     → UpstreamError
//! ```
//!
//! ## Status Mapping
//! ```text
//! 429        → RateLimited { retry_after }   (retried)
//! 5xx        → UpstreamUnavailable           (retried)
//! timeout    → Timeout                       (retried)
//! connect    → ConnectionFailed              (retried)
//! 401 / 403  → Unauthorized                  (fatal)
//! other 4xx  → UpstreamStatus                (fatal)
//! ```

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::config::{ApiSettings, ApiToken};
use crate::error::{SyncError, SyncResult};
use crate::fetcher::{PageRequest, PageSource, RawPage};

/// Longest error body kept in `UpstreamStatus`.
const MAX_ERROR_BODY: usize = 512;

const QUERY_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Client for the vendor's transaction collection.
#[derive(Debug, Clone)]
pub struct PosApiClient {
    http: reqwest::Client,
    endpoint: Url,
    token: ApiToken,
    request_timeout: Duration,
}

impl PosApiClient {
    /// Builds a client from the `[api]` settings.
    pub fn new(settings: &ApiSettings) -> SyncResult<Self> {
        let mut endpoint = Url::parse(&settings.base_url)?;
        endpoint
            .path_segments_mut()
            .map_err(|_| SyncError::InvalidUrl(settings.base_url.clone()))?
            .pop_if_empty()
            .push("transactions");

        let http = reqwest::Client::builder()
            .timeout(settings.request_timeout())
            .user_agent(concat!("tillsync/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(PosApiClient {
            http,
            endpoint,
            token: settings.token.clone(),
            request_timeout: settings.request_timeout(),
        })
    }

    /// The full URL for one page.
    pub fn page_url(&self, request: &PageRequest) -> Url {
        let mut url = self.endpoint.clone();
        {
            let mut query = url.query_pairs_mut();
            if let Some(since) = request.window.since {
                query.append_pair("date_from", &format_time(since));
            }
            query
                .append_pair("date_to", &format_time(request.window.until))
                .append_pair("page", &request.page.to_string())
                .append_pair("per_page", &request.per_page.to_string());
        }
        url
    }

    fn transport_error(&self, err: reqwest::Error) -> SyncError {
        if err.is_timeout() {
            SyncError::Timeout(self.request_timeout)
        } else {
            err.into()
        }
    }
}

#[async_trait]
impl PageSource for PosApiClient {
    async fn fetch_page(&self, request: &PageRequest) -> SyncResult<RawPage> {
        let url = self.page_url(request);
        debug!(page = request.page, "Requesting upstream page");

        let response = self
            .http
            .get(url)
            .bearer_auth(self.token.expose())
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(SyncError::RateLimited { retry_after });
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(SyncError::Unauthorized(status.as_u16()));
        }
        if status.is_server_error() {
            return Err(SyncError::UpstreamUnavailable(status.as_u16()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::UpstreamStatus {
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY).collect(),
            });
        }

        let body = response.text().await.map_err(|e| self.transport_error(e))?;
        parse_page(&body, request)
    }
}

fn format_time(at: DateTime<Utc>) -> String {
    at.format(QUERY_TIME_FORMAT).to_string()
}

// =============================================================================
// Envelope Parsing
// =============================================================================

/// Interprets one collection response body.
///
/// With a total `count` in the envelope, paging continues until that count
/// is covered, even past short pages (some vendors cap the page size below
/// `per_page`). Without one, a short page ends the listing.
pub fn parse_page(body: &str, request: &PageRequest) -> SyncResult<RawPage> {
    let value: Value = serde_json::from_str(body)?;

    if let Some(error) = value.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(SyncError::UpstreamError(message));
    }

    let response = value
        .get("response")
        .ok_or_else(|| SyncError::MalformedPayload("missing \"response\" field".into()))?;

    let (records, count) = match response {
        Value::Array(items) => (items.clone(), None),
        Value::Object(envelope) => {
            let items = envelope
                .get("data")
                .and_then(Value::as_array)
                .ok_or_else(|| SyncError::MalformedPayload("missing \"data\" array".into()))?;
            let count = envelope.get("count").and_then(|c| match c {
                Value::Number(n) => n.as_u64(),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            });
            (items.clone(), count)
        }
        other => {
            return Err(SyncError::MalformedPayload(format!(
                "\"response\" must be an array or object, got {}",
                other
            )))
        }
    };

    let more = match count {
        Some(total) => {
            let seen = u64::from(request.page) * u64::from(request.per_page);
            !records.is_empty() && seen < total
        }
        None => records.len() as u64 >= u64::from(request.per_page),
    };

    Ok(RawPage {
        records,
        next_page: more.then(|| request.page + 1),
        total: count,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tillsync_core::FetchWindow;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    fn request(page: u32, per_page: u32) -> PageRequest {
        PageRequest {
            window: FetchWindow::between(
                Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2024, 3, 2, 12, 30, 0).unwrap(),
            )
            .unwrap(),
            page,
            per_page,
        }
    }

    fn settings(base_url: &str) -> ApiSettings {
        ApiSettings {
            base_url: base_url.to_string(),
            token: ApiToken::new("t0ken"),
            request_timeout_secs: 2,
            ..Default::default()
        }
    }

    /// Answers a single request with a canned response and hands back the
    /// raw request text.
    async fn serve_once(status_line: &str, headers: &str, body: &str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n{}\r\n{}",
            status_line,
            body.len(),
            headers,
            body
        );

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            let mut chunk = [0u8; 1024];
            while !received.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                received.extend_from_slice(&chunk[..n]);
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
            String::from_utf8_lossy(&received).into_owned()
        });

        (format!("http://{}/api", addr), handle)
    }

    #[test]
    fn test_parse_counted_envelope() {
        let body = r#"{"response": {"count": 5, "data": [{"transaction_id": 1}, {"transaction_id": 2}]}}"#;

        let first = parse_page(body, &request(1, 2)).unwrap();
        assert_eq!(first.records.len(), 2);
        assert_eq!(first.next_page, Some(2));

        // Full page, but the count says nothing follows
        let body = r#"{"response": {"count": "4", "data": [{"transaction_id": 3}, {"transaction_id": 4}]}}"#;
        let last = parse_page(body, &request(2, 2)).unwrap();
        assert_eq!(last.next_page, None);
        assert_eq!(last.total, Some(4));
    }

    #[test]
    fn test_short_counted_page_keeps_paging() {
        // Vendor capped the page at 2 rows while 4 were requested
        let body = r#"{"response": {"count": 9, "data": [{"transaction_id": 1}, {"transaction_id": 2}]}}"#;
        let page = parse_page(body, &request(1, 4)).unwrap();
        assert_eq!(page.next_page, Some(2));
        assert_eq!(page.total, Some(9));

        // An empty page ends the listing whatever the count says
        let body = r#"{"response": {"count": 9, "data": []}}"#;
        assert_eq!(parse_page(body, &request(2, 4)).unwrap().next_page, None);
    }

    #[test]
    fn test_parse_bare_array_uses_page_fill() {
        let full = r#"{"response": [{"transaction_id": 1}, {"transaction_id": 2}]}"#;
        assert_eq!(parse_page(full, &request(1, 2)).unwrap().next_page, Some(2));

        let short = r#"{"response": [{"transaction_id": 1}]}"#;
        assert_eq!(parse_page(short, &request(3, 2)).unwrap().next_page, None);

        let empty = r#"{"response": []}"#;
        let page = parse_page(empty, &request(1, 2)).unwrap();
        assert!(page.records.is_empty());
        assert_eq!(page.next_page, None);
    }

    #[test]
    fn test_parse_error_envelope() {
        let body = r#"{"error": {"code": 30, "message": "Access token is invalid"}}"#;
        match parse_page(body, &request(1, 2)) {
            Err(SyncError::UpstreamError(msg)) => assert_eq!(msg, "Access token is invalid"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_parse_malformed_bodies() {
        for body in ["<html>", r#"{"data": []}"#, r#"{"response": 7}"#, r#"{"response": {"count": 1}}"#] {
            assert!(
                matches!(parse_page(body, &request(1, 2)), Err(SyncError::MalformedPayload(_))),
                "accepted {}",
                body
            );
        }
    }

    #[test]
    fn test_page_url_carries_window_and_paging() {
        let client = PosApiClient::new(&settings("https://pos.example.com/api/")).unwrap();
        let url = client.page_url(&request(3, 50));

        assert_eq!(url.path(), "/api/transactions");
        let query: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            query,
            vec![
                ("date_from".into(), "2024-03-01T00:00:00Z".into()),
                ("date_to".into(), "2024-03-02T12:30:00Z".into()),
                ("page".into(), "3".into()),
                ("per_page".into(), "50".into()),
            ]
        );

        let mut full = request(1, 50);
        full.window = FetchWindow::full(full.window.until);
        assert!(!client.page_url(&full).as_str().contains("date_from"));
    }

    #[tokio::test]
    async fn test_fetch_page_sends_bearer_token() {
        let (base, server) = serve_once("200 OK", "", r#"{"response": [{"transaction_id": 9}]}"#).await;
        let client = PosApiClient::new(&settings(&base)).unwrap();

        let page = client.fetch_page(&request(1, 10)).await.unwrap();
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.next_page, None);

        let raw = server.await.unwrap();
        assert!(raw.starts_with("GET /api/transactions?"), "{}", raw);
        assert!(raw.to_lowercase().contains("authorization: bearer t0ken"), "{}", raw);
    }

    #[tokio::test]
    async fn test_rate_limit_carries_retry_after() {
        let (base, _server) = serve_once("429 Too Many Requests", "Retry-After: 7\r\n", "{}").await;
        let client = PosApiClient::new(&settings(&base)).unwrap();

        match client.fetch_page(&request(1, 10)).await {
            Err(SyncError::RateLimited { retry_after }) => {
                assert_eq!(retry_after, Some(Duration::from_secs(7)))
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_status_classification() {
        let cases = [
            ("401 Unauthorized", "unauthorized", false),
            ("403 Forbidden", "unauthorized", false),
            ("404 Not Found", "upstream", false),
            ("503 Service Unavailable", "transient", true),
        ];

        for (status, kind, retryable) in cases {
            let (base, _server) = serve_once(status, "", r#"{"detail": "x"}"#).await;
            let client = PosApiClient::new(&settings(&base)).unwrap();
            let err = client.fetch_page(&request(1, 10)).await.unwrap_err();
            assert_eq!(err.kind(), kind, "{}", status);
            assert_eq!(err.is_retryable(), retryable, "{}", status);
        }
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_retryable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = PosApiClient::new(&settings(&format!("http://{}", addr))).unwrap();
        let err = client.fetch_page(&request(1, 10)).await.unwrap_err();
        assert!(err.is_retryable(), "{:?}", err);
    }
}
