//! Network capture.
//!
//! Hosts describe a request with a [`RequestSpan`] (begin, then finish or
//! fail), or route their traffic through [`InstrumentedClient`]. Header and body
//! inputs come in several shapes and are normalized here, before the event
//! reaches the redaction filter.

use crate::emitter::{now_ms, Emitter};
use crate::redaction::NON_STRING_BODY;
use crate::Result;
use recordroom_types::{EventKind, EventPayload, NetworkPayload};
use reqwest::header::HeaderMap;
use reqwest::Url;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashMap};
use std::convert::Infallible;
use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Stands in for a body that could not be read.
pub const UNREADABLE_BODY: &str = "[unreadable body]";

/// Request or response headers, in whatever shape the host has them.
#[derive(Debug, Clone, Default)]
pub enum HeaderSource {
    #[default]
    None,
    Map(HashMap<String, String>),
    Pairs(Vec<(String, String)>),
    /// A raw `Name: value` block, one header per line.
    Raw(String),
    Http(HeaderMap),
}

impl HeaderSource {
    pub fn normalize(self) -> BTreeMap<String, String> {
        match self {
            HeaderSource::None => BTreeMap::new(),
            HeaderSource::Map(map) => map.into_iter().collect(),
            HeaderSource::Pairs(pairs) => pairs.into_iter().collect(),
            HeaderSource::Raw(raw) => raw
                .lines()
                .filter_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    let name = name.trim();
                    if name.is_empty() {
                        return None;
                    }
                    Some((name.to_string(), value.trim().to_string()))
                })
                .collect(),
            HeaderSource::Http(headers) => {
                let mut out: BTreeMap<String, String> = BTreeMap::new();
                for (name, value) in headers.iter() {
                    let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
                    out.entry(name.as_str().to_string())
                        .and_modify(|existing| {
                            existing.push_str(", ");
                            existing.push_str(&value);
                        })
                        .or_insert(value);
                }
                out
            }
        }
    }
}

/// A request or response body, in whatever shape the host has it.
#[derive(Debug, Clone, Default)]
pub enum BodySource {
    #[default]
    None,
    Text(String),
    /// URL-encoded on normalization.
    Form(Vec<(String, String)>),
    /// Kept as text when valid UTF-8.
    Bytes(Vec<u8>),
    /// Streams, files and other bodies that are not captured.
    Opaque,
    Unreadable,
}

impl BodySource {
    pub fn normalize(self) -> Option<String> {
        match self {
            BodySource::None => None,
            BodySource::Text(text) => Some(text).filter(|t| !t.is_empty()),
            BodySource::Form(pairs) => {
                let mut url = Url::parse("http://form.invalid/").ok()?;
                url.query_pairs_mut().extend_pairs(pairs);
                url.query().map(str::to_string).filter(|q| !q.is_empty())
            }
            BodySource::Bytes(bytes) if bytes.is_empty() => None,
            BodySource::Bytes(bytes) => Some(
                String::from_utf8(bytes).unwrap_or_else(|_| NON_STRING_BODY.to_string()),
            ),
            BodySource::Opaque => Some(NON_STRING_BODY.to_string()),
            BodySource::Unreadable => Some(UNREADABLE_BODY.to_string()),
        }
    }
}

struct NetworkInner {
    emitter: Emitter,
    armed: AtomicBool,
}

/// Network capture source.
#[derive(Clone)]
pub struct NetworkCapture {
    inner: Arc<NetworkInner>,
}

impl NetworkCapture {
    pub fn new(emitter: Emitter) -> Self {
        Self {
            inner: Arc::new(NetworkInner {
                emitter,
                armed: AtomicBool::new(false),
            }),
        }
    }

    pub fn install(&self) {
        self.inner.armed.store(true, Ordering::Release);
    }

    pub fn uninstall(&self) {
        self.inner.armed.store(false, Ordering::Release);
    }

    pub fn is_installed(&self) -> bool {
        self.inner.armed.load(Ordering::Acquire)
    }

    /// Start describing a request. Nothing is emitted until the span ends.
    pub fn begin(&self, method: impl Into<String>, url: impl Into<String>) -> RequestSpan {
        self.begin_with_prefix("n_", method, url)
    }

    fn begin_with_prefix(
        &self,
        prefix: &str,
        method: impl Into<String>,
        url: impl Into<String>,
    ) -> RequestSpan {
        RequestSpan {
            capture: self.clone(),
            client_request_id: format!("{}{}", prefix, Uuid::new_v4()),
            method: method.into(),
            url: url.into(),
            started_at_epoch_ms: now_ms(),
            started: Instant::now(),
            request_headers: HeaderSource::None,
            request_body: BodySource::None,
        }
    }

    /// Wrap a `reqwest` client so every request it sends is captured.
    pub fn instrument(&self, client: reqwest::Client) -> InstrumentedClient {
        InstrumentedClient {
            client,
            capture: self.clone(),
        }
    }
}

/// One in-flight request.
pub struct RequestSpan {
    capture: NetworkCapture,
    client_request_id: String,
    method: String,
    url: String,
    started_at_epoch_ms: i64,
    started: Instant,
    request_headers: HeaderSource,
    request_body: BodySource,
}

impl RequestSpan {
    pub fn client_request_id(&self) -> &str {
        &self.client_request_id
    }

    pub fn request_headers(mut self, headers: HeaderSource) -> Self {
        self.request_headers = headers;
        self
    }

    pub fn request_body(mut self, body: BodySource) -> Self {
        self.request_body = body;
        self
    }

    /// End the span with a response. Returns the event's seq if it was accepted.
    pub fn finish(self, status: u16, headers: HeaderSource, body: BodySource) -> Option<u64> {
        self.complete(status, headers, body, None)
    }

    /// End the span with a transport-level failure (no response).
    pub fn fail(self, error: impl Display) -> Option<u64> {
        let error = error.to_string();
        self.complete(0, HeaderSource::None, BodySource::None, Some(error))
    }

    fn complete(
        self,
        status: u16,
        response_headers: HeaderSource,
        response_body: BodySource,
        error: Option<String>,
    ) -> Option<u64> {
        if !self.capture.is_installed() {
            return None;
        }

        let duration_ms = self.started.elapsed().as_millis() as i64;
        let emitter = self.capture.inner.emitter.clone();
        emitter.emit_with(EventKind::Network, move || {
            Ok::<_, Infallible>(EventPayload::Network(NetworkPayload {
                client_request_id: self.client_request_id,
                method: self.method.to_ascii_uppercase(),
                url: self.url,
                status,
                request_headers: self.request_headers.normalize(),
                request_body: self.request_body.normalize(),
                response_headers: response_headers.normalize(),
                response_body: response_body.normalize(),
                started_at_epoch_ms: self.started_at_epoch_ms,
                duration_ms,
                error,
            }))
        })
    }
}

/// A response read in full by [`InstrumentedClient`].
#[derive(Debug, Clone)]
pub struct CapturedResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl CapturedResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// A `reqwest` client whose requests are recorded as network events.
#[derive(Clone)]
pub struct InstrumentedClient {
    client: reqwest::Client,
    capture: NetworkCapture,
}

impl InstrumentedClient {
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn get(&self, url: &str) -> reqwest::RequestBuilder {
        self.client.get(url)
    }

    pub fn post(&self, url: &str) -> reqwest::RequestBuilder {
        self.client.post(url)
    }

    pub async fn send(&self, builder: reqwest::RequestBuilder) -> Result<CapturedResponse> {
        let request = builder.build()?;
        self.execute(request).await
    }

    /// Execute `request`, reading the whole response body.
    pub async fn execute(&self, request: reqwest::Request) -> Result<CapturedResponse> {
        let request_body = match request.body() {
            None => BodySource::None,
            Some(body) => match body.as_bytes() {
                Some(bytes) => BodySource::Bytes(bytes.to_vec()),
                None => BodySource::Opaque,
            },
        };
        let span = self
            .capture
            .begin_with_prefix("f_", request.method().as_str(), request.url().as_str())
            .request_headers(HeaderSource::Http(request.headers().clone()))
            .request_body(request_body);

        let response = match self.client.execute(request).await {
            Ok(response) => response,
            Err(e) => {
                span.fail(&e);
                return Err(e.into());
            }
        };

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        match response.bytes().await {
            Ok(bytes) => {
                span.finish(
                    status,
                    HeaderSource::Http(headers.clone()),
                    BodySource::Bytes(bytes.to_vec()),
                );
                Ok(CapturedResponse {
                    status,
                    headers,
                    body: bytes.to_vec(),
                })
            }
            Err(e) => {
                span.finish(status, HeaderSource::Http(headers), BodySource::Unreadable);
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecorderConfig;
    use crate::endpoint::Endpoint;
    use crate::queue::DeliveryQueue;
    use crate::redaction::{RedactionFilter, TRUNCATION_MARKER};
    use axum::routing::post;
    use axum::Router;

    fn capture_with(config: &RecorderConfig) -> NetworkCapture {
        let emitter = Emitter::new(Arc::new(DeliveryQueue::new()));
        let endpoint = Endpoint::parse("http://localhost:8080").unwrap();
        emitter.set_filter(RedactionFilter::new(config, Some(endpoint)));
        let capture = NetworkCapture::new(emitter);
        capture.install();
        capture
    }

    fn network_events(capture: &NetworkCapture) -> Vec<NetworkPayload> {
        capture
            .inner
            .emitter
            .queue()
            .snapshot()
            .into_iter()
            .filter_map(|e| match e.payload {
                EventPayload::Network(n) => Some(n),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_raw_headers_parsed() {
        let headers = HeaderSource::Raw(
            "Content-Type: text/plain\r\nX-Trace:  abc \r\nbroken line\r\n: empty\r\n".to_string(),
        )
        .normalize();
        assert_eq!(headers.len(), 2);
        assert_eq!(headers["Content-Type"], "text/plain");
        assert_eq!(headers["X-Trace"], "abc");
    }

    #[test]
    fn test_http_headers_join_repeated_values() {
        let mut map = HeaderMap::new();
        map.append("accept", "text/html".parse().unwrap());
        map.append("accept", "application/json".parse().unwrap());
        let headers = HeaderSource::Http(map).normalize();
        assert_eq!(headers["accept"], "text/html, application/json");
    }

    #[test]
    fn test_body_shapes() {
        assert_eq!(BodySource::Text(String::new()).normalize(), None);
        assert_eq!(
            BodySource::Form(vec![
                ("q".to_string(), "a b".to_string()),
                ("n".to_string(), "1".to_string())
            ])
            .normalize()
            .as_deref(),
            Some("q=a+b&n=1")
        );
        assert_eq!(
            BodySource::Bytes(vec![0xff, 0xfe]).normalize().as_deref(),
            Some(NON_STRING_BODY)
        );
        assert_eq!(
            BodySource::Bytes(b"{}".to_vec()).normalize().as_deref(),
            Some("{}")
        );
        assert_eq!(BodySource::Opaque.normalize().as_deref(), Some(NON_STRING_BODY));
        assert_eq!(
            BodySource::Unreadable.normalize().as_deref(),
            Some(UNREADABLE_BODY)
        );
    }

    #[test]
    fn test_span_emits_redacted_event() {
        let config = RecorderConfig {
            max_body: 8,
            ..RecorderConfig::default()
        };
        let capture = capture_with(&config);

        let span = capture
            .begin("post", "http://api.test/login")
            .request_headers(HeaderSource::Pairs(vec![
                ("Authorization".to_string(), "Bearer secret".to_string()),
                ("Content-Type".to_string(), "application/json".to_string()),
            ]))
            .request_body(BodySource::Text("0123456789".to_string()));
        assert!(span.client_request_id().starts_with("n_"));
        assert_eq!(
            span.finish(201, HeaderSource::None, BodySource::Text("ok".to_string())),
            Some(1)
        );

        let events = network_events(&capture);
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.method, "POST");
        assert_eq!(event.status, 201);
        assert!(!event.request_headers.contains_key("Authorization"));
        assert_eq!(
            event.request_body.as_deref(),
            Some(format!("01234567{}", TRUNCATION_MARKER).as_str())
        );
        assert_eq!(event.response_body.as_deref(), Some("ok"));
    }

    #[test]
    fn test_failed_request_has_status_zero() {
        let capture = capture_with(&RecorderConfig::default());
        capture.begin("GET", "http://api.test/down").fail("connection refused");

        let events = network_events(&capture);
        assert_eq!(events[0].status, 0);
        assert_eq!(events[0].error.as_deref(), Some("connection refused"));
    }

    #[test]
    fn test_uninstalled_capture_is_silent() {
        let capture = capture_with(&RecorderConfig::default());
        capture.uninstall();
        assert_eq!(
            capture
                .begin("GET", "http://api.test/x")
                .finish(200, HeaderSource::None, BodySource::None),
            None
        );
        assert!(network_events(&capture).is_empty());
    }

    #[tokio::test]
    async fn test_instrumented_client_records_exchange() {
        let app = Router::new().route("/echo", post(|body: String| async move { body }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let capture = capture_with(&RecorderConfig::default());
        let client = capture.instrument(reqwest::Client::new());
        let response = client
            .send(
                client
                    .post(&format!("http://{}/echo", addr))
                    .header("x-api-key", "k")
                    .header("x-request", "1")
                    .body("ping"),
            )
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.text(), "ping");

        let events = network_events(&capture);
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert!(event.client_request_id.starts_with("f_"));
        assert_eq!(event.request_body.as_deref(), Some("ping"));
        assert_eq!(event.response_body.as_deref(), Some("ping"));
        assert!(!event.request_headers.contains_key("x-api-key"));
        assert_eq!(event.request_headers["x-request"], "1");
    }
}
