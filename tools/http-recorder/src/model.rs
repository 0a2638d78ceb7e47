//! Immutable snapshots of recorded HTTP exchanges.
//!
//! Bodies are buffered into [`Bytes`] at capture time, so a stored message can
//! be read any number of times (once to match, once to answer the caller).

use crate::content::split_content_headers;
use crate::errors::RecorderError;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::header::{self, HeaderMap, HeaderValue};
use http::{Method, StatusCode, Version};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use url::Url;

pub type HttpRequest = http::Request<Bytes>;
pub type HttpResponse = http::Response<Bytes>;

/// Response extension carrying the reason phrase received on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReasonPhrase(pub String);

// ── Content ───────────────────────────────────────────────────────────────────

/// A fully buffered body together with its own header set.
#[derive(Debug, Clone, PartialEq)]
pub struct Content {
    pub data: Bytes,
    pub headers: HeaderMap,
    /// Length reported for the body. Computed from `data` on capture and
    /// cleared by normalization when no `Content-Length` header was received.
    pub length: Option<u64>,
}

impl Content {
    pub fn new(data: impl Into<Bytes>, headers: HeaderMap) -> Self {
        let data = data.into();
        Self {
            length: Some(data.len() as u64),
            data,
            headers,
        }
    }

    pub fn has_explicit_length(&self) -> bool {
        self.headers.contains_key(header::CONTENT_LENGTH)
    }

    fn write_into(&self, headers: &mut HeaderMap) {
        for (name, value) in &self.headers {
            headers.append(name.clone(), value.clone());
        }
        if let (Some(length), false) = (self.length, self.has_explicit_length()) {
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
        }
    }
}

fn capture_content(body: &Bytes, content_headers: HeaderMap) -> Option<Content> {
    if body.is_empty() && content_headers.is_empty() {
        None
    } else {
        Some(Content::new(body.clone(), content_headers))
    }
}

// ── RequestSnapshot ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct RequestSnapshot {
    pub method: Method,
    pub url: Url,
    pub version: Version,
    pub headers: HeaderMap,
    pub content: Option<Content>,
}

impl RequestSnapshot {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            content: None,
        }
    }

    /// Requests must carry an absolute URI; relative ones cannot be replayed.
    pub fn from_http(request: &HttpRequest) -> Result<Self, RecorderError> {
        let uri = request.uri().to_string();
        let url = Url::parse(&uri)
            .map_err(|e| RecorderError::Transport(format!("request uri {uri} is not absolute: {e}")))?;
        let (headers, content_headers) = split_content_headers(request.headers());
        Ok(Self {
            method: request.method().clone(),
            url,
            version: request.version(),
            headers,
            content: capture_content(request.body(), content_headers),
        })
    }

    pub fn body(&self) -> &[u8] {
        self.content.as_ref().map(|c| c.data.as_ref()).unwrap_or_default()
    }

    pub fn content_headers(&self) -> Option<&HeaderMap> {
        self.content.as_ref().map(|c| &c.headers)
    }

    pub fn to_http(&self) -> Result<HttpRequest, RecorderError> {
        let uri = self
            .url
            .as_str()
            .parse::<http::Uri>()
            .map_err(|e| RecorderError::Transport(format!("invalid uri {}: {e}", self.url)))?;
        let mut request = http::Request::new(
            self.content.as_ref().map(|c| c.data.clone()).unwrap_or_default(),
        );
        *request.method_mut() = self.method.clone();
        *request.uri_mut() = uri;
        *request.version_mut() = self.version;
        *request.headers_mut() = self.headers.clone();
        if let Some(content) = &self.content {
            content.write_into(request.headers_mut());
        }
        Ok(request)
    }
}

// ── ResponseSnapshot ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct ResponseSnapshot {
    pub status: StatusCode,
    pub reason: Option<String>,
    pub version: Version,
    pub headers: HeaderMap,
    pub content: Option<Content>,
    /// The request that produced this response.
    pub request: RequestSnapshot,
}

impl ResponseSnapshot {
    pub fn from_http(request: RequestSnapshot, response: &HttpResponse) -> Self {
        let (headers, content_headers) = split_content_headers(response.headers());
        let reason = response
            .extensions()
            .get::<ReasonPhrase>()
            .map(|reason| reason.0.clone())
            .or_else(|| response.status().canonical_reason().map(str::to_string));
        Self {
            status: response.status(),
            reason,
            version: response.version(),
            headers,
            content: capture_content(response.body(), content_headers),
            request,
        }
    }

    pub fn body(&self) -> &[u8] {
        self.content.as_ref().map(|c| c.data.as_ref()).unwrap_or_default()
    }

    pub fn reason_phrase(&self) -> &str {
        self.reason
            .as_deref()
            .or_else(|| self.status.canonical_reason())
            .unwrap_or_default()
    }

    /// Drops a body length that was computed rather than received.
    pub fn normalized(mut self) -> Self {
        if let Some(content) = self.content.as_mut() {
            if !content.has_explicit_length() {
                content.length = None;
            }
        }
        self
    }

    pub fn to_http(&self) -> HttpResponse {
        let mut response = http::Response::new(
            self.content.as_ref().map(|c| c.data.clone()).unwrap_or_default(),
        );
        *response.status_mut() = self.status;
        *response.version_mut() = self.version;
        *response.headers_mut() = self.headers.clone();
        if let Some(content) = &self.content {
            content.write_into(response.headers_mut());
        }
        if let Some(reason) = &self.reason {
            response.extensions_mut().insert(ReasonPhrase(reason.clone()));
        }
        response
    }
}

// ── Interaction ───────────────────────────────────────────────────────────────

static MESSAGE_ID: AtomicU64 = AtomicU64::new(1);

fn next_message_id() -> u64 {
    MESSAGE_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InteractionMessageTimings {
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
}

/// One recorded exchange. Clones share the identity used by match-once
/// bookkeeping; freshly built or loaded messages get a new one.
#[derive(Debug, Clone, PartialEq)]
pub struct InteractionMessage {
    id: u64,
    response: ResponseSnapshot,
    timings: InteractionMessageTimings,
}

impl InteractionMessage {
    pub fn new(response: ResponseSnapshot, timings: InteractionMessageTimings) -> Self {
        Self {
            id: next_message_id(),
            response,
            timings,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// An independent copy of the recorded response.
    pub fn response(&self) -> ResponseSnapshot {
        self.response.clone()
    }

    pub fn request(&self) -> &RequestSnapshot {
        &self.response.request
    }

    pub fn request_mut(&mut self) -> &mut RequestSnapshot {
        &mut self.response.request
    }

    pub fn status(&self) -> StatusCode {
        self.response.status
    }

    pub fn response_body(&self) -> &[u8] {
        self.response.body()
    }

    pub fn timings(&self) -> InteractionMessageTimings {
        self.timings
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Interaction {
    name: String,
    messages: Vec<InteractionMessage>,
}

impl Interaction {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_messages(name, Vec::new())
    }

    pub fn with_messages(name: impl Into<String>, messages: Vec<InteractionMessage>) -> Self {
        Self {
            name: name.into(),
            messages,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn messages(&self) -> &[InteractionMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// A new interaction with `message` appended.
    pub fn with_message(&self, message: InteractionMessage) -> Self {
        let mut messages = self.messages.clone();
        messages.push(message);
        Self::with_messages(self.name.clone(), messages)
    }

    pub fn into_parts(self) -> (String, Vec<InteractionMessage>) {
        (self.name, self.messages)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn message(method: Method, url: &str, status: u16, body: &'static str) -> InteractionMessage {
        let request = RequestSnapshot::new(method, Url::parse(url).expect("url"));
        let response = ResponseSnapshot {
            status: StatusCode::from_u16(status).expect("status"),
            reason: None,
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            content: (!body.is_empty()).then(|| {
                let mut headers = HeaderMap::new();
                headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
                Content::new(body, headers)
            }),
            request,
        };
        InteractionMessage::new(
            response,
            InteractionMessageTimings {
                started_at: Utc::now(),
                elapsed: Duration::from_millis(5),
            },
        )
    }

    #[test]
    fn request_snapshot_moves_content_headers_onto_the_body() {
        let request = http::Request::builder()
            .method(Method::POST)
            .uri("https://api.example.test/items?page=2")
            .header("authorization", "Bearer abc")
            .header("content-type", "application/json")
            .body(Bytes::from_static(b"{\"a\":1}"))
            .expect("request");

        let snapshot = RequestSnapshot::from_http(&request).expect("snapshot");
        assert_eq!(snapshot.url.as_str(), "https://api.example.test/items?page=2");
        assert!(snapshot.headers.contains_key("authorization"));
        assert!(!snapshot.headers.contains_key("content-type"));
        assert_eq!(
            snapshot.content_headers().and_then(|h| h.get("content-type")),
            Some(&HeaderValue::from_static("application/json"))
        );
        assert_eq!(snapshot.body(), b"{\"a\":1}");
    }

    #[test]
    fn request_snapshot_rebuilds_an_http_request() {
        let mut snapshot = RequestSnapshot::new(
            Method::PUT,
            Url::parse("https://h.test/upload?part=1").expect("url"),
        );
        snapshot.headers.insert("x-trace", HeaderValue::from_static("7"));
        let mut content_headers = HeaderMap::new();
        content_headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        snapshot.content = Some(Content::new("data", content_headers));

        let request = snapshot.to_http().expect("request");
        assert_eq!(request.method(), Method::PUT);
        assert_eq!(request.uri(), "https://h.test/upload?part=1");
        assert_eq!(request.headers().get("x-trace"), Some(&HeaderValue::from_static("7")));
        assert_eq!(request.headers().get("content-length"), Some(&HeaderValue::from(4u64)));
        assert_eq!(request.body(), &Bytes::from_static(b"data"));
        assert_eq!(RequestSnapshot::from_http(&request).expect("snapshot").body(), b"data");
    }

    #[test]
    fn relative_request_uri_is_rejected() {
        let request = http::Request::builder()
            .uri("/relative")
            .body(Bytes::new())
            .expect("request");
        let err = RequestSnapshot::from_http(&request).expect_err("relative");
        assert!(matches!(err, RecorderError::Transport(msg) if msg.contains("/relative")));
    }

    #[test]
    fn reading_a_response_twice_yields_equal_independent_copies() {
        let message = message(Method::GET, "https://h.test/", 200, "hello");
        let mut first = message.response();
        let second = message.response();
        first.status = StatusCode::NOT_FOUND;

        assert_eq!(second.status, StatusCode::OK);
        assert_eq!(second.body(), b"hello");
        assert_eq!(message.response().body(), b"hello");
    }

    #[test]
    fn normalization_drops_computed_length_only() {
        let message = message(Method::GET, "https://h.test/", 200, "hello");
        let raw = message.response().to_http();
        assert_eq!(raw.headers().get("content-length"), Some(&HeaderValue::from(5u64)));

        let normalized = message.response().normalized().to_http();
        assert!(normalized.headers().get("content-length").is_none());

        let mut explicit = message.response();
        if let Some(content) = explicit.content.as_mut() {
            content.headers.insert(header::CONTENT_LENGTH, HeaderValue::from(5u64));
        }
        let normalized = explicit.normalized().to_http();
        assert_eq!(normalized.headers().get_all("content-length").iter().count(), 1);
    }

    #[test]
    fn reason_phrase_is_carried_as_a_response_extension() {
        let request = RequestSnapshot::new(Method::GET, Url::parse("https://h.test/").expect("url"));
        let mut live = http::Response::new(Bytes::new());
        *live.status_mut() = StatusCode::IM_A_TEAPOT;
        live.extensions_mut().insert(ReasonPhrase("Short And Stout".to_string()));

        let snapshot = ResponseSnapshot::from_http(request.clone(), &live);
        assert_eq!(snapshot.reason_phrase(), "Short And Stout");
        assert_eq!(
            snapshot.to_http().extensions().get::<ReasonPhrase>(),
            Some(&ReasonPhrase("Short And Stout".to_string()))
        );

        let plain = ResponseSnapshot::from_http(request, &http::Response::new(Bytes::new()));
        assert_eq!(plain.reason_phrase(), "OK");
        assert!(plain.content.is_none());
    }

    #[test]
    fn with_message_leaves_the_original_untouched() {
        let empty = Interaction::new("fixtures/sample");
        let grown = empty.with_message(message(Method::GET, "https://h.test/a", 200, "a"));
        let grown = grown.with_message(message(Method::GET, "https://h.test/b", 200, "b"));

        assert!(empty.is_empty());
        assert_eq!(grown.len(), 2);
        assert_eq!(grown.name(), "fixtures/sample");
        assert_eq!(grown.messages()[1].request().url.path(), "/b");
    }
}
