//! HTTP archive (HAR-shaped JSON) codec.
//!
//! The archive body does not carry the interaction name; callers pass it to
//! [`deserialize`]. Cookies and cache metadata are never populated, and
//! timings only fill `wait`.

use crate::content::{classify, content_type, encode_form, parse_form, BodyKind};
use crate::model::{
    Content as BodyContent, Interaction, InteractionMessage, InteractionMessageTimings,
    RequestSnapshot, ResponseSnapshot,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, SecondsFormat, Utc};
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::{Method, StatusCode, Version};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const HAR_VERSION: &str = "1.2";
pub const CREATOR_NAME: &str = "http-recorder";
pub const BASE64_ENCODING: &str = "base64";

#[derive(Debug, Error)]
pub enum HarError {
    #[error("invalid archive json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid base64 body: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("invalid startedDateTime {value}: {reason}")]
    Timestamp { value: String, reason: String },
    #[error("invalid {field} {value:?}")]
    Field { field: &'static str, value: String },
}

fn invalid(field: &'static str, value: impl Into<String>) -> HarError {
    HarError::Field {
        field,
        value: value.into(),
    }
}

// ── Archive document ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpArchive {
    pub log: Log,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Log {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub creator: Creator,
    #[serde(default)]
    pub entries: Vec<Entry>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Creator {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub started_date_time: String,
    #[serde(default)]
    pub time: u64,
    pub request: Request,
    pub response: Response,
    #[serde(default)]
    pub cache: Cache,
    #[serde(default)]
    pub timings: Timings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    #[serde(default)]
    pub http_version: String,
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub query_string: Vec<Parameter>,
    #[serde(default)]
    pub headers: Vec<Parameter>,
    #[serde(default = "unknown_size")]
    pub headers_size: i64,
    #[serde(default = "unknown_size")]
    pub body_size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_data: Option<PostData>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    #[serde(default)]
    pub http_version: String,
    pub status: u16,
    #[serde(default)]
    pub status_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    #[serde(default)]
    pub headers: Vec<Parameter>,
    #[serde(default = "unknown_size")]
    pub headers_size: i64,
    #[serde(default = "unknown_size")]
    pub body_size: i64,
    #[serde(default)]
    pub content: Content,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(default = "unknown_size")]
    pub size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
}

impl Default for Content {
    fn default() -> Self {
        Self {
            size: unknown_size(),
            mime_type: None,
            text: None,
            encoding: None,
        }
    }
}

/// `encoding` is an extension over HAR 1.2 so binary request bodies survive.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Parameter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

impl Parameter {
    fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Cache {}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Timings {
    #[serde(default)]
    pub send: i64,
    #[serde(default)]
    pub wait: i64,
    #[serde(default)]
    pub receive: i64,
}

fn unknown_size() -> i64 {
    -1
}

// ── Codec entry points ────────────────────────────────────────────────────────

pub fn serialize(interaction: &Interaction) -> Result<Vec<u8>, HarError> {
    Ok(serde_json::to_vec_pretty(&HttpArchive::from_interaction(interaction))?)
}

pub fn deserialize(name: &str, bytes: &[u8]) -> Result<Interaction, HarError> {
    let archive: HttpArchive = serde_json::from_slice(bytes)?;
    archive.into_interaction(name)
}

impl HttpArchive {
    pub fn from_interaction(interaction: &Interaction) -> Self {
        Self {
            log: Log {
                version: HAR_VERSION.to_string(),
                creator: Creator {
                    name: CREATOR_NAME.to_string(),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                },
                entries: interaction.messages().iter().map(Entry::from_message).collect(),
            },
        }
    }

    pub fn into_interaction(self, name: &str) -> Result<Interaction, HarError> {
        let messages = self
            .log
            .entries
            .into_iter()
            .map(Entry::into_message)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Interaction::with_messages(name, messages))
    }
}

// ── Entry <-> InteractionMessage ──────────────────────────────────────────────

impl Entry {
    pub fn from_message(message: &InteractionMessage) -> Self {
        let timings = message.timings();
        let time = timings.elapsed.as_secs_f64() * 1000.0;
        let time = time.round() as u64;
        let response = message.response();
        Self {
            started_date_time: timings
                .started_at
                .to_rfc3339_opts(SecondsFormat::Millis, false),
            time,
            request: Request::from_snapshot(&response.request),
            response: Response::from_snapshot(&response),
            cache: Cache::default(),
            timings: Timings {
                send: 0,
                wait: time as i64,
                receive: 0,
            },
        }
    }

    pub fn into_message(self) -> Result<InteractionMessage, HarError> {
        let started_at = DateTime::parse_from_rfc3339(&self.started_date_time)
            .map_err(|e| HarError::Timestamp {
                value: self.started_date_time.clone(),
                reason: e.to_string(),
            })?
            .with_timezone(&Utc);
        let request = self.request.into_snapshot()?;
        let response = self.response.into_snapshot(request)?;
        Ok(InteractionMessage::new(
            response,
            InteractionMessageTimings {
                started_at,
                elapsed: Duration::from_millis(self.time),
            },
        ))
    }
}

impl Request {
    fn from_snapshot(request: &RequestSnapshot) -> Self {
        let content_headers = request.content_headers();
        Self {
            http_version: format_version(request.version),
            method: request.method.to_string(),
            url: request.url.to_string(),
            query_string: request
                .url
                .query_pairs()
                .map(|(name, value)| Parameter::new(name, value))
                .collect(),
            headers: header_parameters(&request.headers, content_headers),
            headers_size: unknown_size(),
            body_size: request.content.as_ref().map_or(0, |c| c.data.len() as i64),
            post_data: request.content.as_ref().map(PostData::from_content),
        }
    }

    fn into_snapshot(self) -> Result<RequestSnapshot, HarError> {
        let method =
            Method::from_bytes(self.method.as_bytes()).map_err(|_| invalid("method", &self.method))?;
        let mut url = Url::parse(&self.url).map_err(|_| invalid("url", &self.url))?;
        if url.query().is_none() && !self.query_string.is_empty() {
            url.query_pairs_mut().extend_pairs(
                self.query_string
                    .iter()
                    .map(|p| (p.name.as_str(), p.value.as_str())),
            );
        }
        let (headers, mut content_headers) = parse_headers(&self.headers)?;
        let content = match self.post_data {
            Some(post_data) => {
                if !content_headers.contains_key(header::CONTENT_TYPE) {
                    if let Some(mime) = post_data.mime_type.as_deref().filter(|m| !m.is_empty()) {
                        let value = HeaderValue::from_str(mime).map_err(|_| invalid("mimeType", mime))?;
                        content_headers.insert(header::CONTENT_TYPE, value);
                    }
                }
                Some(BodyContent::new(post_data.into_bytes()?, content_headers))
            }
            None if !content_headers.is_empty() => Some(BodyContent::new(Vec::new(), content_headers)),
            None => None,
        };
        Ok(RequestSnapshot {
            method,
            url,
            version: parse_version(&self.http_version),
            headers,
            content,
        })
    }
}

impl PostData {
    fn from_content(content: &BodyContent) -> Self {
        let mime_type = content_type(&content.headers);
        let mut post_data = Self {
            mime_type: mime_type.clone(),
            ..Self::default()
        };
        match classify(mime_type.as_deref()) {
            BodyKind::Form => {
                post_data.params = parse_form(&content.data)
                    .into_iter()
                    .map(|(name, value)| Parameter::new(name, value))
                    .collect();
                let (text, encoding) = encode_text(&content.data, BodyKind::Text);
                post_data.text = text;
                post_data.encoding = encoding;
            }
            kind => {
                let (text, encoding) = encode_text(&content.data, kind);
                post_data.text = text;
                post_data.encoding = encoding;
            }
        }
        post_data
    }

    /// Text holds the exact bytes; params only rebuild a form when text is absent.
    fn into_bytes(self) -> Result<Vec<u8>, HarError> {
        if self.text.is_none() && !self.params.is_empty() {
            let form = encode_form(
                self.params
                    .iter()
                    .map(|p| (p.name.as_str(), p.value.as_str())),
            );
            return Ok(form.into_bytes());
        }
        decode_text(self.text, self.encoding.as_deref())
    }
}

impl Response {
    fn from_snapshot(response: &ResponseSnapshot) -> Self {
        let content_headers = response.content.as_ref().map(|c| &c.headers);
        let mut content = Content {
            size: response.content.as_ref().map_or(0, |c| c.data.len() as i64),
            mime_type: content_headers.and_then(content_type),
            ..Content::default()
        };
        if let Some(body) = &response.content {
            let (text, encoding) = encode_text(&body.data, classify(content.mime_type.as_deref()));
            content.text = text;
            content.encoding = encoding;
        }
        Self {
            http_version: format_version(response.version),
            status: response.status.as_u16(),
            status_text: response.reason_phrase().to_string(),
            redirect_url: response
                .headers
                .get(header::LOCATION)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string),
            headers: header_parameters(&response.headers, content_headers),
            headers_size: unknown_size(),
            body_size: content.size,
            content,
        }
    }

    fn into_snapshot(self, request: RequestSnapshot) -> Result<ResponseSnapshot, HarError> {
        let status =
            StatusCode::from_u16(self.status).map_err(|_| invalid("status", self.status.to_string()))?;
        let (headers, mut content_headers) = parse_headers(&self.headers)?;
        let has_text = self.content.text.as_deref().is_some_and(|t| !t.is_empty());
        let content = if has_text || !content_headers.is_empty() {
            if !content_headers.contains_key(header::CONTENT_TYPE) {
                if let Some(mime) = self.content.mime_type.as_deref().filter(|m| !m.is_empty()) {
                    let value = HeaderValue::from_str(mime).map_err(|_| invalid("mimeType", mime))?;
                    content_headers.insert(header::CONTENT_TYPE, value);
                }
            }
            let data = decode_text(self.content.text, self.content.encoding.as_deref())?;
            Some(BodyContent::new(data, content_headers))
        } else {
            None
        };
        Ok(ResponseSnapshot {
            status,
            reason: Some(self.status_text).filter(|s| !s.is_empty()),
            version: parse_version(&self.http_version),
            headers,
            content,
            request,
        })
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Binary bodies, and text bodies that are not valid UTF-8, are base64-encoded.
fn encode_text(data: &[u8], kind: BodyKind) -> (Option<String>, Option<String>) {
    if data.is_empty() {
        return (None, None);
    }
    if kind != BodyKind::Binary {
        if let Ok(text) = std::str::from_utf8(data) {
            return (Some(text.to_string()), None);
        }
    }
    (Some(STANDARD.encode(data)), Some(BASE64_ENCODING.to_string()))
}

fn decode_text(text: Option<String>, encoding: Option<&str>) -> Result<Vec<u8>, HarError> {
    let Some(text) = text else {
        return Ok(Vec::new());
    };
    if encoding.is_some_and(|e| e.eq_ignore_ascii_case(BASE64_ENCODING)) {
        Ok(STANDARD.decode(text.as_bytes())?)
    } else {
        Ok(text.into_bytes())
    }
}

/// One parameter per header name; repeated values are joined with `,`.
fn header_parameters(headers: &HeaderMap, content_headers: Option<&HeaderMap>) -> Vec<Parameter> {
    let mut out = Vec::new();
    for set in std::iter::once(headers).chain(content_headers) {
        for name in set.keys() {
            let value = set
                .get_all(name)
                .iter()
                .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
                .collect::<Vec<_>>()
                .join(",");
            out.push(Parameter::new(name.as_str(), value));
        }
    }
    out
}

fn parse_headers(parameters: &[Parameter]) -> Result<(HeaderMap, HeaderMap), HarError> {
    let mut headers = HeaderMap::new();
    for parameter in parameters {
        let name = HeaderName::from_bytes(parameter.name.as_bytes())
            .map_err(|_| invalid("header name", &parameter.name))?;
        let value = HeaderValue::from_str(&parameter.value)
            .map_err(|_| invalid("header value", &parameter.value))?;
        headers.append(name, value);
    }
    Ok(crate::content::split_content_headers(&headers))
}

fn format_version(version: Version) -> String {
    let version = match version {
        Version::HTTP_09 => "0.9",
        Version::HTTP_10 => "1.0",
        Version::HTTP_2 => "2",
        Version::HTTP_3 => "3",
        _ => "1.1",
    };
    format!("HTTP/{version}")
}

/// Unknown or missing versions fall back to HTTP/1.1.
fn parse_version(value: &str) -> Version {
    let trimmed = value.trim();
    let number = match trimmed.get(5..) {
        Some(rest)
            if trimmed
                .get(..5)
                .is_some_and(|prefix| prefix.eq_ignore_ascii_case("HTTP/")) =>
        {
            rest
        }
        _ => trimmed,
    };
    match number {
        "0.9" => Version::HTTP_09,
        "1.0" => Version::HTTP_10,
        "2" | "2.0" => Version::HTTP_2,
        "3" | "3.0" => Version::HTTP_3,
        _ => Version::HTTP_11,
    }
}
