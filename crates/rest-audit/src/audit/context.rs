//! Per-request view the audit pipeline works on
//!
//! Bodies are buffered only when their size hint is bounded by the
//! configured limit. Anything else (a streamed upload, a proxied download)
//! passes through untouched and is seen by the pipeline as
//! [`BodySnapshot::Unreadable`].

use axum::{
    body::{Body, Bytes},
    extract::{Query, Request},
    http::{request::Parts, HeaderMap, Method},
    response::Response,
};
use futures::stream;
use http_body::Body as _;
use http_body_util::BodyExt;
use serde_json::{Map, Value as JsonValue};
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

use super::routes::RouteMatch;

/// Header set on synthetic reads so handlers can tell them apart
///
/// Informational only. The layer strips it from inbound requests and
/// recognises its own reads by the [`InjectedRead`] extension.
pub const INJECTED_HEADER: &str = "injected";

/// Request extension marking a synthetic read issued by the pipeline
///
/// Only this crate constructs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InjectedRead(());

impl InjectedRead {
    pub(crate) fn new() -> Self {
        Self(())
    }
}

/// Identity of the caller, inserted as a request extension by an upstream
/// authentication layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser(pub String);

impl AuthenticatedUser {
    pub fn new(username: impl Into<String>) -> Self {
        Self(username.into())
    }

    pub fn username(&self) -> &str {
        &self.0
    }
}

/// What the pipeline could see of a request or response body
#[derive(Debug, Clone, PartialEq)]
pub enum BodySnapshot {
    Empty,
    Json(JsonValue),
    /// Streamed, oversized or failed to buffer
    Unreadable,
}

impl BodySnapshot {
    /// Non-JSON text is kept as a JSON string; non-UTF-8 bytes are unreadable
    pub fn from_bytes(bytes: &[u8]) -> Self {
        if bytes.is_empty() {
            return BodySnapshot::Empty;
        }

        match serde_json::from_slice::<JsonValue>(bytes) {
            Ok(value) => BodySnapshot::Json(value),
            Err(_) => match std::str::from_utf8(bytes) {
                Ok(text) => BodySnapshot::Json(JsonValue::String(text.to_string())),
                Err(_) => BodySnapshot::Unreadable,
            },
        }
    }

    pub fn json(&self) -> Option<&JsonValue> {
        match self {
            BodySnapshot::Json(value) => Some(value),
            _ => None,
        }
    }

    /// The body as a JSON object, if it is one
    pub fn object(&self) -> Option<&JsonValue> {
        self.json().filter(|value| value.is_object())
    }

    pub fn is_readable(&self) -> bool {
        !matches!(self, BodySnapshot::Unreadable)
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, BodySnapshot::Empty)
    }

    /// JSON value or `null`
    pub fn to_value(&self) -> JsonValue {
        self.json().cloned().unwrap_or(JsonValue::Null)
    }
}

/// Everything the policy, extractors and record builder need about one request
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: Method,
    pub path: String,
    /// Matched route template, if the route is registered
    pub route: Option<String>,
    pub params: BTreeMap<String, String>,
    pub query: Map<String, JsonValue>,
    pub headers: HeaderMap,
    pub payload: BodySnapshot,
    /// Resolved by the username extractor
    pub username: Option<String>,
    /// Request was issued by the pipeline itself
    pub injected: bool,
    pub identity: Option<AuthenticatedUser>,
}

impl RequestContext {
    pub fn from_parts(parts: &Parts, matched: Option<&RouteMatch>, payload: BodySnapshot) -> Self {
        Self {
            method: parts.method.clone(),
            path: parts.uri.path().to_string(),
            route: matched.map(|m| m.template.clone()),
            params: matched.map(|m| m.params.clone()).unwrap_or_default(),
            query: parse_query(&parts.uri),
            headers: parts.headers.clone(),
            payload,
            username: None,
            injected: parts.extensions.get::<InjectedRead>().is_some(),
            identity: parts.extensions.get::<AuthenticatedUser>().cloned(),
        }
    }

    /// Shorthand for tests and custom extractors
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            route: None,
            params: BTreeMap::new(),
            query: Map::new(),
            headers: HeaderMap::new(),
            payload: BodySnapshot::Empty,
            username: None,
            injected: false,
            identity: None,
        }
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn query_value(&self) -> JsonValue {
        JsonValue::Object(self.query.clone())
    }
}

fn parse_query(uri: &axum::http::Uri) -> Map<String, JsonValue> {
    match Query::<HashMap<String, String>>::try_from_uri(uri) {
        Ok(Query(pairs)) => pairs
            .into_iter()
            .map(|(key, value)| (key, JsonValue::String(value)))
            .collect(),
        Err(err) => {
            warn!(uri = %uri, error = %err, "Failed to parse query string");
            Map::new()
        },
    }
}

/// Buffer a request body if it is small enough to be read safely
pub async fn buffer_request(request: Request, limit: usize) -> (Request, BodySnapshot) {
    let (parts, body) = request.into_parts();
    let (body, snapshot) = buffer_body(body, limit).await;
    (Request::from_parts(parts, body), snapshot)
}

/// Buffer a response body if it is small enough to be read safely
pub async fn buffer_response(response: Response, limit: usize) -> (Response, BodySnapshot) {
    let (parts, body) = response.into_parts();
    let (body, snapshot) = buffer_body(body, limit).await;
    (Response::from_parts(parts, body), snapshot)
}

async fn buffer_body(mut body: Body, limit: usize) -> (Body, BodySnapshot) {
    match body.size_hint().upper() {
        Some(upper) if upper <= limit as u64 => {},
        _ => return (body, BodySnapshot::Unreadable),
    }

    let mut chunks: Vec<Bytes> = Vec::new();
    while let Some(frame) = body.frame().await {
        match frame {
            Ok(frame) => {
                if let Ok(data) = frame.into_data() {
                    chunks.push(data);
                }
            },
            Err(err) => {
                warn!(error = %err, "Failed to buffer body, passing the error on");
                // what was read so far, then the same failure
                let replay = chunks.into_iter().map(Ok).chain(std::iter::once(Err(err)));
                return (Body::from_stream(stream::iter(replay)), BodySnapshot::Unreadable);
            },
        }
    }

    let bytes = Bytes::from(chunks.concat());
    let snapshot = BodySnapshot::from_bytes(&bytes);
    (Body::from(bytes), snapshot)
}
