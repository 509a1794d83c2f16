//! Synthetic reads of an entity's current state
//!
//! The default [`ServiceFetcher`] replays a GET through the wrapped router
//! in-process. Replayed requests carry the [`InjectedRead`] extension so the
//! pipeline recognises and skips them, plus an informational `injected: true`
//! header for handlers.

use async_trait::async_trait;
use axum::{
    body::{Body, Bytes},
    extract::Request,
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::Response,
};
use serde_json::Value as JsonValue;
use std::{fmt, time::Duration};
use thiserror::Error;
use tower::{Service, ServiceExt};

use super::context::{AuthenticatedUser, BodySnapshot, InjectedRead, INJECTED_HEADER};

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub path: String,
    /// Inbound headers, reused so the read runs with the caller's credentials
    pub headers: HeaderMap,
    pub identity: Option<AuthenticatedUser>,
}

impl FetchRequest {
    pub fn get(path: impl Into<String>, headers: HeaderMap) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            headers,
            identity: None,
        }
    }

    pub fn with_identity(mut self, identity: Option<AuthenticatedUser>) -> Self {
        self.identity = identity;
        self
    }
}

#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Parsed body; an empty body reads as `null`
    pub fn json(&self) -> Option<JsonValue> {
        match BodySnapshot::from_bytes(&self.body) {
            BodySnapshot::Json(value) => Some(value),
            BodySnapshot::Empty => Some(JsonValue::Null),
            BodySnapshot::Unreadable => None,
        }
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("{0}")]
    Service(String),

    #[error("failed to read body: {0}")]
    Body(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid request: {0}")]
    Request(String),
}

/// Loopback read capability used by the capture and finalize phases
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError>;
}

/// Replays reads through an in-process service (normally the wrapped router)
#[derive(Clone)]
pub struct ServiceFetcher<S> {
    inner: S,
    max_body_bytes: usize,
}

impl<S> ServiceFetcher<S> {
    pub fn new(inner: S, max_body_bytes: usize) -> Self {
        Self {
            inner,
            max_body_bytes,
        }
    }
}

impl<S> fmt::Debug for ServiceFetcher<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceFetcher")
            .field("max_body_bytes", &self.max_body_bytes)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<S> Fetcher for ServiceFetcher<S>
where
    S: Service<Request, Response = Response> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
    S::Error: fmt::Display,
{
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        let mut headers = request.headers;
        headers.remove(header::CONTENT_LENGTH);
        headers.remove(header::CONTENT_TYPE);
        headers.insert(INJECTED_HEADER, HeaderValue::from_static("true"));

        let mut builder = Request::builder()
            .method(request.method)
            .uri(request.path.as_str())
            .extension(InjectedRead::new());
        if let Some(target) = builder.headers_mut() {
            *target = headers;
        }
        if let Some(identity) = request.identity {
            builder = builder.extension(identity);
        }
        let replay = builder
            .body(Body::empty())
            .map_err(|err| FetchError::Request(err.to_string()))?;

        let response = self
            .inner
            .clone()
            .oneshot(replay)
            .await
            .map_err(|err| FetchError::Service(err.to_string()))?;

        let (parts, body) = response.into_parts();
        let body = axum::body::to_bytes(body, self.max_body_bytes)
            .await
            .map_err(|err| FetchError::Body(err.to_string()))?;

        Ok(FetchResponse {
            status: parts.status,
            headers: parts.headers,
            body,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::{routing::get, Extension, Router};
    use serde_json::json;

    fn router() -> Router {
        Router::new().route(
            "/api/test/:id",
            get(|marker: Option<Extension<InjectedRead>>, headers: HeaderMap| async move {
                let injected = headers
                    .get(INJECTED_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("false")
                    .to_string();
                axum::Json(json!({"id": 5, "injected": injected, "marked": marker.is_some()}))
            }),
        )
    }

    #[tokio::test]
    async fn test_replays_get_with_injected_header() {
        let fetcher = ServiceFetcher::new(router(), 1024);
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("12"));

        let response = fetcher.fetch(FetchRequest::get("/api/test/5", headers)).await.unwrap();

        assert!(response.is_success());
        assert_eq!(response.json(), Some(json!({"id": 5, "injected": "true", "marked": true})));
    }

    #[tokio::test]
    async fn test_not_found_is_returned_not_raised() {
        let fetcher = ServiceFetcher::new(router(), 1024);
        let response = fetcher
            .fetch(FetchRequest::get("/api/missing", HeaderMap::new()))
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert!(!response.is_success());
    }

    #[tokio::test]
    async fn test_oversized_body_fails() {
        let fetcher = ServiceFetcher::new(router(), 4);
        let result = fetcher.fetch(FetchRequest::get("/api/test/5", HeaderMap::new())).await;
        assert!(matches!(result, Err(FetchError::Body(_))));
    }
}
