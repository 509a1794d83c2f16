//! Shared harness for audit layer integration tests
//!
//! Builds a small in-memory `test` entity API, wraps it with the audit layer,
//! and collects every emitted event and error-channel report.

#![allow(dead_code)]

use axum::{
    body::{Body, Bytes},
    extract::{Path, Request, State},
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::stream;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};
use tower::{Layer, ServiceExt};

use rest_audit::{
    audit::{
        AuditEvent, AuditLayer, AuditLayerBuilder, AuditMiddleware, AuditRecord, RouteTable,
        INJECTED_HEADER,
    },
    config::AuditConfig,
    error::AuditError,
};

/// Backing store plus a counter of reads issued by the audit pipeline
#[derive(Clone)]
pub struct TestState {
    pub store: Arc<Mutex<BTreeMap<String, Value>>>,
    pub next_id: Arc<AtomicU64>,
    pub injected_reads: Arc<AtomicUsize>,
}

impl TestState {
    pub fn seeded() -> Self {
        let mut store = BTreeMap::new();
        store.insert("5".to_string(), json!({"id": 5, "a": "old"}));
        store.insert("7".to_string(), json!({"id": 7, "a": "a", "b": "b", "c": "c"}));

        Self {
            store: Arc::new(Mutex::new(store)),
            next_id: Arc::new(AtomicU64::new(100)),
            injected_reads: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn item(&self, id: &str) -> Option<Value> {
        self.store.lock().unwrap().get(id).cloned()
    }
}

pub struct TestApp {
    pub app: AuditMiddleware<Router>,
    pub layer: AuditLayer,
    pub state: TestState,
    pub events: Arc<Mutex<Vec<AuditEvent>>>,
    pub errors: Arc<Mutex<Vec<AuditError>>>,
}

impl TestApp {
    pub fn new(config: AuditConfig) -> Self {
        Self::with(config, |builder| builder)
    }

    /// Build with the default route table; `configure` may replace any of it
    pub fn with(
        config: AuditConfig,
        configure: impl FnOnce(AuditLayerBuilder) -> AuditLayerBuilder,
    ) -> Self {
        let events = Arc::new(Mutex::new(Vec::new()));
        let errors = Arc::new(Mutex::new(Vec::new()));

        let sink = events.clone();
        let reports = errors.clone();
        let builder = AuditLayer::builder(config)
            .routes(entity_routes())
            .on_record(move |event| sink.lock().unwrap().push(event))
            .on_error(move |_ctx, err| reports.lock().unwrap().push(err.clone()));

        let layer = configure(builder).build().unwrap();
        let state = TestState::seeded();
        let app = layer.layer(router(state.clone()));

        Self {
            app,
            layer,
            state,
            events,
            errors,
        }
    }

    pub async fn send(&self, request: Request) -> (StatusCode, Bytes) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, body)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Bytes) {
        self.send(request(Method::GET, uri, None)).await
    }

    pub async fn call(&self, method: Method, uri: &str, body: Value) -> (StatusCode, Bytes) {
        self.send(request(method, uri, Some(body))).await
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.events().into_iter().map(|event| event.audit_log).collect()
    }

    /// The only record emitted so far
    pub fn single_record(&self) -> Value {
        let records = self.records();
        assert_eq!(records.len(), 1, "expected one record, got {:?}", records);
        serde_json::to_value(&records[0]).unwrap()
    }

    pub fn errors(&self) -> Vec<AuditError> {
        self.errors.lock().unwrap().clone()
    }

    pub fn injected_reads(&self) -> usize {
        self.state.injected_reads.load(Ordering::SeqCst)
    }
}

/// Per-route options shared by most tests: the `id` param on the item routes
pub fn entity_routes() -> RouteTable {
    RouteTable::new()
        .route(Method::GET, "/api/test/{id}", true)
        .route(Method::PUT, "/api/test/{id}", true)
        .route(Method::DELETE, "/api/test/{id}", true)
}

pub fn request(method: Method, uri: &str, body: Option<Value>) -> Request {
    let builder = Request::builder().method(method).uri(uri);
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub fn router(state: TestState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/test", get(list_items).post(create_item))
        .route(
            "/api/test/:id",
            get(get_item).put(update_item).patch(patch_item).delete(delete_item),
        )
        .route("/api/test/:id/approve", post(approve_item))
        .route("/api/notes", post(|| async { StatusCode::NO_CONTENT }))
        .route("/api/upload", post(upload))
        .with_state(state)
}

async fn list_items(State(state): State<TestState>) -> Json<Value> {
    let store = state.store.lock().unwrap();
    Json(Value::Array(store.values().cloned().collect()))
}

async fn get_item(
    State(state): State<TestState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if headers.contains_key(INJECTED_HEADER) {
        state.injected_reads.fetch_add(1, Ordering::SeqCst);
    }

    match state.item(&id) {
        Some(item) => Json(item).into_response(),
        None => (StatusCode::NOT_FOUND, "not found").into_response(),
    }
}

async fn create_item(State(state): State<TestState>, Json(mut item): Json<Value>) -> Response {
    let id = state.next_id.fetch_add(1, Ordering::SeqCst);
    item["id"] = json!(id);
    state.store.lock().unwrap().insert(id.to_string(), item.clone());
    (StatusCode::CREATED, Json(item)).into_response()
}

fn merge(state: &TestState, id: &str, patch: Value) -> Option<Value> {
    let mut store = state.store.lock().unwrap();
    let item = store.get_mut(id)?;
    if let (Some(target), Value::Object(fields)) = (item.as_object_mut(), patch) {
        target.extend(fields);
    }
    Some(item.clone())
}

async fn update_item(
    State(state): State<TestState>,
    Path(id): Path<String>,
    Json(patch): Json<Value>,
) -> Response {
    match merge(&state, &id, patch) {
        Some(item) => Json(item).into_response(),
        None => (StatusCode::NOT_FOUND, "not found").into_response(),
    }
}

async fn patch_item(
    State(state): State<TestState>,
    Path(id): Path<String>,
    Json(patch): Json<Value>,
) -> StatusCode {
    match merge(&state, &id, patch) {
        Some(_) => StatusCode::NO_CONTENT,
        None => StatusCode::NOT_FOUND,
    }
}

async fn delete_item(State(state): State<TestState>, Path(id): Path<String>) -> StatusCode {
    state.store.lock().unwrap().remove(&id);
    StatusCode::NO_CONTENT
}

async fn approve_item(Path(id): Path<String>) -> Json<Value> {
    Json(json!({"id": id, "approved": true}))
}

async fn upload() -> Response {
    let chunks = stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from_static(b"chunk"))]);
    Body::from_stream(chunks).into_response()
}
