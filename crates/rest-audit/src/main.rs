//! rest-audit demo server
//!
//! An in-memory orders API wrapped by the audit layer. Records are logged
//! through the tracing sink.

use anyhow::Result;
use axum::{
    extract::{Path, Request, State},
    http::{Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router, ServiceExt,
};
use rest_audit_common::logging::{init_logging, LogConfig};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{collections::BTreeMap, net::SocketAddr, sync::Arc, time::Duration};
use tokio::{signal, sync::RwLock};
use tower::Layer;
use tracing::info;

use rest_audit::{
    audit::{AuditLayer, DiffOptions, FetchPath, RecordOverride, RouteOptions, RouteTable},
    config::Config,
    error::AppError,
    middleware,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Order {
    id: u64,
    item: String,
    quantity: u32,
    status: String,
}

#[derive(Debug, Deserialize)]
struct CreateOrder {
    item: String,
    quantity: u32,
}

#[derive(Debug, Deserialize)]
struct UpdateOrder {
    item: String,
    quantity: u32,
}

#[derive(Debug, Deserialize)]
struct UpdateStatus {
    status: String,
}

#[derive(Debug, Default)]
struct OrderStore {
    next_id: u64,
    orders: BTreeMap<u64, Order>,
}

/// Application state shared across handlers
#[derive(Clone, Default)]
struct AppState {
    store: Arc<RwLock<OrderStore>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let log_config = LogConfig::builder()
        .log_file_prefix("rest-audit-demo")
        .filter_directives("rest_audit=debug,tower_http=debug")
        .build();

    // Environment variables take precedence
    let log_config = log_config.merge_env()?;

    let _log_guard = init_logging(&log_config)?;

    info!("Starting rest-audit demo server");

    let mut config = Config::load()?;
    if config.audit.username_header.is_none() {
        config.audit.username_header = Some("x-user-id".to_string());
    }
    info!(
        "Configuration loaded - server will bind to {}:{}",
        config.server.host, config.server.port
    );

    let audit_layer = AuditLayer::builder(config.audit.clone())
        .routes(audit_routes())
        .build()?;
    let _sweeper = audit_layer.spawn_cache_sweeper();

    let app = audit_layer.layer(create_router(AppState::default(), &config));

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, ServiceExt::<Request>::into_make_service(app))
        .with_graceful_shutdown(shutdown_signal(config.server.shutdown_timeout_secs))
        .await?;

    info!("Server shut down gracefully");

    Ok(())
}

/// Per-route audit options for the orders API
fn audit_routes() -> RouteTable {
    RouteTable::new()
        .route(Method::GET, "/api/orders/{id}", true)
        .route(
            Method::PUT,
            "/api/orders/{id}",
            RouteOptions::new().with_ext(|ctx| async move {
                let (old, new) = ctx.diff(&DiffOptions::drop_keys(["id"]));
                anyhow::Ok(Some(RecordOverride::new().original_values(old).new_values(new)))
            }),
        )
        .route(
            Method::POST,
            "/api/orders/{id}/approve",
            RouteOptions::action()
                .with_ext(|_| async { anyhow::Ok(Some(RecordOverride::new().action("approve"))) }),
        )
        .route(
            Method::PATCH,
            "/api/orders/{id}/status",
            RouteOptions::as_update()
                .fetch_path(FetchPath::template("/api/orders/{id}"))
                .fetch_new_values(),
        )
}

/// Create the application router with all routes and middleware
fn create_router(state: AppState, config: &Config) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/orders", get(list_orders).post(create_order))
        .route(
            "/api/orders/:id",
            get(get_order).put(update_order).delete(delete_order),
        )
        .route("/api/orders/:id/approve", post(approve_order))
        .route("/api/orders/:id/status", axum::routing::patch(update_status))
        .with_state(state)
        .layer(middleware::tracing_layer())
        .layer(middleware::cors_layer(&config.cors))
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "healthy" })))
}

async fn list_orders(State(state): State<AppState>) -> impl IntoResponse {
    let store = state.store.read().await;
    let orders: Vec<Order> = store.orders.values().cloned().collect();
    Json(json!({ "orders": orders }))
}

async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<Order>, AppError> {
    let store = state.store.read().await;
    store
        .orders
        .get(&id)
        .cloned()
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("order {}", id)))
}

async fn create_order(
    State(state): State<AppState>,
    Json(input): Json<CreateOrder>,
) -> Result<(StatusCode, Json<Order>), AppError> {
    if input.item.trim().is_empty() {
        return Err(AppError::BadRequest("item cannot be empty".to_string()));
    }

    let mut store = state.store.write().await;
    store.next_id += 1;
    let order = Order {
        id: store.next_id,
        item: input.item,
        quantity: input.quantity,
        status: "pending".to_string(),
    };
    store.orders.insert(order.id, order.clone());

    Ok((StatusCode::CREATED, Json(order)))
}

async fn update_order(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(input): Json<UpdateOrder>,
) -> Result<Json<Order>, AppError> {
    let mut store = state.store.write().await;
    let order = store
        .orders
        .get_mut(&id)
        .ok_or_else(|| AppError::NotFound(format!("order {}", id)))?;

    order.item = input.item;
    order.quantity = input.quantity;

    Ok(Json(order.clone()))
}

async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(input): Json<UpdateStatus>,
) -> Result<StatusCode, AppError> {
    let mut store = state.store.write().await;
    let order = store
        .orders
        .get_mut(&id)
        .ok_or_else(|| AppError::NotFound(format!("order {}", id)))?;

    order.status = input.status;

    Ok(StatusCode::NO_CONTENT)
}

async fn approve_order(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<Order>, AppError> {
    let mut store = state.store.write().await;
    let order = store
        .orders
        .get_mut(&id)
        .ok_or_else(|| AppError::NotFound(format!("order {}", id)))?;

    if order.status != "pending" {
        return Err(AppError::BadRequest(format!("order {} is already {}", id, order.status)));
    }
    order.status = "approved".to_string();

    Ok(Json(order.clone()))
}

async fn delete_order(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<StatusCode, AppError> {
    let mut store = state.store.write().await;
    store
        .orders
        .remove(&id)
        .map(|_| StatusCode::NO_CONTENT)
        .ok_or_else(|| AppError::NotFound(format!("order {}", id)))
}

/// Graceful shutdown signal handler
async fn shutdown_signal(timeout_secs: u64) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }

    info!("Waiting up to {} seconds for connections to close", timeout_secs);
    tokio::time::sleep(Duration::from_secs(timeout_secs.min(5))).await;
}
