//! REST audit library
//!
//! Generates structured audit records for a REST API from inside the
//! request path, without the handlers emitting anything themselves.
//!
//! # Overview
//!
//! - **Audit pipeline** ([`audit`]): a tower layer that captures the state
//!   before updates and deletes, classifies each request after its response,
//!   and emits one Action or Mutation record per audited request
//! - **Configuration** ([`config`]): environment-driven settings for the
//!   pipeline and the demo server
//! - **Middleware** ([`middleware`]): CORS and request tracing for the demo
//!
//! # Records
//!
//! | Request                         | Record   | `action`  |
//! |---------------------------------|----------|-----------|
//! | `GET`                           | Action   | `SEARCH`  |
//! | `POST`/`PUT` with `is_action`   | Action   | `SEARCH`  |
//! | `POST`                          | Mutation | `CREATE`  |
//! | `PUT`, or `audit_as_update`     | Mutation | `UPDATE`  |
//! | `DELETE`                        | Mutation | `DELETE`  |
//!
//! Route extensions may override any field except the timestamp.
//!
//! # Example
//!
//! ```no_run
//! use axum::{extract::Request, Router, ServiceExt};
//! use rest_audit::{audit::AuditLayer, config::Config};
//! use tower::Layer;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let layer = AuditLayer::new(config.audit.clone())?;
//!     let _sweeper = layer.spawn_cache_sweeper();
//!
//!     let app = layer.layer(Router::new());
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:8000").await?;
//!     axum::serve(listener, ServiceExt::<Request>::into_make_service(app)).await?;
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod audit;
pub mod config;
pub mod error;
pub mod middleware;

// Re-export commonly used types
pub use audit::{AuditLayer, AuditRecord, RouteOptions, RouteTable};
pub use error::{AppError, AuditError, AuditResult};
