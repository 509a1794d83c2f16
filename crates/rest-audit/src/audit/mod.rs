//! Audit record generation for REST APIs
//!
//! Every audited request yields at most one immutable record:
//!
//! - **Action** records for reads (`GET`) and for routes marked `is_action`
//! - **Mutation** records for create (`POST`), update (`PUT`, or any verb
//!   marked `audit_as_update`) and delete (`DELETE`)
//!
//! # Architecture
//!
//! [`AuditLayer`] wraps the application router and runs two phases around
//! the handler:
//!
//! 1. **Capture**: for updates and deletes, make sure the entity's state
//!    before the change is known. It comes from the prior-state cache (primed
//!    by earlier reads) or from a synthetic `GET` replayed through the router
//!    and marked with the [`InjectedRead`] extension.
//! 2. **Finalize**: once a 2xx response exists, classify the request, pair
//!    the before/after snapshots through the diff function, apply route and
//!    global extensions, and hand the record to the sink.
//!
//! Failures in either phase never change the response; they are reported on
//! the error channel.
//!
//! # Usage
//!
//! ```no_run
//! use axum::{extract::Request, http::Method, routing::put, Router, ServiceExt};
//! use rest_audit::audit::{AuditLayer, DiffOptions, RecordOverride, RouteOptions, RouteTable};
//! use rest_audit::config::AuditConfig;
//! use tower::Layer;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let routes = RouteTable::new()
//!     .route(Method::GET, "/api/orders/{id}", true)
//!     .route(
//!         Method::PUT,
//!         "/api/orders/{id}",
//!         RouteOptions::new().with_ext(|ctx| async move {
//!             let (old, new) = ctx.diff(&DiffOptions::drop_keys(["updated_at"]));
//!             anyhow::Ok(Some(RecordOverride::new().original_values(old).new_values(new)))
//!         }),
//!     )
//!     .route(Method::GET, "/api/orders/count", false);
//!
//! let layer = AuditLayer::builder(AuditConfig::default())
//!     .routes(routes)
//!     .on_record(|event| println!("{}", event.endpoint))
//!     .build()?;
//!
//! let router = Router::new().route("/api/orders/:id", put(|| async { "{}" }));
//! let app = layer.layer(router);
//! # let listener = tokio::net::TcpListener::bind("127.0.0.1:8000").await?;
//! # axum::serve(listener, ServiceExt::<Request>::into_make_service(app)).await?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod capture;
pub mod context;
pub mod diff;
pub mod emitter;
pub mod endpoint;
pub mod engine;
pub mod fetcher;
pub mod finalize;
pub mod middleware;
pub mod models;
pub mod policy;
pub mod routes;

pub use cache::{Clock, ManualClock, PriorStateCache, SystemClock};
pub use capture::CaptureState;
pub use context::{AuthenticatedUser, BodySnapshot, InjectedRead, RequestContext, INJECTED_HEADER};
pub use diff::{DiffFn, DiffOptions};
pub use emitter::{AuditSink, ChannelSink, ErrorHandler, EventEmitter, FnSink, TracingSink};
pub use endpoint::{Endpoint, FetchPath};
pub use engine::AuditEngine;
pub use fetcher::{FetchError, FetchRequest, FetchResponse, Fetcher, ServiceFetcher};
pub use finalize::FinalizeState;
pub use middleware::{AuditLayer, AuditLayerBuilder, AuditMiddleware};
pub use models::{
    ActionRecord, AuditEvent, AuditRecord, MutationAction, MutationRecord, Outcome, RecordOverride,
};
pub use policy::AuditSettings;
pub use routes::{ExtContext, RouteAudit, RouteMatch, RouteOptions, RouteTable};
