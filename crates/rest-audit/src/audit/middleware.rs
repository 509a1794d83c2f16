//! Tower layer that runs the audit pipeline around the wrapped router
//!
//! Wrap the whole router rather than adding this with `Router::layer`, so the
//! layer sees every request and the default fetcher can replay reads against
//! any route:
//!
//! ```no_run
//! use axum::{extract::Request, routing::get, Router, ServiceExt};
//! use rest_audit::{audit::AuditLayer, config::AuditConfig};
//! use tower::Layer;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let router = Router::new().route("/api/orders/:id", get(|| async { "{}" }));
//! let layer = AuditLayer::new(AuditConfig::default())?;
//! let _sweeper = layer.spawn_cache_sweeper();
//! let app = layer.layer(router);
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8000").await?;
//! axum::serve(listener, ServiceExt::<Request>::into_make_service(app)).await?;
//! # Ok(())
//! # }
//! ```

use axum::{extract::Request, response::Response};
use std::{
    fmt,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};
use tokio::task::JoinHandle;
use tower::{Layer, Service};
use tracing::debug;

use super::{
    cache::{Clock, PriorStateCache, SystemClock},
    context::{
        buffer_request, buffer_response, BodySnapshot, InjectedRead, RequestContext,
        INJECTED_HEADER,
    },
    diff::DiffFn,
    emitter::{default_error_handler, AuditSink, ErrorHandler, EventEmitter, FnSink},
    engine::AuditEngine,
    fetcher::{Fetcher, ServiceFetcher},
    models::{AuditEvent, AuditRecord},
    policy::AuditSettings,
    routes::RouteTable,
};
use crate::{
    config::AuditConfig,
    error::{AuditError, AuditResult},
};

/// Audit layer
///
/// Cheap to clone; every clone shares one engine and one prior-state cache.
#[derive(Clone)]
pub struct AuditLayer {
    engine: Arc<AuditEngine>,
    fetcher: Option<Arc<dyn Fetcher>>,
}

impl AuditLayer {
    /// Layer with default extractors, the tracing sink and no route options
    pub fn new(config: AuditConfig) -> AuditResult<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: AuditConfig) -> AuditLayerBuilder {
        AuditLayerBuilder::new(config)
    }

    pub fn engine(&self) -> &Arc<AuditEngine> {
        &self.engine
    }

    pub fn cache(&self) -> &Arc<PriorStateCache> {
        self.engine.cache()
    }

    /// Start the periodic cache sweep on the current tokio runtime
    pub fn spawn_cache_sweeper(&self) -> JoinHandle<()> {
        let interval = self.engine.settings().config.cache_sweep_interval();
        self.engine.cache().spawn_sweeper(interval)
    }
}

impl fmt::Debug for AuditLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditLayer")
            .field("engine", &self.engine)
            .field("custom_fetcher", &self.fetcher.is_some())
            .finish()
    }
}

impl<S> Layer<S> for AuditLayer
where
    S: Service<Request, Response = Response> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
    S::Error: fmt::Display,
{
    type Service = AuditMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        let fetcher = match &self.fetcher {
            Some(fetcher) => fetcher.clone(),
            None => Arc::new(ServiceFetcher::new(
                inner.clone(),
                self.engine.settings().config.max_body_bytes,
            )),
        };

        AuditMiddleware {
            inner,
            engine: self.engine.clone(),
            fetcher,
        }
    }
}

/// Audit middleware service
#[derive(Clone)]
pub struct AuditMiddleware<S> {
    inner: S,
    engine: Arc<AuditEngine>,
    fetcher: Arc<dyn Fetcher>,
}

impl<S> Service<Request> for AuditMiddleware<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request) -> Self::Future {
        // the clone may not be ready; keep the one poll_ready was called on
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let engine = self.engine.clone();
        let fetcher = self.fetcher.clone();

        Box::pin(async move {
            if request.extensions().get::<InjectedRead>().is_some() {
                return inner.call(request).await;
            }
            // only the pipeline's own reads may claim to be injected
            request.headers_mut().remove(INJECTED_HEADER);

            let settings = engine.settings();
            if !settings.config.enabled {
                return inner.call(request).await;
            }

            let (matched, route) = engine.resolve_route(request.method(), request.uri().path());
            if route.is_disabled() {
                return inner.call(request).await;
            }

            let (parts, body) = request.into_parts();
            let mut ctx = RequestContext::from_parts(&parts, matched.as_ref(), BodySnapshot::Empty);
            ctx.username = (settings.get_username)(&ctx);

            if !settings.should_finalize(&route, &ctx) {
                return inner.call(Request::from_parts(parts, body)).await;
            }

            let limit = settings.config.max_body_bytes;
            let (request, payload) = buffer_request(Request::from_parts(parts, body), limit).await;
            ctx.payload = payload;

            let capture = engine.capture(fetcher.as_ref(), &ctx, &route).await;
            debug!(method = %ctx.method, path = %ctx.path, ?capture, "Capture phase done");

            let response = inner.call(request).await?;
            if !response.status().is_success() {
                return Ok(response);
            }

            let (response, snapshot) = buffer_response(response, limit).await;
            let state = engine
                .finalize(fetcher.as_ref(), &ctx, &route, response.status(), &snapshot)
                .await;
            debug!(method = %ctx.method, path = %ctx.path, ?state, "Finalize phase done");

            Ok(response)
        })
    }
}

/// Assembles an [`AuditLayer`]; closure-valued options live here
pub struct AuditLayerBuilder {
    config: AuditConfig,
    routes: RouteTable,
    settings: AuditSettings,
    sink: Option<Arc<dyn AuditSink>>,
    on_error: Option<ErrorHandler>,
    fetcher: Option<Arc<dyn Fetcher>>,
    clock: Option<Arc<dyn Clock>>,
}

impl AuditLayerBuilder {
    pub fn new(config: AuditConfig) -> Self {
        Self {
            settings: AuditSettings::new(config.clone()),
            config,
            routes: RouteTable::new(),
            sink: None,
            on_error: None,
            fetcher: None,
            clock: None,
        }
    }

    pub fn routes(mut self, routes: RouteTable) -> Self {
        self.routes = routes;
        self
    }

    /// Predicate deciding which requests are audited at all
    pub fn is_auditable<F>(mut self, f: F) -> Self
    where
        F: Fn(&RequestContext) -> bool + Send + Sync + 'static,
    {
        self.settings.is_auditable = Arc::new(f);
        self
    }

    pub fn entity<F>(mut self, f: F) -> Self
    where
        F: Fn(&RequestContext) -> AuditResult<String> + Send + Sync + 'static,
    {
        self.settings.get_entity = Arc::new(f);
        self
    }

    pub fn username<F>(mut self, f: F) -> Self
    where
        F: Fn(&RequestContext) -> Option<String> + Send + Sync + 'static,
    {
        self.settings.get_username = Arc::new(f);
        self
    }

    pub fn diff(mut self, diff: DiffFn) -> Self {
        self.settings.diff = diff;
        self
    }

    /// Hook run on every built record; returning a record replaces it
    pub fn ext_all<F>(mut self, f: F) -> Self
    where
        F: Fn(&AuditRecord, &RequestContext) -> anyhow::Result<Option<AuditRecord>>
            + Send
            + Sync
            + 'static,
    {
        self.settings.ext_all = Some(Arc::new(f));
        self
    }

    pub fn sink(mut self, sink: impl AuditSink + 'static) -> Self {
        self.sink = Some(Arc::new(sink));
        self
    }

    pub fn on_record<F>(self, f: F) -> Self
    where
        F: Fn(AuditEvent) + Send + Sync + 'static,
    {
        self.sink(FnSink(f))
    }

    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&RequestContext, &AuditError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Replace the in-process replay with another read mechanism
    pub fn fetcher(mut self, fetcher: impl Fetcher + 'static) -> Self {
        self.fetcher = Some(Arc::new(fetcher));
        self
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    pub fn build(self) -> AuditResult<AuditLayer> {
        self.config.validate()?;
        self.routes.validate()?;

        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let cache = Arc::new(PriorStateCache::new(self.config.cache_max_age(), clock.clone()));
        let emitter = match self.sink {
            Some(sink) => EventEmitter::new(sink),
            None => EventEmitter::default(),
        };
        let on_error = self
            .on_error
            .unwrap_or_else(|| default_error_handler(self.config.show_errors));

        debug!(
            client_id = %self.config.client_id,
            routes = self.routes.len(),
            "Audit layer configured"
        );

        Ok(AuditLayer {
            engine: Arc::new(AuditEngine {
                settings: self.settings,
                cache,
                emitter,
                on_error,
                clock,
                routes: self.routes,
            }),
            fetcher: self.fetcher,
        })
    }
}

impl fmt::Debug for AuditLayerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditLayerBuilder")
            .field("config", &self.config)
            .field("routes", &self.routes.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::{audit::routes::RouteOptions, config::MIN_CACHE_SWEEP_INTERVAL_MS};
    use axum::http::Method;

    #[test]
    fn test_build_rejects_invalid_config() {
        let config = AuditConfig {
            cache_sweep_interval_ms: MIN_CACHE_SWEEP_INTERVAL_MS - 1,
            ..AuditConfig::default()
        };
        assert!(matches!(AuditLayer::new(config), Err(AuditError::Configuration(_))));
    }

    #[test]
    fn test_build_rejects_invalid_routes() {
        let routes = RouteTable::new().route(
            Method::POST,
            "/api/test/{id}",
            RouteOptions {
                is_action: true,
                audit_as_update: true,
                ..RouteOptions::default()
            },
        );
        let result = AuditLayer::builder(AuditConfig::default()).routes(routes).build();
        assert!(matches!(result, Err(AuditError::Configuration(_))));
    }

    #[test]
    fn test_clones_share_cache() {
        let layer = AuditLayer::new(AuditConfig::default()).unwrap();
        let clone = layer.clone();
        layer.cache().set("get:/api/test/1", serde_json::json!({"id": 1}));
        assert_eq!(clone.cache().len(), 1);
    }
}
