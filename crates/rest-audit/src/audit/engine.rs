//! State shared by every request passing through the audit layer

use axum::http::Method;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::debug;

use super::{
    cache::{Clock, PriorStateCache},
    context::RequestContext,
    emitter::{ErrorHandler, EventEmitter},
    endpoint::{Endpoint, DEFAULT_SOURCE_ID},
    fetcher::{FetchError, FetchRequest, Fetcher},
    policy::AuditSettings,
    routes::{RouteAudit, RouteMatch, RouteOptions, RouteTable},
};
use crate::error::{AuditError, AuditResult};

pub struct AuditEngine {
    pub(crate) settings: AuditSettings,
    pub(crate) cache: Arc<PriorStateCache>,
    pub(crate) emitter: EventEmitter,
    pub(crate) on_error: ErrorHandler,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) routes: RouteTable,
}

impl AuditEngine {
    pub fn settings(&self) -> &AuditSettings {
        &self.settings
    }

    pub fn cache(&self) -> &Arc<PriorStateCache> {
        &self.cache
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Registered route for a request and its audit setting; unregistered routes use defaults
    pub fn resolve_route(&self, method: &Method, path: &str) -> (Option<RouteMatch>, RouteAudit) {
        let matched = self.routes.resolve(method, path);
        let audit = matched
            .as_ref()
            .map(|m| m.audit.clone())
            .unwrap_or_default();
        (matched, audit)
    }

    /// Hand a failure to the error channel
    pub(crate) fn report(&self, ctx: &RequestContext, err: AuditError) {
        (self.on_error)(ctx, &err);
    }

    /// Read the current state at `path` with the caller's headers and identity
    ///
    /// `phase` is `before` or `after` and only shapes the error message.
    pub(crate) async fn fetch_snapshot(
        &self,
        fetcher: &dyn Fetcher,
        ctx: &RequestContext,
        path: &str,
        phase: &str,
    ) -> AuditResult<JsonValue> {
        let fetch_endpoint = Endpoint::get(path);
        let failure = |detail: String| {
            AuditError::Capture(format!(
                "Could not fetch values for injected request {} {} {}: {}",
                fetch_endpoint,
                phase,
                Endpoint::of(ctx),
                detail
            ))
        };

        let timeout = self.settings.config.fetch_timeout();
        let request = FetchRequest::get(path, ctx.headers.clone()).with_identity(ctx.identity.clone());

        debug!(endpoint = %fetch_endpoint, phase, "Issuing synthetic read");

        let response = match tokio::time::timeout(timeout, fetcher.fetch(request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => return Err(failure(err.to_string())),
            Err(_) => return Err(failure(FetchError::Timeout(timeout).to_string())),
        };

        if !response.is_success() {
            return Err(failure(response.body_text()));
        }

        response
            .json()
            .ok_or_else(|| failure("response body is not readable".to_string()))
    }
}

impl std::fmt::Debug for AuditEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditEngine")
            .field("settings", &self.settings)
            .field("cache", &self.cache)
            .field("routes", &self.routes.len())
            .finish_non_exhaustive()
    }
}

/// Treat PUT, and any verb on an `audit_as_update` route, as an update
pub(crate) fn is_update(ctx: &RequestContext, options: &RouteOptions) -> bool {
    ctx.method == Method::PUT || options.audit_as_update
}

/// Path parameter naming the entity, as a JSON string
pub(crate) fn param_id(ctx: &RequestContext, options: &RouteOptions) -> Option<JsonValue> {
    let source_id = options
        .fetch_path
        .as_ref()
        .map(|fetch_path| fetch_path.source_id())
        .unwrap_or(DEFAULT_SOURCE_ID);

    ctx.param(source_id).map(|id| JsonValue::String(id.to_string()))
}

/// `id` field of a snapshot, whatever its JSON type
pub(crate) fn snapshot_id(snapshot: Option<&JsonValue>) -> Option<JsonValue> {
    snapshot.and_then(|value| value.get("id")).cloned()
}
