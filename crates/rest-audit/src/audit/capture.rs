//! Before-handler phase: make sure the state before an update or delete is known

use axum::http::Method;
use tracing::{debug, warn};

use super::{
    context::RequestContext,
    endpoint::Endpoint,
    engine::{is_update, AuditEngine},
    fetcher::Fetcher,
    routes::RouteAudit,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// Nothing to capture for this request
    Skipped,
    /// Prior state is in the cache
    Captured,
    /// The synthetic read failed; the request proceeds without prior state
    CaptureFailed,
}

impl AuditEngine {
    /// Never touches the request; failures go to the error channel
    pub async fn capture(
        &self,
        fetcher: &dyn Fetcher,
        ctx: &RequestContext,
        route: &RouteAudit,
    ) -> CaptureState {
        if ctx.injected || !self.settings.should_capture(route, ctx) {
            return CaptureState::Skipped;
        }
        let Some(options) = route.options() else {
            return CaptureState::Skipped;
        };

        let path = Endpoint::resolve(ctx, options.fetch_path.as_ref());
        let key = Endpoint::get(path.as_str()).to_string();

        if is_update(ctx, options) {
            if self.settings.cache_enabled() && self.cache.get(&key).is_some() {
                debug!(key = %key, "Prior state served from cache");
                return CaptureState::Captured;
            }
        } else if ctx.method != Method::DELETE {
            return CaptureState::Skipped;
        }

        match self.fetch_snapshot(fetcher, ctx, &path, "before").await {
            Ok(snapshot) => {
                self.cache.set(key.as_str(), snapshot);
                debug!(key = %key, "Prior state captured");
                CaptureState::Captured
            },
            Err(err) => {
                warn!(key = %key, error = %err, "Prior state capture failed");
                self.report(ctx, err);
                CaptureState::CaptureFailed
            },
        }
    }
}
