//! Global audit settings and the decisions derived from them

use std::sync::Arc;

use super::{
    context::RequestContext,
    diff::{self, DiffFn},
    models::AuditRecord,
    routes::RouteAudit,
};
use crate::{
    config::AuditConfig,
    error::{AuditError, AuditResult},
};

pub type AuditableFn = Arc<dyn Fn(&RequestContext) -> bool + Send + Sync>;
pub type EntityFn = Arc<dyn Fn(&RequestContext) -> AuditResult<String> + Send + Sync>;
pub type UsernameFn = Arc<dyn Fn(&RequestContext) -> Option<String> + Send + Sync>;

/// Runs on every built record; `Ok(Some(..))` replaces it verbatim
pub type ExtAllFn =
    Arc<dyn Fn(&AuditRecord, &RequestContext) -> anyhow::Result<Option<AuditRecord>> + Send + Sync>;

#[derive(Clone)]
pub struct AuditSettings {
    pub config: AuditConfig,
    pub is_auditable: AuditableFn,
    pub get_entity: EntityFn,
    pub get_username: UsernameFn,
    pub diff: DiffFn,
    pub ext_all: Option<ExtAllFn>,
}

impl AuditSettings {
    pub fn new(config: AuditConfig) -> Self {
        let get_username = default_username(config.username_header.clone());

        Self {
            config,
            is_auditable: Arc::new(default_is_auditable),
            get_entity: Arc::new(default_entity),
            get_username,
            diff: diff::identity(),
            ext_all: None,
        }
    }

    /// Whether the before-handler phase should run for this request
    pub fn should_capture(&self, route: &RouteAudit, ctx: &RequestContext) -> bool {
        match route.options() {
            Some(options) if options.is_action => false,
            Some(_) => self.admits(ctx),
            None => false,
        }
    }

    /// Whether the after-response phase should run for this request
    pub fn should_finalize(&self, route: &RouteAudit, ctx: &RequestContext) -> bool {
        !route.is_disabled() && self.admits(ctx)
    }

    pub fn cache_enabled(&self) -> bool {
        !self.config.disable_cache
    }

    fn admits(&self, ctx: &RequestContext) -> bool {
        if !self.config.enabled {
            return false;
        }
        if self.config.auth_only && ctx.username.is_none() {
            return false;
        }
        (self.is_auditable)(ctx)
    }
}

impl std::fmt::Debug for AuditSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditSettings")
            .field("config", &self.config)
            .field("ext_all", &self.ext_all.is_some())
            .finish_non_exhaustive()
    }
}

pub fn default_is_auditable(ctx: &RequestContext) -> bool {
    ctx.path.starts_with("/api")
}

/// Second path segment of an `/api` path: `/api/test/5` is `test`
pub fn default_entity(ctx: &RequestContext) -> AuditResult<String> {
    ctx.path
        .starts_with("/api")
        .then(|| ctx.path.split('/').nth(2))
        .flatten()
        .filter(|entity| !entity.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            AuditError::Build(format!("Could not extract entity for path: {}", ctx.path))
        })
}

/// `AuthenticatedUser` extension first, then the identity header if one is configured
pub fn default_username(header: Option<String>) -> UsernameFn {
    Arc::new(move |ctx: &RequestContext| {
        if let Some(user) = &ctx.identity {
            return Some(user.username().to_string());
        }

        header
            .as_deref()
            .and_then(|name| ctx.headers.get(name))
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    })
}
