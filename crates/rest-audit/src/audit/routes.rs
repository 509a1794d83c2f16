//! Per-route audit options and the table that maps requests onto them
//!
//! The layer wraps the whole router, so it sees requests before axum has
//! matched them. [`RouteTable`] mirrors the routes that need options or path
//! parameters; requests to unregistered routes are audited with defaults.

use axum::http::{HeaderMap, Method};
use futures::future::{BoxFuture, FutureExt};
use serde_json::{Map, Value as JsonValue};
use std::{collections::BTreeMap, fmt, future::Future, sync::Arc};

use super::{
    diff::{self, DiffFn, DiffOptions, Snapshot},
    endpoint::FetchPath,
    models::RecordOverride,
};
use crate::error::{AuditError, AuditResult};

/// What a route extension gets to look at
#[derive(Clone)]
pub struct ExtContext {
    pub headers: HeaderMap,
    pub query: Map<String, JsonValue>,
    pub params: BTreeMap<String, String>,
    pub payload: Option<JsonValue>,
    pub old_values: Option<JsonValue>,
    pub new_values: Option<JsonValue>,
    diff_fn: DiffFn,
}

impl ExtContext {
    pub fn new(
        headers: HeaderMap,
        query: Map<String, JsonValue>,
        params: BTreeMap<String, String>,
        diff_fn: DiffFn,
    ) -> Self {
        Self {
            headers,
            query,
            params,
            payload: None,
            old_values: None,
            new_values: None,
            diff_fn,
        }
    }

    /// Project and compare the before/after snapshots with the configured diff function
    pub fn diff(&self, options: &DiffOptions) -> (Snapshot, Snapshot) {
        diff::reduce(self.old_values.clone(), self.new_values.clone(), options, &self.diff_fn)
    }
}

impl fmt::Debug for ExtContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtContext")
            .field("query", &self.query)
            .field("params", &self.params)
            .field("payload", &self.payload)
            .field("old_values", &self.old_values)
            .field("new_values", &self.new_values)
            .finish_non_exhaustive()
    }
}

/// Route extension: returns field overrides, or `None` to keep the defaults
pub type ExtFn =
    Arc<dyn Fn(ExtContext) -> BoxFuture<'static, anyhow::Result<Option<RecordOverride>>> + Send + Sync>;

#[derive(Clone, Default)]
pub struct RouteOptions {
    /// Record the request as an Action instead of a Mutation
    pub is_action: bool,
    /// Treat a non-PUT verb as an update
    pub audit_as_update: bool,
    /// Always re-read the entity after an update instead of using the payload
    pub fetch_new_values: bool,
    pub fetch_path: Option<FetchPath>,
    pub ext: Option<ExtFn>,
}

impl RouteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn action() -> Self {
        Self {
            is_action: true,
            ..Self::default()
        }
    }

    pub fn as_update() -> Self {
        Self {
            audit_as_update: true,
            ..Self::default()
        }
    }

    pub fn fetch_new_values(mut self) -> Self {
        self.fetch_new_values = true;
        self
    }

    pub fn fetch_path(mut self, fetch_path: FetchPath) -> Self {
        self.fetch_path = Some(fetch_path);
        self
    }

    pub fn with_ext<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ExtContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Option<RecordOverride>>> + Send + 'static,
    {
        self.ext = Some(Arc::new(move |ctx: ExtContext| f(ctx).boxed()));
        self
    }

    pub fn validate(&self) -> AuditResult<()> {
        if self.is_action && self.audit_as_update {
            return Err(AuditError::Configuration(
                "is_action and audit_as_update are mutually exclusive".to_string(),
            ));
        }
        if let Some(fetch_path) = &self.fetch_path {
            fetch_path.validate()?;
        }
        Ok(())
    }
}

impl fmt::Debug for RouteOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteOptions")
            .field("is_action", &self.is_action)
            .field("audit_as_update", &self.audit_as_update)
            .field("fetch_new_values", &self.fetch_new_values)
            .field("fetch_path", &self.fetch_path)
            .field("ext", &self.ext.as_ref().map(|_| ".."))
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum RouteAudit {
    Disabled,
    Enabled(RouteOptions),
}

impl RouteAudit {
    pub fn options(&self) -> Option<&RouteOptions> {
        match self {
            RouteAudit::Disabled => None,
            RouteAudit::Enabled(options) => Some(options),
        }
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self, RouteAudit::Disabled)
    }
}

impl Default for RouteAudit {
    fn default() -> Self {
        RouteAudit::Enabled(RouteOptions::default())
    }
}

impl From<bool> for RouteAudit {
    fn from(enabled: bool) -> Self {
        if enabled {
            RouteAudit::default()
        } else {
            RouteAudit::Disabled
        }
    }
}

impl From<RouteOptions> for RouteAudit {
    fn from(options: RouteOptions) -> Self {
        RouteAudit::Enabled(options)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

#[derive(Debug, Clone)]
struct RouteEntry {
    method: Method,
    template: String,
    segments: Vec<Segment>,
    audit: RouteAudit,
}

impl RouteEntry {
    fn literals(&self) -> usize {
        self.segments.iter().filter(|s| matches!(s, Segment::Literal(_))).count()
    }

    fn matches(&self, parts: &[&str]) -> Option<BTreeMap<String, String>> {
        if parts.len() != self.segments.len() {
            return None;
        }

        let mut params = BTreeMap::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(literal) if literal == part => {},
                Segment::Literal(_) => return None,
                Segment::Param(name) => {
                    params.insert(name.clone(), (*part).to_string());
                },
            }
        }
        Some(params)
    }

    /// Shape used for duplicate detection; parameter names don't matter
    fn shape(&self) -> Vec<Option<&str>> {
        self.segments
            .iter()
            .map(|s| match s {
                Segment::Literal(literal) => Some(literal.as_str()),
                Segment::Param(_) => None,
            })
            .collect()
    }
}

/// A registered route matched against a request
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub template: String,
    pub params: BTreeMap<String, String>,
    pub audit: RouteAudit,
}

#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    entries: Vec<RouteEntry>,
    errors: Vec<String>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `template` (segments `{name}` or `:name` bind parameters)
    pub fn route(mut self, method: Method, template: &str, audit: impl Into<RouteAudit>) -> Self {
        match parse_template(template) {
            Ok(segments) => self.entries.push(RouteEntry {
                method,
                template: template.to_string(),
                segments,
                audit: audit.into(),
            }),
            Err(reason) => self.errors.push(format!("{} {}: {}", method, template, reason)),
        }
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check every registered route once, before serving
    pub fn validate(&self) -> AuditResult<()> {
        if let Some(error) = self.errors.first() {
            return Err(AuditError::Configuration(format!("Invalid route {}", error)));
        }

        for (i, entry) in self.entries.iter().enumerate() {
            if let Some(options) = entry.audit.options() {
                options.validate().map_err(|err| {
                    AuditError::Configuration(format!(
                        "Invalid options on route {} {}: {}",
                        entry.method,
                        entry.template,
                        err.message()
                    ))
                })?;
            }

            let duplicate = self.entries[..i]
                .iter()
                .any(|other| other.method == entry.method && other.shape() == entry.shape());
            if duplicate {
                return Err(AuditError::Configuration(format!(
                    "Route {} {} is registered twice",
                    entry.method, entry.template
                )));
            }
        }

        Ok(())
    }

    /// Most specific registered route for a request; ties go to the first registered
    pub fn resolve(&self, method: &Method, path: &str) -> Option<RouteMatch> {
        let parts = split_path(path);
        let mut best: Option<(&RouteEntry, BTreeMap<String, String>)> = None;

        for entry in self.entries.iter().filter(|e| e.method == *method) {
            if let Some(params) = entry.matches(&parts) {
                let better = match &best {
                    Some((current, _)) => entry.literals() > current.literals(),
                    None => true,
                };
                if better {
                    best = Some((entry, params));
                }
            }
        }

        best.map(|(entry, params)| RouteMatch {
            template: entry.template.clone(),
            params,
            audit: entry.audit.clone(),
        })
    }
}

fn split_path(path: &str) -> Vec<&str> {
    path.strip_prefix('/').unwrap_or(path).split('/').collect()
}

fn parse_template(template: &str) -> Result<Vec<Segment>, String> {
    if !template.starts_with('/') {
        return Err("template must start with '/'".to_string());
    }

    split_path(template)
        .into_iter()
        .map(|part| {
            let name = part
                .strip_prefix(':')
                .or_else(|| part.strip_prefix('{').and_then(|p| p.strip_suffix('}')));

            match name {
                Some("") => Err(format!("empty parameter name in '{}'", part)),
                Some(name) => Ok(Segment::Param(name.to_string())),
                None if part.contains('{') || part.contains('}') => {
                    Err(format!("malformed parameter '{}'", part))
                },
                None => Ok(Segment::Literal(part.to_string())),
            }
        })
        .collect()
}
