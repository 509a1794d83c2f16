//! Endpoint descriptors and fetch-path overrides
//!
//! An endpoint is `verb:path` with the verb lower-cased. The GET endpoint of
//! a route's fetch path is the prior-state cache key and the correlation key
//! between the capture and finalize phases.

use axum::http::Method;
use std::{fmt, sync::Arc};

use super::context::RequestContext;
use crate::error::{AuditError, AuditResult};

/// Path parameter read by a template override unless told otherwise
pub const DEFAULT_SOURCE_ID: &str = "id";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub method: Method,
    pub path: String,
}

impl Endpoint {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// Endpoint of the request itself
    pub fn of(ctx: &RequestContext) -> Self {
        Self::new(ctx.method.clone(), ctx.path.clone())
    }

    /// GET endpoint used to read the entity behind `ctx`, honouring an override
    pub fn fetch(ctx: &RequestContext, fetch_path: Option<&FetchPath>) -> Self {
        Self::get(Self::resolve(ctx, fetch_path))
    }

    /// Path a synthetic read for `ctx` should target
    pub fn resolve(ctx: &RequestContext, fetch_path: Option<&FetchPath>) -> String {
        fetch_path
            .and_then(|fetch_path| fetch_path.resolve(ctx))
            .unwrap_or_else(|| ctx.path.clone())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.method.as_str().to_lowercase(), self.path)
    }
}

pub type GetPathFn = Arc<dyn Fn(&RequestContext) -> Option<String> + Send + Sync>;

/// Where to read an entity from when the request path is not a GET-able resource
#[derive(Clone)]
pub enum FetchPath {
    /// Literal path whose `{...}` placeholder takes the value of path parameter `source_id`
    Template { path: String, source_id: String },
    /// Computed path; `None` falls back to the request path
    Custom(GetPathFn),
}

impl FetchPath {
    pub fn template(path: impl Into<String>) -> Self {
        FetchPath::Template {
            path: path.into(),
            source_id: DEFAULT_SOURCE_ID.to_string(),
        }
    }

    pub fn template_with_source(path: impl Into<String>, source_id: impl Into<String>) -> Self {
        FetchPath::Template {
            path: path.into(),
            source_id: source_id.into(),
        }
    }

    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&RequestContext) -> Option<String> + Send + Sync + 'static,
    {
        FetchPath::Custom(Arc::new(f))
    }

    /// Path parameter that identifies the entity
    pub fn source_id(&self) -> &str {
        match self {
            FetchPath::Template { source_id, .. } => source_id,
            FetchPath::Custom(_) => DEFAULT_SOURCE_ID,
        }
    }

    pub fn resolve(&self, ctx: &RequestContext) -> Option<String> {
        match self {
            FetchPath::Template { path, source_id } => match placeholder(path) {
                Some((start, end)) => {
                    let value = ctx.param(source_id)?;
                    Some(format!("{}{}{}", &path[..start], value, &path[end..]))
                },
                None => Some(path.clone()),
            },
            FetchPath::Custom(f) => f(ctx),
        }
    }

    pub fn validate(&self) -> AuditResult<()> {
        if let FetchPath::Template { path, source_id } = self {
            if !path.starts_with('/') {
                return Err(AuditError::Configuration(format!(
                    "fetch path '{}' must start with '/'",
                    path
                )));
            }
            if source_id.trim().is_empty() {
                return Err(AuditError::Configuration(format!(
                    "fetch path '{}' has an empty source id",
                    path
                )));
            }
            if path.contains('{') && placeholder(path).is_none() {
                return Err(AuditError::Configuration(format!(
                    "fetch path '{}' has an unterminated placeholder",
                    path
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for FetchPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchPath::Template { path, source_id } => f
                .debug_struct("Template")
                .field("path", path)
                .field("source_id", source_id)
                .finish(),
            FetchPath::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Byte range of the first `{...}` placeholder
fn placeholder(path: &str) -> Option<(usize, usize)> {
    let start = path.find('{')?;
    let end = path[start..].find('}')? + start + 1;
    Some((start, end))
}
