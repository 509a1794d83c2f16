//! Configuration management

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AuditError, AuditResult};

// ============================================================================
// Server Configuration Constants
// ============================================================================

/// Default server host binding.
pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";

/// Default server port.
pub const DEFAULT_SERVER_PORT: u16 = 8000;

/// Default shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Default CORS allowed origin for local development.
pub const DEFAULT_CORS_ALLOWED_ORIGIN: &str = "http://localhost:3000";

// ============================================================================
// Audit Configuration Constants
// ============================================================================

/// Application name stamped on every record.
pub const DEFAULT_CLIENT_ID: &str = "my-app";

/// How often the prior-state cache is swept (15 minutes).
pub const DEFAULT_CACHE_SWEEP_INTERVAL_MS: u64 = 900_000;

/// Lower bound for the sweep interval (5 minutes).
pub const MIN_CACHE_SWEEP_INTERVAL_MS: u64 = 300_000;

/// Oldest a cached snapshot may be before it is ignored and swept (5 minutes).
pub const DEFAULT_CACHE_MAX_AGE_MS: u64 = 300_000;

/// Upper bound for one synthetic read.
pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 10_000;

/// Bodies larger than this (or of unknown length) are treated as streams.
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

/// Server configuration for the demo binary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub cors: CorsConfig,
    pub audit: AuditConfig,
}

/// Server-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout_secs: u64,
}

/// CORS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allow_credentials: bool,
}

/// Global audit options that can be expressed as plain values
///
/// Closure-valued options (entity extraction, audit predicate, diff function,
/// record augmentation, sink) are set on [`crate::audit::AuditLayerBuilder`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Master switch; when false the layer is a pass-through
    pub enabled: bool,
    pub client_id: String,
    /// Emit Action records for GET requests
    pub audit_get_requests: bool,
    /// Log error-channel notifications through `tracing::error!`
    pub show_errors: bool,
    /// Skip cache lookups and GET priming; capture always re-reads
    pub disable_cache: bool,
    pub cache_sweep_interval_ms: u64,
    pub cache_max_age_ms: u64,
    /// Only audit requests with a resolvable username
    pub auth_only: bool,
    /// Header carrying the acting identity when no `AuthenticatedUser` extension is present
    pub username_header: Option<String>,
    pub fetch_timeout_ms: u64,
    pub max_body_bytes: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            client_id: DEFAULT_CLIENT_ID.to_string(),
            audit_get_requests: true,
            show_errors: true,
            disable_cache: false,
            cache_sweep_interval_ms: DEFAULT_CACHE_SWEEP_INTERVAL_MS,
            cache_max_age_ms: DEFAULT_CACHE_MAX_AGE_MS,
            auth_only: false,
            username_header: None,
            fetch_timeout_ms: DEFAULT_FETCH_TIMEOUT_MS,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl AuditConfig {
    /// Read `AUDIT_*` variables, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            enabled: env_parse("AUDIT_ENABLED", defaults.enabled),
            client_id: std::env::var("AUDIT_CLIENT_ID").unwrap_or(defaults.client_id),
            audit_get_requests: env_parse("AUDIT_GET_REQUESTS", defaults.audit_get_requests),
            show_errors: env_parse("AUDIT_SHOW_ERRORS", defaults.show_errors),
            disable_cache: env_parse("AUDIT_DISABLE_CACHE", defaults.disable_cache),
            cache_sweep_interval_ms: env_parse(
                "AUDIT_CACHE_SWEEP_INTERVAL_MS",
                defaults.cache_sweep_interval_ms,
            ),
            cache_max_age_ms: env_parse("AUDIT_CACHE_MAX_AGE_MS", defaults.cache_max_age_ms),
            auth_only: env_parse("AUDIT_AUTH_ONLY", defaults.auth_only),
            username_header: std::env::var("AUDIT_USERNAME_HEADER")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            fetch_timeout_ms: env_parse("AUDIT_FETCH_TIMEOUT_MS", defaults.fetch_timeout_ms),
            max_body_bytes: env_parse("AUDIT_MAX_BODY_BYTES", defaults.max_body_bytes),
        }
    }

    pub fn validate(&self) -> AuditResult<()> {
        if self.client_id.trim().is_empty() {
            return Err(AuditError::Configuration("client_id cannot be empty".to_string()));
        }

        if self.cache_sweep_interval_ms < MIN_CACHE_SWEEP_INTERVAL_MS {
            return Err(AuditError::Configuration(format!(
                "cache_sweep_interval_ms must be at least {} (got {})",
                MIN_CACHE_SWEEP_INTERVAL_MS, self.cache_sweep_interval_ms
            )));
        }

        if self.cache_max_age_ms == 0 || self.cache_max_age_ms > self.cache_sweep_interval_ms {
            return Err(AuditError::Configuration(format!(
                "cache_max_age_ms must be between 1 and cache_sweep_interval_ms ({}), got {}",
                self.cache_sweep_interval_ms, self.cache_max_age_ms
            )));
        }

        if self.fetch_timeout_ms == 0 {
            return Err(AuditError::Configuration(
                "fetch_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if let Some(header) = &self.username_header {
            if http::HeaderName::from_str(header).is_err() {
                return Err(AuditError::Configuration(format!(
                    "username_header '{}' is not a valid header name",
                    header
                )));
            }
        }

        Ok(())
    }

    pub fn cache_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.cache_sweep_interval_ms)
    }

    pub fn cache_max_age(&self) -> Duration {
        Duration::from_millis(self.cache_max_age_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config {
            server: ServerConfig {
                host: std::env::var("AUDIT_HOST")
                    .unwrap_or_else(|_| DEFAULT_SERVER_HOST.to_string()),
                port: env_parse("AUDIT_PORT", DEFAULT_SERVER_PORT),
                shutdown_timeout_secs: env_parse(
                    "AUDIT_SHUTDOWN_TIMEOUT",
                    DEFAULT_SHUTDOWN_TIMEOUT_SECS,
                ),
            },
            cors: CorsConfig {
                allowed_origins: std::env::var("CORS_ALLOWED_ORIGINS")
                    .unwrap_or_else(|_| DEFAULT_CORS_ALLOWED_ORIGIN.to_string())
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                allow_credentials: env_parse("CORS_ALLOW_CREDENTIALS", true),
            },
            audit: AuditConfig::from_env(),
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port must be greater than 0");
        }

        if self.cors.allowed_origins.is_empty() {
            tracing::warn!("No CORS origins configured - all origins will be allowed");
        }

        self.audit.validate()?;

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: DEFAULT_SERVER_HOST.to_string(),
                port: DEFAULT_SERVER_PORT,
                shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            },
            cors: CorsConfig {
                allowed_origins: vec![DEFAULT_CORS_ALLOWED_ORIGIN.to_string()],
                allow_credentials: true,
            },
            audit: AuditConfig::default(),
        }
    }
}

fn env_parse<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}
