//! Audit layer re-export
//!
//! The implementation lives in `crate::audit::middleware`.
//!
//! ```no_run
//! use rest_audit::config::AuditConfig;
//! use rest_audit::middleware::audit::AuditLayer;
//!
//! # fn example() -> Result<(), rest_audit::error::AuditError> {
//! let audit_layer = AuditLayer::new(AuditConfig::default())?;
//! # Ok(())
//! # }
//! ```

pub use crate::audit::{AuditLayer, AuditMiddleware};
