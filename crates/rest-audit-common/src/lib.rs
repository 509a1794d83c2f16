//! rest-audit common library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Ambient pieces shared by the rest-audit workspace members. Today that is
//! the tracing subscriber setup used by the demo server and by integrators
//! embedding the audit layer.
//!
//! # Example
//!
//! ```no_run
//! use rest_audit_common::logging::{init_logging, LogConfig};
//!
//! # fn main() -> anyhow::Result<()> {
//! let _guard = init_logging(&LogConfig::from_env()?)?;
//! # Ok(())
//! # }
//! ```

pub mod logging;

pub use logging::{init_logging, LogConfig};
