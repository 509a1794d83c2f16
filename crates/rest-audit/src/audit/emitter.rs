//! Delivery of finished records and of pipeline failures
//!
//! Records go to exactly one [`AuditSink`]. Failures go to the error channel,
//! an [`ErrorHandler`] that by default logs through `tracing`.

use std::{fmt, sync::Arc};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info};

use super::{
    context::RequestContext,
    endpoint::Endpoint,
    models::{AuditEvent, AuditRecord},
};
use crate::error::{AuditError, AuditResult};

/// Consumer of audit events
///
/// Delivery is synchronous and never retried. The trait is object-safe for
/// use behind `Arc<dyn AuditSink>`.
pub trait AuditSink: Send + Sync {
    fn deliver(&self, event: AuditEvent) -> AuditResult<()>;
}

/// Logs every event as structured JSON
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn deliver(&self, event: AuditEvent) -> AuditResult<()> {
        let record = serde_json::to_string(&event.audit_log)
            .map_err(|err| AuditError::Build(format!("Could not serialize audit record: {}", err)))?;

        info!(
            endpoint = %event.endpoint,
            kind = %event.audit_log.kind(),
            entity = %event.audit_log.entity(),
            action = %event.audit_log.action(),
            record = %record,
            "Audit record emitted"
        );
        Ok(())
    }
}

/// Hands events to an async consumer over an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: UnboundedSender<AuditEvent>,
}

impl ChannelSink {
    pub fn new(tx: UnboundedSender<AuditEvent>) -> Self {
        Self { tx }
    }
}

impl AuditSink for ChannelSink {
    fn deliver(&self, event: AuditEvent) -> AuditResult<()> {
        let endpoint = event.endpoint.clone();
        self.tx.send(event).map_err(|_| {
            AuditError::Build(format!("Audit channel closed, dropped record for {}", endpoint))
        })
    }
}

/// Calls a closure for every event
pub struct FnSink<F>(pub F);

impl<F> AuditSink for FnSink<F>
where
    F: Fn(AuditEvent) + Send + Sync,
{
    fn deliver(&self, event: AuditEvent) -> AuditResult<()> {
        (self.0)(event);
        Ok(())
    }
}

impl<F> fmt::Debug for FnSink<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnSink(..)")
    }
}

#[derive(Clone)]
pub struct EventEmitter {
    sink: Arc<dyn AuditSink>,
}

impl EventEmitter {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    /// Deliver `record`; nothing to deliver is an error
    pub fn emit(&self, record: Option<AuditRecord>, endpoint: &Endpoint) -> AuditResult<()> {
        let record = record.ok_or_else(|| {
            AuditError::Build(format!("Null audit record for endpoint: {}", endpoint))
        })?;

        debug!(endpoint = %endpoint, kind = %record.kind(), "Delivering audit record");

        self.sink.deliver(AuditEvent {
            audit_log: record,
            endpoint: endpoint.to_string(),
        })
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(Arc::new(TracingSink))
    }
}

impl fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEmitter").finish_non_exhaustive()
    }
}

/// Error channel: receives every capture and build failure with its request
pub type ErrorHandler = Arc<dyn Fn(&RequestContext, &AuditError) + Send + Sync>;

pub fn default_error_handler(show_errors: bool) -> ErrorHandler {
    Arc::new(move |ctx: &RequestContext, err: &AuditError| {
        if show_errors {
            error!(
                method = %ctx.method,
                path = %ctx.path,
                kind = err.kind(),
                error = %err.message(),
                "Audit pipeline error"
            );
        } else {
            debug!(method = %ctx.method, path = %ctx.path, error = %err, "Audit pipeline error");
        }
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::audit::models::{ActionRecord, RecordHeader};
    use chrono::Utc;
    use serde_json::json;
    use std::sync::Mutex;

    fn record() -> AuditRecord {
        let header = RecordHeader {
            application: "my-app".to_string(),
            username: None,
            timestamp: Utc::now(),
        };
        ActionRecord::new(header, "test".into(), json!(null), json!({})).unwrap().into()
    }

    #[test]
    fn test_emit_none_is_build_error() {
        let emitter = EventEmitter::default();
        let err = emitter
            .emit(None, &Endpoint::new(axum::http::Method::PATCH, "/api/test/5"))
            .unwrap_err();
        assert_eq!(
            err,
            AuditError::Build("Null audit record for endpoint: patch:/api/test/5".to_string())
        );
    }

    #[test]
    fn test_fn_sink_receives_event() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let captured = seen.clone();
        let emitter = EventEmitter::new(Arc::new(FnSink(move |event: AuditEvent| {
            captured.lock().unwrap().push(event);
        })));

        emitter.emit(Some(record()), &Endpoint::get("/api/test")).unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].endpoint, "get:/api/test");
    }

    #[tokio::test]
    async fn test_channel_sink() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let emitter = EventEmitter::new(Arc::new(ChannelSink::new(tx)));

        emitter.emit(Some(record()), &Endpoint::get("/api/test")).unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.audit_log.entity(), "test");

        drop(rx);
        assert!(emitter.emit(Some(record()), &Endpoint::get("/api/test")).is_err());
    }

    #[test]
    fn test_tracing_sink_accepts_records() {
        assert!(TracingSink.deliver(AuditEvent {
            audit_log: record(),
            endpoint: "get:/api/test".to_string(),
        })
        .is_ok());
    }
}
