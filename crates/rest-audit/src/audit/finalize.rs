//! After-response phase: classify the request, build its record and emit it

use axum::http::{Method, StatusCode};
use serde_json::Value as JsonValue;
use tracing::debug;

use super::{
    context::{BodySnapshot, RequestContext},
    endpoint::Endpoint,
    engine::{is_update, param_id, snapshot_id, AuditEngine},
    fetcher::Fetcher,
    models::{ActionRecord, AuditRecord, MutationAction, MutationRecord, RecordHeader},
    routes::{ExtContext, RouteAudit, RouteOptions},
};
use crate::error::{AuditError, AuditResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeState {
    /// Policy, status or an injected read ruled the request out
    Suppressed,
    Emitted,
    /// Reported on the error channel
    BuildFailed,
}

impl AuditEngine {
    pub async fn finalize(
        &self,
        fetcher: &dyn Fetcher,
        ctx: &RequestContext,
        route: &RouteAudit,
        status: StatusCode,
        response: &BodySnapshot,
    ) -> FinalizeState {
        if ctx.injected || !status.is_success() || !self.settings.should_finalize(route, ctx) {
            return FinalizeState::Suppressed;
        }
        let options = route.options().cloned().unwrap_or_default();
        let endpoint = Endpoint::of(ctx);

        let record = match self.build_record(fetcher, ctx, &options, response).await {
            Ok(record) => record,
            Err(err) => {
                self.report(ctx, err);
                return FinalizeState::BuildFailed;
            },
        };

        let record = match (record, &self.settings.ext_all) {
            (Some(record), Some(ext_all)) => match ext_all(&record, ctx) {
                Ok(Some(replacement)) => Some(replacement),
                Ok(None) => Some(record),
                Err(err) => {
                    self.report(
                        ctx,
                        AuditError::Build(format!("Record hook failed on {}: {}", endpoint, err)),
                    );
                    return FinalizeState::BuildFailed;
                },
            },
            (record, _) => record,
        };

        if ctx.method == Method::GET && !self.settings.config.audit_get_requests {
            debug!(endpoint = %endpoint, "Read auditing disabled, record dropped");
            return FinalizeState::Suppressed;
        }

        match self.emitter.emit(record, &endpoint) {
            Ok(()) => FinalizeState::Emitted,
            Err(err) => {
                self.report(ctx, err);
                FinalizeState::BuildFailed
            },
        }
    }

    /// `Ok(None)` when the request maps to no record kind
    pub(crate) async fn build_record(
        &self,
        fetcher: &dyn Fetcher,
        ctx: &RequestContext,
        options: &RouteOptions,
        response: &BodySnapshot,
    ) -> AuditResult<Option<AuditRecord>> {
        let fetch_path = Endpoint::resolve(ctx, options.fetch_path.as_ref());
        let key = Endpoint::get(fetch_path.as_str()).to_string();

        if ctx.method == Method::GET {
            return self.build_read(ctx, options, response, &key).await.map(Some);
        }

        if options.is_action && matches!(ctx.method, Method::POST | Method::PUT | Method::DELETE) {
            return self.build_action(ctx, options).await.map(Some);
        }

        if is_update(ctx, options) {
            let result = self.build_update(fetcher, ctx, options, &fetch_path, &key).await;
            self.cache.delete(&key);
            return result.map(Some);
        }

        match MutationAction::from_method(&ctx.method) {
            Some(MutationAction::Delete) => {
                let result = self.build_delete(ctx, options, &key).await;
                self.cache.delete(&key);
                result.map(Some)
            },
            Some(MutationAction::Create) => self.build_create(ctx, options, response).await.map(Some),
            _ => Ok(None),
        }
    }

    async fn build_read(
        &self,
        ctx: &RequestContext,
        options: &RouteOptions,
        response: &BodySnapshot,
        key: &str,
    ) -> AuditResult<AuditRecord> {
        let entity_id = param_id(ctx, options);

        if entity_id.is_some() && self.settings.cache_enabled() {
            if let Some(body) = response.json() {
                self.cache.set(key, body.clone());
                debug!(key, "Primed prior-state cache");
            }
        }

        let entity = (self.settings.get_entity)(ctx)?;
        let mut record: AuditRecord = ActionRecord::new(
            self.header(ctx),
            entity,
            entity_id.unwrap_or(JsonValue::Null),
            ctx.query_value(),
        )?
        .into();

        self.run_ext(&mut record, ctx, options, self.ext_context(ctx)).await?;
        Ok(record)
    }

    async fn build_action(&self, ctx: &RequestContext, options: &RouteOptions) -> AuditResult<AuditRecord> {
        if !ctx.payload.is_readable() {
            return Err(AuditError::Build(format!(
                "Cannot read streamed payload on {}",
                Endpoint::of(ctx)
            )));
        }

        let payload = ctx.payload.json().cloned();
        let entity = (self.settings.get_entity)(ctx)?;
        let entity_id = param_id(ctx, options)
            .or_else(|| snapshot_id(payload.as_ref()))
            .unwrap_or(JsonValue::Null);

        let mut record: AuditRecord = ActionRecord::new(
            self.header(ctx),
            entity,
            entity_id,
            ctx.payload.to_value(),
        )?
        .into();

        let mut ext_ctx = self.ext_context(ctx);
        ext_ctx.payload = payload;
        self.run_ext(&mut record, ctx, options, ext_ctx).await?;
        Ok(record)
    }

    async fn build_update(
        &self,
        fetcher: &dyn Fetcher,
        ctx: &RequestContext,
        options: &RouteOptions,
        fetch_path: &str,
        key: &str,
    ) -> AuditResult<AuditRecord> {
        let old_values = self.cache.get(key);
        let mut new_values = ctx.payload.json().cloned();

        if new_values.is_none() || options.fetch_new_values {
            new_values = match self.fetch_snapshot(fetcher, ctx, fetch_path, "after").await {
                Ok(snapshot) => Some(snapshot),
                Err(err) => {
                    self.report(ctx, err);
                    None
                },
            };
        }

        let entity = (self.settings.get_entity)(ctx)?;
        let entity_id = param_id(ctx, options)
            .or_else(|| snapshot_id(new_values.as_ref()))
            .unwrap_or(JsonValue::Null);
        let (original, new) = (self.settings.diff)(old_values.clone(), new_values.clone());

        let mut record: AuditRecord = MutationRecord::new(
            self.header(ctx),
            MutationAction::Update,
            entity,
            entity_id,
            original.unwrap_or(JsonValue::Null),
            new.unwrap_or(JsonValue::Null),
        )?
        .into();

        let mut ext_ctx = self.ext_context(ctx);
        ext_ctx.old_values = old_values;
        ext_ctx.new_values = new_values;
        self.run_ext(&mut record, ctx, options, ext_ctx).await?;
        Ok(record)
    }

    async fn build_delete(
        &self,
        ctx: &RequestContext,
        options: &RouteOptions,
        key: &str,
    ) -> AuditResult<AuditRecord> {
        let old_values = self.cache.get(key);

        let entity = (self.settings.get_entity)(ctx)?;
        let entity_id = param_id(ctx, options)
            .or_else(|| snapshot_id(old_values.as_ref()))
            .unwrap_or(JsonValue::Null);

        let mut record: AuditRecord = MutationRecord::new(
            self.header(ctx),
            MutationAction::Delete,
            entity,
            entity_id,
            old_values.clone().unwrap_or(JsonValue::Null),
            JsonValue::Null,
        )?
        .into();

        let mut ext_ctx = self.ext_context(ctx);
        ext_ctx.old_values = old_values;
        self.run_ext(&mut record, ctx, options, ext_ctx).await?;
        Ok(record)
    }

    async fn build_create(
        &self,
        ctx: &RequestContext,
        options: &RouteOptions,
        response: &BodySnapshot,
    ) -> AuditResult<AuditRecord> {
        let data = match (response.object(), ctx.payload.json()) {
            (Some(body), _) => body.clone(),
            (None, Some(payload)) => payload.clone(),
            (None, None) if !response.is_readable() => {
                return Err(AuditError::Build(format!(
                    "Cannot read streamed response on {}",
                    Endpoint::of(ctx)
                )));
            },
            (None, None) => JsonValue::Null,
        };

        let entity = (self.settings.get_entity)(ctx)?;
        let entity_id = snapshot_id(Some(&data)).unwrap_or(JsonValue::Null);

        let mut record: AuditRecord = MutationRecord::new(
            self.header(ctx),
            MutationAction::Create,
            entity,
            entity_id,
            JsonValue::Null,
            data.clone(),
        )?
        .into();

        let mut ext_ctx = self.ext_context(ctx);
        ext_ctx.payload = ctx.payload.json().cloned();
        ext_ctx.new_values = Some(data);
        self.run_ext(&mut record, ctx, options, ext_ctx).await?;
        Ok(record)
    }

    fn header(&self, ctx: &RequestContext) -> RecordHeader {
        RecordHeader {
            application: self.settings.config.client_id.clone(),
            username: ctx.username.clone(),
            timestamp: self.clock.now(),
        }
    }

    fn ext_context(&self, ctx: &RequestContext) -> ExtContext {
        ExtContext::new(
            ctx.headers.clone(),
            ctx.query.clone(),
            ctx.params.clone(),
            self.settings.diff.clone(),
        )
    }

    async fn run_ext(
        &self,
        record: &mut AuditRecord,
        ctx: &RequestContext,
        options: &RouteOptions,
        ext_ctx: ExtContext,
    ) -> AuditResult<()> {
        let Some(ext) = &options.ext else {
            return Ok(());
        };

        match ext(ext_ctx).await {
            Ok(Some(overrides)) => record.apply(overrides),
            Ok(None) => Ok(()),
            Err(err) => Err(AuditError::Build(format!(
                "Route extension failed on {}: {}",
                Endpoint::of(ctx),
                err
            ))),
        }
    }
}
