//! Audit record models
//!
//! Two record shapes leave the pipeline:
//!
//! - [`ActionRecord`] for reads and operations marked as custom actions
//! - [`MutationRecord`] for create, update and delete
//!
//! Both serialize to the camelCase wire form consumers expect
//! (`entityId`, `originalValues`, `type`, ...).

use axum::http::Method;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{AuditError, AuditResult};

/// Default `type` and `action` of an Action record
pub const SEARCH: &str = "SEARCH";

/// `type` of every Mutation record
pub const MUTATION: &str = "MUTATION";

/// Outcome of the audited operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Outcome {
    #[default]
    Success,
    Fail,
}

/// Mutation kinds derived from the HTTP verb
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MutationAction {
    Create,
    Update,
    Delete,
}

impl MutationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }

    pub fn from_method(method: &Method) -> Option<Self> {
        match *method {
            Method::POST => Some(Self::Create),
            Method::PUT => Some(Self::Update),
            Method::DELETE => Some(Self::Delete),
            _ => None,
        }
    }
}

impl std::fmt::Display for MutationAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fields shared by both record kinds, fixed before the body is assembled
#[derive(Debug, Clone)]
pub struct RecordHeader {
    pub application: String,
    pub username: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionBody {
    pub entity: String,
    pub entity_id: JsonValue,
    pub action: String,
    pub username: Option<String>,
    pub data: JsonValue,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub application: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub body: ActionBody,
    pub outcome: Outcome,
}

impl ActionRecord {
    pub fn new(
        header: RecordHeader,
        entity: String,
        entity_id: JsonValue,
        data: JsonValue,
    ) -> AuditResult<Self> {
        require_entity(&entity)?;

        Ok(Self {
            application: header.application,
            kind: SEARCH.to_string(),
            body: ActionBody {
                entity,
                entity_id,
                action: SEARCH.to_string(),
                username: header.username,
                data,
                timestamp: header.timestamp,
            },
            outcome: Outcome::Success,
        })
    }

    /// Merge a route extension's overrides field by field
    pub fn apply(&mut self, overrides: RecordOverride) -> AuditResult<()> {
        if let Some(entity) = overrides.entity {
            require_entity(&entity)?;
            self.body.entity = entity;
        }
        if let Some(kind) = overrides.kind {
            self.kind = kind;
        }
        if let Some(entity_id) = overrides.entity_id {
            self.body.entity_id = entity_id;
        }
        if let Some(action) = overrides.action {
            self.body.action = action.to_uppercase();
        }
        if let Some(username) = overrides.username {
            self.body.username = Some(username);
        }
        if let Some(data) = overrides.data {
            self.body.data = data;
        }
        if let Some(outcome) = overrides.outcome {
            self.outcome = outcome;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationBody {
    pub entity: String,
    pub entity_id: JsonValue,
    pub action: String,
    pub username: Option<String>,
    pub original_values: JsonValue,
    pub new_values: JsonValue,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationRecord {
    pub application: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub body: MutationBody,
    pub outcome: Outcome,
}

impl MutationRecord {
    pub fn new(
        header: RecordHeader,
        action: MutationAction,
        entity: String,
        entity_id: JsonValue,
        original_values: JsonValue,
        new_values: JsonValue,
    ) -> AuditResult<Self> {
        require_entity(&entity)?;

        Ok(Self {
            application: header.application,
            kind: MUTATION.to_string(),
            body: MutationBody {
                entity,
                entity_id,
                action: action.as_str().to_string(),
                username: header.username,
                original_values,
                new_values,
                timestamp: header.timestamp,
            },
            outcome: Outcome::Success,
        })
    }

    pub fn apply(&mut self, overrides: RecordOverride) -> AuditResult<()> {
        if let Some(entity) = overrides.entity {
            require_entity(&entity)?;
            self.body.entity = entity;
        }
        if let Some(kind) = overrides.kind {
            self.kind = kind;
        }
        if let Some(entity_id) = overrides.entity_id {
            self.body.entity_id = entity_id;
        }
        if let Some(action) = overrides.action {
            self.body.action = action.to_uppercase();
        }
        if let Some(username) = overrides.username {
            self.body.username = Some(username);
        }
        if let Some(original_values) = overrides.original_values {
            self.body.original_values = original_values;
        }
        if let Some(new_values) = overrides.new_values {
            self.body.new_values = new_values;
        }
        if let Some(outcome) = overrides.outcome {
            self.outcome = outcome;
        }
        Ok(())
    }
}

/// A finished audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AuditRecord {
    // Mutation first: its body requires originalValues/newValues, so
    // untagged deserialization falls through to Action for read records.
    Mutation(MutationRecord),
    Action(ActionRecord),
}

impl AuditRecord {
    pub fn kind(&self) -> &str {
        match self {
            AuditRecord::Action(record) => &record.kind,
            AuditRecord::Mutation(record) => &record.kind,
        }
    }

    pub fn entity(&self) -> &str {
        match self {
            AuditRecord::Action(record) => &record.body.entity,
            AuditRecord::Mutation(record) => &record.body.entity,
        }
    }

    pub fn action(&self) -> &str {
        match self {
            AuditRecord::Action(record) => &record.body.action,
            AuditRecord::Mutation(record) => &record.body.action,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            AuditRecord::Action(record) => record.body.timestamp,
            AuditRecord::Mutation(record) => record.body.timestamp,
        }
    }

    pub fn apply(&mut self, overrides: RecordOverride) -> AuditResult<()> {
        match self {
            AuditRecord::Action(record) => record.apply(overrides),
            AuditRecord::Mutation(record) => record.apply(overrides),
        }
    }

    pub fn as_mutation(&self) -> Option<&MutationRecord> {
        match self {
            AuditRecord::Mutation(record) => Some(record),
            AuditRecord::Action(_) => None,
        }
    }

    pub fn as_action(&self) -> Option<&ActionRecord> {
        match self {
            AuditRecord::Action(record) => Some(record),
            AuditRecord::Mutation(_) => None,
        }
    }
}

impl From<ActionRecord> for AuditRecord {
    fn from(record: ActionRecord) -> Self {
        AuditRecord::Action(record)
    }
}

impl From<MutationRecord> for AuditRecord {
    fn from(record: MutationRecord) -> Self {
        AuditRecord::Mutation(record)
    }
}

/// What a sink receives: the record plus the `verb:path` it was built for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub audit_log: AuditRecord,
    pub endpoint: String,
}

/// Field overrides returned by a route extension
///
/// `None` keeps the value the pipeline computed. For the nullable JSON
/// fields, `Some(JsonValue::Null)` clears the value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordOverride {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub entity: Option<String>,
    pub entity_id: Option<JsonValue>,
    pub action: Option<String>,
    pub username: Option<String>,
    pub data: Option<JsonValue>,
    pub original_values: Option<JsonValue>,
    pub new_values: Option<JsonValue>,
    pub outcome: Option<Outcome>,
}

impl RecordOverride {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn entity(mut self, entity: impl Into<String>) -> Self {
        self.entity = Some(entity.into());
        self
    }

    pub fn entity_id(mut self, entity_id: impl Into<JsonValue>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn data(mut self, data: JsonValue) -> Self {
        self.data = Some(data);
        self
    }

    pub fn original_values(mut self, values: Option<JsonValue>) -> Self {
        self.original_values = Some(values.unwrap_or(JsonValue::Null));
        self
    }

    pub fn new_values(mut self, values: Option<JsonValue>) -> Self {
        self.new_values = Some(values.unwrap_or(JsonValue::Null));
        self
    }

    pub fn outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = Some(outcome);
        self
    }
}

fn require_entity(entity: &str) -> AuditResult<()> {
    if entity.trim().is_empty() {
        return Err(AuditError::Build("Audit record entity cannot be empty".to_string()));
    }
    Ok(())
}
