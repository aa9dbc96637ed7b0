use std::fmt;

use chrono::{SecondsFormat, Utc};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use thiserror::Error;
use ulid::Ulid;

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("event id is empty")]
    EmptyId,
    #[error("{kind} payload is malformed: {source}")]
    Shape {
        kind: EventKind,
        #[source]
        source: serde_json::Error,
    },
}

/// The closed set of event kinds the projection understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    IntentDeclared,
    AiResponseReceived,
    HypothesisAccepted,
    HypothesisRejected,
    BranchCreated,
    FileCreated,
    FileModified,
    ChangeReverted,
    CommitCreated,
    TaskStateChanged,
    BranchAbandoned,
}

impl EventKind {
    pub const ALL: [EventKind; 11] = [
        EventKind::IntentDeclared,
        EventKind::AiResponseReceived,
        EventKind::HypothesisAccepted,
        EventKind::HypothesisRejected,
        EventKind::BranchCreated,
        EventKind::FileCreated,
        EventKind::FileModified,
        EventKind::ChangeReverted,
        EventKind::CommitCreated,
        EventKind::TaskStateChanged,
        EventKind::BranchAbandoned,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::IntentDeclared => "INTENT_DECLARED",
            EventKind::AiResponseReceived => "AI_RESPONSE_RECEIVED",
            EventKind::HypothesisAccepted => "HYPOTHESIS_ACCEPTED",
            EventKind::HypothesisRejected => "HYPOTHESIS_REJECTED",
            EventKind::BranchCreated => "BRANCH_CREATED",
            EventKind::FileCreated => "FILE_CREATED",
            EventKind::FileModified => "FILE_MODIFIED",
            EventKind::ChangeReverted => "CHANGE_REVERTED",
            EventKind::CommitCreated => "COMMIT_CREATED",
            EventKind::TaskStateChanged => "TASK_STATE_CHANGED",
            EventKind::BranchAbandoned => "BRANCH_ABANDONED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let wanted = value.trim().to_ascii_uppercase();
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == wanted)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    Human,
    Ai,
    #[default]
    System,
}

impl Actor {
    pub fn as_str(self) -> &'static str {
        match self {
            Actor::Human => "human",
            Actor::Ai => "ai",
            Actor::System => "system",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "human" => Some(Self::Human),
            "ai" => Some(Self::Ai),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct EventContext {
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub git_branch: Option<String>,
    #[serde(default)]
    pub git_commit: Option<String>,
}

impl EventContext {
    pub fn for_project(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            git_branch: None,
            git_commit: None,
        }
    }

    pub fn on_branch(mut self, branch: impl Into<String>) -> Self {
        self.git_branch = Some(branch.into());
        self
    }

    pub fn at_commit(mut self, commit: impl Into<String>) -> Self {
        self.git_commit = Some(commit.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum IntentSource {
    Canvas,
    Cursor,
    #[default]
    Manual,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Active,
    Frozen,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntentDeclared {
    pub intent_id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub source: IntentSource,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AiResponseReceived {
    pub ai_session_id: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_intent: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HypothesisAccepted {
    pub ai_session_id: String,
    #[serde(default)]
    pub excerpt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HypothesisRejected {
    pub ai_session_id: String,
    #[serde(default)]
    pub excerpt: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BranchCreated {
    pub branch: String,
    #[serde(default)]
    pub from: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_intent: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileCreated {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_ai_session: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DiffStats {
    #[serde(default)]
    pub added: u32,
    #[serde(default)]
    pub removed: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileModified {
    pub path: String,
    #[serde(default)]
    pub diff_stats: DiffStats,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChangeReverted {
    pub path: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommitCreated {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub linked_intents: Vec<String>,
    #[serde(default)]
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskStateChanged {
    pub intent_id: String,
    pub from: TaskState,
    pub to: TaskState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BranchAbandoned {
    pub branch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Kind-specific payload. Records whose kind is outside the closed set are
/// carried as `Unknown` so they survive a read/append round trip untouched.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    IntentDeclared(IntentDeclared),
    AiResponseReceived(AiResponseReceived),
    HypothesisAccepted(HypothesisAccepted),
    HypothesisRejected(HypothesisRejected),
    BranchCreated(BranchCreated),
    FileCreated(FileCreated),
    FileModified(FileModified),
    ChangeReverted(ChangeReverted),
    CommitCreated(CommitCreated),
    TaskStateChanged(TaskStateChanged),
    BranchAbandoned(BranchAbandoned),
    Unknown { kind: String, payload: Value },
}

impl EventPayload {
    pub fn decode(kind: &str, payload: Value) -> Result<Self, PayloadError> {
        let Some(known) = EventKind::parse(kind) else {
            return Ok(EventPayload::Unknown {
                kind: kind.trim().to_string(),
                payload,
            });
        };
        let shape = |source: serde_json::Error| PayloadError::Shape {
            kind: known,
            source,
        };
        let decoded = match known {
            EventKind::IntentDeclared => {
                EventPayload::IntentDeclared(serde_json::from_value(payload).map_err(shape)?)
            }
            EventKind::AiResponseReceived => {
                EventPayload::AiResponseReceived(serde_json::from_value(payload).map_err(shape)?)
            }
            EventKind::HypothesisAccepted => {
                EventPayload::HypothesisAccepted(serde_json::from_value(payload).map_err(shape)?)
            }
            EventKind::HypothesisRejected => {
                EventPayload::HypothesisRejected(serde_json::from_value(payload).map_err(shape)?)
            }
            EventKind::BranchCreated => {
                EventPayload::BranchCreated(serde_json::from_value(payload).map_err(shape)?)
            }
            EventKind::FileCreated => {
                EventPayload::FileCreated(serde_json::from_value(payload).map_err(shape)?)
            }
            EventKind::FileModified => {
                EventPayload::FileModified(serde_json::from_value(payload).map_err(shape)?)
            }
            EventKind::ChangeReverted => {
                EventPayload::ChangeReverted(serde_json::from_value(payload).map_err(shape)?)
            }
            EventKind::CommitCreated => {
                EventPayload::CommitCreated(serde_json::from_value(payload).map_err(shape)?)
            }
            EventKind::TaskStateChanged => {
                EventPayload::TaskStateChanged(serde_json::from_value(payload).map_err(shape)?)
            }
            EventKind::BranchAbandoned => {
                EventPayload::BranchAbandoned(serde_json::from_value(payload).map_err(shape)?)
            }
        };
        Ok(decoded)
    }

    pub fn kind(&self) -> Option<EventKind> {
        match self {
            EventPayload::IntentDeclared(_) => Some(EventKind::IntentDeclared),
            EventPayload::AiResponseReceived(_) => Some(EventKind::AiResponseReceived),
            EventPayload::HypothesisAccepted(_) => Some(EventKind::HypothesisAccepted),
            EventPayload::HypothesisRejected(_) => Some(EventKind::HypothesisRejected),
            EventPayload::BranchCreated(_) => Some(EventKind::BranchCreated),
            EventPayload::FileCreated(_) => Some(EventKind::FileCreated),
            EventPayload::FileModified(_) => Some(EventKind::FileModified),
            EventPayload::ChangeReverted(_) => Some(EventKind::ChangeReverted),
            EventPayload::CommitCreated(_) => Some(EventKind::CommitCreated),
            EventPayload::TaskStateChanged(_) => Some(EventKind::TaskStateChanged),
            EventPayload::BranchAbandoned(_) => Some(EventKind::BranchAbandoned),
            EventPayload::Unknown { .. } => None,
        }
    }

    pub fn kind_name(&self) -> &str {
        match self {
            EventPayload::Unknown { kind, .. } => kind,
            other => other.kind().map(EventKind::as_str).unwrap_or_default(),
        }
    }

    /// Raw JSON form, used when publishing to the remote API.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

impl Serialize for EventPayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            EventPayload::IntentDeclared(p) => p.serialize(serializer),
            EventPayload::AiResponseReceived(p) => p.serialize(serializer),
            EventPayload::HypothesisAccepted(p) => p.serialize(serializer),
            EventPayload::HypothesisRejected(p) => p.serialize(serializer),
            EventPayload::BranchCreated(p) => p.serialize(serializer),
            EventPayload::FileCreated(p) => p.serialize(serializer),
            EventPayload::FileModified(p) => p.serialize(serializer),
            EventPayload::ChangeReverted(p) => p.serialize(serializer),
            EventPayload::CommitCreated(p) => p.serialize(serializer),
            EventPayload::TaskStateChanged(p) => p.serialize(serializer),
            EventPayload::BranchAbandoned(p) => p.serialize(serializer),
            EventPayload::Unknown { payload, .. } => payload.serialize(serializer),
        }
    }
}

/// One immutable fact in the session log.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "EventRecord")]
pub struct ThoughtEvent {
    pub id: String,
    pub timestamp: String,
    pub actor: Actor,
    pub context: EventContext,
    pub payload: EventPayload,
}

#[derive(Deserialize)]
struct EventRecord {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    timestamp: String,
    actor: Actor,
    #[serde(default)]
    context: EventContext,
    #[serde(default = "empty_object")]
    payload: Value,
}

impl TryFrom<EventRecord> for ThoughtEvent {
    type Error = PayloadError;

    fn try_from(record: EventRecord) -> Result<Self, Self::Error> {
        let id = record.id.trim().to_string();
        if id.is_empty() {
            return Err(PayloadError::EmptyId);
        }
        Ok(ThoughtEvent {
            id,
            timestamp: record.timestamp,
            actor: record.actor,
            context: record.context,
            payload: EventPayload::decode(&record.kind, record.payload)?,
        })
    }
}

impl Serialize for ThoughtEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut record = serializer.serialize_struct("ThoughtEvent", 6)?;
        record.serialize_field("id", &self.id)?;
        record.serialize_field("type", self.kind_name())?;
        record.serialize_field("timestamp", &self.timestamp)?;
        record.serialize_field("actor", &self.actor)?;
        record.serialize_field("context", &self.context)?;
        record.serialize_field("payload", &self.payload)?;
        record.end()
    }
}

impl ThoughtEvent {
    /// New event with a fresh id and the current time.
    pub fn new(actor: Actor, context: EventContext, payload: EventPayload) -> Self {
        Self {
            id: new_event_id(),
            timestamp: now_rfc3339(),
            actor,
            context,
            payload,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = timestamp.into();
        self
    }

    pub fn kind(&self) -> Option<EventKind> {
        self.payload.kind()
    }

    pub fn kind_name(&self) -> &str {
        self.payload.kind_name()
    }

    /// True when the payload references `intent_id` through `intent_id`,
    /// `linked_intent` or any entry of `linked_intents`.
    pub fn links_intent(&self, intent_id: &str) -> bool {
        match &self.payload {
            EventPayload::IntentDeclared(p) => p.intent_id == intent_id,
            EventPayload::TaskStateChanged(p) => p.intent_id == intent_id,
            EventPayload::AiResponseReceived(p) => p.linked_intent.as_deref() == Some(intent_id),
            EventPayload::BranchCreated(p) => p.linked_intent.as_deref() == Some(intent_id),
            EventPayload::CommitCreated(p) => p.linked_intents.iter().any(|id| id == intent_id),
            EventPayload::Unknown { payload, .. } => raw_links_intent(payload, intent_id),
            _ => false,
        }
    }
}

fn raw_links_intent(payload: &Value, intent_id: &str) -> bool {
    let Some(object) = payload.as_object() else {
        return false;
    };
    let matches = |key: &str| object.get(key).and_then(Value::as_str) == Some(intent_id);
    if matches("intent_id") || matches("linked_intent") {
        return true;
    }
    object
        .get("linked_intents")
        .and_then(Value::as_array)
        .map(|ids| ids.iter().any(|id| id.as_str() == Some(intent_id)))
        .unwrap_or(false)
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

pub fn new_event_id() -> String {
    format!("evt_{}", Ulid::new().to_string().to_lowercase())
}

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
