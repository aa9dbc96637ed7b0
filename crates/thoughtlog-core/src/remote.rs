//! Remote event records and their normalization to [`ThoughtEvent`].
//!
//! Remote producers are loose about field names and presence, so a remote
//! object is first decoded into [`RemoteEvent`], where every field is
//! optional, and then completed by [`Normalizer::normalize`]:
//!
//! | field     | rule                                                  |
//! |-----------|-------------------------------------------------------|
//! | id        | `id`, else `event_id`, else synthesized               |
//! | kind      | `type`, else `event_type`, else `UNKNOWN`             |
//! | timestamp | as given, else fetch time                             |
//! | actor     | parsed, else `system`                                 |
//! | context   | given fields, else empty project and no git info      |
//! | payload   | `payload`, else `data`, else `{}`                     |
//!
//! Blank strings count as missing.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;
use ulid::Ulid;

use crate::events::{Actor, EventContext, EventPayload, PayloadError, ThoughtEvent};

pub const UNKNOWN_KIND: &str = "UNKNOWN";

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("remote event {id}: {source}")]
    Payload {
        id: String,
        #[source]
        source: PayloadError,
    },
    #[error("remote event is not an object: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RemoteContext {
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub git_branch: Option<String>,
    #[serde(default)]
    pub git_commit: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RemoteEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub actor: Option<String>,
    #[serde(default)]
    pub context: Option<RemoteContext>,
    #[serde(default)]
    pub payload: Option<Value>,
    #[serde(default)]
    pub data: Option<Value>,
}

impl RemoteEvent {
    pub fn from_value(value: Value) -> Result<Self, NormalizeError> {
        Ok(serde_json::from_value(value)?)
    }

    /// The id the remote supplied, if any.
    pub fn given_id(&self) -> Option<&str> {
        non_blank(self.id.as_deref()).or_else(|| non_blank(self.event_id.as_deref()))
    }

    pub fn kind_name(&self) -> &str {
        non_blank(self.kind.as_deref())
            .or_else(|| non_blank(self.event_type.as_deref()))
            .unwrap_or(UNKNOWN_KIND)
    }

    fn raw_payload(&self) -> Value {
        [self.payload.as_ref(), self.data.as_ref()]
            .into_iter()
            .flatten()
            .find(|value| !value.is_null())
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()))
    }

    fn event_context(&self) -> EventContext {
        let Some(context) = &self.context else {
            return EventContext::default();
        };
        EventContext {
            project: context.project.clone().unwrap_or_default(),
            git_branch: non_blank(context.git_branch.as_deref()).map(str::to_string),
            git_commit: non_blank(context.git_commit.as_deref()).map(str::to_string),
        }
    }
}

/// How ids are synthesized for remote events that arrive without one.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RemoteIdPolicy {
    /// `evt_<kind>_<fetch-ms>_<random>`. Differs on every fetch, so an id-less
    /// remote event is appended again by each pull.
    #[default]
    Random,
    /// `evt_<sha256 prefix>` over kind, remote timestamp, payload and context.
    /// Stable across fetches.
    ContentHash,
}

#[derive(Debug, Clone)]
pub struct Normalizer {
    policy: RemoteIdPolicy,
    fetched_at: DateTime<Utc>,
}

impl Normalizer {
    pub fn new(policy: RemoteIdPolicy) -> Self {
        Self::at(policy, Utc::now())
    }

    pub fn at(policy: RemoteIdPolicy, fetched_at: DateTime<Utc>) -> Self {
        Self { policy, fetched_at }
    }

    pub fn policy(&self) -> RemoteIdPolicy {
        self.policy
    }

    pub fn normalize(&self, remote: RemoteEvent) -> Result<ThoughtEvent, NormalizeError> {
        let kind = remote.kind_name().to_string();
        let payload = remote.raw_payload();
        let context = remote.event_context();
        let id = match remote.given_id() {
            Some(id) => id.to_string(),
            None => self.synthesize_id(&remote, &kind, &payload, &context),
        };
        let timestamp = non_blank(remote.timestamp.as_deref())
            .map(str::to_string)
            .unwrap_or_else(|| self.fetched_at.to_rfc3339_opts(SecondsFormat::Millis, true));
        let actor = remote
            .actor
            .as_deref()
            .and_then(Actor::parse)
            .unwrap_or(Actor::System);
        let payload = EventPayload::decode(&kind, payload).map_err(|source| NormalizeError::Payload {
            id: id.clone(),
            source,
        })?;

        Ok(ThoughtEvent {
            id,
            timestamp,
            actor,
            context,
            payload,
        })
    }

    fn synthesize_id(
        &self,
        remote: &RemoteEvent,
        kind: &str,
        payload: &Value,
        context: &EventContext,
    ) -> String {
        match self.policy {
            RemoteIdPolicy::Random => {
                let random = Ulid::new().random() & 0xf_ffff_ffff;
                format!(
                    "evt_{}_{}_{:09x}",
                    kind.to_ascii_lowercase(),
                    self.fetched_at.timestamp_millis(),
                    random
                )
            }
            RemoteIdPolicy::ContentHash => {
                // The fetch-time default is left out so the id survives refetching.
                let timestamp = non_blank(remote.timestamp.as_deref()).unwrap_or_default();
                let mut hasher = Sha256::new();
                hasher.update(kind.as_bytes());
                hasher.update(b"|");
                hasher.update(timestamp.as_bytes());
                hasher.update(b"|");
                hasher.update(payload.to_string().as_bytes());
                hasher.update(b"|");
                hasher.update(serde_json::to_string(context).unwrap_or_default().as_bytes());
                let digest = hex::encode(hasher.finalize());
                format!("evt_{}", &digest[..16])
            }
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}
