//! Client side of the remote event API.
//!
//! Every response is wrapped in `{success, message, data}`; any of the three
//! may be missing and is then treated as `true`, empty and `null`.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use thoughtlog_core::events::ThoughtEvent;
use tracing::debug;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote unavailable: {0}")]
    Unavailable(String),
    #[error("remote returned HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("remote response could not be decoded: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            RemoteError::Decode(err.to_string())
        } else {
            RemoteError::Unavailable(err.to_string())
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

fn default_success() -> bool {
    true
}

/// Body of `POST /events`. Beyond `event_type` and `data`, the event id,
/// actor, context and timestamp travel along so a pushed event keeps its
/// identity when it is pulled back.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublishRequest {
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

impl PublishRequest {
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            id: None,
            timestamp: None,
            actor: None,
            context: None,
        }
    }

    pub fn from_event(event: &ThoughtEvent) -> Result<Self, serde_json::Error> {
        Ok(Self {
            event_type: event.kind_name().to_string(),
            data: event.payload.to_value()?,
            id: Some(event.id.clone()),
            timestamp: Some(event.timestamp.clone()),
            actor: Some(event.actor.as_str().to_string()),
            context: Some(serde_json::to_value(&event.context)?),
        })
    }
}

#[async_trait]
pub trait RemoteEventSource: Send + Sync {
    /// Raw event records, optionally restricted to one kind.
    async fn fetch_events(&self, kind: Option<&str>) -> Result<Vec<Value>, RemoteError>;
    async fn publish_event(&self, request: &PublishRequest) -> Result<Value, RemoteError>;
    async fn health(&self) -> Result<Envelope, RemoteError>;
}

#[derive(Debug, Clone)]
pub struct HttpEventSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpEventSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()
            .map_err(|err| RemoteError::Unavailable(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn envelope(&self, request: reqwest::RequestBuilder) -> Result<Envelope, RemoteError> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(RemoteError::Status {
                status: status.as_u16(),
                message,
            });
        }
        let envelope: Envelope = response.json().await?;
        if !envelope.success {
            return Err(RemoteError::Status {
                status: status.as_u16(),
                message: envelope.message,
            });
        }
        Ok(envelope)
    }
}

#[async_trait]
impl RemoteEventSource for HttpEventSource {
    async fn fetch_events(&self, kind: Option<&str>) -> Result<Vec<Value>, RemoteError> {
        let mut request = self.client.get(self.url("/events"));
        if let Some(kind) = kind {
            request = request.query(&[("type", kind)]);
        }
        let envelope = self.envelope(request).await?;
        let events = match envelope.data {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items,
            Some(other) => {
                return Err(RemoteError::Decode(format!(
                    "expected an array of events, got {}",
                    other
                )))
            }
        };
        debug!(count = events.len(), "fetched remote events");
        Ok(events)
    }

    async fn publish_event(&self, request: &PublishRequest) -> Result<Value, RemoteError> {
        let envelope = self
            .envelope(self.client.post(self.url("/events")).json(request))
            .await?;
        Ok(envelope.data.unwrap_or(Value::Null))
    }

    async fn health(&self) -> Result<Envelope, RemoteError> {
        self.envelope(self.client.get(self.url("/health"))).await
    }
}
