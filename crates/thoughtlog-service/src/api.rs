//! In-memory implementation of the remote event API.
//!
//! Routes:
//! - `GET /health`
//! - `GET /events[?type=K]`
//! - `POST /events` with `{event_type, data}` plus optional identity fields
//! - `GET /events/:id`
//!
//! Every response is a `{success, message, data}` envelope.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Map, Value};
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tracing::{debug, info};
use ulid::Ulid;

use crate::remote_source::{Envelope, PublishRequest};

#[derive(Clone, Default)]
pub struct ApiState {
    events: Arc<RwLock<Vec<Value>>>,
}

impl ApiState {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.read().await.is_empty()
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/events", get(list_events).post(create_event))
        .route("/events/:id", get(get_event))
        .with_state(state)
}

/// Serves the API on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: ApiState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "remote event API listening");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

/// `evt_<ms>_<8 hex>`, the id shape assigned to posted events.
pub fn new_api_event_id() -> String {
    let bytes = Ulid::new().to_bytes();
    format!(
        "evt_{}_{}",
        Utc::now().timestamp_millis(),
        hex::encode(&bytes[12..])
    )
}

fn reply(status: StatusCode, message: impl Into<String>, data: Option<Value>) -> Response {
    let envelope = Envelope {
        success: status.is_success(),
        message: message.into(),
        data,
    };
    (status, Json(envelope)).into_response()
}

async fn health() -> Response {
    reply(
        StatusCode::OK,
        "thoughtlog API is running",
        Some(json!({"version": env!("CARGO_PKG_VERSION"), "status": "healthy"})),
    )
}

fn event_id(event: &Value) -> Option<&str> {
    event.get("id").and_then(Value::as_str)
}

async fn list_events(
    State(state): State<ApiState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let events = state.events.read().await;
    let filtered: Vec<Value> = match params.get("type") {
        Some(kind) => events
            .iter()
            .filter(|event| event.get("type").and_then(Value::as_str) == Some(kind.as_str()))
            .cloned()
            .collect(),
        None => events.clone(),
    };
    reply(
        StatusCode::OK,
        format!("Found {} events", filtered.len()),
        Some(Value::Array(filtered)),
    )
}

async fn create_event(
    State(state): State<ApiState>,
    Json(request): Json<PublishRequest>,
) -> Response {
    if request.event_type.trim().is_empty() {
        return reply(StatusCode::BAD_REQUEST, "event_type is required", None);
    }

    let mut events = state.events.write().await;
    let given = request.id.filter(|id| !id.trim().is_empty());
    if let Some(id) = &given {
        if let Some(existing) = events.iter().find(|event| event_id(event) == Some(id.as_str())) {
            return reply(StatusCode::OK, "Event already exists", Some(existing.clone()));
        }
    }

    let mut record = Map::new();
    record.insert(
        "id".to_string(),
        Value::String(given.unwrap_or_else(new_api_event_id)),
    );
    record.insert("type".to_string(), Value::String(request.event_type));
    record.insert(
        "timestamp".to_string(),
        Value::String(
            request
                .timestamp
                .unwrap_or_else(|| Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
        ),
    );
    if let Some(actor) = request.actor {
        record.insert("actor".to_string(), Value::String(actor));
    }
    if let Some(context) = request.context {
        record.insert("context".to_string(), context);
    }
    record.insert("data".to_string(), request.data);

    let record = Value::Object(record);
    debug!(id = event_id(&record).unwrap_or_default(), "event created");
    events.push(record.clone());
    reply(StatusCode::OK, "Event created", Some(record))
}

async fn get_event(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    let events = state.events.read().await;
    match events.iter().find(|event| event_id(event) == Some(id.as_str())) {
        Some(event) => reply(StatusCode::OK, "Event found", Some(event.clone())),
        None => reply(StatusCode::NOT_FOUND, format!("Event {} not found", id), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use pretty_assertions::assert_eq;
    use tower::ServiceExt;

    async fn call(app: Router, request: Request<Body>) -> (StatusCode, Envelope) {
        let response = app.oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let envelope: Envelope = serde_json::from_slice(&bytes).expect("envelope");
        (status, envelope)
    }

    fn post(body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/events")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    fn get_uri(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).expect("request")
    }

    #[tokio::test]
    async fn health_reports_running() {
        let (status, envelope) = call(router(ApiState::new()), get_uri("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(envelope.success);
        assert_eq!(envelope.data.expect("data")["status"], "healthy");
    }

    #[tokio::test]
    async fn posted_event_gets_id_and_is_listed_by_type() {
        let state = ApiState::new();
        let (_, created) = call(
            router(state.clone()),
            post(json!({"event_type": "FILE_CREATED", "data": {"path": "a.rs"}})),
        )
        .await;
        let created = created.data.expect("created");
        let id = created["id"].as_str().expect("id").to_string();
        assert!(id.starts_with("evt_"));
        assert_eq!(id.rsplit('_').next().map(str::len), Some(8));
        assert_eq!(created["data"], json!({"path": "a.rs"}));

        call(
            router(state.clone()),
            post(json!({"event_type": "INTENT_DECLARED", "data": {"intent_id": "A"}})),
        )
        .await;

        let (_, listed) = call(router(state.clone()), get_uri("/events?type=FILE_CREATED")).await;
        let listed = listed.data.expect("listed");
        assert_eq!(listed.as_array().map(Vec::len), Some(1));
        assert_eq!(listed[0]["id"], id.as_str());

        let (status, found) = call(router(state.clone()), get_uri(&format!("/events/{}", id))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(found.data.expect("found")["type"], "FILE_CREATED");
        assert_eq!(state.len().await, 2);
    }

    #[tokio::test]
    async fn posting_a_known_id_twice_stores_it_once() {
        let state = ApiState::new();
        let body = json!({"event_type": "UNKNOWN", "data": {}, "id": "keep-me", "actor": "ai"});
        call(router(state.clone()), post(body.clone())).await;
        let (_, again) = call(router(state.clone()), post(body)).await;
        assert_eq!(again.message, "Event already exists");
        assert_eq!(state.len().await, 1);
    }

    #[tokio::test]
    async fn missing_event_is_not_found() {
        let (status, envelope) = call(router(ApiState::new()), get_uri("/events/nope")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(!envelope.success);
    }
}
