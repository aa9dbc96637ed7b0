use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;
use thoughtlog_core::event_log::EventLogStore;
use thoughtlog_core::events::{
    Actor, EventContext, EventKind, EventPayload, HypothesisRejected, ThoughtEvent,
};
use thoughtlog_core::remote::RemoteIdPolicy;
use thoughtlog_service::api::{self, ApiState};
use thoughtlog_service::remote_source::{PublishRequest, RemoteEventSource};
use thoughtlog_service::{HttpEventSource, SyncEngine};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

struct Server {
    base_url: String,
    stop: Option<oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<std::io::Result<()>>,
}

impl Server {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (stop, stopped) = oneshot::channel::<()>();
        let handle = tokio::spawn(api::serve(listener, ApiState::new(), async move {
            let _ = stopped.await;
        }));
        Self {
            base_url: format!("http://{}", addr),
            stop: Some(stop),
            handle,
        }
    }

    fn source(&self) -> HttpEventSource {
        HttpEventSource::new(&self.base_url, Duration::from_secs(5)).expect("client")
    }

    async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.handle.await.expect("join").expect("serve");
    }
}

fn store() -> (TempDir, EventLogStore) {
    let temp = TempDir::new().expect("tempdir");
    let store = EventLogStore::open(temp.path(), "demo").expect("open");
    (temp, store)
}

#[tokio::test]
async fn health_and_publish_over_http() {
    let server = Server::start().await;
    let source = server.source();

    let health = source.health().await.expect("health");
    assert!(health.success);

    let created = source
        .publish_event(&PublishRequest::new("FILE_CREATED", json!({"path": "a.rs"})))
        .await
        .expect("publish");
    assert!(created["id"].as_str().is_some());

    let only_files = source.fetch_events(Some("FILE_CREATED")).await.expect("fetch");
    assert_eq!(only_files.len(), 1);
    let none = source.fetch_events(Some("BRANCH_CREATED")).await.expect("fetch");
    assert!(none.is_empty());

    server.shutdown().await;
}

#[tokio::test]
async fn pushed_events_pull_back_without_duplicates() {
    let server = Server::start().await;

    let (_a_dir, origin) = store();
    let rejected = ThoughtEvent::new(
        Actor::Human,
        EventContext::for_project("demo").on_branch("main"),
        EventPayload::HypothesisRejected(HypothesisRejected {
            ai_session_id: "s1".to_string(),
            excerpt: "drop the cache".to_string(),
            reason: "too slow".to_string(),
        }),
    );
    origin.append(&rejected).expect("append");

    let pusher = SyncEngine::new(origin.clone(), Arc::new(server.source()), RemoteIdPolicy::Random);
    assert_eq!(pusher.sync_log_to_remote().await.expect("push").appended, 1);
    assert_eq!(pusher.sync_log_to_remote().await.expect("push again").appended, 0);

    // Pulling into the log that pushed the event finds nothing new.
    assert_eq!(pusher.sync_remote_to_log().await.expect("pull").appended, 0);

    let (_b_dir, replica) = store();
    let puller = SyncEngine::new(replica.clone(), Arc::new(server.source()), RemoteIdPolicy::Random);
    assert_eq!(puller.sync_remote_to_log().await.expect("pull").appended, 1);
    assert_eq!(puller.sync_remote_to_log().await.expect("pull again").appended, 0);

    let pulled = replica.read_all().expect("read");
    assert_eq!(pulled.len(), 1);
    assert_eq!(pulled[0], rejected);
    assert_eq!(pulled[0].kind(), Some(EventKind::HypothesisRejected));

    server.shutdown().await;
}

#[tokio::test]
async fn server_assigned_ids_and_default_actor_survive_pull() {
    let server = Server::start().await;
    let source = server.source();
    source
        .publish_event(&PublishRequest::new("INTENT_DECLARED", json!({"intent_id": "A", "text": "go"})))
        .await
        .expect("publish");

    let (_dir, replica) = store();
    let engine = SyncEngine::new(replica.clone(), Arc::new(server.source()), RemoteIdPolicy::Random);
    let report = engine.sync_remote_to_log().await.expect("pull");
    assert_eq!(report.appended, 1);

    let events = replica.read_all().expect("read");
    assert_eq!(events[0].actor, Actor::System);
    assert!(events[0].id.starts_with("evt_"));

    server.shutdown().await;
}
