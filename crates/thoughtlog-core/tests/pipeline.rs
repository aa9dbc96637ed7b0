use std::collections::HashSet;

use serde_json::json;
use tempfile::TempDir;
use thoughtlog_core::event_log::{log_path, EventLogStore};
use thoughtlog_core::events::{
    Actor, AiResponseReceived, EventContext, EventKind, EventPayload, HypothesisRejected,
    IntentDeclared, IntentSource, ThoughtEvent,
};
use thoughtlog_core::projection::{project, project_failure_lens, NodeType};
use thoughtlog_core::remote::{Normalizer, RemoteIdPolicy};
use thoughtlog_core::sync::merge_remote_events;

fn store() -> (TempDir, EventLogStore) {
    let temp = TempDir::new().expect("tempdir");
    let store = EventLogStore::open(temp.path(), "demo").expect("open log");
    (temp, store)
}

fn local_intent() -> ThoughtEvent {
    ThoughtEvent::new(
        Actor::Human,
        EventContext::for_project("demo"),
        EventPayload::IntentDeclared(IntentDeclared {
            intent_id: "A".to_string(),
            text: "cache the index".to_string(),
            source: IntentSource::Manual,
        }),
    )
    .with_id("i1")
}

#[test]
fn merged_remote_events_project_after_local_ones() {
    let (_temp, store) = store();
    store.append(&local_intent()).expect("append");

    let remote = vec![
        json!({
            "id": "e2",
            "type": "AI_RESPONSE_RECEIVED",
            "actor": "ai",
            "payload": {"ai_session_id": "s1", "model": "m", "prompt": "?", "response": "!", "linked_intent": "A"}
        }),
        json!({
            "id": "e3",
            "type": "HYPOTHESIS_REJECTED",
            "actor": "human",
            "payload": {"ai_session_id": "s1", "excerpt": "x", "reason": "no"}
        }),
    ];
    let mut ids = store.ids().expect("ids");
    let normalizer = Normalizer::new(RemoteIdPolicy::Random);
    let report = merge_remote_events(&store, &mut ids, remote.clone(), &normalizer);
    assert_eq!(report.appended, 2);

    let again = merge_remote_events(&store, &mut store.ids().expect("ids"), remote, &normalizer);
    assert_eq!(again.appended, 0);
    assert_eq!(again.already_present, 2);

    let events = store.read_all().expect("read");
    let order: Vec<&str> = events.iter().map(|event| event.id.as_str()).collect();
    assert_eq!(order, vec!["i1", "e2", "e3"]);

    let graph = project(&events);
    assert_eq!(graph.nodes.len(), 3);
    assert_eq!(graph.edges.len(), 2);

    let lens = project_failure_lens(&events);
    assert_eq!(lens.nodes.len(), 1);
    assert_eq!(lens.nodes[0].node_type, NodeType::Decision);
    assert!(lens.edges.is_empty());
}

#[test]
fn log_survives_reopen_and_skips_garbage() {
    let temp = TempDir::new().expect("tempdir");
    {
        let store = EventLogStore::open(temp.path(), "demo").expect("open");
        store.append(&local_intent()).expect("append");
    }
    let path = log_path(temp.path());
    let mut raw = std::fs::read_to_string(&path).expect("read raw");
    raw.push_str("{not json}\n");
    std::fs::write(&path, raw).expect("write raw");

    let reopened = EventLogStore::open(temp.path(), "demo").expect("reopen");
    reopened
        .append(&ThoughtEvent::new(
            Actor::Ai,
            EventContext::for_project("demo"),
            EventPayload::AiResponseReceived(AiResponseReceived {
                ai_session_id: "s9".to_string(),
                model: "m".to_string(),
                prompt: String::new(),
                response: String::new(),
                linked_intent: Some("A".to_string()),
            }),
        ))
        .expect("append after reopen");

    let (events, malformed) = reopened.read_all_with_errors().expect("read");
    assert_eq!(events.len(), 2);
    assert_eq!(malformed.len(), 1);
    assert_eq!(malformed[0].line, 2);

    let linked = reopened.filter_by_linked_intent("A").expect("filter");
    assert_eq!(linked.len(), 2);
    let rejections = reopened
        .filter_by_kind(EventKind::HypothesisRejected)
        .expect("filter");
    assert!(rejections.is_empty());
}

#[test]
fn concurrent_appends_never_tear_records() {
    let (_temp, store) = store();
    let handles: Vec<_> = (0..4)
        .map(|worker| {
            let store = store.clone();
            std::thread::spawn(move || {
                for n in 0..25 {
                    let event = ThoughtEvent::new(
                        Actor::Human,
                        EventContext::for_project("demo"),
                        EventPayload::HypothesisRejected(HypothesisRejected {
                            ai_session_id: format!("s{}", worker),
                            excerpt: "x".repeat(256),
                            reason: format!("attempt {}", n),
                        }),
                    );
                    store.append(&event).expect("append");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("writer thread");
    }

    let (events, malformed) = store.read_all_with_errors().expect("read");
    assert_eq!(events.len(), 100);
    assert!(malformed.is_empty());
    let unique: HashSet<&str> = events.iter().map(|event| event.id.as_str()).collect();
    assert_eq!(unique.len(), 100);
}
