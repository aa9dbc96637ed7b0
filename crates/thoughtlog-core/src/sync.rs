use std::collections::HashSet;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::detect::EventSink;
use crate::events::ThoughtEvent;
use crate::remote::{Normalizer, RemoteEvent};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    Pull,
    Push,
}

impl SyncDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncDirection::Pull => "pull",
            SyncDirection::Push => "push",
        }
    }
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SyncReport {
    pub direction: SyncDirection,
    /// Records received from (pull) or considered for (push) the remote.
    pub fetched: usize,
    /// Events written: appended to the log on pull, published on push.
    pub appended: usize,
    pub already_present: usize,
    pub failed: usize,
    /// True when the pass did nothing because another was already running.
    pub skipped_in_flight: bool,
    pub notes: Vec<String>,
}

impl SyncReport {
    pub fn new(direction: SyncDirection) -> Self {
        Self {
            direction,
            fetched: 0,
            appended: 0,
            already_present: 0,
            failed: 0,
            skipped_in_flight: false,
            notes: Vec::new(),
        }
    }

    pub fn skipped(direction: SyncDirection) -> Self {
        Self {
            skipped_in_flight: true,
            notes: vec!["sync already in flight".to_string()],
            ..Self::new(direction)
        }
    }
}

/// Appends every remote record whose id is not yet in `local_ids`.
///
/// `local_ids` is updated as records are appended, so duplicates inside one
/// batch are written once. Per-record failures are counted and skipped.
pub fn merge_remote_events(
    sink: &dyn EventSink,
    local_ids: &mut HashSet<String>,
    remote: Vec<Value>,
    normalizer: &Normalizer,
) -> SyncReport {
    let mut report = SyncReport::new(SyncDirection::Pull);
    report.fetched = remote.len();

    for (index, raw) in remote.into_iter().enumerate() {
        let record = match RemoteEvent::from_value(raw) {
            Ok(record) => record,
            Err(err) => {
                warn!(index, error = %err, "skipping undecodable remote event");
                report.failed += 1;
                report.notes.push(format!("record {}: {}", index, err));
                continue;
            }
        };
        if record.given_id().is_some_and(|id| local_ids.contains(id)) {
            report.already_present += 1;
            continue;
        }
        let event = match normalizer.normalize(record) {
            Ok(event) => event,
            Err(err) => {
                warn!(index, error = %err, "skipping malformed remote event");
                report.failed += 1;
                report.notes.push(format!("record {}: {}", index, err));
                continue;
            }
        };
        if local_ids.contains(&event.id) {
            report.already_present += 1;
            continue;
        }
        if let Err(err) = sink.append(&event) {
            warn!(id = %event.id, error = %err, "failed to append remote event");
            report.failed += 1;
            report.notes.push(format!("{}: {}", event.id, err));
            continue;
        }
        debug!(id = %event.id, kind = event.kind_name(), "merged remote event");
        local_ids.insert(event.id);
        report.appended += 1;
    }
    report
}

/// Local events whose ids the remote does not have, in log order.
pub fn missing_remotely<'a>(
    local: &'a [ThoughtEvent],
    remote_ids: &HashSet<String>,
) -> Vec<&'a ThoughtEvent> {
    local
        .iter()
        .filter(|event| !remote_ids.contains(&event.id))
        .collect()
}

/// Ids present in a batch of raw remote records (`id`, else `event_id`).
pub fn remote_ids(remote: &[Value]) -> HashSet<String> {
    remote
        .iter()
        .filter_map(|raw| {
            ["id", "event_id"]
                .iter()
                .filter_map(|key| raw.get(*key).and_then(Value::as_str))
                .find(|id| !id.trim().is_empty())
                .map(str::to_string)
        })
        .collect()
}
