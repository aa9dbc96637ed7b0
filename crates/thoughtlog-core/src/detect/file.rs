use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::events::{
    Actor, ChangeReverted, EventContext, EventPayload, FileCreated, FileModified, ThoughtEvent,
};
use crate::git::{self, VcsQuery};
use crate::project_files::{rolling_hash, ProjectFiles};

use super::{Detector, EventSink, TickReport};

pub const DELETED_REASON: &str = "File deleted";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileChangeKind {
    Created,
    Modified,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub path: String,
    pub kind: FileChangeKind,
    /// Hash of the current content; `None` for deletions.
    pub hash: Option<u32>,
}

/// Path -> content hash, as last observed.
pub type FileSnapshot = BTreeMap<String, u32>;

/// Changes needed to move `previous` to `current`, in path order with
/// deletions last.
pub fn diff_snapshots(previous: &FileSnapshot, current: &FileSnapshot) -> Vec<FileChange> {
    let mut changes = Vec::new();
    for (path, hash) in current {
        match previous.get(path) {
            None => changes.push(FileChange {
                path: path.clone(),
                kind: FileChangeKind::Created,
                hash: Some(*hash),
            }),
            Some(old) if old != hash => changes.push(FileChange {
                path: path.clone(),
                kind: FileChangeKind::Modified,
                hash: Some(*hash),
            }),
            Some(_) => {}
        }
    }
    for path in previous.keys() {
        if !current.contains_key(path) {
            changes.push(FileChange {
                path: path.clone(),
                kind: FileChangeKind::Deleted,
                hash: None,
            });
        }
    }
    changes
}

pub struct FileDetector {
    project: String,
    files: Arc<dyn ProjectFiles>,
    vcs: Arc<dyn VcsQuery>,
    snapshot: FileSnapshot,
}

impl FileDetector {
    pub fn new(project: impl Into<String>, files: Arc<dyn ProjectFiles>, vcs: Arc<dyn VcsQuery>) -> Self {
        Self {
            project: project.into(),
            files,
            vcs,
            snapshot: FileSnapshot::new(),
        }
    }

    /// Takes the current tree as the baseline so files that already exist
    /// are not reported as created.
    pub fn prime(&mut self) -> std::io::Result<usize> {
        self.snapshot = self.scan()?;
        Ok(self.snapshot.len())
    }

    pub fn snapshot(&self) -> &FileSnapshot {
        &self.snapshot
    }

    fn scan(&self) -> std::io::Result<FileSnapshot> {
        let mut snapshot = FileSnapshot::new();
        for path in self.files.list_files()? {
            let content = match self.files.read_file(&path) {
                Ok(content) => content,
                Err(err) => {
                    debug!(path = %path, error = %err, "unreadable file hashed as empty");
                    String::new()
                }
            };
            snapshot.insert(path, rolling_hash(&content));
        }
        Ok(snapshot)
    }

    fn event_for(&self, change: &FileChange, branch: &str) -> ThoughtEvent {
        let payload = match change.kind {
            FileChangeKind::Created => EventPayload::FileCreated(FileCreated {
                path: change.path.clone(),
                linked_ai_session: None,
            }),
            FileChangeKind::Modified => {
                let diff_stats = match git::file_diff(self.vcs.as_ref(), &change.path) {
                    Ok(diff) => git::count_diff_stats(&diff),
                    Err(err) => {
                        debug!(path = %change.path, error = %err, "diff unavailable");
                        Default::default()
                    }
                };
                EventPayload::FileModified(FileModified {
                    path: change.path.clone(),
                    diff_stats,
                })
            }
            FileChangeKind::Deleted => EventPayload::ChangeReverted(ChangeReverted {
                path: change.path.clone(),
                reason: DELETED_REASON.to_string(),
            }),
        };
        ThoughtEvent::new(
            Actor::System,
            EventContext::for_project(&self.project).on_branch(branch),
            payload,
        )
    }
}

impl Detector for FileDetector {
    fn name(&self) -> &'static str {
        "file"
    }

    fn tick(&mut self, sink: &dyn EventSink) -> TickReport {
        let current = match self.scan() {
            Ok(current) => current,
            Err(err) => {
                warn!(detector = self.name(), error = %err, "file listing failed");
                return TickReport::query_failed(self.name(), err);
            }
        };

        let changes = diff_snapshots(&self.snapshot, &current);
        let mut report = TickReport::default();
        if changes.is_empty() {
            return report;
        }

        let branch = git::current_branch_or_default(self.vcs.as_ref());
        for change in changes {
            let event = self.event_for(&change, &branch);
            if let Err(err) = sink.append(&event) {
                warn!(path = %change.path, error = %err, "failed to record file change");
                report.failed += 1;
                continue;
            }
            match change.hash {
                Some(hash) => {
                    self.snapshot.insert(change.path, hash);
                }
                None => {
                    self.snapshot.remove(&change.path);
                }
            }
            report.emitted += 1;
        }
        report
    }
}
