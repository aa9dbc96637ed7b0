use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{info, warn};

use crate::events::{Actor, CommitCreated, EventContext, EventPayload, ThoughtEvent};
use crate::git::{self, GitCommit, VcsQuery};

use super::{Detector, EventSink, TickReport};

pub const DEFAULT_COMMIT_WINDOW: usize = 10;

/// Reports commits among the latest `window` that have not been seen yet.
/// Intents are not linked automatically; `linked_intents` is always empty.
pub struct CommitDetector {
    project: String,
    vcs: Arc<dyn VcsQuery>,
    window: usize,
    seen: BTreeSet<String>,
}

impl CommitDetector {
    pub fn new(project: impl Into<String>, vcs: Arc<dyn VcsQuery>) -> Self {
        Self {
            project: project.into(),
            vcs,
            window: DEFAULT_COMMIT_WINDOW,
            seen: BTreeSet::new(),
        }
    }

    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window.max(1);
        self
    }

    /// Marks commits already recorded in the log as seen.
    pub fn seed_from_log(&mut self, events: &[ThoughtEvent]) {
        for event in events {
            if matches!(event.payload, EventPayload::CommitCreated(_)) {
                if let Some(hash) = &event.context.git_commit {
                    self.seen.insert(hash.clone());
                }
            }
        }
    }

    pub fn seen(&self) -> &BTreeSet<String> {
        &self.seen
    }

    fn event_for(&self, commit: &GitCommit, branch: &str) -> ThoughtEvent {
        ThoughtEvent::new(
            Actor::Human,
            EventContext::for_project(&self.project)
                .on_branch(branch)
                .at_commit(&commit.hash),
            EventPayload::CommitCreated(CommitCreated {
                message: commit.message.clone(),
                linked_intents: Vec::new(),
                files: commit.files.clone(),
            }),
        )
    }
}

impl Detector for CommitDetector {
    fn name(&self) -> &'static str {
        "commit"
    }

    fn tick(&mut self, sink: &dyn EventSink) -> TickReport {
        let commits = match git::recent_commits(self.vcs.as_ref(), self.window) {
            Ok(commits) => commits,
            Err(err) => {
                warn!(detector = self.name(), error = %err, "commit log query failed");
                return TickReport::query_failed(self.name(), err);
            }
        };

        let mut report = TickReport::default();
        let fresh: Vec<&GitCommit> = commits
            .iter()
            .filter(|commit| !self.seen.contains(&commit.hash))
            .collect();
        if fresh.is_empty() {
            return report;
        }

        let branch = git::current_branch_or_default(self.vcs.as_ref());
        // git log lists newest first; record them oldest first.
        for commit in fresh.into_iter().rev() {
            if let Err(err) = sink.append(&self.event_for(commit, &branch)) {
                warn!(commit = %commit.hash, error = %err, "failed to record commit");
                report.failed += 1;
                continue;
            }
            info!(commit = %commit.hash, "commit recorded");
            self.seen.insert(commit.hash.clone());
            report.emitted += 1;
        }
        report
    }
}
