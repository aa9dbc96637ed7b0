use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{info, warn};

use crate::events::{Actor, BranchCreated, EventContext, EventPayload, ThoughtEvent};
use crate::git::{self, GitBranch, VcsQuery, DEFAULT_BRANCH};

use super::{Detector, EventSink, TickReport};

/// Reports branches that were not present on the previous tick.
///
/// The parent branch is always recorded as `main`; real ancestry detection
/// is not implemented.
pub struct BranchDetector {
    project: String,
    vcs: Arc<dyn VcsQuery>,
    known: BTreeSet<String>,
}

impl BranchDetector {
    pub fn new(project: impl Into<String>, vcs: Arc<dyn VcsQuery>) -> Self {
        Self {
            project: project.into(),
            vcs,
            known: BTreeSet::new(),
        }
    }

    /// Marks branches already recorded in the log as known.
    pub fn seed_from_log(&mut self, events: &[ThoughtEvent]) {
        for event in events {
            if let EventPayload::BranchCreated(payload) = &event.payload {
                self.known.insert(payload.branch.clone());
            }
        }
    }

    pub fn known(&self) -> &BTreeSet<String> {
        &self.known
    }

    fn event_for(&self, branch: &GitBranch) -> ThoughtEvent {
        let mut context = EventContext::for_project(&self.project).on_branch(&branch.name);
        if !branch.commit.is_empty() {
            context = context.at_commit(&branch.commit);
        }
        ThoughtEvent::new(
            Actor::System,
            context,
            EventPayload::BranchCreated(BranchCreated {
                branch: branch.name.clone(),
                from: DEFAULT_BRANCH.to_string(),
                linked_intent: None,
            }),
        )
    }
}

impl Detector for BranchDetector {
    fn name(&self) -> &'static str {
        "branch"
    }

    fn tick(&mut self, sink: &dyn EventSink) -> TickReport {
        let branches = match git::list_branches(self.vcs.as_ref()) {
            Ok(branches) => branches,
            Err(err) => {
                warn!(detector = self.name(), error = %err, "branch listing failed");
                return TickReport::query_failed(self.name(), err);
            }
        };

        let mut report = TickReport::default();
        let mut next_known = BTreeSet::new();
        for branch in &branches {
            if !self.known.contains(&branch.name) {
                if let Err(err) = sink.append(&self.event_for(branch)) {
                    warn!(branch = %branch.name, error = %err, "failed to record new branch");
                    report.failed += 1;
                    continue;
                }
                info!(branch = %branch.name, "branch created");
                report.emitted += 1;
            }
            next_known.insert(branch.name.clone());
        }

        // Branches that disappeared are forgotten, so re-creating one is reported again.
        self.known = next_known;
        report
    }
}
