//! Polling change detectors.
//!
//! Each detector keeps its own snapshot of what it saw on the previous tick.
//! A tick diffs the source of truth against that snapshot, appends one event
//! per change, and only then records the change in the snapshot. A change
//! whose append fails stays pending and is retried on the next tick.

pub mod branch;
pub mod commit;
pub mod file;

use std::sync::Mutex;

use serde::Serialize;

use crate::event_log::{EventLogError, EventLogStore};
use crate::events::ThoughtEvent;

pub use branch::BranchDetector;
pub use commit::CommitDetector;
pub use file::FileDetector;

/// Destination for synthesized events.
pub trait EventSink: Send + Sync {
    fn append(&self, event: &ThoughtEvent) -> Result<(), EventLogError>;
}

impl EventSink for EventLogStore {
    fn append(&self, event: &ThoughtEvent) -> Result<(), EventLogError> {
        EventLogStore::append(self, event)
    }
}

/// In-memory sink, handy for exercising a single tick.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<ThoughtEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ThoughtEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl EventSink for MemorySink {
    fn append(&self, event: &ThoughtEvent) -> Result<(), EventLogError> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct TickReport {
    pub emitted: usize,
    pub failed: usize,
    pub notes: Vec<String>,
}

impl TickReport {
    fn query_failed(detector: &str, err: impl std::fmt::Display) -> Self {
        Self {
            emitted: 0,
            failed: 0,
            notes: vec![format!("{} query failed: {}", detector, err)],
        }
    }
}

pub trait Detector: Send {
    fn name(&self) -> &'static str;
    fn tick(&mut self, sink: &dyn EventSink) -> TickReport;
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::BTreeMap;
    use std::io;
    use std::sync::Mutex;

    use crate::event_log::EventLogError;
    use crate::events::ThoughtEvent;
    use crate::git::{VcsError, VcsQuery};
    use crate::project_files::ProjectFiles;

    use super::EventSink;

    /// Scripted git: maps the first argument to a canned response.
    #[derive(Default)]
    pub struct FakeVcs {
        pub responses: Mutex<BTreeMap<String, Result<String, String>>>,
    }

    impl FakeVcs {
        pub fn set(&self, command: &str, output: &str) {
            self.responses
                .lock()
                .expect("fake vcs lock")
                .insert(command.to_string(), Ok(output.to_string()));
        }

        pub fn fail(&self, command: &str) {
            self.responses
                .lock()
                .expect("fake vcs lock")
                .insert(command.to_string(), Err("boom".to_string()));
        }
    }

    impl VcsQuery for FakeVcs {
        fn run(&self, args: &[&str]) -> Result<String, VcsError> {
            let key = args.first().copied().unwrap_or_default();
            let responses = self.responses.lock().expect("fake vcs lock");
            match responses.get(key) {
                Some(Ok(output)) => Ok(output.clone()),
                Some(Err(stderr)) => Err(VcsError::Failed {
                    args: args.join(" "),
                    stderr: stderr.clone(),
                }),
                None => Ok(String::new()),
            }
        }
    }

    #[derive(Default)]
    pub struct FakeFiles {
        pub files: Mutex<BTreeMap<String, Option<String>>>,
        pub listing_fails: Mutex<bool>,
    }

    impl FakeFiles {
        pub fn put(&self, path: &str, content: &str) {
            self.files
                .lock()
                .expect("fake files lock")
                .insert(path.to_string(), Some(content.to_string()));
        }

        pub fn put_unreadable(&self, path: &str) {
            self.files
                .lock()
                .expect("fake files lock")
                .insert(path.to_string(), None);
        }

        pub fn remove(&self, path: &str) {
            self.files.lock().expect("fake files lock").remove(path);
        }
    }

    impl ProjectFiles for FakeFiles {
        fn list_files(&self) -> io::Result<Vec<String>> {
            if *self.listing_fails.lock().expect("fake files lock") {
                return Err(io::Error::new(io::ErrorKind::Other, "listing failed"));
            }
            Ok(self.files.lock().expect("fake files lock").keys().cloned().collect())
        }

        fn read_file(&self, relative: &str) -> io::Result<String> {
            match self.files.lock().expect("fake files lock").get(relative) {
                Some(Some(content)) => Ok(content.clone()),
                _ => Err(io::Error::new(io::ErrorKind::PermissionDenied, "unreadable")),
            }
        }
    }

    /// Sink that rejects every append.
    pub struct BrokenSink;

    impl EventSink for BrokenSink {
        fn append(&self, _event: &ThoughtEvent) -> Result<(), EventLogError> {
            Err(EventLogError::NotInitialized)
        }
    }
}
