use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use fs2::FileExt;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::events::{EventKind, ThoughtEvent};

pub const LOG_DIR: &str = ".thoughtlog";
pub const LOG_FILE: &str = "events.ndjson";

#[derive(Debug, Error)]
pub enum EventLogError {
    #[error("Event log storage unavailable at {}: {source}", path.display())]
    StorageUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Event log not initialized; call initialize() before using the store")]
    NotInitialized,
    #[error("Event log IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to serialize event: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A log line that could not be decoded. Reads skip these and report them.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MalformedRecord {
    pub line: usize,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EventLogStatus {
    pub project_id: String,
    pub path: String,
    pub event_count: usize,
    pub malformed_count: usize,
}

pub fn log_dir(project_root: &Path) -> PathBuf {
    project_root.join(LOG_DIR)
}

pub fn log_path(project_root: &Path) -> PathBuf {
    log_dir(project_root).join(LOG_FILE)
}

#[derive(Debug, Clone)]
struct LogLocation {
    project_id: String,
    path: PathBuf,
}

/// Shared handle to a project's append-only event log.
///
/// Clones point at the same log, so detectors and the sync engine can each
/// hold one. Appends take an exclusive file lock and write a whole record
/// with a single call; reads take a shared lock, so a reader observes a
/// prefix of the log but never a torn record.
#[derive(Debug, Clone, Default)]
pub struct EventLogStore {
    location: Arc<RwLock<Option<LogLocation>>>,
}

impl EventLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(project_root: &Path, project_id: &str) -> Result<Self, EventLogError> {
        let store = Self::new();
        store.initialize(project_root, project_id)?;
        Ok(store)
    }

    /// Ensures `<root>/.thoughtlog/events.ndjson` exists and points the
    /// store at it. Safe to call repeatedly; existing content is untouched.
    pub fn initialize(&self, project_root: &Path, project_id: &str) -> Result<PathBuf, EventLogError> {
        let path = log_path(project_root);
        if let Err(first) = ensure_log_file(&path) {
            warn!(path = %path.display(), error = %first, "event log creation failed, retrying once");
            ensure_log_file(&path).map_err(|source| EventLogError::StorageUnavailable {
                path: path.clone(),
                source,
            })?;
        }

        let mut location = self
            .location
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *location = Some(LogLocation {
            project_id: project_id.to_string(),
            path: path.clone(),
        });
        info!(project = project_id, path = %path.display(), "event log initialized");
        Ok(path)
    }

    pub fn is_initialized(&self) -> bool {
        self.location().is_ok()
    }

    pub fn project_id(&self) -> Result<String, EventLogError> {
        Ok(self.location()?.project_id)
    }

    pub fn path(&self) -> Result<PathBuf, EventLogError> {
        Ok(self.location()?.path)
    }

    pub fn append(&self, event: &ThoughtEvent) -> Result<(), EventLogError> {
        let path = self.path()?;
        let mut line = serde_json::to_string(event)?;
        line.push('\n');

        let mut file = OpenOptions::new().read(true).append(true).open(&path)?;
        file.lock_exclusive()?;
        let written = write_record(&mut file, &line);
        FileExt::unlock(&file)?;
        written?;

        debug!(id = %event.id, kind = event.kind_name(), "event appended");
        Ok(())
    }

    /// Every well-formed event in log order. Malformed lines are skipped and
    /// only counted in a warning; use `read_all_with_errors` to inspect them.
    pub fn read_all(&self) -> Result<Vec<ThoughtEvent>, EventLogError> {
        let (events, malformed) = self.read_all_with_errors()?;
        if !malformed.is_empty() {
            warn!(
                skipped = malformed.len(),
                first_line = malformed[0].line,
                "skipped malformed event log records"
            );
        }
        Ok(events)
    }

    pub fn read_all_with_errors(
        &self,
    ) -> Result<(Vec<ThoughtEvent>, Vec<MalformedRecord>), EventLogError> {
        let path = self.path()?;
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok((Vec::new(), Vec::new()))
            }
            Err(err) => return Err(err.into()),
        };

        FileExt::lock_shared(&file)?;
        let mut bytes = Vec::new();
        let read = file.read_to_end(&mut bytes);
        FileExt::unlock(&file)?;
        read?;

        Ok(parse_records(&bytes))
    }

    pub fn filter_by_kind(&self, kind: EventKind) -> Result<Vec<ThoughtEvent>, EventLogError> {
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|event| event.kind() == Some(kind))
            .collect())
    }

    pub fn filter_by_linked_intent(&self, intent_id: &str) -> Result<Vec<ThoughtEvent>, EventLogError> {
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|event| event.links_intent(intent_id))
            .collect())
    }

    pub fn ids(&self) -> Result<HashSet<String>, EventLogError> {
        Ok(self.read_all()?.into_iter().map(|event| event.id).collect())
    }

    pub fn contains_id(&self, id: &str) -> Result<bool, EventLogError> {
        Ok(self.read_all()?.iter().any(|event| event.id == id))
    }

    pub fn status(&self) -> Result<EventLogStatus, EventLogError> {
        let location = self.location()?;
        let (events, malformed) = self.read_all_with_errors()?;
        Ok(EventLogStatus {
            project_id: location.project_id,
            path: location.path.display().to_string(),
            event_count: events.len(),
            malformed_count: malformed.len(),
        })
    }

    fn location(&self) -> Result<LogLocation, EventLogError> {
        self.location
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(EventLogError::NotInitialized)
    }
}

/// Splits raw log bytes into events, collecting undecodable lines instead of
/// failing. A final line without a trailing newline is parsed like any other.
pub fn parse_records(bytes: &[u8]) -> (Vec<ThoughtEvent>, Vec<MalformedRecord>) {
    let mut events = Vec::new();
    let mut malformed = Vec::new();

    for (idx, raw) in bytes.split(|byte| *byte == b'\n').enumerate() {
        let line = match std::str::from_utf8(raw) {
            Ok(line) => line.trim(),
            Err(err) => {
                malformed.push(MalformedRecord {
                    line: idx + 1,
                    error: err.to_string(),
                });
                continue;
            }
        };
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<ThoughtEvent>(line) {
            Ok(event) => events.push(event),
            Err(err) => malformed.push(MalformedRecord {
                line: idx + 1,
                error: err.to_string(),
            }),
        }
    }

    (events, malformed)
}

fn ensure_log_file(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)?;
    Ok(())
}

fn write_record(file: &mut File, line: &str) -> std::io::Result<()> {
    let mut record = String::with_capacity(line.len() + 1);
    if needs_separator(file)? {
        record.push('\n');
    }
    record.push_str(line);
    file.write_all(record.as_bytes())?;
    file.flush()
}

fn needs_separator(file: &mut File) -> std::io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(false);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}
