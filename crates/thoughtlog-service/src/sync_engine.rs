//! Periodic reconciliation between the local event log and the remote API.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use thoughtlog_core::event_log::{EventLogError, EventLogStore};
use thoughtlog_core::remote::{Normalizer, RemoteIdPolicy};
use thoughtlog_core::sync::{
    merge_remote_events, missing_remotely, remote_ids, SyncDirection, SyncReport,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::remote_source::{PublishRequest, RemoteError, RemoteEventSource};

const MIN_SYNC_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Log(#[from] EventLogError),
    #[error("sync worker failed: {0}")]
    Worker(String),
}

struct AutoSync {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct Inner {
    store: EventLogStore,
    source: Arc<dyn RemoteEventSource>,
    policy: RemoteIdPolicy,
    in_flight: AtomicBool,
    auto: Mutex<Option<AutoSync>>,
}

/// Clears the in-flight flag when a pass ends, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Merges remote events into the log and publishes local ones.
///
/// At most one pass runs at a time, whichever direction; a pass requested
/// while another is running returns a report with `skipped_in_flight` set.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<Inner>,
}

impl SyncEngine {
    pub fn new(store: EventLogStore, source: Arc<dyn RemoteEventSource>, policy: RemoteIdPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                source,
                policy,
                in_flight: AtomicBool::new(false),
                auto: Mutex::new(None),
            }),
        }
    }

    pub fn is_syncing(&self) -> bool {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    pub fn is_auto_syncing(&self) -> bool {
        self.inner
            .auto
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Pull pass: fetch remote events and append the ones the log lacks.
    pub async fn sync_remote_to_log(&self) -> Result<SyncReport, SyncError> {
        let Some(_guard) = InFlight::acquire(&self.inner.in_flight) else {
            debug!("pull skipped, sync already in flight");
            return Ok(SyncReport::skipped(SyncDirection::Pull));
        };

        let remote = self.inner.source.fetch_events(None).await?;
        let store = self.inner.store.clone();
        let normalizer = Normalizer::new(self.inner.policy);
        let report = tokio::task::spawn_blocking(move || {
            let mut ids = store.ids()?;
            Ok::<_, EventLogError>(merge_remote_events(&store, &mut ids, remote, &normalizer))
        })
        .await
        .map_err(|err| SyncError::Worker(err.to_string()))??;

        if report.appended > 0 || report.failed > 0 {
            info!(
                fetched = report.fetched,
                appended = report.appended,
                failed = report.failed,
                "pulled remote events"
            );
        }
        Ok(report)
    }

    /// Push pass: publish every local event whose id the remote lacks.
    pub async fn sync_log_to_remote(&self) -> Result<SyncReport, SyncError> {
        let Some(_guard) = InFlight::acquire(&self.inner.in_flight) else {
            debug!("push skipped, sync already in flight");
            return Ok(SyncReport::skipped(SyncDirection::Push));
        };

        let remote = self.inner.source.fetch_events(None).await?;
        let present = remote_ids(&remote);
        let store = self.inner.store.clone();
        let local = tokio::task::spawn_blocking(move || store.read_all())
            .await
            .map_err(|err| SyncError::Worker(err.to_string()))??;

        let mut report = SyncReport::new(SyncDirection::Push);
        report.fetched = local.len();
        let missing = missing_remotely(&local, &present);
        report.already_present = local.len() - missing.len();

        for event in missing {
            let request = match PublishRequest::from_event(event) {
                Ok(request) => request,
                Err(err) => {
                    warn!(id = %event.id, error = %err, "skipping unserializable event");
                    report.failed += 1;
                    report.notes.push(format!("{}: {}", event.id, err));
                    continue;
                }
            };
            match self.inner.source.publish_event(&request).await {
                Ok(_) => report.appended += 1,
                Err(err) => {
                    warn!(id = %event.id, error = %err, "failed to publish event");
                    report.failed += 1;
                    report.notes.push(format!("{}: {}", event.id, err));
                }
            }
        }

        info!(pushed = report.appended, failed = report.failed, "pushed local events");
        Ok(report)
    }

    /// Starts periodic pulls, the first one immediately. Returns false if
    /// auto-sync was already running.
    pub fn start_auto_sync(&self, interval: Duration) -> bool {
        let mut auto = self.inner.auto.lock().unwrap_or_else(PoisonError::into_inner);
        if auto.is_some() {
            return false;
        }

        let (shutdown, mut stop) = watch::channel(false);
        let engine = self.clone();
        let period = interval.max(MIN_SYNC_INTERVAL);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = engine.sync_remote_to_log().await {
                            warn!(error = %err, "auto-sync pass failed");
                        }
                    }
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("auto-sync loop exited");
        });

        info!(interval_ms = period.as_millis() as u64, "auto-sync started");
        *auto = Some(AutoSync { shutdown, handle });
        true
    }

    /// Stops the auto-sync loop and waits for an in-flight pass to finish.
    pub async fn stop_auto_sync(&self) {
        let running = self
            .inner
            .auto
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(AutoSync { shutdown, handle }) = running else {
            return;
        };
        let _ = shutdown.send(true);
        if let Err(err) = handle.await {
            warn!(error = %err, "auto-sync task ended abnormally");
        }
        info!("auto-sync stopped");
    }
}
