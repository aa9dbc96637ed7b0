//! Runs the change detectors on their own poll intervals.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use thoughtlog_core::config::ResolvedConfig;
use thoughtlog_core::detect::commit::DEFAULT_COMMIT_WINDOW;
use thoughtlog_core::detect::{BranchDetector, CommitDetector, Detector, EventSink, FileDetector};
use thoughtlog_core::event_log::{EventLogError, EventLogStore};
use thoughtlog_core::git::VcsQuery;
use thoughtlog_core::project_files::ProjectFiles;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherSettings {
    pub file_poll: Duration,
    pub branch_poll: Duration,
    pub commit_poll: Duration,
    pub commit_window: usize,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            file_poll: Duration::from_millis(1000),
            branch_poll: Duration::from_millis(2000),
            commit_poll: Duration::from_millis(3000),
            commit_window: DEFAULT_COMMIT_WINDOW,
        }
    }
}

impl WatcherSettings {
    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self {
            file_poll: config.file_poll(),
            branch_poll: config.branch_poll(),
            commit_poll: config.commit_poll(),
            commit_window: config.commit_window.value,
        }
    }
}

/// Handle to the running detector loops.
pub struct Watcher {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl Watcher {
    /// Seeds the branch and commit detectors from the log, primes the file
    /// detector with the current tree, then starts one loop per detector.
    ///
    /// Fails only when the log cannot be read.
    pub async fn start(
        store: EventLogStore,
        files: Arc<dyn ProjectFiles>,
        vcs: Arc<dyn VcsQuery>,
        settings: WatcherSettings,
    ) -> Result<Self, EventLogError> {
        let project = store.project_id()?;
        let seed_store = store.clone();
        let commit_window = settings.commit_window;
        let prepared = tokio::task::spawn_blocking(move || {
            let history = seed_store.read_all()?;

            let mut branches = BranchDetector::new(project.clone(), vcs.clone());
            branches.seed_from_log(&history);
            let mut commits =
                CommitDetector::new(project.clone(), vcs.clone()).with_window(commit_window);
            commits.seed_from_log(&history);

            let mut file_detector = FileDetector::new(project, files, vcs);
            match file_detector.prime() {
                Ok(count) => debug!(files = count, "file detector primed"),
                Err(err) => warn!(error = %err, "initial file scan failed"),
            }
            Ok::<_, EventLogError>((file_detector, branches, commits))
        })
        .await
        .map_err(|err| EventLogError::Io(std::io::Error::new(std::io::ErrorKind::Other, err)))?;
        let (file_detector, branches, commits) = prepared?;

        let (shutdown, stop) = watch::channel(false);
        let sink: Arc<dyn EventSink> = Arc::new(store);
        let handles = vec![
            spawn_loop(file_detector, sink.clone(), settings.file_poll, stop.clone()),
            spawn_loop(branches, sink.clone(), settings.branch_poll, stop.clone()),
            spawn_loop(commits, sink, settings.commit_poll, stop),
        ];
        info!(
            file_ms = settings.file_poll.as_millis() as u64,
            branch_ms = settings.branch_poll.as_millis() as u64,
            commit_ms = settings.commit_poll.as_millis() as u64,
            "watcher started"
        );
        Ok(Self { shutdown, handles })
    }

    /// Signals every loop to stop and waits for in-flight ticks to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            if let Err(err) = handle.await {
                warn!(error = %err, "detector loop ended abnormally");
            }
        }
        info!("watcher stopped");
    }
}

fn spawn_loop<D>(
    detector: D,
    sink: Arc<dyn EventSink>,
    period: Duration,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()>
where
    D: Detector + 'static,
{
    let name = detector.name();
    let detector = Arc::new(Mutex::new(detector));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period.max(Duration::from_millis(10)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let detector = detector.clone();
                    let sink = sink.clone();
                    let ticked = tokio::task::spawn_blocking(move || {
                        detector
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .tick(sink.as_ref())
                    })
                    .await;
                    match ticked {
                        Ok(report) if report.emitted > 0 || report.failed > 0 => {
                            info!(detector = name, emitted = report.emitted, failed = report.failed, "detector tick");
                        }
                        Ok(_) => {}
                        Err(err) => warn!(detector = name, error = %err, "detector tick panicked"),
                    }
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }
        debug!(detector = name, "detector loop exited");
    })
}
