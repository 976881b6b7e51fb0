//! Long-running polling monitor.
//!
//! Platform file watchers miss some of the write patterns build tools use
//! (rename-over, network shares, editors replacing files), so the monitor
//! rescans the tree on a fixed interval instead. It is meant for build output
//! directories, not for drive roots or trees with many thousands of files.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use crossbeam_channel::{Receiver, unbounded};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::MonitorError;
use super::detector::ChangeDetector;
use super::event::ChangeEvent;

/// Shortest accepted poll interval, in seconds.
pub const MIN_POLL_INTERVAL_SECS: u64 = 1;
/// Longest accepted poll interval, in seconds.
pub const MAX_POLL_INTERVAL_SECS: u64 = 60;
/// Sleep between cancellation checks. Independent of the poll interval.
pub const POLL_QUANTUM: Duration = Duration::from_millis(10);

/// Validate a poll interval and convert it to a [`Duration`].
pub fn validate_interval(seconds: u64) -> Result<Duration, MonitorError> {
    if !(MIN_POLL_INTERVAL_SECS..=MAX_POLL_INTERVAL_SECS).contains(&seconds) {
        return Err(MonitorError::InvalidInterval(seconds));
    }
    Ok(Duration::from_secs(seconds))
}

type Listener = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;
type ProgressCallback = Arc<dyn Fn(MonitorProgress) + Send + Sync>;

/// Handle returned by [`FileSystemMonitor::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Progress notifications from the polling thread.
#[derive(Debug, Clone)]
pub enum MonitorProgress {
    /// A poll cycle completed.
    Polled { at: DateTime<Local>, changes: usize },
    /// A poll cycle failed; the loop keeps running.
    Failed(String),
}

#[derive(Default)]
struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
}

impl ListenerRegistry {
    fn add(&self, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.listeners.lock().push((id, listener));
        id
    }

    fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    fn dispatch(&self, event: &ChangeEvent) {
        // Snapshot the list so listeners may (un)subscribe while handling.
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(event);
        }
    }
}

struct Worker {
    cancel: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Polls a directory tree on its own thread and publishes [`ChangeEvent`]s.
pub struct FileSystemMonitor {
    root: PathBuf,
    interval_secs: u64,
    registry: Arc<ListenerRegistry>,
    progress: Option<ProgressCallback>,
    worker: Option<Worker>,
}

impl FileSystemMonitor {
    pub fn new(root: impl Into<PathBuf>, interval_secs: u64) -> Self {
        Self {
            root: root.into(),
            interval_secs,
            registry: Arc::new(ListenerRegistry::default()),
            progress: None,
            worker: None,
        }
    }

    /// Receive poll progress and cycle failures.
    pub fn with_progress(mut self, callback: impl Fn(MonitorProgress) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(callback));
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn interval_secs(&self) -> u64 {
        self.interval_secs
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Register a listener. It runs on the monitor thread.
    pub fn subscribe(&self, listener: impl Fn(&ChangeEvent) + Send + Sync + 'static) -> ListenerId {
        self.registry.add(Arc::new(listener))
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.registry.remove(id)
    }

    /// Receive events over a channel instead of a callback.
    pub fn subscribe_channel(&self) -> (ListenerId, Receiver<ChangeEvent>) {
        let (tx, rx) = unbounded();
        let id = self.subscribe(move |event| {
            let _ = tx.send(event.clone());
        });
        (id, rx)
    }

    /// Validate the configuration, record the baseline and start polling.
    ///
    /// The baseline scan runs before this returns, so files that exist at
    /// start never produce events.
    pub fn start(&mut self) -> Result<(), MonitorError> {
        if self.worker.is_some() {
            return Err(MonitorError::AlreadyRunning);
        }
        let interval = validate_interval(self.interval_secs)?;

        let mut detector = ChangeDetector::new(&self.root)?;
        let tracked = detector.baseline()?;
        info!(
            root = %detector.root().display(),
            interval_secs = self.interval_secs,
            tracked,
            "file system monitor started"
        );

        let cancel = Arc::new(AtomicBool::new(false));
        let registry = Arc::clone(&self.registry);
        let progress = self.progress.clone();
        let thread_cancel = Arc::clone(&cancel);

        let handle = thread::Builder::new()
            .name("fs-monitor".into())
            .spawn(move || {
                poll_loop(&mut detector, interval, &thread_cancel, &registry, progress.as_ref());
                detector.clear();
            })
            .map_err(|e| MonitorError::io(&self.root, e))?;

        self.worker = Some(Worker { cancel, handle });
        Ok(())
    }

    /// Stop polling and drop the snapshot.
    ///
    /// Blocks until the polling thread observes the request, which happens at
    /// the next quantum boundary or once an in-flight listener returns.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        worker.cancel.store(true, Ordering::SeqCst);
        if worker.handle.join().is_err() {
            warn!("file system monitor thread panicked");
        }
        debug!(root = %self.root.display(), "file system monitor stopped");
    }
}

impl Drop for FileSystemMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn poll_loop(
    detector: &mut ChangeDetector,
    interval: Duration,
    cancel: &AtomicBool,
    registry: &ListenerRegistry,
    progress: Option<&ProgressCallback>,
) {
    let mut last_poll = Instant::now();

    while !cancel.load(Ordering::SeqCst) {
        if last_poll.elapsed() >= interval {
            last_poll = Instant::now();
            match detector.poll() {
                Ok(events) => {
                    for event in &events {
                        debug!(%event, "change detected");
                        registry.dispatch(event);
                    }
                    if let Some(report) = progress {
                        report(MonitorProgress::Polled {
                            at: Local::now(),
                            changes: events.len(),
                        });
                    }
                }
                Err(e) => {
                    warn!(error = %e, "poll cycle failed");
                    if let Some(report) = progress {
                        report(MonitorProgress::Failed(e.to_string()));
                    }
                }
            }
        }

        thread::sleep(POLL_QUANTUM);
    }
}
