use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;

use super::observer::ProgressObserver;
use super::snapshot::{ProgressEvent, ProgressSnapshot};
use crate::types::types::DownloadHandle;

/// EMA smoothing factor. 0.3 = responsive but stable.
const EMA_ALPHA: f64 = 0.3;

/// Consumes `Result<ProgressEvent, String>` from one download task, folds the
/// events into a `ProgressSnapshot` and fans it out to every observer.
///
/// # Lifecycle
///
/// | Channel message          | Observer method called          |
/// |--------------------------|---------------------------------|
/// | `Ok(ProgressEvent)`      | `on_progress(&snapshot)`        |
/// | `Err(String)`            | `on_error(&msg)` then stops     |
/// | closed after `complete()`| `on_complete(&final_snapshot)`  |
/// | closed otherwise         | nothing (cancelled)             |
pub struct ProgressNotifier {
    observers: Vec<Arc<dyn ProgressObserver>>,
    snapshot: ProgressSnapshot,
    last_update: Instant,
    start_time: Instant,
}

/// Sending half handed to the download task.
#[derive(Clone)]
pub struct ProgressSender {
    tx: mpsc::Sender<Result<ProgressEvent, String>>,
    completed: Arc<AtomicBool>,
}

impl ProgressSender {
    /// Best effort: a full channel drops the event rather than stalling I/O.
    pub fn report(&self, event: ProgressEvent) {
        let _ = self.tx.try_send(Ok(event));
    }

    pub async fn fail(&self, error: String) {
        let _ = self.tx.send(Err(error)).await;
    }

    /// Marks the download as finished; observers get `on_complete` once the
    /// last sender is dropped.
    pub fn complete(&self) {
        self.completed.store(true, Ordering::SeqCst);
    }
}

impl ProgressNotifier {
    pub fn new(handle: DownloadHandle, observers: Vec<Arc<dyn ProgressObserver>>) -> Self {
        let now = Instant::now();
        Self {
            observers,
            snapshot: ProgressSnapshot::empty(handle),
            last_update: now,
            start_time: now,
        }
    }

    /// Creates the channel pair: the sender goes to the download task, the
    /// notifier is `run()` on its own task.
    pub fn channel(
        handle: DownloadHandle,
        observers: Vec<Arc<dyn ProgressObserver>>,
    ) -> (ProgressSender, ProgressNotifierTask) {
        let (tx, rx) = mpsc::channel(256);
        let completed = Arc::new(AtomicBool::new(false));
        (
            ProgressSender {
                tx,
                completed: completed.clone(),
            },
            ProgressNotifierTask {
                notifier: Self::new(handle, observers),
                rx,
                completed,
            },
        )
    }

    /// Fold one event into the running snapshot.
    fn handle_event(&mut self, ev: ProgressEvent) -> ProgressSnapshot {
        let now = Instant::now();
        let snap = &mut self.snapshot;

        snap.bytes_downloaded += ev.bytes_delta;
        if snap.total_bytes.is_none() {
            snap.total_bytes = ev.total_bytes;
        }

        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        if elapsed > 0.0 {
            let instant_speed = ev.bytes_delta as f64 / elapsed;
            snap.speed = EMA_ALPHA * instant_speed + (1.0 - EMA_ALPHA) * snap.speed;
            self.last_update = now;
        }

        snap.eta_secs = match snap.total_bytes {
            Some(total) if snap.speed > 0.0 => {
                total.saturating_sub(snap.bytes_downloaded) as f64 / snap.speed
            }
            _ => 0.0,
        };

        snap.clone()
    }

    /// Final snapshot with `done = true` and the average speed.
    fn final_snapshot(&self) -> ProgressSnapshot {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        let mut snap = self.snapshot.clone();
        snap.done = true;
        snap.eta_secs = 0.0;
        snap.speed = if elapsed > 0.0 {
            snap.bytes_downloaded as f64 / elapsed
        } else {
            0.0
        };
        snap
    }
}

/// A notifier bound to its receiving channel.
pub struct ProgressNotifierTask {
    notifier: ProgressNotifier,
    rx: mpsc::Receiver<Result<ProgressEvent, String>>,
    completed: Arc<AtomicBool>,
}

impl ProgressNotifierTask {
    /// Drain progress messages until every sender is gone or an error arrives.
    pub async fn run(mut self) {
        while let Some(msg) = self.rx.recv().await {
            match msg {
                Ok(ev) => {
                    let snapshot = self.notifier.handle_event(ev);
                    for observer in &self.notifier.observers {
                        observer.on_progress(&snapshot).await;
                    }
                }
                Err(error) => {
                    for observer in &self.notifier.observers {
                        observer.on_error(&error).await;
                    }
                    return;
                }
            }
        }

        if self.completed.load(Ordering::SeqCst) {
            let snapshot = self.notifier.final_snapshot();
            for observer in &self.notifier.observers {
                observer.on_complete(&snapshot).await;
            }
        }
    }
}
