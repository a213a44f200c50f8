use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Url;
use tokio::sync::Mutex;

use crate::types::types::{DownloadHandle, DownloadRequest, ObserverId, ServiceError};

/// Something that fetches artifacts in the background and announces when a
/// download has finished.
///
/// Completion is announced to every registered [`CompletionObserver`], which
/// may therefore see handles it did not enqueue. Implementations must not
/// hold internal locks while calling observers, and must not call observers
/// from inside `enqueue`: observers are allowed to call back into the service.
#[async_trait]
pub trait DownloadService: Send + Sync {
    /// Starts fetching `request.url` into `request.destination_name`.
    async fn enqueue(&self, request: &DownloadRequest) -> Result<DownloadHandle, ServiceError>;

    /// Local URI of the finished artifact, or `None` if there is none.
    async fn resolve_artifact_uri(
        &self,
        handle: DownloadHandle,
    ) -> Result<Option<Url>, ServiceError>;

    /// Stops the download and removes whatever it left on disk.
    async fn cancel(&self, handle: DownloadHandle) -> Result<(), ServiceError>;

    async fn register_observer(
        &self,
        observer: Arc<dyn CompletionObserver>,
    ) -> Result<ObserverId, ServiceError>;

    /// Fails with [`ServiceError::UnknownObserver`] if `id` is not registered,
    /// so callers must pair this with exactly one `register_observer`.
    async fn unregister_observer(&self, id: ObserverId) -> Result<(), ServiceError>;
}

/// Receives "download finished" notifications from a [`DownloadService`].
#[async_trait]
pub trait CompletionObserver: Send + Sync + 'static {
    async fn on_download_complete(&self, handle: DownloadHandle);
}

/// Observer bookkeeping shared by `DownloadService` implementations.
pub struct ObserverRegistry {
    next_id: AtomicU64,
    observers: Mutex<HashMap<ObserverId, Arc<dyn CompletionObserver>>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            observers: Mutex::new(HashMap::new()),
        }
    }

    pub async fn register(&self, observer: Arc<dyn CompletionObserver>) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers.lock().await.insert(id, observer);
        id
    }

    pub async fn unregister(&self, id: ObserverId) -> Result<(), ServiceError> {
        match self.observers.lock().await.remove(&id) {
            Some(_) => Ok(()),
            None => Err(ServiceError::UnknownObserver(id)),
        }
    }

    /// Tells every currently registered observer that `handle` finished.
    ///
    /// The observer list is copied first so observers can unregister
    /// themselves while being notified.
    pub async fn notify(&self, handle: DownloadHandle) {
        let observers: Vec<Arc<dyn CompletionObserver>> =
            self.observers.lock().await.values().cloned().collect();

        log::debug!(
            "[observers] announcing completion of {} to {} observer(s)",
            handle,
            observers.len()
        );
        for observer in observers {
            observer.on_download_complete(handle).await;
        }
    }
}

impl Default for ObserverRegistry {
    fn default() -> Self {
        Self::new()
    }
}
