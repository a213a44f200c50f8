use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Url};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::progress::notifier::{ProgressNotifier, ProgressSender};
use crate::progress::observer::ProgressObserver;
use crate::progress::snapshot::ProgressEvent;
use crate::types::types::{DownloadHandle, DownloadRequest, ObserverId, ServiceError};
use crate::update::download_service::{CompletionObserver, DownloadService, ObserverRegistry};

/// Write buffer for the artifact file.
const WRITE_BUFFER_SIZE: usize = 256 * 1024;

/// Finished or failed downloads kept resolvable. Older ones are forgotten
/// (their files stay on disk).
pub const FINISHED_RETENTION: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStatus {
    Running,
    Complete,
    Failed,
}

struct DownloadEntry {
    destination: PathBuf,
    status: DownloadStatus,
    cancel_token: CancellationToken,
}

/// `DownloadService` that streams artifacts over HTTP into a local directory.
///
/// Each `enqueue` spawns one tokio task. The body is written to a uniquely
/// named `.part` file next to the destination and renamed over it once
/// complete, so a previous artifact of the same version is replaced only by
/// a finished one. Finished and failed downloads are both announced to the
/// completion observers; cancelled ones are not.
pub struct HttpDownloadService {
    client: Client,
    download_dir: PathBuf,
    next_handle: AtomicI64,
    downloads: Arc<RwLock<HashMap<DownloadHandle, DownloadEntry>>>,
    observers: Arc<ObserverRegistry>,
    progress_observers: Vec<Arc<dyn ProgressObserver>>,
}

impl HttpDownloadService {
    pub fn new(download_dir: impl AsRef<Path>) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .tcp_nodelay(true)
            .build()?;
        Ok(Self {
            client,
            download_dir: std::path::absolute(download_dir.as_ref())?,
            next_handle: AtomicI64::new(1),
            downloads: Arc::new(RwLock::new(HashMap::new())),
            observers: Arc::new(ObserverRegistry::new()),
            progress_observers: Vec::new(),
        })
    }

    /// Adds a progress observer for every download enqueued afterwards.
    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.progress_observers.push(observer);
        self
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    pub async fn status(&self, handle: DownloadHandle) -> Option<DownloadStatus> {
        self.downloads.read().await.get(&handle).map(|e| e.status)
    }
}

#[async_trait]
impl DownloadService for HttpDownloadService {
    async fn enqueue(&self, request: &DownloadRequest) -> Result<DownloadHandle, ServiceError> {
        if request.destination_name.is_empty()
            || request.destination_name.contains(['/', '\\'])
        {
            return Err(ServiceError::Rejected(format!(
                "bad destination name {:?}",
                request.destination_name
            )));
        }

        tokio::fs::create_dir_all(&self.download_dir).await?;

        let handle = DownloadHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let destination = self.download_dir.join(&request.destination_name);
        let part_path = self
            .download_dir
            .join(format!(".{}.{}.part", request.destination_name, Uuid::new_v4()));
        let cancel_token = CancellationToken::new();

        {
            let mut downloads = self.downloads.write().await;
            prune_finished(&mut downloads);
            downloads.insert(
                handle,
                DownloadEntry {
                    destination: destination.clone(),
                    status: DownloadStatus::Running,
                    cancel_token: cancel_token.clone(),
                },
            );
        }

        log::info!(
            "[http_service] {} ({}): {} -> {}",
            request.title,
            request.description,
            request.url,
            destination.display()
        );

        let (progress, notifier) = ProgressNotifier::channel(handle, self.progress_observers.clone());
        let job = DownloadJob {
            handle,
            client: self.client.clone(),
            url: request.url.clone(),
            part_path,
            destination,
            cancel_token,
            progress,
            downloads: Arc::clone(&self.downloads),
            observers: Arc::clone(&self.observers),
        };
        tokio::spawn(async move {
            let notifier_handle = tokio::spawn(notifier.run());
            job.run(notifier_handle).await;
        });

        Ok(handle)
    }

    async fn resolve_artifact_uri(
        &self,
        handle: DownloadHandle,
    ) -> Result<Option<Url>, ServiceError> {
        let destination = {
            let downloads = self.downloads.read().await;
            match downloads.get(&handle) {
                Some(entry) if entry.status == DownloadStatus::Complete => entry.destination.clone(),
                Some(entry) => {
                    log::debug!("[http_service] {} not resolvable in state {:?}", handle, entry.status);
                    return Ok(None);
                }
                None => return Ok(None),
            }
        };

        if !tokio::fs::try_exists(&destination).await? {
            log::warn!("[http_service] artifact {} vanished", destination.display());
            return Ok(None);
        }
        Ok(Url::from_file_path(&destination).ok())
    }

    async fn cancel(&self, handle: DownloadHandle) -> Result<(), ServiceError> {
        let entry = self
            .downloads
            .write()
            .await
            .remove(&handle)
            .ok_or(ServiceError::UnknownHandle(handle))?;

        entry.cancel_token.cancel();
        if entry.status == DownloadStatus::Complete {
            remove_if_present(&entry.destination).await?;
        }
        log::info!("[http_service] removed download {}", handle);
        Ok(())
    }

    async fn register_observer(
        &self,
        observer: Arc<dyn CompletionObserver>,
    ) -> Result<ObserverId, ServiceError> {
        Ok(self.observers.register(observer).await)
    }

    async fn unregister_observer(&self, id: ObserverId) -> Result<(), ServiceError> {
        self.observers.unregister(id).await
    }
}

/// Everything one download task needs, moved into the task.
struct DownloadJob {
    handle: DownloadHandle,
    client: Client,
    url: Url,
    part_path: PathBuf,
    destination: PathBuf,
    cancel_token: CancellationToken,
    progress: ProgressSender,
    downloads: Arc<RwLock<HashMap<DownloadHandle, DownloadEntry>>>,
    observers: Arc<ObserverRegistry>,
}

impl DownloadJob {
    async fn run(self, notifier_handle: tokio::task::JoinHandle<()>) {
        let result = match self.fetch().await {
            Ok(()) => tokio::fs::rename(&self.part_path, &self.destination)
                .await
                .map_err(ServiceError::Disk),
            Err(e) => Err(e),
        };

        let status = match result {
            Ok(()) => {
                log::info!("[http_service] {} finished: {}", self.handle, self.destination.display());
                self.progress.complete();
                DownloadStatus::Complete
            }
            Err(ServiceError::Cancelled) => {
                log::info!("[http_service] {} cancelled", self.handle);
                DownloadStatus::Failed
            }
            Err(e) => {
                log::error!("[http_service] {} failed: {}", self.handle, e);
                self.progress.fail(e.to_string()).await;
                DownloadStatus::Failed
            }
        };
        if status != DownloadStatus::Complete {
            let _ = remove_if_present(&self.part_path).await;
        }

        // Close the progress channel and let observers finish.
        let DownloadJob {
            handle,
            destination,
            cancel_token,
            progress,
            downloads,
            observers,
            ..
        } = self;
        drop(progress);
        let _ = notifier_handle.await;

        {
            let mut downloads = downloads.write().await;
            match downloads.get_mut(&handle) {
                Some(entry) if !cancel_token.is_cancelled() => entry.status = status,
                _ => {
                    // cancel() got here first; leave nothing behind.
                    if status == DownloadStatus::Complete {
                        let _ = remove_if_present(&destination).await;
                    }
                    return;
                }
            }
        }

        if cancel_token.is_cancelled() {
            return;
        }
        observers.notify(handle).await;
    }

    async fn fetch(&self) -> Result<(), ServiceError> {
        let response = tokio::select! {
            _ = self.cancel_token.cancelled() => return Err(ServiceError::Cancelled),
            response = self.client.get(self.url.clone()).send() => response?,
        };
        let response = response.error_for_status()?;
        let total_bytes = response.content_length();

        let file = tokio::fs::File::create(&self.part_path).await?;
        let mut writer = tokio::io::BufWriter::with_capacity(WRITE_BUFFER_SIZE, file);
        let mut stream = response.bytes_stream();

        loop {
            let chunk = tokio::select! {
                _ = self.cancel_token.cancelled() => return Err(ServiceError::Cancelled),
                chunk = stream.next() => chunk,
            };
            let Some(chunk) = chunk else { break };
            let chunk = chunk?;

            writer.write_all(&chunk).await?;
            self.progress.report(ProgressEvent {
                handle: self.handle,
                bytes_delta: chunk.len() as u64,
                total_bytes,
            });
        }

        writer.flush().await?;
        Ok(())
    }
}

fn prune_finished(downloads: &mut HashMap<DownloadHandle, DownloadEntry>) {
    let mut finished: Vec<DownloadHandle> = downloads
        .iter()
        .filter(|(_, entry)| entry.status != DownloadStatus::Running)
        .map(|(handle, _)| *handle)
        .collect();
    if finished.len() <= FINISHED_RETENTION {
        return;
    }

    // Handles are issued in increasing order, so the smallest are the oldest.
    finished.sort_unstable_by_key(|handle| handle.0);
    let excess = finished.len() - FINISHED_RETENTION;
    for handle in &finished[..excess] {
        downloads.remove(handle);
        log::debug!("[http_service] forgetting finished download {}", handle);
    }
}

async fn remove_if_present(path: &Path) -> Result<(), ServiceError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ServiceError::Disk(e)),
    }
}
