use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::Mutex;

use crate::types::types::{
    DownloadHandle, FailureReason, ObserverId, UpdateOutcome, UpdateRequest, UpdateState,
};
use crate::update::artifact::{parse_download_url, UpdaterConfig};
use crate::update::download_service::{CompletionObserver, DownloadService};
use crate::update::installer::Installer;

pub type OutcomeCallback = Box<dyn FnOnce(UpdateOutcome) + Send + 'static>;

/// Drives one self-update at a time through
/// `Idle → Requesting → Downloading → Resolving → Installing → Idle`.
///
/// # Outcome delivery
///
/// Every `start()` call gets exactly one `UpdateOutcome`:
///
/// | Path                                   | Outcome                          |
/// |----------------------------------------|----------------------------------|
/// | malformed URL                          | `Failed(InvalidUrl)`             |
/// | another update not yet finished        | `Failed(AlreadyInProgress)`      |
/// | enqueue / observer registration fails  | `Failed(DownloadServiceError)`   |
/// | finished download has no artifact      | `Failed(ArtifactMissing)`        |
/// | installer could not be launched        | `Failed(InstallDispatchError)`   |
/// | service or installer panicked          | `Failed(Unknown)`                |
/// | installer launched                     | `Installing`                     |
/// | `cancel()` before the install dispatch | `Cancelled`                      |
///
/// Dropping the `start()` future before it returns abandons that attempt:
/// its callback is dropped unrun and the orchestrator goes back to `Idle`.
///
/// A second `start()` while one is in flight is rejected rather than
/// superseding the first: the running download is visible to the user and is
/// never abandoned silently.
///
/// State, active handle, observer registration and the pending callback sit
/// behind one lock. The callback is taken by whichever terminal path gets
/// there first, so a completion racing `cancel()` yields one outcome.
pub struct UpdateOrchestrator {
    shared: Arc<Shared>,
}

struct Shared {
    service: Arc<dyn DownloadService>,
    installer: Arc<dyn Installer>,
    config: UpdaterConfig,
    inner: Mutex<Inner>,
}

struct Inner {
    state: UpdateState,
    handle: DownloadHandle,
    registration: Option<ObserverId>,
    on_outcome: Option<OutcomeCallback>,
    /// Bumped on every accepted `start()`; lets the completion handler notice
    /// that the attempt it was working on has been cancelled meanwhile.
    attempt: u64,
}

impl Inner {
    /// Back to `Idle`, handing out the pending callback (if still pending).
    fn finish(&mut self) -> Option<OutcomeCallback> {
        self.state = UpdateState::Idle;
        self.handle = DownloadHandle::NONE;
        self.registration = None;
        self.on_outcome.take()
    }
}

impl UpdateOrchestrator {
    pub fn new(
        service: Arc<dyn DownloadService>,
        installer: Arc<dyn Installer>,
        config: UpdaterConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                service,
                installer,
                config,
                inner: Mutex::new(Inner {
                    state: UpdateState::Idle,
                    handle: DownloadHandle::NONE,
                    registration: None,
                    on_outcome: None,
                    attempt: 0,
                }),
            }),
        }
    }

    pub fn config(&self) -> &UpdaterConfig {
        &self.shared.config
    }

    pub async fn state(&self) -> UpdateState {
        self.shared.inner.lock().await.state
    }

    /// Handle of the running download, or `DownloadHandle::NONE`.
    pub async fn active_handle(&self) -> DownloadHandle {
        self.shared.inner.lock().await.handle
    }

    /// Starts downloading `request`. Returns once the download is enqueued
    /// (or rejected); the outcome arrives later through `on_outcome`.
    pub async fn start<F>(&self, request: UpdateRequest, on_outcome: F)
    where
        F: FnOnce(UpdateOutcome) + Send + 'static,
    {
        let url = match parse_download_url(&request.download_url) {
            Ok(url) => url,
            Err(reason) => {
                log::warn!("[orchestrator] rejecting update: {}", reason);
                on_outcome(UpdateOutcome::Failed(FailureReason::InvalidUrl));
                return;
            }
        };

        let shared = &self.shared;
        let mut inner = shared.inner.lock().await;
        if inner.state != UpdateState::Idle {
            drop(inner);
            log::warn!(
                "[orchestrator] update to {} rejected: another update is in progress",
                request.version_label
            );
            on_outcome(UpdateOutcome::Failed(FailureReason::AlreadyInProgress));
            return;
        }

        inner.state = UpdateState::Requesting;
        inner.attempt += 1;
        let guard = StartGuard {
            shared: Arc::downgrade(shared),
            attempt: inner.attempt,
            armed: true,
        };

        // The observer goes in before the download is enqueued so that even
        // an instant completion is seen. It cannot act before we release the
        // lock, by which point the handle is recorded.
        let listener = Arc::new(CompletionListener {
            shared: Arc::downgrade(shared),
        });
        let registered = AssertUnwindSafe(shared.service.register_observer(listener))
            .catch_unwind()
            .await;
        match registered {
            Ok(Ok(id)) => inner.registration = Some(id),
            Ok(Err(e)) => {
                inner.finish();
                drop(inner);
                guard.defuse();
                log::error!("[orchestrator] could not register completion observer: {}", e);
                on_outcome(UpdateOutcome::Failed(FailureReason::DownloadServiceError));
                return;
            }
            Err(_) => {
                inner.finish();
                drop(inner);
                guard.defuse();
                log::error!("[orchestrator] download service panicked registering the observer");
                on_outcome(UpdateOutcome::Failed(FailureReason::Unknown));
                return;
            }
        }

        let download = shared.config.download_request(url, &request.version_label);
        let enqueued = AssertUnwindSafe(shared.service.enqueue(&download))
            .catch_unwind()
            .await;
        let handle = match enqueued {
            Ok(Ok(handle)) => handle,
            failed => {
                if let Some(id) = inner.registration.take() {
                    shared.unregister_quietly(id).await;
                }
                inner.finish();
                drop(inner);
                guard.defuse();
                let reason = match failed {
                    Ok(Err(e)) => {
                        log::error!("[orchestrator] download service refused {}: {}", download.url, e);
                        FailureReason::DownloadServiceError
                    }
                    _ => {
                        log::error!("[orchestrator] download service panicked enqueueing {}", download.url);
                        FailureReason::Unknown
                    }
                };
                on_outcome(UpdateOutcome::Failed(reason));
                return;
            }
        };

        log::info!(
            "[orchestrator] downloading {} as {} ({})",
            download.url,
            download.destination_name,
            handle
        );
        inner.handle = handle;
        inner.on_outcome = Some(Box::new(on_outcome));
        inner.state = UpdateState::Downloading;
        guard.defuse();
    }

    /// Abandons the running update, if any. Delivers `Cancelled` to the
    /// pending callback. Never fails; service errors are only logged.
    pub async fn cancel(&self) {
        let shared = &self.shared;
        let mut inner = shared.inner.lock().await;
        if inner.state == UpdateState::Idle {
            log::debug!("[orchestrator] cancel ignored: no update in progress");
            return;
        }

        let handle = inner.handle;
        let registration = inner.registration.take();
        log::info!("[orchestrator] cancelling update {} in state {:?}", handle, inner.state);

        if !handle.is_none() {
            match AssertUnwindSafe(shared.service.cancel(handle)).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::warn!("[orchestrator] could not remove download {}: {}", handle, e),
                Err(_) => log::error!("[orchestrator] download service panicked removing {}", handle),
            }
        }
        if let Some(id) = registration {
            shared.unregister_quietly(id).await;
        }

        let on_outcome = inner.finish();
        drop(inner);

        if let Some(on_outcome) = on_outcome {
            on_outcome(UpdateOutcome::Cancelled);
        }
    }
}

impl Shared {
    async fn unregister_quietly(&self, id: ObserverId) {
        match AssertUnwindSafe(self.service.unregister_observer(id))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::warn!("[orchestrator] could not unregister observer {:?}: {}", id, e),
            Err(_) => log::error!("[orchestrator] download service panicked unregistering {:?}", id),
        }
    }

    /// Cleans up after a `start()` future that was dropped mid-flight.
    async fn abandon_start(&self, attempt: u64) {
        let mut inner = self.inner.lock().await;
        if inner.attempt != attempt || inner.state != UpdateState::Requesting {
            return;
        }
        log::warn!("[orchestrator] start() dropped before the download was queued");
        if let Some(id) = inner.registration.take() {
            self.unregister_quietly(id).await;
        }
        inner.finish();
    }

    async fn handle_completion(&self, delivered: DownloadHandle) {
        // Phase 1: claim the notification and drop the observer.
        let attempt = {
            let mut inner = self.inner.lock().await;
            if inner.state != UpdateState::Downloading || inner.handle != delivered {
                log::debug!("[orchestrator] ignoring completion of unrelated download {}", delivered);
                return;
            }
            inner.state = UpdateState::Resolving;
            if let Some(id) = inner.registration.take() {
                self.unregister_quietly(id).await;
            }
            inner.attempt
        };

        // Phase 2: resolve without holding the lock so cancel() stays responsive.
        let resolved = AssertUnwindSafe(self.service.resolve_artifact_uri(delivered))
            .catch_unwind()
            .await;

        // Phase 3: dispatch, unless cancel() won in the meantime.
        let mut inner = self.inner.lock().await;
        if inner.attempt != attempt || inner.state != UpdateState::Resolving {
            log::info!("[orchestrator] update {} was cancelled while resolving", delivered);
            return;
        }

        let outcome = match resolved {
            Ok(Ok(Some(artifact))) => {
                inner.state = UpdateState::Installing;
                let dispatched = AssertUnwindSafe(
                    self.installer
                        .open_with_installer(&artifact, &self.config.mime_type),
                )
                .catch_unwind()
                .await;
                match dispatched {
                    Ok(Ok(())) => {
                        log::info!("[orchestrator] installer opened for {}", artifact);
                        UpdateOutcome::Installing
                    }
                    Ok(Err(e)) => {
                        log::error!("[orchestrator] install dispatch failed for {}: {}", artifact, e);
                        UpdateOutcome::Failed(FailureReason::InstallDispatchError)
                    }
                    Err(_) => {
                        log::error!("[orchestrator] installer panicked opening {}", artifact);
                        UpdateOutcome::Failed(FailureReason::Unknown)
                    }
                }
            }
            Ok(Ok(None)) => {
                log::error!("[orchestrator] download {} finished without an artifact", delivered);
                UpdateOutcome::Failed(FailureReason::ArtifactMissing)
            }
            Ok(Err(e)) => {
                log::error!("[orchestrator] could not resolve artifact of {}: {}", delivered, e);
                UpdateOutcome::Failed(FailureReason::ArtifactMissing)
            }
            Err(_) => {
                log::error!("[orchestrator] download service panicked resolving {}", delivered);
                UpdateOutcome::Failed(FailureReason::Unknown)
            }
        };

        let on_outcome = inner.finish();
        drop(inner);

        if let Some(on_outcome) = on_outcome {
            on_outcome(outcome);
        }
    }
}

/// Completion observer registered for one attempt. Holds the orchestrator
/// weakly so a late notification after the orchestrator is gone is a no-op.
struct CompletionListener {
    shared: Weak<Shared>,
}

#[async_trait]
impl CompletionObserver for CompletionListener {
    async fn on_download_complete(&self, handle: DownloadHandle) {
        match self.shared.upgrade() {
            Some(shared) => shared.handle_completion(handle).await,
            None => log::debug!("[orchestrator] dropped; ignoring completion of {}", handle),
        }
    }
}

/// Armed for the duration of `start()`. If the future is dropped while the
/// attempt is still `Requesting`, cleanup is handed to a spawned task since
/// `Drop` cannot await the lock.
struct StartGuard {
    shared: Weak<Shared>,
    attempt: u64,
    armed: bool,
}

impl StartGuard {
    fn defuse(mut self) {
        self.armed = false;
    }
}

impl Drop for StartGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let attempt = self.attempt;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move { shared.abandon_start(attempt).await });
            }
            Err(_) => log::warn!("[orchestrator] start() dropped outside a runtime; call cancel() to reset"),
        }
    }
}
