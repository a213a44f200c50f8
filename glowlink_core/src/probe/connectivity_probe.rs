use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc;

use crate::device::device_client::DeviceConnector;
use crate::dispatch::calling_context::ContextHandle;
use crate::types::types::{ProbeResult, ProbeSpec};

/// How long the test colour stays on the LEDs.
pub const TEST_COLOR_DURATION_MS: u32 = 3000;

pub type ResultCallback = Box<dyn FnOnce(ProbeResult) + Send + 'static>;

struct ProbeJob {
    spec: ProbeSpec,
    reply_to: ContextHandle,
    on_result: ResultCallback,
}

impl ProbeJob {
    fn reply(self, result: ProbeResult) {
        let on_result = self.on_result;
        if !self.reply_to.post(move || on_result(result)) {
            log::debug!(
                "[probe] calling context gone, dropping result {:?} for {}",
                result,
                self.spec.host
            );
        }
    }
}

/// Sends one test colour to a lighting server and reports whether it worked.
///
/// Probes run one after another on a single background worker. `run` never
/// blocks and the result callback always runs on the caller's
/// [`CallingContext`](crate::dispatch::calling_context::CallingContext),
/// never on the worker. A probe cannot be interrupted once started; the
/// device client's own timeouts bound how long it takes.
pub struct ConnectivityProbe {
    jobs: mpsc::UnboundedSender<ProbeJob>,
}

impl ConnectivityProbe {
    /// Spawns the worker on the current tokio runtime.
    pub fn new(connector: Arc<dyn DeviceConnector>) -> Self {
        let (jobs, mut rx) = mpsc::unbounded_channel::<ProbeJob>();

        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let result = AssertUnwindSafe(probe_device(connector.as_ref(), &job.spec))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| {
                        log::error!("[probe] device client panicked while probing {}", job.spec.host);
                        ProbeResult::UnknownError
                    });
                job.reply(result);
            }
            log::debug!("[probe] worker stopped");
        });

        Self { jobs }
    }

    /// Queues a probe of `spec`. `on_result` is posted to `context` exactly
    /// once, unless that context has been torn down by then.
    pub fn run<F>(&self, spec: ProbeSpec, context: &ContextHandle, on_result: F)
    where
        F: FnOnce(ProbeResult) + Send + 'static,
    {
        let job = ProbeJob {
            spec,
            reply_to: context.clone(),
            on_result: Box::new(on_result),
        };

        if job.spec.host.trim().is_empty() {
            log::warn!("[probe] no host given");
            job.reply(ProbeResult::HostUnreachable);
            return;
        }

        if let Err(mpsc::error::SendError(job)) = self.jobs.send(job) {
            log::error!("[probe] worker is gone");
            job.reply(ProbeResult::UnknownError);
        }
    }
}

/// Connects, shows the test colour, disconnects. Runs on the worker.
pub async fn probe_device(connector: &dyn DeviceConnector, spec: &ProbeSpec) -> ProbeResult {
    let mut client = match connector.connect(&spec.host, spec.port, spec.priority).await {
        Ok(client) => client,
        Err(e) if e.is_unreachable() => {
            log::info!("[probe] {}:{} unreachable: {}", spec.host, spec.port, e);
            return ProbeResult::HostUnreachable;
        }
        Err(e) => {
            log::warn!("[probe] connecting to {}:{} failed: {}", spec.host, spec.port, e);
            return ProbeResult::UnknownError;
        }
    };

    if !client.is_connected() {
        log::info!("[probe] {}:{} did not accept the connection", spec.host, spec.port);
        return ProbeResult::HostUnreachable;
    }

    let sent = client
        .set_color(spec.color, spec.priority, TEST_COLOR_DURATION_MS)
        .await;
    if let Err(e) = client.disconnect().await {
        log::warn!("[probe] disconnect from {} failed: {}", spec.host, e);
    }

    match sent {
        Ok(()) => {
            log::info!("[probe] {} shows {} at priority {}", spec.host, spec.color, spec.priority);
            ProbeResult::Ok
        }
        Err(e) => {
            log::warn!("[probe] setting colour on {} failed: {}", spec.host, e);
            ProbeResult::UnknownError
        }
    }
}
