use async_trait::async_trait;
use super::snapshot::ProgressSnapshot;

/// Trait for anything that wants to follow an update download as it runs.
///
/// The `ProgressNotifier` calls these methods on all registered observers
/// after turning raw `ProgressEvent`s into a `ProgressSnapshot`.
///
/// Lifecycle:
/// - `on_progress` is called for every chunk written to disk.
/// - `on_complete` is called once when the body has been fully written.
/// - `on_error` is called once when the download fails. A cancelled download
///   gets neither `on_complete` nor `on_error`.
#[async_trait]
pub trait ProgressObserver: Send + Sync + 'static {
    async fn on_progress(&self, snapshot: &ProgressSnapshot);

    async fn on_complete(&self, snapshot: &ProgressSnapshot);

    async fn on_error(&self, error: &str);
}
