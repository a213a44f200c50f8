use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Mutex;

use glowlink_core::progress::observer::ProgressObserver;
use glowlink_core::progress::snapshot::{format_bytes, ProgressSnapshot};

/// Renders the update download as a single indicatif bar.
///
/// The bar is created lazily on the first snapshot, as a byte bar when the
/// server announced a length and as a spinner otherwise.
pub struct TerminalProgressObserver {
    bar: Mutex<Option<ProgressBar>>,
}

impl TerminalProgressObserver {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn with_bar(&self, snapshot: &ProgressSnapshot, f: impl FnOnce(&ProgressBar)) {
        let mut bar = match self.bar.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let pb = bar.get_or_insert_with(|| new_bar(snapshot.total_bytes));
        f(pb);
    }
}

fn new_bar(total_bytes: Option<u64>) -> ProgressBar {
    match total_bytes {
        Some(total) => {
            let pb = ProgressBar::new(total.max(1));
            if let Ok(style) = ProgressStyle::with_template(
                "Update [{bar:30.green/white}] {bytes}/{total_bytes} ({binary_bytes_per_sec}) ETA {eta} {msg}",
            ) {
                pb.set_style(style.progress_chars("=>-"));
            }
            pb
        }
        None => {
            let pb = ProgressBar::new_spinner();
            if let Ok(style) = ProgressStyle::with_template("Update {spinner} {bytes} ({binary_bytes_per_sec}) {msg}") {
                pb.set_style(style);
            }
            pb
        }
    }
}

#[async_trait]
impl ProgressObserver for TerminalProgressObserver {
    async fn on_progress(&self, snapshot: &ProgressSnapshot) {
        self.with_bar(snapshot, |pb| pb.set_position(snapshot.bytes_downloaded));
    }

    async fn on_complete(&self, snapshot: &ProgressSnapshot) {
        self.with_bar(snapshot, |pb| {
            pb.set_position(snapshot.bytes_downloaded);
            pb.finish_with_message(format!(
                "{} at {}/s",
                format_bytes(snapshot.bytes_downloaded),
                format_bytes(snapshot.speed as u64)
            ));
        });
    }

    async fn on_error(&self, error: &str) {
        let bar = match self.bar.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(pb) = bar.as_ref() {
            pb.abandon_with_message(format!("Failed: {}", error));
        }
    }
}
