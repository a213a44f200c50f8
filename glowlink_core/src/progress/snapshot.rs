use serde::Serialize;

use crate::types::types::DownloadHandle;

/// Raw progress report sent by a download task for every chunk it writes.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub handle: DownloadHandle,
    pub bytes_delta: u64,
    /// Content length announced by the server, when there was one.
    pub total_bytes: Option<u64>,
}

/// Aggregate progress of one download.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub handle: DownloadHandle,
    pub bytes_downloaded: u64,
    pub total_bytes: Option<u64>,
    /// Bytes per second, smoothed.
    pub speed: f64,
    pub eta_secs: f64,
    pub done: bool,
}

impl ProgressSnapshot {
    pub fn empty(handle: DownloadHandle) -> Self {
        Self {
            handle,
            bytes_downloaded: 0,
            total_bytes: None,
            speed: 0.0,
            eta_secs: 0.0,
            done: false,
        }
    }
}

/// Human-readable byte formatting.
pub fn format_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = 1024.0 * 1024.0;
    const GB: f64 = 1024.0 * 1024.0 * 1024.0;

    let b = bytes as f64;
    if b >= GB {
        format!("{:.2} GB", b / GB)
    } else if b >= MB {
        format!("{:.2} MB", b / MB)
    } else if b >= KB {
        format!("{:.1} KB", b / KB)
    } else {
        format!("{} B", bytes)
    }
}
