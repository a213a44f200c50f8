use std::fmt;
use std::str::FromStr;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Update pipeline
// ---------------------------------------------------------------------------

/// Opaque identifier for one download known to a `DownloadService`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DownloadHandle(pub i64);

impl DownloadHandle {
    /// Sentinel meaning "no active download".
    pub const NONE: DownloadHandle = DownloadHandle(-1);

    pub fn is_none(&self) -> bool {
        *self == Self::NONE
    }
}

impl fmt::Display for DownloadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifies one completion observer registered with a `DownloadService`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(pub u64);

/// One update attempt as requested by the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub download_url: String,
    pub version_label: String,
}

impl UpdateRequest {
    pub fn new(download_url: impl Into<String>, version_label: impl Into<String>) -> Self {
        Self {
            download_url: download_url.into(),
            version_label: version_label.into(),
        }
    }
}

/// What the orchestrator hands to `DownloadService::enqueue`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub url: Url,
    /// Bare file name of the artifact, no directory components.
    pub destination_name: String,
    pub title: String,
    pub description: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateState {
    Idle,
    Requesting,
    Downloading,
    Resolving,
    Installing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    InvalidUrl,
    AlreadyInProgress,
    DownloadServiceError,
    ArtifactMissing,
    InstallDispatchError,
    Unknown,
}

/// Terminal value delivered exactly once per `UpdateOrchestrator::start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateOutcome {
    /// The artifact was handed to the installer.
    Installing,
    Cancelled,
    Failed(FailureReason),
}

impl UpdateOutcome {
    /// Short, generic text suitable for a user notification.
    pub fn user_message(&self) -> &'static str {
        match self {
            UpdateOutcome::Installing => "Update downloaded, opening installer",
            UpdateOutcome::Cancelled => "Update cancelled",
            UpdateOutcome::Failed(FailureReason::AlreadyInProgress) => {
                "An update is already being downloaded"
            }
            UpdateOutcome::Failed(_) => "Update failed",
        }
    }
}

// ---------------------------------------------------------------------------
// Connectivity probe
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColorRgb {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl ColorRgb {
    pub const RED: ColorRgb = ColorRgb::new(0xFF, 0x00, 0x00);
    pub const GREEN: ColorRgb = ColorRgb::new(0x00, 0xFF, 0x00);
    pub const BLUE: ColorRgb = ColorRgb::new(0x00, 0x00, 0xFF);
    pub const WHITE: ColorRgb = ColorRgb::new(0xFF, 0xFF, 0xFF);

    pub const fn new(red: u8, green: u8, blue: u8) -> Self {
        Self { red, green, blue }
    }

    /// Builds a colour from a packed `0x??RRGGBB` integer; the top byte is ignored.
    pub const fn from_packed(packed: u32) -> Self {
        Self::new((packed >> 16) as u8, (packed >> 8) as u8, packed as u8)
    }
}

impl fmt::Display for ColorRgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.red, self.green, self.blue)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid colour {0:?}: expected a name or #rrggbb")]
pub struct ColorParseError(pub String);

impl FromStr for ColorRgb {
    type Err = ColorParseError;

    /// Accepts `red`, `green`, `blue`, `white`, `#rrggbb` and `rrggbb`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "red" => return Ok(ColorRgb::RED),
            "green" => return Ok(ColorRgb::GREEN),
            "blue" => return Ok(ColorRgb::BLUE),
            "white" => return Ok(ColorRgb::WHITE),
            _ => {}
        }

        let hex = trimmed.strip_prefix('#').unwrap_or(trimmed);
        if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ColorParseError(s.to_string()));
        }
        u32::from_str_radix(hex, 16)
            .map(ColorRgb::from_packed)
            .map_err(|_| ColorParseError(s.to_string()))
    }
}

/// Input for one connectivity probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeSpec {
    pub host: String,
    pub port: u16,
    pub priority: i32,
    pub color: ColorRgb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeResult {
    Ok,
    HostUnreachable,
    UnknownError,
}

impl ProbeResult {
    pub fn user_message(&self) -> &'static str {
        match self {
            ProbeResult::Ok => "Test colour sent to the lighting server",
            ProbeResult::HostUnreachable => "Lighting server unreachable",
            ProbeResult::UnknownError => "Unknown error while testing the connection",
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("disk I/O error: {0}")]
    Disk(#[from] std::io::Error),

    #[error("unknown download {0}")]
    UnknownHandle(DownloadHandle),

    #[error("observer {0:?} is not registered")]
    UnknownObserver(ObserverId),

    #[error("download cancelled")]
    Cancelled,

    #[error("download service rejected the request: {0}")]
    Rejected(String),
}

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("no installer available: {0}")]
    NoHandler(String),

    #[error("artifact is not a local file: {0}")]
    NotAFile(String),

    #[error("failed to launch installer: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("could not resolve host {0}")]
    NameResolution(String),

    #[error("connection refused by {0}")]
    ConnectionRefused(String),

    #[error("timed out")]
    Timeout,

    #[error("not connected")]
    NotConnected,

    #[error("server rejected command: {0}")]
    Rejected(String),

    #[error("malformed message: {0}")]
    Protocol(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DeviceError {
    /// Whether this failure means the server could not be reached at all.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            DeviceError::NameResolution(_) | DeviceError::ConnectionRefused(_) | DeviceError::Timeout
        )
    }
}
