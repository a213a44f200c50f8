//! Naming and validation for update artifacts.
//!
//! The destination file name is a pure function of the app name and the
//! version label, so re-downloading an unchanged version overwrites the
//! previous artifact instead of piling up copies.

use reqwest::Url;

use crate::types::types::DownloadRequest;

/// MIME type handed to the installer together with the artifact.
pub const PACKAGE_MIME_TYPE: &str = "application/vnd.android.package-archive";

/// Static settings for the update pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdaterConfig {
    pub app_name: String,
    pub artifact_extension: String,
    pub mime_type: String,
    /// Shown by download services that display progress to the user.
    pub title: String,
}

impl UpdaterConfig {
    pub fn new(app_name: impl Into<String>) -> Self {
        let app_name = app_name.into();
        Self {
            title: format!("{} Update", app_name),
            app_name,
            artifact_extension: "apk".to_string(),
            mime_type: PACKAGE_MIME_TYPE.to_string(),
        }
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.artifact_extension = extension.into();
        self
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    /// `"<app-name>-<version>.<ext>"`, with every unsafe character replaced.
    pub fn artifact_name(&self, version_label: &str) -> String {
        let stem = sanitise_component(&format!("{}-{}", self.app_name, version_label));
        let ext = sanitise_component(self.artifact_extension.trim_start_matches('.'));
        if ext.is_empty() {
            stem
        } else {
            format!("{}.{}", stem, ext)
        }
    }

    pub fn download_request(&self, url: Url, version_label: &str) -> DownloadRequest {
        DownloadRequest {
            url,
            destination_name: self.artifact_name(version_label),
            title: self.title.clone(),
            description: format!("Downloading version {}", version_label),
            mime_type: self.mime_type.clone(),
        }
    }
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self::new("glowlink")
    }
}

/// Parses a release download URL. Only absolute `http`/`https` URLs with a
/// host are accepted.
pub fn parse_download_url(raw: &str) -> Result<Url, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("empty download URL".to_string());
    }
    let url = Url::parse(trimmed).map_err(|e| format!("{}: {}", trimmed, e))?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(format!("unsupported scheme {:?}", other)),
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(format!("{}: missing host", trimmed));
    }
    Ok(url)
}

/// Keeps a single path component safe: no separators, no traversal, no
/// whitespace.
fn sanitise_component(raw: &str) -> String {
    let replaced: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '+') {
                c
            } else {
                '_'
            }
        })
        .collect();

    // A name made only of dots would mean "here" or "parent".
    if replaced.chars().all(|c| c == '.') {
        replaced.replace('.', "_")
    } else {
        replaced
    }
}
