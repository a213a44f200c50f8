use std::io::ErrorKind;

use async_trait::async_trait;
use reqwest::Url;
use tokio::process::Command;

use crate::types::types::InstallError;

/// Hands a downloaded artifact to whatever installs it on this platform.
///
/// Success means the hand-off happened; the installation itself is not
/// tracked.
#[async_trait]
pub trait Installer: Send + Sync {
    async fn open_with_installer(&self, artifact: &Url, mime_type: &str) -> Result<(), InstallError>;
}

/// Opens the artifact by launching an external program with the artifact's
/// path as its last argument (`xdg-open` by default).
#[derive(Debug, Clone)]
pub struct CommandInstaller {
    program: String,
    args: Vec<String>,
}

impl CommandInstaller {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl Default for CommandInstaller {
    fn default() -> Self {
        Self::new("xdg-open")
    }
}

#[async_trait]
impl Installer for CommandInstaller {
    async fn open_with_installer(&self, artifact: &Url, mime_type: &str) -> Result<(), InstallError> {
        let path = artifact
            .to_file_path()
            .map_err(|_| InstallError::NotAFile(artifact.to_string()))?;

        log::info!(
            "[installer] opening {} ({}) with {}",
            path.display(),
            mime_type,
            self.program
        );

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(&path)
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound | ErrorKind::PermissionDenied => {
                    InstallError::NoHandler(format!("{}: {}", self.program, e))
                }
                _ => InstallError::Io(e),
            })?;

        // Reap the child in the background; its exit status is informational.
        let program = self.program.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if status.success() => {
                    log::debug!("[installer] {} exited cleanly", program)
                }
                Ok(status) => log::warn!("[installer] {} exited with {}", program, status),
                Err(e) => log::warn!("[installer] could not wait for {}: {}", program, e),
            }
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact() -> Url {
        Url::from_file_path("/tmp/glowlink-2.0.apk").unwrap()
    }

    #[tokio::test]
    async fn launches_program_with_artifact_path() {
        let installer = CommandInstaller::new("true");
        assert!(installer
            .open_with_installer(&artifact(), "application/octet-stream")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn extra_args_go_before_artifact() {
        let installer = CommandInstaller::new("sh").with_arg("-c").with_arg("exit 0");
        assert_eq!(installer.program(), "sh");
        assert!(installer
            .open_with_installer(&artifact(), "application/octet-stream")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn missing_program_means_no_handler() {
        let installer = CommandInstaller::new("glowlink-no-such-installer");
        let err = installer
            .open_with_installer(&artifact(), "application/octet-stream")
            .await
            .unwrap_err();
        assert!(matches!(err, InstallError::NoHandler(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn remote_artifact_is_rejected() {
        let installer = CommandInstaller::default();
        let url = Url::parse("https://example.com/app.apk").unwrap();
        let err = installer
            .open_with_installer(&url, "application/octet-stream")
            .await
            .unwrap_err();
        assert!(matches!(err, InstallError::NotAFile(_)));
    }
}
