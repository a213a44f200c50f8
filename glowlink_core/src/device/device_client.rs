use async_trait::async_trait;

use crate::types::types::{ColorRgb, DeviceError};

/// Opens connections to a lighting server.
#[async_trait]
pub trait DeviceConnector: Send + Sync {
    /// Connects to `host:port` as a source that will use `priority`.
    /// Protocols with up-front source registration send it here; others
    /// carry it on each command.
    async fn connect(
        &self,
        host: &str,
        port: u16,
        priority: i32,
    ) -> Result<Box<dyn DeviceClient>, DeviceError>;
}

/// One open connection to a lighting server.
#[async_trait]
pub trait DeviceClient: Send {
    fn is_connected(&self) -> bool;

    /// Shows `color` on every LED for `duration_ms` at `priority`.
    async fn set_color(
        &mut self,
        color: ColorRgb,
        priority: i32,
        duration_ms: u32,
    ) -> Result<(), DeviceError>;

    async fn disconnect(&mut self) -> Result<(), DeviceError>;
}
