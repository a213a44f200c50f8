//! Client for the lighting server's line-delimited JSON command port.
//!
//! Every command is one JSON object terminated by `\n`; the server answers
//! each with one JSON line carrying a `success` flag.

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::device::device_client::{DeviceClient, DeviceConnector};
use crate::types::types::{ColorRgb, DeviceError};

/// Bound on name lookup plus TCP connect.
pub const CONNECT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Bound on writing one command and on reading its reply, each.
pub const IO_TIMEOUT: Duration = Duration::from_secs(2);

const DEFAULT_ORIGIN: &str = "glowlink";

#[derive(Serialize)]
struct ColorCommand<'a> {
    command: &'static str,
    color: [u8; 3],
    priority: i32,
    duration: u32,
    origin: &'a str,
}

#[derive(Deserialize)]
struct Reply {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct JsonDeviceConnector {
    origin: String,
    connect_timeout: Duration,
    io_timeout: Duration,
}

impl JsonDeviceConnector {
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            connect_timeout: CONNECT_TIMEOUT,
            io_timeout: IO_TIMEOUT,
        }
    }

    pub fn with_timeouts(mut self, connect: Duration, io: Duration) -> Self {
        self.connect_timeout = connect;
        self.io_timeout = io;
        self
    }

    async fn open(&self, host: &str, port: u16) -> Result<TcpStream, DeviceError> {
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| DeviceError::NameResolution(format!("{}: {}", host, e)))?
            .collect();
        if addrs.is_empty() {
            return Err(DeviceError::NameResolution(host.to_string()));
        }

        TcpStream::connect(&addrs[..]).await.map_err(|e| match e.kind() {
            ErrorKind::ConnectionRefused => {
                DeviceError::ConnectionRefused(format!("{}:{}", host, port))
            }
            _ => DeviceError::Io(e),
        })
    }
}

impl Default for JsonDeviceConnector {
    fn default() -> Self {
        Self::new(DEFAULT_ORIGIN)
    }
}

#[async_trait]
impl DeviceConnector for JsonDeviceConnector {
    async fn connect(
        &self,
        host: &str,
        port: u16,
        priority: i32,
    ) -> Result<Box<dyn DeviceClient>, DeviceError> {
        // Covers name lookup as well as the connect.
        let stream = timeout(self.connect_timeout, self.open(host, port))
            .await
            .map_err(|_| DeviceError::Timeout)??;
        stream.set_nodelay(true)?;

        // No registration on this port; priority is sent with each command.
        log::debug!("[json_client] connected to {}:{} for priority {}", host, port, priority);
        Ok(Box::new(JsonDeviceClient::new(
            stream,
            self.origin.clone(),
            self.io_timeout,
        )))
    }
}

pub struct JsonDeviceClient {
    stream: Option<BufReader<TcpStream>>,
    origin: String,
    io_timeout: Duration,
}

impl JsonDeviceClient {
    pub fn new(stream: TcpStream, origin: String, io_timeout: Duration) -> Self {
        Self {
            stream: Some(BufReader::new(stream)),
            origin,
            io_timeout,
        }
    }
}

#[async_trait]
impl DeviceClient for JsonDeviceClient {
    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn set_color(
        &mut self,
        color: ColorRgb,
        priority: i32,
        duration_ms: u32,
    ) -> Result<(), DeviceError> {
        let stream = self.stream.as_mut().ok_or(DeviceError::NotConnected)?;

        let command = ColorCommand {
            command: "color",
            color: [color.red, color.green, color.blue],
            priority,
            duration: duration_ms,
            origin: &self.origin,
        };
        let mut line = serde_json::to_vec(&command)?;
        line.push(b'\n');
        timeout(self.io_timeout, stream.get_mut().write_all(&line))
            .await
            .map_err(|_| DeviceError::Timeout)??;

        let mut reply = String::new();
        let read = timeout(self.io_timeout, stream.read_line(&mut reply))
            .await
            .map_err(|_| DeviceError::Timeout)??;
        if read == 0 {
            return Err(DeviceError::Rejected("connection closed before reply".to_string()));
        }

        let reply: Reply = serde_json::from_str(reply.trim())?;
        if reply.success {
            Ok(())
        } else {
            Err(DeviceError::Rejected(
                reply.error.unwrap_or_else(|| "no reason given".to_string()),
            ))
        }
    }

    async fn disconnect(&mut self) -> Result<(), DeviceError> {
        if let Some(mut stream) = self.stream.take() {
            timeout(self.io_timeout, stream.get_mut().shutdown())
                .await
                .map_err(|_| DeviceError::Timeout)??;
            log::debug!("[json_client] disconnected");
        }
        Ok(())
    }
}
