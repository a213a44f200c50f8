#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::Url;
use tokio::sync::Notify;

use glowlink_core::device::device_client::{DeviceClient, DeviceConnector};
use glowlink_core::types::types::{
    ColorRgb, DeviceError, DownloadHandle, DownloadRequest, InstallError, ObserverId, ServiceError,
    UpdateOutcome,
};
use glowlink_core::update::download_service::{CompletionObserver, DownloadService};
use glowlink_core::update::installer::Installer;

// ---------------------------------------------------------------
// Outcome recording
// ---------------------------------------------------------------

/// Returns a shared list and a callback that appends to it.
pub fn recorder<T: Send + 'static>() -> (Arc<Mutex<Vec<T>>>, impl FnOnce(T) + Send + 'static) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    (seen, move |value| sink.lock().unwrap().push(value))
}

pub fn outcomes(seen: &Arc<Mutex<Vec<UpdateOutcome>>>) -> Vec<UpdateOutcome> {
    seen.lock().unwrap().clone()
}

// ---------------------------------------------------------------
// FakeDownloadService
// ---------------------------------------------------------------

#[derive(Default)]
struct FakeState {
    next_handles: VecDeque<i64>,
    enqueue_error: bool,
    register_error: bool,
    cancel_error: bool,
    stall_enqueue: bool,
    panic_on_resolve: bool,
    enqueued: Vec<DownloadRequest>,
    resolved: Vec<DownloadHandle>,
    cancelled: Vec<DownloadHandle>,
    artifacts: HashMap<DownloadHandle, Url>,
    observers: HashMap<ObserverId, Arc<dyn CompletionObserver>>,
    next_observer: u64,
    registrations: usize,
    unregistrations: usize,
    unregister_errors: usize,
}

/// Scriptable in-memory `DownloadService`. Completion is only announced when
/// the test calls `deliver`.
#[derive(Default)]
pub struct FakeDownloadService {
    state: Mutex<FakeState>,
    /// When set, `resolve_artifact_uri` waits for `release_resolve`.
    resolve_gate: Mutex<Option<Arc<Notify>>>,
    resolve_entered: Notify,
}

impl FakeDownloadService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn returning_handles(handles: &[i64]) -> Arc<Self> {
        let service = Self::default();
        service.state.lock().unwrap().next_handles = handles.iter().copied().collect();
        Arc::new(service)
    }

    pub fn fail_enqueue(&self) {
        self.state.lock().unwrap().enqueue_error = true;
    }

    pub fn fail_register(&self) {
        self.state.lock().unwrap().register_error = true;
    }

    pub fn fail_cancel(&self) {
        self.state.lock().unwrap().cancel_error = true;
    }

    /// Makes `enqueue` never return.
    pub fn stall_enqueue(&self) {
        self.state.lock().unwrap().stall_enqueue = true;
    }

    pub fn panic_on_resolve(&self) {
        self.state.lock().unwrap().panic_on_resolve = true;
    }

    pub fn set_artifact(&self, handle: i64, uri: &str) {
        self.state
            .lock()
            .unwrap()
            .artifacts
            .insert(DownloadHandle(handle), Url::parse(uri).unwrap());
    }

    /// Makes the next resolve calls block until `release_resolve`.
    pub fn hold_resolve(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.resolve_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Waits until some task is inside `resolve_artifact_uri`.
    pub async fn resolve_started(&self) {
        self.resolve_entered.notified().await;
    }

    /// Announces completion of `handle` to every registered observer.
    pub async fn deliver(&self, handle: i64) {
        let observers: Vec<Arc<dyn CompletionObserver>> =
            self.state.lock().unwrap().observers.values().cloned().collect();
        for observer in observers {
            observer.on_download_complete(DownloadHandle(handle)).await;
        }
    }

    pub fn enqueued(&self) -> Vec<DownloadRequest> {
        self.state.lock().unwrap().enqueued.clone()
    }

    pub fn resolved(&self) -> Vec<DownloadHandle> {
        self.state.lock().unwrap().resolved.clone()
    }

    pub fn cancelled(&self) -> Vec<DownloadHandle> {
        self.state.lock().unwrap().cancelled.clone()
    }

    pub fn registrations(&self) -> usize {
        self.state.lock().unwrap().registrations
    }

    pub fn unregistrations(&self) -> usize {
        self.state.lock().unwrap().unregistrations
    }

    pub fn unregister_errors(&self) -> usize {
        self.state.lock().unwrap().unregister_errors
    }

    pub fn live_observers(&self) -> usize {
        self.state.lock().unwrap().observers.len()
    }

    /// Registration bookkeeping is balanced and nothing was unregistered twice.
    pub fn assert_observers_balanced(&self) {
        let state = self.state.lock().unwrap();
        assert_eq!(
            state.registrations, state.unregistrations,
            "every registration must be paired with one unregistration"
        );
        assert_eq!(state.unregister_errors, 0, "observer unregistered twice");
        assert!(state.observers.is_empty(), "observer leaked");
    }
}

#[async_trait]
impl DownloadService for FakeDownloadService {
    async fn enqueue(&self, request: &DownloadRequest) -> Result<DownloadHandle, ServiceError> {
        let stall = self.state.lock().unwrap().stall_enqueue;
        if stall {
            std::future::pending::<()>().await;
        }
        let mut state = self.state.lock().unwrap();
        if state.enqueue_error {
            return Err(ServiceError::Rejected("storage unavailable".to_string()));
        }
        state.enqueued.push(request.clone());
        let next = state
            .next_handles
            .pop_front()
            .unwrap_or(state.enqueued.len() as i64);
        Ok(DownloadHandle(next))
    }

    async fn resolve_artifact_uri(
        &self,
        handle: DownloadHandle,
    ) -> Result<Option<Url>, ServiceError> {
        let panics = {
            let mut state = self.state.lock().unwrap();
            state.resolved.push(handle);
            state.panic_on_resolve
        };
        if panics {
            panic!("resolver bug");
        }
        let gate = self.resolve_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            self.resolve_entered.notify_one();
            gate.notified().await;
        }
        Ok(self.state.lock().unwrap().artifacts.get(&handle).cloned())
    }

    async fn cancel(&self, handle: DownloadHandle) -> Result<(), ServiceError> {
        let mut state = self.state.lock().unwrap();
        state.cancelled.push(handle);
        if state.cancel_error {
            return Err(ServiceError::UnknownHandle(handle));
        }
        Ok(())
    }

    async fn register_observer(
        &self,
        observer: Arc<dyn CompletionObserver>,
    ) -> Result<ObserverId, ServiceError> {
        let mut state = self.state.lock().unwrap();
        if state.register_error {
            return Err(ServiceError::Rejected("receiver limit reached".to_string()));
        }
        state.next_observer += 1;
        let id = ObserverId(state.next_observer);
        state.observers.insert(id, observer);
        state.registrations += 1;
        Ok(id)
    }

    async fn unregister_observer(&self, id: ObserverId) -> Result<(), ServiceError> {
        let mut state = self.state.lock().unwrap();
        if state.observers.remove(&id).is_some() {
            state.unregistrations += 1;
            Ok(())
        } else {
            state.unregister_errors += 1;
            Err(ServiceError::UnknownObserver(id))
        }
    }
}

// ---------------------------------------------------------------
// FakeInstaller
// ---------------------------------------------------------------

#[derive(Default)]
pub struct FakeInstaller {
    pub dispatched: Mutex<Vec<(Url, String)>>,
    fail: Mutex<bool>,
    panics: Mutex<bool>,
}

impl FakeInstaller {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        let installer = Self::default();
        *installer.fail.lock().unwrap() = true;
        Arc::new(installer)
    }

    pub fn panicking() -> Arc<Self> {
        let installer = Self::default();
        *installer.panics.lock().unwrap() = true;
        Arc::new(installer)
    }

    pub fn dispatched(&self) -> Vec<(Url, String)> {
        self.dispatched.lock().unwrap().clone()
    }
}

#[async_trait]
impl Installer for FakeInstaller {
    async fn open_with_installer(&self, artifact: &Url, mime_type: &str) -> Result<(), InstallError> {
        if *self.panics.lock().unwrap() {
            panic!("installer bug");
        }
        if *self.fail.lock().unwrap() {
            return Err(InstallError::NoHandler("no package installer".to_string()));
        }
        self.dispatched
            .lock()
            .unwrap()
            .push((artifact.clone(), mime_type.to_string()));
        Ok(())
    }
}

// ---------------------------------------------------------------
// FakeConnector / FakeDevice
// ---------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCall {
    Connect(String, u16, i32),
    SetColor(ColorRgb, i32, u32),
    Disconnect,
}

/// How the next connection behaves.
pub enum Script {
    Connects,
    ConnectsButNotConnected,
    ConnectFails(DeviceError),
    SetColorFails,
    Panics,
}

pub struct FakeConnector {
    script: Mutex<Script>,
    pub calls: Arc<Mutex<Vec<DeviceCall>>>,
}

impl FakeConnector {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
            calls: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn calls(&self) -> Vec<DeviceCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, wanted: fn(&DeviceCall) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| wanted(c)).count()
    }
}

#[async_trait]
impl DeviceConnector for FakeConnector {
    async fn connect(
        &self,
        host: &str,
        port: u16,
        priority: i32,
    ) -> Result<Box<dyn DeviceClient>, DeviceError> {
        self.calls
            .lock()
            .unwrap()
            .push(DeviceCall::Connect(host.to_string(), port, priority));

        let script = std::mem::replace(&mut *self.script.lock().unwrap(), Script::Connects);
        let (connected, fail_set_color) = match script {
            Script::Connects => (true, false),
            Script::ConnectsButNotConnected => (false, false),
            Script::SetColorFails => (true, true),
            Script::ConnectFails(e) => return Err(e),
            Script::Panics => panic!("driver bug"),
        };
        Ok(Box::new(FakeDevice {
            connected,
            fail_set_color,
            calls: self.calls.clone(),
        }))
    }
}

struct FakeDevice {
    connected: bool,
    fail_set_color: bool,
    calls: Arc<Mutex<Vec<DeviceCall>>>,
}

#[async_trait]
impl DeviceClient for FakeDevice {
    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn set_color(
        &mut self,
        color: ColorRgb,
        priority: i32,
        duration_ms: u32,
    ) -> Result<(), DeviceError> {
        self.calls
            .lock()
            .unwrap()
            .push(DeviceCall::SetColor(color, priority, duration_ms));
        if self.fail_set_color {
            Err(DeviceError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "socket closed",
            )))
        } else {
            Ok(())
        }
    }

    async fn disconnect(&mut self) -> Result<(), DeviceError> {
        self.calls.lock().unwrap().push(DeviceCall::Disconnect);
        self.connected = false;
        Ok(())
    }
}
