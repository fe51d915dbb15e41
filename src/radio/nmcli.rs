//! NetworkManager-backed radio.
//!
//! Long-running `nmcli` operations (scanning, joining a network) run on
//! spawned tasks and report back through [`RadioEvent`]s, so the controller's
//! event loop never waits on them. Once a station has joined, a link monitor
//! polls `nmcli device show` and reports a lost association.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{
    AddressAssignmentStatus, Radio, RadioEvent, RadioEventSender, RadioParams, Role, emit,
};
use crate::connection::{self, HOTSPOT_CONNECTION};
use crate::error::{ProvisionerError, Result};
use crate::interface::{self, run_nmcli};
use crate::scan::{self, NetworkRecord};

const LINK_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Default)]
struct NmcliState {
    device: Option<String>,
    params: Option<RadioParams>,
    started: bool,
    connected: bool,
    tasks: Vec<JoinHandle<()>>,
}

pub struct NmcliRadio {
    interface: Option<String>,
    events: RadioEventSender,
    state: Arc<Mutex<NmcliState>>,
    last_scan: Arc<Mutex<Vec<NetworkRecord>>>,
}

impl NmcliRadio {
    /// `interface` selects the WiFi device; `None` picks one on initialize.
    pub fn new(interface: Option<String>, events: RadioEventSender) -> Self {
        Self {
            interface,
            events,
            state: Arc::new(Mutex::new(NmcliState::default())),
            last_scan: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, NmcliState> {
        lock(&self.state)
    }

    fn device(&self) -> Result<String> {
        self.lock()
            .device
            .clone()
            .ok_or(ProvisionerError::RadioNotInitialized)
    }

    fn started_device(&self) -> Result<String> {
        let state = self.lock();
        match (&state.device, state.started) {
            (Some(device), true) => Ok(device.clone()),
            (None, _) => Err(ProvisionerError::RadioNotInitialized),
            (Some(_), false) => Err(ProvisionerError::RadioNotStarted),
        }
    }

    fn abort_tasks(&self) {
        for task in self.lock().tasks.drain(..) {
            task.abort();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl Radio for NmcliRadio {
    async fn initialize(&self) -> Result<()> {
        let iface = interface::resolve_interface(self.interface.as_deref()).await?;
        run_nmcli(&["radio", "wifi", "on"]).await?;
        info!("radio initialized on {} (usb: {})", iface.name, iface.is_usb);
        self.lock().device = Some(iface.name);
        Ok(())
    }

    async fn deinitialize(&self) -> Result<()> {
        self.abort_tasks();
        let mut state = self.lock();
        state.device = None;
        state.params = None;
        state.started = false;
        state.connected = false;
        Ok(())
    }

    async fn configure(&self, params: &RadioParams) -> Result<()> {
        let mut state = self.lock();
        if state.device.is_none() {
            return Err(ProvisionerError::RadioNotInitialized);
        }
        state.params = Some(params.clone());
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        let device = self.device()?;
        let params = self
            .lock()
            .params
            .clone()
            .ok_or_else(|| ProvisionerError::Radio {
                operation: "start",
                reason: "no role configured".to_string(),
            })?;

        match &params {
            RadioParams::AccessPoint(ap) => {
                connection::start_hotspot(&device, ap).await?;
                info!("hotspot '{}' up on {device}", ap.ssid);
            }
            RadioParams::Station(_) => {
                run_nmcli(&["device", "set", &device, "managed", "yes"]).await?;
            }
        }

        self.lock().started = true;
        emit(&self.events, RadioEvent::RoleStarted(params.role()));
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.abort_tasks();
        let (device, role, was_connected) = {
            let mut state = self.lock();
            if !state.started {
                return Ok(());
            }
            state.started = false;
            let was_connected = std::mem::replace(&mut state.connected, false);
            (
                state.device.clone(),
                state.params.as_ref().map(RadioParams::role),
                was_connected,
            )
        };

        if let Some(device) = device {
            if let Err(e) = connection::disconnect(&device).await {
                debug!("disconnect on {device}: {e}");
            }
        }
        if role == Some(Role::AccessPoint) {
            if let Err(e) = connection::delete_connection(HOTSPOT_CONNECTION).await {
                debug!("removing hotspot profile: {e}");
            }
        }
        if was_connected {
            emit(&self.events, RadioEvent::RoleDisconnected(Role::Station));
        }
        Ok(())
    }

    async fn request_scan(&self) -> Result<()> {
        let device = self.started_device()?;
        let events = self.events.clone();
        let last_scan = Arc::clone(&self.last_scan);

        let task = tokio::spawn(async move {
            match scan::scan_networks(&device).await {
                Ok(records) => {
                    debug!("scan on {device} found {} networks", records.len());
                    *lock(&last_scan) = records;
                    emit(&events, RadioEvent::ScanCompleted);
                }
                Err(e) => warn!("scan on {device} failed: {e}"),
            }
        });
        let mut state = self.lock();
        state.tasks.retain(|t| !t.is_finished());
        state.tasks.push(task);
        Ok(())
    }

    async fn connect_to_configured_target(&self) -> Result<()> {
        let device = self.started_device()?;
        let Some(RadioParams::Station(cred)) = self.lock().params.clone() else {
            return Err(ProvisionerError::RadioNotConfigured(Role::Station));
        };

        let events = self.events.clone();
        let state = Arc::clone(&self.state);
        let task = tokio::spawn(async move {
            info!("joining '{}' on {device}", cred.ssid);
            if let Err(e) = connection::connect(&device, &cred.ssid, &cred.password).await {
                warn!("joining '{}' failed: {e}", cred.ssid);
                emit(&events, RadioEvent::RoleDisconnected(Role::Station));
                return;
            }
            lock(&state).connected = true;
            emit(&events, RadioEvent::StationConnected);
            monitor_link(&device, &state, &events).await;
        });
        self.lock().tasks.push(task);
        Ok(())
    }

    async fn scan_result_count(&self) -> Result<usize> {
        Ok(lock(&self.last_scan).len())
    }

    async fn scan_results(&self, max: usize, buf: &mut Vec<NetworkRecord>) -> Result<()> {
        buf.extend(lock(&self.last_scan).iter().take(max).cloned());
        Ok(())
    }

    async fn address_assignment_status(&self) -> Result<AddressAssignmentStatus> {
        let device = {
            let state = self.lock();
            let is_ap = matches!(state.params, Some(RadioParams::AccessPoint(_)));
            match (&state.device, state.started && is_ap) {
                (Some(device), true) => device.clone(),
                _ => return Ok(AddressAssignmentStatus::Stopped),
            }
        };

        let status = connection::status(&device).await?;
        let hotspot_active = status.connection.as_deref() == Some(HOTSPOT_CONNECTION);
        Ok(if hotspot_active && status.is_connected() {
            AddressAssignmentStatus::Started
        } else {
            AddressAssignmentStatus::Init
        })
    }
}

/// Polls the station link until it drops, then reports the disconnect.
async fn monitor_link(device: &str, state: &Mutex<NmcliState>, events: &RadioEventSender) {
    let mut ticker = tokio::time::interval(LINK_POLL_INTERVAL);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        match connection::status(device).await {
            Ok(status) if status.is_connected() => continue,
            Ok(status) => info!("link on {device} lost (state {})", status.state),
            Err(e) => warn!("link check on {device} failed: {e}"),
        }
        lock(state).connected = false;
        emit(events, RadioEvent::RoleDisconnected(Role::Station));
        return;
    }
}
