//! In-memory radio used by tests and `run --simulate`.
//!
//! Scan results are scripted with [`SimulatedRadio::set_scan_results`] and
//! the networks a station can join are listed with
//! [`SimulatedRadio::add_network`]. Every trait call is recorded so tests can
//! assert on the exact teardown and bring-up sequence, and any call kind can
//! be made to fail with [`SimulatedRadio::fail_on`].

use std::collections::HashMap;
use std::mem::{self, Discriminant};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::{
    AddressAssignmentStatus, Radio, RadioEvent, RadioEventSender, RadioParams, Role, emit,
};
use crate::error::{ProvisionerError, Result};
use crate::scan::NetworkRecord;

/// One recorded call on a [`SimulatedRadio`].
#[derive(Debug, Clone, PartialEq)]
pub enum RadioCall {
    Initialize,
    Deinitialize,
    Configure(RadioParams),
    Start,
    Stop,
    RequestScan,
    ConnectToConfiguredTarget,
}

impl RadioCall {
    fn operation(&self) -> &'static str {
        match self {
            RadioCall::Initialize => "initialize",
            RadioCall::Deinitialize => "deinitialize",
            RadioCall::Configure(_) => "configure",
            RadioCall::Start => "start",
            RadioCall::Stop => "stop",
            RadioCall::RequestScan => "scan",
            RadioCall::ConnectToConfiguredTarget => "connect",
        }
    }
}

#[derive(Default)]
struct SimState {
    initialized: bool,
    started: bool,
    params: Option<RadioParams>,
    connected: bool,
    scripted_results: Vec<NetworkRecord>,
    last_scan: Vec<NetworkRecord>,
    reachable: HashMap<String, String>,
    failing: Vec<Discriminant<RadioCall>>,
    address_delay: u32,
    calls: Vec<RadioCall>,
}

pub struct SimulatedRadio {
    state: Mutex<SimState>,
    events: RadioEventSender,
}

impl SimulatedRadio {
    pub fn new(events: RadioEventSender) -> Self {
        Self {
            state: Mutex::new(SimState::default()),
            events,
        }
    }

    /// Results the next completed scan will report, in this order.
    pub fn set_scan_results(&self, records: Vec<NetworkRecord>) {
        self.lock().scripted_results = records;
    }

    /// Makes `ssid` joinable with `password`.
    pub fn add_network(&self, ssid: &str, password: &str) {
        self.lock()
            .reachable
            .insert(ssid.to_string(), password.to_string());
    }

    /// Makes every later call of the same kind as `call` fail. The
    /// parameters of a `Configure` call are ignored.
    pub fn fail_on(&self, call: RadioCall) {
        self.lock().failing.push(mem::discriminant(&call));
    }

    /// The next `checks` address-assignment queries of a running access
    /// point report `Init`.
    pub fn delay_address_assignment(&self, checks: u32) {
        self.lock().address_delay = checks;
    }

    /// Delivers `event` as if the radio had raised it.
    pub fn inject(&self, event: RadioEvent) {
        emit(&self.events, event);
    }

    /// Drops the station link, as when the target network goes away.
    pub fn drop_station_link(&self) {
        let was_connected = mem::replace(&mut self.lock().connected, false);
        if was_connected {
            emit(&self.events, RadioEvent::RoleDisconnected(Role::Station));
        }
    }

    pub fn calls(&self) -> Vec<RadioCall> {
        self.lock().calls.clone()
    }

    pub fn is_started(&self) -> bool {
        self.lock().started
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        // A panic while holding the lock only happens in a failing test.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, call: RadioCall) -> Result<MutexGuard<'_, SimState>> {
        let mut state = self.lock();
        let fails = state.failing.contains(&mem::discriminant(&call));
        let operation = call.operation();
        state.calls.push(call);
        if fails {
            return Err(ProvisionerError::Radio {
                operation,
                reason: "simulated failure".to_string(),
            });
        }
        Ok(state)
    }
}

#[async_trait]
impl Radio for SimulatedRadio {
    async fn initialize(&self) -> Result<()> {
        self.record(RadioCall::Initialize)?.initialized = true;
        Ok(())
    }

    async fn deinitialize(&self) -> Result<()> {
        let mut state = self.record(RadioCall::Deinitialize)?;
        state.initialized = false;
        state.started = false;
        state.params = None;
        Ok(())
    }

    async fn configure(&self, params: &RadioParams) -> Result<()> {
        let mut state = self.record(RadioCall::Configure(params.clone()))?;
        if !state.initialized {
            return Err(ProvisionerError::RadioNotInitialized);
        }
        state.params = Some(params.clone());
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        let role = {
            let mut state = self.record(RadioCall::Start)?;
            if !state.initialized {
                return Err(ProvisionerError::RadioNotInitialized);
            }
            let role = state
                .params
                .as_ref()
                .map(RadioParams::role)
                .ok_or_else(|| ProvisionerError::Radio {
                    operation: "start",
                    reason: "no role configured".to_string(),
                })?;
            state.started = true;
            role
        };
        emit(&self.events, RadioEvent::RoleStarted(role));
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let lost_link = {
            let mut state = self.record(RadioCall::Stop)?;
            state.started = false;
            mem::replace(&mut state.connected, false)
        };
        if lost_link {
            emit(&self.events, RadioEvent::RoleDisconnected(Role::Station));
        }
        Ok(())
    }

    async fn request_scan(&self) -> Result<()> {
        {
            let mut state = self.record(RadioCall::RequestScan)?;
            if !state.started {
                return Err(ProvisionerError::RadioNotStarted);
            }
            state.last_scan = state.scripted_results.clone();
        }
        emit(&self.events, RadioEvent::ScanCompleted);
        Ok(())
    }

    async fn connect_to_configured_target(&self) -> Result<()> {
        let joined = {
            let mut state = self.record(RadioCall::ConnectToConfiguredTarget)?;
            if !state.started {
                return Err(ProvisionerError::RadioNotStarted);
            }
            let Some(RadioParams::Station(cred)) = state.params.clone() else {
                return Err(ProvisionerError::RadioNotConfigured(Role::Station));
            };
            let joined = state.reachable.get(&cred.ssid) == Some(&cred.password);
            state.connected = joined;
            joined
        };

        let event = if joined {
            RadioEvent::StationConnected
        } else {
            RadioEvent::RoleDisconnected(Role::Station)
        };
        emit(&self.events, event);
        Ok(())
    }

    async fn scan_result_count(&self) -> Result<usize> {
        Ok(self.lock().last_scan.len())
    }

    async fn scan_results(&self, max: usize, buf: &mut Vec<NetworkRecord>) -> Result<()> {
        let state = self.lock();
        buf.extend(state.last_scan.iter().take(max).cloned());
        Ok(())
    }

    async fn address_assignment_status(&self) -> Result<AddressAssignmentStatus> {
        let mut state = self.lock();
        let ap_running =
            state.started && matches!(state.params, Some(RadioParams::AccessPoint(_)));
        Ok(if !ap_running {
            AddressAssignmentStatus::Stopped
        } else if state.address_delay > 0 {
            state.address_delay -= 1;
            AddressAssignmentStatus::Init
        } else {
            AddressAssignmentStatus::Started
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AccessPointConfig;
    use crate::radio::{TargetNetworkCredential, event_channel};

    fn station(ssid: &str, password: &str) -> RadioParams {
        RadioParams::Station(TargetNetworkCredential {
            ssid: ssid.to_string(),
            password: password.to_string(),
        })
    }

    #[tokio::test]
    async fn test_scan_before_start_fails_without_event() {
        // Arrange
        let (tx, mut rx) = event_channel();
        let radio = SimulatedRadio::new(tx);

        // Act
        let result = radio.request_scan().await;

        // Assert
        assert!(matches!(result, Err(ProvisionerError::RadioNotStarted)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_access_point_start_reports_role_and_dhcp() {
        // Arrange
        let (tx, mut rx) = event_channel();
        let radio = SimulatedRadio::new(tx);

        // Act
        radio.initialize().await.unwrap();
        radio
            .configure(&RadioParams::AccessPoint(AccessPointConfig::default()))
            .await
            .unwrap();
        radio.start().await.unwrap();

        // Assert
        assert_eq!(rx.try_recv().unwrap(), RadioEvent::RoleStarted(Role::AccessPoint));
        assert_eq!(
            radio.address_assignment_status().await.unwrap(),
            AddressAssignmentStatus::Started
        );
    }

    #[tokio::test]
    async fn test_station_with_wrong_password_disconnects() {
        // Arrange
        let (tx, mut rx) = event_channel();
        let radio = SimulatedRadio::new(tx);
        radio.add_network("HomeNet", "right");
        radio.initialize().await.unwrap();
        radio.configure(&station("HomeNet", "wrong")).await.unwrap();
        radio.start().await.unwrap();
        let _ = rx.try_recv();

        // Act
        radio.connect_to_configured_target().await.unwrap();

        // Assert
        assert_eq!(rx.try_recv().unwrap(), RadioEvent::RoleDisconnected(Role::Station));
    }

    #[tokio::test]
    async fn test_failing_call_is_recorded_and_reported() {
        // Arrange
        let (tx, mut rx) = event_channel();
        let radio = SimulatedRadio::new(tx);
        radio.fail_on(RadioCall::Configure(station("any", "")));
        radio.initialize().await.unwrap();

        // Act
        let result = radio
            .configure(&RadioParams::AccessPoint(AccessPointConfig::default()))
            .await;

        // Assert
        assert!(matches!(
            result,
            Err(ProvisionerError::Radio {
                operation: "configure",
                ..
            })
        ));
        assert_eq!(radio.calls().len(), 2);
        assert!(matches!(radio.start().await, Err(ProvisionerError::Radio { .. })));
        assert!(rx.try_recv().is_err(), "no role without params");
    }

    #[tokio::test]
    async fn test_delayed_address_assignment_reports_init_first() {
        let (tx, _rx) = event_channel();
        let radio = SimulatedRadio::new(tx);
        radio.delay_address_assignment(1);
        radio.initialize().await.unwrap();
        radio
            .configure(&RadioParams::AccessPoint(AccessPointConfig::default()))
            .await
            .unwrap();
        radio.start().await.unwrap();

        assert_eq!(
            radio.address_assignment_status().await.unwrap(),
            AddressAssignmentStatus::Init
        );
        assert_eq!(
            radio.address_assignment_status().await.unwrap(),
            AddressAssignmentStatus::Started
        );
    }

    #[tokio::test]
    async fn test_scan_results_are_capped_at_max() {
        // Arrange
        let (tx, _rx) = event_channel();
        let radio = SimulatedRadio::new(tx);
        radio.set_scan_results(vec![
            NetworkRecord::new("A", 10, ""),
            NetworkRecord::new("B", 20, ""),
        ]);
        radio.initialize().await.unwrap();
        radio
            .configure(&RadioParams::AccessPoint(AccessPointConfig::default()))
            .await
            .unwrap();
        radio.start().await.unwrap();
        radio.request_scan().await.unwrap();

        // Act
        let mut buf = Vec::new();
        radio.scan_results(1, &mut buf).await.unwrap();

        // Assert
        assert_eq!(radio.scan_result_count().await.unwrap(), 2);
        assert_eq!(buf, vec![NetworkRecord::new("A", 10, "")]);
    }
}
