//! The radio collaborator seam.
//!
//! The controller never talks to hardware directly. It drives a [`Radio`]
//! implementation and reacts to the [`RadioEvent`]s that implementation
//! emits on the channel created by [`event_channel`].
//!
//! Two backends exist:
//!
//! - [`nmcli::NmcliRadio`] drives a Linux WiFi device through NetworkManager.
//! - [`simulated::SimulatedRadio`] keeps everything in memory for tests and
//!   for `run --simulate`.

use std::fmt;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::AccessPointConfig;
use crate::error::Result;
use crate::scan::NetworkRecord;

pub mod nmcli;
pub mod simulated;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    AccessPoint,
    Station,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::AccessPoint => f.write_str("access point"),
            Role::Station => f.write_str("station"),
        }
    }
}

/// Network identifier plus secret submitted by an operator.
///
/// Consumed by a single station transition; never stored.
#[derive(Clone, PartialEq, Eq)]
pub struct TargetNetworkCredential {
    pub ssid: String,
    pub password: String,
}

impl fmt::Debug for TargetNetworkCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetNetworkCredential")
            .field("ssid", &self.ssid)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Role-specific configuration applied by [`Radio::configure`].
#[derive(Debug, Clone, PartialEq)]
pub enum RadioParams {
    AccessPoint(AccessPointConfig),
    Station(TargetNetworkCredential),
}

impl RadioParams {
    pub fn role(&self) -> Role {
        match self {
            RadioParams::AccessPoint(_) => Role::AccessPoint,
            RadioParams::Station(_) => Role::Station,
        }
    }
}

/// State of the DHCP-like service that hands out addresses in AP role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressAssignmentStatus {
    Init,
    Started,
    Stopped,
}

/// Lifecycle events produced by a radio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    RoleStarted(Role),
    RoleDisconnected(Role),
    /// The station associated with its target and obtained an address.
    StationConnected,
    ScanCompleted,
}

pub type RadioEventSender = mpsc::UnboundedSender<RadioEvent>;
pub type RadioEventReceiver = mpsc::UnboundedReceiver<RadioEvent>;

pub fn event_channel() -> (RadioEventSender, RadioEventReceiver) {
    mpsc::unbounded_channel()
}

/// Operations the controller needs from a radio.
///
/// `start`, `request_scan` and `connect_to_configured_target` complete
/// asynchronously from the radio's point of view: their outcome is reported
/// through [`RadioEvent`]s, not through the returned `Result`, which only
/// covers whether the request was accepted.
#[async_trait]
pub trait Radio: Send + Sync {
    async fn initialize(&self) -> Result<()>;

    async fn deinitialize(&self) -> Result<()>;

    async fn configure(&self, params: &RadioParams) -> Result<()>;

    async fn start(&self) -> Result<()>;

    /// Stopping a radio that is not started is not an error.
    async fn stop(&self) -> Result<()>;

    /// Fails with [`crate::ProvisionerError::RadioNotStarted`] after teardown.
    async fn request_scan(&self) -> Result<()>;

    async fn connect_to_configured_target(&self) -> Result<()>;

    async fn scan_result_count(&self) -> Result<usize>;

    /// Appends at most `max` records of the last completed scan to `buf`.
    async fn scan_results(&self, max: usize, buf: &mut Vec<NetworkRecord>) -> Result<()>;

    async fn address_assignment_status(&self) -> Result<AddressAssignmentStatus>;
}

/// Sends `event`, logging instead of failing once the controller is gone.
pub(crate) fn emit(events: &RadioEventSender, event: RadioEvent) {
    if events.send(event.clone()).is_err() {
        tracing::debug!("radio event {event:?} dropped: controller stopped");
    }
}
