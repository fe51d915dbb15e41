//! The provisioning state machine.
//!
//! A single task drains two channels: lifecycle events raised by the radio
//! and intents submitted by the configurator. Handling is strictly
//! sequential, so a role transition runs to completion before the next input
//! is looked at and the machine's own fields need no locking.
//!
//! ```text
//! Idle -> AccessPointPending -> AccessPointActive -> StationPending
//!              ^                                          |
//!              |                                          v
//!              +------------- StationFailed <------ StationActive
//! ```
//!
//! Every transition bumps an epoch. A role only counts as started once the
//! radio reports `RoleStarted` during the current epoch, and station
//! disconnects are only acted on for that role. Disconnects produced while a
//! role is being torn down therefore never trigger a second fallback.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::DiscoveryCache;
use crate::config::{Config, StationMode};
use crate::error::Result;
use crate::orchestrator::{RoleOrchestrator, RoleTarget, Services};
use crate::radio::{
    AddressAssignmentStatus, Radio, RadioEvent, RadioEventReceiver, Role, TargetNetworkCredential,
};
use crate::scanner::Scanner;
use crate::server::{CommandServer, ServerRunState};

const INTENT_QUEUE: usize = 16;

/// How often a started access point is asked again whether addresses are
/// being handed out.
const ADDRESS_RECHECK: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningState {
    Idle,
    AccessPointPending,
    AccessPointActive,
    StationPending,
    StationActive,
    StationFailed,
}

impl fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Requests raised by the configurator on behalf of an operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Scan,
    Connect(TargetNetworkCredential),
}

/// Externally visible snapshot of the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionerStatus {
    pub state: ProvisioningState,
    pub epoch: u64,
    /// Where the configurator listens, while it runs.
    pub server_addr: Option<SocketAddr>,
    /// Configurator instances started so far.
    pub server_starts: u64,
    /// SSID of the network the station role is joining or has joined.
    pub target_ssid: Option<String>,
}

enum Input {
    Radio(RadioEvent),
    Intent(Intent),
    AddressRecheck,
    Shutdown,
}

pub struct Provisioner {
    config: Config,
    radio: Arc<dyn Radio>,
    orchestrator: RoleOrchestrator,
    scanner: Arc<Scanner>,
    cache: Arc<DiscoveryCache>,
    services: Services,
    radio_events: RadioEventReceiver,
    intents_tx: mpsc::Sender<Intent>,
    intents_rx: mpsc::Receiver<Intent>,
    status_tx: watch::Sender<ProvisionerStatus>,
    state: ProvisioningState,
    epoch: u64,
    started_epoch: Option<(Role, u64)>,
    server_starts: u64,
    target_ssid: Option<String>,
    /// Failed address-assignment checks since the access point started.
    address_checks: Option<u32>,
}

impl Provisioner {
    pub fn new(config: Config, radio: Arc<dyn Radio>, radio_events: RadioEventReceiver) -> Self {
        let (intents_tx, intents_rx) = mpsc::channel(INTENT_QUEUE);
        let (status_tx, _) = watch::channel(ProvisionerStatus {
            state: ProvisioningState::Idle,
            epoch: 0,
            server_addr: None,
            server_starts: 0,
            target_ssid: None,
        });

        Self {
            orchestrator: RoleOrchestrator::new(Arc::clone(&radio), config.access_point.clone()),
            scanner: Arc::new(Scanner::new(Arc::clone(&radio), config.scanner.interval())),
            cache: Arc::new(DiscoveryCache::new(config.scanner.cache_lock_wait())),
            services: Services::default(),
            config,
            radio,
            radio_events,
            intents_tx,
            intents_rx,
            status_tx,
            state: ProvisioningState::Idle,
            epoch: 0,
            started_epoch: None,
            server_starts: 0,
            target_ssid: None,
            address_checks: None,
        }
    }

    pub fn status(&self) -> watch::Receiver<ProvisionerStatus> {
        self.status_tx.subscribe()
    }

    pub fn cache(&self) -> Arc<DiscoveryCache> {
        Arc::clone(&self.cache)
    }

    pub fn intents(&self) -> mpsc::Sender<Intent> {
        self.intents_tx.clone()
    }

    /// Brings up the access point and processes inputs until `shutdown`
    /// fires.
    ///
    /// Returns an error when a role transition or the configurator's bind
    /// fails; the caller decides whether to restart.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        let outcome = self.drive(&shutdown).await;

        self.services.shutdown().await;
        if let Err(e) = self.radio.stop().await {
            warn!("stopping radio on exit: {e}");
        }
        info!("provisioner stopped in state {}", self.state);
        outcome
    }

    async fn drive(&mut self, shutdown: &CancellationToken) -> Result<()> {
        self.startup().await?;

        loop {
            match self.next_input(shutdown).await {
                Input::Radio(event) => self.on_radio_event(event).await?,
                Input::Intent(intent) => self.on_intent(intent).await?,
                Input::AddressRecheck => self.on_address_recheck().await?,
                Input::Shutdown => return Ok(()),
            }
        }
    }

    async fn next_input(&mut self, shutdown: &CancellationToken) -> Input {
        let awaiting_address = self.address_checks.is_some();
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => Input::Shutdown,
            event = self.radio_events.recv() => match event {
                Some(event) => Input::Radio(event),
                None => {
                    error!("radio event channel closed");
                    Input::Shutdown
                }
            },
            Some(intent) = self.intents_rx.recv() => Input::Intent(intent),
            _ = tokio::time::sleep(ADDRESS_RECHECK), if awaiting_address => {
                Input::AddressRecheck
            }
        }
    }

    async fn startup(&mut self) -> Result<()> {
        info!("provisioner starting");
        self.begin_transition(ProvisioningState::AccessPointPending, None);
        self.orchestrator
            .transition_to(RoleTarget::AccessPoint, &mut self.services, false)
            .await
    }

    async fn on_radio_event(&mut self, event: RadioEvent) -> Result<()> {
        debug!("radio event {event:?} in state {}", self.state);
        match event {
            RadioEvent::RoleStarted(Role::AccessPoint) => self.on_access_point_started().await,
            RadioEvent::RoleStarted(Role::Station) => self.on_station_started().await,
            RadioEvent::StationConnected => {
                if self.state == ProvisioningState::StationPending
                    && self.started_epoch == Some((Role::Station, self.epoch))
                {
                    info!(
                        "joined '{}'",
                        self.target_ssid.as_deref().unwrap_or_default()
                    );
                    self.set_state(ProvisioningState::StationActive);
                }
                Ok(())
            }
            RadioEvent::RoleDisconnected(Role::Station) => self.on_station_disconnected().await,
            RadioEvent::RoleDisconnected(Role::AccessPoint) => {
                info!("access point stopped");
                Ok(())
            }
            RadioEvent::ScanCompleted => {
                self.on_scan_completed().await;
                Ok(())
            }
        }
    }

    async fn on_access_point_started(&mut self) -> Result<()> {
        if !matches!(
            self.state,
            ProvisioningState::AccessPointPending | ProvisioningState::AccessPointActive
        ) {
            debug!("ignoring access point start in state {}", self.state);
            return Ok(());
        }
        self.started_epoch = Some((Role::AccessPoint, self.epoch));

        if self.services.server_running() {
            error!("access point started again while the configurator is running; ignoring");
            return Ok(());
        }

        self.start_configurator().await
    }

    async fn on_address_recheck(&mut self) -> Result<()> {
        let current_access_point = self.state == ProvisioningState::AccessPointPending
            && self.started_epoch == Some((Role::AccessPoint, self.epoch));
        if !current_access_point || self.services.server_running() {
            self.address_checks = None;
            return Ok(());
        }
        self.start_configurator().await
    }

    /// Starts the configurator and the scanner once addresses are handed
    /// out; otherwise schedules another check.
    async fn start_configurator(&mut self) -> Result<()> {
        let reason = match self.radio.address_assignment_status().await {
            Ok(AddressAssignmentStatus::Started) => None,
            Ok(other) => Some(format!("address assignment is {other:?}")),
            Err(e) => Some(format!("querying address assignment failed: {e}")),
        };
        if let Some(reason) = reason {
            let checks = self.address_checks.map_or(1, |n| n + 1);
            if checks == 1 {
                warn!("{reason}; configurator deferred");
            } else {
                debug!("{reason} (check {checks})");
            }
            self.address_checks = Some(checks);
            return Ok(());
        }
        self.address_checks = None;

        let server = CommandServer::bind(
            self.config.server.clone(),
            Arc::clone(&self.cache),
            self.intents_tx.clone(),
            ServerRunState::new(),
        )?;
        let handle = server.spawn()?;
        info!("configurator reachable on {}", handle.local_addr());
        self.services.server = Some(handle);
        self.server_starts += 1;

        if self.services.scanner.is_none() {
            self.services.scanner = Some(self.scanner.spawn());
        }

        self.set_state(ProvisioningState::AccessPointActive);
        Ok(())
    }

    async fn on_station_started(&mut self) -> Result<()> {
        if self.state != ProvisioningState::StationPending {
            debug!("ignoring station start in state {}", self.state);
            return Ok(());
        }
        self.started_epoch = Some((Role::Station, self.epoch));

        match self.config.station.mode {
            StationMode::StationOnly => {
                if let Err(e) = self.radio.connect_to_configured_target().await {
                    warn!("could not start joining the target network: {e}");
                    return self.fall_back_to_access_point().await;
                }
            }
            StationMode::Combined => {
                info!("combined mode: leaving the join to the radio");
            }
        }
        Ok(())
    }

    async fn on_station_disconnected(&mut self) -> Result<()> {
        let current_station = matches!(
            self.state,
            ProvisioningState::StationPending | ProvisioningState::StationActive
        ) && self.started_epoch == Some((Role::Station, self.epoch));

        if !current_station {
            debug!(
                "station disconnect from an earlier role (state {}, epoch {}); ignoring",
                self.state, self.epoch
            );
            return Ok(());
        }

        warn!(
            "station lost '{}'",
            self.target_ssid.as_deref().unwrap_or_default()
        );
        self.fall_back_to_access_point().await
    }

    async fn fall_back_to_access_point(&mut self) -> Result<()> {
        self.set_state(ProvisioningState::StationFailed);
        self.begin_transition(ProvisioningState::AccessPointPending, None);
        self.orchestrator
            .transition_to(RoleTarget::AccessPoint, &mut self.services, true)
            .await?;
        self.publish();
        Ok(())
    }

    async fn on_scan_completed(&mut self) {
        // The radio is queried before the cache lock is taken.
        let count = match self.radio.scan_result_count().await {
            Ok(count) => count,
            Err(e) => {
                warn!("reading scan result count failed: {e}");
                return;
            }
        };

        let mut records = Vec::new();
        if let Err(e) = records.try_reserve_exact(count) {
            error!("no memory for {count} scan results ({e}); keeping previous results");
            return;
        }
        if let Err(e) = self.radio.scan_results(count, &mut records).await {
            warn!("reading scan results failed: {e}");
            return;
        }

        match self.cache.replace(records).await {
            Ok(generation) => debug!("scan results stored as generation {generation}"),
            Err(e) => warn!("storing scan results failed: {e}"),
        }
    }

    async fn on_intent(&mut self, intent: Intent) -> Result<()> {
        match intent {
            Intent::Scan => {
                if let Err(e) = self.scanner.scan_now().await {
                    warn!("requested scan failed: {e}");
                }
                Ok(())
            }
            Intent::Connect(credential) => {
                if self.state != ProvisioningState::AccessPointActive {
                    warn!(
                        "credentials for '{}' arrived in state {}; ignoring",
                        credential.ssid, self.state
                    );
                    return Ok(());
                }
                info!("switching to station role for '{}'", credential.ssid);
                self.begin_transition(
                    ProvisioningState::StationPending,
                    Some(credential.ssid.clone()),
                );
                self.orchestrator
                    .transition_to(RoleTarget::Station(credential), &mut self.services, true)
                    .await?;
                self.publish();
                Ok(())
            }
        }
    }

    fn begin_transition(&mut self, state: ProvisioningState, target_ssid: Option<String>) {
        self.epoch += 1;
        self.started_epoch = None;
        self.address_checks = None;
        self.target_ssid = target_ssid;
        self.set_state(state);
    }

    fn set_state(&mut self, state: ProvisioningState) {
        if self.state != state {
            info!("state {} -> {} (epoch {})", self.state, state, self.epoch);
        }
        self.state = state;
        self.publish();
    }

    fn publish(&self) {
        self.status_tx.send_replace(ProvisionerStatus {
            state: self.state,
            epoch: self.epoch,
            server_addr: self.services.server_addr().filter(|_| self.services.server_running()),
            server_starts: self.server_starts,
            target_ssid: self.target_ssid.clone(),
        });
    }
}
