//! End-to-end tests of the provisioning controller.
//!
//! Each test runs a real [`Provisioner`] against a [`SimulatedRadio`] and
//! talks to the configurator over loopback TCP, exactly as an operator's
//! client would:
//!
//! ```text
//! test ──TCP──> configurator ──Intent──> provisioner ──calls──> SimulatedRadio
//!                                            ^                        |
//!                                            └────── RadioEvent ──────┘
//! ```
//!
//! Progress is observed through the provisioner's status channel rather
//! than by sleeping.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use wifi_provisioner::config::StationMode;
use wifi_provisioner::orchestrator::TransitionStep;
use wifi_provisioner::protocol::{self, UNKNOWN_COMMAND_RESPONSE};
use wifi_provisioner::radio::simulated::{RadioCall, SimulatedRadio};
use wifi_provisioner::radio::{RadioParams, event_channel};
use wifi_provisioner::{
    Config, DiscoveryCache, NetworkRecord, Provisioner, ProvisionerError, ProvisionerStatus,
    ProvisioningState, RadioEvent, Role, TargetNetworkCredential,
};

const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    radio: Arc<SimulatedRadio>,
    cache: Arc<DiscoveryCache>,
    status: watch::Receiver<ProvisionerStatus>,
    shutdown: CancellationToken,
    task: JoinHandle<wifi_provisioner::Result<()>>,
}

fn test_config() -> Config {
    let mut cfg = Config::default();
    cfg.server.bind_address = IpAddr::V4(Ipv4Addr::LOCALHOST);
    cfg.server.port = 0;
    cfg.server.accept_timeout_ms = 50;
    cfg.server.read_timeout_ms = 500;
    cfg.scanner.interval_secs = 3600;
    cfg.scanner.cache_lock_wait_ms = 20;
    cfg
}

fn start_with(cfg: Config, setup: impl FnOnce(&SimulatedRadio)) -> Harness {
    let (events_tx, events_rx) = event_channel();
    let radio = Arc::new(SimulatedRadio::new(events_tx));
    radio.set_scan_results(vec![
        NetworkRecord::new("CafeNet", 40, "WPA2"),
        NetworkRecord::new("HomeNet", 90, "WPA2"),
    ]);
    setup(&radio);

    let provisioner = Provisioner::new(cfg, radio.clone(), events_rx);
    let status = provisioner.status();
    let cache = provisioner.cache();
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(provisioner.run(shutdown.clone()));

    Harness {
        radio,
        cache,
        status,
        shutdown,
        task,
    }
}

fn start(setup: impl FnOnce(&SimulatedRadio)) -> Harness {
    start_with(test_config(), setup)
}

impl Harness {
    async fn wait_until(&mut self, pred: impl FnMut(&ProvisionerStatus) -> bool) -> ProvisionerStatus {
        tokio::time::timeout(WAIT, self.status.wait_for(pred))
            .await
            .expect("timed out waiting for status")
            .expect("provisioner stopped")
            .clone()
    }

    /// Waits for the configurator instance number `starts` and returns its address.
    async fn configurator(&mut self, starts: u64) -> SocketAddr {
        let status = self
            .wait_until(|s| {
                s.state == ProvisioningState::AccessPointActive
                    && s.server_starts == starts
                    && s.server_addr.is_some()
            })
            .await;
        status.server_addr.expect("server address")
    }

    async fn wait_for_networks(&self) {
        tokio::time::timeout(WAIT, async {
            while self.cache.snapshot().await.map_or(true, |set| set.is_empty()) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("scan results never reached the cache");
    }

    /// Waits for the controller to give up on its own.
    async fn outcome(self) -> wifi_provisioner::Result<()> {
        tokio::time::timeout(WAIT, self.task)
            .await
            .expect("provisioner kept running")
            .expect("provisioner task panicked")
    }

    async fn stop(self) {
        self.shutdown.cancel();
        let outcome = tokio::time::timeout(WAIT, self.task)
            .await
            .expect("provisioner did not stop")
            .expect("provisioner task panicked");
        assert!(outcome.is_ok(), "provisioner failed: {outcome:?}");
    }
}

async fn send(addr: SocketAddr, command: &str) -> String {
    protocol::send_command(addr, command, '#', WAIT)
        .await
        .expect("exchange with configurator")
}

fn home_net(password: &str) -> TargetNetworkCredential {
    TargetNetworkCredential {
        ssid: "HomeNet".to_string(),
        password: password.to_string(),
    }
}

#[tokio::test]
async fn test_list_returns_scanned_networks() {
    // Arrange
    let mut h = start(|_| {});
    let addr = h.configurator(1).await;
    h.wait_for_networks().await;

    // Act
    let reply = send(addr, "list").await;

    // Assert
    assert_eq!(reply, "CafeNet,\nHomeNet,\n");
    h.stop().await;
}

#[tokio::test]
async fn test_unknown_command_leaves_state_alone() {
    // Arrange
    let mut h = start(|_| {});
    let addr = h.configurator(1).await;
    let before = h.status.borrow().clone();

    // Act
    let reply = send(addr, "foobar").await;

    // Assert
    assert_eq!(reply, UNKNOWN_COMMAND_RESPONSE);
    assert_eq!(*h.status.borrow(), before);
    assert!(h.radio.is_started());
    h.stop().await;
}

#[tokio::test]
async fn test_scan_command_refreshes_the_cache() {
    // Arrange
    let mut h = start(|_| {});
    let addr = h.configurator(1).await;
    h.wait_for_networks().await;
    h.radio
        .set_scan_results(vec![NetworkRecord::new("NewCafe", 55, "WPA3")]);

    // Act
    let reply = send(addr, "scan").await;

    // Assert
    assert_eq!(reply, "");
    tokio::time::timeout(WAIT, async {
        while send(addr, "list").await != "NewCafe,\n" {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("rescan never reached the list");
    h.stop().await;
}

#[tokio::test]
async fn test_wrong_password_falls_back_to_access_point() {
    // Arrange
    let mut h = start(|radio| radio.add_network("HomeNet", "another-pass"));
    let first = h.configurator(1).await;

    // Act
    let reply = send(first, "connect:HomeNet:s3cr3t!").await;
    let second = h.configurator(2).await;

    // Assert
    assert_eq!(reply, "");
    let status = h.status.borrow().clone();
    assert_eq!(status.epoch, 3, "startup, station attempt, fallback");
    assert!(
        h.radio
            .calls()
            .contains(&RadioCall::Configure(RadioParams::Station(home_net("s3cr3t!"))))
    );
    h.wait_for_networks().await;
    assert_eq!(send(second, "list").await, "CafeNet,\nHomeNet,\n");
    h.stop().await;
}

#[tokio::test]
async fn test_correct_password_reaches_station_active() {
    // Arrange
    let mut h = start(|radio| radio.add_network("HomeNet", "s3cr3t!"));
    let addr = h.configurator(1).await;

    // Act
    send(addr, "connect:HomeNet:s3cr3t!").await;
    let status = h
        .wait_until(|s| s.state == ProvisioningState::StationActive)
        .await;

    // Assert
    assert_eq!(status.server_addr, None);
    assert_eq!(status.target_ssid.as_deref(), Some("HomeNet"));
    assert_eq!(status.server_starts, 1);
    let calls = h.radio.calls();
    let teardown = calls
        .iter()
        .position(|c| *c == RadioCall::Stop)
        .expect("radio was stopped");
    assert_eq!(calls[teardown + 1], RadioCall::Deinitialize);
    assert_eq!(calls.last(), Some(&RadioCall::ConnectToConfiguredTarget));
    h.stop().await;
}

#[tokio::test]
async fn test_losing_station_link_reopens_configurator() {
    // Arrange
    let mut h = start(|radio| radio.add_network("HomeNet", "s3cr3t!"));
    let addr = h.configurator(1).await;
    send(addr, "connect:HomeNet:s3cr3t!").await;
    h.wait_until(|s| s.state == ProvisioningState::StationActive)
        .await;

    // Act
    h.radio.drop_station_link();
    let addr = h.configurator(2).await;

    // Assert
    assert_eq!(send(addr, "foobar").await, UNKNOWN_COMMAND_RESPONSE);
    h.stop().await;
}

#[tokio::test]
async fn test_combined_mode_waits_for_radio_to_join() {
    // Arrange
    let mut cfg = test_config();
    cfg.station.mode = StationMode::Combined;
    let mut h = start_with(cfg, |radio| radio.add_network("HomeNet", "s3cr3t!"));
    let addr = h.configurator(1).await;

    // Act
    send(addr, "connect:HomeNet:s3cr3t!").await;
    h.wait_until(|s| s.state == ProvisioningState::StationPending && s.server_addr.is_none())
        .await;
    h.radio.inject(RadioEvent::StationConnected);
    h.wait_until(|s| s.state == ProvisioningState::StationActive)
        .await;

    // Assert
    assert!(
        !h.radio
            .calls()
            .contains(&RadioCall::ConnectToConfiguredTarget)
    );
    h.stop().await;
}

#[tokio::test]
async fn test_duplicate_access_point_start_keeps_single_configurator() {
    // Arrange
    let mut h = start(|_| {});
    let addr = h.configurator(1).await;
    h.wait_for_networks().await;

    // Act: the marker scan is processed after the injected event
    h.radio.inject(RadioEvent::RoleStarted(Role::AccessPoint));
    h.radio
        .set_scan_results(vec![NetworkRecord::new("Marker", 10, "")]);
    send(addr, "scan").await;
    tokio::time::timeout(WAIT, async {
        while send(addr, "list").await != "Marker,\n" {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("marker scan never arrived");

    // Assert
    let status = h.status.borrow().clone();
    assert_eq!(status.server_starts, 1);
    assert_eq!(status.server_addr, Some(addr));
    assert_eq!(status.state, ProvisioningState::AccessPointActive);
    h.stop().await;
}

#[tokio::test]
async fn test_stale_station_disconnect_is_ignored_in_access_point_role() {
    // Arrange
    let mut h = start(|_| {});
    let addr = h.configurator(1).await;
    let before = h.status.borrow().clone();

    // Act
    h.radio.inject(RadioEvent::RoleDisconnected(Role::Station));
    h.radio
        .set_scan_results(vec![NetworkRecord::new("Marker", 10, "")]);
    send(addr, "scan").await;
    tokio::time::timeout(WAIT, async {
        while send(addr, "list").await != "Marker,\n" {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("marker scan never arrived");

    // Assert
    assert_eq!(*h.status.borrow(), before);
    h.stop().await;
}

#[tokio::test]
async fn test_shutdown_stops_radio_and_configurator() {
    // Arrange
    let mut h = start(|_| {});
    let addr = h.configurator(1).await;
    let radio = h.radio.clone();

    // Act
    h.stop().await;

    // Assert
    assert!(!radio.is_started());
    assert!(tokio::net::TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn test_slow_address_assignment_still_opens_configurator() {
    // Arrange: the first two checks after the access point starts report Init
    let mut h = start(|radio| radio.delay_address_assignment(2));

    // Act
    let addr = h.configurator(1).await;

    // Assert
    assert_eq!(send(addr, "foobar").await, UNKNOWN_COMMAND_RESPONSE);
    h.stop().await;
}

#[tokio::test]
async fn test_radio_initialize_failure_is_returned_from_run() {
    // Arrange
    let h = start(|radio| radio.fail_on(RadioCall::Initialize));

    // Act
    let outcome = h.outcome().await;

    // Assert
    assert!(matches!(
        outcome,
        Err(ProvisionerError::Transition {
            role: Role::AccessPoint,
            step: TransitionStep::Initialize,
            ..
        })
    ));
}

#[tokio::test]
async fn test_station_start_failure_is_returned_from_run() {
    // Arrange
    let mut h = start(|radio| radio.add_network("HomeNet", "s3cr3t!"));
    let addr = h.configurator(1).await;
    h.radio.fail_on(RadioCall::Start);

    // Act
    send(addr, "connect:HomeNet:s3cr3t!").await;
    let outcome = h.outcome().await;

    // Assert
    assert!(matches!(
        outcome,
        Err(ProvisionerError::Transition {
            role: Role::Station,
            step: TransitionStep::Start,
            ..
        })
    ));
}

#[tokio::test]
async fn test_configurator_port_in_use_is_returned_from_run() {
    // Arrange
    let occupied = tokio::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
        .await
        .expect("bind placeholder");
    let mut cfg = test_config();
    cfg.server.port = occupied.local_addr().unwrap().port();
    let h = start_with(cfg, |_| {});
    let radio = h.radio.clone();

    // Act
    let outcome = h.outcome().await;

    // Assert
    assert!(matches!(outcome, Err(ProvisionerError::Bind { .. })));
    assert!(!radio.is_started(), "radio stopped on the way out");
}
