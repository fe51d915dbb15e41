//! WiFi provisioning controller.
//!
//! Brings up a setup access point, serves a small line protocol on it through
//! which an operator lists nearby networks and submits credentials, then
//! switches the single radio over to a client station. When the station
//! cannot join or later loses its link, the controller falls back to the
//! access point so the device can be configured again.
//!
//! # Modules
//!
//! - [`provisioner`] - the state machine driving everything below
//! - [`orchestrator`] - ordered teardown and bring-up of radio roles
//! - [`server`] / [`protocol`] - the configurator and its wire format
//! - [`scanner`] / [`cache`] - periodic scans and the shared discovery set
//! - [`radio`] - the radio seam with NetworkManager and simulated backends
//! - [`interface`], [`scan`], [`connection`] - `nmcli` plumbing
//! - [`config`] - TOML configuration
//! - [`error`] - the library error type
//!
//! # Example Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use wifi_provisioner::radio::{event_channel, simulated::SimulatedRadio};
//! use wifi_provisioner::{Config, Provisioner};
//!
//! # async fn demo() -> wifi_provisioner::Result<()> {
//! let (events_tx, events_rx) = event_channel();
//! let radio = Arc::new(SimulatedRadio::new(events_tx));
//! let provisioner = Provisioner::new(Config::default(), radio, events_rx);
//! provisioner.run(CancellationToken::new()).await
//! # }
//! ```

/// Discovery cache shared by the scan path and the configurator.
pub mod cache;

/// Configuration management for the access point, server and scanner.
/// Handles reading/writing TOML config files.
pub mod config;

/// NetworkManager connection management (hotspot, connect, status).
pub mod connection;

/// Error types for the library, built with `thiserror`.
pub mod error;

/// WiFi interface discovery and resolution.
pub mod interface;

/// Ordered teardown and bring-up of radio roles.
pub mod orchestrator;

/// Configurator line protocol: parsing, framing and a client helper.
pub mod protocol;

/// Provisioning state machine and its event loop.
pub mod provisioner;

/// Radio abstraction and its backends.
pub mod radio;

/// Network scanning through `nmcli`.
pub mod scan;

/// Periodic background scans feeding the discovery cache.
pub mod scanner;

/// TCP configurator served while the access point is up.
pub mod server;

pub use cache::{DiscoveryCache, DiscoverySet};
pub use config::Config;
pub use error::{ProvisionerError, Result};
pub use provisioner::{Intent, Provisioner, ProvisionerStatus, ProvisioningState};
pub use radio::{Radio, RadioEvent, Role, TargetNetworkCredential};
pub use scan::NetworkRecord;
