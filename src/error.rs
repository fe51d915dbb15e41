use std::net::SocketAddr;

use thiserror::Error;

use crate::orchestrator::TransitionStep;
use crate::radio::Role;

pub type Result<T, E = ProvisionerError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum ProvisionerError {
    #[error("No WiFi interface found")]
    NoWifiInterfaceFound,

    #[error("Interface '{0}' not found")]
    InterfaceNotFound(String),

    #[error("Failed to execute nmcli: {0}")]
    NmcliExecution(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Radio is not initialized")]
    RadioNotInitialized,

    #[error("Radio is not started")]
    RadioNotStarted,

    #[error("Radio has no {0} configuration")]
    RadioNotConfigured(Role),

    #[error("Radio operation '{operation}' failed: {reason}")]
    Radio {
        operation: &'static str,
        reason: String,
    },

    #[error("Failed to bind configurator on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Timed out waiting for the discovery cache lock")]
    CacheLockTimeout,

    #[error("Transition to {role} failed at {step}: {source}")]
    Transition {
        role: Role,
        step: TransitionStep,
        #[source]
        source: Box<ProvisionerError>,
    },
}
