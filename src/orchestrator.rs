//! Role transitions: tear down the current radio role and bring up the next.
//!
//! ```text
//! [stop services] -> stop -> deinitialize    (only from a known state)
//!                 -> initialize -> configure -> start -> [scan, AP only]
//! ```
//!
//! The configurator and the periodic scanner depend on the radio, so they
//! are shut down and joined before the radio is stopped.

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;

use crate::config::AccessPointConfig;
use crate::error::{ProvisionerError, Result};
use crate::radio::{Radio, RadioParams, Role, TargetNetworkCredential};
use crate::scanner::ScannerHandle;
use crate::server::ServerHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionStep {
    Stop,
    Deinitialize,
    Initialize,
    Configure,
    Start,
    Scan,
}

impl fmt::Display for TransitionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransitionStep::Stop => "stop",
            TransitionStep::Deinitialize => "deinitialize",
            TransitionStep::Initialize => "initialize",
            TransitionStep::Configure => "configure",
            TransitionStep::Start => "start",
            TransitionStep::Scan => "scan",
        };
        f.write_str(name)
    }
}

/// The role to bring up, with what it needs.
#[derive(Debug)]
pub enum RoleTarget {
    AccessPoint,
    Station(TargetNetworkCredential),
}

impl RoleTarget {
    pub fn role(&self) -> Role {
        match self {
            RoleTarget::AccessPoint => Role::AccessPoint,
            RoleTarget::Station(_) => Role::Station,
        }
    }
}

/// Tasks that only live while the access point is up.
#[derive(Default)]
pub struct Services {
    pub server: Option<ServerHandle>,
    pub scanner: Option<ScannerHandle>,
}

impl Services {
    pub fn server_running(&self) -> bool {
        self.server.as_ref().is_some_and(ServerHandle::is_running)
    }

    pub fn server_addr(&self) -> Option<SocketAddr> {
        self.server.as_ref().map(ServerHandle::local_addr)
    }

    /// Stops and joins every running service.
    pub async fn shutdown(&mut self) {
        if let Some(server) = self.server.take() {
            server.shutdown().await;
        }
        if let Some(scanner) = self.scanner.take() {
            scanner.shutdown().await;
        }
    }
}

pub struct RoleOrchestrator {
    radio: Arc<dyn Radio>,
    access_point: AccessPointConfig,
}

impl RoleOrchestrator {
    pub fn new(radio: Arc<dyn Radio>, access_point: AccessPointConfig) -> Self {
        Self {
            radio,
            access_point,
        }
    }

    /// Moves the radio to `target`.
    ///
    /// With `from_known_state` the running services and the current role are
    /// torn down first; startup passes `false` because nothing is running.
    /// The credential inside a station target is consumed here.
    pub async fn transition_to(
        &self,
        target: RoleTarget,
        services: &mut Services,
        from_known_state: bool,
    ) -> Result<()> {
        let role = target.role();
        info!("switching radio to {role} role");

        if from_known_state {
            services.shutdown().await;
            step(role, TransitionStep::Stop, self.radio.stop()).await?;
            step(role, TransitionStep::Deinitialize, self.radio.deinitialize()).await?;
        }

        let params = match target {
            RoleTarget::AccessPoint => RadioParams::AccessPoint(self.access_point.clone()),
            RoleTarget::Station(credential) => RadioParams::Station(credential),
        };

        step(role, TransitionStep::Initialize, self.radio.initialize()).await?;
        step(role, TransitionStep::Configure, self.radio.configure(&params)).await?;
        drop(params);
        step(role, TransitionStep::Start, self.radio.start()).await?;

        if role == Role::AccessPoint {
            step(role, TransitionStep::Scan, self.radio.request_scan()).await?;
        }

        Ok(())
    }
}

async fn step<F>(role: Role, step: TransitionStep, op: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    op.await.map_err(|source| ProvisionerError::Transition {
        role,
        step,
        source: Box::new(source),
    })
}
