//! The configurator: a TCP command server available during AP role.
//!
//! One client is served at a time (listen backlog 1). The accept loop waits
//! at most `accept_timeout` per iteration and checks its [`ServerRunState`]
//! in between, so clearing the run state stops the server within one
//! timeout interval.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cache::DiscoveryCache;
use crate::config::ServerConfig;
use crate::error::{ProvisionerError, Result};
use crate::protocol::{self, Command, UNKNOWN_COMMAND_RESPONSE};
use crate::provisioner::Intent;

/// Whether the configurator should keep accepting connections.
#[derive(Debug, Clone)]
pub struct ServerRunState(Arc<AtomicBool>);

impl ServerRunState {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn stop(&self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Default for ServerRunState {
    fn default() -> Self {
        Self::new()
    }
}

/// How long a served client may keep sending before the socket is dropped.
const LINGER: Duration = Duration::from_millis(100);

/// What the accept loop does after a client has been served.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    RoleChange,
}

pub struct CommandServer {
    listener: TcpListener,
    config: ServerConfig,
    cache: Arc<DiscoveryCache>,
    intents: mpsc::Sender<Intent>,
    run_state: ServerRunState,
}

impl CommandServer {
    /// Binds the listening socket.
    ///
    /// Failure here is fatal: the server is only started once the access
    /// point and its address service are known to be up.
    pub fn bind(
        config: ServerConfig,
        cache: Arc<DiscoveryCache>,
        intents: mpsc::Sender<Intent>,
        run_state: ServerRunState,
    ) -> Result<Self> {
        let addr = config.socket_addr();
        let bind_err = |source| ProvisionerError::Bind { addr, source };

        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4(),
            SocketAddr::V6(_) => TcpSocket::new_v6(),
        }
        .map_err(bind_err)?;
        socket.set_reuseaddr(true).map_err(bind_err)?;
        socket.bind(addr).map_err(bind_err)?;
        let listener = socket.listen(1).map_err(bind_err)?;

        Ok(Self {
            listener,
            config,
            cache,
            intents,
            run_state,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        let addr = self.config.socket_addr();
        self.listener
            .local_addr()
            .map_err(|source| ProvisionerError::Bind { addr, source })
    }

    /// Spawns the accept loop and returns its owner.
    pub fn spawn(self) -> Result<ServerHandle> {
        let local_addr = self.local_addr()?;
        let run_state = self.run_state.clone();
        let task = tokio::spawn(self.run());
        Ok(ServerHandle {
            run_state,
            local_addr,
            task,
        })
    }

    pub async fn run(self) {
        info!("configurator listening on {}", self.config.socket_addr());
        let accept_timeout = self.config.accept_timeout();

        while self.run_state.is_running() {
            let (stream, peer) =
                match tokio::time::timeout(accept_timeout, self.listener.accept()).await {
                    Err(_) => continue,
                    Ok(Err(e)) => {
                        warn!("accept failed: {e}");
                        continue;
                    }
                    Ok(Ok(pair)) => pair,
                };

            debug!("client {peer} connected");
            if self.handle_client(stream, peer).await == Flow::RoleChange {
                self.run_state.stop();
            }
        }

        info!("configurator stopped");
    }

    async fn handle_client(&self, stream: TcpStream, peer: SocketAddr) -> Flow {
        let mut stream = BufReader::new(stream);
        let read = protocol::read_command(
            &mut stream,
            self.config.terminator_byte(),
            self.config.max_command_len,
        );
        let line = match tokio::time::timeout(self.config.read_timeout(), read).await {
            Ok(Ok(line)) => line,
            Ok(Err(e)) => {
                warn!("reading from {peer} failed: {e}");
                return Flow::Continue;
            }
            Err(_) => {
                warn!("{peer} sent no command in time");
                return Flow::Continue;
            }
        };

        match Command::parse(&line) {
            Command::List => {
                let body = match self.cache.snapshot().await {
                    Ok(set) => protocol::format_list(set.records()),
                    Err(e) => {
                        warn!("list for {peer}: {e}");
                        String::new()
                    }
                };
                respond(&mut stream, peer, &body).await;
            }
            Command::Scan => {
                info!("{peer} requested a scan");
                self.submit(Intent::Scan).await;
            }
            Command::Connect(credential) => {
                info!("{peer} submitted credentials for '{}'", credential.ssid);
                // The role change invalidates this connection; close it first.
                drop(stream);
                self.submit(Intent::Connect(credential)).await;
                return Flow::RoleChange;
            }
            Command::Unknown(raw) => {
                debug!("{peer} sent unknown command {raw:?}");
                respond(&mut stream, peer, UNKNOWN_COMMAND_RESPONSE).await;
            }
        }

        linger(stream).await;
        Flow::Continue
    }

    async fn submit(&self, intent: Intent) {
        if self.intents.send(intent).await.is_err() {
            error!("provisioner is gone; intent dropped");
        }
    }
}

async fn respond(stream: &mut BufReader<TcpStream>, peer: SocketAddr, body: &str) {
    let stream = stream.get_mut();
    if let Err(e) = stream.write_all(body.as_bytes()).await {
        warn!("writing to {peer} failed: {e}");
    }
}

/// Half-closes the socket, then discards what the client still sends
/// (bytes past the length bound, a late terminator) for up to [`LINGER`]
/// so unread input does not turn the close into a reset.
async fn linger(mut stream: BufReader<TcpStream>) {
    if let Err(e) = stream.get_mut().shutdown().await {
        debug!("shutdown: {e}");
        return;
    }
    let mut sink = [0u8; 256];
    let _ = tokio::time::timeout(LINGER, async {
        while let Ok(n) = stream.read(&mut sink).await {
            if n == 0 {
                break;
            }
        }
    })
    .await;
}

/// Owner of a running configurator.
pub struct ServerHandle {
    run_state: ServerRunState,
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.run_state.is_running()
    }

    /// Clears the run state and waits for the accept loop to exit.
    pub async fn shutdown(self) {
        self.run_state.stop();
        if let Err(e) = self.task.await {
            warn!("configurator task ended abnormally: {e}");
        }
    }
}
