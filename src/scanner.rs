//! Background scan loop.
//!
//! Requests a scan on a fixed interval while the access point is up. Each
//! request is fire-and-forget; a failed one is logged and the loop carries on.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::radio::Radio;

/// Periodically asks the radio for a scan.
///
/// The scanner only requests scans; results reach the discovery cache
/// through the radio's `ScanCompleted` event.
pub struct Scanner {
    radio: Arc<dyn Radio>,
    interval: Duration,
}

impl Scanner {
    pub fn new(radio: Arc<dyn Radio>, interval: Duration) -> Self {
        Self { radio, interval }
    }

    /// One-shot scan request, outside the periodic schedule.
    pub async fn scan_now(&self) -> Result<()> {
        self.radio.request_scan().await
    }

    /// Starts the periodic loop on its own task.
    pub fn spawn(self: &Arc<Self>) -> ScannerHandle {
        let cancel = CancellationToken::new();
        let scanner = Arc::clone(self);
        let token = cancel.clone();
        let task = tokio::spawn(async move { scanner.run(token).await });
        ScannerHandle { cancel, task }
    }

    async fn run(&self, cancel: CancellationToken) {
        info!("scanner started (every {:?})", self.interval);
        loop {
            if let Err(e) = self.scan_now().await {
                warn!("scan request failed: {e}");
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        info!("scanner stopped");
    }
}

/// Owner of a running scanner loop.
pub struct ScannerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ScannerHandle {
    /// Cancels the loop and waits for it to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!("scanner task ended abnormally: {e}");
        } else {
            debug!("scanner joined");
        }
    }
}
