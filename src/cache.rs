//! Discovery cache: the most recent complete scan result.
//!
//! The cache holds one [`DiscoverySet`] behind an async mutex. A set is
//! replaced as a whole, so a reader sees either the previous generation or
//! the new one. Readers receive a shared handle and iterate after the lock
//! is released.
//!
//! Lock acquisition is bounded: each attempt waits at most `lock_wait`, and
//! after [`LOCK_ATTEMPTS`] failed attempts the caller gets
//! [`ProvisionerError::CacheLockTimeout`] instead of blocking.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, trace};

use crate::error::{ProvisionerError, Result};
use crate::scan::NetworkRecord;

pub const LOCK_ATTEMPTS: u32 = 10;

/// One complete scan result.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DiscoverySet {
    generation: u64,
    records: Vec<NetworkRecord>,
}

impl DiscoverySet {
    /// 0 for the initial empty set, then one more per replacement.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn records(&self) -> &[NetworkRecord] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

pub struct DiscoveryCache {
    current: Mutex<Arc<DiscoverySet>>,
    lock_wait: Duration,
}

impl DiscoveryCache {
    pub fn new(lock_wait: Duration) -> Self {
        Self {
            current: Mutex::new(Arc::new(DiscoverySet::default())),
            lock_wait,
        }
    }

    /// Installs `records` as the next generation and returns its number.
    pub async fn replace(&self, records: Vec<NetworkRecord>) -> Result<u64> {
        let (generation, previous) = {
            let mut current = self.lock().await?;
            let generation = current.generation + 1;
            let next = Arc::new(DiscoverySet {
                generation,
                records,
            });
            (generation, std::mem::replace(&mut *current, next))
        };
        // Freed outside the lock unless a reader still holds it.
        drop(previous);
        debug!("discovery cache now at generation {generation}");
        Ok(generation)
    }

    /// Returns the current set; the lock is released before this returns.
    pub async fn snapshot(&self) -> Result<Arc<DiscoverySet>> {
        let current = self.lock().await?;
        Ok(Arc::clone(&*current))
    }

    async fn lock(&self) -> Result<MutexGuard<'_, Arc<DiscoverySet>>> {
        for attempt in 1..=LOCK_ATTEMPTS {
            match tokio::time::timeout(self.lock_wait, self.current.lock()).await {
                Ok(guard) => return Ok(guard),
                Err(_) => trace!("discovery cache busy (attempt {attempt}/{LOCK_ATTEMPTS})"),
            }
        }
        Err(ProvisionerError::CacheLockTimeout)
    }
}
