use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::OwnedMutexGuard;

use crate::error::{Error, Result};

/// Per-customer mutual exclusion. At most one AI/assignment operation runs at
/// a time for a given key; different keys proceed fully in parallel.
pub struct CustomerGate {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    timeout: Duration,
}

/// Scoped acquisition: dropping the permit releases the gate, so release
/// happens on every exit path including failures.
#[derive(Debug)]
pub struct GatePermit {
    _guard: OwnedMutexGuard<()>,
}

impl CustomerGate {
    pub fn new(timeout: Duration) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    fn lock_for(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock();
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Waits up to the configured timeout for the key's slot. A stuck holder
    /// (typically a hung AI call) surfaces as `ConcurrencyTimeout` rather
    /// than starving the caller forever.
    pub async fn acquire(&self, key: &str) -> Result<GatePermit> {
        let lock = self.lock_for(key);
        let guard = tokio::time::timeout(self.timeout, lock.lock_owned())
            .await
            .map_err(|_| Error::ConcurrencyTimeout(key.to_string()))?;
        Ok(GatePermit { _guard: guard })
    }

    /// Drops lock entries nobody currently holds or waits on. Held locks keep
    /// an outstanding `Arc` clone and survive the sweep.
    pub fn sweep(&self) -> usize {
        let mut locks = self.locks.lock();
        let before = locks.len();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - locks.len()
    }

    #[cfg(test)]
    pub fn tracked_keys(&self) -> usize {
        self.locks.lock().len()
    }
}
