//! Per-container operation locks.
//!
//! At most one lifecycle operation runs per container ID. Operations on
//! different IDs never share a lock. In queue mode a second operation waits
//! in FIFO order behind the first; in reject mode it fails immediately.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use nebulabox_common::config::ConcurrencyMode;
use nebulabox_common::error::{NebulaboxError, Result};
use nebulabox_common::types::ContainerId;
use tokio::sync::OwnedMutexGuard;

/// Held for the duration of one lifecycle operation.
pub type OperationGuard = OwnedMutexGuard<()>;

/// Table of per-container operation locks.
#[derive(Debug)]
pub struct OperationLocks {
    mode: ConcurrencyMode,
    table: Mutex<HashMap<ContainerId, Arc<tokio::sync::Mutex<()>>>>,
}

impl OperationLocks {
    /// Creates an empty lock table.
    #[must_use]
    pub fn new(mode: ConcurrencyMode) -> Self {
        Self {
            mode,
            table: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, id: &ContainerId) -> Arc<tokio::sync::Mutex<()>> {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(table.entry(id.clone()).or_default())
    }

    /// Acquires the operation lock for `id`.
    ///
    /// # Errors
    ///
    /// In reject mode, returns
    /// [`NebulaboxError::ConcurrentOperationInProgress`] if another
    /// operation holds the lock.
    pub async fn acquire(&self, id: &ContainerId) -> Result<OperationGuard> {
        let lock = self.lock_for(id);
        match self.mode {
            ConcurrencyMode::Queue => {
                tracing::debug!(id = %id, "waiting for operation lock");
                Ok(lock.lock_owned().await)
            }
            ConcurrencyMode::Reject => lock.try_lock_owned().map_err(|_| {
                NebulaboxError::ConcurrentOperationInProgress { id: id.clone() }
            }),
        }
    }

    /// Drops the table entry for a container that no longer exists.
    ///
    /// Outstanding guards stay valid; a later `acquire` gets a fresh lock.
    pub fn forget(&self, id: &ContainerId) {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = table.remove(id);
    }

    /// Returns the number of containers with a lock entry.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
