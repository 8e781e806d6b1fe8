use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Held for the duration of an operation; dropping it releases the key.
pub struct Lease {
    _guard: OwnedMutexGuard<()>,
}

/// Per-key async locks. Operations on the same key queue behind each
/// other; different keys never contend.
#[derive(Debug, Default)]
pub struct LeaseRegistry {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl LeaseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, key: &str) -> Lease {
        let lock = {
            let mut locks = self.locks.lock();
            // Drop locks nobody holds or waits on
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        Lease {
            _guard: lock.lock_owned().await,
        }
    }

    /// Serializes creates of one catalog entry (limit check then insert)
    pub async fn for_app(&self, app_key: &str) -> Lease {
        self.acquire(&format!("app:{app_key}")).await
    }

    /// Serializes every operation on one install
    pub async fn for_install(&self, install_id: &str) -> Lease {
        self.acquire(&format!("install:{install_id}")).await
    }
}
