//! Per-task mutation locks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use familyflow_core::TaskId;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Hands out one async mutex per task id so a caller mutation and a
/// reconciliation push on the same row never interleave.
///
/// Entries nobody holds are dropped on the next acquisition.
#[derive(Debug, Default)]
pub struct TaskLocks {
    slots: Mutex<HashMap<i64, Arc<AsyncMutex<()>>>>,
}

impl TaskLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, id: TaskId) -> OwnedMutexGuard<()> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            slots.retain(|_, slot| Arc::strong_count(slot) > 1);
            slots.entry(id.get()).or_default().clone()
        };
        slot.lock_owned().await
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots.lock().map(|s| s.len()).unwrap_or_default()
    }
}
