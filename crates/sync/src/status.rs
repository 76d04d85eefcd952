//! One-shot status messages for the presentation layer.
//!
//! Each [`SyncEvent`] is delivered once, to the single [`StatusReceiver`].
//! Publishing never blocks: when the consumer falls behind, new events are
//! dropped rather than stalling a mutation or a reconciliation pass.

use tokio::sync::mpsc;

use crate::types::SyncEvent;

const DEFAULT_CAPACITY: usize = 256;

/// Cloneable publishing side.
#[derive(Debug, Clone)]
pub struct StatusQueue {
    tx: mpsc::Sender<SyncEvent>,
}

/// The single consuming side.
#[derive(Debug)]
pub struct StatusReceiver {
    rx: mpsc::Receiver<SyncEvent>,
}

impl StatusQueue {
    pub fn new() -> (Self, StatusReceiver) {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> (Self, StatusReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, StatusReceiver { rx })
    }

    pub fn publish(&self, event: SyncEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                tracing::debug!(?event, "status queue full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

impl StatusReceiver {
    /// Wait for the next event. `None` once every publisher is gone.
    pub async fn recv(&mut self) -> Option<SyncEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<SyncEvent> {
        self.rx.try_recv().ok()
    }

    /// Everything queued right now, oldest first.
    pub fn drain(&mut self) -> Vec<SyncEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}
