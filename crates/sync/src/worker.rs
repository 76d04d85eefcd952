//! Background worker that runs reconciliation passes.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use crate::connectivity::ConnectivityMonitor;
use crate::coordinator::SyncCoordinator;
use crate::types::ReconcileOutcome;

/// Runs a pass on every settled online transition, and periodically while
/// online to pick up rows whose push failed earlier.
pub struct SyncWorker {
    coordinator: Arc<SyncCoordinator>,
    monitor: Arc<ConnectivityMonitor>,
    period: Duration,
    shutdown: Arc<Notify>,
}

impl SyncWorker {
    pub fn new(
        coordinator: Arc<SyncCoordinator>,
        monitor: Arc<ConnectivityMonitor>,
        period: Duration,
    ) -> Self {
        Self {
            coordinator,
            monitor,
            period,
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Request graceful shutdown. A pass in flight finishes its current row
    /// set first; anything left stays pending in the store.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    pub fn start(&self) -> tokio::task::JoinHandle<()> {
        let shutdown = self.shutdown.clone();
        let coordinator = self.coordinator.clone();
        let monitor = self.monitor.clone();
        let period = self.period;

        tokio::spawn(async move {
            tracing::info!("background sync worker started");

            let mut online = monitor.subscribe_online();
            let mut safety_net = tokio::time::interval(period);
            safety_net.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick completes immediately; the online signal covers startup.
            safety_net.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.notified() => {
                        tracing::info!("background sync worker received shutdown signal");
                        break;
                    }
                    signal = online.recv() => {
                        if signal.is_none() {
                            tracing::warn!("connectivity monitor gone, stopping worker");
                            break;
                        }
                        tracing::debug!("online transition, reconciling");
                        run_pass(&coordinator).await;
                    }
                    _ = safety_net.tick() => {
                        if !monitor.is_online() {
                            tracing::debug!("skipping periodic pass - offline");
                            continue;
                        }
                        run_pass(&coordinator).await;
                    }
                }
            }

            tracing::info!("background sync worker stopped");
        })
    }
}

/// Failures are already logged and published by the coordinator.
async fn run_pass(coordinator: &SyncCoordinator) {
    match coordinator.reconcile().await {
        Ok(ReconcileOutcome::Completed(report)) if !report.is_empty() => {
            tracing::info!(pushed = report.pushed(), failed = report.failed.len(), "pass complete");
        }
        Ok(_) => {}
        Err(e) => tracing::error!("reconciliation pass failed: {e}"),
    }
}
