//! Application context: every long-lived component, built once from
//! [`SyncConfig`] and shared by `Arc`.

use std::sync::{Arc, Mutex};

use anyhow::Context;
use familyflow_auth::{FileSessionStore, Session};

use crate::config::SyncConfig;
use crate::connectivity::{ConnectivityMonitor, HttpProbe};
use crate::coordinator::SyncCoordinator;
use crate::gateway::HttpGateway;
use crate::status::{StatusQueue, StatusReceiver};
use crate::store::LocalStore;
use crate::worker::SyncWorker;

pub struct AppContext {
    pub config: SyncConfig,
    pub session: Arc<Session>,
    pub coordinator: Arc<SyncCoordinator>,
    pub monitor: Arc<ConnectivityMonitor>,
    status_rx: Mutex<Option<StatusReceiver>>,
}

impl AppContext {
    pub async fn build(config: SyncConfig) -> anyhow::Result<Self> {
        let session = Arc::new(Session::load(FileSessionStore::new(&config.session_path)));
        let store = LocalStore::open(&config.db_path)
            .await
            .context("failed to open local store")?;
        let gateway = HttpGateway::new(&config.api_url, config.http_timeout, session.clone())?;

        let (status, status_rx) = StatusQueue::new();
        let coordinator = Arc::new(SyncCoordinator::new(
            store,
            Arc::new(gateway),
            session.clone(),
            status.clone(),
        ));
        let monitor = Arc::new(ConnectivityMonitor::new(config.debounce).with_status(status));

        tracing::info!(
            api_url = %config.api_url,
            db_path = %config.db_path.display(),
            "sync context ready"
        );

        Ok(Self {
            config,
            session,
            coordinator,
            monitor,
            status_rx: Mutex::new(Some(status_rx)),
        })
    }

    /// The single status consumer. `None` after the first call.
    pub fn take_status_receiver(&self) -> Option<StatusReceiver> {
        self.status_rx.lock().ok()?.take()
    }

    pub fn http_probe(&self) -> anyhow::Result<HttpProbe> {
        HttpProbe::new(self.config.api_url.clone(), self.config.http_timeout)
    }

    pub fn worker(&self) -> SyncWorker {
        SyncWorker::new(
            self.coordinator.clone(),
            self.monitor.clone(),
            self.config.sync_interval,
        )
    }
}
