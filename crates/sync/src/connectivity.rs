//! Connectivity Monitor: current reachability plus a debounced
//! "became online" signal.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;

use crate::status::StatusQueue;
use crate::types::{ConnectivityState, SyncEvent};

/// Raw reachability source (platform network API, HTTP probe, ...).
#[async_trait]
pub trait Probe: Send + Sync {
    async fn reachable(&self) -> bool;
}

/// Treats any HTTP response from the base URL as reachable and any
/// transport error as unreachable.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build probe HTTP client")?;
        Ok(Self { client, url: url.into() })
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn reachable(&self) -> bool {
        self.client.head(&self.url).send().await.is_ok()
    }
}

#[derive(Debug)]
pub struct ConnectivityMonitor {
    tx: watch::Sender<ConnectivityState>,
    debounce: Duration,
    status: Option<StatusQueue>,
}

impl ConnectivityMonitor {
    /// Starts offline until the first report.
    pub fn new(debounce: Duration) -> Self {
        let (tx, _) = watch::channel(ConnectivityState::Offline);
        Self {
            tx,
            debounce,
            status: None,
        }
    }

    /// Publish a `Connectivity` event on every transition.
    pub fn with_status(mut self, status: StatusQueue) -> Self {
        self.status = Some(status);
        self
    }

    /// Feed a raw observation. Repeats of the current state are ignored.
    pub fn report(&self, state: ConnectivityState) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
        if !changed {
            return;
        }

        tracing::info!(?state, "connectivity changed");
        if let Some(status) = &self.status {
            status.publish(SyncEvent::Connectivity { state });
        }
    }

    pub fn state(&self) -> ConnectivityState {
        *self.tx.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.state() == ConnectivityState::Online
    }

    /// Raw state changes, for an offline indicator.
    pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.tx.subscribe()
    }

    pub fn subscribe_online(&self) -> OnlineSignal {
        OnlineSignal {
            rx: self.tx.subscribe(),
            debounce: self.debounce,
            fired: false,
        }
    }

    /// Poll `probe` every `interval` and report the result, until `shutdown`
    /// is notified.
    pub fn spawn_probe(
        self: &Arc<Self>,
        probe: Arc<dyn Probe>,
        interval: Duration,
        shutdown: Arc<Notify>,
    ) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            tracing::info!(?interval, "connectivity probe started");
            let mut ticks = tokio::time::interval(interval);
            ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown.notified() => break,
                    _ = ticks.tick() => {
                        let state = if probe.reachable().await {
                            ConnectivityState::Online
                        } else {
                            ConnectivityState::Offline
                        };
                        monitor.report(state);
                    }
                }
            }
            tracing::info!("connectivity probe stopped");
        })
    }
}

/// Fires once per offline→online transition that stays online for the
/// whole debounce window. Flaps inside the window restart it.
#[derive(Debug)]
pub struct OnlineSignal {
    rx: watch::Receiver<ConnectivityState>,
    debounce: Duration,
    fired: bool,
}

impl OnlineSignal {
    /// Wait for the next settled online transition. `None` once the
    /// monitor is dropped.
    pub async fn recv(&mut self) -> Option<()> {
        if self.fired {
            self.rx
                .wait_for(|s| *s == ConnectivityState::Offline)
                .await
                .ok()?;
            self.fired = false;
        }

        loop {
            self.rx
                .wait_for(|s| *s == ConnectivityState::Online)
                .await
                .ok()?;

            let dropped = tokio::time::timeout(
                self.debounce,
                self.rx.wait_for(|s| *s == ConnectivityState::Offline),
            )
            .await;

            match dropped {
                Err(_settled) => {
                    self.fired = true;
                    return Some(());
                }
                Ok(Ok(_)) => continue,
                Ok(Err(_closed)) => return None,
            }
        }
    }
}
