//! Headless sync daemon: probes the API, reconciles pending rows when it
//! comes back, and logs status messages until Ctrl-C.

use std::sync::Arc;

use anyhow::Context;
use familyflow_sync::{AppContext, SyncConfig};
use tokio::sync::Notify;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    familyflow_observability::init();

    let config = SyncConfig::from_env()?;
    let ctx = AppContext::build(config).await?;
    let mut events = ctx
        .take_status_receiver()
        .context("status receiver already taken")?;

    let probe_shutdown = Arc::new(Notify::new());
    let probe = ctx.monitor.spawn_probe(
        Arc::new(ctx.http_probe()?),
        ctx.config.probe_interval,
        probe_shutdown.clone(),
    );

    let worker = ctx.worker();
    let worker_handle = worker.start();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            res = &mut ctrl_c => {
                if let Err(e) = res {
                    tracing::error!("failed to listen for Ctrl-C: {e}");
                }
                break;
            }
            Some(event) = events.recv() => {
                tracing::info!(?event, "sync status");
            }
        }
    }

    tracing::info!("shutting down");
    worker.shutdown();
    probe_shutdown.notify_one();
    if let Err(e) = worker_handle.await {
        tracing::error!("sync worker panicked: {e}");
    }
    if let Err(e) = probe.await {
        tracing::error!("connectivity probe panicked: {e}");
    }
    Ok(())
}
