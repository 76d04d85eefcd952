//! `familyflow-sync`
//!
//! **Responsibility:** offline-tolerant local cache and remote sync for
//! FamilyFlow tasks and users.
//!
//! This crate provides:
//! - Local Store (SQLite) with per-row sync state
//! - Remote Gateway over the FamilyFlow REST API
//! - Sync Coordinator: remote-first mutations, local fallback, reconciliation
//! - Connectivity Monitor with a debounced online signal
//! - Background worker and one-shot status messages
//!
//! Callers build an [`AppContext`] once and go through its
//! [`SyncCoordinator`]; nothing here is a global.

pub mod config;
pub mod connectivity;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod gateway;
pub mod locks;
pub mod status;
pub mod store;
pub mod types;
pub mod worker;

#[cfg(test)]
mod testing;

pub use config::SyncConfig;
pub use connectivity::{ConnectivityMonitor, HttpProbe, OnlineSignal, Probe};
pub use context::AppContext;
pub use coordinator::SyncCoordinator;
pub use error::{SyncError, SyncResult};
pub use gateway::{GatewayResult, HttpGateway, LoginRequest, RegisterRequest, RemoteGateway, RemoteUser};
pub use status::{StatusQueue, StatusReceiver};
pub use store::{LocalStore, UserConflict};
pub use types::{
    ConnectivityState, ReconcileOutcome, SyncEvent, SyncReport, SyncState, TrackedTask,
};
pub use worker::SyncWorker;
