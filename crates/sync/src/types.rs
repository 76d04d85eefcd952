//! Shared types for the sync layer and its callers.

use chrono::{DateTime, Utc};
use familyflow_core::{RoomType, Task, TaskId};
use serde::{Deserialize, Serialize};

/// Connectivity state of the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityState {
    /// The remote service is reachable.
    Online,
    /// Network unreachable or remote unavailable.
    Offline,
}

/// Per-row sync state kept in the Local Store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Matches the last confirmed server state.
    Clean,
    /// Exists only locally under a placeholder id.
    PendingCreate,
    /// Known to the server, local edits not yet confirmed.
    PendingUpdate,
    /// Deleted locally, remote delete not yet confirmed.
    Tombstoned,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Clean => "clean",
            SyncState::PendingCreate => "pending_create",
            SyncState::PendingUpdate => "pending_update",
            SyncState::Tombstoned => "tombstoned",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "clean" => Some(SyncState::Clean),
            "pending_create" => Some(SyncState::PendingCreate),
            "pending_update" => Some(SyncState::PendingUpdate),
            "tombstoned" => Some(SyncState::Tombstoned),
            _ => None,
        }
    }

    /// Anything a reconciliation pass still has to push.
    pub fn is_unsynced(&self) -> bool {
        !matches!(self, SyncState::Clean)
    }
}

/// A task row together with its sync bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedTask {
    pub task: Task,
    pub state: SyncState,
    pub pending_since: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl TrackedTask {
    pub fn id(&self) -> TaskId {
        self.task.id
    }

    pub fn room_type(&self) -> &RoomType {
        &self.task.room_type
    }
}

/// Result of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Placeholder id → server id for rows created remotely.
    pub created: Vec<(TaskId, TaskId)>,
    pub updated: Vec<TaskId>,
    pub deleted: Vec<TaskId>,
    /// Rows that stayed pending, with the reason.
    pub failed: Vec<(TaskId, String)>,
}

impl SyncReport {
    pub fn pushed(&self) -> usize {
        self.created.len() + self.updated.len() + self.deleted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pushed() == 0 && self.failed.is_empty()
    }
}

/// What a reconciliation request did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Completed(SyncReport),
    /// Another pass was already running; this request was folded into it.
    Coalesced,
}

/// One-shot status messages for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncEvent {
    Connectivity { state: ConnectivityState },
    /// A mutation was accepted locally and waits for reconciliation.
    MutationQueued { task_id: TaskId, state: SyncState },
    ReconcileCompleted { pushed: usize, failed: usize },
    ReconcileFailed { error: String },
    /// The remote rejected the session token; the session was cleared.
    SessionExpired,
}
