//! Session State: the current auth token and user id.
//!
//! [`Session`] is an explicit context object, constructed once and shared by
//! `Arc` with everything that attaches credentials. Persistence is delegated
//! to a [`SessionStore`] so the platform's preference storage can back it.

use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, RwLock};

use familyflow_core::UserId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Snapshot of the session fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub auth_token: Option<String>,
    pub user_id: Option<UserId>,
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        self.user_id.is_some()
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("session storage is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error("session lock poisoned")]
    Poisoned,
}

/// Durable backing for a [`Session`].
pub trait SessionStore: Send + Sync {
    fn load(&self) -> Result<SessionState, SessionError>;
    fn persist(&self, state: &SessionState) -> Result<(), SessionError>;
    fn erase(&self) -> Result<(), SessionError>;
}

/// Keeps the session only for the life of the process.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    saved: Mutex<SessionState>,
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Result<SessionState, SessionError> {
        self.saved
            .lock()
            .map(|s| s.clone())
            .map_err(|_| SessionError::Poisoned)
    }

    fn persist(&self, state: &SessionState) -> Result<(), SessionError> {
        *self.saved.lock().map_err(|_| SessionError::Poisoned)? = state.clone();
        Ok(())
    }

    fn erase(&self) -> Result<(), SessionError> {
        *self.saved.lock().map_err(|_| SessionError::Poisoned)? = SessionState::default();
        Ok(())
    }
}

/// JSON file store. Writes go to a sibling temp file and are renamed into
/// place so a crash never leaves a half-written session.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> Result<SessionState, SessionError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SessionState::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn persist(&self, state: &SessionState) -> Result<(), SessionError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec(state)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn erase(&self) -> Result<(), SessionError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory mirror of the persisted session.
pub struct Session {
    state: RwLock<SessionState>,
    store: Box<dyn SessionStore>,
}

impl core::fmt::Debug for Session {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let authenticated = self
            .state
            .read()
            .map(|s| s.is_authenticated())
            .unwrap_or(false);
        f.debug_struct("Session")
            .field("authenticated", &authenticated)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Restore the session from `store`. An unreadable store starts empty.
    pub fn load(store: impl SessionStore + 'static) -> Self {
        let state = store.load().unwrap_or_else(|err| {
            tracing::warn!("failed to restore session, starting signed out: {err}");
            SessionState::default()
        });
        Self {
            state: RwLock::new(state),
            store: Box::new(store),
        }
    }

    pub fn in_memory() -> Self {
        Self::load(MemorySessionStore::default())
    }

    /// Replace both fields and persist them.
    pub fn save(&self, auth_token: Option<String>, user_id: UserId) -> Result<(), SessionError> {
        let mut guard = self.state.write().map_err(|_| SessionError::Poisoned)?;
        let next = SessionState {
            auth_token,
            user_id: Some(user_id),
        };
        self.store.persist(&next)?;
        *guard = next;
        tracing::info!(user_id = %user_id, "session saved");
        Ok(())
    }

    pub fn get(&self) -> SessionState {
        self.state.read().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn auth_token(&self) -> Option<String> {
        self.get().auth_token
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.get().user_id
    }

    /// Remove token and user id together. Readers never observe one without
    /// the other because both change under the same write lock.
    pub fn clear(&self) -> Result<(), SessionError> {
        let mut guard = self.state.write().map_err(|_| SessionError::Poisoned)?;
        *guard = SessionState::default();
        self.store.erase()?;
        tracing::info!("session cleared");
        Ok(())
    }
}
