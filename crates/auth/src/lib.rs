//! `familyflow-auth`: local credential hashing and session state.
//!
//! This crate is intentionally decoupled from HTTP and SQL storage.

pub mod password;
pub mod session;

pub use password::{PasswordError, hash_password, verify_password};
pub use session::{
    FileSessionStore, MemorySessionStore, Session, SessionError, SessionState, SessionStore,
};
