//! `familyflow-core`: household chore domain types.
//!
//! This crate contains **pure domain** primitives (no storage or network).

pub mod error;
pub mod household;
pub mod id;
pub mod task;
pub mod user;

pub use error::{DomainError, DomainResult};
pub use household::{Household, HouseholdCode, NewHousehold};
pub use id::{TaskId, UserId};
pub use task::{Days, NewTask, RoomType, Task, Weekday, decode_days, encode_days};
pub use user::{Registration, User};
