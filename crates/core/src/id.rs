//! Numeric identifiers shared with the remote service.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Identifier of a task row.
///
/// Positive values are assigned by the remote service. Zero and negative
/// values are placeholders for rows that only exist on this device.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(i64);

/// Identifier of a user row (same placeholder convention as [`TaskId`]).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(i64);

macro_rules! impl_numeric_id {
    ($t:ty, $name:literal) => {
        impl $t {
            /// The "not yet created remotely" id a caller submits.
            pub const UNASSIGNED: Self = Self(0);

            pub const fn new(raw: i64) -> Self {
                Self(raw)
            }

            pub const fn get(&self) -> i64 {
                self.0
            }

            /// True when the remote service has never confirmed this id.
            pub const fn is_placeholder(&self) -> bool {
                self.0 <= 0
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::UNASSIGNED
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<i64> for $t {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl From<$t> for i64 {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let raw = s
                    .trim()
                    .parse::<i64>()
                    .map_err(|e| DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                Ok(Self(raw))
            }
        }
    };
}

impl_numeric_id!(TaskId, "TaskId");
impl_numeric_id!(UserId, "UserId");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_ids() {
        assert!(TaskId::UNASSIGNED.is_placeholder());
        assert!(TaskId::new(-3).is_placeholder());
        assert!(!TaskId::new(42).is_placeholder());
        assert!(!UserId::new(7).is_placeholder());
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!("42".parse::<TaskId>().unwrap(), TaskId::new(42));
        let err = "forty-two".parse::<TaskId>().unwrap_err();
        assert!(matches!(err, DomainError::InvalidId(msg) if msg.starts_with("TaskId")));
    }
}
