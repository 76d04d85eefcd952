//! Household chore tasks.

use std::collections::BTreeSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::TaskId;

// ─────────────────────────────────────────────────────────────────────────────
// Weekday
// ─────────────────────────────────────────────────────────────────────────────

/// Day token a chore is scheduled on.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Weekday {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
}

impl Weekday {
    pub const ALL: [Weekday; 7] = [
        Weekday::Mon,
        Weekday::Tue,
        Weekday::Wed,
        Weekday::Thu,
        Weekday::Fri,
        Weekday::Sat,
        Weekday::Sun,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Weekday::Mon => "Mon",
            Weekday::Tue => "Tue",
            Weekday::Wed => "Wed",
            Weekday::Thu => "Thu",
            Weekday::Fri => "Fri",
            Weekday::Sat => "Sat",
            Weekday::Sun => "Sun",
        }
    }
}

impl core::fmt::Display for Weekday {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Weekday {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Weekday::ALL
            .into_iter()
            .find(|d| d.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| DomainError::validation(format!("unknown weekday '{s}'")))
    }
}

/// Ordered set of weekdays (Mon first).
pub type Days = BTreeSet<Weekday>;

/// Encode days the way the remote model stores them: `Mon,Wed`.
pub fn encode_days(days: &Days) -> String {
    days.iter().map(Weekday::as_str).collect::<Vec<_>>().join(",")
}

/// Decode a comma-separated day list. Empty input yields an empty set.
pub fn decode_days(raw: &str) -> DomainResult<Days> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(Weekday::from_str)
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// RoomType
// ─────────────────────────────────────────────────────────────────────────────

/// Room a task belongs to. Partitions tasks by screen and by sync pass.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomType(String);

impl RoomType {
    pub const KITCHEN: &'static str = "kitchen";
    pub const BATHROOM: &'static str = "bathroom";
    pub const LIVINGROOM: &'static str = "livingroom";

    /// Rooms the app ships screens for, in display order.
    pub const KNOWN: [&'static str; 3] = [Self::KITCHEN, Self::BATHROOM, Self::LIVINGROOM];

    pub fn new(raw: impl AsRef<str>) -> DomainResult<Self> {
        let normalized = raw.as_ref().trim().to_ascii_lowercase();
        if normalized.is_empty() {
            return Err(DomainError::validation("room type must not be empty"));
        }
        if !normalized
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(DomainError::validation(format!(
                "room type '{normalized}' contains invalid characters"
            )));
        }
        Ok(Self(normalized))
    }

    pub fn kitchen() -> Self {
        Self(Self::KITCHEN.to_string())
    }

    pub fn bathroom() -> Self {
        Self(Self::BATHROOM.to_string())
    }

    pub fn livingroom() -> Self {
        Self(Self::LIVINGROOM.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn rank(&self) -> usize {
        Self::KNOWN
            .iter()
            .position(|k| *k == self.0)
            .unwrap_or(Self::KNOWN.len())
    }
}

/// Known rooms first in display order, then any other room lexically.
impl Ord for RoomType {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        self.rank()
            .cmp(&other.rank())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for RoomType {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl core::fmt::Display for RoomType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RoomType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for RoomType {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RoomType> for String {
    fn from(value: RoomType) -> Self {
        value.0
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Task
// ─────────────────────────────────────────────────────────────────────────────

/// A chore as the presentation layer sees it.
///
/// # Invariants
/// - `name` is non-empty after trimming.
/// - `days` is non-empty.
/// - `assigned_to` is a free-form family member label, not a user reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub days: Days,
    pub assigned_to: Option<String>,
    pub is_done: bool,
    pub room_type: RoomType,
}

/// Input for creating a task; the id is assigned later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTask {
    pub name: String,
    pub days: Days,
    pub assigned_to: Option<String>,
    pub room_type: RoomType,
}

impl NewTask {
    pub fn new(name: impl Into<String>, days: impl IntoIterator<Item = Weekday>, room_type: RoomType) -> Self {
        Self {
            name: name.into(),
            days: days.into_iter().collect(),
            assigned_to: None,
            room_type,
        }
    }

    pub fn assigned_to(mut self, member: impl Into<String>) -> Self {
        self.assigned_to = Some(member.into());
        self
    }

    /// Materialise a not-yet-created task (`id == 0`, not done).
    pub fn into_task(self) -> DomainResult<Task> {
        let task = Task {
            id: TaskId::UNASSIGNED,
            name: self.name,
            days: self.days,
            assigned_to: self.assigned_to,
            is_done: false,
            room_type: self.room_type,
        };
        task.validate()?;
        Ok(task)
    }
}

impl Task {
    pub fn validate(&self) -> DomainResult<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("task name must not be empty"));
        }
        if self.days.is_empty() {
            return Err(DomainError::validation("task must be scheduled on at least one day"));
        }
        Ok(())
    }

    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = id;
        self
    }
}
