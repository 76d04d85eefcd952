//! Households joined by a short numeric code.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Four-digit join code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HouseholdCode(String);

impl HouseholdCode {
    pub const LEN: usize = 4;

    pub fn new(raw: impl AsRef<str>) -> DomainResult<Self> {
        let raw = raw.as_ref().trim();
        if raw.len() != Self::LEN || !raw.chars().all(|c| c.is_ascii_digit()) {
            return Err(DomainError::validation(format!(
                "household code must be exactly {} digits",
                Self::LEN
            )));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for HouseholdCode {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<HouseholdCode> for String {
    fn from(value: HouseholdCode) -> Self {
        value.0
    }
}

/// Input for creating a household.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewHousehold {
    pub name: String,
    pub admin_role: String,
    pub members: Vec<String>,
    pub code: HouseholdCode,
}

impl NewHousehold {
    pub fn validate(&self) -> DomainResult<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("household name must not be empty"));
        }
        if self.admin_role.trim().is_empty() {
            return Err(DomainError::validation("admin role must not be empty"));
        }
        Ok(())
    }
}

/// A household as returned by the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Household {
    pub id: i64,
    pub name: String,
    pub admin_role: String,
    pub members: Vec<String>,
    pub code: HouseholdCode,
}
