#[cfg(feature = "sea-orm")]
use sea_orm::prelude::StringLen;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a failure record.
///
/// When the `sea-orm` feature is enabled, this enum can be used directly in SeaORM entities.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(
    feature = "sea-orm",
    derive(sea_orm::DeriveActiveEnum, sea_orm::EnumIter),
    sea_orm(rs_type = "String", db_type = "String(StringLen::None)")
)]
#[serde(rename_all = "snake_case")]
pub enum FailureStatus {
    /// Waiting for its next scheduled retry.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "failed"))]
    Failed,
    /// Re-published at least once; waiting for the consumer to pick it up again.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "retrying"))]
    Retrying,
    /// Retries exhausted or explicitly parked. Terminal until reset.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "dead_letter"))]
    DeadLetter,
}

impl FailureStatus {
    /// All possible status values.
    pub const ALL: &'static [FailureStatus] = &[Self::Failed, Self::Retrying, Self::DeadLetter];

    /// Returns the wire representation (snake_case).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Failed => "failed",
            Self::Retrying => "retrying",
            Self::DeadLetter => "dead_letter",
        }
    }

    /// Human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Failed => "Failed",
            Self::Retrying => "Retrying",
            Self::DeadLetter => "Dead Letter",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::DeadLetter)
    }
}

impl fmt::Display for FailureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for FailureStatus {
    fn default() -> Self {
        Self::Failed
    }
}

/// Error when parsing an invalid status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseStatusError {
    invalid: String,
}

impl fmt::Display for ParseStatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Invalid status '{}'. Valid values: {}",
            self.invalid,
            FailureStatus::ALL
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        )
    }
}

impl std::error::Error for ParseStatusError {}

impl FromStr for FailureStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "failed" => Ok(Self::Failed),
            "retrying" => Ok(Self::Retrying),
            "dead_letter" => Ok(Self::DeadLetter),
            _ => Err(ParseStatusError {
                invalid: s.to_string(),
            }),
        }
    }
}
