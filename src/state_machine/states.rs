use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::status_codes;

/// Lifecycle status shared by tasks, messages and configurations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    /// Stable and usable
    Active,
    /// Soft-deleted
    Archived,
    /// Created locally, remote work not yet started
    Queued,
    /// Remote work in flight
    Processing,
    /// A remote step failed
    Error,
}

impl ResourceStatus {
    /// Integer code persisted in storage
    pub fn code(&self) -> i16 {
        match self {
            Self::Active => status_codes::ACTIVE,
            Self::Archived => status_codes::ARCHIVED,
            Self::Queued => status_codes::QUEUED,
            Self::Processing => status_codes::PROCESSING,
            Self::Error => status_codes::ERROR,
        }
    }

    /// Check if the resource is waiting on, or receiving, a provider response
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Queued | Self::Processing)
    }

    /// Check if no further orchestration will touch the resource
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Active | Self::Error | Self::Archived)
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Archived => write!(f, "archived"),
            Self::Queued => write!(f, "queued"),
            Self::Processing => write!(f, "processing"),
            Self::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for ResourceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "archived" => Ok(Self::Archived),
            "queued" => Ok(Self::Queued),
            "processing" => Ok(Self::Processing),
            "error" => Ok(Self::Error),
            _ => Err(format!("Invalid resource status: {s}")),
        }
    }
}

impl TryFrom<i16> for ResourceStatus {
    type Error = String;

    fn try_from(code: i16) -> Result<Self, String> {
        match code {
            status_codes::ACTIVE => Ok(Self::Active),
            status_codes::ARCHIVED => Ok(Self::Archived),
            status_codes::QUEUED => Ok(Self::Queued),
            status_codes::PROCESSING => Ok(Self::Processing),
            status_codes::ERROR => Ok(Self::Error),
            other => Err(format!("Invalid resource status code: {other}")),
        }
    }
}
