//! Report status taxonomy.
//!
//! The integer code of each status is its position in [`Status::ALL`] and
//! is what the store persists. The order must never change once deployed.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ReportError;

/// Outcome of a single configuration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Unknown,
    Unchanged,
    Changed,
    Pending,
    Failed,
}

impl Status {
    /// Every status, indexed by its stored code.
    pub const ALL: [Status; 5] = [
        Status::Unknown,
        Status::Unchanged,
        Status::Changed,
        Status::Pending,
        Status::Failed,
    ];

    pub fn code(self) -> i64 {
        match self {
            Status::Unknown => 0,
            Status::Unchanged => 1,
            Status::Changed => 2,
            Status::Pending => 3,
            Status::Failed => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Status::Unknown => "unknown",
            Status::Unchanged => "unchanged",
            Status::Changed => "changed",
            Status::Pending => "pending",
            Status::Failed => "failed",
        }
    }

    /// Map a status name to its variant. Absent or unrecognized names
    /// become [`Status::Unknown`].
    pub fn from_name(name: Option<&str>) -> Status {
        name.and_then(|n| Status::ALL.into_iter().find(|s| s.name() == n))
            .unwrap_or(Status::Unknown)
    }
}

impl TryFrom<i64> for Status {
    type Error = ReportError;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        usize::try_from(code)
            .ok()
            .and_then(|i| Status::ALL.get(i).copied())
            .ok_or(ReportError::StatusOutOfRange(code))
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
