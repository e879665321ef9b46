//! Payload deduplication decision.
//!
//! Steady-state fleets mostly send consecutive `unchanged` runs whose
//! payloads carry no new information. Such a run still gets its own report
//! row, but points at the payload of the report before it.

use crate::models::PreviousReport;
use crate::status::Status;

/// How a newly ingested report is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Store a fresh payload under the new report's id, in today's collection.
    New,
    /// Reuse the previous report's payload and collection.
    Duplicate {
        file_handle: i64,
        collection_id: i64,
    },
}

impl Decision {
    pub fn is_new(&self) -> bool {
        matches!(self, Decision::New)
    }
}

/// Decide whether a report with `status` is new relative to `previous`.
///
/// Only an `unchanged` run following an `unchanged` run is a duplicate.
pub fn decide(previous: Option<&PreviousReport>, status: Status) -> Decision {
    match previous {
        Some(prev) if status == Status::Unchanged && prev.status == Status::Unchanged => {
            Decision::Duplicate {
                file_handle: prev.file_handle,
                collection_id: prev.collection_id,
            }
        }
        _ => Decision::New,
    }
}
