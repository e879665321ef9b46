//! Pending-status detection.
//!
//! Puppet has no `pending` status: a noop run reports `unchanged` or
//! `changed` and records the would-be changes as `noop` events. Dashboards
//! conventionally show such runs as pending, so the summary is rewritten
//! before it reaches deduplication or the store.

use crate::models::ReportSummary;
use crate::status::Status;

/// Whether the summary describes a noop run with pending changes.
///
/// Failed reports are never pending; their events metrics may be absent.
pub fn is_pending(summary: &ReportSummary) -> bool {
    if summary.status == Status::Failed {
        return false;
    }
    summary
        .metrics
        .values("events")
        .iter()
        .any(|event| event.name == "noop" && event.value > 0.0)
}

/// Rewrite the summary status to [`Status::Pending`] when [`is_pending`].
pub fn classify(summary: &mut ReportSummary) {
    if is_pending(summary) {
        summary.status = Status::Pending;
    }
}
