//! Core data models used throughout Singularity.
//!
//! These types represent the parsed report summaries, the store rows, and
//! the aggregate views that flow through ingestion and retrieval.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::status::Status;

/// Minimal summary extracted from a raw report at ingest time.
#[derive(Debug, Clone)]
pub struct ReportSummary {
    pub host: String,
    pub time: DateTime<Utc>,
    pub status: Status,
    pub metrics: ReportMetrics,
}

/// One `[name, label, value]` entry of a metric group.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricValue {
    pub name: String,
    pub label: String,
    pub value: f64,
}

/// Named metric groups (`resources`, `time`, `events`, `changes`).
#[derive(Debug, Clone, Default)]
pub struct ReportMetrics {
    groups: BTreeMap<String, Vec<MetricValue>>,
}

/// Resource counters persisted on each report row.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourceCounters {
    pub changed: i64,
    pub failed: i64,
    pub total: i64,
    pub runtime: f64,
}

impl ReportMetrics {
    pub fn insert_group(&mut self, group: impl Into<String>, values: Vec<MetricValue>) {
        self.groups.insert(group.into(), values);
    }

    /// Values of a metric group; empty when the group is absent.
    pub fn values(&self, group: &str) -> &[MetricValue] {
        self.groups.get(group).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Fold the resource and time groups into the stored counters.
    ///
    /// `failed_to_restart` counts as failed and `restarted` as changed.
    pub fn counters(&self) -> ResourceCounters {
        let mut out = ResourceCounters::default();
        for metric in self.values("resources") {
            let count = metric.value.round() as i64;
            match metric.name.as_str() {
                "total" => out.total += count,
                "failed" | "failed_to_restart" => out.failed += count,
                "changed" | "restarted" => out.changed += count,
                _ => {}
            }
        }
        for metric in self.values("time") {
            if metric.name == "total" {
                out.runtime += metric.value;
            }
        }
        out
    }
}

/// The report a node's pointer currently references.
#[derive(Debug, Clone, PartialEq)]
pub struct PreviousReport {
    pub report_id: i64,
    pub status: Status,
    pub collection_id: i64,
    pub file_handle: i64,
}

/// Result of resolving a hostname against the store.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeLookup {
    /// The host has never reported.
    Missing,
    Found {
        node_id: i64,
        previous: Option<PreviousReport>,
    },
}

/// A report row joined with its node, as shown in list views.
#[derive(Debug, Clone, Serialize)]
pub struct ReportRow {
    pub node_id: i64,
    pub host: String,
    pub status: Status,
    pub report_id: i64,
    pub time: DateTime<Utc>,
    pub resources_changed: i64,
    pub resources_failed: i64,
    pub resources_total: i64,
    pub runtime: f64,
}

/// Filter for [`ReportStore::tabular`](crate::store::ReportStore::tabular).
///
/// A host filter lists that host's full history; without one, only current
/// reports are listed.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReportFilter {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub status: Option<Status>,
    #[serde(default)]
    pub unresponsive: bool,
}

/// Node counts per status of their current report.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Counts {
    #[serde(flatten)]
    pub by_status: BTreeMap<String, i64>,
    pub all: i64,
    pub unresponsive: i64,
}

impl Counts {
    pub fn get(&self, status: Status) -> i64 {
        self.by_status.get(status.name()).copied().unwrap_or(0)
    }
}

/// Stored metadata of a single report.
#[derive(Debug, Clone, Serialize)]
pub struct ReportMetadata {
    pub report_id: i64,
    pub node_id: i64,
    pub host: String,
    pub collection: String,
    pub file_handle: i64,
    pub status: Status,
    pub time: DateTime<Utc>,
    pub resources_changed: i64,
    pub resources_failed: i64,
    pub resources_total: i64,
    pub runtime: f64,
    pub new_report: bool,
}

/// Report metadata together with its compressed payload.
#[derive(Debug, Clone)]
pub struct FetchedReport {
    pub metadata: ReportMetadata,
    pub payload: Vec<u8>,
}
