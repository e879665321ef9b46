//! Report ingestion pipeline.
//!
//! Coordinates a single upload: parse → pending classification →
//! deduplication → storage. All store writes for one report happen in one
//! transaction, so a failure at any stage leaves the store untouched.
//!
//! ```text
//! raw body ──▶ parser ──▶ pending ──▶ dedup ◀── previous current report
//!                                       │
//!                                       ▼
//!                        collection · node · report · payload · pointer
//! ```
//!
//! Ingest timing (total and parse) is recorded after commit and is
//! non-fatal: a failure there is logged and the upload still succeeds.

use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::IngestConfig;
use crate::dedup::{self, Decision};
use crate::error::Result;
use crate::models::{NodeLookup, ReportSummary};
use crate::parser;
use crate::payload;
use crate::pending;
use crate::status::Status;
use crate::store::ReportStore;

/// Per-upload context, built once by the caller and passed by reference.
pub struct IngestContext<'a> {
    pub store: &'a ReportStore,
    pub settings: &'a IngestConfig,
    /// Determines the day collection a new report lands in.
    pub received_at: DateTime<Utc>,
    pub request_id: Uuid,
}

impl<'a> IngestContext<'a> {
    pub fn new(store: &'a ReportStore, settings: &'a IngestConfig) -> Self {
        Self {
            store,
            settings,
            received_at: Utc::now(),
            request_id: Uuid::new_v4(),
        }
    }

    pub fn received_at(mut self, at: DateTime<Utc>) -> Self {
        self.received_at = at;
        self
    }
}

/// What happened to an accepted report.
#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub host: String,
    pub node_id: i64,
    pub report_id: i64,
    pub status: Status,
    pub collection_id: i64,
    pub file_handle: i64,
    /// `false` when the payload of the previous report was reused.
    pub new_report: bool,
    pub new_node: bool,
}

/// Collection name for a given ingestion instant: one per UTC day.
pub fn collection_name(at: DateTime<Utc>) -> String {
    format!("{}-{}-{}", at.year(), at.month(), at.day())
}

/// Ingest one raw report.
///
/// Returns [`ReportError::MalformedReport`](crate::error::ReportError::MalformedReport)
/// without touching the store when the summary cannot be extracted.
pub async fn ingest(ctx: &IngestContext<'_>, raw_body: &[u8]) -> Result<IngestOutcome> {
    let started = Instant::now();
    let request_id = ctx.request_id;

    let text = String::from_utf8_lossy(raw_body);
    let mut summary = parser::parse_report(&text).map_err(|e| {
        error!(%request_id, stage = "parse", error = %e, "rejected report");
        e
    })?;
    let parse_secs = started.elapsed().as_secs_f64();

    pending::classify(&mut summary);
    info!(%request_id, host = %summary.host, status = %summary.status, "received report");

    let compressed = payload::compress(raw_body, ctx.settings.compression_level)?;

    let outcome = store_summary(ctx, &summary, &compressed)
        .await
        .map_err(|e| {
            error!(%request_id, host = %summary.host, stage = "store", error = %e, "failed to store report");
            e
        })?;

    let elapsed_secs = started.elapsed().as_secs_f64();
    debug!(
        host = %outcome.host,
        report_id = outcome.report_id,
        elapsed_secs,
        parse_secs,
        "report stored"
    );
    if let Err(e) = ctx
        .store
        .record_timing(outcome.report_id, elapsed_secs, parse_secs)
        .await
    {
        warn!(report_id = outcome.report_id, error = %e, "failed to record ingest timing");
    }

    Ok(outcome)
}

async fn store_summary(
    ctx: &IngestContext<'_>,
    summary: &ReportSummary,
    compressed: &[u8],
) -> Result<IngestOutcome> {
    let host = summary.host.as_str();
    let mut tx = ctx.store.begin().await?;

    let todays_collection = tx
        .resolve_collection(&collection_name(ctx.received_at))
        .await?;

    let (node_id, previous, new_node) = match tx.resolve_node_and_current_report(host).await? {
        NodeLookup::Missing => {
            info!(host, "new host, creating node");
            (tx.create_node(host).await?, None, true)
        }
        NodeLookup::Found { node_id, previous } => {
            if previous.is_none() {
                debug!(host, node_id, "node has no current report");
            }
            (node_id, previous, false)
        }
    };

    let report_id = tx
        .insert_report(
            node_id,
            todays_collection,
            summary.status,
            summary.time,
            &summary.metrics.counters(),
        )
        .await?;

    let decision = dedup::decide(previous.as_ref(), summary.status);
    let (file_handle, collection_id) = match decision {
        Decision::New => {
            debug!(host, node_id, report_id, "storing new report payload");
            (report_id, todays_collection)
        }
        Decision::Duplicate {
            file_handle,
            collection_id,
        } => {
            debug!(host, node_id, report_id, file_handle, "unchanged since previous report, deduplicating");
            (file_handle, collection_id)
        }
    };

    tx.write_payload(file_handle, compressed).await?;
    tx.finalize_report(report_id, file_handle, collection_id, decision.is_new())
        .await?;
    tx.set_current_report(node_id, report_id).await?;
    tx.commit().await?;

    Ok(IngestOutcome {
        host: summary.host.clone(),
        node_id,
        report_id,
        status: summary.status,
        collection_id,
        file_handle,
        new_report: decision.is_new(),
        new_node,
    })
}
