//! Report retrieval by ID.
//!
//! Fetches a report's metadata and stored payload. Used by both the
//! `sng get` CLI command and `GET /reports/{id}`.

use anyhow::Result;
use base64::Engine;
use serde::Serialize;
use std::io::Write;

use crate::config::Config;
use crate::models::{FetchedReport, ReportMetadata};
use crate::payload;
use crate::store::ReportStore;

/// Report response: metadata plus the compressed payload, base64-encoded.
#[derive(Debug, Clone, Serialize)]
pub struct ReportResponse {
    #[serde(flatten)]
    pub metadata: ReportMetadata,
    pub payload_sha256: String,
    pub payload_encoding: &'static str,
    pub payload: String,
}

impl From<FetchedReport> for ReportResponse {
    fn from(report: FetchedReport) -> Self {
        Self {
            payload_sha256: payload::digest(&report.payload),
            payload_encoding: "zstd+base64",
            payload: base64::engine::general_purpose::STANDARD.encode(&report.payload),
            metadata: report.metadata,
        }
    }
}

/// CLI entry point. With `raw`, writes the decompressed document to stdout.
pub async fn run_get(config: &Config, report_id: i64, raw: bool) -> Result<()> {
    let store = ReportStore::open(config).await?;
    let report = store.fetch_report(report_id).await?;
    store.close().await;

    if raw {
        let body = payload::decompress(&report.payload)?;
        std::io::stdout().write_all(&body)?;
        return Ok(());
    }

    let meta = &report.metadata;
    println!("--- Report ---");
    println!("id:           {}", meta.report_id);
    println!("host:         {} (node {})", meta.host, meta.node_id);
    println!("status:       {}", meta.status);
    println!("time:         {}", meta.time.format("%Y-%m-%dT%H:%M:%SZ"));
    println!("collection:   {}", meta.collection);
    println!(
        "resources:    {} changed, {} failed, {} total",
        meta.resources_changed, meta.resources_failed, meta.resources_total
    );
    println!("runtime:      {:.2}s", meta.runtime);
    println!(
        "payload:      {} ({} bytes, sha256 {})",
        if meta.new_report {
            "own".to_string()
        } else {
            format!("shared with report {}", meta.file_handle)
        },
        report.payload.len(),
        payload::digest(&report.payload)
    );

    Ok(())
}
