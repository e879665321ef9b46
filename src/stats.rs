//! Fleet status overview.
//!
//! Prints the node counts per current status, the unresponsive count, and
//! how much payload storage deduplication saved. Used by `sng stats`.

use anyhow::Result;

use crate::config::Config;
use crate::status::Status;
use crate::store::ReportStore;

/// Run the stats command: query the store and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let store = ReportStore::open(config).await?;

    let counts = store.aggregate_counts().await?;
    let reports = store.report_count().await?;
    let payloads = store.payload_count().await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Singularity Fleet Status");
    println!("========================");
    println!();
    println!("  Database:      {}", config.db.path.display());
    println!("  Size:          {}", format_bytes(db_size));
    println!("  Schema:        v{}", store.schema_status().version);
    println!();
    println!("  Nodes:         {}", counts.all);
    for status in Status::ALL {
        println!(
            "    {:<12} {:>6}",
            status.name(),
            counts.get(status)
        );
    }
    println!(
        "    {:<12} {:>6}   (no report in {}h)",
        "unresponsive", counts.unresponsive, config.ingest.unresponsive_threshold_hours
    );
    println!();
    println!("  Reports:       {}", reports);
    println!(
        "  Payloads:      {} ({}% deduplicated)",
        payloads,
        dedup_percent(reports, payloads)
    );
    println!();

    store.close().await;
    Ok(())
}

/// Share of reports that reuse another report's payload.
fn dedup_percent(reports: i64, payloads: i64) -> i64 {
    if reports > 0 {
        ((reports - payloads).max(0) * 100) / reports
    } else {
        0
    }
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_percent() {
        assert_eq!(dedup_percent(0, 0), 0);
        assert_eq!(dedup_percent(10, 10), 0);
        assert_eq!(dedup_percent(10, 1), 90);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }
}
