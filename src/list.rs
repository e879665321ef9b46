//! Tabular report listing for `sng list`.

use anyhow::Result;

use crate::config::Config;
use crate::models::{ReportFilter, ReportRow};
use crate::store::ReportStore;

pub async fn run_list(config: &Config, filter: &ReportFilter) -> Result<()> {
    let store = ReportStore::open(config).await?;
    let rows = store.tabular(filter).await?;
    store.close().await;

    if rows.is_empty() {
        println!("No reports.");
        return Ok(());
    }

    println!(
        "{:>8}  {:<32} {:<10} {:>8} {:>6} {:>6} {:>9}   {}",
        "REPORT", "HOST", "STATUS", "CHANGED", "FAILED", "TOTAL", "RUNTIME", "TIME"
    );
    println!("{}", "-".repeat(112));
    for row in &rows {
        print_row(row);
    }
    println!();
    println!("{} report{}", rows.len(), if rows.len() == 1 { "" } else { "s" });

    Ok(())
}

fn print_row(row: &ReportRow) {
    println!(
        "{:>8}  {:<32} {:<10} {:>8} {:>6} {:>6} {:>8.2}s   {} ({})",
        row.report_id,
        row.host,
        row.status.name(),
        row.resources_changed,
        row.resources_failed,
        row.resources_total,
        row.runtime,
        row.time.format("%Y-%m-%d %H:%M"),
        format_ts_relative(row.time.timestamp())
    );
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    }
}
