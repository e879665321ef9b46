//! Fast report summary extraction.
//!
//! Puppet reports are large YAML documents; loading one fully can take tens
//! of seconds. At ingest time only `host`, `time`, `status`, and the
//! `metrics` block are needed, so [`parse_report`] makes a single pass over
//! the lines, keeps just those, and loads the reduced document.
//!
//! # Reduction
//!
//! Puppet serializes a report as a tagged mapping whose keys sit at a
//! two-space indentation:
//!
//! ```text
//! --- !ruby/object:Puppet::Transaction::Report
//!   host: web01.example.com
//!   time: 2024-03-01 10:00:00.123456 +00:00
//!   status: unchanged
//!   metrics:
//!     resources: !ruby/object:Puppet::Util::Metric
//!       values:
//!         - - total
//!           - Total
//!           - 7
//!   logs: ...
//! ```
//!
//! Kept lines are the top-level `host:`, `time:`, `status:` lines, and the
//! `metrics:` line together with every following line indented by at least
//! four spaces. Everything else is dropped.
//!
//! # Loading
//!
//! The reduced text is loaded with `serde_yaml` into a plain data tree.
//! YAML tags (`!ruby/object:...`) are discarded, so nothing in the document
//! can name a type to instantiate. The full document is only loaded when a
//! report is rendered, which is outside ingestion.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_yaml::{Mapping, Value};

use crate::error::{ReportError, Result};
use crate::models::{MetricValue, ReportMetrics, ReportSummary};
use crate::status::Status;

const TOP_LEVEL_KEYS: [&str; 3] = ["  host: ", "  time: ", "  status: "];
const METRICS_LINE: &str = "  metrics:";
const CONTINUATION_INDENT: &str = "    ";

/// Reduce a raw report to the lines needed at ingest time.
pub fn reduce_document(body: &str) -> String {
    let mut output = vec!["---"];
    let mut in_metrics = false;

    for line in body.lines() {
        if in_metrics {
            if line.starts_with(CONTINUATION_INDENT) {
                output.push(line);
                continue;
            }
            in_metrics = false;
        }
        if line.starts_with(METRICS_LINE) {
            output.push(line);
            in_metrics = true;
            continue;
        }
        if TOP_LEVEL_KEYS.iter().any(|key| line.starts_with(key)) {
            output.push(line);
        }
    }

    output.join("\n")
}

/// Extract a [`ReportSummary`] from a raw report document.
///
/// Fails with [`ReportError::MalformedReport`] when the reduced document is
/// not valid YAML or lacks a usable `host`, `time`, or `status`.
pub fn parse_report(body: &str) -> Result<ReportSummary> {
    let reduced = reduce_document(body);
    let value: Value = serde_yaml::from_str(&reduced)
        .map_err(|e| ReportError::MalformedReport(format!("invalid YAML: {}", e)))?;
    let value = strip_tags(value);

    let root = match value {
        Value::Mapping(map) => map,
        Value::Null => Mapping::new(),
        _ => {
            return Err(ReportError::MalformedReport(
                "report is not a mapping".to_string(),
            ))
        }
    };

    let host = required_scalar(&root, "host")?;
    let time_raw = required_scalar(&root, "time")?;
    let status_raw = required_scalar(&root, "status")?;

    let time = parse_time(&time_raw).ok_or_else(|| {
        ReportError::MalformedReport(format!("unparseable time: {}", time_raw))
    })?;

    let metrics = match root.get("metrics") {
        Some(Value::Mapping(groups)) => parse_metrics(groups),
        _ => ReportMetrics::default(),
    };

    Ok(ReportSummary {
        host,
        time,
        status: Status::from_name(Some(status_raw.as_str())),
        metrics,
    })
}

fn strip_tags(value: Value) -> Value {
    match value {
        Value::Tagged(tagged) => strip_tags(tagged.value),
        Value::Sequence(seq) => Value::Sequence(seq.into_iter().map(strip_tags).collect()),
        Value::Mapping(map) => Value::Mapping(
            map.into_iter()
                .map(|(k, v)| (strip_tags(k), strip_tags(v)))
                .collect(),
        ),
        other => other,
    }
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn required_scalar(root: &Mapping, key: &str) -> Result<String> {
    root.get(key)
        .and_then(scalar_string)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ReportError::MalformedReport(format!("missing field: {}", key)))
}

/// Parse Puppet's `YYYY-MM-DD HH:MM:SS.ffffff +HH:MM` or RFC 3339.
pub fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f %:z", "%Y-%m-%d %H:%M:%S%.f %z"] {
        if let Ok(dt) = DateTime::parse_from_str(raw, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    // No offset: assume UTC
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn parse_metrics(groups: &Mapping) -> ReportMetrics {
    let mut metrics = ReportMetrics::default();
    for (name, group) in groups {
        let Some(name) = scalar_string(name) else {
            continue;
        };
        let values = group
            .get("values")
            .and_then(Value::as_sequence)
            .map(|entries| entries.iter().filter_map(parse_metric_value).collect())
            .unwrap_or_default();
        metrics.insert_group(name, values);
    }
    metrics
}

fn parse_metric_value(entry: &Value) -> Option<MetricValue> {
    let triple = entry.as_sequence()?;
    let name = triple.first().and_then(scalar_string)?;
    let label = triple.get(1).and_then(scalar_string).unwrap_or_default();
    let value = triple.get(2).and_then(Value::as_f64)?;
    Some(MetricValue { name, label, value })
}
