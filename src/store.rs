//! SQLite-backed report store.
//!
//! [`ReportStore`] owns the connection pool and is the only component that
//! touches storage. It is opened through [`ReportStore::open`], which runs
//! the [`SchemaCoordinator`] before handing out the store, so no read or
//! write can happen against a stale schema.
//!
//! Ingestion writes go through a [`StoreTx`]: every primitive of a single
//! ingestion runs in one SQLite transaction, and dropping the transaction
//! without [`StoreTx::commit`] rolls everything back. A failed ingestion
//! therefore never leaves a node pointing at a half-written report.
//!
//! # Tables
//!
//! | Table | Contents |
//! |-------|----------|
//! | `nodes` | One row per hostname, with its current-report pointer |
//! | `collections` | One row per ingestion day |
//! | `reports` | Append-only report metadata, status stored as its code |
//! | `reportdata` | Compressed payloads keyed by file handle |
//! | `schemaversion` | Migration log, see [`schema`](crate::schema) |
//! | `timing_data` | Per-report ingest timings |

use chrono::{DateTime, TimeDelta, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::debug;

use crate::config::Config;
use crate::db;
use crate::error::{ReportError, Result};
use crate::models::{
    Counts, FetchedReport, NodeLookup, PreviousReport, ReportFilter, ReportMetadata, ReportRow,
    ResourceCounters,
};
use crate::schema::{SchemaCoordinator, SchemaStatus};
use crate::status::Status;

const ROW_COLUMNS: &str = "SELECT n.id AS node_id, n.host, r.status, r.id AS report_id, r.time, \
     r.resources_changed, r.resources_failed, r.resources_total, r.runtime \
     FROM nodes n";

/// Handle to the report database.
///
/// Cheap to clone; clones share the pool.
#[derive(Clone)]
pub struct ReportStore {
    pool: SqlitePool,
    schema: SchemaStatus,
    unresponsive_threshold: TimeDelta,
}

impl ReportStore {
    /// Connect, bring the schema to the expected version, and return the store.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        let schema = SchemaCoordinator::new(&pool, &config.schema).run().await?;
        Ok(Self {
            pool,
            schema,
            unresponsive_threshold: TimeDelta::hours(i64::from(
                config.ingest.unresponsive_threshold_hours,
            )),
        })
    }

    pub fn schema_status(&self) -> &SchemaStatus {
        &self.schema
    }

    /// Reports timed before this instant mark their node unresponsive.
    pub fn stale_before(&self) -> DateTime<Utc> {
        Utc::now() - self.unresponsive_threshold
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Start an ingestion transaction.
    pub async fn begin(&self) -> Result<StoreTx> {
        Ok(StoreTx {
            tx: self.pool.begin().await?,
        })
    }

    /// Count nodes by the status of their current report.
    ///
    /// Every status is present in the result, with zero when no node has it.
    pub async fn aggregate_counts(&self) -> Result<Counts> {
        let rows = sqlx::query(
            r#"
            SELECT r.status AS status, COUNT(n.host) AS count
            FROM nodes n
            JOIN reports r ON n.current_report = r.id
            GROUP BY r.status
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut counts = Counts::default();
        for status in Status::ALL {
            counts.by_status.insert(status.name().to_string(), 0);
        }
        for row in &rows {
            let status = Status::try_from(row.get::<i64, _>("status"))?;
            let count: i64 = row.get("count");
            counts.by_status.insert(status.name().to_string(), count);
            counts.all += count;
        }

        counts.unresponsive = sqlx::query_scalar(
            r#"
            SELECT COUNT(n.host)
            FROM nodes n
            JOIN reports r ON n.current_report = r.id
            WHERE r.time < ?
            "#,
        )
        .bind(self.stale_before().timestamp())
        .fetch_one(&self.pool)
        .await?;

        Ok(counts)
    }

    /// List report rows joined with their node, newest first.
    ///
    /// With a host filter the host's whole history is listed (optionally
    /// narrowed by status). Otherwise only current reports are listed,
    /// narrowed by status, or else by staleness when `unresponsive` is set.
    pub async fn tabular(&self, filter: &ReportFilter) -> Result<Vec<ReportRow>> {
        let history = "JOIN reports r ON n.id = r.node_id";
        let current = "JOIN reports r ON n.current_report = r.id";

        let (join, clause) = match (&filter.host, filter.status) {
            (Some(_), Some(_)) => (history, "WHERE n.host = ? AND r.status = ?"),
            (Some(_), None) => (history, "WHERE n.host = ?"),
            (None, Some(_)) => (current, "WHERE r.status = ?"),
            (None, None) if filter.unresponsive => (current, "WHERE r.time < ?"),
            (None, None) => (current, ""),
        };
        let sql = format!(
            "{} {} {} ORDER BY r.time DESC, r.id DESC",
            ROW_COLUMNS, join, clause
        );

        let mut query = sqlx::query(&sql);
        if let Some(host) = &filter.host {
            query = query.bind(host.as_str());
        }
        if let Some(status) = filter.status {
            query = query.bind(status.code());
        } else if filter.host.is_none() && filter.unresponsive {
            query = query.bind(self.stale_before().timestamp());
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(report_row).collect()
    }

    /// Fetch a report's metadata and its compressed payload.
    pub async fn fetch_report(&self, report_id: i64) -> Result<FetchedReport> {
        let row = sqlx::query(
            r#"
            SELECT r.id AS report_id, r.node_id, n.host, c.collection, r.file_handle,
                   r.status, r.time, r.resources_changed, r.resources_failed,
                   r.resources_total, r.runtime, r.new_report, d.report
            FROM reports r
            JOIN nodes n ON r.node_id = n.id
            JOIN collections c ON r.collection = c.id
            JOIN reportdata d ON r.file_handle = d.id
            WHERE r.id = ?
            "#,
        )
        .bind(report_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(ReportError::NoSuchReport(report_id))?;

        let metadata = ReportMetadata {
            report_id: row.get("report_id"),
            node_id: row.get("node_id"),
            host: row.get("host"),
            collection: row.get("collection"),
            file_handle: row.get("file_handle"),
            status: Status::try_from(row.get::<i64, _>("status"))?,
            time: from_unix(row.get("time")),
            resources_changed: row.get("resources_changed"),
            resources_failed: row.get("resources_failed"),
            resources_total: row.get("resources_total"),
            runtime: row.get("runtime"),
            new_report: row.get::<i64, _>("new_report") != 0,
        };

        Ok(FetchedReport {
            metadata,
            payload: row.get("report"),
        })
    }

    /// Record how long a report took to ingest and to parse, in seconds.
    pub async fn record_timing(&self, report_id: i64, elapsed: f64, parse: f64) -> Result<()> {
        sqlx::query(
            "INSERT INTO timing_data (report_id, elapsed_time, parse_timing) VALUES (?, ?, ?)",
        )
        .bind(report_id)
        .bind(elapsed)
        .bind(parse)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn report_count(&self) -> Result<i64> {
        self.count("SELECT COUNT(*) FROM reports").await
    }

    pub async fn payload_count(&self) -> Result<i64> {
        self.count("SELECT COUNT(*) FROM reportdata").await
    }

    pub async fn node_count(&self) -> Result<i64> {
        self.count("SELECT COUNT(*) FROM nodes").await
    }

    async fn count(&self, sql: &str) -> Result<i64> {
        Ok(sqlx::query_scalar(sql).fetch_one(&self.pool).await?)
    }
}

/// One ingestion's worth of writes.
///
/// Start with [`resolve_collection`](StoreTx::resolve_collection): its
/// insert takes SQLite's write lock before anything is read, so concurrent
/// ingestions queue on the busy timeout instead of failing on a stale
/// snapshot.
pub struct StoreTx {
    tx: Transaction<'static, Sqlite>,
}

impl StoreTx {
    /// Id of the named collection, creating it if absent.
    pub async fn resolve_collection(&mut self, name: &str) -> Result<i64> {
        let created = sqlx::query(
            "INSERT INTO collections (collection) VALUES (?) ON CONFLICT(collection) DO NOTHING",
        )
        .bind(name)
        .execute(&mut *self.tx)
        .await?
        .rows_affected();
        if created == 1 {
            debug!(collection = name, "created collection");
        }
        self.collection_id(name).await
    }

    pub async fn collection_id(&mut self, name: &str) -> Result<i64> {
        sqlx::query_scalar("SELECT id FROM collections WHERE collection = ?")
            .bind(name)
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or_else(|| ReportError::NoSuchCollection(name.to_string()))
    }

    pub async fn node_id(&mut self, hostname: &str) -> Result<i64> {
        sqlx::query_scalar("SELECT id FROM nodes WHERE host = ?")
            .bind(hostname)
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or_else(|| ReportError::NoSuchHost(hostname.to_string()))
    }

    /// Resolve a host and the report its pointer currently references.
    ///
    /// More than one resolved current report is a
    /// [`ReportError::ConsistencyViolation`].
    pub async fn resolve_node_and_current_report(&mut self, hostname: &str) -> Result<NodeLookup> {
        let rows = sqlx::query(
            r#"
            SELECT n.id AS node_id, r.id AS report_id, r.status, r.collection, r.file_handle
            FROM nodes n
            JOIN reports r ON n.id = r.node_id
            WHERE n.current_report = r.id AND n.host = ?
            "#,
        )
        .bind(hostname)
        .fetch_all(&mut *self.tx)
        .await?;

        match rows.as_slice() {
            [] => match self.node_id(hostname).await {
                Ok(node_id) => Ok(NodeLookup::Found {
                    node_id,
                    previous: None,
                }),
                Err(ReportError::NoSuchHost(_)) => Ok(NodeLookup::Missing),
                Err(e) => Err(e),
            },
            [row] => {
                let report_id: i64 = row.get("report_id");
                Ok(NodeLookup::Found {
                    node_id: row.get("node_id"),
                    previous: Some(PreviousReport {
                        report_id,
                        status: Status::try_from(row.get::<i64, _>("status"))?,
                        collection_id: row.get("collection"),
                        file_handle: row
                            .get::<Option<i64>, _>("file_handle")
                            .unwrap_or(report_id),
                    }),
                })
            }
            _ => Err(ReportError::ConsistencyViolation {
                host: hostname.to_string(),
                current: rows.len(),
            }),
        }
    }

    pub async fn create_node(&mut self, hostname: &str) -> Result<i64> {
        let result = sqlx::query("INSERT INTO nodes (host, last_seen) VALUES (?, ?)")
            .bind(hostname)
            .bind(Utc::now().timestamp())
            .execute(&mut *self.tx)
            .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn insert_report(
        &mut self,
        node_id: i64,
        collection_id: i64,
        status: Status,
        time: DateTime<Utc>,
        counters: &ResourceCounters,
    ) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO reports (node_id, collection, status, time, resources_changed,
                                 resources_failed, resources_total, runtime)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(node_id)
        .bind(collection_id)
        .bind(status.code())
        .bind(time.timestamp())
        .bind(counters.changed)
        .bind(counters.failed)
        .bind(counters.total)
        .bind(counters.runtime)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Point the node at `report_id` and refresh its last-seen time.
    ///
    /// The report row must already exist in this transaction.
    pub async fn set_current_report(&mut self, node_id: i64, report_id: i64) -> Result<()> {
        sqlx::query("UPDATE nodes SET current_report = ?, last_seen = ? WHERE id = ?")
            .bind(report_id)
            .bind(Utc::now().timestamp())
            .bind(node_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    /// Store payload bytes under `file_handle`, replacing any existing bytes.
    pub async fn write_payload(&mut self, file_handle: i64, compressed: &[u8]) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO reportdata (id, report) VALUES (?, ?)
            ON CONFLICT(id) DO UPDATE SET report = excluded.report
            "#,
        )
        .bind(file_handle)
        .bind(compressed)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    pub async fn finalize_report(
        &mut self,
        report_id: i64,
        file_handle: i64,
        collection_id: i64,
        is_new: bool,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE reports SET new_report = ?, file_handle = ?, collection = ? WHERE id = ?",
        )
        .bind(is_new)
        .bind(file_handle)
        .bind(collection_id)
        .bind(report_id)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

fn from_unix(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_default()
}

fn report_row(row: &SqliteRow) -> Result<ReportRow> {
    Ok(ReportRow {
        node_id: row.get("node_id"),
        host: row.get("host"),
        status: Status::try_from(row.get::<i64, _>("status"))?,
        report_id: row.get("report_id"),
        time: from_unix(row.get("time")),
        resources_changed: row.get("resources_changed"),
        resources_failed: row.get("resources_failed"),
        resources_total: row.get("resources_total"),
        runtime: row.get("runtime"),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    /// A store whose `nodes` table lacks the UNIQUE constraint on `host`,
    /// holding two `web01` nodes that each point at their own current
    /// report. Returns a second pool onto the same database for inspection.
    pub(crate) async fn store_with_duplicate_host(tmp: &TempDir) -> (ReportStore, SqlitePool) {
        let config = Config::minimal(tmp.path().join("sng.sqlite"));
        let pool = db::connect(&config).await.unwrap();
        sqlx::query(
            r#"
            CREATE TABLE nodes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                host TEXT NOT NULL,
                last_seen INTEGER NOT NULL,
                current_report INTEGER
            )
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();

        let store = ReportStore::open(&config).await.unwrap();

        for statement in [
            "INSERT INTO collections (collection) VALUES ('2024-3-1')",
            "INSERT INTO nodes (host, last_seen) VALUES ('web01', 0), ('web01', 0)",
            r#"INSERT INTO reports (node_id, file_handle, status, collection, time,
                   resources_changed, resources_failed, resources_total, runtime, new_report)
               VALUES (1, 1, 1, 1, 0, 0, 0, 0, 0.0, 1), (2, 2, 1, 1, 0, 0, 0, 0, 0.0, 1)"#,
            "INSERT INTO reportdata (id, report) VALUES (1, x'00'), (2, x'00')",
            "UPDATE nodes SET current_report = id",
        ] {
            sqlx::query(statement).execute(&pool).await.unwrap();
        }

        (store, pool)
    }

    async fn open_store(tmp: &TempDir) -> ReportStore {
        let config = Config::minimal(tmp.path().join("sng.sqlite"));
        ReportStore::open(&config).await.unwrap()
    }

    fn counters(total: i64) -> ResourceCounters {
        ResourceCounters {
            changed: 1,
            failed: 0,
            total,
            runtime: 2.5,
        }
    }

    /// Insert a finalized report for `host` and make it current.
    async fn seed(store: &ReportStore, host: &str, status: Status, time: DateTime<Utc>) -> i64 {
        let mut tx = store.begin().await.unwrap();
        let collection = tx.resolve_collection("2024-3-1").await.unwrap();
        let node_id = match tx.resolve_node_and_current_report(host).await.unwrap() {
            NodeLookup::Missing => tx.create_node(host).await.unwrap(),
            NodeLookup::Found { node_id, .. } => node_id,
        };
        let report_id = tx
            .insert_report(node_id, collection, status, time, &counters(10))
            .await
            .unwrap();
        tx.write_payload(report_id, b"payload").await.unwrap();
        tx.finalize_report(report_id, report_id, collection, true)
            .await
            .unwrap();
        tx.set_current_report(node_id, report_id).await.unwrap();
        tx.commit().await.unwrap();
        report_id
    }

    #[tokio::test]
    async fn test_resolve_collection_creates_once() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        let mut tx = store.begin().await.unwrap();

        assert!(matches!(
            tx.collection_id("2024-3-1").await,
            Err(ReportError::NoSuchCollection(_))
        ));
        let first = tx.resolve_collection("2024-3-1").await.unwrap();
        let second = tx.resolve_collection("2024-3-1").await.unwrap();
        let other = tx.resolve_collection("2024-3-2").await.unwrap();
        assert_eq!(first, second);
        assert_ne!(first, other);
    }

    #[tokio::test]
    async fn test_lookup_states() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;

        let mut tx = store.begin().await.unwrap();
        assert_eq!(
            tx.resolve_node_and_current_report("web01").await.unwrap(),
            NodeLookup::Missing
        );
        let node_id = tx.create_node("web01").await.unwrap();
        assert_eq!(
            tx.resolve_node_and_current_report("web01").await.unwrap(),
            NodeLookup::Found {
                node_id,
                previous: None
            }
        );
        tx.commit().await.unwrap();

        let report_id = seed(&store, "web01", Status::Changed, Utc::now()).await;
        let mut tx = store.begin().await.unwrap();
        match tx.resolve_node_and_current_report("web01").await.unwrap() {
            NodeLookup::Found {
                node_id: found,
                previous: Some(prev),
            } => {
                assert_eq!(found, node_id);
                assert_eq!(prev.report_id, report_id);
                assert_eq!(prev.file_handle, report_id);
                assert_eq!(prev.status, Status::Changed);
            }
            other => panic!("expected a current report, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_two_current_reports_is_consistency_violation() {
        let tmp = TempDir::new().unwrap();
        let (store, _pool) = store_with_duplicate_host(&tmp).await;

        let mut tx = store.begin().await.unwrap();
        let err = tx.resolve_node_and_current_report("web01").await.unwrap_err();
        match err {
            ReportError::ConsistencyViolation { host, current } => {
                assert_eq!(host, "web01");
                assert_eq!(current, 2);
            }
            other => panic!("expected a consistency violation, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;

        {
            let mut tx = store.begin().await.unwrap();
            let collection = tx.resolve_collection("2024-3-1").await.unwrap();
            let node_id = tx.create_node("web01").await.unwrap();
            tx.insert_report(node_id, collection, Status::Changed, Utc::now(), &counters(1))
                .await
                .unwrap();
        }

        assert_eq!(store.node_count().await.unwrap(), 0);
        assert_eq!(store.report_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_write_payload_replaces_by_handle() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        let report_id = seed(&store, "web01", Status::Unchanged, Utc::now()).await;

        let mut tx = store.begin().await.unwrap();
        tx.write_payload(report_id, b"newer bytes").await.unwrap();
        tx.write_payload(report_id, b"newer bytes").await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.payload_count().await.unwrap(), 1);
        let fetched = store.fetch_report(report_id).await.unwrap();
        assert_eq!(fetched.payload, b"newer bytes");
    }

    #[tokio::test]
    async fn test_fetch_report_metadata() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        let time = DateTime::from_timestamp(1_709_280_000, 0).unwrap();
        let report_id = seed(&store, "web01", Status::Failed, time).await;

        let fetched = store.fetch_report(report_id).await.unwrap();
        assert_eq!(fetched.metadata.host, "web01");
        assert_eq!(fetched.metadata.collection, "2024-3-1");
        assert_eq!(fetched.metadata.status, Status::Failed);
        assert_eq!(fetched.metadata.time, time);
        assert_eq!(fetched.metadata.resources_total, 10);
        assert!(fetched.metadata.new_report);

        assert!(matches!(
            store.fetch_report(report_id + 100).await,
            Err(ReportError::NoSuchReport(_))
        ));
    }

    #[tokio::test]
    async fn test_aggregate_counts() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        let now = Utc::now();
        let stale = now - TimeDelta::hours(5);

        seed(&store, "web01", Status::Failed, stale).await;
        seed(&store, "web01", Status::Changed, now).await;
        seed(&store, "web02", Status::Unchanged, now).await;
        seed(&store, "web03", Status::Unchanged, stale).await;

        let counts = store.aggregate_counts().await.unwrap();
        assert_eq!(counts.get(Status::Changed), 1);
        assert_eq!(counts.get(Status::Unchanged), 2);
        assert_eq!(counts.get(Status::Failed), 0);
        assert_eq!(counts.get(Status::Pending), 0);
        assert_eq!(counts.all, 3);
        assert_eq!(counts.unresponsive, 1);
        assert_eq!(counts.by_status.values().sum::<i64>(), counts.all);
    }

    #[tokio::test]
    async fn test_tabular_filters() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        let now = Utc::now();
        let stale = now - TimeDelta::hours(5);

        seed(&store, "web01", Status::Failed, now - TimeDelta::minutes(30)).await;
        seed(&store, "web01", Status::Changed, now).await;
        seed(&store, "web02", Status::Unchanged, now - TimeDelta::minutes(10)).await;
        seed(&store, "web03", Status::Changed, stale).await;

        let all = store.tabular(&ReportFilter::default()).await.unwrap();
        let hosts: Vec<&str> = all.iter().map(|r| r.host.as_str()).collect();
        assert_eq!(hosts, vec!["web01", "web02", "web03"]);

        let history = store
            .tabular(&ReportFilter {
                host: Some("web01".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].status, Status::Changed);
        assert_eq!(history[1].status, Status::Failed);

        let failed_history = store
            .tabular(&ReportFilter {
                host: Some("web01".to_string()),
                status: Some(Status::Failed),
                unresponsive: false,
            })
            .await
            .unwrap();
        assert_eq!(failed_history.len(), 1);

        // Status without host only considers current reports
        let failed = store
            .tabular(&ReportFilter {
                status: Some(Status::Failed),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(failed.is_empty());

        let changed = store
            .tabular(&ReportFilter {
                status: Some(Status::Changed),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(changed.len(), 2);

        let unresponsive = store
            .tabular(&ReportFilter {
                unresponsive: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(unresponsive.len(), 1);
        assert_eq!(unresponsive[0].host, "web03");
    }
}
