//! Versioned schema coordination.
//!
//! The `schemaversion` table is an ordered log of migration steps. The
//! highest id is the current schema version; a record with `complete = 0`
//! means some instance is applying that step right now.
//!
//! [`SchemaCoordinator::run`] brings the store to the expected version before
//! anything else touches it:
//!
//! ```text
//!            ┌──────────────── lost lock race ───────────────┐
//!            ▼                                               │
//!        Reading ── incomplete ──▶ Waiting ── sleep ──┐      │
//!         │   ▲                                       │      │
//!         │   └───────────────────────────────────────┘      │
//!         ├── behind ──▶ Migrating ── step applied ──▶ Reading
//!         └── current ─▶ Ready
//! ```
//!
//! A step is locked by inserting its record with the target version as the
//! primary key. When two instances start together only one insert succeeds;
//! the other sees the incomplete record and waits. Waiting is bounded by
//! `schema.max_retries` polls, after which startup fails with
//! [`ReportError::SchemaNotReady`].

use sqlx::{Row, SqlitePool};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::SchemaConfig;
use crate::db;
use crate::error::{ReportError, Result};

/// Highest schema version this build knows how to reach.
pub const LATEST_VERSION: i64 = 3;

const INITIAL_COMMENT: &str = "Initial Provisioning.";

struct Migration {
    version: i64,
    comment: &'static str,
    statements: &'static [&'static str],
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 2,
        comment: "Dropped archive column.",
        statements: &["ALTER TABLE collections DROP COLUMN archived"],
    },
    Migration {
        version: 3,
        comment: "Added timing data table and report indexes.",
        statements: &[
            r#"
            CREATE TABLE IF NOT EXISTS timing_data (
                report_id INTEGER NOT NULL,
                elapsed_time REAL NOT NULL,
                parse_timing REAL NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_reports_node_id ON reports(node_id)",
            "CREATE INDEX IF NOT EXISTS idx_reports_time ON reports(time DESC)",
        ],
    },
];

/// Coordinator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaState {
    Reading,
    Waiting { version: i64 },
    Migrating { to: i64 },
    Ready { version: i64 },
}

/// Outcome of a coordinator run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaStatus {
    /// Version observed when the coordinator became ready.
    pub version: i64,
    /// Steps this instance applied, in order.
    pub steps_run: Vec<i64>,
}

/// Latest `schemaversion` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionRecord {
    pub id: i64,
    pub complete: bool,
}

pub struct SchemaCoordinator<'a> {
    pool: &'a SqlitePool,
    expected: i64,
    poll_interval: Duration,
    max_retries: u32,
}

impl<'a> SchemaCoordinator<'a> {
    pub fn new(pool: &'a SqlitePool, config: &SchemaConfig) -> Self {
        Self {
            pool,
            expected: config.expected_version,
            poll_interval: config.poll_interval(),
            max_retries: config.max_retries,
        }
    }

    /// Drive the state machine until the schema is at least the expected
    /// version.
    pub async fn run(&self) -> Result<SchemaStatus> {
        if self.expected > LATEST_VERSION {
            return Err(ReportError::Config(format!(
                "expected schema version {} is newer than this build ({})",
                self.expected, LATEST_VERSION
            )));
        }

        db::create_base_tables(self.pool).await?;
        self.ensure_initial_record().await?;

        let mut state = SchemaState::Reading;
        let mut attempts = 0u32;
        let mut steps_run = Vec::new();

        loop {
            state = match state {
                SchemaState::Reading => {
                    let record = current_record(self.pool).await?;
                    if !record.complete {
                        SchemaState::Waiting { version: record.id }
                    } else {
                        attempts = 0;
                        if record.id < self.expected {
                            SchemaState::Migrating { to: record.id + 1 }
                        } else {
                            SchemaState::Ready { version: record.id }
                        }
                    }
                }
                SchemaState::Waiting { version } => {
                    if attempts >= self.max_retries {
                        error!(version, attempts, "schema migration lock was never released");
                        return Err(ReportError::SchemaNotReady { version, attempts });
                    }
                    attempts += 1;
                    info!(version, attempt = attempts, "waiting for schema migration in progress");
                    tokio::time::sleep(self.poll_interval).await;
                    SchemaState::Reading
                }
                SchemaState::Migrating { to } => {
                    if self.apply(to).await? {
                        steps_run.push(to);
                    }
                    SchemaState::Reading
                }
                SchemaState::Ready { version } => {
                    info!(version, steps = steps_run.len(), "schema ready");
                    return Ok(SchemaStatus { version, steps_run });
                }
            };
        }
    }

    async fn ensure_initial_record(&self) -> Result<()> {
        sqlx::query(
            "INSERT INTO schemaversion (id, complete, comment) VALUES (1, 1, ?) ON CONFLICT(id) DO NOTHING",
        )
        .bind(INITIAL_COMMENT)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Lock, apply, and unlock one step. Returns `false` when another
    /// instance took the lock first.
    async fn apply(&self, version: i64) -> Result<bool> {
        let migration = MIGRATIONS
            .iter()
            .find(|m| m.version == version)
            .ok_or_else(|| {
                ReportError::Config(format!("no migration defined for version {}", version))
            })?;

        let locked = sqlx::query(
            "INSERT INTO schemaversion (id, complete, comment) VALUES (?, 0, ?) ON CONFLICT(id) DO NOTHING",
        )
        .bind(version)
        .bind(migration.comment)
        .execute(self.pool)
        .await?
        .rows_affected()
            == 1;

        if !locked {
            debug!(version, "another instance holds the migration lock");
            return Ok(false);
        }

        info!(version, comment = migration.comment, "applying schema migration");

        if let Err(e) = self.apply_statements(migration).await {
            warn!(version, error = %e, "schema migration failed, releasing lock");
            sqlx::query("DELETE FROM schemaversion WHERE id = ? AND complete = 0")
                .bind(version)
                .execute(self.pool)
                .await?;
            return Err(e);
        }

        sqlx::query("UPDATE schemaversion SET complete = 1 WHERE id = ?")
            .bind(version)
            .execute(self.pool)
            .await?;

        Ok(true)
    }

    async fn apply_statements(&self, migration: &Migration) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for statement in migration.statements.iter().copied() {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

/// Read the highest-id version record.
pub async fn current_record(pool: &SqlitePool) -> Result<VersionRecord> {
    let row = sqlx::query("SELECT id, complete FROM schemaversion ORDER BY id DESC LIMIT 1")
        .fetch_one(pool)
        .await?;
    Ok(VersionRecord {
        id: row.get("id"),
        complete: row.get::<i64, _>("complete") != 0,
    })
}
