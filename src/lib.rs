//! # Singularity
//!
//! Ingests Puppet run reports from many hosts, stores them in SQLite with
//! payload deduplication, and serves fleet counts and report listings.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────────────┐   ┌──────────────┐
//! │ POST /upload│──▶│ parse → pending → dedup  │──▶│    SQLite    │
//! │ sng ingest  │   │      (ingest pipeline)   │   │ report store │
//! └─────────────┘   └──────────────────────────┘   └──────┬───────┘
//!                                                         │
//!                               ┌─────────────────────────┤
//!                               ▼                         ▼
//!                          ┌──────────┐             ┌──────────┐
//!                          │   CLI    │             │   HTTP   │
//!                          │  (sng)   │             │  (JSON)  │
//!                          └──────────┘             └──────────┘
//! ```
//!
//! ## Data Flow
//!
//! 1. The **parser** ([`parser`]) reduces a raw report to `host`, `time`,
//!    `status`, and `metrics` without loading the whole document.
//! 2. The **pending classifier** ([`pending`]) rewrites noop runs to
//!    `pending`.
//! 3. The **dedup engine** ([`dedup`]) compares against the host's current
//!    report; consecutive `unchanged` runs share one payload.
//! 4. The **store** ([`store`]) writes node, report, payload, and the
//!    current-report pointer in one transaction.
//! 5. Before any of that, the **schema coordinator** ([`schema`]) brings
//!    the database to the expected version under a lock-record protocol.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`error`] | `ReportError` taxonomy |
//! | [`status`] | Status taxonomy and integer codes |
//! | [`models`] | Summaries, rows, counts, filters |
//! | [`parser`] | Linear-pass report reduction and YAML load |
//! | [`pending`] | Pending-status classification |
//! | [`dedup`] | New-vs-duplicate decision |
//! | [`payload`] | zstd payload compression |
//! | [`db`] | SQLite pool and base tables |
//! | [`schema`] | Versioned schema coordinator |
//! | [`store`] | Report store: transactional writes and read views |
//! | [`ingest`] | Ingestion pipeline |
//! | [`stats`], [`list`], [`get`] | CLI output |
//! | [`server`] | HTTP server (Axum) |
//! | [`logging`] | Tracing subscriber setup |

pub mod config;
pub mod db;
pub mod dedup;
pub mod error;
pub mod get;
pub mod ingest;
pub mod list;
pub mod logging;
pub mod models;
pub mod parser;
pub mod payload;
pub mod pending;
pub mod schema;
pub mod server;
pub mod stats;
pub mod status;
pub mod store;

pub use error::ReportError;
pub use ingest::{ingest, IngestContext, IngestOutcome};
pub use status::Status;
pub use store::ReportStore;
