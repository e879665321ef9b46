//! # Singularity CLI (`sng`)
//!
//! The `sng` binary initializes the report store, ingests report files,
//! prints fleet status and report listings, and runs the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! sng --config ./config/sng.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `sng init` | Create the database and bring the schema up to date |
//! | `sng ingest <file>...` | Ingest Puppet report files |
//! | `sng stats` | Node counts per status and deduplication savings |
//! | `sng list` | List reports (current, by host, status, or unresponsive) |
//! | `sng get <id>` | Show a report's metadata, or its raw document with `--raw` |
//! | `sng serve` | Start the HTTP server |

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use singularity::config;
use singularity::ingest::{self, IngestContext};
use singularity::models::ReportFilter;
use singularity::status::Status;
use singularity::store::ReportStore;
use singularity::{get, list, logging, server, stats};

/// Singularity: Puppet report ingestion with payload deduplication.
#[derive(Parser)]
#[command(name = "sng", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/sng.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database and run schema migrations.
    ///
    /// Safe to run repeatedly; an up-to-date store runs no migration steps.
    Init,

    /// Ingest one or more raw report files.
    Ingest {
        /// Report files (YAML).
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Show node counts per status.
    Stats,

    /// List reports, newest first.
    ///
    /// Without `--host`, only each node's current report is listed.
    List {
        /// Show the full report history of this host.
        #[arg(long)]
        host: Option<String>,

        /// Only reports with this status.
        #[arg(long, value_parser = parse_status)]
        status: Option<Status>,

        /// Only nodes whose current report is older than the threshold.
        #[arg(long)]
        unresponsive: bool,
    },

    /// Show a stored report.
    Get {
        /// Report id.
        id: i64,

        /// Write the decompressed report document to stdout.
        #[arg(long)]
        raw: bool,
    },

    /// Start the HTTP server.
    Serve,
}

fn parse_status(s: &str) -> Result<Status, String> {
    Status::ALL
        .into_iter()
        .find(|status| status.name() == s)
        .ok_or_else(|| format!("unknown status '{}'", s))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging.level);

    match cli.command {
        Commands::Init => {
            let store = ReportStore::open(&cfg).await?;
            let schema = store.schema_status();
            println!(
                "Database initialized at schema v{} ({} migration step{} applied).",
                schema.version,
                schema.steps_run.len(),
                if schema.steps_run.len() == 1 { "" } else { "s" }
            );
            store.close().await;
        }
        Commands::Ingest { files } => {
            let store = ReportStore::open(&cfg).await?;
            let mut rejected = 0usize;
            for path in &files {
                let body = std::fs::read(path)
                    .with_context(|| format!("Failed to read report: {}", path.display()))?;
                let ctx = IngestContext::new(&store, &cfg.ingest);
                match ingest::ingest(&ctx, &body).await {
                    Ok(outcome) => println!(
                        "{}: report {} for {} ({}, {})",
                        path.display(),
                        outcome.report_id,
                        outcome.host,
                        outcome.status,
                        if outcome.new_report {
                            "new".to_string()
                        } else {
                            format!("deduplicated against {}", outcome.file_handle)
                        }
                    ),
                    Err(e) => {
                        rejected += 1;
                        eprintln!("{}: rejected: {}", path.display(), e);
                    }
                }
            }
            store.close().await;
            println!("ingested: {}, rejected: {}", files.len() - rejected, rejected);
            if rejected > 0 {
                anyhow::bail!("{} report(s) rejected", rejected);
            }
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::List {
            host,
            status,
            unresponsive,
        } => {
            let filter = ReportFilter {
                host,
                status,
                unresponsive,
            };
            list::run_list(&cfg, &filter).await?;
        }
        Commands::Get { id, raw } => {
            get::run_get(&cfg, id, raw).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
