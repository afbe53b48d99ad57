use super::Project;
use crate::output::{CliError, OutputMode, pretty_section, render_mode};
use anyhow::Result;
use clap::Args;
use serde::Serialize;
use std::io::Write;
use strata_search::store::schema::{list_registrations, load_registration};
use strata_search::sync::rebuild_embeddings;
use strata_search::{EmbeddingGateway, SyncStats, sync_embeddings};
use tracing::{info, warn};

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Only refresh this table (default: every registered table).
    pub table: Option<String>,

    /// Queue rows per embedding batch (default: `embedding.batch_size`).
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Drop stored embeddings and re-embed every row with the current
    /// provider chain.
    #[arg(long)]
    pub rebuild: bool,
}

#[derive(Debug, Serialize)]
struct TableSync {
    table: String,
    #[serde(flatten)]
    stats: SyncStats,
    /// Set when this table failed; its remaining queue is left in place.
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<CliError>,
}

/// Execute `strata sync [table]`.
///
/// Tables are refreshed one after another. A failing table is reported and
/// the run moves on to the next one; the command still fails at the end.
///
/// # Errors
///
/// Returns an error if the store is not initialized, the named table is not
/// registered, or any table failed to sync.
pub fn run_sync(args: &SyncArgs, project: &Project, output: OutputMode) -> Result<()> {
    let config = project.config()?;
    let gateway = EmbeddingGateway::from_config(&config.embedding);
    let batch_size = args.batch_size.unwrap_or(config.embedding.batch_size);

    let store = project.open_store()?;
    let mut conn = store.connection()?;

    let tables: Vec<String> = match &args.table {
        Some(table) => vec![load_registration(&conn, table)?.table],
        None => list_registrations(&conn)?
            .into_iter()
            .map(|registration| registration.table)
            .collect(),
    };

    let mut report = Vec::with_capacity(tables.len());
    let mut first_failure = None;
    for table in tables {
        let outcome = if args.rebuild {
            rebuild_embeddings(&mut conn, &table)
                .and_then(|_| sync_embeddings(&mut conn, &table, &gateway, batch_size))
        } else {
            sync_embeddings(&mut conn, &table, &gateway, batch_size)
        };

        match outcome {
            Ok(stats) => {
                info!(table = %table, embedded = stats.embedded, "table synced");
                report.push(TableSync {
                    table,
                    stats,
                    error: None,
                });
            }
            Err(err) => {
                warn!(table = %table, "sync failed: {err:#}");
                report.push(TableSync {
                    table,
                    stats: SyncStats::default(),
                    error: Some(CliError::from_anyhow(&err)),
                });
                if first_failure.is_none() {
                    first_failure = Some(err);
                }
            }
        }
    }

    render_mode(
        output,
        &report,
        |rows, w| {
            for row in rows {
                if let Some(error) = &row.error {
                    writeln!(w, "{}\terror\t{}", row.table, error.message)?;
                    continue;
                }
                writeln!(
                    w,
                    "{}\tdequeued={}\tembedded={}\tskipped={}\trejected={}\tremoved={}",
                    row.table,
                    row.stats.dequeued,
                    row.stats.embedded,
                    row.stats.skipped,
                    row.stats.rejected,
                    row.stats.removed
                )?;
            }
            Ok(())
        },
        |rows, w| {
            if rows.is_empty() {
                return writeln!(w, "No registered tables.");
            }
            pretty_section(w, "Embedding sync")?;
            writeln!(
                w,
                "{:<24} {:>9} {:>9} {:>9} {:>9} {:>9}",
                "table", "dequeued", "embedded", "skipped", "rejected", "removed"
            )?;
            for row in rows {
                if let Some(error) = &row.error {
                    writeln!(w, "{:<24} failed: {}", row.table, error.message)?;
                    continue;
                }
                writeln!(
                    w,
                    "{:<24} {:>9} {:>9} {:>9} {:>9} {:>9}",
                    row.table,
                    row.stats.dequeued,
                    row.stats.embedded,
                    row.stats.skipped,
                    row.stats.rejected,
                    row.stats.removed
                )?;
            }
            Ok(())
        },
    )?;

    match first_failure {
        None => Ok(()),
        Some(err) => {
            let failed = report.iter().filter(|row| row.error.is_some()).count();
            Err(err.context(format!("{failed} of {} table(s) failed to sync", report.len())))
        }
    }
}
