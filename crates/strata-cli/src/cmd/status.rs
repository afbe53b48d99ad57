use super::Project;
use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};
use anyhow::{Context as _, Result};
use clap::Args;
use serde::Serialize;
use std::io::Write;
use strata_search::store::schema::{current_schema_version, list_registrations};
use strata_search::sync::{embedded_count, pending_count};
use strata_search::{EmbeddingGateway, ProviderInfo};

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Skip provider readiness checks (no network calls).
    #[arg(long)]
    pub offline: bool,
}

#[derive(Debug, Serialize)]
struct TableStatus {
    table: String,
    key_column: String,
    content_column: String,
    pending: u64,
    embedded: u64,
}

#[derive(Debug, Serialize)]
struct ProviderStatus {
    #[serde(flatten)]
    info: ProviderInfo,
    /// `None` when checks were skipped.
    ready: Option<bool>,
}

#[derive(Debug, Serialize)]
struct StatusOutput {
    database: String,
    schema_version: u32,
    vector_extension: bool,
    tables: Vec<TableStatus>,
    providers: Vec<ProviderStatus>,
}

/// Execute `strata status`.
///
/// # Errors
///
/// Returns an error if the store is not initialized or the catalog cannot be
/// read.
pub fn run_status(args: &StatusArgs, project: &Project, output: OutputMode) -> Result<()> {
    let config = project.config()?;
    let store = project.open_store()?;

    let (schema_version, tables) = {
        let conn = store.connection()?;
        let schema_version = current_schema_version(&conn).context("read schema version")?;
        let mut tables = Vec::new();
        for registration in list_registrations(&conn)? {
            tables.push(TableStatus {
                pending: pending_count(&conn, &registration.table)?,
                embedded: embedded_count(&conn, &registration.table)?,
                table: registration.table,
                key_column: registration.key_column,
                content_column: registration.content_column,
            });
        }
        (schema_version, tables)
    };

    let gateway = EmbeddingGateway::from_config(&config.embedding);
    let providers = if args.offline {
        gateway
            .describe()
            .into_iter()
            .map(|info| ProviderStatus { info, ready: None })
            .collect()
    } else {
        gateway
            .validate()
            .into_iter()
            .map(|(info, ready)| ProviderStatus {
                info,
                ready: Some(ready),
            })
            .collect()
    };

    let report = StatusOutput {
        database: project.db_path.display().to_string(),
        schema_version,
        vector_extension: store.vector_available(),
        tables,
        providers,
    };

    render_mode(
        output,
        &report,
        |r, w| {
            writeln!(w, "database\t{}\tschema v{}", r.database, r.schema_version)?;
            writeln!(w, "vector_extension\t{}", r.vector_extension)?;
            for t in &r.tables {
                writeln!(
                    w,
                    "table\t{}\t{}\t{}\tpending={}\tembedded={}",
                    t.table, t.key_column, t.content_column, t.pending, t.embedded
                )?;
            }
            for p in &r.providers {
                writeln!(w, "provider\t{}\t{}\t{}", p.info.name, p.info.model, readiness(p.ready))?;
            }
            Ok(())
        },
        |r, w| {
            pretty_section(w, "Store")?;
            pretty_kv(w, "database", &r.database)?;
            pretty_kv(w, "schema", format!("v{}", r.schema_version))?;
            pretty_kv(
                w,
                "sqlite-vec",
                if r.vector_extension { "loaded" } else { "missing (in-process cosine)" },
            )?;
            writeln!(w)?;

            pretty_section(w, "Tables")?;
            if r.tables.is_empty() {
                writeln!(w, "(none registered)")?;
            }
            for t in &r.tables {
                writeln!(
                    w,
                    "{:<24} key={:<12} content={:<12} pending={:<6} embedded={}",
                    t.table, t.key_column, t.content_column, t.pending, t.embedded
                )?;
            }
            writeln!(w)?;

            pretty_section(w, "Embedding providers (in fallback order)")?;
            for (position, p) in r.providers.iter().enumerate() {
                let dims = p
                    .info
                    .dimensions
                    .map_or_else(|| "?".to_string(), |d| d.to_string());
                writeln!(
                    w,
                    "{}. {:<8} {:<28} dims={:<5} {}",
                    position + 1,
                    p.info.name,
                    p.info.model,
                    dims,
                    readiness(p.ready)
                )?;
            }
            Ok(())
        },
    )
}

const fn readiness(ready: Option<bool>) -> &'static str {
    match ready {
        Some(true) => "ready",
        Some(false) => "unavailable",
        None => "unchecked",
    }
}
