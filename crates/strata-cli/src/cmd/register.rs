use super::Project;
use crate::output::{OutputMode, pretty_kv, render_mode};
use anyhow::Result;
use clap::Args;
use serde::Serialize;
use std::io::Write;
use strata_search::store::TableSpec;
use strata_search::store::schema::{register_table, unregister_table};
use strata_search::sync::pending_count;

#[derive(Args, Debug)]
pub struct RegisterArgs {
    /// Source table to index.
    pub table: String,

    /// Column uniquely identifying a row.
    #[arg(long)]
    pub key: String,

    /// Text column to embed and index for full-text search.
    #[arg(long)]
    pub content: String,
}

#[derive(Args, Debug)]
pub struct UnregisterArgs {
    /// Registered table to drop indexes for. The table itself is kept.
    pub table: String,
}

#[derive(Debug, Serialize)]
struct RegisterOutput {
    table: String,
    key_column: String,
    content_column: String,
    columns: Vec<String>,
    queued: u64,
}

/// Execute `strata register <table> --key <col> --content <col>`.
///
/// # Errors
///
/// Returns an error if the store is not initialized, the table or columns do
/// not exist, or the table is already registered.
pub fn run_register(args: &RegisterArgs, project: &Project, output: OutputMode) -> Result<()> {
    let store = project.open_store()?;
    let mut conn = store.connection()?;

    let registration = register_table(
        &mut conn,
        &TableSpec {
            table: args.table.clone(),
            key_column: args.key.clone(),
            content_column: args.content.clone(),
        },
    )?;
    let queued = pending_count(&conn, &registration.table)?;

    let report = RegisterOutput {
        table: registration.table,
        key_column: registration.key_column,
        content_column: registration.content_column,
        columns: registration.columns,
        queued,
    };

    render_mode(
        output,
        &report,
        |r, w| writeln!(w, "registered\t{}\t{}\t{}\tqueued={}", r.table, r.key_column, r.content_column, r.queued),
        |r, w| {
            writeln!(w, "✓ Registered {}", r.table)?;
            pretty_kv(w, "key", &r.key_column)?;
            pretty_kv(w, "content", &r.content_column)?;
            pretty_kv(w, "payload", r.columns.join(", "))?;
            pretty_kv(w, "queued", r.queued.to_string())?;
            writeln!(w)?;
            writeln!(w, "Run `strata sync {}` to compute embeddings.", r.table)
        },
    )
}

/// Execute `strata unregister <table>`.
///
/// # Errors
///
/// Returns an error if the store is not initialized or the table is not
/// registered.
pub fn run_unregister(args: &UnregisterArgs, project: &Project, output: OutputMode) -> Result<()> {
    let store = project.open_store()?;
    let mut conn = store.connection()?;
    unregister_table(&mut conn, &args.table)?;

    render_mode(
        output,
        &serde_json::json!({ "table": args.table, "unregistered": true }),
        |_, w| writeln!(w, "unregistered\t{}", args.table),
        |_, w| writeln!(w, "✓ Unregistered {} (source table kept)", args.table),
    )
}
