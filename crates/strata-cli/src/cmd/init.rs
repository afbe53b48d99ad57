use super::Project;
use crate::output::{OutputMode, render_mode};
use anyhow::{Context as _, Result};
use clap::Args;
use serde::Serialize;
use std::io::Write;
use strata_core::config::{config_path, default_config_toml};
use strata_search::store::schema::{current_schema_version, open_database};

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Overwrite an existing `.strata/config.toml` with the defaults.
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Serialize)]
struct InitOutput {
    config: String,
    config_written: bool,
    database: String,
    schema_version: u32,
}

/// Execute `strata init`. Creates:
///
/// ```text
/// .strata/
///   config.toml   (default provider chain and search options)
///   strata.db     (catalog tables, WAL mode)
/// ```
///
/// Re-running is safe: the catalog migrates in place and an existing config
/// is kept unless `--force` is given.
///
/// # Errors
///
/// Returns an error if a filesystem or database operation fails.
pub fn run_init(args: &InitArgs, project: &Project, output: OutputMode) -> Result<()> {
    let config = config_path(&project.root);
    let config_written = args.force || !config.exists();
    if config_written {
        if let Some(parent) = config.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        std::fs::write(&config, default_config_toml())
            .with_context(|| format!("write {}", config.display()))?;
    }

    let conn = open_database(&project.db_path)?;
    let schema_version = current_schema_version(&conn).context("read schema version")?;

    let report = InitOutput {
        config: config.display().to_string(),
        config_written,
        database: project.db_path.display().to_string(),
        schema_version,
    };

    render_mode(
        output,
        &report,
        |r, w| {
            writeln!(w, "config\t{}\t{}", r.config, if r.config_written { "written" } else { "kept" })?;
            writeln!(w, "database\t{}\tschema v{}", r.database, r.schema_version)
        },
        |r, w| {
            writeln!(w, "✓ Initialized strata.")?;
            writeln!(w)?;
            writeln!(
                w,
                "  Config:   {}{}",
                r.config,
                if r.config_written { "" } else { " (kept existing)" }
            )?;
            writeln!(w, "  Database: {} (schema v{})", r.database, r.schema_version)?;
            writeln!(w)?;
            writeln!(w, "Next steps:")?;
            writeln!(w, "  strata register <table> --key <col> --content <col>")?;
            writeln!(w, "  strata sync")?;
            writeln!(w, "  strata search <table> \"your query\"")
        },
    )
}
