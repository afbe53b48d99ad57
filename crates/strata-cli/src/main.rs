#![forbid(unsafe_code)]

mod cmd;
mod output;

use clap::{Parser, Subcommand};
use cmd::Project;
use output::{CliError, OutputMode, render_error, resolve_output_mode};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "strata: hybrid semantic + full-text search over SQLite tables",
    long_about = None
)]
struct Cli {
    /// Enable debug logging for strata crates.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (default: pretty on a TTY, text when piped).
    #[arg(long, global = true, value_enum)]
    format: Option<OutputMode>,

    /// Shorthand for `--format json`.
    #[arg(long, global = true)]
    json: bool,

    /// Database path (default: .strata/strata.db).
    #[arg(long, global = true, value_name = "PATH")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Initialize strata in the current directory",
        after_help = "EXAMPLES:\n    # Create .strata/config.toml and the catalog\n    strata init\n\n    # Reset the config to defaults\n    strata init --force"
    )]
    Init(cmd::init::InitArgs),

    #[command(
        about = "Register a table for embeddings and hybrid search",
        after_help = "EXAMPLES:\n    # Index the body column of articles, keyed by id\n    strata register articles --key id --content body\n\n    # Emit machine-readable output\n    strata register articles --key id --content body --json"
    )]
    Register(cmd::register::RegisterArgs),

    #[command(
        about = "Drop strata indexes for a table",
        after_help = "EXAMPLES:\n    # Remove triggers, FTS and embedding tables (articles itself is kept)\n    strata unregister articles"
    )]
    Unregister(cmd::register::UnregisterArgs),

    #[command(
        about = "Compute embeddings for queued rows",
        after_help = "EXAMPLES:\n    # Refresh every registered table\n    strata sync\n\n    # Refresh one table in batches of 16\n    strata sync articles --batch-size 16\n\n    # Re-embed a table after switching providers\n    strata sync articles --rebuild"
    )]
    Sync(cmd::sync::SyncArgs),

    #[command(
        about = "Hybrid search over a registered table",
        after_help = "EXAMPLES:\n    # Top 5 hybrid matches\n    strata search articles \"borrow checker\"\n\n    # Favor full-text relevance and return 10 rows\n    strata search articles \"borrow checker\" -k 10 --alpha 0.7 --beta 0.3\n\n    # Z-score normalization, fused in process\n    strata search articles \"borrow checker\" --normalization z-score\n\n    # Machine-readable output\n    strata search articles \"borrow checker\" --json"
    )]
    Search(cmd::search::SearchArgs),

    #[command(
        about = "Show registrations, queue depth and provider readiness",
        after_help = "EXAMPLES:\n    # Full status including provider checks\n    strata status\n\n    # Skip network checks\n    strata status --offline --json"
    )]
    Status(cmd::status::StatusArgs),
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("STRATA_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if verbose || env::var("DEBUG").is_ok() {
            "strata=debug,info"
        } else {
            "strata=info,warn"
        })
    });

    let format = env::var("STRATA_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let output = resolve_output_mode(cli.format, cli.json);
    let project_root = match env::current_dir() {
        Ok(root) => root,
        Err(err) => {
            eprintln!("error: cannot read current directory: {err}");
            return ExitCode::FAILURE;
        }
    };
    let project = Project::new(project_root, cli.db);
    debug!(db = %project.db_path.display(), ?output, "resolved project");

    let result = match &cli.command {
        Commands::Init(args) => cmd::init::run_init(args, &project, output),
        Commands::Register(args) => cmd::register::run_register(args, &project, output),
        Commands::Unregister(args) => cmd::register::run_unregister(args, &project, output),
        Commands::Sync(args) => cmd::sync::run_sync(args, &project, output),
        Commands::Search(args) => cmd::search::run_search(args, &project, output),
        Commands::Status(args) => cmd::status::run_status(args, &project, output),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if let Err(render_err) = render_error(output, &CliError::from_anyhow(&err)) {
                eprintln!("error: {err:#} (rendering failed: {render_err})");
            }
            ExitCode::FAILURE
        }
    }
}
