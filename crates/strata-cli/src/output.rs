//! Shared output layer: pretty output for humans, compact text for pipes and
//! agents, stable JSON for machines.
//!
//! # Output mode resolution
//!
//! Precedence (highest wins):
//! 1. `--format` / `--json` flag
//! 2. `FORMAT` env var → `"pretty"` | `"text"` | `"json"`
//! 3. Default: [`OutputMode::Pretty`] if stdout is a TTY; [`OutputMode::Text`] if piped.

use clap::ValueEnum;
use serde::Serialize;
use std::fmt;
use std::io::{self, IsTerminal, Write};
use strata_core::{ErrorCode, SearchError};
use strata_search::store::RegistryError;

/// Shared width for human pretty separators.
pub const PRETTY_RULE_WIDTH: usize = 72;

/// Write a horizontal separator used by pretty human output.
pub fn pretty_rule(w: &mut dyn Write) -> io::Result<()> {
    writeln!(w, "{:-<width$}", "", width = PRETTY_RULE_WIDTH)
}

/// Write a section heading followed by a separator.
pub fn pretty_section(w: &mut dyn Write, heading: &str) -> io::Result<()> {
    writeln!(w, "{heading}")?;
    pretty_rule(w)
}

/// Render a left-aligned key/value line in human output.
pub fn pretty_kv(w: &mut dyn Write, key: &str, value: impl AsRef<str>) -> io::Result<()> {
    writeln!(w, "{:<14} {}", format!("{key}:"), value.as_ref())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputMode {
    /// Human-optimized output (sections, aligned columns).
    Pretty,
    /// Token-efficient plain text, one row per line.
    Text,
    /// Machine-readable JSON.
    Json,
}

/// Core resolution logic, separated from I/O for testability.
fn resolve_output_mode_inner(
    format_flag: Option<OutputMode>,
    json_flag: bool,
    format_env: Option<&str>,
    is_tty: bool,
) -> OutputMode {
    if let Some(mode) = format_flag {
        return mode;
    }

    if json_flag {
        return OutputMode::Json;
    }

    if let Some(val) = format_env {
        match val.to_lowercase().as_str() {
            "json" => return OutputMode::Json,
            "text" => return OutputMode::Text,
            "pretty" => return OutputMode::Pretty,
            _ => {}
        }
    }

    if is_tty {
        OutputMode::Pretty
    } else {
        OutputMode::Text
    }
}

/// Resolve the output mode from CLI flags, environment and TTY defaults.
pub fn resolve_output_mode(format_flag: Option<OutputMode>, json_flag: bool) -> OutputMode {
    let env_val = std::env::var("FORMAT").ok();
    let is_tty = io::stdout().is_terminal();
    resolve_output_mode_inner(format_flag, json_flag, env_val.as_deref(), is_tty)
}

/// Render a serializable value with explicit pretty/text renderers.
pub fn render_mode<T: Serialize>(
    mode: OutputMode,
    value: &T,
    text_fn: impl FnOnce(&T, &mut dyn Write) -> io::Result<()>,
    pretty_fn: impl FnOnce(&T, &mut dyn Write) -> io::Result<()>,
) -> anyhow::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match mode {
        OutputMode::Json => {
            serde_json::to_writer_pretty(&mut out, value)?;
            writeln!(out)?;
        }
        OutputMode::Text => text_fn(value, &mut out)?,
        OutputMode::Pretty => pretty_fn(value, &mut out)?,
    }
    Ok(())
}

/// CLI-level failure carrying its own [`ErrorCode`].
#[derive(Debug)]
pub struct CodedError {
    pub code: ErrorCode,
    pub message: String,
}

impl CodedError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CodedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for CodedError {}

/// A structured error with an optional hint and error code.
#[derive(Debug, Serialize)]
pub struct CliError {
    pub message: String,
    /// How to fix the error, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    /// Machine-readable `E####` code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl CliError {
    pub fn with_code(message: impl Into<String>, code: ErrorCode) -> Self {
        Self {
            message: message.into(),
            suggestion: code.hint().map(str::to_string),
            error_code: Some(code.code().to_string()),
        }
    }

    /// Classify an error chain by the first typed error found in it.
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        let message = format!("{err:#}");
        let code = err.chain().find_map(|cause| {
            if let Some(search) = cause.downcast_ref::<SearchError>() {
                return Some(search_error_code(search));
            }
            cause
                .downcast_ref::<RegistryError>()
                .map(RegistryError::code)
                .or_else(|| cause.downcast_ref::<CodedError>().map(|coded| coded.code))
        });

        match code {
            Some(code) => Self::with_code(message, code),
            None => Self {
                message,
                suggestion: None,
                error_code: None,
            },
        }
    }
}

fn registry_code(err: &anyhow::Error) -> Option<ErrorCode> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<RegistryError>().map(RegistryError::code))
}

/// A registry failure inside a store query (unknown table, wrong content
/// field) is reported with the registry code rather than the query code.
fn search_error_code(err: &SearchError) -> ErrorCode {
    match err {
        SearchError::VectorQuery(inner)
        | SearchError::LexicalQuery(inner)
        | SearchError::FusedQuery(inner) => registry_code(inner).unwrap_or_else(|| err.code()),
        _ => err.code(),
    }
}

/// Render an error to stderr in the requested format.
pub fn render_error(mode: OutputMode, error: &CliError) -> anyhow::Result<()> {
    let stderr = io::stderr();
    let mut out = stderr.lock();
    match mode {
        OutputMode::Json => {
            let wrapper = serde_json::json!({
                "error": error,
            });
            serde_json::to_writer_pretty(&mut out, &wrapper)?;
            writeln!(out)?;
        }
        OutputMode::Pretty | OutputMode::Text => {
            match &error.error_code {
                Some(code) => writeln!(out, "error[{code}]: {}", error.message)?,
                None => writeln!(out, "error: {}", error.message)?,
            }
            if let Some(suggestion) = &error.suggestion {
                writeln!(out, "  suggestion: {suggestion}")?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn resolve_format_flag_wins_over_json_and_env() {
        let mode = resolve_output_mode_inner(Some(OutputMode::Text), true, Some("pretty"), true);
        assert_eq!(mode, OutputMode::Text);
    }

    #[test]
    fn resolve_json_flag_wins_over_env() {
        let mode = resolve_output_mode_inner(None, true, Some("pretty"), true);
        assert_eq!(mode, OutputMode::Json);
    }

    #[test]
    fn resolve_format_env_case_insensitive() {
        let mode = resolve_output_mode_inner(None, false, Some("JSON"), true);
        assert_eq!(mode, OutputMode::Json);
    }

    #[test]
    fn resolve_format_env_unknown_falls_through_to_tty() {
        let mode_tty = resolve_output_mode_inner(None, false, Some("fancy"), true);
        assert_eq!(mode_tty, OutputMode::Pretty);
        let mode_pipe = resolve_output_mode_inner(None, false, Some("fancy"), false);
        assert_eq!(mode_pipe, OutputMode::Text);
    }

    #[test]
    fn typed_errors_deep_in_the_chain_keep_their_code() {
        let err = Err::<(), _>(RegistryError::NotRegistered("docs".into()))
            .context("load registration")
            .expect_err("error");
        let cli = CliError::from_anyhow(&err);
        assert_eq!(cli.error_code.as_deref(), Some("E2001"));
        assert!(cli.message.contains("load registration"));
        assert!(cli.message.contains("`docs`"));
        assert!(cli.suggestion.is_some());
    }

    #[test]
    fn search_errors_map_to_their_code() {
        let err = anyhow::Error::new(SearchError::NoProviders);
        let cli = CliError::from_anyhow(&err);
        assert_eq!(
            cli.error_code.as_deref(),
            Some(ErrorCode::NoEmbeddingProviders.code())
        );
    }

    #[test]
    fn registry_errors_inside_store_queries_win() {
        let inner = anyhow::Error::new(RegistryError::ContentFieldMismatch {
            table: "docs".into(),
            registered: "body".into(),
            requested: "title".into(),
        })
        .context("vector query");
        let err = anyhow::Error::new(SearchError::VectorQuery(inner));
        let cli = CliError::from_anyhow(&err);
        assert_eq!(cli.error_code.as_deref(), Some("E2004"));

        let plain = anyhow::Error::new(SearchError::FusedQuery(anyhow::anyhow!("disk I/O error")));
        assert_eq!(CliError::from_anyhow(&plain).error_code.as_deref(), Some("E4003"));
    }

    #[test]
    fn foreign_embedding_space_reports_its_registry_code() {
        let inner = anyhow::Error::new(RegistryError::EmbeddingSpaceMismatch {
            table: "docs".into(),
            stored: "hashing/64d".into(),
            requested: "hashing/32d".into(),
        });
        let err = anyhow::Error::new(SearchError::FusedQuery(inner));
        let cli = CliError::from_anyhow(&err);
        assert_eq!(cli.error_code.as_deref(), Some("E2005"));
        assert!(cli.message.contains("hashing/64d"), "{}", cli.message);
    }

    #[test]
    fn coded_errors_keep_their_code() {
        let err = anyhow::Error::new(CodedError::new(ErrorCode::NotInitialized, "no .strata here"));
        let cli = CliError::from_anyhow(&err);
        assert_eq!(cli.error_code.as_deref(), Some("E1001"));
        assert_eq!(cli.message, "no .strata here");
    }

    #[test]
    fn untyped_errors_have_no_code() {
        let cli = CliError::from_anyhow(&anyhow::anyhow!("disk on fire"));
        assert_eq!(cli.message, "disk on fire");
        assert!(cli.error_code.is_none());
        assert!(cli.suggestion.is_none());
    }

    #[test]
    fn cli_error_json_omits_missing_fields() {
        let cli = CliError::from_anyhow(&anyhow::anyhow!("plain"));
        let json = serde_json::to_value(&cli).expect("serialize");
        assert_eq!(json, serde_json::json!({ "message": "plain" }));
    }
}
