//! `strata search`: hybrid (vector + full-text) search over a registered table.

use super::Project;
use crate::output::{OutputMode, pretty_rule, render_mode};
use anyhow::Result;
use clap::Args;
use serde::Serialize;
use std::io::Write;
use strata_core::{Dispatch, Normalization, RankedResult, SearchOptions};
use strata_search::store::schema::load_registration;
use strata_search::{EmbeddingGateway, HybridSearcher, SearchTarget};

#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Registered table to search.
    pub table: String,

    /// Free-text query. Every term must match for a full-text hit.
    pub query: String,

    /// Maximum number of results.
    #[arg(short = 'k', long = "top-k")]
    pub top_k: Option<usize>,

    /// Weight on the normalized full-text score.
    #[arg(long)]
    pub alpha: Option<f64>,

    /// Weight on the normalized vector score.
    #[arg(long)]
    pub beta: Option<f64>,

    /// Score normalization: min-max, z-score or none.
    #[arg(long)]
    pub normalization: Option<Normalization>,

    /// Minimum hybrid score kept (inclusive).
    #[arg(long)]
    pub threshold: Option<f64>,

    /// Rows fetched per signal, as a multiple of top-k.
    #[arg(long)]
    pub candidate_multiplier: Option<usize>,

    /// Content column to search (must match the registration).
    #[arg(long)]
    pub field: Option<String>,

    /// Fuse in process even when the store could fuse the query itself.
    #[arg(long)]
    pub client_fusion: bool,

    /// Run the vector query before the full-text query instead of both at once.
    #[arg(long)]
    pub sequential: bool,
}

impl SearchArgs {
    /// Config defaults overridden by whatever flags were given.
    fn options(&self, defaults: SearchOptions) -> SearchOptions {
        let mut options = defaults;
        if let Some(top_k) = self.top_k {
            options.top_k = top_k;
        }
        if let Some(alpha) = self.alpha {
            options.alpha = alpha;
        }
        if let Some(beta) = self.beta {
            options.beta = beta;
        }
        if let Some(normalization) = self.normalization {
            options.normalization = normalization;
        }
        if let Some(threshold) = self.threshold {
            options.threshold = threshold;
        }
        if let Some(multiplier) = self.candidate_multiplier {
            options.candidate_multiplier = multiplier;
        }
        if self.client_fusion {
            options.store_fusion = false;
        }
        if self.sequential {
            options.dispatch = Dispatch::Sequential;
        }
        options
    }
}

#[derive(Debug, Serialize)]
struct SearchOutput {
    table: String,
    query: String,
    options: SearchOptions,
    count: usize,
    results: Vec<RankedResult>,
}

fn preview(result: &RankedResult, field: &str, max_chars: usize) -> String {
    let text = match result.payload.get(field) {
        Some(serde_json::Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    };
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{cut}…")
}

/// Execute `strata search <table> <query>`.
///
/// # Errors
///
/// Returns an error if the store is not initialized, the table is not
/// registered, the options are invalid, or embedding or a store query fails.
pub fn run_search(args: &SearchArgs, project: &Project, output: OutputMode) -> Result<()> {
    let config = project.config()?;
    let options = args.options(config.search);
    options.validate()?;

    let store = project.open_store()?;
    let content_field = match &args.field {
        Some(field) => field.clone(),
        None => {
            let conn = store.connection()?;
            load_registration(&conn, &args.table)?.content_column
        }
    };

    let gateway = EmbeddingGateway::from_config(&config.embedding);
    let searcher = HybridSearcher::new(&store, &gateway);
    let target = SearchTarget::new(args.table.clone(), content_field.clone());
    let results = searcher.search(&target, &args.query, &options)?;

    let report = SearchOutput {
        table: args.table.clone(),
        query: args.query.clone(),
        options,
        count: results.len(),
        results,
    };

    render_mode(
        output,
        &report,
        |r, w| {
            for result in &r.results {
                writeln!(
                    w,
                    "{}\t{:.4}\t{:.4}\t{:.4}\t{}",
                    result.identity,
                    result.hybrid_score,
                    result.vector_score,
                    result.lexical_score,
                    preview(result, &content_field, 80)
                )?;
            }
            Ok(())
        },
        |r, w| {
            if r.results.is_empty() {
                return writeln!(w, "No results for \"{}\".", r.query);
            }
            writeln!(
                w,
                "{} result(s) for \"{}\" in {}  (alpha={} beta={} {})",
                r.count, r.query, r.table, r.options.alpha, r.options.beta, r.options.normalization
            )?;
            pretty_rule(w)?;
            for (rank, result) in r.results.iter().enumerate() {
                writeln!(
                    w,
                    "{:>2}. {:<12} hybrid {:.4}  vector {:.4}  lexical {:.4}",
                    rank + 1,
                    result.identity.as_str(),
                    result.hybrid_score,
                    result.vector_score,
                    result.lexical_score
                )?;
                writeln!(w, "    {}", preview(result, &content_field, 68))?;
            }
            Ok(())
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: SearchArgs,
    }

    #[test]
    fn flags_override_config_defaults() {
        let harness = Harness::parse_from([
            "search",
            "docs",
            "rust",
            "-k",
            "3",
            "--alpha",
            "0.5",
            "--normalization",
            "z-score",
            "--client-fusion",
            "--sequential",
        ]);
        let options = harness.args.options(SearchOptions::default());
        assert_eq!(options.top_k, 3);
        assert!((options.alpha - 0.5).abs() < f64::EPSILON);
        assert!((options.beta - 0.7).abs() < f64::EPSILON);
        assert_eq!(options.normalization, Normalization::ZScore);
        assert!(!options.store_fusion);
        assert_eq!(options.dispatch, Dispatch::Sequential);
    }

    #[test]
    fn no_flags_keep_config_values() {
        let harness = Harness::parse_from(["search", "docs", "rust"]);
        let defaults = SearchOptions {
            top_k: 9,
            threshold: 0.0,
            ..SearchOptions::default()
        };
        assert_eq!(harness.args.options(defaults), defaults);
    }

    #[test]
    fn preview_flattens_and_truncates() {
        let mut payload = strata_core::Payload::new();
        payload.insert("body".into(), serde_json::json!("one\ntwo   three four"));
        let result = RankedResult {
            identity: "1".into(),
            payload,
            hybrid_score: 1.0,
            lexical_score: 0.0,
            vector_score: 1.0,
        };
        assert_eq!(preview(&result, "body", 100), "one two three four");
        assert_eq!(preview(&result, "body", 8), "one two…");
        assert_eq!(preview(&result, "missing", 8), "");
    }
}
