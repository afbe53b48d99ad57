use crate::error::SearchError;
use crate::fusion::Normalization;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Directory holding project-local strata state.
pub const STRATA_DIR: &str = ".strata";

/// How the client-side path issues its two store queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Dispatch {
    /// Vector and lexical queries on two scoped threads, both joined.
    #[default]
    Concurrent,
    /// Vector query first; the lexical query only runs if it succeeded.
    Sequential,
}

impl Dispatch {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Concurrent => "concurrent",
            Self::Sequential => "sequential",
        }
    }
}

impl fmt::Display for Dispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dispatch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "concurrent" | "parallel" => Ok(Self::Concurrent),
            "sequential" | "serial" => Ok(Self::Sequential),
            other => Err(format!(
                "unknown dispatch '{other}' (expected concurrent or sequential)"
            )),
        }
    }
}

/// Per-call search parameters. Immutable for the duration of one search.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchOptions {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Weight on the normalized lexical score.
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    /// Weight on the normalized vector score.
    #[serde(default = "default_beta")]
    pub beta: f64,
    #[serde(default)]
    pub normalization: Normalization,
    /// Minimum hybrid score kept (inclusive).
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    /// Each source is asked for `top_k * candidate_multiplier` rows.
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,
    /// Allow the store to fuse min-max results in a single statement.
    #[serde(default = "default_true")]
    pub store_fusion: bool,
    #[serde(default)]
    pub dispatch: Dispatch,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            alpha: default_alpha(),
            beta: default_beta(),
            normalization: Normalization::default(),
            threshold: default_threshold(),
            candidate_multiplier: default_candidate_multiplier(),
            store_fusion: default_true(),
            dispatch: Dispatch::default(),
        }
    }
}

impl SearchOptions {
    /// Rows requested from each upstream source.
    #[must_use]
    pub const fn candidate_window(&self) -> usize {
        self.top_k.saturating_mul(self.candidate_multiplier)
    }

    /// Reject option values the ranker cannot give a meaning to.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::InvalidOptions`] naming the offending field.
    pub fn validate(&self) -> Result<(), SearchError> {
        if self.top_k == 0 {
            return Err(SearchError::InvalidOptions("top_k must be at least 1".into()));
        }
        if self.candidate_multiplier == 0 {
            return Err(SearchError::InvalidOptions(
                "candidate_multiplier must be at least 1".into(),
            ));
        }
        for (name, weight) in [("alpha", self.alpha), ("beta", self.beta)] {
            if !weight.is_finite() || weight < 0.0 {
                return Err(SearchError::InvalidOptions(format!(
                    "{name} must be a finite, non-negative weight (got {weight})"
                )));
            }
        }
        if !self.threshold.is_finite() {
            return Err(SearchError::InvalidOptions(format!(
                "threshold must be finite (got {})",
                self.threshold
            )));
        }
        Ok(())
    }

    /// Whether the store-side fused statement may serve this search.
    #[must_use]
    pub fn wants_store_fusion(&self) -> bool {
        self.store_fusion && self.normalization == Normalization::MinMax
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub search: SearchOptions,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Ordered chain: the first entry is the primary, the rest are fallbacks.
    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderConfig>,
    /// Queue rows drained per gateway batch call during sync.
    #[serde(default = "default_sync_batch_size")]
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            providers: default_providers(),
            batch_size: default_sync_batch_size(),
        }
    }
}

/// One `[[embedding.providers]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProviderConfig {
    Hashing {
        #[serde(default = "default_hashing_dimensions")]
        dimensions: usize,
    },
    OpenAi {
        #[serde(default = "default_openai_model")]
        model: String,
        #[serde(default = "default_openai_base_url")]
        base_url: String,
        /// Environment variable holding the bearer key.
        #[serde(default = "default_openai_key_env")]
        api_key_env: String,
        /// Requested output size; `None` keeps the model's native size.
        #[serde(default)]
        dimensions: Option<usize>,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
    Ollama {
        #[serde(default = "default_ollama_model")]
        model: String,
        #[serde(default = "default_ollama_base_url")]
        base_url: String,
        #[serde(default = "default_ollama_dimensions")]
        dimensions: usize,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
}

impl ProviderConfig {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Hashing { .. } => "hashing",
            Self::OpenAi { .. } => "openai",
            Self::Ollama { .. } => "ollama",
        }
    }
}

/// Path of the project config file under `project_root`.
#[must_use]
pub fn config_path(project_root: &Path) -> PathBuf {
    project_root.join(STRATA_DIR).join("config.toml")
}

/// Load `.strata/config.toml`; a missing file yields defaults.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_project_config(project_root: &Path) -> Result<ProjectConfig> {
    let path = config_path(project_root);
    if !path.exists() {
        return Ok(ProjectConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<ProjectConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

/// Commented starter config written by `strata init`.
#[must_use]
pub fn default_config_toml() -> String {
    format!(
        r#"# strata project configuration

[search]
top_k = {top_k}
alpha = {alpha}          # lexical weight
beta = {beta}           # vector weight
normalization = "min-max" # min-max | z-score | none
threshold = {threshold}
candidate_multiplier = {multiplier}
store_fusion = true
dispatch = "concurrent"   # concurrent | sequential

[embedding]
batch_size = {batch_size}

# Providers are tried in order; later entries are fallbacks.
[[embedding.providers]]
kind = "hashing"
dimensions = {dimensions}

# [[embedding.providers]]
# kind = "openai"
# model = "{openai_model}"
# api_key_env = "{openai_key_env}"

# [[embedding.providers]]
# kind = "ollama"
# model = "{ollama_model}"
# base_url = "{ollama_base_url}"
"#,
        top_k = default_top_k(),
        alpha = default_alpha(),
        beta = default_beta(),
        threshold = default_threshold(),
        multiplier = default_candidate_multiplier(),
        batch_size = default_sync_batch_size(),
        dimensions = default_hashing_dimensions(),
        openai_model = default_openai_model(),
        openai_key_env = default_openai_key_env(),
        ollama_model = default_ollama_model(),
        ollama_base_url = default_ollama_base_url(),
    )
}

const fn default_true() -> bool {
    true
}

const fn default_top_k() -> usize {
    5
}

const fn default_alpha() -> f64 {
    0.3
}

const fn default_beta() -> f64 {
    0.7
}

const fn default_threshold() -> f64 {
    0.1
}

const fn default_candidate_multiplier() -> usize {
    2
}

const fn default_sync_batch_size() -> usize {
    64
}

fn default_providers() -> Vec<ProviderConfig> {
    vec![ProviderConfig::Hashing {
        dimensions: default_hashing_dimensions(),
    }]
}

const fn default_hashing_dimensions() -> usize {
    384
}

fn default_openai_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_openai_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_ollama_model() -> String {
    "nomic-embed-text".to_string()
}

fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}

const fn default_ollama_dimensions() -> usize {
    768
}

const fn default_timeout_secs() -> u64 {
    30
}
