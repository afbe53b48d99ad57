use std::fmt;

/// Machine-readable error codes for agent-friendly decision making.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotInitialized,
    ConfigParseError,
    TableNotRegistered,
    TableAlreadyRegistered,
    InvalidIdentifier,
    ContentFieldMismatch,
    EmbeddingSpaceMismatch,
    NoEmbeddingProviders,
    EmbeddingProviderFailed,
    EmbeddingProvidersExhausted,
    VectorQueryFailed,
    LexicalQueryFailed,
    FusedQueryFailed,
    InvalidSearchOptions,
    VectorExtensionMissing,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::NotInitialized => "E1001",
            Self::ConfigParseError => "E1002",
            Self::TableNotRegistered => "E2001",
            Self::TableAlreadyRegistered => "E2002",
            Self::InvalidIdentifier => "E2003",
            Self::ContentFieldMismatch => "E2004",
            Self::EmbeddingSpaceMismatch => "E2005",
            Self::NoEmbeddingProviders => "E3001",
            Self::EmbeddingProviderFailed => "E3002",
            Self::EmbeddingProvidersExhausted => "E3003",
            Self::VectorQueryFailed => "E4001",
            Self::LexicalQueryFailed => "E4002",
            Self::FusedQueryFailed => "E4003",
            Self::InvalidSearchOptions => "E4004",
            Self::VectorExtensionMissing => "E6001",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::NotInitialized => "Project not initialized",
            Self::ConfigParseError => "Config file parse error",
            Self::TableNotRegistered => "Table not registered",
            Self::TableAlreadyRegistered => "Table already registered",
            Self::InvalidIdentifier => "Invalid table or column name",
            Self::ContentFieldMismatch => "Content field does not match registration",
            Self::EmbeddingSpaceMismatch => "Embeddings come from a different provider",
            Self::NoEmbeddingProviders => "No embedding providers configured",
            Self::EmbeddingProviderFailed => "Embedding provider failed",
            Self::EmbeddingProvidersExhausted => "All embedding providers failed",
            Self::VectorQueryFailed => "Vector query failed",
            Self::LexicalQueryFailed => "Lexical query failed",
            Self::FusedQueryFailed => "Fused hybrid query failed",
            Self::InvalidSearchOptions => "Invalid search options",
            Self::VectorExtensionMissing => "sqlite-vec extension unavailable",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators and agents.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::NotInitialized => Some("Run `strata init` to initialize this directory."),
            Self::ConfigParseError => Some("Fix syntax in .strata/config.toml and retry."),
            Self::TableNotRegistered => {
                Some("Run `strata register <table> --key <col> --content <col>` first.")
            }
            Self::TableAlreadyRegistered => {
                Some("Run `strata unregister <table>` before registering it again.")
            }
            Self::InvalidIdentifier => Some("Use ASCII letters, digits and underscores only."),
            Self::ContentFieldMismatch => {
                Some("Pass the content column the table was registered with.")
            }
            Self::EmbeddingSpaceMismatch => Some(
                "Bring the primary provider back, or run `strata sync --rebuild <table>` to re-embed.",
            ),
            Self::NoEmbeddingProviders => {
                Some("Add at least one [[embedding.providers]] entry to .strata/config.toml.")
            }
            Self::EmbeddingProviderFailed | Self::EmbeddingProvidersExhausted => {
                Some("Check provider credentials, endpoint reachability and rate limits.")
            }
            Self::VectorQueryFailed | Self::FusedQueryFailed => {
                Some("Run `strata sync` so embeddings exist for the current provider.")
            }
            Self::LexicalQueryFailed => Some("Re-register the table to rebuild the FTS index."),
            Self::InvalidSearchOptions => {
                Some("Use top-k >= 1, non-negative finite weights and a finite threshold.")
            }
            Self::VectorExtensionMissing => {
                Some("Unset STRATA_SQLITE_VEC_AUTO or rebuild with the bundled extension.")
            }
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// The single error type a hybrid search call can fail with.
///
/// Store failures keep their `anyhow` context chain; it is rendered with the
/// alternate formatter so the full chain shows up in the message.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("no embedding providers configured")]
    NoProviders,

    #[error("embedding provider `{provider}` failed: {message}")]
    Provider { provider: String, message: String },

    #[error("all embedding providers failed: {}", .attempts.join("; "))]
    ProvidersExhausted { attempts: Vec<String> },

    #[error("vector query failed: {0:#}")]
    VectorQuery(anyhow::Error),

    #[error("lexical query failed: {0:#}")]
    LexicalQuery(anyhow::Error),

    #[error("fused hybrid query failed: {0:#}")]
    FusedQuery(anyhow::Error),

    #[error("invalid search options: {0}")]
    InvalidOptions(String),
}

impl SearchError {
    /// Machine-readable code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NoProviders => ErrorCode::NoEmbeddingProviders,
            Self::Provider { .. } => ErrorCode::EmbeddingProviderFailed,
            Self::ProvidersExhausted { .. } => ErrorCode::EmbeddingProvidersExhausted,
            Self::VectorQuery(_) => ErrorCode::VectorQueryFailed,
            Self::LexicalQuery(_) => ErrorCode::LexicalQueryFailed,
            Self::FusedQuery(_) => ErrorCode::FusedQueryFailed,
            Self::InvalidOptions(_) => ErrorCode::InvalidSearchOptions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ErrorCode, SearchError};
    use std::collections::HashSet;

    const ALL: [ErrorCode; 16] = [
        ErrorCode::NotInitialized,
        ErrorCode::ConfigParseError,
        ErrorCode::TableNotRegistered,
        ErrorCode::TableAlreadyRegistered,
        ErrorCode::InvalidIdentifier,
        ErrorCode::ContentFieldMismatch,
        ErrorCode::EmbeddingSpaceMismatch,
        ErrorCode::NoEmbeddingProviders,
        ErrorCode::EmbeddingProviderFailed,
        ErrorCode::EmbeddingProvidersExhausted,
        ErrorCode::VectorQueryFailed,
        ErrorCode::LexicalQueryFailed,
        ErrorCode::FusedQueryFailed,
        ErrorCode::InvalidSearchOptions,
        ErrorCode::VectorExtensionMissing,
        ErrorCode::InternalUnexpected,
    ];

    #[test]
    fn all_codes_are_unique() {
        let mut seen = HashSet::new();
        for code in ALL {
            assert!(seen.insert(code.code()), "duplicate code {}", code.code());
        }
    }

    #[test]
    fn code_format_is_machine_friendly() {
        for code in ALL {
            let code = code.code();
            assert_eq!(code.len(), 5);
            assert!(code.starts_with('E'));
            assert!(code.chars().skip(1).all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn store_errors_render_full_context_chain() {
        let err = SearchError::VectorQuery(
            anyhow::anyhow!("no such table: docs__strata_embeddings").context("prepare vector query"),
        );
        let rendered = err.to_string();
        assert!(rendered.starts_with("vector query failed: prepare vector query"));
        assert!(rendered.contains("no such table"));
        assert_eq!(err.code(), ErrorCode::VectorQueryFailed);
    }

    #[test]
    fn exhausted_providers_lists_every_attempt() {
        let err = SearchError::ProvidersExhausted {
            attempts: vec!["openai: 429".into(), "hashing: empty text".into()],
        };
        assert_eq!(
            err.to_string(),
            "all embedding providers failed: openai: 429; hashing: empty text"
        );
        assert_eq!(err.code().code(), "E3003");
    }
}
