//! A query embedded by a fallback provider must not silently lose its vector
//! signal against a table embedded by another provider.

use anyhow::{Result, bail};
use strata_core::{Dispatch, SearchError, SearchOptions};
use strata_search::embedding::HashingProvider;
use strata_search::store::schema::register_table;
use strata_search::store::{RegistryError, TableSpec};
use strata_search::sync::rebuild_embeddings;
use strata_search::{
    EmbeddingGateway, EmbeddingProvider, HybridSearcher, ProviderInfo, SearchTarget, SqliteStore,
    sync_embeddings,
};
use tempfile::TempDir;

struct Down;

impl EmbeddingProvider for Down {
    fn describe(&self) -> ProviderInfo {
        ProviderInfo {
            name: "primary".into(),
            model: "remote".into(),
            dimensions: Some(64),
            max_input_length: 1_000,
            max_batch_size: 16,
        }
    }

    fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        bail!("503 service unavailable")
    }

    fn validate(&self) -> bool {
        false
    }
}

/// Same vectors as `HashingProvider`, reported under another name.
struct Mirror(HashingProvider);

impl EmbeddingProvider for Mirror {
    fn describe(&self) -> ProviderInfo {
        ProviderInfo {
            name: "mirror".into(),
            ..self.0.describe()
        }
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.0.embed(text)
    }

    fn validate(&self) -> bool {
        true
    }
}

fn fixture() -> (TempDir, SqliteStore) {
    let dir = tempfile::tempdir().expect("temp dir");
    let store = SqliteStore::open(&dir.path().join("strata.db")).expect("open store");
    {
        let mut conn = store.connection().expect("connection");
        conn.execute_batch(
            "CREATE TABLE docs (id INTEGER PRIMARY KEY, body TEXT);
             INSERT INTO docs (id, body) VALUES
                (1, 'rust borrow checker'),
                (2, 'rust rust async runtime'),
                (3, 'garden tomatoes');",
        )
        .expect("seed docs");
        register_table(
            &mut conn,
            &TableSpec {
                table: "docs".into(),
                key_column: "id".into(),
                content_column: "body".into(),
            },
        )
        .expect("register");
        let gateway = EmbeddingGateway::new(vec![Box::new(HashingProvider::new(64))]);
        sync_embeddings(&mut conn, "docs", &gateway, 10).expect("sync");
    }
    (dir, store)
}

fn option_sets() -> [SearchOptions; 3] {
    let base = SearchOptions {
        threshold: 0.0,
        ..SearchOptions::default()
    };
    [
        base,
        SearchOptions {
            store_fusion: false,
            ..base
        },
        SearchOptions {
            store_fusion: false,
            dispatch: Dispatch::Sequential,
            ..base
        },
    ]
}

fn assert_space_mismatch(err: &SearchError) {
    let inner = match err {
        SearchError::VectorQuery(inner) | SearchError::FusedQuery(inner) => inner,
        other => panic!("expected a vector-side query error, got {other}"),
    };
    assert!(
        matches!(
            inner.downcast_ref::<RegistryError>(),
            Some(RegistryError::EmbeddingSpaceMismatch { .. })
        ),
        "{inner:#}"
    );
}

#[test]
fn narrower_fallback_fails_instead_of_going_lexical_only() {
    let (_dir, store) = fixture();
    let gateway = EmbeddingGateway::new(vec![Box::new(Down), Box::new(HashingProvider::new(32))]);
    let searcher = HybridSearcher::new(&store, &gateway);
    let target = SearchTarget::new("docs", "body");

    for options in option_sets() {
        let err = searcher
            .search(&target, "rust", &options)
            .expect_err("fallback vectors are not comparable");
        assert_space_mismatch(&err);
        assert!(err.to_string().contains("hashing/64d"), "{err}");
    }
}

#[test]
fn same_width_fallback_from_another_provider_also_fails() {
    let (_dir, store) = fixture();
    let gateway = EmbeddingGateway::new(vec![
        Box::new(Down),
        Box::new(Mirror(HashingProvider::new(64))),
    ]);
    let searcher = HybridSearcher::new(&store, &gateway);
    let target = SearchTarget::new("docs", "body");

    for options in option_sets() {
        let err = searcher
            .search(&target, "rust", &options)
            .expect_err("different provider");
        assert_space_mismatch(&err);
    }
}

#[test]
fn rebuilt_table_serves_the_new_provider() {
    let (_dir, store) = fixture();
    let gateway = EmbeddingGateway::new(vec![Box::new(HashingProvider::new(32))]);
    {
        let mut conn = store.connection().expect("connection");
        rebuild_embeddings(&mut conn, "docs").expect("rebuild");
        sync_embeddings(&mut conn, "docs", &gateway, 10).expect("sync");
    }

    let searcher = HybridSearcher::new(&store, &gateway);
    let target = SearchTarget::new("docs", "body");
    for options in option_sets() {
        let results = searcher
            .search(&target, "rust", &options)
            .expect("search after rebuild");
        assert!(!results.is_empty());
        assert!(results.iter().any(|r| r.vector_score > 0.0));
    }
}
