//! SQLite implementation of [`SearchStore`].
//!
//! Vector scores are `1 - vec_distance_cosine(...)` from sqlite-vec, lexical
//! scores are `-bm25(...)` from FTS5 (negated so higher is better). Both
//! single-signal statements and the fused statement are built from the same
//! window subqueries, so the client-side and store-side paths see identical
//! candidate sets, scores and tie-breaks.

use super::schema::{
    EmbeddingSpace, Registration, ensure_embedding_space, load_registration, quote_ident,
    quote_literal,
};
use super::{FusedQuery, LexicalQuery, SearchStore, SearchTarget, VectorQuery};
use anyhow::{Context, Result, anyhow, bail};
use rusqlite::{Connection, named_params};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use strata_core::{Hit, Identity, Payload, RankedResult};
use tracing::{debug, instrument, warn};

/// Hybrid search store over one SQLite connection.
///
/// Queries are serialized on the connection mutex; concurrent callers wait.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    vec_available: bool,
}

impl SqliteStore {
    /// Register sqlite-vec, then open and migrate the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open(path: &Path) -> Result<Self> {
        if let Err(err) = strata_sqlite_vec::register_auto_extension() {
            warn!("sqlite-vec unavailable, vector search falls back to in-process cosine: {err}");
        }
        let conn = super::schema::open_database(path)?;
        Ok(Self::from_connection(conn))
    }

    /// Wrap an already configured connection.
    #[must_use]
    pub fn from_connection(conn: Connection) -> Self {
        let vec_available = strata_sqlite_vec::is_available(&conn);
        debug!(vec_available, "sqlite store ready");
        Self {
            conn: Mutex::new(conn),
            vec_available,
        }
    }

    /// Whether sqlite-vec functions resolve on this connection.
    #[must_use]
    pub const fn vector_available(&self) -> bool {
        self.vec_available
    }

    /// Exclusive access to the underlying connection.
    ///
    /// # Errors
    ///
    /// Returns an error if a previous holder panicked.
    pub fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("sqlite store connection lock poisoned"))
    }

    fn registration(conn: &Connection, target: &SearchTarget) -> Result<Registration> {
        let registration = load_registration(conn, &target.table)?;
        registration.ensure_content_field(&target.content_field)?;
        Ok(registration)
    }

    /// Registration of `target`, checked to hold only embeddings comparable
    /// with a `provider` vector of `dimensions`.
    fn vector_registration(
        conn: &Connection,
        target: &SearchTarget,
        provider: &str,
        dimensions: usize,
    ) -> Result<Registration> {
        let registration = Self::registration(conn, target)?;
        ensure_embedding_space(
            conn,
            &registration,
            &EmbeddingSpace::new(provider, dimensions),
            &HashSet::new(),
        )?;
        Ok(registration)
    }
}

/// Turn free text into an FTS5 expression requiring every term.
///
/// Each alphanumeric run becomes a quoted phrase, which neutralizes FTS5
/// operators and column filters in user input. Returns `None` when the text
/// has no terms.
#[must_use]
pub fn fts_match_expression(text: &str) -> Option<String> {
    let terms: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|term| !term.is_empty())
        .map(|term| format!("\"{term}\""))
        .collect();

    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" "))
    }
}

/// Column pairs per SQL function call; SQLite caps function arguments at 127.
const PAYLOAD_PAIRS_PER_CALL: usize = 60;

/// `json_object(...)` over every source column of `alias`, BLOBs as hex.
///
/// Wide tables are folded through `json_insert` in chunks.
fn payload_expr(registration: &Registration, alias: &str) -> String {
    let value = |column: &str| {
        let col = format!("{alias}.{}", quote_ident(column));
        format!("CASE WHEN typeof({col}) = 'blob' THEN hex({col}) ELSE {col} END")
    };

    let mut chunks = registration.columns.chunks(PAYLOAD_PAIRS_PER_CALL);
    let first: Vec<String> = chunks
        .next()
        .unwrap_or_default()
        .iter()
        .map(|column| format!("{}, {}", quote_literal(column), value(column)))
        .collect();
    let mut expr = format!("json_object({})", first.join(", "));

    for chunk in chunks {
        let pairs: Vec<String> = chunk
            .iter()
            .map(|column| {
                let path = quote_literal(&format!("$.\"{column}\""));
                format!("{path}, {}", value(column))
            })
            .collect();
        expr = format!("json_insert({expr}, {})", pairs.join(", "));
    }
    expr
}

/// Top `:k` live embeddings of `:provider` with dimension `:dims` by cosine
/// similarity to `:vector`. Columns: `key`, `score`.
fn vector_window_sql(registration: &Registration) -> String {
    format!(
        "SELECT e.key AS key,
                1.0 - vec_distance_cosine(vec_f32(e.embedding), vec_f32(:vector)) AS score
         FROM {emb} e
         JOIN {src} s ON s.{key} = e.key
         WHERE e.provider = :provider AND e.dimensions = :dims
         ORDER BY score DESC, e.key ASC
         LIMIT :k",
        emb = quote_ident(&registration.embeddings_table()),
        src = quote_ident(&registration.table),
        key = quote_ident(&registration.key_column),
    )
}

/// Top `:k` full-text matches of `:match`. Columns: `key`, `score`.
fn lexical_window_sql(registration: &Registration) -> String {
    let fts = quote_ident(&registration.fts_table());
    format!(
        "SELECT {fts}.key AS key, -bm25({fts}) AS score
         FROM {fts}
         WHERE {fts} MATCH :match
         ORDER BY score DESC, {fts}.key ASC
         LIMIT :k"
    )
}

const EMPTY_WINDOW_SQL: &str = "SELECT NULL AS key, 0.0 AS score WHERE 0";

/// Attach payloads to a `key`/`score` window, preserving its order.
fn with_payload_sql(registration: &Registration, window: &str) -> String {
    format!(
        "WITH w AS ({window})
         SELECT w.key, w.score, {payload}
         FROM w
         JOIN {src} s ON s.{key} = w.key
         ORDER BY w.score DESC, w.key ASC",
        payload = payload_expr(registration, "s"),
        src = quote_ident(&registration.table),
        key = quote_ident(&registration.key_column),
    )
}

/// Windowing, outer join, zero fill, min-max normalization, weighting and
/// ordering in one statement.
///
/// `ord` numbers vector rows first and lexical-only rows after them, which is
/// the order the in-process merger emits; it breaks hybrid ties.
fn fused_sql(registration: &Registration, lexical_window: &str) -> String {
    format!(
        "WITH
         vec_window AS MATERIALIZED ({vector_window}),
         lex_window AS MATERIALIZED ({lexical_window}),
         vec AS MATERIALIZED (
             SELECT key, score, ROW_NUMBER() OVER (ORDER BY score DESC, key ASC) AS pos
             FROM vec_window
         ),
         lex AS MATERIALIZED (
             SELECT key, score, ROW_NUMBER() OVER (ORDER BY score DESC, key ASC) AS pos
             FROM lex_window
         ),
         merged AS (
             SELECT v.key AS key,
                    v.pos AS ord,
                    v.score AS vector_score,
                    COALESCE(l.score, 0.0) AS lexical_score
             FROM vec v
             LEFT JOIN lex l ON l.key = v.key
             UNION ALL
             SELECT l.key, (SELECT COUNT(*) FROM vec) + l.pos, 0.0, l.score
             FROM lex l
             WHERE l.key NOT IN (SELECT key FROM vec)
         ),
         stats AS (
             SELECT MIN(vector_score) AS vmin, MAX(vector_score) AS vmax,
                    MIN(lexical_score) AS lmin, MAX(lexical_score) AS lmax
             FROM merged
         ),
         scored AS (
             SELECT m.key, m.ord, m.vector_score, m.lexical_score,
                    :alpha * (CASE WHEN st.lmax = st.lmin THEN 1.0
                                   ELSE (m.lexical_score - st.lmin) / (st.lmax - st.lmin) END)
                  + :beta * (CASE WHEN st.vmax = st.vmin THEN 1.0
                                  ELSE (m.vector_score - st.vmin) / (st.vmax - st.vmin) END)
                    AS hybrid
             FROM merged m
             CROSS JOIN stats st
         )
         SELECT sc.key, sc.hybrid, sc.lexical_score, sc.vector_score, {payload}
         FROM scored sc
         JOIN {src} s ON s.{key} = sc.key
         ORDER BY sc.hybrid DESC, sc.ord ASC",
        vector_window = vector_window_sql(registration),
        payload = payload_expr(registration, "s"),
        src = quote_ident(&registration.table),
        key = quote_ident(&registration.key_column),
    )
}

fn encode_vector(vector: &[f32]) -> Result<String> {
    if vector.is_empty() {
        bail!("query vector is empty");
    }
    serde_json::to_string(vector).context("encode query vector")
}

fn to_sql_limit(k: usize) -> i64 {
    i64::try_from(k).unwrap_or(i64::MAX)
}

fn parse_payload(raw: &str) -> Result<Payload> {
    serde_json::from_str(raw).context("decode row payload")
}

fn read_hits(
    stmt: &mut rusqlite::Statement<'_>,
    params: &[(&str, &dyn rusqlite::ToSql)],
) -> Result<Vec<Hit>> {
    let rows = stmt
        .query_map(params, |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, f64>(1)?,
                row.get::<_, String>(2)?,
            ))
        })
        .context("execute search query")?;

    let mut hits = Vec::new();
    for row in rows {
        let (key, score, payload) = row.context("read search row")?;
        hits.push(Hit::new(key, score, parse_payload(&payload)?));
    }
    Ok(hits)
}

/// In-process cosine over every stored embedding, used when sqlite-vec is
/// missing. Same ordering contract as the SQL path.
fn vector_search_fallback(
    conn: &Connection,
    registration: &Registration,
    provider: &str,
    vector: &[f32],
    k: usize,
) -> Result<Vec<Hit>> {
    let sql = format!(
        "SELECT e.key, e.embedding, {payload}
         FROM {emb} e
         JOIN {src} s ON s.{key} = e.key
         WHERE e.provider = ?1 AND e.dimensions = ?2",
        payload = payload_expr(registration, "s"),
        emb = quote_ident(&registration.embeddings_table()),
        src = quote_ident(&registration.table),
        key = quote_ident(&registration.key_column),
    );
    let mut stmt = conn
        .prepare(&sql)
        .context("prepare fallback vector query")?;
    let dims = to_sql_limit(vector.len());
    let rows = stmt
        .query_map(rusqlite::params![provider, dims], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })
        .context("execute fallback vector query")?;

    let mut hits = Vec::new();
    for row in rows {
        let (key, embedding, payload) = row.context("read fallback vector row")?;
        let embedding: Vec<f32> = match serde_json::from_str(&embedding) {
            Ok(value) => value,
            Err(err) => {
                debug!("skipping malformed embedding row for {key}: {err}");
                continue;
            }
        };
        let Some(score) = cosine_similarity(vector, &embedding) else {
            continue;
        };
        hits.push(Hit::new(key, score, parse_payload(&payload)?));
    }

    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.identity.cmp(&b.identity))
    });
    hits.truncate(k);
    Ok(hits)
}

fn cosine_similarity(left: &[f32], right: &[f32]) -> Option<f64> {
    if left.len() != right.len() || left.is_empty() {
        return None;
    }

    let mut dot = 0.0_f64;
    let mut left_norm_sq = 0.0_f64;
    let mut right_norm_sq = 0.0_f64;
    for (a, b) in left.iter().zip(right) {
        let (a, b) = (f64::from(*a), f64::from(*b));
        dot = a.mul_add(b, dot);
        left_norm_sq = a.mul_add(a, left_norm_sq);
        right_norm_sq = b.mul_add(b, right_norm_sq);
    }

    let denom = left_norm_sq.sqrt() * right_norm_sq.sqrt();
    if denom <= f64::EPSILON {
        return None;
    }
    Some((dot / denom).clamp(-1.0, 1.0))
}

impl SearchStore for SqliteStore {
    #[instrument(skip_all, fields(table = %query.target.table, k = query.k))]
    fn vector_search(&self, query: &VectorQuery<'_>) -> Result<Vec<Hit>> {
        let vector_json = encode_vector(query.vector)?;
        let conn = self.connection()?;
        let registration =
            Self::vector_registration(&conn, query.target, query.provider, query.vector.len())?;

        if !self.vec_available {
            return vector_search_fallback(
                &conn,
                &registration,
                query.provider,
                query.vector,
                query.k,
            );
        }

        let sql = with_payload_sql(&registration, &vector_window_sql(&registration));
        let mut stmt = conn.prepare(&sql).context("prepare vector query")?;
        let hits = read_hits(
            &mut stmt,
            named_params! {
                ":vector": vector_json,
                ":provider": query.provider,
                ":dims": to_sql_limit(query.vector.len()),
                ":k": to_sql_limit(query.k),
            },
        )
        .context("vector query")?;

        debug!(hits = hits.len(), "vector query complete");
        Ok(hits)
    }

    #[instrument(skip_all, fields(table = %query.target.table, k = query.k))]
    fn lexical_search(&self, query: &LexicalQuery<'_>) -> Result<Vec<Hit>> {
        let conn = self.connection()?;
        let registration = Self::registration(&conn, query.target)?;

        let Some(expression) = fts_match_expression(query.text) else {
            debug!("query text has no lexical terms");
            return Ok(Vec::new());
        };

        let sql = with_payload_sql(&registration, &lexical_window_sql(&registration));
        let mut stmt = conn.prepare(&sql).context("prepare lexical query")?;
        let hits = read_hits(
            &mut stmt,
            named_params! {
                ":match": expression,
                ":k": to_sql_limit(query.k),
            },
        )
        .with_context(|| format!("lexical query for '{}'", query.text))?;

        debug!(hits = hits.len(), "lexical query complete");
        Ok(hits)
    }

    fn supports_fused(&self) -> bool {
        self.vec_available
    }

    #[instrument(skip_all, fields(table = %query.target.table, k = query.k))]
    fn fused_search(&self, query: &FusedQuery<'_>) -> Result<Vec<RankedResult>> {
        if !self.vec_available {
            bail!("fused search requires the sqlite-vec extension");
        }
        let vector_json = encode_vector(query.vector)?;
        let conn = self.connection()?;
        let registration =
            Self::vector_registration(&conn, query.target, query.provider, query.vector.len())?;

        let expression = fts_match_expression(query.text);
        let lexical_window = if expression.is_some() {
            lexical_window_sql(&registration)
        } else {
            EMPTY_WINDOW_SQL.to_string()
        };
        let sql = fused_sql(&registration, &lexical_window);
        let mut stmt = conn.prepare(&sql).context("prepare fused query")?;

        let dims = to_sql_limit(query.vector.len());
        let k = to_sql_limit(query.k);
        let map_row = |row: &rusqlite::Row<'_>| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, f64>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, String>(4)?,
            ))
        };
        let rows = match &expression {
            Some(expression) => stmt.query_map(
                named_params! {
                    ":vector": vector_json,
                    ":provider": query.provider,
                    ":dims": dims,
                    ":k": k,
                    ":match": expression,
                    ":alpha": query.alpha,
                    ":beta": query.beta,
                },
                map_row,
            ),
            None => stmt.query_map(
                named_params! {
                    ":vector": vector_json,
                    ":provider": query.provider,
                    ":dims": dims,
                    ":k": k,
                    ":alpha": query.alpha,
                    ":beta": query.beta,
                },
                map_row,
            ),
        }
        .context("execute fused query")?;

        let mut results = Vec::new();
        for row in rows {
            let (key, hybrid_score, lexical_score, vector_score, payload) =
                row.context("read fused row")?;
            results.push(RankedResult {
                identity: Identity::new(key),
                payload: parse_payload(&payload)?,
                hybrid_score,
                lexical_score,
                vector_score,
            });
        }

        debug!(rows = results.len(), "fused query complete");
        Ok(results)
    }
}
