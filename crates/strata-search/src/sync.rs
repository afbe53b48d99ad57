//! Embedding refresh: drain the trigger-fed queue into the embeddings table.

use crate::embedding::EmbeddingGateway;
use crate::store::schema::{
    EmbeddingSpace, Registration, ensure_embedding_space, load_registration, quote_ident,
};
use anyhow::{Context, Result, bail};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use tracing::{debug, info, instrument, warn};

/// Embedded when no record of a batch could be embedded, to tell a broken
/// provider chain from a batch of records no provider accepts.
const CANARY_TEXT: &str = "strata embedding health check";

/// Counters for one `sync_embeddings` run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    /// Queue rows consumed.
    pub dequeued: usize,
    /// Embeddings written.
    pub embedded: usize,
    /// Records whose content hash was unchanged.
    pub skipped: usize,
    /// Records no provider could embed (for example text without terms).
    pub rejected: usize,
    /// Embeddings deleted for missing rows, empty content or rejected text.
    pub removed: usize,
}

impl SyncStats {
    const fn absorb(&mut self, other: Self) {
        self.dequeued += other.dequeued;
        self.embedded += other.embedded;
        self.skipped += other.skipped;
        self.rejected += other.rejected;
        self.removed += other.removed;
    }
}

fn content_hash_hex(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn to_sql_int(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Refresh embeddings for every queued key of `table`.
///
/// Works in batches of `batch_size` queue rows (ordered by queue id). Each
/// batch embeds its changed texts with a single gateway call, then writes the
/// results and deletes the consumed queue rows in one transaction.
///
/// When the batch call fails, records are embedded one at a time; records no
/// provider accepts are dequeued, counted as rejected and lose their stored
/// embedding. When the provider chain itself is down the error is returned
/// and the batch stays queued.
///
/// A table holds embeddings from one provider and width only. A batch served
/// by any other provider (a fallback, or a changed config) fails with
/// [`RegistryError::EmbeddingSpaceMismatch`](crate::store::RegistryError)
/// and stays queued; [`rebuild_embeddings`] starts the table over.
///
/// # Errors
///
/// Returns an error if the table is not registered, the gateway is down, the
/// embedding space does not match or a database operation fails.
#[instrument(skip(conn, gateway))]
pub fn sync_embeddings(
    conn: &mut Connection,
    table: &str,
    gateway: &EmbeddingGateway,
    batch_size: usize,
) -> Result<SyncStats> {
    let registration = load_registration(conn, table)?;
    let batch_size = batch_size.max(1);

    let mut stats = SyncStats::default();
    loop {
        let batch = sync_batch(conn, &registration, gateway, batch_size)?;
        if batch.dequeued == 0 {
            break;
        }
        stats.absorb(batch);
    }

    info!(
        dequeued = stats.dequeued,
        embedded = stats.embedded,
        skipped = stats.skipped,
        rejected = stats.rejected,
        removed = stats.removed,
        "embedding sync complete"
    );
    Ok(stats)
}

/// Drop every stored embedding of `table` and queue all of its rows again.
///
/// Used when the table's embeddings should come from a different provider.
/// Returns the number of rows queued.
///
/// # Errors
///
/// Returns an error if the table is not registered or a database operation
/// fails.
#[instrument(skip(conn))]
pub fn rebuild_embeddings(conn: &mut Connection, table: &str) -> Result<usize> {
    let registration = load_registration(conn, table)?;
    let emb = quote_ident(&registration.embeddings_table());
    let src = quote_ident(&registration.table);
    let key = quote_ident(&registration.key_column);

    let tx = conn.transaction().context("begin rebuild")?;
    let dropped = tx
        .execute(&format!("DELETE FROM {emb}"), [])
        .context("drop stored embeddings")?;
    tx.execute(
        "DELETE FROM strata_queue WHERE table_name = ?1",
        params![registration.table],
    )
    .context("clear refresh queue")?;
    let queued = tx
        .execute(
            &format!(
                "INSERT INTO strata_queue (table_name, key)
                 SELECT ?1, CAST({key} AS TEXT) FROM {src} WHERE {key} IS NOT NULL"
            ),
            params![registration.table],
        )
        .context("queue every row")?;
    tx.commit().context("commit rebuild")?;

    info!(dropped, queued, "embeddings reset");
    Ok(queued)
}

struct Pending {
    key: String,
    hash: String,
    content: String,
}

/// Vectors for the pending records of one batch, all from one space.
struct Embedded {
    space: Option<EmbeddingSpace>,
    /// `(index into pending, vector)`.
    vectors: Vec<(usize, Vec<f32>)>,
    /// Indices into pending of records no provider accepted.
    rejected: Vec<usize>,
}

fn embed_pending(gateway: &EmbeddingGateway, pending: &[Pending], table: &str) -> Result<Embedded> {
    if pending.is_empty() {
        return Ok(Embedded {
            space: None,
            vectors: Vec::new(),
            rejected: Vec::new(),
        });
    }

    let texts: Vec<&str> = pending.iter().map(|p| p.content.as_str()).collect();
    let batch_err = match gateway.embed_batch(&texts) {
        Ok(batch) => {
            let dimensions = batch.vectors.first().map_or(0, Vec::len);
            return Ok(Embedded {
                space: Some(EmbeddingSpace::new(batch.provider, dimensions)),
                vectors: batch.vectors.into_iter().enumerate().collect(),
                rejected: Vec::new(),
            });
        }
        Err(err) => err,
    };
    warn!(
        table,
        records = texts.len(),
        "batch embedding failed, retrying records one at a time: {batch_err}"
    );

    let mut space: Option<EmbeddingSpace> = None;
    let mut vectors = Vec::new();
    let mut rejected = Vec::new();
    for (idx, text) in texts.iter().enumerate() {
        match gateway.embed(text) {
            Ok(embedding) => {
                let served = EmbeddingSpace::new(embedding.provider, embedding.vector.len());
                if let Some(first) = &space
                    && *first != served
                {
                    bail!(
                        "records of {table} were embedded by both {first} and {served}; \
                         retry once the primary provider is back"
                    );
                }
                space = Some(served);
                vectors.push((idx, embedding.vector));
            }
            Err(err) => {
                warn!(table, key = %pending[idx].key, "record cannot be embedded: {err}");
                rejected.push(idx);
            }
        }
    }

    if space.is_none() && gateway.embed(CANARY_TEXT).is_err() {
        return Err(batch_err).with_context(|| format!("embed {} records of {table}", texts.len()));
    }
    Ok(Embedded {
        space,
        vectors,
        rejected,
    })
}

fn sync_batch(
    conn: &mut Connection,
    registration: &Registration,
    gateway: &EmbeddingGateway,
    batch_size: usize,
) -> Result<SyncStats> {
    let queued = read_queue(conn, &registration.table, batch_size)?;
    let Some(&(last_id, _)) = queued.last() else {
        return Ok(SyncStats::default());
    };

    let mut stats = SyncStats {
        dequeued: queued.len(),
        ..SyncStats::default()
    };

    let mut seen = HashSet::new();
    let mut pending: Vec<Pending> = Vec::new();
    let mut stale: Vec<String> = Vec::new();
    for (_, key) in queued {
        if !seen.insert(key.clone()) {
            continue;
        }

        match read_content(conn, registration, &key)? {
            Some(content) if !content.trim().is_empty() => {
                let hash = content_hash_hex(&content);
                if stored_hash(conn, registration, &key)?.as_deref() == Some(hash.as_str()) {
                    stats.skipped += 1;
                } else {
                    pending.push(Pending { key, hash, content });
                }
            }
            _ => stale.push(key),
        }
    }

    let embedded = embed_pending(gateway, &pending, &registration.table)?;
    if let Some(space) = &embedded.space {
        let replacing: HashSet<&str> = pending.iter().map(|p| p.key.as_str()).collect();
        ensure_embedding_space(conn, registration, space, &replacing)?;
    }
    stats.rejected = embedded.rejected.len();
    stale.extend(embedded.rejected.iter().map(|&idx| pending[idx].key.clone()));
    let provider = embedded
        .space
        .as_ref()
        .map_or("", |space| space.provider.as_str());

    let emb = quote_ident(&registration.embeddings_table());
    let tx = conn.transaction().context("begin sync batch")?;
    for key in &stale {
        stats.removed += tx
            .execute(&format!("DELETE FROM {emb} WHERE key = ?1"), params![key])
            .context("delete stale embedding")?;
    }
    for (idx, vector) in &embedded.vectors {
        let record = &pending[*idx];
        let encoded = serde_json::to_string(vector).context("encode embedding")?;
        tx.execute(
            &format!(
                "INSERT INTO {emb} (key, content_hash, provider, dimensions, embedding, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, CURRENT_TIMESTAMP)
                 ON CONFLICT(key) DO UPDATE SET
                    content_hash = excluded.content_hash,
                    provider = excluded.provider,
                    dimensions = excluded.dimensions,
                    embedding = excluded.embedding,
                    updated_at = excluded.updated_at"
            ),
            params![
                record.key,
                record.hash,
                provider,
                to_sql_int(vector.len()),
                encoded
            ],
        )
        .with_context(|| format!("upsert embedding for {}", record.key))?;
        stats.embedded += 1;
    }
    tx.execute(
        "DELETE FROM strata_queue WHERE table_name = ?1 AND id <= ?2",
        params![registration.table, last_id],
    )
    .context("delete consumed queue rows")?;
    tx.commit().context("commit sync batch")?;

    debug!(
        table = %registration.table,
        provider,
        embedded = stats.embedded,
        skipped = stats.skipped,
        rejected = stats.rejected,
        removed = stats.removed,
        "sync batch written"
    );
    Ok(stats)
}

fn read_queue(conn: &Connection, table: &str, limit: usize) -> Result<Vec<(i64, String)>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, key FROM strata_queue
             WHERE table_name = ?1
             ORDER BY id
             LIMIT ?2",
        )
        .context("prepare queue read")?;
    let rows = stmt
        .query_map(params![table, to_sql_int(limit)], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })
        .context("read refresh queue")?;

    let mut queued = Vec::new();
    for row in rows {
        queued.push(row.context("read queue row")?);
    }
    Ok(queued)
}

fn read_content(conn: &Connection, registration: &Registration, key: &str) -> Result<Option<String>> {
    let sql = format!(
        "SELECT CAST({content} AS TEXT) FROM {src} WHERE {key_col} = ?1 LIMIT 1",
        content = quote_ident(&registration.content_column),
        src = quote_ident(&registration.table),
        key_col = quote_ident(&registration.key_column),
    );
    let content: Option<Option<String>> = conn
        .query_row(&sql, params![key], |row| row.get(0))
        .optional()
        .with_context(|| format!("read content for {key}"))?;
    Ok(content.flatten())
}

fn stored_hash(conn: &Connection, registration: &Registration, key: &str) -> Result<Option<String>> {
    conn.query_row(
        &format!(
            "SELECT content_hash FROM {} WHERE key = ?1",
            quote_ident(&registration.embeddings_table())
        ),
        params![key],
        |row| row.get(0),
    )
    .optional()
    .with_context(|| format!("read content hash for {key}"))
}

/// Queue rows waiting for `table`.
///
/// # Errors
///
/// Returns an error if the queue cannot be read.
pub fn pending_count(conn: &Connection, table: &str) -> Result<u64> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM strata_queue WHERE table_name = ?1",
            params![table],
            |row| row.get(0),
        )
        .context("count pending queue rows")?;
    Ok(u64::try_from(count).unwrap_or(0))
}

/// Stored embeddings for `table`.
///
/// # Errors
///
/// Returns an error if the table is not registered or cannot be read.
pub fn embedded_count(conn: &Connection, table: &str) -> Result<u64> {
    let registration = load_registration(conn, table)?;
    let count: i64 = conn
        .query_row(
            &format!(
                "SELECT COUNT(*) FROM {}",
                quote_ident(&registration.embeddings_table())
            ),
            [],
            |row| row.get(0),
        )
        .context("count embeddings")?;
    Ok(u64::try_from(count).unwrap_or(0))
}
