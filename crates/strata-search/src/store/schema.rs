//! Catalog migrations and table registration.
//!
//! Registering a source table derives two companion tables and three triggers:
//!
//! | Object                       | Purpose                                   |
//! |------------------------------|-------------------------------------------|
//! | `<table>__strata_fts`        | FTS5 index over the content column        |
//! | `<table>__strata_embeddings` | one JSON vector per key, with content hash |
//! | `<table>__strata_ai/au/ad`   | keep FTS in sync, enqueue refreshes       |
//!
//! Keys are stored as text everywhere (`CAST(key AS TEXT)`), which is also the
//! identity the fusion engine joins on. Identifiers are restricted to ASCII
//! letters, digits and underscores before they are spliced into DDL.

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params, types::Type};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use strata_core::ErrorCode;
use tracing::{debug, info, instrument};

/// Latest catalog schema version understood by this binary.
pub const LATEST_SCHEMA_VERSION: u32 = 2;

/// Busy timeout for store connections.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const MIGRATION_V1_SQL: &str = r"
CREATE TABLE IF NOT EXISTS strata_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    schema_version INTEGER NOT NULL
);

INSERT OR IGNORE INTO strata_meta (id, schema_version) VALUES (1, 0);

CREATE TABLE IF NOT EXISTS strata_tables (
    table_name TEXT PRIMARY KEY,
    key_column TEXT NOT NULL,
    content_column TEXT NOT NULL,
    registered_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);
";

const MIGRATION_V2_SQL: &str = r"
CREATE TABLE IF NOT EXISTS strata_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    table_name TEXT NOT NULL,
    key TEXT NOT NULL,
    enqueued_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_strata_queue_table_id
    ON strata_queue(table_name, id);
";

const MIGRATIONS: &[(u32, &str)] = &[(1, MIGRATION_V1_SQL), (2, MIGRATION_V2_SQL)];

/// Registration failures callers may want to branch on.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("table `{0}` is not registered")]
    NotRegistered(String),

    #[error("table `{0}` is already registered")]
    AlreadyRegistered(String),

    #[error("invalid identifier `{0}`")]
    InvalidIdentifier(String),

    #[error("table `{0}` does not exist")]
    MissingTable(String),

    #[error("column `{column}` does not exist on table `{table}`")]
    MissingColumn { table: String, column: String },

    #[error("table `{table}` is registered with content field `{registered}`, not `{requested}`")]
    ContentFieldMismatch {
        table: String,
        registered: String,
        requested: String,
    },

    #[error(
        "table `{table}` holds embeddings from `{stored}`, which cannot be compared with `{requested}`"
    )]
    EmbeddingSpaceMismatch {
        table: String,
        stored: String,
        requested: String,
    },
}

impl RegistryError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NotRegistered(_) | Self::MissingTable(_) | Self::MissingColumn { .. } => {
                ErrorCode::TableNotRegistered
            }
            Self::AlreadyRegistered(_) => ErrorCode::TableAlreadyRegistered,
            Self::InvalidIdentifier(_) => ErrorCode::InvalidIdentifier,
            Self::ContentFieldMismatch { .. } => ErrorCode::ContentFieldMismatch,
            Self::EmbeddingSpaceMismatch { .. } => ErrorCode::EmbeddingSpaceMismatch,
        }
    }
}

/// What to register: a source table, its key column and its text column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    pub table: String,
    pub key_column: String,
    pub content_column: String,
}

/// A registered table as recorded in the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub table: String,
    pub key_column: String,
    pub content_column: String,
    /// Source columns in declaration order; every one lands in the payload.
    pub columns: Vec<String>,
}

impl Registration {
    #[must_use]
    pub fn fts_table(&self) -> String {
        fts_table_name(&self.table)
    }

    #[must_use]
    pub fn embeddings_table(&self) -> String {
        embeddings_table_name(&self.table)
    }

    /// Fail unless `content_field` is the registered content column.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::ContentFieldMismatch`].
    pub fn ensure_content_field(&self, content_field: &str) -> Result<(), RegistryError> {
        if self.content_column.eq_ignore_ascii_case(content_field) {
            return Ok(());
        }
        Err(RegistryError::ContentFieldMismatch {
            table: self.table.clone(),
            registered: self.content_column.clone(),
            requested: content_field.to_string(),
        })
    }
}

#[must_use]
pub fn fts_table_name(table: &str) -> String {
    format!("{table}__strata_fts")
}

#[must_use]
pub fn embeddings_table_name(table: &str) -> String {
    format!("{table}__strata_embeddings")
}

fn trigger_names(table: &str) -> [String; 3] {
    [
        format!("{table}__strata_ai"),
        format!("{table}__strata_au"),
        format!("{table}__strata_ad"),
    ]
}

/// Double-quote an SQL identifier.
pub(crate) fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Single-quote an SQL string literal.
pub(crate) fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Accept ASCII letters, digits and underscores, not starting with a digit.
///
/// # Errors
///
/// Returns [`RegistryError::InvalidIdentifier`] otherwise.
pub fn validate_identifier(ident: &str) -> Result<(), RegistryError> {
    let mut chars = ident.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if valid_start && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(RegistryError::InvalidIdentifier(ident.to_string()))
    }
}

/// Read `PRAGMA user_version` as a `u32`.
///
/// # Errors
///
/// Returns an error if querying SQLite fails or the value is out of range.
pub fn current_schema_version(conn: &Connection) -> rusqlite::Result<u32> {
    let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    u32::try_from(version).map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(0, Type::Integer, Box::new(error))
    })
}

/// Apply pending catalog migrations in ascending order.
///
/// # Errors
///
/// Returns an error if any migration fails.
pub fn migrate(conn: &mut Connection) -> rusqlite::Result<u32> {
    let mut current = current_schema_version(conn)?;

    for (version, sql) in MIGRATIONS {
        if *version <= current {
            continue;
        }

        let tx = conn.transaction()?;
        tx.execute_batch(sql)?;
        tx.pragma_update(None, "user_version", i64::from(*version))?;
        tx.execute(
            "UPDATE strata_meta SET schema_version = ?1 WHERE id = 1",
            [i64::from(*version)],
        )?;
        tx.commit()?;
        current = *version;
    }

    Ok(current)
}

/// Open (or create) a database, apply runtime pragmas and migrate the catalog.
///
/// # Errors
///
/// Returns an error if opening, configuring or migrating fails.
pub fn open_database(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create database directory {}", parent.display()))?;
    }

    let mut conn =
        Connection::open(path).with_context(|| format!("open database {}", path.display()))?;

    configure_connection(&conn).context("configure sqlite pragmas")?;
    migrate(&mut conn).context("apply strata catalog migrations")?;

    Ok(conn)
}

fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    let _journal_mode: String =
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    conn.query_row(
        "SELECT EXISTS(
            SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1 COLLATE NOCASE
        )",
        params![table],
        |row| row.get(0),
    )
    .with_context(|| format!("check whether table {table} exists"))
}

fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare("SELECT name FROM pragma_table_info(?1) ORDER BY cid")
        .context("prepare column listing")?;
    let rows = stmt
        .query_map(params![table], |row| row.get::<_, String>(0))
        .with_context(|| format!("list columns of {table}"))?;

    let mut columns = Vec::new();
    for row in rows {
        columns.push(row.context("read column name")?);
    }
    Ok(columns)
}

fn find_column<'a>(columns: &'a [String], table: &str, wanted: &str) -> Result<&'a str> {
    columns
        .iter()
        .find(|c| c.eq_ignore_ascii_case(wanted))
        .map(String::as_str)
        .ok_or_else(|| {
            RegistryError::MissingColumn {
                table: table.to_string(),
                column: wanted.to_string(),
            }
            .into()
        })
}

fn derived_objects_sql(spec: &TableSpec) -> String {
    let table = &spec.table;
    let src = quote_ident(table);
    let key = quote_ident(&spec.key_column);
    let content = quote_ident(&spec.content_column);
    let fts = quote_ident(&fts_table_name(table));
    let emb = quote_ident(&embeddings_table_name(table));
    let [ai, au, ad] = trigger_names(table).map(|name| quote_ident(&name));

    format!(
        r"
CREATE VIRTUAL TABLE {fts} USING fts5(
    key UNINDEXED,
    content,
    tokenize='porter unicode61'
);

CREATE TABLE {emb} (
    key TEXT PRIMARY KEY,
    content_hash TEXT NOT NULL,
    provider TEXT NOT NULL,
    dimensions INTEGER NOT NULL,
    embedding TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX {emb_idx} ON {emb}(dimensions);

CREATE TRIGGER {ai}
AFTER INSERT ON {src}
WHEN new.{key} IS NOT NULL
BEGIN
    INSERT INTO {fts}(key, content)
    VALUES (CAST(new.{key} AS TEXT), COALESCE(CAST(new.{content} AS TEXT), ''));
    INSERT INTO strata_queue(table_name, key)
    VALUES ('{table}', CAST(new.{key} AS TEXT));
END;

CREATE TRIGGER {au}
AFTER UPDATE OF {key}, {content} ON {src}
BEGIN
    DELETE FROM {fts} WHERE key = CAST(old.{key} AS TEXT);
    INSERT INTO {fts}(key, content)
    SELECT CAST(new.{key} AS TEXT), COALESCE(CAST(new.{content} AS TEXT), '')
    WHERE new.{key} IS NOT NULL;
    INSERT INTO strata_queue(table_name, key)
    SELECT '{table}', CAST(old.{key} AS TEXT)
    WHERE old.{key} IS NOT NULL AND old.{key} IS NOT new.{key};
    INSERT INTO strata_queue(table_name, key)
    SELECT '{table}', CAST(new.{key} AS TEXT)
    WHERE new.{key} IS NOT NULL;
END;

CREATE TRIGGER {ad}
AFTER DELETE ON {src}
BEGIN
    DELETE FROM {fts} WHERE key = CAST(old.{key} AS TEXT);
    DELETE FROM {emb} WHERE key = CAST(old.{key} AS TEXT);
END;

INSERT INTO {fts}(key, content)
SELECT CAST({key} AS TEXT), COALESCE(CAST({content} AS TEXT), '')
FROM {src}
WHERE {key} IS NOT NULL;

INSERT INTO strata_queue(table_name, key)
SELECT '{table}', CAST({key} AS TEXT)
FROM {src}
WHERE {key} IS NOT NULL;
",
        emb_idx = quote_ident(&format!("{table}__strata_embeddings_dims")),
    )
}

/// Register a source table for embedding refresh and hybrid search.
///
/// Creates the FTS and embedding companion tables, installs the sync
/// triggers, backfills the FTS index and enqueues every existing row.
///
/// # Errors
///
/// Returns a [`RegistryError`] for invalid identifiers, missing tables or
/// columns and duplicate registrations, or an SQL error.
#[instrument(skip(conn), fields(table = %spec.table))]
pub fn register_table(conn: &mut Connection, spec: &TableSpec) -> Result<Registration> {
    for ident in [&spec.table, &spec.key_column, &spec.content_column] {
        validate_identifier(ident)?;
    }
    if spec.table.starts_with("strata_") || spec.table.contains("__strata_") {
        return Err(RegistryError::InvalidIdentifier(spec.table.clone()).into());
    }

    if !table_exists(conn, &spec.table)? {
        return Err(RegistryError::MissingTable(spec.table.clone()).into());
    }
    if find_registration(conn, &spec.table)?.is_some() {
        return Err(RegistryError::AlreadyRegistered(spec.table.clone()).into());
    }

    let columns = table_columns(conn, &spec.table)?;
    let spec = TableSpec {
        table: spec.table.clone(),
        key_column: find_column(&columns, &spec.table, &spec.key_column)?.to_string(),
        content_column: find_column(&columns, &spec.table, &spec.content_column)?.to_string(),
    };

    let tx = conn.transaction().context("begin registration")?;
    tx.execute_batch(&derived_objects_sql(&spec))
        .with_context(|| format!("create strata objects for {}", spec.table))?;
    tx.execute(
        "INSERT INTO strata_tables (table_name, key_column, content_column) VALUES (?1, ?2, ?3)",
        params![spec.table, spec.key_column, spec.content_column],
    )
    .context("record registration")?;
    tx.commit().context("commit registration")?;

    let queued: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM strata_queue WHERE table_name = ?1",
            params![spec.table],
            |row| row.get(0),
        )
        .context("count backfilled queue rows")?;
    info!(queued, "registered table");

    Ok(Registration {
        table: spec.table,
        key_column: spec.key_column,
        content_column: spec.content_column,
        columns,
    })
}

/// Drop the triggers and companion tables of a registered table.
///
/// The source table itself is left untouched.
///
/// # Errors
///
/// Returns [`RegistryError::NotRegistered`] or an SQL error.
#[instrument(skip(conn))]
pub fn unregister_table(conn: &mut Connection, table: &str) -> Result<()> {
    validate_identifier(table)?;
    let registration = load_registration(conn, table)?;

    let mut sql = String::new();
    for trigger in trigger_names(&registration.table) {
        sql.push_str(&format!("DROP TRIGGER IF EXISTS {};\n", quote_ident(&trigger)));
    }
    sql.push_str(&format!(
        "DROP TABLE IF EXISTS {};\nDROP TABLE IF EXISTS {};\n",
        quote_ident(&registration.fts_table()),
        quote_ident(&registration.embeddings_table()),
    ));

    let tx = conn.transaction().context("begin unregistration")?;
    tx.execute_batch(&sql)
        .with_context(|| format!("drop strata objects for {table}"))?;
    tx.execute(
        "DELETE FROM strata_queue WHERE table_name = ?1",
        params![registration.table],
    )
    .context("clear refresh queue")?;
    tx.execute(
        "DELETE FROM strata_tables WHERE table_name = ?1",
        params![registration.table],
    )
    .context("remove registration")?;
    tx.commit().context("commit unregistration")?;

    info!("unregistered table");
    Ok(())
}

fn find_registration(conn: &Connection, table: &str) -> Result<Option<(String, String, String)>> {
    conn.query_row(
        "SELECT table_name, key_column, content_column
         FROM strata_tables
         WHERE table_name = ?1 COLLATE NOCASE",
        params![table],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )
    .optional()
    .with_context(|| format!("look up registration for {table}"))
}

/// Load one registration with its current source column list.
///
/// # Errors
///
/// Returns [`RegistryError::NotRegistered`] or an SQL error.
pub fn load_registration(conn: &Connection, table: &str) -> Result<Registration> {
    let Some((table, key_column, content_column)) = find_registration(conn, table)? else {
        return Err(RegistryError::NotRegistered(table.to_string()).into());
    };
    let columns = table_columns(conn, &table)?;
    debug!(table = %table, columns = columns.len(), "loaded registration");

    Ok(Registration {
        table,
        key_column,
        content_column,
        columns,
    })
}

/// Every registration, ordered by table name.
///
/// # Errors
///
/// Returns an error if the catalog cannot be read.
pub fn list_registrations(conn: &Connection) -> Result<Vec<Registration>> {
    let mut stmt = conn
        .prepare("SELECT table_name FROM strata_tables ORDER BY table_name")
        .context("prepare registration listing")?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .context("list registrations")?;

    let mut registrations = Vec::new();
    for name in names {
        let name = name.context("read registration row")?;
        registrations.push(load_registration(conn, &name)?);
    }
    Ok(registrations)
}

/// The provider and width an embedding was produced with. Vectors are only
/// comparable within one space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingSpace {
    pub provider: String,
    pub dimensions: usize,
}

impl EmbeddingSpace {
    pub fn new(provider: impl Into<String>, dimensions: usize) -> Self {
        Self {
            provider: provider.into(),
            dimensions,
        }
    }
}

impl fmt::Display for EmbeddingSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}d", self.provider, self.dimensions)
    }
}

/// Fail when `registration` stores an embedding outside `space`, ignoring the
/// keys in `replacing` (rows about to be overwritten).
///
/// # Errors
///
/// Returns [`RegistryError::EmbeddingSpaceMismatch`] or an SQL error.
pub fn ensure_embedding_space(
    conn: &Connection,
    registration: &Registration,
    space: &EmbeddingSpace,
    replacing: &HashSet<&str>,
) -> Result<()> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT key, provider, dimensions FROM {}
             WHERE provider <> ?1 OR dimensions <> ?2
             LIMIT ?3",
            quote_ident(&registration.embeddings_table())
        ))
        .context("prepare embedding space check")?;
    let dims = i64::try_from(space.dimensions).unwrap_or(i64::MAX);
    let limit = i64::try_from(replacing.len() + 1).unwrap_or(i64::MAX);
    let rows = stmt
        .query_map(params![space.provider, dims, limit], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })
        .context("check embedding space")?;

    for row in rows {
        let (key, provider, dimensions) = row.context("read embedding space row")?;
        if replacing.contains(key.as_str()) {
            continue;
        }
        let stored = EmbeddingSpace::new(provider, usize::try_from(dimensions).unwrap_or(0));
        return Err(RegistryError::EmbeddingSpaceMismatch {
            table: registration.table.clone(),
            stored: stored.to_string(),
            requested: space.to_string(),
        }
        .into());
    }
    Ok(())
}
