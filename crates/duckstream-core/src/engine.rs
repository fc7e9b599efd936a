//! Execution Engine Adapter
//!
//! Thin wrapper around a DuckDB [`Connection`] bound to one session file.
//!
//! ## Lifecycle
//!
//! 1. [`Engine::open`] creates the file if absent and applies the
//!    process-wide tuning from [`EngineSettings`]: memory ceiling, spill
//!    directory and (when configured) the Parquet footer key.
//! 2. Statements run through [`Engine::exec`], [`Engine::query_rows`] or
//!    [`Engine::query_columnar`].
//! 3. [`Engine::close`] checkpoints and releases the file. Dropping an
//!    engine closes it as well.
//!
//! A `Connection` is `Send` but not `Sync`: an engine is owned by exactly one
//! call and used from a blocking task.

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use duckdb::{Connection, Row};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::{EngineSettings, PARQUET_KEY_NAME};
use crate::error::{Error, Result};

/// Cursor over the record batches of one query.
pub type ColumnarCursor<'a> = dyn Iterator<Item = Result<RecordBatch>> + 'a;

pub struct Engine {
    conn: Connection,
    path: PathBuf,
    encryption: bool,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("path", &self.path)
            .field("encryption", &self.encryption)
            .finish()
    }
}

impl Engine {
    /// Open (or create) the database at `path` and apply tuning.
    pub fn open(path: &Path, settings: &EngineSettings) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| Error::EngineOpen(format!("{}: {}", path.display(), e)))?;

        let mut tuning = format!(
            "SET memory_limit = {}; SET temp_directory = {};",
            quote_literal(&settings.memory_limit),
            quote_literal(&settings.temp_dir.to_string_lossy()),
        );
        if let Some(key) = &settings.encryption_key {
            tuning.push_str(&format!(
                " PRAGMA add_parquet_key({}, {});",
                quote_literal(PARQUET_KEY_NAME),
                quote_literal(key)
            ));
        }
        conn.execute_batch(&tuning)
            .map_err(|e| Error::EngineOpen(format!("applying settings: {}", e)))?;

        debug!(
            path = %path.display(),
            memory_limit = %settings.memory_limit,
            encryption = settings.encryption_key.is_some(),
            "Engine opened"
        );

        Ok(Self {
            conn,
            path: path.to_path_buf(),
            encryption: settings.encryption_key.is_some(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a Parquet footer key was registered on open.
    pub fn encryption_enabled(&self) -> bool {
        self.encryption
    }

    /// Run one or more statements, discarding any result.
    pub fn exec(&self, sql: &str) -> duckdb::Result<()> {
        self.conn.execute_batch(sql)
    }

    /// Run a query and map every row through `map_row`.
    pub fn query_rows<T, F>(&self, sql: &str, map_row: F) -> duckdb::Result<Vec<T>>
    where
        F: FnMut(&Row<'_>) -> duckdb::Result<T>,
    {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map([], map_row)?;
        rows.collect()
    }

    /// Run a query and hand its record-batch cursor to `consume`.
    ///
    /// The query executes in streaming mode: batches are produced as the
    /// cursor is pulled, so the full result never sits in memory. The result
    /// schema comes from a `LIMIT 0` probe of the same query, since a
    /// streaming result only exposes batches.
    ///
    /// The cursor borrows the prepared statement, so it only lives for the
    /// duration of the callback.
    pub fn query_columnar<R, F>(&self, sql: &str, consume: F) -> Result<R>
    where
        F: FnOnce(&mut ColumnarCursor<'_>) -> Result<R>,
    {
        let schema = self.result_schema(sql)?;

        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|e| Error::Query(e.to_string()))?;
        let batches = stmt
            .stream_arrow([], schema)
            .map_err(|e| Error::Query(e.to_string()))?;
        let mut cursor = batches.map(Ok::<RecordBatch, Error>);
        consume(&mut cursor)
    }

    fn result_schema(&self, sql: &str) -> Result<SchemaRef> {
        let query = sql.trim().trim_end_matches(';');
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT * FROM ({}) LIMIT 0", query))
            .map_err(|e| Error::Query(e.to_string()))?;
        let empty = stmt
            .query_arrow([])
            .map_err(|e| Error::Query(e.to_string()))?;
        Ok(empty.get_schema())
    }

    /// Close the connection, surfacing any checkpoint error.
    pub fn close(self) -> duckdb::Result<()> {
        let path = self.path;
        self.conn.close().map_err(|(_, e)| e)?;
        debug!(path = %path.display(), "Engine closed");
        Ok(())
    }
}

/// Render `value` as a single-quoted SQL string literal.
pub(crate) fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_in(dir: &Path) -> Engine {
        let spill = dir.join("spill");
        std::fs::create_dir_all(&spill).unwrap();
        Engine::open(&dir.join("test.duckdb"), &EngineSettings::new(spill)).unwrap()
    }

    #[test]
    fn test_quote_literal_escapes_quotes() {
        assert_eq!(quote_literal("plain"), "'plain'");
        assert_eq!(quote_literal("it's"), "'it''s'");
    }

    #[test]
    fn test_open_creates_file() {
        let temp = tempfile::tempdir().unwrap();
        let engine = open_in(temp.path());
        engine.exec("CREATE TABLE t AS SELECT 1 AS x").unwrap();
        engine.close().unwrap();
        assert!(temp.path().join("test.duckdb").exists());
    }

    #[test]
    fn test_open_applies_temp_directory() {
        let temp = tempfile::tempdir().unwrap();
        let engine = open_in(temp.path());
        let dirs = engine
            .query_rows("SELECT current_setting('temp_directory')", |row| {
                row.get::<_, String>(0)
            })
            .unwrap();
        assert_eq!(
            dirs,
            vec![temp.path().join("spill").to_string_lossy().to_string()]
        );
        assert!(!engine.encryption_enabled());
    }

    #[test]
    fn test_query_rows_maps_each_row() {
        let temp = tempfile::tempdir().unwrap();
        let engine = open_in(temp.path());
        let values = engine
            .query_rows("SELECT * FROM range(5) ORDER BY 1", |row| row.get::<_, i64>(0))
            .unwrap();
        assert_eq!(values, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_query_columnar_yields_all_rows() {
        let temp = tempfile::tempdir().unwrap();
        let engine = open_in(temp.path());
        let total = engine
            .query_columnar("SELECT * FROM range(10000)", |cursor| {
                let mut rows = 0;
                for batch in cursor {
                    rows += batch?.num_rows();
                }
                Ok(rows)
            })
            .unwrap();
        assert_eq!(total, 10000);
    }

    #[test]
    fn test_query_columnar_keeps_schema_for_empty_result() {
        let temp = tempfile::tempdir().unwrap();
        let engine = open_in(temp.path());
        let (rows, fields) = engine
            .query_columnar(
                "SELECT range AS id, 'x' AS tag FROM range(10) WHERE range > 100;",
                |cursor| {
                    let mut rows = 0;
                    let mut fields = Vec::new();
                    for batch in cursor {
                        let batch = batch?;
                        rows += batch.num_rows();
                        fields = batch
                            .schema()
                            .fields()
                            .iter()
                            .map(|f| f.name().clone())
                            .collect();
                    }
                    Ok((rows, fields))
                },
            )
            .unwrap();
        assert_eq!(rows, 0);
        // An empty streaming result may yield no batch at all
        assert!(fields.is_empty() || fields == vec!["id".to_string(), "tag".to_string()]);
    }

    #[test]
    fn test_query_columnar_streams_first_batch_without_full_result() {
        let temp = tempfile::tempdir().unwrap();
        let engine = open_in(temp.path());
        engine.exec("SET threads = 1").unwrap();

        // Roughly 4GB if materialized; streaming hands back one vector.
        let started = std::time::Instant::now();
        let first = engine
            .query_columnar(
                "SELECT range AS id, repeat('x', 200) || range AS payload FROM range(20000000)",
                |cursor| match cursor.next() {
                    Some(batch) => Ok(batch?.num_rows()),
                    None => Ok(0),
                },
            )
            .unwrap();
        let elapsed = started.elapsed();

        assert!(first > 0);
        assert!(first <= 4096, "first batch held {} rows", first);
        assert!(
            elapsed < std::time::Duration::from_secs(5),
            "first batch took {:?}",
            elapsed
        );
    }

    #[test]
    fn test_query_columnar_bad_sql_is_query_error() {
        let temp = tempfile::tempdir().unwrap();
        let engine = open_in(temp.path());
        let err = engine
            .query_columnar("SELECT * FROM missing_table", |_| Ok(()))
            .unwrap_err();
        assert!(matches!(err, Error::Query(_)));
    }

    #[test]
    fn test_tables_persist_across_reopen() {
        let temp = tempfile::tempdir().unwrap();
        let engine = open_in(temp.path());
        engine.exec("CREATE TABLE t AS SELECT 42 AS x").unwrap();
        engine.close().unwrap();

        let engine = open_in(temp.path());
        let x = engine
            .query_rows("SELECT x FROM t", |row| row.get::<_, i32>(0))
            .unwrap();
        assert_eq!(x, vec![42]);
    }
}
