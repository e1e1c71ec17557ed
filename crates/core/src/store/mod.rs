//! The embedded store: a single SQLite database file holding scripts,
//! scenes, bibles, and embeddings, accessed through one serialized writer
//! connection and a bounded pool of read-only connections.

pub mod gitignore;
pub mod pool;
pub mod schema;
pub mod value;

pub use value::{Params, Row, SqlValue};

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::Connection;

use crate::{Error, Result};
use pool::ReadPool;

/// Tunables for [`Store::open`]. Constructed explicitly by the caller —
/// there is no env-var loading or global singleton.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub max_read_connections: usize,
    pub read_checkout_timeout: Duration,
    pub read_max_idle_time: Duration,
    /// Whether to add the database's files to the enclosing repo's
    /// `.gitignore` on open. Disabled in tests that don't want filesystem
    /// side effects outside the temp database directory.
    pub update_gitignore: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_read_connections: 5,
            read_checkout_timeout: Duration::from_secs(5),
            read_max_idle_time: Duration::from_secs(300),
            update_gitignore: true,
        }
    }
}

/// A snapshot of pool occupancy and schema state, returned by
/// [`Store::check_health`].
#[derive(Debug, Clone)]
pub struct HealthReport {
    pub schema_version: i64,
    pub active_read_connections: usize,
    pub idle_read_connections: usize,
}

/// The embedded relational + vector store described in §4.2.
pub struct Store {
    path: PathBuf,
    writer: Mutex<Connection>,
    reader: ReadPool,
}

fn bind_refs(bound: &[(String, &dyn rusqlite::ToSql)]) -> Vec<(&str, &dyn rusqlite::ToSql)> {
    bound.iter().map(|(k, v)| (k.as_str(), *v)).collect()
}

fn row_to_map(row: &rusqlite::Row<'_>) -> Result<Row> {
    let mut map = Row::new();
    for (i, name) in row.as_ref().column_names().iter().enumerate() {
        let value: SqlValue = row.get(i)?;
        map.insert((*name).to_owned(), value);
    }
    Ok(map)
}

impl Store {
    /// Open (creating if absent) the database at `path`, running any
    /// pending migrations and, unless disabled, registering it in the
    /// enclosing repo's `.gitignore`.
    pub fn open(path: impl AsRef<Path>, config: &StoreConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                return Err(Error::FilesystemUnavailable(format!(
                    "{}",
                    parent.display()
                )));
            }
        }

        let writer_conn = Connection::open(&path)?;
        writer_conn.pragma_update(None, "journal_mode", "WAL")?;
        writer_conn.pragma_update(None, "foreign_keys", "ON")?;
        writer_conn.pragma_update(None, "busy_timeout", 5000)?;
        schema::migrate(&writer_conn)?;

        if config.update_gitignore {
            gitignore::update_gitignore(&path);
        }

        let reader = ReadPool::new(
            &path,
            config.max_read_connections,
            config.read_max_idle_time,
            config.read_checkout_timeout,
        );

        Ok(Self {
            path,
            writer: Mutex::new(writer_conn),
            reader,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` inside a single writer transaction. Rolls back if `f`
    /// returns an error or panics; commits on success.
    pub fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> Result<T>,
    {
        let mut conn = self.writer.lock().unwrap();
        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    /// Execute a single write statement against the writer connection.
    pub fn execute(&self, sql: &str, params: &Params) -> Result<usize> {
        let conn = self.writer.lock().unwrap();
        let bound = value::bind_params(params);
        Ok(conn.execute(sql, bind_refs(&bound).as_slice())?)
    }

    /// Execute several write statements as one transaction.
    pub fn execute_many(&self, statements: &[(&str, Params)]) -> Result<()> {
        let mut conn = self.writer.lock().unwrap();
        let tx = conn.transaction()?;
        for (sql, params) in statements {
            let bound = value::bind_params(params);
            tx.execute(sql, bind_refs(&bound).as_slice())?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Run a read query against the pool, returning at most one row.
    pub fn fetch_one(&self, sql: &str, params: &Params) -> Result<Option<Row>> {
        let conn = self.reader.checkout()?;
        let mut stmt = conn.prepare(sql)?;
        let bound = value::bind_params(params);
        let mut rows = stmt.query(bind_refs(&bound).as_slice())?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_map(row)?)),
            None => Ok(None),
        }
    }

    /// Run a read query against the pool, returning every matching row.
    pub fn fetch_all(&self, sql: &str, params: &Params) -> Result<Vec<Row>> {
        self.fetch_many(sql, params, usize::MAX)
    }

    /// Run a read query against the pool, returning at most `limit` rows.
    pub fn fetch_many(&self, sql: &str, params: &Params, limit: usize) -> Result<Vec<Row>> {
        let conn = self.reader.checkout()?;
        let mut stmt = conn.prepare(sql)?;
        let bound = value::bind_params(params);
        let mut rows = stmt.query(bind_refs(&bound).as_slice())?;
        let mut out = Vec::new();
        while out.len() < limit {
            match rows.next()? {
                Some(row) => out.push(row_to_map(row)?),
                None => break,
            }
        }
        Ok(out)
    }

    /// A point-in-time snapshot of schema version and pool occupancy, used
    /// by the server's health endpoint.
    pub fn check_health(&self) -> Result<HealthReport> {
        let schema_version: i64 = {
            let conn = self.writer.lock().unwrap();
            conn.query_row("PRAGMA user_version", [], |r| r.get(0))?
        };
        Ok(HealthReport {
            schema_version,
            active_read_connections: self.reader.active_count(),
            idle_read_connections: self.reader.idle_count(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> StoreConfig {
        StoreConfig {
            update_gitignore: false,
            ..StoreConfig::default()
        }
    }

    #[test]
    fn open_creates_database_and_applies_schema() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("test.db"), &test_config()).unwrap();
        let health = store.check_health().unwrap();
        assert_eq!(health.schema_version, schema::SCHEMA_VERSION);
    }

    #[test]
    fn execute_and_fetch_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("test.db"), &test_config()).unwrap();

        let mut params = Params::new();
        params.insert("title".into(), "Pilot".into());
        params.insert("file_path".into(), "pilot.fountain".into());
        store
            .execute(
                "INSERT INTO scripts (title, file_path) VALUES (:title, :file_path)",
                &params,
            )
            .unwrap();

        let rows = store
            .fetch_all("SELECT id, title FROM scripts", &Params::new())
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("title").unwrap().as_str(), Some("Pilot"));
    }

    #[test]
    fn transaction_rolls_back_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("test.db"), &test_config()).unwrap();

        let result: Result<()> = store.transaction(|tx| {
            tx.execute(
                "INSERT INTO scripts (title, file_path) VALUES ('x', 'x.fountain')",
                [],
            )?;
            Err(Error::SceneNotFound("force rollback".into()))
        });
        assert!(result.is_err());

        let rows = store
            .fetch_all("SELECT id FROM scripts", &Params::new())
            .unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn fetch_many_respects_limit() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("test.db"), &test_config()).unwrap();
        for i in 0..5 {
            let mut params = Params::new();
            params.insert("title".into(), format!("Script {i}").into());
            params.insert("file_path".into(), format!("{i}.fountain").into());
            store
                .execute(
                    "INSERT INTO scripts (title, file_path) VALUES (:title, :file_path)",
                    &params,
                )
                .unwrap();
        }
        let rows = store
            .fetch_many("SELECT id FROM scripts", &Params::new(), 3)
            .unwrap();
        assert_eq!(rows.len(), 3);
    }
}
