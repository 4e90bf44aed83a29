//! Thin wrapper over the SQLite connection backing a collection.
//!
//! Registries never hold a reference to the collection; operations that
//! need the database take a `&Db` instead.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::types::{FromSql, Value};
use rusqlite::{params_from_iter, Connection, ErrorCode, OptionalExtension, Params, Row};
use thiserror::Error;

use super::schema;

/// SQLite's default upper bound on bound parameters per statement.
const MAX_BOUND_PARAMS: usize = 32766;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0} cannot run inside a transaction")]
    TransactionOpen(&'static str),
}

impl StorageError {
    /// True when SQLite reported the file as busy or locked by another handle.
    pub fn is_locked(&self) -> bool {
        match self {
            StorageError::Sqlite(e) => is_locked_error(e),
            _ => false,
        }
    }
}

pub fn is_locked_error(e: &rusqlite::Error) -> bool {
    match e {
        rusqlite::Error::SqliteFailure(e, _) => {
            matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
        }
        _ => false,
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Open database handle for one collection file.
pub struct Db {
    conn: Connection,
    path: PathBuf,
}

impl Db {
    /// Open (or create) the collection file at `path`.
    ///
    /// Returns the handle and whether the file was newly created. New files get
    /// the full schema and an unseeded `col` row.
    pub fn open(path: &Path, crt: i64, now_ms: i64) -> Result<(Self, bool)> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let created = !path.exists();
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_millis(500))?;
        conn.execute_batch("PRAGMA temp_store = memory; PRAGMA cache_size = 10000;")?;

        if created {
            schema::create(&conn, crt, now_ms)?;
            log::info!("Created collection file at {:?}", path);
        }

        Ok((
            Self {
                conn,
                path: path.to_path_buf(),
            },
            created,
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Raw connection, for prepared statements reused across many rows.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn execute<P: Params>(&self, sql: &str, params: P) -> Result<usize> {
        Ok(self.conn.execute(sql, params)?)
    }

    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        Ok(self.conn.execute_batch(sql)?)
    }

    /// First column of the first row.
    pub fn scalar<T: FromSql, P: Params>(&self, sql: &str, params: P) -> Result<T> {
        Ok(self.conn.query_row(sql, params, |row| row.get(0))?)
    }

    /// First column of the first row, or `None` when the query returns nothing.
    pub fn scalar_opt<T: FromSql, P: Params>(&self, sql: &str, params: P) -> Result<Option<T>> {
        Ok(self
            .conn
            .query_row(sql, params, |row| row.get(0))
            .optional()?)
    }

    /// First column of every row.
    pub fn list<T: FromSql, P: Params>(&self, sql: &str, params: P) -> Result<Vec<T>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, |row| row.get(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Map every row through `f`.
    pub fn query_map<T, P, F>(&self, sql: &str, params: P, f: F) -> Result<Vec<T>>
    where
        P: Params,
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, f)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Insert `rows` into `table` with multi-row `INSERT` statements.
    ///
    /// One statement carries every row unless the bound-parameter limit would
    /// be exceeded. All statements run inside a single transaction (the caller's
    /// if one is open).
    pub fn insert_rows(&self, table: &str, columns: usize, rows: &[Vec<Value>]) -> Result<usize> {
        if rows.is_empty() || columns == 0 {
            return Ok(0);
        }

        let per_statement = (MAX_BOUND_PARAMS / columns).max(1);
        let own_tx = !self.in_transaction();
        if own_tx {
            self.begin()?;
        }

        let result = (|| -> Result<usize> {
            let mut inserted = 0;
            for chunk in rows.chunks(per_statement) {
                let placeholder = format!("({})", vec!["?"; columns].join(","));
                let sql = format!(
                    "INSERT INTO {} VALUES {}",
                    table,
                    vec![placeholder.as_str(); chunk.len()].join(",")
                );
                inserted += self
                    .conn
                    .execute(&sql, params_from_iter(chunk.iter().flatten()))?;
            }
            Ok(inserted)
        })();

        if own_tx {
            match &result {
                Ok(_) => self.commit()?,
                Err(_) => self.rollback()?,
            }
        }
        result
    }

    pub fn begin(&self) -> Result<()> {
        self.conn.execute_batch("BEGIN")?;
        Ok(())
    }

    pub fn commit(&self) -> Result<()> {
        if self.in_transaction() {
            self.conn.execute_batch("COMMIT")?;
        }
        Ok(())
    }

    pub fn rollback(&self) -> Result<()> {
        if self.in_transaction() {
            self.conn.execute_batch("ROLLBACK")?;
        }
        Ok(())
    }

    pub fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }

    /// Run SQLite's own consistency check. `Ok(false)` means corruption.
    pub fn integrity_check(&self) -> Result<bool> {
        let result: String = self.scalar("PRAGMA integrity_check", [])?;
        Ok(result == "ok")
    }

    /// VACUUM + ANALYZE. SQLite refuses to vacuum inside a transaction.
    pub fn optimize(&self) -> Result<()> {
        if self.in_transaction() {
            return Err(StorageError::TransactionOpen("VACUUM"));
        }
        self.conn.execute_batch("VACUUM; ANALYZE;")?;
        Ok(())
    }

    pub fn index_count(&self) -> Result<i64> {
        self.scalar(
            "SELECT count() FROM sqlite_master WHERE type = 'index' AND name LIKE 'ix_%'",
            [],
        )
    }

    /// Recreate any missing standard index.
    pub fn update_indices(&self) -> Result<()> {
        self.execute_batch(schema::INDICES)
    }

    /// A millisecond-clock id not yet used in `table`.
    pub fn timestamp_id(&self, table: &str) -> Result<i64> {
        let mut id = chrono::Utc::now().timestamp_millis();
        let sql = format!("SELECT 1 FROM {} WHERE id = ?1", table);
        while self.scalar_opt::<i64, _>(&sql, [id])?.is_some() {
            id += 1;
        }
        Ok(id)
    }

    /// First id safe to hand out for a batch of new notes/cards.
    pub fn max_id(&self) -> Result<i64> {
        let now = chrono::Utc::now().timestamp_millis();
        let cards: i64 = self.scalar("SELECT coalesce(max(id), 0) FROM cards", [])?;
        let notes: i64 = self.scalar("SELECT coalesce(max(id), 0) FROM notes", [])?;
        Ok(now.max(cards + 1).max(notes + 1))
    }

    /// Size of the database file on disk, in bytes.
    pub fn file_size(&self) -> Result<u64> {
        Ok(fs::metadata(&self.path)?.len())
    }
}

/// Format ids as an SQL list literal: `(1,2,3)`.
pub fn ids2str(ids: &[i64]) -> String {
    let joined: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
    format!("({})", joined.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_test_db() -> (Db, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let (db, created) = Db::open(&temp_dir.path().join("test.anki2"), 0, 0).unwrap();
        assert!(created);
        (db, temp_dir)
    }

    #[test]
    fn test_reopen_is_not_created() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("col.anki2");
        let (db, _) = Db::open(&path, 0, 0).unwrap();
        drop(db);
        let (_db, created) = Db::open(&path, 0, 0).unwrap();
        assert!(!created);
    }

    #[test]
    fn test_schema_has_expected_indices() {
        let (db, _temp) = open_test_db();
        assert_eq!(db.index_count().unwrap(), schema::EXPECTED_INDEX_COUNT);

        db.execute_batch("DROP INDEX ix_cards_nid").unwrap();
        assert_eq!(db.index_count().unwrap(), schema::EXPECTED_INDEX_COUNT - 1);

        db.update_indices().unwrap();
        assert_eq!(db.index_count().unwrap(), schema::EXPECTED_INDEX_COUNT);
    }

    #[test]
    fn test_insert_rows_batches() {
        let (db, _temp) = open_test_db();
        let rows: Vec<Vec<Value>> = (0..5)
            .map(|i| vec![Value::Integer(-1), Value::Integer(i), Value::Integer(0)])
            .collect();

        assert_eq!(db.insert_rows("graves", 3, &rows).unwrap(), 5);
        let count: i64 = db.scalar("SELECT count() FROM graves", []).unwrap();
        assert_eq!(count, 5);
        assert!(!db.in_transaction());
    }

    #[test]
    fn test_optimize_refused_inside_transaction() {
        let (db, _temp) = open_test_db();
        db.begin().unwrap();
        assert!(matches!(db.optimize(), Err(StorageError::TransactionOpen(_))));
        db.rollback().unwrap();
        db.optimize().unwrap();
    }

    #[test]
    fn test_integrity_check_ok() {
        let (db, _temp) = open_test_db();
        assert!(db.integrity_check().unwrap());
    }

    #[test]
    fn test_ids2str() {
        assert_eq!(ids2str(&[]), "()");
        assert_eq!(ids2str(&[1, 22, 333]), "(1,22,333)");
    }
}
