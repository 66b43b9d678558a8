//! SQLite-backed recorded-instance index.

use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use super::{IndexError, InstanceIndex};

/// SQLite-backed recorded-instance index.
pub struct SqliteInstanceIndex {
    conn: Mutex<Connection>,
}

impl SqliteInstanceIndex {
    /// Open the index, creating the database file and table if needed.
    pub fn new(path: &Path) -> Result<Self, IndexError> {
        let conn = Connection::open(path).map_err(|e| IndexError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory index (useful for testing).
    pub fn in_memory() -> Result<Self, IndexError> {
        let conn =
            Connection::open_in_memory().map_err(|e| IndexError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), IndexError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS recorded_instances (
                instance_id TEXT PRIMARY KEY,
                local_path TEXT NOT NULL,
                recorded_at TEXT NOT NULL
            );
            "#,
        )
        .map_err(|e| IndexError::Database(e.to_string()))?;

        Ok(())
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T, IndexError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| IndexError::Internal(e.to_string()))?;
        f(&conn).map_err(|e| IndexError::Database(e.to_string()))
    }

    /// Number of recorded instances.
    pub fn count(&self) -> Result<u64, IndexError> {
        self.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM recorded_instances", [], |row| {
                row.get::<_, i64>(0)
            })
        })
        .map(|n| n as u64)
    }

    /// Local path recorded for `instance_id`.
    pub fn path_of(&self, instance_id: &str) -> Result<Option<String>, IndexError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT local_path FROM recorded_instances WHERE instance_id = ?",
                params![instance_id],
                |row| row.get(0),
            )
            .optional()
        })
    }
}

impl InstanceIndex for SqliteInstanceIndex {
    fn has(&self, instance_id: &str) -> Result<bool, IndexError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT 1 FROM recorded_instances WHERE instance_id = ?",
                params![instance_id],
                |_| Ok(()),
            )
            .optional()
        })
        .map(|row| row.is_some())
    }

    fn put(&self, instance_id: &str, local_path: &Path) -> Result<(), IndexError> {
        let path = local_path.to_string_lossy().into_owned();
        let now = Utc::now().to_rfc3339();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO recorded_instances (instance_id, local_path, recorded_at)
                 VALUES (?, ?, ?)",
                params![instance_id, path, now],
            )
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_has_and_put() {
        let index = SqliteInstanceIndex::in_memory().unwrap();
        assert!(!index.has("uuid:1").unwrap());

        index.put("uuid:1", Path::new("/data/uuid_1")).unwrap();
        assert!(index.has("uuid:1").unwrap());
        assert!(!index.has("uuid:2").unwrap());
        assert_eq!(index.path_of("uuid:1").unwrap().as_deref(), Some("/data/uuid_1"));
    }

    #[test]
    fn test_put_is_idempotent() {
        let index = SqliteInstanceIndex::in_memory().unwrap();
        index.put("uuid:1", Path::new("/a")).unwrap();
        index.put("uuid:1", Path::new("/b")).unwrap();

        assert_eq!(index.count().unwrap(), 1);
        assert_eq!(index.path_of("uuid:1").unwrap().as_deref(), Some("/b"));
    }

    #[test]
    fn test_survives_reopen() {
        let temp = TempDir::new().unwrap();
        let db = temp.path().join("index.db");

        SqliteInstanceIndex::new(&db)
            .unwrap()
            .put("uuid:7", Path::new("/x"))
            .unwrap();

        let reopened = SqliteInstanceIndex::new(&db).unwrap();
        assert!(reopened.has("uuid:7").unwrap());
    }
}
