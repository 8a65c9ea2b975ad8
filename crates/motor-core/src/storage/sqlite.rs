//! SQLite-backed key-value store

use std::path::Path;

use anyhow::Result;
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use super::KeyValueStore;

/// Key-value store over a single SQLite table.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (and initialize) the store at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        // journal_mode returns its new value, so it cannot go through
        // execute_batch.
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                 namespace TEXT NOT NULL,
                 key TEXT NOT NULL,
                 value TEXT NOT NULL,
                 updated_at TEXT NOT NULL,
                 PRIMARY KEY (namespace, key)
             );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        let value = conn
            .query_row(
                "SELECT value FROM kv WHERE namespace = ?1 AND key = ?2",
                params![namespace, key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn put(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO kv (namespace, key, value, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(namespace, key) DO UPDATE SET value = ?3, updated_at = ?4",
            params![namespace, key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn delete(&self, namespace: &str, key: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM kv WHERE namespace = ?1 AND key = ?2",
            params![namespace, key],
        )?;
        Ok(())
    }

    fn list_keys(&self, namespace: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT key FROM kv WHERE namespace = ?1 ORDER BY key")?;
        let keys = stmt
            .query_map([namespace], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    fn compare_and_swap(
        &self,
        namespace: &str,
        key: &str,
        expected: Option<&str>,
        value: Option<&str>,
    ) -> Result<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let current: Option<String> = tx
            .query_row(
                "SELECT value FROM kv WHERE namespace = ?1 AND key = ?2",
                params![namespace, key],
                |row| row.get(0),
            )
            .optional()?;

        if current.as_deref() != expected {
            return Ok(false);
        }

        match value {
            Some(v) => {
                tx.execute(
                    "INSERT INTO kv (namespace, key, value, updated_at) VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(namespace, key) DO UPDATE SET value = ?3, updated_at = ?4",
                    params![namespace, key, v, Utc::now().to_rfc3339()],
                )?;
            }
            None => {
                tx.execute(
                    "DELETE FROM kv WHERE namespace = ?1 AND key = ?2",
                    params![namespace, key],
                )?;
            }
        }

        tx.commit()?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn roundtrip_and_list() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("kv.db")).unwrap();

        store.put("runs", "b", "2").unwrap();
        store.put("runs", "a", "1").unwrap();
        assert_eq!(store.get("runs", "a").unwrap().as_deref(), Some("1"));
        assert_eq!(store.list_keys("runs").unwrap(), vec!["a", "b"]);

        store.delete("runs", "a").unwrap();
        assert!(store.get("runs", "a").unwrap().is_none());
    }

    #[test]
    fn cas_requires_expected_value() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("kv.db")).unwrap();

        // Absent key: only expected=None succeeds.
        assert!(!store
            .compare_and_swap("locks", "active", Some("r1"), Some("r2"))
            .unwrap());
        assert!(store
            .compare_and_swap("locks", "active", None, Some("r1"))
            .unwrap());

        // Held: a second None-expected claim must lose.
        assert!(!store
            .compare_and_swap("locks", "active", None, Some("r2"))
            .unwrap());

        // Release with the right holder.
        assert!(store
            .compare_and_swap("locks", "active", Some("r1"), None)
            .unwrap());
        assert!(store.get("locks", "active").unwrap().is_none());
    }
}
