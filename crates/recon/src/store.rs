//! Key-value stores for reconciliation progress.
//!
//! Two blobs are kept: the per-sheet progress under [`PROGRESS_KEY`] and
//! the snapshot the session was seeded from under [`SOURCE_KEY`].

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::PersistenceError;

pub const PROGRESS_KEY: &str = "reconciliationProgress";
pub const SOURCE_KEY: &str = "reconciliationData";

pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), PersistenceError>;
    fn remove(&mut self, key: &str) -> Result<(), PersistenceError>;
    fn clear(&mut self) -> Result<(), PersistenceError>;
}

// ---------------------------------------------------------------------------
// Memory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: BTreeMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), PersistenceError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), PersistenceError> {
        self.entries.remove(key);
        Ok(())
    }

    fn clear(&mut self) -> Result<(), PersistenceError> {
        self.entries.clear();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// JSON files
// ---------------------------------------------------------------------------

/// One `<key>.json` file per key inside a directory.
#[derive(Debug, Clone)]
pub struct JsonDirStore {
    dir: PathBuf,
}

impl JsonDirStore {
    /// The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

fn io_error(path: &Path, err: std::io::Error) -> PersistenceError {
    PersistenceError::Store(format!("{}: {err}", path.display()))
}

impl KeyValueStore for JsonDirStore {
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        let path = self.path(key);
        match fs::read_to_string(&path) {
            Ok(text) => Ok(Some(text)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(io_error(&path, err)),
        }
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), PersistenceError> {
        fs::create_dir_all(&self.dir).map_err(|e| io_error(&self.dir, e))?;
        let path = self.path(key);
        // write-then-rename
        let tmp = self.dir.join(format!("{key}.json.tmp"));
        fs::write(&tmp, value).map_err(|e| io_error(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| io_error(&path, e))
    }

    fn remove(&mut self, key: &str) -> Result<(), PersistenceError> {
        let path = self.path(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_error(&path, err)),
        }
    }

    fn clear(&mut self) -> Result<(), PersistenceError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(io_error(&self.dir, err)),
        };
        for entry in entries {
            let path = entry.map_err(|e| io_error(&self.dir, e))?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                fs::remove_file(&path).map_err(|e| io_error(&path, e))?;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SQLite
// ---------------------------------------------------------------------------

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

pub struct SqliteStore {
    conn: Connection,
}

fn sql_error(err: rusqlite::Error) -> PersistenceError {
    PersistenceError::Store(err.to_string())
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, PersistenceError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
        }
        let conn = Connection::open(path).map_err(sql_error)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, PersistenceError> {
        Self::with_connection(Connection::open_in_memory().map_err(sql_error)?)
    }

    fn with_connection(conn: Connection) -> Result<Self, PersistenceError> {
        conn.execute_batch(SCHEMA).map_err(sql_error)?;
        Ok(Self { conn })
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        self.conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| row.get(0))
            .optional()
            .map_err(sql_error)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), PersistenceError> {
        self.conn
            .execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
            .map_err(sql_error)?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), PersistenceError> {
        self.conn
            .execute("DELETE FROM kv WHERE key = ?1", params![key])
            .map_err(sql_error)?;
        Ok(())
    }

    fn clear(&mut self) -> Result<(), PersistenceError> {
        self.conn.execute("DELETE FROM kv", []).map_err(sql_error)?;
        Ok(())
    }
}
