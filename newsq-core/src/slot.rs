use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, OptionalExtension};

use crate::error::{NewsqError, Result};

pub const CHATS_KEY: &str = "newsq.chats";

/// A single persistent key-value slot holding the serialized chat map.
pub trait StorageSlot {
    fn describe(&self) -> String;
    fn read(&self) -> Result<Option<String>>;
    fn write(&mut self, value: &str) -> Result<()>;
}

impl<S: StorageSlot + ?Sized> StorageSlot for Box<S> {
    fn describe(&self) -> String {
        (**self).describe()
    }

    fn read(&self) -> Result<Option<String>> {
        (**self).read()
    }

    fn write(&mut self, value: &str) -> Result<()> {
        (**self).write(value)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemorySlot {
    value: Option<String>,
}

impl MemorySlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
        }
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }
}

impl StorageSlot for MemorySlot {
    fn describe(&self) -> String {
        "<memory>".to_string()
    }

    fn read(&self) -> Result<Option<String>> {
        Ok(self.value.clone())
    }

    fn write(&mut self, value: &str) -> Result<()> {
        self.value = Some(value.to_string());
        Ok(())
    }
}

#[derive(Debug)]
pub struct SqliteSlot {
    path: PathBuf,
    key: String,
    conn: Connection,
}

impl SqliteSlot {
    pub fn open(path: impl Into<PathBuf>, key: impl Into<String>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| NewsqError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(&path).map_err(|source| sqlite_error(&path, source))?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            ",
        )
        .map_err(|source| sqlite_error(&path, source))?;

        Ok(Self {
            path,
            key: key.into(),
            conn,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageSlot for SqliteSlot {
    fn describe(&self) -> String {
        format!("{}#{}", self.path.display(), self.key)
    }

    fn read(&self) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT value FROM kv WHERE key = ?1 LIMIT 1",
                [&self.key],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(|source| sqlite_error(&self.path, source))
    }

    fn write(&mut self, value: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                (&self.key, value),
            )
            .map_err(|source| sqlite_error(&self.path, source))?;
        Ok(())
    }
}

fn sqlite_error(path: &Path, source: rusqlite::Error) -> NewsqError {
    NewsqError::Sqlite {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use crate::slot::{CHATS_KEY, SqliteSlot, StorageSlot};

    #[test]
    fn sqlite_slot_starts_empty_and_overwrites() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("nested/store.sqlite");

        let mut slot = SqliteSlot::open(&path, CHATS_KEY).expect("open");
        assert_eq!(slot.read().expect("read"), None);

        slot.write("{\"a\":1}").expect("write");
        slot.write("{\"b\":2}").expect("write");
        assert_eq!(slot.read().expect("read").as_deref(), Some("{\"b\":2}"));
    }

    #[test]
    fn sqlite_slot_persists_across_connections() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("store.sqlite");

        let mut slot = SqliteSlot::open(&path, CHATS_KEY).expect("open");
        slot.write("{}").expect("write");
        drop(slot);

        let reopened = SqliteSlot::open(&path, CHATS_KEY).expect("reopen");
        assert_eq!(reopened.read().expect("read").as_deref(), Some("{}"));

        let other_key = SqliteSlot::open(&path, "other").expect("open other key");
        assert_eq!(other_key.read().expect("read"), None);
    }
}
