use crate::{NewUser, StoreError, UserRecord, UserStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ip TEXT NOT NULL UNIQUE,
    port INTEGER NOT NULL,
    username TEXT NOT NULL,
    registered_at TEXT NOT NULL
)";

/// SQLite-backed store.
///
/// rusqlite is synchronous, so the connection sits behind a mutex and every
/// call runs on the blocking pool.
#[derive(Clone)]
pub struct SqliteUserStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteUserStore {
    /// Open (or create) the database file and make sure the schema exists.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        let store = Self::init(conn)?;
        tracing::info!("User store opened at {}", path.display());
        Ok(store)
    }

    /// Private in-memory database, mostly for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| StoreError::Poisoned)?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<UserRecord> {
    let registered_at: String = row.get(4)?;
    let registered_at = DateTime::parse_from_rfc3339(&registered_at)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;
    Ok(UserRecord {
        id: row.get(0)?,
        address: row.get(1)?,
        port: row.get(2)?,
        display_name: row.get(3)?,
        registered_at,
    })
}

#[async_trait]
impl UserStore for SqliteUserStore {
    async fn upsert(&self, user: NewUser) -> Result<UserRecord, StoreError> {
        user.validate()?;
        self.with_conn(move |conn| {
            let registered_at = Utc::now();
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM users WHERE ip = ?1", params![user.address])?;
            tx.execute(
                "INSERT INTO users (ip, port, username, registered_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    user.address,
                    user.port,
                    user.display_name,
                    registered_at.to_rfc3339()
                ],
            )?;
            let id = tx.last_insert_rowid();
            tx.commit()?;
            Ok(UserRecord {
                id,
                address: user.address,
                port: user.port,
                display_name: user.display_name,
                registered_at,
            })
        })
        .await
    }

    async fn delete_by_address(&self, address: &str) -> Result<bool, StoreError> {
        let address = address.to_string();
        self.with_conn(move |conn| {
            let removed = conn.execute("DELETE FROM users WHERE ip = ?1", params![address])?;
            Ok(removed > 0)
        })
        .await
    }

    async fn list(&self) -> Result<Vec<UserRecord>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, ip, port, username, registered_at FROM users ORDER BY id ASC",
            )?;
            let records = stmt
                .query_map([], row_to_record)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(records)
        })
        .await
    }

    async fn find_by_address(&self, address: &str) -> Result<Option<UserRecord>, StoreError> {
        let address = address.to_string();
        self.with_conn(move |conn| {
            let record = conn
                .query_row(
                    "SELECT id, ip, port, username, registered_at FROM users WHERE ip = ?1",
                    params![address],
                    row_to_record,
                )
                .optional()?;
            Ok(record)
        })
        .await
    }

    async fn clear(&self) -> Result<usize, StoreError> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM users", [])?))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upsert_and_find() {
        let store = SqliteUserStore::open_in_memory().unwrap();
        let record = store
            .upsert(NewUser::new("alice", "10.0.0.1", 9000))
            .await
            .unwrap();
        assert_eq!(record.address, "10.0.0.1");

        let found = store.find_by_address("10.0.0.1").await.unwrap().unwrap();
        assert_eq!(found, record);
        assert!(store.find_by_address("10.0.0.2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_replace_assigns_new_id_and_moves_to_end() {
        let store = SqliteUserStore::open_in_memory().unwrap();
        let first = store.upsert(NewUser::new("a", "10.0.0.1", 1)).await.unwrap();
        store.upsert(NewUser::new("b", "10.0.0.2", 2)).await.unwrap();
        let replaced = store.upsert(NewUser::new("a2", "10.0.0.1", 3)).await.unwrap();

        assert_ne!(first.id, replaced.id);
        let list = store.list().await.unwrap();
        let names: Vec<_> = list.iter().map(|r| r.display_name.as_str()).collect();
        assert_eq!(names, vec!["b", "a2"]);
    }

    #[tokio::test]
    async fn test_clear_reports_count() {
        let store = SqliteUserStore::open_in_memory().unwrap();
        store.upsert(NewUser::new("a", "10.0.0.1", 1)).await.unwrap();
        store.upsert(NewUser::new("b", "10.0.0.2", 2)).await.unwrap();

        assert_eq!(store.clear().await.unwrap(), 2);
        assert!(store.list().await.unwrap().is_empty());
        assert_eq!(store.clear().await.unwrap(), 0);
    }
}
