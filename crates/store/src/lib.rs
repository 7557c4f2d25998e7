//! rollcall_store
//! Durable storage of online users keyed by network address.

mod memory;
mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub use memory::MemoryUserStore;
pub use sqlite::SqliteUserStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("blocking task failed: {0}")]
    Task(String),
    #[error("database lock poisoned")]
    Poisoned,
    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

/// A user announced as online by a registrant connection.
///
/// `address` is the natural key; a re-registration replaces the whole record
/// and assigns a new `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: i64,
    pub address: String,
    pub port: u16,
    pub display_name: String,
    pub registered_at: DateTime<Utc>,
}

impl fmt::Display for UserRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} @ {}:{} (since {})",
            self.display_name,
            self.address,
            self.port,
            self.registered_at.format("%Y-%m-%d %H:%M:%S")
        )
    }
}

/// Fields supplied by a registration; the store assigns id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub address: String,
    pub port: u16,
    pub display_name: String,
}

impl NewUser {
    pub fn new(display_name: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            display_name: display_name.into(),
        }
    }

    fn validate(&self) -> Result<(), StoreError> {
        if self.address.trim().is_empty() {
            return Err(StoreError::InvalidRecord("address cannot be empty".into()));
        }
        Ok(())
    }
}

/// Keyed user storage shared by every connection task.
///
/// Implementations must tolerate concurrent calls from many tasks.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a record, replacing any record with the same address.
    async fn upsert(&self, user: NewUser) -> Result<UserRecord, StoreError>;

    /// Delete the record for `address`. Returns whether a record existed;
    /// deleting an absent address is not an error.
    async fn delete_by_address(&self, address: &str) -> Result<bool, StoreError>;

    /// All records in insertion order.
    async fn list(&self) -> Result<Vec<UserRecord>, StoreError>;

    async fn find_by_address(&self, address: &str) -> Result<Option<UserRecord>, StoreError>;

    /// Remove every record. Returns how many were removed.
    async fn clear(&self) -> Result<usize, StoreError>;
}
