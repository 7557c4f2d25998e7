use crate::{NewUser, StoreError, UserRecord, UserStore};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

#[derive(Default)]
struct Inner {
    next_id: i64,
    records: Vec<UserRecord>,
}

/// Process-local store, used with `store.in_memory` and in tests.
#[derive(Default)]
pub struct MemoryUserStore {
    inner: RwLock<Inner>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn upsert(&self, user: NewUser) -> Result<UserRecord, StoreError> {
        user.validate()?;
        let mut inner = self.inner.write().await;
        inner.records.retain(|r| r.address != user.address);
        inner.next_id += 1;
        let record = UserRecord {
            id: inner.next_id,
            address: user.address,
            port: user.port,
            display_name: user.display_name,
            registered_at: Utc::now(),
        };
        inner.records.push(record.clone());
        Ok(record)
    }

    async fn delete_by_address(&self, address: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let before = inner.records.len();
        inner.records.retain(|r| r.address != address);
        Ok(inner.records.len() != before)
    }

    async fn list(&self) -> Result<Vec<UserRecord>, StoreError> {
        Ok(self.inner.read().await.records.clone())
    }

    async fn find_by_address(&self, address: &str) -> Result<Option<UserRecord>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.records.iter().find(|r| r.address == address).cloned())
    }

    async fn clear(&self) -> Result<usize, StoreError> {
        let mut inner = self.inner.write().await;
        let removed = inner.records.len();
        inner.records.clear();
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upsert_replaces_same_address() {
        let store = MemoryUserStore::new();
        let first = store.upsert(NewUser::new("alice", "10.0.0.1", 9000)).await.unwrap();
        let second = store.upsert(NewUser::new("alicia", "10.0.0.1", 9100)).await.unwrap();

        let list = store.list().await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].display_name, "alicia");
        assert_eq!(list[0].port, 9100);
        assert!(second.id > first.id);
    }

    #[tokio::test]
    async fn test_list_keeps_insertion_order() {
        let store = MemoryUserStore::new();
        store.upsert(NewUser::new("a", "10.0.0.1", 1)).await.unwrap();
        store.upsert(NewUser::new("b", "10.0.0.2", 2)).await.unwrap();
        store.upsert(NewUser::new("a2", "10.0.0.1", 3)).await.unwrap();

        let names: Vec<_> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.display_name)
            .collect();
        assert_eq!(names, vec!["b", "a2"]);
    }

    #[tokio::test]
    async fn test_rejects_empty_address() {
        let store = MemoryUserStore::new();
        let err = store.upsert(NewUser::new("a", "  ", 1)).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidRecord(_)));
        assert!(store.is_empty().await);
    }
}
