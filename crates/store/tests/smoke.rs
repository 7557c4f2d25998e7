use rollcall_store::{MemoryUserStore, NewUser, SqliteUserStore, UserStore};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_test::assert_ok;

fn stores() -> Vec<(&'static str, Arc<dyn UserStore>)> {
    vec![
        ("memory", Arc::new(MemoryUserStore::new())),
        (
            "sqlite",
            Arc::new(SqliteUserStore::open_in_memory().expect("sqlite")),
        ),
    ]
}

#[tokio::test]
async fn store_smoke_replace_on_conflict() {
    for (name, store) in stores() {
        store.upsert(NewUser::new("A", "10.0.0.1", 1)).await.unwrap();
        store.upsert(NewUser::new("A'", "10.0.0.1", 2)).await.unwrap();

        let list = store.list().await.unwrap();
        assert_eq!(list.len(), 1, "{name}");
        assert_eq!(list[0].display_name, "A'", "{name}");
        assert_eq!(list[0].port, 2, "{name}");
    }
}

#[tokio::test]
async fn store_smoke_delete_absent_twice_is_noop() {
    for (name, store) in stores() {
        assert!(!assert_ok!(store.delete_by_address("10.9.9.9").await), "{name}");
        assert!(!assert_ok!(store.delete_by_address("10.9.9.9").await), "{name}");
        assert!(store.list().await.unwrap().is_empty(), "{name}");
    }
}

#[tokio::test]
async fn store_smoke_delete_present() {
    for (name, store) in stores() {
        store.upsert(NewUser::new("a", "10.0.0.1", 1)).await.unwrap();
        store.upsert(NewUser::new("b", "10.0.0.2", 2)).await.unwrap();

        assert!(store.delete_by_address("10.0.0.1").await.unwrap(), "{name}");
        let left: Vec<_> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.address)
            .collect();
        assert_eq!(left, vec!["10.0.0.2"], "{name}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn store_smoke_concurrent_upserts_lose_nothing() {
    for (name, store) in stores() {
        let mut tasks = Vec::new();
        for i in 0..50 {
            let store = Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                store
                    .upsert(NewUser::new(format!("user-{i}"), format!("10.0.1.{i}"), 9000))
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let list = store.list().await.unwrap();
        let addresses: HashSet<_> = list.iter().map(|r| r.address.clone()).collect();
        assert_eq!(list.len(), 50, "{name}");
        assert_eq!(addresses.len(), 50, "{name}");
    }
}

#[tokio::test]
async fn sqlite_smoke_survives_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("nested").join("users.db");

    {
        let store = SqliteUserStore::open(&path).expect("open");
        store.upsert(NewUser::new("alice", "10.0.0.1", 9000)).await.unwrap();
    }

    let store = SqliteUserStore::open(&path).expect("reopen");
    let list = store.list().await.unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].display_name, "alice");
}
