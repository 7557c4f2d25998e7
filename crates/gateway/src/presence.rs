// Presence Management
//
// Keeps the user store in step with live connections. Each registered address
// is claimed by the connection that registered it last; only the current
// claimant's disconnect removes the user.

use crate::error::GatewayError;
use crate::publisher::SnapshotPublisher;
use crate::registry::ConnectionId;
use dashmap::DashMap;
use rollcall_core::DuplicatePolicy;
use rollcall_store::{NewUser, UserRecord, UserStore};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

type Claim = Arc<Mutex<Option<ConnectionId>>>;

/// Presence manager
pub struct PresenceManager {
    store: Arc<dyn UserStore>,
    publisher: Arc<SnapshotPublisher>,
    policy: DuplicatePolicy,
    /// Address -> connection currently owning it
    claims: DashMap<String, Claim>,
    /// Connection -> addresses it owns
    owned: DashMap<ConnectionId, HashSet<String>>,
}

impl PresenceManager {
    pub fn new(
        store: Arc<dyn UserStore>,
        publisher: Arc<SnapshotPublisher>,
        policy: DuplicatePolicy,
    ) -> Self {
        Self {
            store,
            publisher,
            policy,
            claims: DashMap::new(),
            owned: DashMap::new(),
        }
    }

    pub fn publisher(&self) -> Arc<SnapshotPublisher> {
        Arc::clone(&self.publisher)
    }

    fn claim(&self, address: &str) -> Claim {
        self.claims
            .entry(address.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .value()
            .clone()
    }

    /// Drop the claim entry once nobody owns or waits on it.
    fn prune_claim(&self, address: &str) {
        self.claims.remove_if(address, |_, claim| {
            Arc::strong_count(claim) == 1
                && claim.try_lock().map(|owner| owner.is_none()).unwrap_or(false)
        });
    }

    /// Record a registration for `conn` and publish the new list.
    pub async fn register(
        &self,
        conn: ConnectionId,
        user: NewUser,
    ) -> Result<UserRecord, GatewayError> {
        let address = user.address.clone();
        let claim = self.claim(&address);

        let record = {
            let mut owner = claim.lock().await;
            if let Some(current) = *owner {
                if current != conn && self.policy == DuplicatePolicy::Reject {
                    drop(owner);
                    drop(claim);
                    self.prune_claim(&address);
                    return Err(GatewayError::AddressInUse { address });
                }
            }

            let record = match self.store.upsert(user).await {
                Ok(record) => record,
                Err(e) => {
                    drop(owner);
                    drop(claim);
                    self.prune_claim(&address);
                    return Err(e.into());
                }
            };

            if let Some(previous) = owner.replace(conn) {
                if previous != conn {
                    tracing::info!(
                        "Address {} taken over by {} from {}",
                        address,
                        conn,
                        previous
                    );
                    if let Some(mut addresses) = self.owned.get_mut(&previous) {
                        addresses.remove(&address);
                    }
                }
            }
            self.owned.entry(conn).or_default().insert(address.clone());
            record
        };

        tracing::info!("Registered {} on {}", record, conn);
        self.publisher.publish();
        Ok(record)
    }

    /// Remove every user `conn` still owns and publish if anything changed.
    ///
    /// Safe to call more than once; later calls find nothing to release.
    pub async fn release_connection(&self, conn: ConnectionId) -> usize {
        let addresses = match self.owned.remove(&conn) {
            Some((_, addresses)) => addresses,
            None => return 0,
        };

        let mut released = 0;
        for address in addresses {
            let claim = self.claim(&address);
            {
                let mut owner = claim.lock().await;
                if *owner != Some(conn) {
                    continue;
                }
                match self.store.delete_by_address(&address).await {
                    Ok(_) => {}
                    Err(e) => tracing::error!("Failed to remove {} from store: {}", address, e),
                }
                *owner = None;
                released += 1;
            }
            drop(claim);
            self.prune_claim(&address);
        }

        if released > 0 {
            tracing::info!("Released {} address(es) held by {}", released, conn);
            self.publisher.publish();
        }
        released
    }

    /// Explicit logout from a live connection.
    pub async fn logout(&self, conn: ConnectionId) -> usize {
        self.release_connection(conn).await
    }

    /// Current owner of `address`, if any.
    pub async fn owner_of(&self, address: &str) -> Option<ConnectionId> {
        let claim = self.claims.get(address).map(|c| c.value().clone())?;
        let owner = *claim.lock().await;
        owner
    }

    pub fn addresses_of(&self, conn: &ConnectionId) -> Vec<String> {
        self.owned
            .get(conn)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn claim_count(&self) -> usize {
        self.claims.len()
    }

    pub fn store(&self) -> Arc<dyn UserStore> {
        Arc::clone(&self.store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::tests::SlowSink;
    use crate::publisher::CapturingSink;
    use rollcall_store::MemoryUserStore;
    use std::time::Duration;

    fn manager(policy: DuplicatePolicy) -> (Arc<PresenceManager>, Arc<CapturingSink>) {
        let store: Arc<dyn UserStore> = Arc::new(MemoryUserStore::new());
        let sink = Arc::new(CapturingSink::new());
        let publisher = Arc::new(SnapshotPublisher::new(Arc::clone(&store), sink.clone()));
        (Arc::new(PresenceManager::new(store, publisher, policy)), sink)
    }

    #[tokio::test]
    async fn test_register_then_release() {
        let (presence, sink) = manager(DuplicatePolicy::Replace);
        let conn = ConnectionId::new();

        presence
            .register(conn, NewUser::new("alice", "10.0.0.1", 9000))
            .await
            .unwrap();
        assert_eq!(presence.owner_of("10.0.0.1").await, Some(conn));
        presence.publisher().flush().await;

        assert_eq!(presence.release_connection(conn).await, 1);
        assert_eq!(presence.release_connection(conn).await, 0);
        presence.publisher().flush().await;

        assert!(presence.store().list().await.unwrap().is_empty());
        assert_eq!(presence.claim_count(), 0);
        let published = sink.delivered();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].len(), 1);
        assert!(published[1].is_empty());
    }

    #[tokio::test]
    async fn test_takeover_survives_old_owner_disconnect() {
        let (presence, _sink) = manager(DuplicatePolicy::Replace);
        let first = ConnectionId::new();
        let second = ConnectionId::new();

        presence
            .register(first, NewUser::new("A", "10.0.0.1", 1))
            .await
            .unwrap();
        presence
            .register(second, NewUser::new("A'", "10.0.0.1", 2))
            .await
            .unwrap();

        assert_eq!(presence.release_connection(first).await, 0);

        let list = presence.store().list().await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].display_name, "A'");
        assert_eq!(presence.owner_of("10.0.0.1").await, Some(second));
    }

    #[tokio::test]
    async fn test_reject_policy_keeps_first_owner() {
        let (presence, _sink) = manager(DuplicatePolicy::Reject);
        let first = ConnectionId::new();
        let second = ConnectionId::new();

        presence
            .register(first, NewUser::new("A", "10.0.0.1", 1))
            .await
            .unwrap();
        let err = presence
            .register(second, NewUser::new("B", "10.0.0.1", 2))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::AddressInUse { .. }));

        // re-registering from the owner is still allowed
        presence
            .register(first, NewUser::new("A2", "10.0.0.1", 3))
            .await
            .unwrap();
        let list = presence.store().list().await.unwrap();
        assert_eq!(list[0].display_name, "A2");
    }

    #[tokio::test]
    async fn test_connection_with_several_addresses() {
        let (presence, _sink) = manager(DuplicatePolicy::Replace);
        let conn = ConnectionId::new();
        presence
            .register(conn, NewUser::new("a", "10.0.0.1", 1))
            .await
            .unwrap();
        presence
            .register(conn, NewUser::new("b", "10.0.0.2", 2))
            .await
            .unwrap();

        let mut addresses = presence.addresses_of(&conn);
        addresses.sort();
        assert_eq!(addresses, vec!["10.0.0.1", "10.0.0.2"]);

        assert_eq!(presence.logout(conn).await, 2);
        assert!(presence.store().list().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_connect_disconnect() {
        let (presence, _sink) = manager(DuplicatePolicy::Replace);

        let mut tasks = Vec::new();
        for i in 0..50 {
            let presence = Arc::clone(&presence);
            tasks.push(tokio::spawn(async move {
                let conn = ConnectionId::new();
                presence
                    .register(conn, NewUser::new(format!("u{i}"), format!("10.0.2.{i}"), 1))
                    .await
                    .unwrap();
                if i % 2 == 0 {
                    presence.release_connection(conn).await;
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let list = presence.store().list().await.unwrap();
        assert_eq!(list.len(), 25);
        assert!(list.iter().all(|r| {
            let last: usize = r.address.rsplit('.').next().unwrap().parse().unwrap();
            last % 2 == 1
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_does_not_wait_for_slow_sink() {
        let store: Arc<dyn UserStore> = Arc::new(MemoryUserStore::new());
        let sink = Arc::new(SlowSink::new(Duration::from_secs(2)));
        let publisher = Arc::new(SnapshotPublisher::new(Arc::clone(&store), sink.clone()));
        let presence = PresenceManager::new(store, publisher, DuplicatePolicy::Replace);

        presence
            .register(ConnectionId::new(), NewUser::new("a", "10.0.0.1", 1))
            .await
            .unwrap();
        // first delivery is now in flight
        tokio::time::sleep(Duration::from_millis(10)).await;

        let started = tokio::time::Instant::now();
        presence
            .register(ConnectionId::new(), NewUser::new("b", "10.0.0.2", 2))
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_millis(500));

        presence.publisher().flush().await;
        assert_eq!(sink.inner.last().map(|s| s.len()), Some(2));
    }
}
