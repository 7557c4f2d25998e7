// Snapshot Publisher
//
// Reads the full online list from the store and hands it to a sink. The sink
// is either the in-process viewer fanout or an HTTP POST to a display service
// running elsewhere.

use crate::error::GatewayError;
use crate::protocol::Snapshot;
use crate::shutdown::ShutdownSignal;
use async_trait::async_trait;
use rollcall_store::UserStore;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{watch, Mutex};

/// Destination for published snapshots.
#[async_trait]
pub trait SnapshotSink: Send + Sync {
    async fn deliver(&self, snapshot: &Snapshot) -> Result<(), GatewayError>;
}

/// Store reader and sink behind one lock, so the list read and the delivery
/// of one publish never interleave with another's.
struct PublishCycle {
    store: Arc<dyn UserStore>,
    sink: Arc<dyn SnapshotSink>,
    lock: Mutex<()>,
}

impl PublishCycle {
    async fn run(&self) -> Result<Snapshot, GatewayError> {
        let _guard = self.lock.lock().await;
        let records = self.store.list().await?;
        let snapshot = Snapshot::from_records(&records);
        self.sink.deliver(&snapshot).await?;
        tracing::debug!("Published snapshot with {} user(s)", snapshot.len());
        Ok(snapshot)
    }
}

/// Publishes store contents to a sink.
///
/// `publish` only records a request. A background task owned by the
/// publisher runs the cycle, folding requests that arrive while a delivery is
/// in flight into one follow-up publish. Callers never wait on the sink.
pub struct SnapshotPublisher {
    cycle: Arc<PublishCycle>,
    requested: watch::Sender<u64>,
    completed: watch::Receiver<u64>,
}

impl SnapshotPublisher {
    /// Must be called from inside a tokio runtime.
    pub fn new(store: Arc<dyn UserStore>, sink: Arc<dyn SnapshotSink>) -> Self {
        let cycle = Arc::new(PublishCycle {
            store,
            sink,
            lock: Mutex::new(()),
        });
        let (requested, pending) = watch::channel(0u64);
        let (done, completed) = watch::channel(0u64);
        tokio::spawn(drain_requests(Arc::clone(&cycle), pending, done));
        Self {
            cycle,
            requested,
            completed,
        }
    }

    pub fn store(&self) -> Arc<dyn UserStore> {
        Arc::clone(&self.cycle.store)
    }

    /// Read the store and deliver the result now, waiting for the sink.
    pub async fn try_publish(&self) -> Result<Snapshot, GatewayError> {
        self.cycle.run().await
    }

    /// Ask for a publish without waiting for it. Failures are only logged.
    pub fn publish(&self) {
        self.requested.send_modify(|generation| *generation += 1);
    }

    /// Wait until every publish requested so far has been attempted.
    pub async fn flush(&self) {
        let target = *self.requested.borrow();
        let mut completed = self.completed.clone();
        if completed.wait_for(|done| *done >= target).await.is_err() {
            tracing::warn!("Publisher task is gone; pending publishes were dropped");
        }
    }

    /// Republish every `period` until shutdown.
    pub fn spawn_interval(
        self: Arc<Self>,
        period: Duration,
        mut shutdown: ShutdownSignal,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // first tick fires immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => self.publish(),
                    _ = shutdown.wait() => break,
                }
            }
            tracing::debug!("Interval publisher stopped");
        })
    }
}

/// Runs one cycle per batch of requests until the publisher is dropped.
async fn drain_requests(
    cycle: Arc<PublishCycle>,
    mut pending: watch::Receiver<u64>,
    done: watch::Sender<u64>,
) {
    while pending.changed().await.is_ok() {
        let generation = *pending.borrow_and_update();
        if let Err(e) = cycle.run().await {
            tracing::warn!("Snapshot publish failed: {}", e);
        }
        done.send_replace(generation);
    }
}

/// Posts snapshots as JSON to a display service.
pub struct HttpSnapshotSink {
    client: reqwest::Client,
    url: String,
}

impl HttpSnapshotSink {
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| GatewayError::Delivery(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl SnapshotSink for HttpSnapshotSink {
    async fn deliver(&self, snapshot: &Snapshot) -> Result<(), GatewayError> {
        let response = self
            .client
            .post(&self.url)
            .json(snapshot.entries())
            .send()
            .await
            .map_err(|e| GatewayError::Delivery(format!("POST {}: {}", self.url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Delivery(format!(
                "POST {} returned {}: {}",
                self.url, status, body
            )));
        }
        Ok(())
    }
}

/// Sink that records every snapshot it receives.
#[derive(Default)]
pub struct CapturingSink {
    delivered: StdMutex<Vec<Snapshot>>,
}

impl CapturingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered(&self) -> Vec<Snapshot> {
        self.delivered
            .lock()
            .map(|d| d.clone())
            .unwrap_or_default()
    }

    pub fn last(&self) -> Option<Snapshot> {
        self.delivered().pop()
    }
}

#[async_trait]
impl SnapshotSink for CapturingSink {
    async fn deliver(&self, snapshot: &Snapshot) -> Result<(), GatewayError> {
        self.delivered
            .lock()
            .map_err(|_| GatewayError::Delivery("capture lock poisoned".to_string()))?
            .push(snapshot.clone());
        Ok(())
    }
}
