// Viewer Fanout
//
// Delivers every published snapshot to each connected viewer. A viewer whose
// queue is full or whose connection is going away is pruned so one slow
// display can never hold up the others.

use crate::error::GatewayError;
use crate::protocol::Snapshot;
use crate::publisher::SnapshotSink;
use crate::registry::{ConnectionHandle, ConnectionId, ConnectionRegistry, ConnectionState};
use crate::session::TextFrames;
use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio_tungstenite::tungstenite::Message;

/// Result of one broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub pruned: usize,
    pub skipped: usize,
}

#[derive(Default)]
pub struct ViewerFanout {
    viewers: ConnectionRegistry,
    /// Held across a broadcast and across a viewer joining, so a new viewer
    /// either is in the broadcast or is handed its frame.
    last_frame: Mutex<Option<String>>,
}

impl ViewerFanout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a viewer and send it the most recent snapshot, if any.
    pub fn add_viewer(&self, handle: ConnectionHandle) {
        let last = self.lock_last_frame();
        if let Some(frame) = last.as_ref() {
            if let Err(e) = handle.send_text(frame.clone()) {
                tracing::debug!("Initial snapshot to viewer {} not queued: {}", handle.id, e);
            }
        }
        self.viewers.add(handle);
    }

    fn lock_last_frame(&self) -> MutexGuard<'_, Option<String>> {
        self.last_frame
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn remove_viewer(&self, id: &ConnectionId) {
        self.viewers.remove(id);
    }

    pub fn viewer_count(&self) -> usize {
        self.viewers.len()
    }

    pub fn viewers(&self) -> &ConnectionRegistry {
        &self.viewers
    }

    fn prune(&self, handle: &ConnectionHandle, reason: &str) {
        self.viewers.remove(&handle.id);
        handle.request_close(reason);
    }

    /// Send one text frame to every viewer.
    ///
    /// Connecting viewers are skipped and stay registered. Viewers that are
    /// closing, closed, or can't take the frame are removed.
    pub fn broadcast(&self, frame: &str) -> BroadcastReport {
        let mut last = self.lock_last_frame();
        *last = Some(frame.to_string());

        let mut report = BroadcastReport::default();
        for handle in self.viewers.snapshot() {
            match handle.state() {
                ConnectionState::Connecting => report.skipped += 1,
                ConnectionState::Open => {
                    match handle.try_send(Message::Text(frame.to_owned().into())) {
                        Ok(()) => report.delivered += 1,
                        Err(e) => {
                            tracing::warn!("Dropping viewer {}: {}", handle.id, e);
                            self.prune(&handle, "viewer too slow");
                            report.pruned += 1;
                        }
                    }
                }
                ConnectionState::Closing | ConnectionState::Closed => {
                    self.prune(&handle, "viewer closed");
                    report.pruned += 1;
                }
            }
        }

        tracing::debug!(
            "Broadcast to viewers: delivered={} pruned={} skipped={}",
            report.delivered,
            report.pruned,
            report.skipped
        );
        drop(last);
        report
    }
}

#[async_trait]
impl SnapshotSink for ViewerFanout {
    async fn deliver(&self, snapshot: &Snapshot) -> Result<(), GatewayError> {
        let frame = snapshot.to_json()?;
        self.broadcast(&frame);
        Ok(())
    }
}

#[async_trait]
impl TextFrames for ViewerFanout {
    async fn on_text(&self, handle: &ConnectionHandle, text: &str) {
        tracing::debug!("Ignoring {} byte(s) from viewer {}", text.len(), handle.id);
    }
}
