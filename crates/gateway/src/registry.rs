// Connection Registry
//
// Tracks live WebSocket connections by id. The map is sharded so accepts,
// disconnects and broadcasts on different connections don't contend.

use dashmap::DashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Notify};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

/// Unique id of one accepted connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a connection. Only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// Why a frame could not be queued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendFailure {
    /// Outbound queue is at capacity
    Full,
    /// Writer has gone away
    Closed,
}

impl fmt::Display for SendFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "outbound queue full"),
            Self::Closed => write!(f, "connection closed"),
        }
    }
}

/// Shared handle to a live connection.
///
/// Cloning is cheap; all clones observe the same state and feed the same
/// writer task.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub peer: SocketAddr,
    pub connected_at: Instant,
    outbound: mpsc::Sender<Message>,
    state: Arc<AtomicU8>,
    close_requested: Arc<Notify>,
}

impl ConnectionHandle {
    pub fn new(peer: SocketAddr, outbound: mpsc::Sender<Message>) -> Self {
        Self {
            id: ConnectionId::new(),
            peer,
            connected_at: Instant::now(),
            outbound,
            state: Arc::new(AtomicU8::new(ConnectionState::Connecting as u8)),
            close_requested: Arc::new(Notify::new()),
        }
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Connecting -> Open. Has no effect once the connection started closing.
    pub fn mark_open(&self) {
        let _ = self.state.compare_exchange(
            ConnectionState::Connecting as u8,
            ConnectionState::Open as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Moves to Closing unless already Closing or Closed.
    pub fn begin_closing(&self) {
        let _ = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < ConnectionState::Closing as u8).then_some(ConnectionState::Closing as u8)
            });
    }

    /// Returns true for the caller that performed the transition.
    pub fn mark_closed(&self) -> bool {
        self.state.swap(ConnectionState::Closed as u8, Ordering::AcqRel)
            != ConnectionState::Closed as u8
    }

    /// Queue a frame without waiting.
    pub fn try_send(&self, message: Message) -> Result<(), SendFailure> {
        self.outbound.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendFailure::Full,
            mpsc::error::TrySendError::Closed(_) => SendFailure::Closed,
        })
    }

    pub fn send_text(&self, text: impl Into<String>) -> Result<(), SendFailure> {
        self.try_send(Message::Text(text.into().into()))
    }

    /// Ask the connection to shut down with a close frame.
    ///
    /// Safe to call repeatedly and from any task.
    pub fn request_close(&self, reason: &str) {
        if self.state() >= ConnectionState::Closing {
            self.close_requested.notify_one();
            return;
        }
        self.begin_closing();
        let frame = CloseFrame {
            code: CloseCode::Away,
            reason: reason.to_string().into(),
        };
        if let Err(e) = self.try_send(Message::Close(Some(frame))) {
            tracing::debug!("Close frame for {} not queued: {}", self.id, e);
        }
        self.close_requested.notify_one();
    }

    /// Resolves once `request_close` has been called.
    pub async fn close_requested(&self) {
        self.close_requested.notified().await;
    }
}

/// Live connections keyed by id.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, ConnectionHandle>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the id was already present.
    pub fn add(&self, handle: ConnectionHandle) -> bool {
        match self.connections.entry(handle.id) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(handle);
                true
            }
        }
    }

    /// Removing an unknown id is a no-op.
    pub fn remove(&self, id: &ConnectionId) -> Option<ConnectionHandle> {
        self.connections.remove(id).map(|(_, handle)| handle)
    }

    pub fn get(&self, id: &ConnectionId) -> Option<ConnectionHandle> {
        self.connections.get(id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Clone of every handle, taken without holding shard locks afterwards.
    pub fn snapshot(&self) -> Vec<ConnectionHandle> {
        self.connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Run `f` for each open connection. Returns how many were visited.
    pub fn for_each_open<F>(&self, mut f: F) -> usize
    where
        F: FnMut(&ConnectionHandle),
    {
        let mut visited = 0;
        for handle in self.snapshot() {
            if handle.is_open() {
                f(&handle);
                visited += 1;
            }
        }
        visited
    }
}
