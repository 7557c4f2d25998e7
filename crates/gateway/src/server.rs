use crate::error::GatewayError;
use crate::handler::RegistrationHandler;
use crate::presence::PresenceManager;
use crate::registry::{ConnectionHandle, ConnectionId, ConnectionRegistry};
use crate::session::{self, TextFrames, CLOSE_GRACE};
use crate::shutdown::ShutdownSignal;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use rollcall_core::GatewayConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Registrants only ever receive status replies.
const REGISTRANT_QUEUE: usize = 16;

/// Per-listener connection settings
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Used in log lines ("registrant", "viewer")
    pub role: &'static str,
    pub queue_capacity: usize,
    pub send_timeout: Duration,
    pub idle_timeout: Option<Duration>,
}

/// What a listener does with its connections.
#[async_trait]
pub trait ConnectionService: TextFrames + 'static {
    fn connections(&self) -> &ConnectionRegistry;

    /// Called once the handshake completed and the connection is open.
    fn opened(&self, handle: ConnectionHandle) {
        self.connections().add(handle);
    }

    /// Called exactly once per accepted connection, after it ended.
    async fn closed(&self, _id: ConnectionId) {}
}

/// Accept connections until shutdown, then close the open ones and wait for
/// every connection task to finish its cleanup.
pub async fn serve_connections<S: ConnectionService>(
    listener: TcpListener,
    service: Arc<S>,
    options: ConnectionOptions,
    mut shutdown: ShutdownSignal,
) {
    let signal = shutdown.clone();
    let mut tasks = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::debug!("Accepted {} connection from {}", options.role, peer);
                    tasks.spawn(supervise(
                        stream,
                        peer,
                        Arc::clone(&service),
                        options.clone(),
                        signal.clone(),
                    ));
                }
                Err(e) => {
                    tracing::warn!("Failed to accept {} connection: {}", options.role, e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            },
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = joined {
                    tracing::error!("{} supervisor failed: {}", options.role, e);
                }
            }
            _ = shutdown.wait() => break,
        }
    }

    let closing = service
        .connections()
        .for_each_open(|handle| handle.request_close("server shutting down"));
    tracing::info!(
        "Stopped accepting {} connections, closing {} open",
        options.role,
        closing
    );

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            tracing::error!("{} supervisor failed: {}", options.role, e);
        }
    }
}

/// Run one connection and clean up after it however it ends.
async fn supervise<S: ConnectionService>(
    stream: TcpStream,
    peer: SocketAddr,
    service: Arc<S>,
    options: ConnectionOptions,
    shutdown: ShutdownSignal,
) {
    let (tx, rx) = mpsc::channel(options.queue_capacity);
    let handle = ConnectionHandle::new(peer, tx);
    let role = options.role;

    let worker = tokio::spawn(run_connection(
        stream,
        handle.clone(),
        rx,
        Arc::clone(&service),
        options,
        shutdown,
    ));

    let conn_id = handle.id;
    match worker.await {
        Ok(Ok(())) => tracing::info!(conn_id = %conn_id, %peer, "{} disconnected", role),
        Ok(Err(e)) => {
            tracing::warn!(conn_id = %conn_id, %peer, error = %e, "{} ended with error", role)
        }
        Err(e) if e.is_panic() => {
            tracing::error!(conn_id = %conn_id, %peer, "{} task panicked", role)
        }
        Err(e) => tracing::warn!(conn_id = %conn_id, %peer, "{} task cancelled: {}", role, e),
    }

    service.connections().remove(&handle.id);
    if handle.mark_closed() {
        service.closed(handle.id).await;
    }
}

async fn run_connection<S: ConnectionService>(
    stream: TcpStream,
    handle: ConnectionHandle,
    rx: mpsc::Receiver<tungstenite::Message>,
    service: Arc<S>,
    options: ConnectionOptions,
    shutdown: ShutdownSignal,
) -> Result<(), GatewayError> {
    let ws_stream = match timeout(HANDSHAKE_TIMEOUT, tokio_tungstenite::accept_async(stream)).await
    {
        Ok(ws_stream) => ws_stream?,
        Err(_) => {
            return Err(GatewayError::Transport(tungstenite::Error::Io(
                std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "websocket handshake timed out",
                ),
            )))
        }
    };

    let (sink, mut source) = ws_stream.split();
    let (stop_tx, stop_rx) = oneshot::channel();
    let mut writer = tokio::spawn(session::write_loop(
        sink,
        rx,
        stop_rx,
        options.send_timeout,
        handle.clone(),
    ));

    handle.mark_open();
    service.opened(handle.clone());
    if shutdown.is_triggered() {
        handle.request_close("server shutting down");
    }
    tracing::info!(conn_id = %handle.id, peer = %handle.peer, "{} connected", options.role);

    let result = session::drive(&mut source, &handle, options.idle_timeout, service.as_ref()).await;

    handle.begin_closing();
    service.connections().remove(&handle.id);
    let _ = stop_tx.send(());
    if timeout(CLOSE_GRACE, &mut writer).await.is_err() {
        writer.abort();
    }
    result
}

struct Registrants {
    connections: ConnectionRegistry,
    handler: RegistrationHandler,
}

#[async_trait]
impl TextFrames for Registrants {
    async fn on_text(&self, handle: &ConnectionHandle, text: &str) {
        self.handler.on_text(handle, text).await;
    }
}

#[async_trait]
impl ConnectionService for Registrants {
    fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    async fn closed(&self, id: ConnectionId) {
        self.handler.presence().release_connection(id).await;
    }
}

/// Registrant-facing WebSocket server
pub struct GatewayServer {
    config: GatewayConfig,
    service: Arc<Registrants>,
}

impl GatewayServer {
    pub fn new(config: GatewayConfig, presence: Arc<PresenceManager>) -> Self {
        let handler = RegistrationHandler::new(presence, config.echo_status);
        Self {
            config,
            service: Arc::new(Registrants {
                connections: ConnectionRegistry::new(),
                handler,
            }),
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.service.connections
    }

    pub fn handler(&self) -> &RegistrationHandler {
        &self.service.handler
    }

    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = self.config.listen_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind gateway on {}", addr))?;
        tracing::info!("Gateway server listening on {}", listener.local_addr()?);
        Ok(listener)
    }

    pub async fn serve(&self, listener: TcpListener, shutdown: ShutdownSignal) {
        let options = ConnectionOptions {
            role: "registrant",
            queue_capacity: REGISTRANT_QUEUE,
            send_timeout: Duration::from_secs(self.config.send_timeout_secs),
            idle_timeout: self.config.idle_timeout_secs.map(Duration::from_secs),
        };
        serve_connections(listener, Arc::clone(&self.service), options, shutdown).await;
    }

    pub async fn start(&self, shutdown: ShutdownSignal) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener, shutdown).await;
        Ok(())
    }
}
