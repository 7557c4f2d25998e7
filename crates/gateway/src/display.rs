// Display Server
//
// Accepts viewer connections and attaches them to the fanout.

use crate::fanout::ViewerFanout;
use crate::registry::{ConnectionHandle, ConnectionId, ConnectionRegistry};
use crate::server::{serve_connections, ConnectionOptions, ConnectionService};
use crate::shutdown::ShutdownSignal;
use anyhow::{Context, Result};
use async_trait::async_trait;
use rollcall_core::DisplayConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

#[async_trait]
impl ConnectionService for ViewerFanout {
    fn connections(&self) -> &ConnectionRegistry {
        self.viewers()
    }

    fn opened(&self, handle: ConnectionHandle) {
        self.add_viewer(handle);
    }

    async fn closed(&self, id: ConnectionId) {
        self.remove_viewer(&id);
    }
}

pub struct DisplayServer {
    config: DisplayConfig,
    fanout: Arc<ViewerFanout>,
}

impl DisplayServer {
    pub fn new(config: DisplayConfig, fanout: Arc<ViewerFanout>) -> Self {
        Self { config, fanout }
    }

    pub fn fanout(&self) -> Arc<ViewerFanout> {
        Arc::clone(&self.fanout)
    }

    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = self.config.viewer_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind viewer endpoint on {}", addr))?;
        tracing::info!("Viewer endpoint listening on {}", listener.local_addr()?);
        Ok(listener)
    }

    pub async fn serve(&self, listener: TcpListener, shutdown: ShutdownSignal) {
        let options = ConnectionOptions {
            role: "viewer",
            queue_capacity: self.config.queue_capacity,
            send_timeout: Duration::from_secs(self.config.send_timeout_secs),
            idle_timeout: None,
        };
        serve_connections(listener, Arc::clone(&self.fanout), options, shutdown).await;
    }
}
