// Admin HTTP Endpoint
//
// Lets another process hand a snapshot to this process's viewers, and lets an
// operator force a republish.

use crate::fanout::ViewerFanout;
use crate::protocol::Snapshot;
use crate::publisher::SnapshotPublisher;
use crate::shutdown::ShutdownSignal;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(Clone)]
pub struct AdminState {
    fanout: Arc<ViewerFanout>,
    publisher: Option<Arc<SnapshotPublisher>>,
}

impl AdminState {
    pub fn new(fanout: Arc<ViewerFanout>) -> Self {
        Self {
            fanout,
            publisher: None,
        }
    }

    /// Enable `POST /publish`.
    pub fn with_publisher(mut self, publisher: Arc<SnapshotPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }
}

pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/display", post(display_snapshot))
        .route("/publish", post(publish_now))
        .route("/health", get(health))
        .with_state(state)
}

async fn display_snapshot(State(state): State<AdminState>, body: String) -> impl IntoResponse {
    let snapshot = match Snapshot::from_json(&body) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            tracing::warn!("Rejected display request: {}", e);
            return (StatusCode::BAD_REQUEST, "invalid user list".to_string());
        }
    };

    let frame = match snapshot.to_json() {
        Ok(frame) => frame,
        Err(e) => {
            tracing::error!("Failed to encode snapshot: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
    };

    let report = state.fanout.broadcast(&frame);
    tracing::info!(
        "Displayed {} user(s) to {} viewer(s)",
        snapshot.len(),
        report.delivered
    );
    (StatusCode::OK, "snapshot delivered".to_string())
}

async fn publish_now(State(state): State<AdminState>) -> impl IntoResponse {
    let Some(publisher) = state.publisher else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            "no user store attached".to_string(),
        );
    };
    match publisher.try_publish().await {
        Ok(snapshot) => (
            StatusCode::OK,
            format!("published {} user(s)", snapshot.len()),
        ),
        Err(e) => {
            tracing::error!("Forced publish failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn health(State(state): State<AdminState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "viewers": state.fanout.viewer_count(),
    }))
}

/// Serve the admin routes until shutdown.
pub async fn serve(
    listener: TcpListener,
    state: AdminState,
    mut shutdown: ShutdownSignal,
) -> anyhow::Result<()> {
    tracing::info!("Admin endpoint listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await?;
    Ok(())
}
