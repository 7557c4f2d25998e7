// Registrant Message Handler
//
// Turns decoded registrant frames into presence changes.

use crate::error::GatewayError;
use crate::presence::PresenceManager;
use crate::protocol::{self, InboundMessage};
use crate::registry::{ConnectionHandle, ConnectionId};
use crate::session::TextFrames;
use async_trait::async_trait;
use rollcall_store::UserRecord;
use std::sync::Arc;

/// What a successfully handled frame did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Registered(UserRecord),
    LoggedOut(usize),
}

pub struct RegistrationHandler {
    presence: Arc<PresenceManager>,
    echo_status: bool,
}

impl RegistrationHandler {
    pub fn new(presence: Arc<PresenceManager>, echo_status: bool) -> Self {
        Self {
            presence,
            echo_status,
        }
    }

    pub fn presence(&self) -> Arc<PresenceManager> {
        Arc::clone(&self.presence)
    }

    pub async fn dispatch(&self, conn: ConnectionId, text: &str) -> Result<Outcome, GatewayError> {
        match protocol::parse_message(text)? {
            InboundMessage::Registration(entry) => {
                let record = self.presence.register(conn, entry.into_new_user()).await?;
                Ok(Outcome::Registered(record))
            }
            InboundMessage::Logout => Ok(Outcome::LoggedOut(self.presence.logout(conn).await)),
        }
    }

    /// Handle one frame, logging failures. Returns the status reply to send
    /// back when echoing is enabled.
    pub async fn handle_frame(&self, conn: ConnectionId, text: &str) -> Option<String> {
        let result = self.dispatch(conn, text).await;
        if let Err(e) = &result {
            match e {
                GatewayError::UnknownMessageType(kind) => {
                    tracing::debug!(conn_id = %conn, "Ignoring message type '{}'", kind)
                }
                GatewayError::Decode(_) | GatewayError::AddressInUse { .. } => {
                    tracing::warn!(conn_id = %conn, "Rejected frame: {}", e)
                }
                _ => tracing::error!(conn_id = %conn, "Failed to handle frame: {}", e),
            }
        }

        if !self.echo_status {
            return None;
        }
        Some(match result {
            Ok(_) => protocol::status_ok(),
            Err(e) => protocol::status_error(&e.reason()),
        })
    }
}

#[async_trait]
impl TextFrames for RegistrationHandler {
    async fn on_text(&self, handle: &ConnectionHandle, text: &str) {
        if let Some(reply) = self.handle_frame(handle.id, text).await {
            if let Err(e) = handle.send_text(reply) {
                tracing::debug!("Status reply to {} dropped: {}", handle.id, e);
            }
        }
    }
}
