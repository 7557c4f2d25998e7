use rollcall_store::StoreError;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Errors raised while serving a connection or publishing a snapshot.
///
/// None of these are fatal to the gateway process; at worst they end the
/// connection they occurred on.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("transport error: {0}")]
    Transport(#[from] tungstenite::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("unknown message type: {0}")]
    UnknownMessageType(String),
    #[error("address {address} is registered by another connection")]
    AddressInUse { address: String },
    #[error("delivery failed: {0}")]
    Delivery(String),
}

impl GatewayError {
    pub fn decode(reason: impl Into<String>) -> Self {
        Self::Decode(reason.into())
    }

    /// Short reason suitable for a `status;error;...` reply.
    pub fn reason(&self) -> String {
        match self {
            Self::Transport(_) => "transport failure".to_string(),
            Self::Decode(reason) => format!("invalid payload: {}", reason),
            Self::Store(_) => "storage unavailable".to_string(),
            Self::UnknownMessageType(kind) => format!("unknown message type '{}'", kind),
            Self::AddressInUse { address } => format!("{} already registered", address),
            Self::Delivery(_) => "delivery failed".to_string(),
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}
