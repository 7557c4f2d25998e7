// Rollcall Wire Protocol
//
// Registrant frames are single text lines of the form `<messageType>;<payload>`
// with a JSON payload. Viewers receive the whole online list as one JSON array
// per publish.

use crate::error::GatewayError;
use rollcall_store::{NewUser, UserRecord};
use serde::{Deserialize, Serialize};

/// Separates the message type from its payload
pub const DELIMITER: char = ';';

/// Registration of a user's network identity
pub const CLIENT_REGISTRATION: &str = "clientRegistration";

/// Withdraws every address registered on the connection
pub const CLIENT_LOGOUT: &str = "clientLogout";

/// Prefix of the optional reply frames
pub const STATUS: &str = "status";

/// One user as it travels on the wire, both in registrations and snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PresenceEntry {
    pub name: String,
    pub ip_address: String,
    pub port: u16,
}

impl PresenceEntry {
    pub fn new(name: impl Into<String>, ip_address: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            ip_address: ip_address.into(),
            port,
        }
    }

    fn validate(&self) -> Result<(), GatewayError> {
        if self.name.trim().is_empty() {
            return Err(GatewayError::decode("Name cannot be empty"));
        }
        if self.ip_address.trim().is_empty() {
            return Err(GatewayError::decode("IpAddress cannot be empty"));
        }
        Ok(())
    }

    pub fn into_new_user(self) -> NewUser {
        NewUser::new(self.name.trim(), self.ip_address.trim(), self.port)
    }
}

impl From<&UserRecord> for PresenceEntry {
    fn from(record: &UserRecord) -> Self {
        Self {
            name: record.display_name.clone(),
            ip_address: record.address.clone(),
            port: record.port,
        }
    }
}

/// A frame split at the first delimiter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawFrame<'a> {
    pub kind: &'a str,
    pub payload: &'a str,
}

/// Split a text frame into message type and payload.
///
/// A frame without a delimiter has an empty payload.
pub fn split_frame(text: &str) -> RawFrame<'_> {
    let line = text.trim_end_matches(['\r', '\n']);
    match line.split_once(DELIMITER) {
        Some((kind, payload)) => RawFrame {
            kind: kind.trim(),
            payload,
        },
        None => RawFrame {
            kind: line.trim(),
            payload: "",
        },
    }
}

/// Decoded registrant message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    Registration(PresenceEntry),
    Logout,
}

/// Parse a registrant text frame.
pub fn parse_message(text: &str) -> Result<InboundMessage, GatewayError> {
    let frame = split_frame(text);
    match frame.kind {
        CLIENT_REGISTRATION => {
            let entry: PresenceEntry = serde_json::from_str(frame.payload.trim())?;
            entry.validate()?;
            Ok(InboundMessage::Registration(entry))
        }
        CLIENT_LOGOUT => Ok(InboundMessage::Logout),
        other => Err(GatewayError::UnknownMessageType(other.to_string())),
    }
}

pub fn status_ok() -> String {
    format!("{STATUS}{DELIMITER}ok")
}

pub fn status_error(reason: &str) -> String {
    format!("{STATUS}{DELIMITER}error{DELIMITER}{reason}")
}

/// The full online list at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    entries: Vec<PresenceEntry>,
}

impl Snapshot {
    pub fn new(entries: Vec<PresenceEntry>) -> Self {
        Self { entries }
    }

    pub fn from_records(records: &[UserRecord]) -> Self {
        Self::new(records.iter().map(PresenceEntry::from).collect())
    }

    /// Parse a snapshot received from another process.
    pub fn from_json(json: &str) -> Result<Self, GatewayError> {
        let entries: Vec<PresenceEntry> = serde_json::from_str(json)?;
        Ok(Self { entries })
    }

    pub fn to_json(&self) -> Result<String, GatewayError> {
        serde_json::to_string(&self.entries).map_err(|e| GatewayError::Delivery(e.to_string()))
    }

    pub fn entries(&self) -> &[PresenceEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
