//! Sync protocol message types and their wire encoding.
//!
//! Every payload exchanged between peers is one self-describing
//! [`WireMessage`] tagged by a `type` field:
//!
//! ```text
//! {"type":"sync_request","messageIds":["a","b"]}
//! {"type":"sync_response","requestedIds":["a"]}
//! {"type":"message_batch","messages":[{...}]}
//! {"type":"chat_message","id":"...","content":"...","user_id":"...","chat_id":"","created_at":0}
//! ```

use std::collections::BTreeSet;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use cruise_mesh_core::{Message, MessageId};

use crate::error::{Result, SyncError};

/// Sync protocol messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    /// Advertise the ids the sender already holds.
    SyncRequest {
        /// The sender's known-id snapshot.
        #[serde(rename = "messageIds", default)]
        ids: BTreeSet<MessageId>,
    },

    /// Ask for the advertised ids the receiver lacks.
    SyncResponse {
        /// Ids the sender wants to receive.
        #[serde(rename = "requestedIds", default)]
        requested_ids: BTreeSet<MessageId>,
    },

    /// Messages served in answer to a `SyncResponse`.
    MessageBatch {
        /// The requested messages the server still holds.
        #[serde(default)]
        messages: Vec<Message>,
    },

    /// A single live-sent message.
    ChatMessage(Message),
}

impl WireMessage {
    /// The `type` tag this message carries on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            WireMessage::SyncRequest { .. } => "sync_request",
            WireMessage::SyncResponse { .. } => "sync_response",
            WireMessage::MessageBatch { .. } => "message_batch",
            WireMessage::ChatMessage(_) => "chat_message",
        }
    }
}

/// Encoding used for wire payloads.
///
/// Every node in a mesh must use the same format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WireFormat {
    /// UTF-8 JSON, as spoken by the mobile clients.
    #[default]
    Json,
    /// CBOR with the same tagged shape.
    Cbor,
}

impl WireFormat {
    /// Encode a message to payload bytes.
    pub fn encode(&self, message: &WireMessage) -> Result<Bytes> {
        match self {
            WireFormat::Json => serde_json::to_vec(message)
                .map(Bytes::from)
                .map_err(|e| SyncError::Codec(e.to_string())),
            WireFormat::Cbor => {
                let mut buf = Vec::new();
                ciborium::ser::into_writer(message, &mut buf)
                    .map_err(|e| SyncError::Codec(e.to_string()))?;
                Ok(Bytes::from(buf))
            }
        }
    }

    /// Decode payload bytes into a message.
    ///
    /// Unknown `type` tags and missing mandatory fields are codec errors.
    pub fn decode(&self, payload: &[u8]) -> Result<WireMessage> {
        match self {
            WireFormat::Json => {
                serde_json::from_slice(payload).map_err(|e| SyncError::Codec(e.to_string()))
            }
            WireFormat::Cbor => {
                ciborium::de::from_reader(payload).map_err(|e| SyncError::Codec(e.to_string()))
            }
        }
    }
}
