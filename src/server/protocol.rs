// src/server/protocol.rs
//
// WebSocket wire messages.
// JSON with a `type` tag on both directions. Inbound messages take an
// optional channelId which the dispatcher defaults to "default".

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::channel::buffer::{LineEntry, SendMode};
use crate::channel::config::{PortConfig, PortConfigInput};
use crate::channel::ChannelStatus;
use crate::decoders::{DecodedFrame, PluginInfo};
use crate::events::MonitorEvent;
use crate::ports::PortInfo;

/// Client -> server messages.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "serial:connect", rename_all = "camelCase")]
    Connect {
        #[serde(default)]
        channel_id: Option<String>,
        #[serde(default)]
        config: PortConfigInput,
    },

    #[serde(rename = "serial:disconnect", rename_all = "camelCase")]
    Disconnect {
        #[serde(default)]
        channel_id: Option<String>,
    },

    #[serde(rename = "serial:send", rename_all = "camelCase")]
    Send {
        #[serde(default)]
        channel_id: Option<String>,
        data: String,
        mode: SendMode,
    },

    #[serde(rename = "serial:clear", rename_all = "camelCase")]
    Clear {
        #[serde(default)]
        channel_id: Option<String>,
    },

    #[serde(rename = "serial:getStatus", rename_all = "camelCase")]
    GetStatus {
        #[serde(default)]
        channel_id: Option<String>,
    },

    #[serde(rename = "channel:remove", rename_all = "camelCase")]
    RemoveChannel {
        #[serde(default)]
        channel_id: Option<String>,
    },
}

/// The tags `ClientMessage` accepts, for error reporting.
const KNOWN_TYPES: [&str; 6] = [
    "serial:connect",
    "serial:disconnect",
    "serial:send",
    "serial:clear",
    "serial:getStatus",
    "channel:remove",
];

/// Parse an inbound text frame. Distinguishes unknown message types from
/// malformed payloads so clients get an actionable error.
pub fn parse_client_message(text: &str) -> Result<ClientMessage, String> {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => return Err("Invalid message format".to_string()),
    };

    let message_type = value
        .get("type")
        .and_then(|t| t.as_str())
        .unwrap_or("")
        .to_string();

    match serde_json::from_value::<ClientMessage>(value) {
        Ok(message) => Ok(message),
        Err(_) if !KNOWN_TYPES.contains(&message_type.as_str()) => {
            Err(format!("Unknown message type: {}", message_type))
        }
        Err(_) => Err("Invalid message format".to_string()),
    }
}

/// Server -> client messages.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "serial:data", rename_all = "camelCase")]
    Data {
        channel_id: String,
        payload: LineEntry,
        #[serde(skip_serializing_if = "Option::is_none")]
        decoded: Option<Vec<DecodedFrame>>,
    },

    #[serde(rename = "serial:raw", rename_all = "camelCase")]
    Raw {
        channel_id: String,
        hex: String,
        timestamp: u64,
    },

    /// Connection lifecycle broadcast.
    #[serde(rename = "serial:status", rename_all = "camelCase")]
    StatusChange {
        channel_id: String,
        status: ConnectionState,
        #[serde(skip_serializing_if = "Option::is_none")]
        config: Option<PortConfig>,
    },

    /// Reply to serial:getStatus; one shape for one or all channels.
    #[serde(rename = "serial:status", rename_all = "camelCase")]
    StatusReply {
        channels: HashMap<String, ChannelStatus>,
    },

    #[serde(rename = "serial:error", rename_all = "camelCase")]
    ChannelError { channel_id: String, error: String },

    #[serde(rename = "serial:cleared", rename_all = "camelCase")]
    Cleared { channel_id: String },

    #[serde(rename = "plugins:list", rename_all = "camelCase")]
    Plugins { plugins: Vec<PluginInfo> },

    #[serde(rename = "ports:updated", rename_all = "camelCase")]
    PortsUpdated { ports: Vec<PortInfo> },

    #[serde(rename = "error")]
    Error { error: String },
}

#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            error: message.into(),
        }
    }

    /// Map a bus event onto its broadcast message.
    pub fn from_event(event: MonitorEvent) -> Self {
        match event {
            MonitorEvent::Line {
                channel_id,
                entry,
                decoded,
            } => ServerMessage::Data {
                channel_id,
                payload: entry,
                decoded,
            },
            MonitorEvent::RawData {
                channel_id,
                hex,
                timestamp,
            } => ServerMessage::Raw {
                channel_id,
                hex,
                timestamp,
            },
            MonitorEvent::Connected { channel_id, config } => ServerMessage::StatusChange {
                channel_id,
                status: ConnectionState::Connected,
                config: Some(config),
            },
            MonitorEvent::Disconnected { channel_id } => ServerMessage::StatusChange {
                channel_id,
                status: ConnectionState::Disconnected,
                config: None,
            },
            MonitorEvent::Error {
                channel_id,
                message,
            } => ServerMessage::ChannelError {
                channel_id,
                error: message,
            },
            MonitorEvent::Cleared { channel_id } => ServerMessage::Cleared { channel_id },
            MonitorEvent::PortsChanged { ports } => ServerMessage::PortsUpdated { ports },
        }
    }
}
