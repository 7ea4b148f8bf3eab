//! Typed events flowing Connection → registry → listeners.

use serde::Serialize;
use serde_json::Value;

use super::types::{JsonRpcNotification, ServerStatus};

/// Lifecycle and inbound-traffic events emitted by one [`Connection`](super::Connection).
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Connected,
    Disconnected,
    /// A connection attempt failed and another one is scheduled.
    Retrying { attempt: u32, max_retries: u32 },
    /// Connection attempts are exhausted (or the protocol is unsupported).
    Error { message: String },
    Notification(JsonRpcNotification),
}

/// A [`ConnectionEvent`] tagged with the server that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerEvent {
    pub server: String,
    pub event: ConnectionEvent,
}

/// Events published by the registry to its subscribers (status bar, UI).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientEvent {
    ServerAdded {
        name: String,
    },
    ServerRemoved {
        name: String,
    },
    #[serde(rename_all = "camelCase")]
    StatusChanged {
        name: String,
        status: ServerStatus,
    },
    #[serde(rename_all = "camelCase")]
    Notification {
        server_name: String,
        method: String,
        params: Option<Value>,
    },
}
