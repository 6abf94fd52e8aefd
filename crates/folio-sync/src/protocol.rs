//! # Hub Protocol Messages
//!
//! Wire format spoken by the catalog's push hub.
//!
//! ## Protocol Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Hub Protocol (JSON)                              │
//! │                                                                         │
//! │  FRAMING                                                               │
//! │  ───────                                                               │
//! │  Every record is a JSON object followed by 0x1E (record separator).    │
//! │  One WebSocket text frame may carry several records.                   │
//! │                                                                         │
//! │  HANDSHAKE                                                             │
//! │  ─────────                                                             │
//! │  CLIENT ───► {"protocol":"json","version":1}␞                          │
//! │  HUB    ◄─── {}␞                      (or {"error":"..."}␞)            │
//! │                                                                         │
//! │  MESSAGES (by "type")                                                  │
//! │  ────────────────────                                                  │
//! │  1  Invocation  HUB ───► {"type":1,"target":"ReceiveBook",             │
//! │                           "arguments":["{...record json...}"]}         │
//! │  6  Ping        both     {"type":6}                                    │
//! │  7  Close       HUB ───► {"type":7,"error":"...","allowReconnect":true}│
//! │  *  anything else is ignored (this client never invokes the hub)       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{SyncError, SyncResult};

/// Terminates every record on the wire.
pub const RECORD_SEPARATOR: char = '\u{1e}';

/// Hub protocol name sent in the handshake.
pub const HUB_PROTOCOL: &str = "json";

/// Hub protocol version sent in the handshake.
pub const HUB_PROTOCOL_VERSION: u32 = 1;

const TYPE_INVOCATION: u8 = 1;
const TYPE_PING: u8 = 6;
const TYPE_CLOSE: u8 = 7;

// =============================================================================
// Push Event
// =============================================================================

/// Something changed remotely.
///
/// The payload is opaque: receivers only learn that the catalog moved and
/// must refetch to see how.
#[derive(Debug, Clone, PartialEq)]
pub struct PushEvent {
    /// Raw payload of the invocation (usually the changed record as JSON).
    pub payload: String,

    /// When this client received the event.
    pub received_at: DateTime<Utc>,
}

impl PushEvent {
    /// Creates an event received now.
    pub fn new(payload: impl Into<String>) -> Self {
        PushEvent {
            payload: payload.into(),
            received_at: Utc::now(),
        }
    }
}

// =============================================================================
// Handshake
// =============================================================================

#[derive(Serialize)]
struct HandshakeRequest<'a> {
    protocol: &'a str,
    version: u32,
}

#[derive(Deserialize)]
struct HandshakeResponse {
    #[serde(default)]
    error: Option<String>,
}

/// Builds the handshake record the client sends right after connecting.
pub fn handshake_request() -> SyncResult<String> {
    let json = serde_json::to_string(&HandshakeRequest {
        protocol: HUB_PROTOCOL,
        version: HUB_PROTOCOL_VERSION,
    })
    .map_err(|e| SyncError::Protocol(e.to_string()))?;
    Ok(frame(&json))
}

/// Checks the hub's handshake answer.
pub fn parse_handshake_response(record: &str) -> SyncResult<()> {
    let response: HandshakeResponse = serde_json::from_str(record)
        .map_err(|e| SyncError::Protocol(format!("bad handshake response: {}", e)))?;
    match response.error {
        Some(error) => Err(SyncError::Connection(format!(
            "hub rejected handshake: {}",
            error
        ))),
        None => Ok(()),
    }
}

/// Keepalive record sent by the client.
pub fn ping_record() -> String {
    frame(r#"{"type":6}"#)
}

/// Appends the record separator.
pub fn frame(json: &str) -> String {
    let mut record = String::with_capacity(json.len() + 1);
    record.push_str(json);
    record.push(RECORD_SEPARATOR);
    record
}

/// Splits a text frame into its records, dropping empty tails.
pub fn split_records(frame: &str) -> impl Iterator<Item = &str> {
    frame
        .split(RECORD_SEPARATOR)
        .map(str::trim)
        .filter(|record| !record.is_empty())
}

// =============================================================================
// Hub Messages
// =============================================================================

/// A decoded hub record.
#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    /// The hub invoked a client method.
    Invocation {
        target: String,
        arguments: Vec<Value>,
    },

    /// Keepalive.
    Ping,

    /// The hub is closing the connection.
    Close {
        error: Option<String>,
        allow_reconnect: bool,
    },

    /// A message type this receive-only client does not act on.
    Other(u8),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawHubMessage {
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    arguments: Vec<Value>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    allow_reconnect: bool,
}

impl HubMessage {
    /// Decodes one record (without its separator).
    pub fn parse(record: &str) -> SyncResult<HubMessage> {
        let raw: RawHubMessage = serde_json::from_str(record)
            .map_err(|e| SyncError::Protocol(format!("bad hub record: {}", e)))?;

        Ok(match raw.kind {
            TYPE_INVOCATION => HubMessage::Invocation {
                target: raw.target.ok_or_else(|| {
                    SyncError::Protocol("invocation without target".to_string())
                })?,
                arguments: raw.arguments,
            },
            TYPE_PING => HubMessage::Ping,
            TYPE_CLOSE => HubMessage::Close {
                error: raw.error,
                allow_reconnect: raw.allow_reconnect,
            },
            other => HubMessage::Other(other),
        })
    }

    /// Returns a short name for logging.
    pub fn type_name(&self) -> &'static str {
        match self {
            HubMessage::Invocation { .. } => "Invocation",
            HubMessage::Ping => "Ping",
            HubMessage::Close { .. } => "Close",
            HubMessage::Other(_) => "Other",
        }
    }

    /// Converts an invocation of `event_name` into a push event.
    ///
    /// Target names match case-insensitively, as hub method names do. The
    /// first argument is the payload: strings verbatim, any other JSON
    /// re-serialized.
    pub fn into_push_event(self, event_name: &str) -> Option<PushEvent> {
        match self {
            HubMessage::Invocation { target, arguments }
                if target.eq_ignore_ascii_case(event_name) =>
            {
                let payload = match arguments.into_iter().next() {
                    Some(Value::String(s)) => s,
                    Some(other) => other.to_string(),
                    None => String::new(),
                };
                Some(PushEvent::new(payload))
            }
            _ => None,
        }
    }
}
