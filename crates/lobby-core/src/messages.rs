//! Wire events exchanged with chat clients.
//!
//! Every WebSocket text frame is one JSON object `{"event": name, "data": payload}`.
//! `data` is absent for events that carry nothing.

use serde::{Deserialize, Serialize};

use crate::errors::RoomError;
use crate::ids::SessionId;

/// One line of chat. Text is already escaped and filtered.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(rename = "t")]
    pub timestamp: i64,
    #[serde(rename = "n")]
    pub sender: String,
    #[serde(rename = "m")]
    pub text: String,
}

impl ChatMessage {
    pub fn new(timestamp: i64, sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            timestamp,
            sender: sender.into(),
            text: text.into(),
        }
    }
}

/// Roster entry for one live session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub id: SessionId,
    #[serde(rename = "n")]
    pub name: String,
}

/// Terminal cause sent in `bye` right before the server closes a socket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloseCause {
    Kick,
    Busy,
    Idle,
    NoPulse,
}

impl CloseCause {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Kick => "kick",
            Self::Busy => "busy",
            Self::Idle => "idle",
            Self::NoPulse => "nopulse",
        }
    }
}

impl std::fmt::Display for CloseCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events the server sends.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// Broadcast chat line or a sender-only system notice.
    #[serde(rename = "msg")]
    Msg(ChatMessage),
    /// Full history snapshot, oldest first.
    #[serde(rename = "chistory")]
    ChatHistory(Vec<ChatMessage>),
    #[serde(rename = "clients")]
    Clients(Vec<RosterEntry>),
    /// Current capacity.
    #[serde(rename = "max")]
    Max(usize),
    #[serde(rename = "bye")]
    Bye(CloseCause),
    /// Heartbeat interval in milliseconds.
    #[serde(rename = "p")]
    Pulse(u64),
}

impl ServerEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Msg(_) => "msg",
            Self::ChatHistory(_) => "chistory",
            Self::Clients(_) => "clients",
            Self::Max(_) => "max",
            Self::Bye(_) => "bye",
            Self::Pulse(_) => "p",
        }
    }

    pub fn to_json(&self) -> Option<String> {
        serde_json::to_string(self).ok()
    }
}

/// Payload of an inbound `msg`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSubmission {
    #[serde(rename = "m")]
    pub text: String,
}

/// Events a client sends.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientEvent {
    Msg(ChatSubmission),
    /// Replay request for the history buffer.
    HistoryRequest,
    /// Explicit keep-alive. Any frame counts, this one just carries nothing else.
    Pulse,
}

#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

impl ClientEvent {
    /// Decode one text frame.
    ///
    /// Returns `Ok(None)` for event names the server does not handle. A frame
    /// that is not an envelope, or a `msg` whose payload is not `{m: string}`,
    /// is a [`RoomError::MalformedMessage`].
    pub fn decode(raw: &str) -> Result<Option<Self>, RoomError> {
        let value: serde_json::Value = serde_json::from_str(raw)
            .map_err(|e| RoomError::MalformedMessage(format!("bad frame: {e}")))?;
        // Structs also deserialize from sequences; only an object is an envelope.
        if !value.is_object() {
            return Err(RoomError::MalformedMessage("frame is not an object".into()));
        }
        let envelope: Envelope = serde_json::from_value(value)
            .map_err(|e| RoomError::MalformedMessage(format!("bad frame: {e}")))?;

        match envelope.event.as_str() {
            "msg" => {
                let data = envelope
                    .data
                    .ok_or_else(|| RoomError::MalformedMessage("msg without payload".into()))?;
                let submission: ChatSubmission = serde_json::from_value(data)
                    .map_err(|e| RoomError::MalformedMessage(format!("bad msg payload: {e}")))?;
                Ok(Some(Self::Msg(submission)))
            }
            "chistory" => Ok(Some(Self::HistoryRequest)),
            "p" => Ok(Some(Self::Pulse)),
            _ => Ok(None),
        }
    }

    /// Encode as a text frame, the way a client would send it.
    pub fn encode(&self) -> String {
        let value = match self {
            Self::Msg(submission) => serde_json::json!({ "event": "msg", "data": submission }),
            Self::HistoryRequest => serde_json::json!({ "event": "chistory" }),
            Self::Pulse => serde_json::json!({ "event": "p" }),
        };
        value.to_string()
    }
}
