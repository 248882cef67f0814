//! Bus message protocol definitions
//!
//! Every message is one JSON object in one WebSocket text frame.

use serde::{Deserialize, Serialize};

use crate::events::{BusEvent, StateSnapshot};

/// Largest accepted client message
pub const MAX_MESSAGE_LEN: usize = 1024 * 1024;

/// Requests from a display client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Ask for the current snapshot
    GetState,

    /// Ping to check connectivity
    Ping,
}

/// Messages from the daemon to a display client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Message {
    /// Full session list, pushed on every change and sent on `get_state`
    State(StateSnapshot),

    /// The user pressed a bound key; the overlay should become visible
    Show,

    /// Pong response to ping
    Pong,

    /// The request could not be handled
    Error { code: String, message: String },
}

impl Message {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl From<&BusEvent> for Message {
    fn from(event: &BusEvent) -> Self {
        match event {
            BusEvent::StateChanged(snapshot) => Message::State(snapshot.clone()),
            BusEvent::AttentionRequested => Message::Show,
        }
    }
}
