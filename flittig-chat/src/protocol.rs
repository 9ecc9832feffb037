//! Inbound wire protocol.
//!
//! The server wraps every frame in an `{event, data}` envelope. Outbound
//! frames are bare objects (see [`crate::models::input::OutgoingMessage`]).

use serde::Deserialize;
use serde_json::Value;

use crate::error::ProtocolError;
use crate::models::{Message, MessageKind};

pub const EVENT_MESSAGE: &str = "messageToClient";
pub const EVENT_HISTORY: &str = "messageToClientHistory";
pub const EVENT_SYSTEM_MESSAGE: &str = "systemMessageToClient";
pub const EVENT_PRESENCE: &str = "userPresenceUpdate";

/// A decoded server event.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// One new message, appended to the list
    Message(Message),
    /// Full conversation replay, replaces the list
    History(Vec<Message>),
    /// Server notice, appended like a message
    System(Message),
    Presence { user_id: String, online: bool },
    /// An event name this client does not know about
    Unknown(String),
}

#[derive(Debug, Deserialize)]
struct Envelope {
    event: Option<String>,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HistoryPayload {
    List(Vec<Message>),
    Wrapped { messages: Vec<Message> },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PresencePayload {
    user_id: String,
    online: bool,
}

/// Decode one text frame.
pub fn decode_frame(text: &str) -> Result<InboundEvent, ProtocolError> {
    let envelope: Envelope = serde_json::from_str(text).map_err(ProtocolError::Malformed)?;
    let event = envelope.event.ok_or(ProtocolError::MissingEvent)?;

    let bad_payload = |source| ProtocolError::BadPayload {
        event: event.clone(),
        source,
    };

    let decoded = match event.as_str() {
        EVENT_MESSAGE => {
            InboundEvent::Message(serde_json::from_value(envelope.data).map_err(bad_payload)?)
        }
        EVENT_HISTORY => {
            let messages = match serde_json::from_value(envelope.data).map_err(bad_payload)? {
                HistoryPayload::List(messages) => messages,
                HistoryPayload::Wrapped { messages } => messages,
            };
            InboundEvent::History(messages)
        }
        EVENT_SYSTEM_MESSAGE => {
            let mut message: Message =
                serde_json::from_value(envelope.data).map_err(bad_payload)?;
            message.kind = MessageKind::System;
            message.sent_by_current_user = false;
            InboundEvent::System(message)
        }
        EVENT_PRESENCE => {
            let presence: PresencePayload =
                serde_json::from_value(envelope.data).map_err(bad_payload)?;
            InboundEvent::Presence {
                user_id: presence.user_id,
                online: presence.online,
            }
        }
        _ => InboundEvent::Unknown(event),
    };

    Ok(decoded)
}
