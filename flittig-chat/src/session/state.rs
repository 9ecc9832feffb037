use tracing::{debug, warn};

use crate::models::input::{OutgoingMessage, ValidateExt};
use crate::models::{Message, Receiver};
use crate::protocol::{decode_frame, InboundEvent};
use crate::utils::preview;

/// Change notifications for whoever renders the session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    Connection(ConnectionState),
    /// History replay landed; the list now holds this many messages
    History(usize),
    /// A live message or system notice was appended
    Message(Message),
    Presence(Presence),
    Counterpart(Receiver),
}

/// Lifecycle of the session's transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Missing token or counterpart; no transport exists
    #[default]
    Idle,
    Connecting,
    Open,
    Closed,
}

/// Counterpart presence as last reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Presence {
    #[default]
    Unknown,
    Online,
    Offline,
}

impl From<bool> for Presence {
    fn from(online: bool) -> Self {
        if online {
            Presence::Online
        } else {
            Presence::Offline
        }
    }
}

/// Conversation state for one counterpart, independent of any transport.
///
/// Inbound frames are folded in arrival order; nothing is re-sorted or
/// de-duplicated.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub(crate) counterpart_id: Option<String>,
    pub(crate) counterpart: Option<Receiver>,
    pub(crate) connection: ConnectionState,
    pub(crate) messages: Vec<Message>,
    pub(crate) presence: Presence,
    pub(crate) draft: String,
}

impl SessionState {
    pub fn new(counterpart_id: Option<String>) -> Self {
        Self {
            counterpart_id,
            ..Self::default()
        }
    }

    pub fn counterpart_id(&self) -> Option<&str> {
        self.counterpart_id.as_deref()
    }

    pub fn counterpart(&self) -> Option<&Receiver> {
        self.counterpart.as_ref()
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn presence(&self) -> Presence {
        self.presence
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.draft = text.into();
    }

    /// Decode and apply one text frame. Undecodable frames are logged and
    /// dropped; the message list is left as it was.
    pub fn handle_frame(&mut self, text: &str) -> Option<SessionUpdate> {
        match decode_frame(text) {
            Ok(event) => self.apply(event),
            Err(e) => {
                warn!(error = %e, preview = %preview(text), "Dropping malformed frame");
                None
            }
        }
    }

    /// Fold one event into the state, reporting what changed.
    pub fn apply(&mut self, event: InboundEvent) -> Option<SessionUpdate> {
        match event {
            InboundEvent::History(messages) => {
                debug!(count = messages.len(), "Replacing message list from history");
                self.messages = messages;
                Some(SessionUpdate::History(self.messages.len()))
            }
            InboundEvent::Message(message) | InboundEvent::System(message) => {
                self.messages.push(message.clone());
                Some(SessionUpdate::Message(message))
            }
            InboundEvent::Presence { user_id, online } => {
                if self.counterpart_id.as_deref() != Some(user_id.as_str()) {
                    debug!(user_id = %user_id, "Ignoring presence for another user");
                    return None;
                }
                let previous = self.presence;
                self.presence = Presence::from(online);
                (previous != self.presence).then_some(SessionUpdate::Presence(self.presence))
            }
            InboundEvent::Unknown(event) => {
                warn!(event = %event, "Ignoring unknown chat event");
                None
            }
        }
    }

    /// Build the frame for `text` addressed to the current counterpart.
    /// `None` when there is no counterpart or the text is blank.
    pub fn outgoing(&self, text: &str) -> Option<OutgoingMessage> {
        let receiver = self.counterpart_id.as_deref()?;
        let outgoing = OutgoingMessage::new(text, receiver);

        if let Err(e) = outgoing.validate_input() {
            debug!(error = %e, "Rejecting outgoing message");
            return None;
        }
        Some(outgoing)
    }

    pub fn clear_draft(&mut self) {
        self.draft.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message_json(id: &str) -> serde_json::Value {
        json!({
            "id": id,
            "content": format!("content {}", id),
            "timestamp": "2024-05-01T10:00:00Z"
        })
    }

    fn history_frame(ids: &[&str]) -> String {
        let data: Vec<_> = ids.iter().map(|id| message_json(id)).collect();
        json!({ "event": "messageToClientHistory", "data": data }).to_string()
    }

    fn message_frame(id: &str) -> String {
        json!({ "event": "messageToClient", "data": message_json(id) }).to_string()
    }

    fn ids(state: &SessionState) -> Vec<&str> {
        state.messages().iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn test_history_replaces_and_live_appends() {
        let mut state = SessionState::new(Some("u2".to_string()));

        state.handle_frame(&history_frame(&["h1", "h2", "h3"]));
        state.handle_frame(&message_frame("live1"));
        state.handle_frame(&message_frame("live2"));
        assert_eq!(ids(&state), ["h1", "h2", "h3", "live1", "live2"]);

        state.handle_frame(&history_frame(&["x"]));
        assert_eq!(ids(&state), ["x"]);
    }

    #[test]
    fn test_no_dedup_and_no_resorting() {
        let mut state = SessionState::new(Some("u2".to_string()));
        let late = json!({
            "event": "messageToClient",
            "data": { "id": "late", "content": "old", "timestamp": "2020-01-01T00:00:00Z" }
        })
        .to_string();

        state.handle_frame(&message_frame("a"));
        state.handle_frame(&late);
        state.handle_frame(&message_frame("a"));
        assert_eq!(ids(&state), ["a", "late", "a"]);
    }

    #[test]
    fn test_presence_filtered_by_counterpart() {
        let mut state = SessionState::new(Some("u2".to_string()));
        assert_eq!(state.presence(), Presence::Unknown);

        state.apply(InboundEvent::Presence {
            user_id: "someone-else".to_string(),
            online: true,
        });
        assert_eq!(state.presence(), Presence::Unknown);

        state.apply(InboundEvent::Presence {
            user_id: "u2".to_string(),
            online: true,
        });
        assert_eq!(state.presence(), Presence::Online);

        state.apply(InboundEvent::Presence {
            user_id: "u2".to_string(),
            online: false,
        });
        assert_eq!(state.presence(), Presence::Offline);
    }

    #[test]
    fn test_malformed_frames_leave_list_unchanged() {
        let mut state = SessionState::new(Some("u2".to_string()));
        state.handle_frame(&history_frame(&["h1"]));

        assert!(state.handle_frame("definitely not json").is_none());
        assert!(state.handle_frame(r#"{"data": {"id": "x"}}"#).is_none());
        assert!(state
            .handle_frame(r#"{"event": "messageToClientHistory", "data": 42}"#)
            .is_none());
        assert!(state.handle_frame("").is_none());

        assert_eq!(ids(&state), ["h1"]);
    }

    #[test]
    fn test_unknown_event_ignored() {
        let mut state = SessionState::new(Some("u2".to_string()));
        let update = state.handle_frame(r#"{"event": "jobUpdated", "data": {"jobId": 1}}"#);
        assert!(update.is_none());
        assert!(state.messages().is_empty());
    }

    #[test]
    fn test_system_message_appended_with_action() {
        let mut state = SessionState::new(Some("u2".to_string()));
        let frame = json!({
            "event": "systemMessageToClient",
            "data": {
                "id": "sys1",
                "content": "The job was completed. Leave a review?",
                "timestamp": "2024-05-01T11:00:00Z",
                "action": { "id": "review", "label": "Review", "payload": { "jobId": "j1" } }
            }
        })
        .to_string();

        state.handle_frame(&frame);

        let msg = &state.messages()[0];
        assert!(msg.is_system());
        assert!(!msg.sent_by_current_user);
        assert_eq!(msg.action.as_ref().unwrap().id, "review");
    }

    #[test]
    fn test_outgoing_trims_and_addresses_counterpart() {
        let state = SessionState::new(Some("u2".to_string()));
        let outgoing = state.outgoing("  hei  ").unwrap();
        assert_eq!(outgoing.content, "hei");
        assert_eq!(outgoing.receiver, "u2");
    }

    #[test]
    fn test_outgoing_rejects_blank_or_missing_counterpart() {
        let state = SessionState::new(Some("u2".to_string()));
        assert!(state.outgoing("   ").is_none());
        assert!(state.outgoing("").is_none());

        let no_counterpart = SessionState::new(None);
        assert!(no_counterpart.outgoing("hello").is_none());
    }

    #[test]
    fn test_presence_update_reported_only_on_change() {
        let mut state = SessionState::new(Some("u2".to_string()));
        let online = || InboundEvent::Presence {
            user_id: "u2".to_string(),
            online: true,
        };
        assert_eq!(state.apply(online()), Some(SessionUpdate::Presence(Presence::Online)));
        assert_eq!(state.apply(online()), None);
    }
}
