use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Frames the server pushes, wrapped as `{event, data}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "messageToClient")]
    Message(ChatMessage),
    #[serde(rename = "messageToClientHistory")]
    History(Vec<ChatMessage>),
    #[serde(rename = "systemMessageToClient")]
    System(ChatMessage),
    #[serde(rename = "userPresenceUpdate")]
    Presence(PresenceUpdate),
}

impl ServerEvent {
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// The only frame clients send. Bare object, no envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientFrame {
    pub content: String,
    pub receiver: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    User,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSnapshot {
    pub id: String,
    pub name: Option<String>,
    pub image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageAction {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// A message as one particular viewer sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserSnapshot>,
    pub timestamp: DateTime<Utc>,
    pub read: bool,
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<MessageAction>,
    pub sent_by_current_user: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceUpdate {
    pub user_id: String,
    pub online: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn message() -> ChatMessage {
        ChatMessage {
            id: "m1".to_string(),
            content: "Hei".to_string(),
            user: Some(UserSnapshot {
                id: "alice".to_string(),
                name: Some("Alice".to_string()),
                image: None,
            }),
            timestamp: DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            read: false,
            kind: MessageType::User,
            action: None,
            sent_by_current_user: false,
        }
    }

    #[test]
    fn test_message_event_envelope() {
        let frame = ServerEvent::Message(message()).to_frame().unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();

        assert_eq!(value["event"], "messageToClient");
        assert_eq!(value["data"]["id"], "m1");
        assert_eq!(value["data"]["type"], "user");
        assert_eq!(value["data"]["sentByCurrentUser"], false);
        assert_eq!(value["data"]["user"]["name"], "Alice");
        assert!(value["data"].get("action").is_none());
    }

    #[test]
    fn test_history_event_is_array() {
        let frame = ServerEvent::History(vec![message(), message()]).to_frame().unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["event"], "messageToClientHistory");
        assert_eq!(value["data"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_presence_event() {
        let frame = ServerEvent::Presence(PresenceUpdate {
            user_id: "bob".to_string(),
            online: true,
        })
        .to_frame()
        .unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(
            value,
            json!({ "event": "userPresenceUpdate", "data": { "userId": "bob", "online": true } })
        );
    }

    #[test]
    fn test_client_frame_from_json() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"content":"hello","receiver":"bob"}"#).unwrap();
        assert_eq!(frame.content, "hello");
        assert_eq!(frame.receiver, "bob");
    }
}
