use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether a message is ordinary chat content or a server-injected notice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
   #[default]
   User,
   System,
}

/// Which side of the conversation a message renders on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSide {
   Own,
   Counterpart,
   System,
}

/// Snapshot of the sender attached to counterpart messages.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Sender {
   pub id: String,
   #[serde(default)]
   pub name: Option<String>,
   #[serde(default)]
   pub image: Option<String>,
}

/// Button a system message may offer. Invoking it is the embedding
/// application's business (an HTTP call keyed by `id`), not the chat channel's.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SystemAction {
   pub id: String,
   pub label: String,
   #[serde(default)]
   pub payload: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
   pub id: String,
   pub content: String,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub user: Option<Sender>,
   pub timestamp: DateTime<Utc>,
   #[serde(default)]
   pub read: bool,
   #[serde(rename = "type", default)]
   pub kind: MessageKind,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub action: Option<SystemAction>,
   #[serde(default)]
   pub sent_by_current_user: bool,
}

impl Message {
   pub fn side(&self) -> MessageSide {
      match (self.kind, self.sent_by_current_user) {
         (MessageKind::System, _) => MessageSide::System,
         (MessageKind::User, true) => MessageSide::Own,
         (MessageKind::User, false) => MessageSide::Counterpart,
      }
   }

   pub fn is_system(&self) -> bool {
      self.kind == MessageKind::System
   }

   /// Display name of the sender, if the server attached one.
   pub fn sender_name(&self) -> Option<&str> {
      self.user.as_ref().and_then(|u| u.name.as_deref())
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use serde_json::json;

   #[test]
   fn test_counterpart_message_from_server_json() {
      let msg: Message = serde_json::from_value(json!({
         "id": "m1",
         "content": "Hei!",
         "user": { "id": "u2", "name": "Kari", "image": "avatars/u2.png" },
         "timestamp": "2024-05-01T10:00:00Z",
         "read": true
      }))
      .unwrap();

      assert_eq!(msg.kind, MessageKind::User);
      assert!(!msg.sent_by_current_user);
      assert_eq!(msg.side(), MessageSide::Counterpart);
      assert_eq!(msg.sender_name(), Some("Kari"));
      assert!(msg.read);
   }

   #[test]
   fn test_own_message_has_no_sender() {
      let msg: Message = serde_json::from_value(json!({
         "id": "m2",
         "content": "Hello",
         "timestamp": "2024-05-01T10:01:00Z",
         "sentByCurrentUser": true
      }))
      .unwrap();

      assert!(msg.user.is_none());
      assert_eq!(msg.side(), MessageSide::Own);
   }

   #[test]
   fn test_system_message_with_action() {
      let msg: Message = serde_json::from_value(json!({
         "id": "s1",
         "content": "Approve the job?",
         "timestamp": "2024-05-01T10:02:00Z",
         "type": "system",
         "action": { "id": "approve-job", "label": "Approve", "payload": { "jobId": "j9" } }
      }))
      .unwrap();

      assert!(msg.is_system());
      assert_eq!(msg.side(), MessageSide::System);
      let action = msg.action.unwrap();
      assert_eq!(action.id, "approve-job");
      assert_eq!(action.payload["jobId"], "j9");
   }
}
