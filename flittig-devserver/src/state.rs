use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::protocol::{
    ChatMessage, MessageAction, MessageType, PresenceUpdate, ServerEvent, UserSnapshot,
};

/// Maximum stored messages per conversation to prevent unbounded memory growth
const MAX_HISTORY_PER_CONVERSATION: usize = 1000;

/// One open socket of a user
struct Client {
    conn_id: u64,
    /// Counterpart the connection was opened for; `None` receives everything
    receiver: Option<String>,
    tx: mpsc::UnboundedSender<String>,
}

impl Client {
    fn wants_conversation_with(&self, other: &str) -> bool {
        self.receiver.as_deref().map_or(true, |r| r == other)
    }
}

/// A message as stored, independent of who is looking at it.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Server state managing connected clients and conversation history
pub struct ServerState {
    /// user_id -> open connections (supports multiple connections per user)
    clients: DashMap<String, Vec<Client>>,
    /// sorted (user, user) pair -> messages in arrival order
    conversations: DashMap<(String, String), Vec<StoredMessage>>,
    profiles: DashMap<String, UserSnapshot>,
    next_conn_id: AtomicU64,
    total_connections: AtomicUsize,
}

impl ServerState {
    pub fn new() -> Self {
        Self {
            clients: DashMap::new(),
            conversations: DashMap::new(),
            profiles: DashMap::new(),
            next_conn_id: AtomicU64::new(1),
            total_connections: AtomicUsize::new(0),
        }
    }

    /// Register a new client connection and return its connection id
    pub fn add_client(
        &self,
        user_id: &str,
        receiver: Option<String>,
        tx: mpsc::UnboundedSender<String>,
    ) -> u64 {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::SeqCst);
        self.total_connections.fetch_add(1, Ordering::SeqCst);
        self.clients
            .entry(user_id.to_string())
            .or_default()
            .push(Client {
                conn_id,
                receiver,
                tx,
            });
        conn_id
    }

    /// Remove one connection. Returns true if it was the user's last one.
    pub fn remove_client(&self, user_id: &str, conn_id: u64) -> bool {
        let Some(mut entry) = self.clients.get_mut(user_id) else {
            return false;
        };
        entry.retain(|client| client.conn_id != conn_id && !client.tx.is_closed());
        if entry.is_empty() {
            drop(entry);
            self.clients.remove(user_id);
            true
        } else {
            false
        }
    }

    /// Broadcast message to all clients except the given user
    pub fn broadcast(&self, message: &str, exclude_user_id: Option<&str>) {
        for entry in self.clients.iter() {
            if Some(entry.key().as_str()) != exclude_user_id {
                for client in entry.value().iter() {
                    let _ = client.tx.send(message.to_string());
                }
            }
        }
    }

    /// Send to every connection of a user. Returns true if any accepted it.
    pub fn send_to_user(&self, user_id: &str, message: &str) -> bool {
        self.send_filtered(user_id, message, |_| true)
    }

    fn send_filtered(&self, user_id: &str, message: &str, filter: impl Fn(&Client) -> bool) -> bool {
        let Some(clients) = self.clients.get(user_id) else {
            return false;
        };
        let mut sent = false;
        for client in clients.iter().filter(|c| filter(*c)) {
            if client.tx.send(message.to_string()).is_ok() {
                sent = true;
            }
        }
        sent
    }

    /// Get list of online user IDs
    pub fn online_users(&self) -> Vec<String> {
        self.clients
            .iter()
            .filter(|e| !e.value().is_empty())
            .map(|e| e.key().clone())
            .collect()
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.connection_count(user_id) > 0
    }

    /// Open connections of a user right now
    pub fn connection_count(&self, user_id: &str) -> usize {
        self.clients.get(user_id).map(|c| c.len()).unwrap_or(0)
    }

    /// Connections accepted since start
    pub fn total_connections(&self) -> usize {
        self.total_connections.load(Ordering::SeqCst)
    }

    pub fn set_profile(&self, user_id: &str, name: Option<String>, image: Option<String>) {
        self.profiles.insert(
            user_id.to_string(),
            UserSnapshot {
                id: user_id.to_string(),
                name,
                image,
            },
        );
    }

    fn snapshot_of(&self, user_id: &str) -> UserSnapshot {
        self.profiles
            .get(user_id)
            .map(|p| p.value().clone())
            .unwrap_or_else(|| UserSnapshot {
                id: user_id.to_string(),
                name: None,
                image: None,
            })
    }

    /// Append a message to the conversation between sender and receiver
    pub fn record_message(&self, sender_id: &str, receiver_id: &str, content: &str) -> StoredMessage {
        let stored = StoredMessage {
            id: uuid::Uuid::new_v4().to_string(),
            sender_id: sender_id.to_string(),
            receiver_id: receiver_id.to_string(),
            content: content.to_string(),
            timestamp: Utc::now(),
        };

        let mut history = self
            .conversations
            .entry(conversation_key(sender_id, receiver_id))
            .or_default();
        if history.len() >= MAX_HISTORY_PER_CONVERSATION {
            history.remove(0);
            info!("History limit reached, dropped oldest message");
        }
        history.push(stored.clone());
        stored
    }

    /// Conversation between `viewer` and `other` as `viewer` sees it
    pub fn history_for(&self, viewer: &str, other: &str) -> Vec<ChatMessage> {
        self.conversations
            .get(&conversation_key(viewer, other))
            .map(|history| history.iter().map(|m| self.view_for(m, viewer)).collect())
            .unwrap_or_default()
    }

    /// Render a stored message for one viewer
    pub fn view_for(&self, message: &StoredMessage, viewer: &str) -> ChatMessage {
        let own = message.sender_id == viewer;
        ChatMessage {
            id: message.id.clone(),
            content: message.content.clone(),
            user: (!own).then(|| self.snapshot_of(&message.sender_id)),
            timestamp: message.timestamp,
            read: false,
            kind: MessageType::User,
            action: None,
            sent_by_current_user: own,
        }
    }

    /// Push a stored message live to the receiver and echo it to the sender
    pub fn deliver(&self, message: &StoredMessage) {
        let mut targets = vec![(&message.receiver_id, &message.sender_id)];
        if message.sender_id != message.receiver_id {
            targets.push((&message.sender_id, &message.receiver_id));
        }

        for (viewer, other) in targets {
            match ServerEvent::Message(self.view_for(message, viewer)).to_frame() {
                Ok(frame) => {
                    self.send_filtered(viewer, &frame, |c| c.wants_conversation_with(other));
                }
                Err(e) => warn!("Failed to serialize message {}: {}", message.id, e),
            }
        }
    }

    /// Push a server notice to every connection of a user
    pub fn push_system_message(
        &self,
        user_id: &str,
        content: &str,
        action: Option<MessageAction>,
    ) -> bool {
        let message = ChatMessage {
            id: uuid::Uuid::new_v4().to_string(),
            content: content.to_string(),
            user: None,
            timestamp: Utc::now(),
            read: false,
            kind: MessageType::System,
            action,
            sent_by_current_user: false,
        };
        match ServerEvent::System(message).to_frame() {
            Ok(frame) => self.send_to_user(user_id, &frame),
            Err(e) => {
                warn!("Failed to serialize system message: {}", e);
                false
            }
        }
    }

    /// Drop every connection of a user from the server side and tell
    /// everyone else the user went offline
    pub fn disconnect_user(&self, user_id: &str) -> usize {
        let dropped = self
            .clients
            .remove(user_id)
            .map(|(_, clients)| clients.len())
            .unwrap_or(0);

        if dropped > 0 {
            info!("Disconnected {} connection(s) of {}", dropped, user_id);
            if let Some(json) = Self::presence_frame(user_id, false) {
                self.broadcast(&json, Some(user_id));
            }
        }
        dropped
    }

    /// Push an arbitrary text frame, well-formed or not
    pub fn push_raw(&self, user_id: &str, frame: &str) -> bool {
        self.send_to_user(user_id, frame)
    }

    pub fn presence_frame(user_id: &str, online: bool) -> Option<String> {
        ServerEvent::Presence(PresenceUpdate {
            user_id: user_id.to_string(),
            online,
        })
        .to_frame()
        .ok()
    }
}

impl Default for ServerState {
    fn default() -> Self {
        Self::new()
    }
}

fn conversation_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}
