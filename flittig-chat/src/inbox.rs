//! App-wide new-message notifications.
//!
//! An [`InboxWatcher`] is its own connection with its own list. It shares
//! nothing with any [`crate::ChatSessionManager`] that may be open for the
//! same user.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::ChatConfig;
use crate::connection::{spawn_connection, ConnectionHandle, ConnectionListener, LiveCounter};
use crate::models::{Message, MessageKind, SystemAction};
use crate::protocol::{decode_frame, InboundEvent};
use crate::session::ConnectionState;
use crate::utils::{non_empty, preview, truncate_chars};

const NOTIFICATION_CHANNEL_CAPACITY: usize = 64;
const PREVIEW_CHARS: usize = 80;
/// Most recent messages kept by a watcher; older ones are dropped
pub const MAX_RECEIVED: usize = 200;

/// Something worth a toast.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub message_id: String,
    pub sender_id: Option<String>,
    pub sender_name: Option<String>,
    pub preview: String,
    pub kind: MessageKind,
    pub action: Option<SystemAction>,
}

impl Notification {
    fn from_message(message: &Message) -> Self {
        Self {
            message_id: message.id.clone(),
            sender_id: message.user.as_ref().map(|u| u.id.clone()),
            sender_name: message.sender_name().map(str::to_string),
            preview: truncate_chars(&message.content, PREVIEW_CHARS),
            kind: message.kind,
            action: message.action.clone(),
        }
    }
}

struct Inner {
    generation: u64,
    connection: ConnectionState,
    received: Vec<Message>,
}

struct Shared {
    inner: Mutex<Inner>,
    notifications: broadcast::Sender<Notification>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

struct InboxListener {
    shared: Arc<Shared>,
    generation: u64,
}

impl InboxListener {
    fn set_connection(&self, state: ConnectionState) {
        let mut inner = self.shared.lock();
        if inner.generation == self.generation {
            inner.connection = state;
        }
    }
}

impl ConnectionListener for InboxListener {
    fn on_open(&self) {
        self.set_connection(ConnectionState::Open);
    }

    fn on_frame(&self, text: &str) {
        let message = match decode_frame(text) {
            Ok(InboundEvent::Message(message)) | Ok(InboundEvent::System(message)) => message,
            Ok(InboundEvent::Unknown(event)) => {
                warn!(event = %event, "Ignoring unknown chat event");
                return;
            }
            Ok(_) => return,
            Err(e) => {
                warn!(error = %e, preview = %preview(text), "Dropping malformed frame");
                return;
            }
        };

        if message.sent_by_current_user {
            return;
        }

        let notification = Notification::from_message(&message);
        {
            let mut inner = self.shared.lock();
            if inner.generation != self.generation {
                return;
            }
            inner.received.push(message);
            if inner.received.len() > MAX_RECEIVED {
                let excess = inner.received.len() - MAX_RECEIVED;
                inner.received.drain(..excess);
            }
        }

        debug!(message_id = %notification.message_id, "New message notification");
        let _ = self.shared.notifications.send(notification);
    }

    fn on_closed(&self) {
        self.set_connection(ConnectionState::Closed);
    }
}

/// Watches every conversation of the token's user for incoming messages.
pub struct InboxWatcher {
    config: ChatConfig,
    shared: Arc<Shared>,
    token: Option<String>,
    connection: Option<ConnectionHandle>,
    closing: Option<JoinHandle<()>>,
    counter: LiveCounter,
}

impl InboxWatcher {
    pub fn new(config: ChatConfig) -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CHANNEL_CAPACITY);
        Self {
            config,
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    generation: 0,
                    connection: ConnectionState::Idle,
                    received: Vec::new(),
                }),
                notifications,
            }),
            token: None,
            connection: None,
            closing: None,
            counter: LiveCounter::default(),
        }
    }

    /// Switch to another token, or go idle with `None`.
    pub fn set_token(&mut self, token: Option<&str>) {
        let token = non_empty(token);
        if token == self.token {
            return;
        }

        self.teardown(ConnectionState::Idle);
        self.token = token;

        let Some(token) = self.token.as_deref() else {
            return;
        };

        let url = match self.config.chat_endpoint(token, None) {
            Ok(url) => url,
            Err(e) => {
                error!(error = %e, "Cannot build chat endpoint");
                self.shared.lock().connection = ConnectionState::Closed;
                return;
            }
        };

        let generation = {
            let mut inner = self.shared.lock();
            inner.connection = ConnectionState::Connecting;
            inner.generation
        };
        info!(generation, "Opening inbox connection");

        let listener = InboxListener {
            shared: self.shared.clone(),
            generation,
        };
        self.connection = Some(spawn_connection(
            url,
            self.closing.take(),
            self.counter.clone(),
            listener,
        ));
    }

    pub fn close(&mut self) {
        self.token = None;
        self.teardown(ConnectionState::Closed);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.shared.notifications.subscribe()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.shared.lock().connection
    }

    /// The last [`MAX_RECEIVED`] messages this watcher has seen since it
    /// last (re)connected, oldest first.
    pub fn received(&self) -> Vec<Message> {
        self.shared.lock().received.clone()
    }

    fn teardown(&mut self, state: ConnectionState) {
        if let Some(connection) = self.connection.take() {
            self.closing = Some(connection.close());
        }

        let mut inner = self.shared.lock();
        inner.generation += 1;
        inner.connection = state;
        inner.received.clear();
    }
}

impl Drop for InboxWatcher {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            drop(connection.close());
        }
    }
}
