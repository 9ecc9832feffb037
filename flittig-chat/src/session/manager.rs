use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::state::{ConnectionState, Presence, SessionState, SessionUpdate};
use crate::config::ChatConfig;
use crate::connection::{spawn_connection, ConnectionHandle, ConnectionListener, LiveCounter};
use crate::error::Result;
use crate::lookup::UserLookup;
use crate::models::{Message, Receiver};
use crate::utils::non_empty;

const UPDATE_CHANNEL_CAPACITY: usize = 256;

struct Inner {
    /// Bumped on every teardown; callbacks from older connections are ignored
    generation: u64,
    state: SessionState,
}

/// State shared between the manager and its connection/lookup tasks.
struct Shared {
    inner: Mutex<Inner>,
    updates: broadcast::Sender<SessionUpdate>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, update: SessionUpdate) {
        // No subscribers is fine
        let _ = self.updates.send(update);
    }

    /// Run `f` against the state if `generation` is still current.
    fn update<F>(&self, generation: u64, f: F)
    where
        F: FnOnce(&mut SessionState) -> Option<SessionUpdate>,
    {
        let update = {
            let mut inner = self.lock();
            if inner.generation != generation {
                debug!(generation, current = inner.generation, "Dropping event from stale session");
                return;
            }
            f(&mut inner.state)
        };

        if let Some(update) = update {
            self.publish(update);
        }
    }
}

struct SessionListener {
    shared: Arc<Shared>,
    generation: u64,
}

impl ConnectionListener for SessionListener {
    fn on_open(&self) {
        self.shared.update(self.generation, |state| {
            state.connection = ConnectionState::Open;
            Some(SessionUpdate::Connection(ConnectionState::Open))
        });
    }

    fn on_frame(&self, text: &str) {
        self.shared
            .update(self.generation, |state| state.handle_frame(text));
    }

    fn on_closed(&self) {
        self.shared.update(self.generation, |state| {
            state.connection = ConnectionState::Closed;
            Some(SessionUpdate::Connection(ConnectionState::Closed))
        });
    }
}

/// Owns the live chat channel for one `(token, counterpart)` pair.
///
/// Changing either input tears the current transport down before a new one
/// is opened. An unclean close is reported as [`ConnectionState::Closed`] and
/// is not retried; call [`ChatSessionManager::set_inputs`] again to rebuild.
///
/// Must be used from within a tokio runtime.
pub struct ChatSessionManager {
    config: ChatConfig,
    lookup: UserLookup,
    shared: Arc<Shared>,
    token: Option<String>,
    counterpart_id: Option<String>,
    connection: Option<ConnectionHandle>,
    /// Task of the last closed connection, awaited by the next one
    closing: Option<JoinHandle<()>>,
    lookup_task: Option<JoinHandle<()>>,
    counter: LiveCounter,
}

impl ChatSessionManager {
    pub fn new(config: ChatConfig) -> Result<Self> {
        let lookup = UserLookup::new(config.clone())?;
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);

        Ok(Self {
            config,
            lookup,
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    generation: 0,
                    state: SessionState::new(None),
                }),
                updates,
            }),
            token: None,
            counterpart_id: None,
            connection: None,
            closing: None,
            lookup_task: None,
            counter: LiveCounter::default(),
        })
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    /// Point the session at a token and counterpart. Blank strings count as
    /// missing; other values are used exactly as given. Same inputs as before
    /// are a no-op.
    pub fn set_inputs(&mut self, token: Option<&str>, counterpart_id: Option<&str>) {
        let token = non_empty(token);
        let counterpart_id = non_empty(counterpart_id);

        if token == self.token && counterpart_id == self.counterpart_id {
            return;
        }

        self.teardown(counterpart_id.clone(), ConnectionState::Idle);
        self.token = token;
        self.counterpart_id = counterpart_id;

        let (Some(token), Some(counterpart_id)) = (self.token.clone(), self.counterpart_id.clone())
        else {
            debug!("Chat session idle, missing token or counterpart");
            return;
        };

        self.open(&token, &counterpart_id);
        self.spawn_lookup(token, counterpart_id);
    }

    /// Close the transport. Safe to call any number of times.
    pub fn close(&mut self) {
        if self.token.is_none() && self.counterpart_id.is_none() && self.connection.is_none() {
            return;
        }
        self.token = None;
        let counterpart_id = self.counterpart_id.take();
        self.teardown(counterpart_id, ConnectionState::Closed);
    }

    /// Send `text` to the counterpart. Nothing is emitted, and the draft is
    /// left alone, unless the transport is open, a counterpart is set and the
    /// trimmed text is non-empty. The message shows up in the list only once
    /// the server echoes it back.
    pub fn send(&self, text: &str) -> bool {
        let Some(connection) = self.connection.as_ref() else {
            debug!("Send ignored, no transport");
            return false;
        };

        let mut inner = self.shared.lock();
        if inner.state.connection != ConnectionState::Open {
            debug!(state = ?inner.state.connection, "Send ignored, transport not open");
            return false;
        }

        let Some(outgoing) = inner.state.outgoing(text) else {
            return false;
        };

        let frame = match outgoing.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                error!(error = %e, "Failed to serialize outgoing message");
                return false;
            }
        };

        if !connection.send(frame) {
            warn!("Send failed, connection task has stopped");
            return false;
        }

        inner.state.clear_draft();
        true
    }

    /// Send whatever is in the draft buffer.
    pub fn send_draft(&self) -> bool {
        let draft = self.draft();
        self.send(&draft)
    }

    pub fn set_draft(&self, text: impl Into<String>) {
        self.shared.lock().state.set_draft(text);
    }

    pub fn draft(&self) -> String {
        self.shared.lock().state.draft().to_string()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.shared.lock().state.connection()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.shared.lock().state.messages().to_vec()
    }

    pub fn presence(&self) -> Presence {
        self.shared.lock().state.presence()
    }

    pub fn counterpart(&self) -> Option<Receiver> {
        self.shared.lock().state.counterpart().cloned()
    }

    pub fn counterpart_id(&self) -> Option<&str> {
        self.counterpart_id.as_deref()
    }

    /// Copy of the whole session state.
    pub fn snapshot(&self) -> SessionState {
        self.shared.lock().state.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.shared.updates.subscribe()
    }

    /// Sockets this manager currently holds open, and the most it ever held
    /// at once.
    pub fn transport_counts(&self) -> (usize, usize) {
        (self.counter.live(), self.counter.peak())
    }

    fn open(&mut self, token: &str, counterpart_id: &str) {
        let url = match self.config.chat_endpoint(token, Some(counterpart_id)) {
            Ok(url) => url,
            Err(e) => {
                error!(error = %e, "Cannot build chat endpoint");
                self.set_connection(ConnectionState::Closed);
                return;
            }
        };

        let generation = self.set_connection(ConnectionState::Connecting);
        info!(counterpart = %counterpart_id, generation, "Opening chat session");

        let listener = SessionListener {
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

    fn spawn_lookup(&mut self, token: String, counterpart_id: String) {
        let lookup = self.lookup.clone();
        let shared = self.shared.clone();
        let generation = shared.lock().generation;

        self.lookup_task = Some(tokio::spawn(async move {
            match lookup.fetch_user(&token, &counterpart_id).await {
                Ok(receiver) => shared.update(generation, |state| {
                    state.counterpart = Some(receiver.clone());
                    Some(SessionUpdate::Counterpart(receiver))
                }),
                Err(e) => {
                    warn!(error = %e, counterpart = %counterpart_id, "Could not resolve chat counterpart");
                }
            }
        }));
    }

    /// Close the current transport, cancel the lookup and start a fresh,
    /// empty session in `state`.
    fn teardown(&mut self, counterpart_id: Option<String>, state: ConnectionState) {
        if let Some(connection) = self.connection.take() {
            info!("Closing chat transport");
            self.closing = Some(connection.close());
        }
        if let Some(task) = self.lookup_task.take() {
            task.abort();
        }

        {
            let mut inner = self.shared.lock();
            inner.generation += 1;
            inner.state = SessionState::new(counterpart_id);
            inner.state.connection = state;
        }
        self.shared.publish(SessionUpdate::Connection(state));
    }

    fn set_connection(&self, state: ConnectionState) -> u64 {
        let generation = {
            let mut inner = self.shared.lock();
            inner.state.connection = state;
            inner.generation
        };
        self.shared.publish(SessionUpdate::Connection(state));
        generation
    }
}

impl Drop for ChatSessionManager {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            drop(connection.close());
        }
        if let Some(task) = self.lookup_task.take() {
            task.abort();
        }
    }
}
