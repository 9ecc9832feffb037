//! Real-time chat client for the Flittig marketplace.
//!
//! [`ChatSessionManager`] owns the live channel for one conversation,
//! [`InboxWatcher`] listens across all of a user's conversations for
//! notifications. Both speak the `{event, data}` protocol in [`protocol`].

pub mod config;
mod connection;
pub mod error;
pub mod inbox;
pub mod logging;
pub mod lookup;
pub mod models;
pub mod protocol;
pub mod session;
mod utils;

pub use config::ChatConfig;
pub use error::{ChatError, ProtocolError, Result};
pub use inbox::{InboxWatcher, Notification};
pub use lookup::UserLookup;
pub use models::{Message, MessageKind, MessageSide, Receiver, Sender, SystemAction};
pub use protocol::InboundEvent;
pub use session::{ChatSessionManager, ConnectionState, Presence, SessionState, SessionUpdate};
