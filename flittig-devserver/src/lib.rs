//! Flittig development chat relay
//!
//! Speaks the `/chat` WebSocket protocol the chat client expects. Exposed as
//! a library so client tests can run it in-process.

mod connection;
pub mod protocol;
mod state;

pub use connection::{accept_connection, handle_connection, handle_message, serve, ConnectParams};
pub use protocol::{ChatMessage, ClientFrame, MessageAction, ServerEvent};
pub use state::{ServerState, StoredMessage};
