mod manager;
pub mod state;

pub use manager::ChatSessionManager;
pub use state::{ConnectionState, Presence, SessionState, SessionUpdate};
