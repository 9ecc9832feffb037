pub mod input;
mod message;
mod user;

pub use message::{Message, MessageKind, MessageSide, Sender, SystemAction};
pub(crate) use user::UserResponse;
pub use user::Receiver;
