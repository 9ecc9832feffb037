//! Outbound frame DTO with garde validation.
//!
//! The chat transport accepts bare `{content, receiver}` objects; this is
//! the only frame the client ever writes.

use garde::Validate;
use serde::Serialize;

/// Validation constants
pub const MAX_MESSAGE_LENGTH: usize = 10000;
pub const MAX_USER_ID_LENGTH: usize = 128;

/// Reject content that is nothing but whitespace
fn validate_not_blank(value: &str, _ctx: &()) -> garde::Result {
    if value.trim().is_empty() {
        return Err(garde::Error::new("Message cannot be blank"));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Validate)]
#[garde(context(()))]
pub struct OutgoingMessage {
    #[garde(length(min = 1, max = MAX_MESSAGE_LENGTH), custom(validate_not_blank))]
    pub content: String,
    #[garde(length(min = 1, max = MAX_USER_ID_LENGTH))]
    pub receiver: String,
}

impl OutgoingMessage {
    /// Build a frame from raw draft text. Content is trimmed first.
    pub fn new(content: &str, receiver: &str) -> Self {
        Self {
            content: content.trim().to_string(),
            receiver: receiver.to_string(),
        }
    }

    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Helper trait to convert garde validation errors to String
pub trait ValidateExt {
    fn validate_input(&self) -> Result<(), String>;
}

impl<T: Validate<Context = ()>> ValidateExt for T {
    fn validate_input(&self) -> Result<(), String> {
        self.validate().map_err(|e| e.to_string())
    }
}
