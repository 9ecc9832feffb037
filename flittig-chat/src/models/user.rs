use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::ChatConfig;

/// The other participant of a conversation, as returned by the user lookup.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Receiver {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
}

impl Receiver {
    /// Name if set, otherwise the email address.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.email)
    }

    pub fn image_url(&self, config: &ChatConfig) -> Option<Url> {
        self.image
            .as_deref()
            .and_then(|image| config.asset(image).ok())
    }
}

/// Body of `GET /users/{id}`
#[derive(Debug, Deserialize)]
pub(crate) struct UserResponse {
    pub user: Receiver,
}
