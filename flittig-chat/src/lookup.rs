use std::time::Duration;

use tracing::{debug, warn};

use crate::config::ChatConfig;
use crate::error::{ChatError, Result};
use crate::models::{Receiver, UserResponse};

const FETCH_TIMEOUT_SECS: u64 = 10;

/// Resolves a counterpart id to its display identity via the REST API.
#[derive(Debug, Clone)]
pub struct UserLookup {
    client: reqwest::Client,
    config: ChatConfig,
}

impl UserLookup {
    pub fn new(config: ChatConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
            .build()?;

        Ok(Self { client, config })
    }

    /// `GET /users/{id}` with the session's bearer token.
    pub async fn fetch_user(&self, token: &str, user_id: &str) -> Result<Receiver> {
        let url = self.config.user_endpoint(user_id)?;
        debug!(user_id = %user_id, "Looking up chat counterpart");

        let response = self.client.get(url).bearer_auth(token).send().await?;

        let status = response.status();
        if !status.is_success() {
            warn!(user_id = %user_id, status = %status, "User lookup rejected");
            return Err(ChatError::Lookup {
                status: status.as_u16(),
            });
        }

        let body: UserResponse = response.json().await?;
        Ok(body.user)
    }
}
