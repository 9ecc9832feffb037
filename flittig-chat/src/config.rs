//! Base addresses the chat client talks to.
//!
//! Everything is injected through [`ChatConfig`]; nothing below reads the
//! environment except [`ChatConfig::from_env`].

use tracing::info;
use url::Url;

use crate::error::{ChatError, Result};

const DEFAULT_CHAT_URL: &str = "ws://localhost:9001";
const DEFAULT_API_URL: &str = "http://localhost:3000";
const DEFAULT_ASSET_URL: &str = "http://localhost:3000";

/// Path of the chat transport endpoint, relative to the chat base URL.
pub const CHAT_PATH: &str = "chat";

#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Base of the WebSocket transport (`ws://` or `wss://`)
    pub chat_url: Url,
    /// Base of the REST API used for user lookups
    pub api_url: Url,
    /// Base for relative avatar/image references
    pub asset_url: Url,
}

impl ChatConfig {
    pub fn new(chat_url: &str, api_url: &str, asset_url: &str) -> Result<Self> {
        let chat_url = Url::parse(chat_url)?;
        if !matches!(chat_url.scheme(), "ws" | "wss") {
            return Err(ChatError::Config(format!(
                "chat url must use ws:// or wss://, got {}",
                chat_url.scheme()
            )));
        }

        Ok(Self {
            chat_url,
            api_url: Url::parse(api_url)?,
            asset_url: Url::parse(asset_url)?,
        })
    }

    /// Load `.env` (if present) and read `FLITTIG_CHAT_URL`, `FLITTIG_API_URL`
    /// and `FLITTIG_ASSET_URL`, falling back to local defaults.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let chat_url =
            std::env::var("FLITTIG_CHAT_URL").unwrap_or_else(|_| DEFAULT_CHAT_URL.to_string());
        let api_url =
            std::env::var("FLITTIG_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        let asset_url =
            std::env::var("FLITTIG_ASSET_URL").unwrap_or_else(|_| DEFAULT_ASSET_URL.to_string());

        info!(chat = %chat_url, api = %api_url, assets = %asset_url, "Loaded chat configuration");

        Self::new(&chat_url, &api_url, &asset_url)
    }

    /// Transport address for a session: `{chat_url}/chat?token=..[&receiver=..]`
    pub fn chat_endpoint(&self, token: &str, receiver: Option<&str>) -> Result<Url> {
        let mut url = join_path(&self.chat_url, &[CHAT_PATH])?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("token", token);
            if let Some(receiver) = receiver {
                query.append_pair("receiver", receiver);
            }
        }
        Ok(url)
    }

    /// `GET {api_url}/users/{id}`
    pub fn user_endpoint(&self, user_id: &str) -> Result<Url> {
        join_path(&self.api_url, &["users", user_id])
    }

    /// Resolve an image reference. Absolute http(s) references pass through,
    /// anything else is taken relative to the asset base.
    pub fn asset(&self, reference: &str) -> Result<Url> {
        match Url::parse(reference) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(url),
            _ => {
                let segments: Vec<&str> = reference.split('/').filter(|s| !s.is_empty()).collect();
                join_path(&self.asset_url, &segments)
            }
        }
    }
}

/// Append percent-encoded segments to a base URL, keeping any base path.
fn join_path(base: &Url, segments: &[&str]) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| ChatError::Config(format!("{} cannot be a base url", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}
