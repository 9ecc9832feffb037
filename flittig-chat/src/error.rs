use thiserror::Error;

pub type Result<T> = std::result::Result<T, ChatError>;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("user lookup failed with status {status}")]
    Lookup { status: u16 },

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Reasons an inbound frame could not be decoded.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("frame has no `event` field")]
    MissingEvent,

    #[error("unexpected payload for `{event}`: {source}")]
    BadPayload {
        event: String,
        #[source]
        source: serde_json::Error,
    },
}
