use thiserror::Error;

/// Errors from the Nostr protocol layer.
#[derive(Debug, Error)]
pub enum NostrError {
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("event id does not match its content")]
    InvalidId,

    #[error("invalid event signature")]
    InvalidSignature,

    #[error("malformed relay message: {0}")]
    Protocol(String),

    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("relay url rejected: {0}")]
    InvalidRelayUrl(String),

    #[error("client is shut down")]
    Closed,

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = NostrError> = std::result::Result<T, E>;
