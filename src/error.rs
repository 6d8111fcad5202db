use thiserror::Error;

#[derive(Error, Debug)]
pub enum SwarmError {
    #[error("node at {addr} unreachable: {reason}")]
    NodeUnreachable { addr: String, reason: String },

    #[error("service rejected: {0}")]
    ServiceRejected(String),

    #[error("platform error: {0}")]
    Platform(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("malformed platform response: {0}")]
    InvalidResponse(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("deadline exceeded while {0}")]
    DeadlineExceeded(String),
}

pub type Result<T> = std::result::Result<T, SwarmError>;
