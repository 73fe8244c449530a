use thiserror::Error;

pub use anyhow::Context;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    #[error(transparent)]
    Chrono(#[from] chrono::ParseError),
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
    #[error("channel '{channel}' is not available at {at}")]
    ChannelUnavailable { channel: String, at: String },
    #[error("decode: {0}")]
    Decode(String),
    #[error("format: {0}")]
    Format(String),
    #[error("invariant violation: {0}")]
    Invariant(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    pub fn message<T: Into<String>>(msg: T) -> Self {
        AppError::Message(msg.into())
    }

    pub fn decode<T: Into<String>>(msg: T) -> Self {
        AppError::Decode(msg.into())
    }

    pub fn invariant<T: Into<String>>(msg: T) -> Self {
        AppError::Invariant(msg.into())
    }
}
