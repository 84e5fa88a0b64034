//! Error taxonomy shared across the cluster.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A malformed job or an input kind the splitter cannot handle.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A task record or pending marker that should exist does not.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization failure: {0}")]
    Serialization(String),

    /// Broker connection or publish/consume failure.
    #[error("broker transport failure: {0}")]
    Transport(String),

    #[error("failed to acknowledge delivery for task {0}")]
    AckFailure(String),

    /// No delivery handle is recorded for the task id.
    #[error("unknown delivery tag for task {0}")]
    UnknownTag(String),

    /// The payload binary failed its sanity check.
    #[error("invalid payload binary: {0}")]
    InvalidPayload(String),

    /// The payload binary ran but exited non-zero.
    #[error("payload execution failed: {0}")]
    PayloadFailure(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<prost::DecodeError> for Error {
    fn from(err: prost::DecodeError) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Internal(err.to_string())
    }
}
