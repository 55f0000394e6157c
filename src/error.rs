//! Error types for the message store client.

use thiserror::Error;

/// Main error type for client and subscription operations.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MessageDbError {
    #[error("missing stream name")]
    StreamNameRequired,

    #[error("missing type")]
    TypeRequired,

    #[error("missing subscriber id")]
    SubscriberIdRequired,

    #[error("invalid position: {0}")]
    InvalidPosition(i64),

    /// The store rejected a write because the stream moved past the
    /// writer's expected version.
    #[error(
        "version conflict on {stream_name} stream: expected version {}, actual {actual_version}",
        display_version(.expected_version)
    )]
    VersionConflict {
        stream_name: String,
        actual_version: i64,
        expected_version: Option<i64>,
    },

    /// Unclassified store or transport failure, text kept verbatim.
    #[error("{0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("subscription task panicked")]
    TaskPanicked,
}

fn display_version(version: &Option<i64>) -> String {
    match version {
        Some(v) => v.to_string(),
        None => "none".to_string(),
    }
}

impl From<serde_json::Error> for MessageDbError {
    fn from(e: serde_json::Error) -> Self {
        MessageDbError::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for MessageDbError {
    fn from(e: std::io::Error) -> Self {
        MessageDbError::Io(e.to_string())
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, MessageDbError>;
