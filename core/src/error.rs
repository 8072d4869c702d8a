use thiserror::Error;

use crate::types::{EntityId, SimTime};

#[derive(Error, Debug)]
pub enum ControlError {
    #[error("Connection error on {addr}: {source}")]
    Connection {
        addr:   String,
        #[source]
        source: std::io::Error,
    },

    #[error("Channel is closed")]
    ChannelClosed,

    #[error("Invalid command: {reason}")]
    InvalidCommand { reason: String },

    #[error("Unknown entity '{entity_id}' in subscription '{subscription}': {reason}")]
    UnknownEntity {
        subscription: String,
        entity_id:    EntityId,
        reason:       String,
    },

    #[error("Protocol error: expected {expected}, got {actual}")]
    Protocol { expected: String, actual: String },

    #[error("Step time went backwards: {previous} -> {current}")]
    TimeRegression { previous: SimTime, current: SimTime },

    #[error("Engine rejected request: {message}")]
    Rejected { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ControlError {
    /// Fatal errors end the session. Everything else is contained to the
    /// step or command that raised it.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            ControlError::InvalidCommand { .. }
                | ControlError::UnknownEntity { .. }
                | ControlError::Rejected { .. }
        )
    }

    pub(crate) fn connection(addr: impl Into<String>, source: std::io::Error) -> Self {
        ControlError::Connection { addr: addr.into(), source }
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        ControlError::InvalidCommand { reason: reason.into() }
    }

    pub(crate) fn protocol(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        ControlError::Protocol {
            expected: expected.into(),
            actual:   actual.into(),
        }
    }
}

pub type ControlResult<T> = Result<T, ControlError>;
