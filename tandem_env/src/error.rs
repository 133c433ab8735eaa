//! Error types for the Tandem environment abstraction.

use thiserror::Error;

/// Errors that can occur talking to the environment or the presence transport.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Transport send failed (socket closed, rejected payload, etc.)
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Operation requires an active subscription
    #[error("Channel not subscribed: {0}")]
    NotSubscribed(String),
}

impl EnvError {
    /// Creates a network error.
    pub fn network(msg: impl Into<String>) -> Self {
        Self::NetworkError(msg.into())
    }

    /// Creates a not-subscribed error for the given topic.
    pub fn not_subscribed(topic: impl std::fmt::Display) -> Self {
        Self::NotSubscribed(topic.to_string())
    }
}

/// A presence record that could not be read as a position.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecordError {
    #[error("record has no usable `id`")]
    MissingId,

    #[error("record field `{0}` is missing or not a finite number")]
    BadCoordinate(&'static str),
}
