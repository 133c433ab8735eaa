//! Error types for session lifecycle operations.

use std::time::Duration;
use tandem_env::{EnvError, SubscribeStatus};
use thiserror::Error;

use crate::session::SessionState;

/// Errors surfaced by [`Session`](crate::Session) and [`SessionHost`](crate::SessionHost).
#[derive(Debug, Error)]
pub enum SessionError {
    /// No render surface attached yet; `start` can be retried once one is.
    #[error("No render surface attached")]
    SurfaceUnavailable,

    /// Transport answered the subscription with a non-success status.
    #[error("Subscription rejected: {0}")]
    SubscribeRejected(SubscribeStatus),

    /// The subscription request itself failed.
    #[error("Subscription failed: {0}")]
    SubscribeFailed(#[source] EnvError),

    /// No answer from the transport in time.
    #[error("Subscription timed out after {0:?}")]
    SubscribeTimeout(Duration),

    /// Operation needs an active session.
    #[error("Session not active (state: {0})")]
    NotActive(SessionState),

    /// The surface can only be swapped before the session starts.
    #[error("Surface cannot be replaced while {0}")]
    SurfaceLocked(SessionState),

    /// Sessions are not resumable; build a new one.
    #[error("Session already terminated")]
    Terminated,
}

impl SessionError {
    /// True when the session stayed at or before `IdentityAssigned` and
    /// `start` may simply be called again.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SessionError::SurfaceUnavailable
                | SessionError::SubscribeRejected(_)
                | SessionError::SubscribeFailed(_)
                | SessionError::SubscribeTimeout(_)
        )
    }
}
