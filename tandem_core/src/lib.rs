//! Tandem Core - Presence-Based Position Replication
//!
//! Keeps every participant's view of a shared 2D scene consistent using only
//! a presence channel: each participant announces its own position, and
//! everyone else mirrors it. This library covers the three pieces that make
//! that work:
//! 1. **Outbound**: local movement is applied every tick but announced at
//!    most once per throttle window ([`throttle`])
//! 2. **Inbound**: sync/join/leave events merge into a keyed set of remote
//!    entities, excluding ourselves ([`replication`])
//! 3. **Display**: remote entities glide toward their last announced
//!    position instead of jumping ([`interpolation`])
//!
//! [`Session`] ties them to a [`tandem_env::PresenceChannel`] and a
//! [`RenderSurface`]; [`SessionHost`] rebuilds sessions on reinitialization.

pub mod config;
pub mod controller;
pub mod error;
pub mod host;
pub mod identity;
pub mod interpolation;
pub mod replication;
pub mod session;
pub mod surface;
pub mod throttle;

#[cfg(test)]
mod testing;

// Re-export key types for convenience
pub use config::{
    IdentityConfig, IdentityStyle, InterpolationConfig, MovementConfig, OverflowPolicy,
    SessionConfig, ThrottleConfig,
};
pub use controller::{ControllerStep, Key, LocalController, LocalEntity};
pub use error::SessionError;
pub use host::{HostedSession, SessionHost};
pub use identity::IdentityProvider;
pub use interpolation::Interpolator;
pub use replication::{MergeOutcome, RemoteEntity, RemoteView, ReplicationEngine};
pub use session::{Session, SessionState, TickReport};
pub use surface::{EntityKind, InputState, RenderSurface};
pub use throttle::{
    AnnounceCounts, Announcer, PublishThrottle, ThrottleDecision, ThrottleState,
    ThrottledAnnouncer,
};
