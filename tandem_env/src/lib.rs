//! Tandem Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" seam that lets the Tandem replication
//! core run against a live presence backend (tokio) or the deterministic
//! simulator.
//!
//! # What is abstracted
//!
//! - Time and task spawning (`now()`, `sleep()`, `spawn()`)
//! - Randomness for identities (`random_u64()`)
//! - The presence channel (`subscribe()`, `track()`, sync/join/leave events)
//!
//! # Example
//!
//! ```ignore
//! use tandem_env::{PresenceChannel, TandemContext};
//!
//! async fn announce<Ctx: TandemContext, Ch: PresenceChannel>(ctx: &Ctx, ch: &Ch, state: PositionState) {
//!     tokio::select! {
//!         res = ch.track(state) => log(res),
//!         _ = ctx.sleep(Duration::from_secs(5)) => give_up(),
//!     }
//! }
//! ```

mod context;
mod error;
mod presence;
mod tokio_impl;
mod types;

pub use context::TandemContext;
pub use error::{EnvError, RecordError};
pub use presence::{EventSink, PresenceChannel, PresenceTransport};
pub use tokio_impl::TokioContext;
pub use types::{
    ParticipantId, PositionState, PresenceEvent, PresenceRecord, PresenceSnapshot,
    SubscribeStatus,
};
