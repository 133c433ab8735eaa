//! Presence channel abstraction consumed by Tandem sessions.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::EnvError;
use crate::types::{PositionState, PresenceEvent, SubscribeStatus};

/// Where a channel delivers its `sync`/`join`/`leave` events.
///
/// The session drains the receiving half between ticks, so every merge runs
/// on the session's owner and never races a tick.
pub type EventSink = mpsc::UnboundedSender<PresenceEvent>;

/// A pub-sub topic where each subscriber's last announced payload is visible
/// to all others.
///
/// # Implementations
///
/// - **Production**: adapters over a realtime presence backend
/// - **Simulation**: `SimChannel`, an in-memory hub with latency/loss/duplicates
///
/// # Event Flow
///
/// ```text
/// Session A                 Channel                  Session B
///   |-- track(state) --------->|                          |
///   |                          |-- join / sync ---------->|  (sink)
///   |-- unsubscribe() -------->|                          |
///   |                          |-- leave / sync --------->|  (sink)
/// ```
#[async_trait]
pub trait PresenceChannel: Send + Sync + 'static {
    /// Requests a subscription to the channel's topic.
    ///
    /// # Returns
    /// * `Ok(SubscribeStatus::Subscribed)` - the channel is live
    /// * `Ok(other)` - the backend refused or gave up
    /// * `Err(_)` - the request itself failed
    async fn subscribe(&self) -> Result<SubscribeStatus, EnvError>;

    /// Announces local state to all other subscribers.
    ///
    /// Best-effort: `Ok(())` does not mean anyone received it.
    async fn track(&self, state: PositionState) -> Result<(), EnvError>;

    /// Registers the sink that receives this channel's presence events.
    ///
    /// Replaces any previously registered sink.
    fn register(&self, sink: EventSink);

    /// Stops event delivery. Must be called before [`unsubscribe`](Self::unsubscribe)
    /// on teardown so no event lands on a discarded session.
    fn unregister(&self);

    /// Releases the channel. Idempotent.
    fn unsubscribe(&self);

    /// Topic this channel is bound to.
    fn topic(&self) -> &str;
}

/// Opens presence channels, one per session.
pub trait PresenceTransport: Send + Sync {
    type Channel: PresenceChannel;

    /// Opens a fresh channel on `topic`.
    fn open(&self, topic: &str) -> Arc<Self::Channel>;
}
