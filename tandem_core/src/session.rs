//! Session Runtime - wires identity, throttle, replication, interpolation and
//! local control to a presence channel and a render surface.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Session                             │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │              Context: TandemContext                  │   │
//! │  │  • now()   → throttle windows                        │   │
//! │  │  • spawn() → fire-and-forget announcements           │   │
//! │  │  • random_u64() → participant identity               │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! │                              │                              │
//! │  ┌──────────┐ ┌──────────┐ ┌─────────────┐ ┌─────────────┐  │
//! │  │  LOCAL   │ │ THROTTLE │ │ REPLICATION │ │ INTERPOLATE │  │
//! │  │controller│→│ announcer│ │   engine    │→│   remotes   │  │
//! │  └──────────┘ └──────────┘ └─────────────┘ └─────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Lifecycle
//!
//! ```text
//! Uninitialized → IdentityAssigned → ChannelSubscribing → Active → Terminated
//!                        ▲                   │
//!                        └── subscribe fails ┘
//! ```
//!
//! Transport events are queued by the channel and drained at the start of
//! each tick, so every merge happens on the session's owner and is complete
//! before the interpolator reads any target.

use std::sync::Arc;

use tandem_env::{
    ParticipantId, PositionState, PresenceChannel, PresenceEvent, TandemContext,
};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::config::SessionConfig;
use crate::controller::{ControllerStep, LocalController};
use crate::error::SessionError;
use crate::identity::IdentityProvider;
use crate::interpolation::Interpolator;
use crate::replication::{MergeOutcome, ReplicationEngine};
use crate::surface::{EntityKind, RenderSurface};
use crate::throttle::{AnnounceCounts, ThrottledAnnouncer};

/// Lifecycle phase of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    IdentityAssigned,
    ChannelSubscribing,
    Active,
    Terminated,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::IdentityAssigned => "identity_assigned",
            SessionState::ChannelSubscribing => "channel_subscribing",
            SessionState::Active => "active",
            SessionState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// What one tick did.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub tick: u64,
    /// Transport events merged before the tick ran
    pub events_applied: usize,
    pub local: ControllerStep,
    /// A coalesced announcement went out this tick
    pub flushed: bool,
    /// Remote entities the interpolator moved
    pub remote_moved: usize,
}

/// State that only exists while subscribed.
struct Replica<Ctx, Ch>
where
    Ctx: TandemContext,
    Ch: PresenceChannel,
{
    controller: LocalController,
    announcer: ThrottledAnnouncer<Ctx, Ch>,
    engine: ReplicationEngine,
    interpolator: Interpolator,
    events: mpsc::UnboundedReceiver<PresenceEvent>,
}

/// One participant's replication session.
///
/// Generic over the context, the channel and the surface, so the same code
/// runs live or inside the simulator.
pub struct Session<Ctx, Ch, S>
where
    Ctx: TandemContext,
    Ch: PresenceChannel,
    S: RenderSurface,
{
    context: Arc<Ctx>,
    channel: Arc<Ch>,
    config: SessionConfig,
    identity: IdentityProvider,
    state: SessionState,
    participant_id: Option<ParticipantId>,
    surface: Option<S>,
    replica: Option<Replica<Ctx, Ch>>,
    tick_count: u64,
}

impl<Ctx, Ch, S> Session<Ctx, Ch, S>
where
    Ctx: TandemContext,
    Ch: PresenceChannel,
    S: RenderSurface,
{
    /// Creates an uninitialized session.
    pub fn new(context: Arc<Ctx>, channel: Arc<Ch>, config: SessionConfig) -> Self {
        let identity = IdentityProvider::new(config.identity.clone());
        Self {
            context,
            channel,
            config,
            identity,
            state: SessionState::Uninitialized,
            participant_id: None,
            surface: None,
            replica: None,
            tick_count: 0,
        }
    }

    /// Builder form of [`attach_surface`](Self::attach_surface).
    pub fn with_surface(mut self, surface: S) -> Self {
        self.surface = Some(surface);
        self
    }

    /// Attaches the surface to draw into. Only allowed before the session starts.
    pub fn attach_surface(&mut self, surface: S) -> Result<(), SessionError> {
        match self.state {
            SessionState::Uninitialized | SessionState::IdentityAssigned => {
                self.surface = Some(surface);
                Ok(())
            }
            SessionState::Terminated => Err(SessionError::Terminated),
            other => Err(SessionError::SurfaceLocked(other)),
        }
    }

    /// Generates the participant id. Does nothing if one is already assigned.
    pub fn assign_identity(&mut self) -> Result<&ParticipantId, SessionError> {
        if self.state == SessionState::Terminated {
            return Err(SessionError::Terminated);
        }
        let (context, identity, state) = (&self.context, &self.identity, &mut self.state);
        let id = self.participant_id.get_or_insert_with(|| {
            let id = identity.generate(context.as_ref());
            info!(participant = %id, seed = context.seed(), "identity assigned");
            *state = SessionState::IdentityAssigned;
            id
        });
        Ok(id)
    }

    /// Brings the session to `Active`.
    ///
    /// Assigns the identity if needed, places the local entity, registers for
    /// presence events, waits for the subscription and announces the initial
    /// position without throttling. On failure the session is rolled back to
    /// `IdentityAssigned` and `start` may be retried.
    ///
    /// If an earlier `start` future was dropped mid-subscribe, its half-made
    /// subscription is released first.
    pub async fn start(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Terminated => return Err(SessionError::Terminated),
            SessionState::Active => return Ok(()),
            SessionState::ChannelSubscribing => {
                warn!(participant = ?self.participant_id, "releasing abandoned subscription");
                self.abandon_subscription();
            }
            _ => {}
        }

        let id = self.assign_identity()?.clone();
        let Some(surface) = self.surface.as_mut() else {
            warn!(participant = %id, "cannot start session: no render surface");
            return Err(SessionError::SurfaceUnavailable);
        };

        let controller = LocalController::new(id.clone(), &self.config.movement);
        let spawn = controller.state().clone();
        surface.add_entity(&id, EntityKind::Local, spawn.x, spawn.y);

        let (sink, events) = mpsc::unbounded_channel();
        self.channel.register(sink);
        self.state = SessionState::ChannelSubscribing;
        debug!(participant = %id, topic = self.channel.topic(), "subscribing");

        if let Err(e) = self.subscribe().await {
            warn!(participant = %id, error = %e, "subscription failed");
            self.abandon_subscription();
            return Err(e);
        }

        // First announcement bypasses the throttle so peers see us at once
        if let Err(e) = self.channel.track(spawn).await {
            warn!(participant = %id, error = %e, "initial announce failed");
        }

        if let Some(surface) = self.surface.as_mut() {
            surface.attach_input();
        }
        self.replica = Some(Replica {
            controller,
            announcer: ThrottledAnnouncer::new(
                Arc::clone(&self.context),
                Arc::clone(&self.channel),
                &self.config.throttle,
            ),
            engine: ReplicationEngine::new(id.clone()),
            interpolator: Interpolator::new(&self.config.interpolation),
            events,
        });
        self.state = SessionState::Active;
        info!(participant = %id, topic = self.channel.topic(), "session active");
        Ok(())
    }

    /// Undoes a subscription attempt that never reached `Active`: drops the
    /// sink, releases the channel and takes the local entity off the surface.
    fn abandon_subscription(&mut self) {
        self.channel.unregister();
        self.channel.unsubscribe();
        if let (Some(surface), Some(id)) = (self.surface.as_mut(), self.participant_id.as_ref()) {
            surface.remove_entity(id);
        }
        self.state = SessionState::IdentityAssigned;
    }

    async fn subscribe(&self) -> Result<(), SessionError> {
        let timeout = self.config.subscribe_timeout();
        tokio::select! {
            biased;
            result = self.channel.subscribe() => match result {
                Ok(status) if status.is_subscribed() => Ok(()),
                Ok(status) => Err(SessionError::SubscribeRejected(status)),
                Err(e) => Err(SessionError::SubscribeFailed(e)),
            },
            _ = self.context.sleep(timeout) => Err(SessionError::SubscribeTimeout(timeout)),
        }
    }

    /// Merges every queued presence event and mirrors entity creation and
    /// removal into the surface. Returns the number of events applied.
    pub fn pump_events(&mut self) -> Result<usize, SessionError> {
        let state = self.state;
        let replica = self.replica.as_mut().ok_or(SessionError::NotActive(state))?;

        let mut applied = 0;
        while let Ok(event) = replica.events.try_recv() {
            let outcome = replica.engine.apply(&event);
            if let Some(surface) = self.surface.as_mut() {
                mirror(surface, &replica.engine, &outcome);
            }
            applied += 1;
        }
        Ok(applied)
    }

    /// Runs one frame: drain events, move the local entity, smooth remotes.
    pub fn tick(&mut self) -> Result<TickReport, SessionError> {
        let events_applied = self.pump_events()?;

        let state = self.state;
        let replica = self.replica.as_mut().ok_or(SessionError::NotActive(state))?;
        let surface = self.surface.as_mut().ok_or(SessionError::SurfaceUnavailable)?;

        let local = replica.controller.tick(&*surface, &mut replica.announcer);
        if local.moved() {
            let me = replica.controller.state();
            surface.place_entity(&me.id, me.x, me.y);
        }
        let flushed = replica.announcer.flush();

        let remote_moved = replica.interpolator.step(&mut replica.engine);
        for entity in replica.engine.entities() {
            let pos = entity.current();
            surface.place_entity(entity.id(), pos.x, pos.y);
        }

        self.tick_count += 1;
        trace!(
            tick = self.tick_count,
            events = events_applied,
            remotes = replica.engine.len(),
            remote_moved,
            "tick"
        );

        Ok(TickReport {
            tick: self.tick_count,
            events_applied,
            local,
            flushed,
            remote_moved,
        })
    }

    /// Tears the session down and hands back the surface.
    ///
    /// Input is detached and transport events are unregistered before the
    /// subscription is released, so no callback can land on discarded state.
    /// Idempotent; the session cannot be restarted afterwards.
    pub fn terminate(&mut self) -> Option<S> {
        if self.state == SessionState::Terminated {
            return None;
        }

        if let Some(surface) = self.surface.as_mut() {
            surface.detach_input();
        }
        if self.state == SessionState::ChannelSubscribing {
            self.abandon_subscription();
        }

        if let Some(mut replica) = self.replica.take() {
            self.channel.unregister();
            self.channel.unsubscribe();

            let removed = replica.engine.clear();
            if let Some(surface) = self.surface.as_mut() {
                for id in &removed {
                    surface.remove_entity(id);
                }
                surface.remove_entity(&replica.controller.state().id);
            }
            let counts = replica.announcer.stats();
            info!(
                participant = %replica.controller.state().id,
                ticks = self.tick_count,
                announced = counts.fired,
                dropped = counts.dropped,
                "session terminated"
            );
        }

        self.state = SessionState::Terminated;
        self.surface.take()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn participant_id(&self) -> Option<&ParticipantId> {
        self.participant_id.as_ref()
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Remote entity state, while active.
    pub fn engine(&self) -> Option<&ReplicationEngine> {
        self.replica.as_ref().map(|r| &r.engine)
    }

    /// The local entity's state, while active.
    pub fn local_state(&self) -> Option<&PositionState> {
        self.replica.as_ref().map(|r| r.controller.state())
    }

    /// Throttle counters, while active.
    pub fn announce_stats(&self) -> Option<AnnounceCounts> {
        self.replica.as_ref().map(|r| r.announcer.stats())
    }

    pub fn surface(&self) -> Option<&S> {
        self.surface.as_ref()
    }

    pub fn surface_mut(&mut self) -> Option<&mut S> {
        self.surface.as_mut()
    }

    pub fn channel(&self) -> &Arc<Ch> {
        &self.channel
    }
}

impl<Ctx, Ch, S> Drop for Session<Ctx, Ch, S>
where
    Ctx: TandemContext,
    Ch: PresenceChannel,
    S: RenderSurface,
{
    fn drop(&mut self) {
        if self.replica.is_some() || self.state == SessionState::ChannelSubscribing {
            self.channel.unregister();
            self.channel.unsubscribe();
        }
    }
}

fn mirror<S: RenderSurface>(surface: &mut S, engine: &ReplicationEngine, outcome: &MergeOutcome) {
    for id in &outcome.created {
        if let Some(entity) = engine.get(id) {
            let pos = entity.current();
            surface.add_entity(id, EntityKind::Remote, pos.x, pos.y);
        }
    }
    for id in &outcome.removed {
        surface.remove_entity(id);
    }
}
