//! SimWorld - The simulation harness container.

use crate::context::SimContext;
use crate::exporter::{ObserverFrame, ParticipantPosition, SimEvent, SimFrame};
use crate::hub::{SimHub, SimHubConfig};
use crate::script::InputScript;
use crate::surface::HeadlessSurface;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tandem_core::{AnnounceCounts, HostedSession, SessionConfig, SessionError, SessionHost};
use tandem_env::{ParticipantId, PositionState, TandemContext};
use tracing::{debug, info, warn};

/// Session host as run by the simulator.
pub type SimHost = SessionHost<SimContext, SimHub, HeadlessSurface>;

/// Session as run by the simulator.
pub type SimSession = HostedSession<SimContext, SimHub, HeadlessSurface>;

/// Configuration for a simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Master seed for determinism
    pub seed: u64,

    /// Number of participants to spawn
    pub participants: usize,

    /// Tick rate in Hz
    pub tick_rate_hz: u32,

    /// Active (moving) phase duration in seconds
    pub duration_secs: f64,

    /// Idle phase after movement stops, for events to land and views to settle
    pub settle_secs: f64,

    /// Random-walk direction hold range, in ticks
    pub min_hold_ticks: u32,
    pub max_hold_ticks: u32,

    /// Presence hub fault injection
    pub hub: SimHubConfig,

    /// Per-participant session settings
    pub session: SessionConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            participants: 4,
            tick_rate_hz: 30,
            duration_secs: 10.0,
            settle_secs: 3.0,
            min_hold_ticks: 5,
            max_hold_ticks: 30,
            hub: SimHubConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl SimConfig {
    /// Length of one tick.
    pub fn dt(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate_hz.max(1) as f64)
    }

    pub fn active_ticks(&self) -> u64 {
        (self.duration_secs * self.tick_rate_hz as f64) as u64
    }

    pub fn settle_ticks(&self) -> u64 {
        (self.settle_secs * self.tick_rate_hz as f64) as u64
    }
}

/// One simulated participant.
pub struct Participant {
    index: usize,
    host: SimHost,
    script: InputScript,
    active: bool,
}

impl Participant {
    pub fn index(&self) -> usize {
        self.index
    }

    /// True while the participant has a running session.
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn session(&self) -> Option<&SimSession> {
        self.host.session()
    }

    pub fn id(&self) -> Option<&ParticipantId> {
        self.session().and_then(|s| s.participant_id())
    }

    pub fn local_state(&self) -> Option<&PositionState> {
        self.session().and_then(|s| s.local_state())
    }

    pub fn generation(&self) -> u32 {
        self.host.generation()
    }
}

/// Consistency check of every active observer against the hub.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Participants with a running session
    pub active: usize,

    /// Participants the hub currently holds a record for
    pub published: usize,

    /// Largest distance between an observer's drawn position of a peer and
    /// that peer's published record
    pub max_view_error: f64,

    /// Largest distance between a participant's true position and its
    /// published record
    pub max_staleness: f64,

    /// Published peers an observer does not know about
    pub missing: usize,

    /// Remote entities for participants that are no longer active
    pub ghosts: usize,
}

/// The SimWorld - container for the entire simulation.
pub struct SimWorld {
    /// Configuration
    pub config: SimConfig,

    /// Shared simulation context (virtual clock)
    context: Arc<SimContext>,

    /// In-memory presence backend
    hub: Arc<SimHub>,

    participants: Vec<Participant>,

    /// Announce counters of sessions already torn down
    retired: AnnounceCounts,

    /// Events recorded since the last frame
    events: Vec<SimEvent>,

    reinitializations: u64,
    tick_errors: u64,

    /// Current tick count
    tick_count: u64,
}

impl SimWorld {
    /// Creates a new SimWorld with the given configuration.
    pub fn new(config: SimConfig) -> Self {
        // Derive separate seeds for different subsystems
        let context_seed = config.seed;
        let hub_seed = config.seed.wrapping_mul(0x9e3779b97f4a7c15);

        let context = SimContext::shared(context_seed);
        let hub = Arc::new(SimHub::new(context.clone(), config.hub.clone(), hub_seed));

        Self {
            config,
            context,
            hub,
            participants: Vec::new(),
            retired: AnnounceCounts::default(),
            events: Vec::new(),
            reinitializations: 0,
            tick_errors: 0,
            tick_count: 0,
        }
    }

    pub fn context(&self) -> &Arc<SimContext> {
        &self.context
    }

    pub fn hub(&self) -> &SimHub {
        &self.hub
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn time_secs(&self) -> f64 {
        self.context.now().as_secs_f64()
    }

    pub fn reinitializations(&self) -> u64 {
        self.reinitializations
    }

    pub fn tick_errors(&self) -> u64 {
        self.tick_errors
    }

    /// Spawns the configured number of participants.
    pub async fn spawn_participants(&mut self) -> Result<(), SessionError> {
        for _ in 0..self.config.participants {
            self.add_participant().await?;
        }
        Ok(())
    }

    /// Adds one participant and starts its session. The participant is kept
    /// (inactive) even if the start fails.
    pub async fn add_participant(&mut self) -> Result<usize, SessionError> {
        let index = self.participants.len();
        let script_seed = self.config.seed.wrapping_mul(0x517cc1b727220a95) ^ index as u64;
        let script = InputScript::random_walk(
            script_seed,
            self.config.min_hold_ticks,
            self.config.max_hold_ticks,
        );

        let mut host = SessionHost::new(
            self.context.clone(),
            self.hub.clone(),
            self.config.session.clone(),
        );
        let result = host.start(HeadlessSurface::new()).await;
        let active = result.is_ok();

        self.participants.push(Participant {
            index,
            host,
            script,
            active,
        });

        match result {
            Ok(()) => {
                let id = self.participants[index].id().cloned();
                info!(index, id = ?id, "participant joined");
                self.events.push(SimEvent::info(format!("participant {} joined", index)));
                Ok(index)
            }
            Err(e) => {
                warn!(index, error = %e, "participant failed to start");
                Err(e)
            }
        }
    }

    /// Gives every participant the same script.
    pub fn set_all_scripts(&mut self, script: InputScript) {
        for p in &mut self.participants {
            p.script = script.clone();
        }
    }

    /// Stops all input.
    pub fn release_all(&mut self) {
        self.set_all_scripts(InputScript::idle());
    }

    /// Advances simulation by one tick.
    ///
    /// Order: clock, hub delivery, every session's tick, then spawned
    /// announce tasks. Returns the number of events delivered.
    pub async fn step(&mut self) -> usize {
        self.context.advance_time(self.config.dt());
        let delivered = self.hub.deliver(self.context.now());

        for p in self.participants.iter_mut().filter(|p| p.active) {
            let keys = p.script.next_keys();
            let Some(session) = p.host.session_mut() else {
                continue;
            };
            if let Some(surface) = session.surface_mut() {
                surface.set_held(keys);
            }
            if let Err(e) = session.tick() {
                self.tick_errors += 1;
                warn!(index = p.index, error = %e, "tick failed");
            }
        }

        self.context.run_pending().await;
        self.tick_count += 1;
        delivered
    }

    /// Steps `ticks` times.
    pub async fn run_ticks(&mut self, ticks: u64) {
        for _ in 0..ticks {
            self.step().await;
        }
    }

    /// Steps until the hub has nothing in flight, at most `max_ticks` times.
    /// Returns true if it drained.
    pub async fn drain(&mut self, max_ticks: u64) -> bool {
        for _ in 0..max_ticks {
            if self.hub.in_flight() == 0 {
                return true;
            }
            self.step().await;
        }
        self.hub.in_flight() == 0
    }

    /// Tears down a participant's session and starts a new one with a new identity.
    pub async fn reinitialize(&mut self, index: usize) -> Result<(), SessionError> {
        let Some(p) = self.participants.get_mut(index) else {
            return Ok(());
        };
        if let Some(counts) = p.session().and_then(|s| s.announce_stats()) {
            add_counts(&mut self.retired, counts);
        }
        let old = p.id().cloned();

        let result = p.host.reinitialize().await;
        p.active = result.is_ok();
        self.reinitializations += 1;

        let new = p.id().cloned();
        debug!(index, old = ?old, new = ?new, "participant reinitialized");
        self.events.push(SimEvent::info(format!("participant {} reinitialized", index)));
        result
    }

    /// Removes a participant for good.
    pub fn depart(&mut self, index: usize) {
        let Some(p) = self.participants.get_mut(index) else {
            return;
        };
        if let Some(counts) = p.session().and_then(|s| s.announce_stats()) {
            add_counts(&mut self.retired, counts);
        }
        p.host.shutdown();
        p.active = false;
        info!(index, "participant departed");
        self.events.push(SimEvent::info(format!("participant {} departed", index)));
    }

    /// Announce counters summed over every session this world has run.
    pub fn announce_totals(&self) -> AnnounceCounts {
        let mut total = self.retired;
        for p in &self.participants {
            if let Some(counts) = p.session().and_then(|s| s.announce_stats()) {
                add_counts(&mut total, counts);
            }
        }
        total
    }

    /// Compares every active observer's view with the hub's published records.
    pub fn observe(&self) -> Observation {
        let published = self.hub.published(&self.config.session.topic);
        let active: Vec<&SimSession> = self
            .participants
            .iter()
            .filter(|p| p.active)
            .filter_map(|p| p.session())
            .collect();
        let active_ids: BTreeSet<&ParticipantId> =
            active.iter().filter_map(|s| s.participant_id()).collect();

        let mut obs = Observation {
            active: active.len(),
            published: published.len(),
            ..Observation::default()
        };

        for session in &active {
            let (Some(me), Some(engine)) = (session.participant_id(), session.engine()) else {
                continue;
            };

            for (id, record) in &published {
                if id == me || !active_ids.contains(id) {
                    continue;
                }
                match engine.get(id) {
                    Some(entity) => {
                        obs.max_view_error = obs.max_view_error.max(entity.current().distance_to(record));
                    }
                    None => obs.missing += 1,
                }
            }

            obs.ghosts += engine.entities().filter(|e| !active_ids.contains(e.id())).count();

            if let (Some(local), Some(record)) = (session.local_state(), published.get(me)) {
                obs.max_staleness = obs.max_staleness.max(local.distance_to(record));
            }
        }

        obs
    }

    /// Captures the current state for export. Clears the pending event list.
    pub fn frame(&mut self) -> SimFrame {
        let mut participants = Vec::new();
        let mut views = Vec::new();

        for p in self.participants.iter().filter(|p| p.active) {
            let (Some(local), Some(session)) = (p.local_state(), p.session()) else {
                continue;
            };
            participants.push(ParticipantPosition {
                id: local.id.to_string(),
                x: local.x,
                y: local.y,
            });
            if let Some(engine) = session.engine() {
                views.push(ObserverFrame {
                    observer: local.id.to_string(),
                    remotes: engine.snapshot(),
                });
            }
        }

        SimFrame {
            time_sec: self.time_secs(),
            tick: self.tick_count,
            participants,
            views,
            events: std::mem::take(&mut self.events),
        }
    }
}

fn add_counts(total: &mut AnnounceCounts, counts: AnnounceCounts) {
    total.fired += counts.fired;
    total.dropped += counts.dropped;
    total.deferred += counts.deferred;
    total.failed += counts.failed;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_core::SessionState;

    fn small_config() -> SimConfig {
        SimConfig {
            participants: 3,
            duration_secs: 2.0,
            ..SimConfig::default()
        }
    }

    #[tokio::test]
    async fn test_spawn_participants_all_active() {
        let mut world = SimWorld::new(small_config());
        world.spawn_participants().await.unwrap();

        assert_eq!(world.participants().len(), 3);
        for p in world.participants() {
            assert!(p.is_active());
            assert_eq!(p.session().unwrap().state(), SessionState::Active);
        }
        assert_eq!(world.hub().published("game").len(), 3);
    }

    #[tokio::test]
    async fn test_everyone_sees_everyone_after_one_step() {
        let mut world = SimWorld::new(small_config());
        world.spawn_participants().await.unwrap();
        world.step().await;

        let obs = world.observe();
        assert_eq!(obs.active, 3);
        assert_eq!(obs.missing, 0);
        assert_eq!(obs.ghosts, 0);
        for p in world.participants() {
            assert_eq!(p.session().unwrap().engine().unwrap().len(), 2);
        }
    }

    #[tokio::test]
    async fn test_depart_removes_from_every_view() {
        let mut world = SimWorld::new(small_config());
        world.spawn_participants().await.unwrap();
        world.step().await;

        world.depart(0);
        world.step().await;

        let obs = world.observe();
        assert_eq!(obs.active, 2);
        assert_eq!(obs.ghosts, 0);
        assert_eq!(obs.published, 2);
        for p in world.participants().iter().filter(|p| p.is_active()) {
            assert_eq!(p.session().unwrap().engine().unwrap().len(), 1);
        }
    }

    #[tokio::test]
    async fn test_reinitialize_swaps_identity_everywhere() {
        let mut world = SimWorld::new(small_config());
        world.spawn_participants().await.unwrap();
        world.step().await;
        let old = world.participants()[1].id().unwrap().clone();

        world.reinitialize(1).await.unwrap();
        world.step().await;

        let new = world.participants()[1].id().unwrap().clone();
        assert_ne!(old, new);
        assert_eq!(world.participants()[1].generation(), 2);
        for p in world.participants() {
            let engine = p.session().unwrap().engine().unwrap();
            assert!(!engine.contains(&old));
        }
        let obs = world.observe();
        assert_eq!(obs.missing, 0);
        assert_eq!(obs.ghosts, 0);
    }

    #[tokio::test]
    async fn test_repeated_reinitialization_keeps_hub_bounded() {
        let mut world = SimWorld::new(small_config());
        world.spawn_participants().await.unwrap();

        for round in 0..10 {
            world.reinitialize(round % 3).await.unwrap();
            world.step().await;
        }

        assert_eq!(world.reinitializations(), 10);
        assert_eq!(world.hub().channel_count(), 3);
        assert_eq!(world.hub().member_count("game"), 3);
    }

    #[tokio::test]
    async fn test_same_seed_same_run() {
        async fn run() -> (Vec<PositionState>, Observation) {
            let mut world = SimWorld::new(small_config());
            world.spawn_participants().await.unwrap();
            world.run_ticks(60).await;
            let states = world
                .participants()
                .iter()
                .filter_map(|p| p.local_state().cloned())
                .collect();
            (states, world.observe())
        }

        assert_eq!(run().await, run().await);
    }

    #[tokio::test]
    async fn test_frame_captures_views() {
        let mut world = SimWorld::new(small_config());
        world.spawn_participants().await.unwrap();
        world.step().await;

        let frame = world.frame();
        assert_eq!(frame.participants.len(), 3);
        assert_eq!(frame.views.len(), 3);
        assert!(frame.views.iter().all(|v| v.remotes.len() == 2));
        assert_eq!(frame.events.len(), 3);
        // events are only reported once
        assert!(world.frame().events.is_empty());
    }
}
