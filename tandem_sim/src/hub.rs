//! Simulated presence server with fault injection.
//!
//! The hub plays the role of the hosted presence backend: it keeps one record
//! per subscribed member, and turns every `track` into a `join` (first time)
//! plus a full `sync` for every member of the topic, and every `unsubscribe`
//! into a `leave` plus `sync`. New subscribers get a `sync` of the current
//! state. Like the real backend, the sender receives its own events too.
//!
//! Deliveries are queued with a due time and released by [`SimHub::deliver`],
//! which the world calls once per step.

use async_trait::async_trait;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tandem_env::{
    EnvError, EventSink, ParticipantId, PositionState, PresenceChannel, PresenceEvent,
    PresenceRecord, PresenceSnapshot, PresenceTransport, SubscribeStatus, TandemContext,
};
use tracing::{debug, trace};

use crate::context::{lock, SimContext};

/// How the hub answers subscription requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscribeMode {
    #[default]
    Accept,
    /// Answer with `ChannelError`
    Reject,
    /// Never answer
    Stall,
}

/// Fault injection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimHubConfig {
    /// Base delivery latency in milliseconds
    pub latency_ms: u64,

    /// Extra uniform random delay per event, 0..=jitter_ms
    pub jitter_ms: u64,

    /// Allow later events to overtake earlier ones for the same receiver
    pub reorder: bool,

    /// Probability that a `track` is lost (0.0 - 1.0)
    pub loss_rate: f64,

    /// Probability that a replaced record lingers as a stale duplicate
    pub duplicate_rate: f64,

    pub subscribe: SubscribeMode,
}

impl Default for SimHubConfig {
    fn default() -> Self {
        Self {
            latency_ms: 0,
            jitter_ms: 0,
            reorder: false,
            loss_rate: 0.0,
            duplicate_rate: 0.0,
            subscribe: SubscribeMode::Accept,
        }
    }
}

/// Traffic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubStats {
    /// Tracks accepted and broadcast
    pub tracks: u64,
    /// Tracks lost to injected faults
    pub tracks_lost: u64,
    pub events_sent: u64,
    pub events_delivered: u64,
    /// Events whose receiver had no sink registered on arrival
    pub events_discarded: u64,
}

#[derive(Debug, Default)]
struct Member {
    topic: String,
    sink: Option<EventSink>,
    subscribed: bool,
    closed: bool,
    record: Option<PresenceRecord>,
    stale: Option<PresenceRecord>,
    /// Latest due time scheduled for this member (FIFO mode)
    last_due: Duration,
}

struct Delivery {
    due: Duration,
    seq: u64,
    member: u64,
    event: PresenceEvent,
}

struct HubState {
    config: SimHubConfig,
    rng: ChaCha8Rng,
    members: BTreeMap<u64, Member>,
    in_flight: Vec<Delivery>,
    next_member: u64,
    next_seq: u64,
    stats: HubStats,
}

/// In-memory presence backend shared by every simulated participant.
#[derive(Clone)]
pub struct SimHub {
    context: Arc<SimContext>,
    state: Arc<Mutex<HubState>>,
}

impl SimHub {
    /// Creates a hub on the given clock. `seed` drives fault injection only.
    pub fn new(context: Arc<SimContext>, config: SimHubConfig, seed: u64) -> Self {
        Self {
            context,
            state: Arc::new(Mutex::new(HubState {
                config,
                rng: ChaCha8Rng::seed_from_u64(seed),
                members: BTreeMap::new(),
                in_flight: Vec::new(),
                next_member: 0,
                next_seq: 0,
                stats: HubStats::default(),
            })),
        }
    }

    /// Replaces the fault settings. Affects events scheduled from now on.
    pub fn set_config(&self, config: SimHubConfig) {
        lock(&self.state).config = config;
    }

    pub fn config(&self) -> SimHubConfig {
        lock(&self.state).config.clone()
    }

    pub fn stats(&self) -> HubStats {
        lock(&self.state).stats
    }

    /// Events scheduled but not yet delivered.
    pub fn in_flight(&self) -> usize {
        lock(&self.state).in_flight.len()
    }

    /// Members the hub still keeps, including closed ones that have events
    /// in flight.
    pub fn channel_count(&self) -> usize {
        lock(&self.state).members.len()
    }

    /// Subscribed members on `topic`.
    pub fn member_count(&self, topic: &str) -> usize {
        lock(&self.state)
            .members
            .values()
            .filter(|m| m.topic == topic && m.subscribed)
            .count()
    }

    /// The current (fresh) record of every member on `topic`, as positions.
    pub fn published(&self, topic: &str) -> BTreeMap<ParticipantId, PositionState> {
        lock(&self.state)
            .members
            .values()
            .filter(|m| m.topic == topic && m.subscribed)
            .filter_map(|m| m.record.as_ref())
            .filter_map(|r| r.to_state().ok())
            .map(|s| (s.id.clone(), s))
            .collect()
    }

    /// Sends a full `sync` of `topic` to every member, as the backend does
    /// after a reconnect.
    pub fn broadcast_sync(&self, topic: &str) {
        let now = self.context.now();
        let mut state = lock(&self.state);
        let snapshot = state.snapshot(topic);
        state.broadcast(now, topic, PresenceEvent::Sync(snapshot));
    }

    /// Releases every event due at or before `now`. Returns how many were
    /// handed to a sink.
    pub fn deliver(&self, now: Duration) -> usize {
        let mut state = lock(&self.state);
        let (mut due, rest): (Vec<_>, Vec<_>) =
            std::mem::take(&mut state.in_flight).into_iter().partition(|d| d.due <= now);
        state.in_flight = rest;
        due.sort_by_key(|d| (d.due, d.seq));

        let mut delivered = 0;
        for delivery in due {
            let sent = state
                .members
                .get(&delivery.member)
                .and_then(|m| m.sink.as_ref())
                .map(|sink| sink.send(delivery.event).is_ok())
                .unwrap_or(false);
            if sent {
                delivered += 1;
                state.stats.events_delivered += 1;
            } else {
                state.stats.events_discarded += 1;
            }
        }
        if delivered > 0 {
            trace!(delivered, pending = state.in_flight.len(), "hub delivery");
        }
        state.prune();
        delivered
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut HubState, Duration) -> R) -> R {
        let now = self.context.now();
        let mut state = lock(&self.state);
        f(&mut state, now)
    }
}

impl HubState {
    fn snapshot(&self, topic: &str) -> PresenceSnapshot {
        let mut snapshot = PresenceSnapshot::new();
        for (key, member) in &self.members {
            if member.topic != topic || !member.subscribed {
                continue;
            }
            if let Some(record) = &member.record {
                let presence_key = format!("member-{}", key);
                snapshot.push(presence_key.clone(), record.clone());
                if let Some(stale) = &member.stale {
                    snapshot.push(presence_key, stale.clone());
                }
            }
        }
        snapshot
    }

    fn schedule(&mut self, now: Duration, member: u64, event: PresenceEvent) {
        let jitter = match self.config.jitter_ms {
            0 => 0,
            j => self.rng.gen_range(0..=j),
        };
        let mut due = now + Duration::from_millis(self.config.latency_ms + jitter);
        let reorder = self.config.reorder;
        let Some(target) = self.members.get_mut(&member) else {
            return;
        };
        if !reorder {
            due = due.max(target.last_due);
        }
        target.last_due = due;

        let seq = self.next_seq;
        self.next_seq += 1;
        self.stats.events_sent += 1;
        self.in_flight.push(Delivery { due, seq, member, event });
    }

    /// Forgets closed members once nothing is in flight for them.
    fn prune(&mut self) {
        let pending: BTreeSet<u64> = self.in_flight.iter().map(|d| d.member).collect();
        self.members.retain(|key, m| !m.closed || pending.contains(key));
    }

    fn broadcast(&mut self, now: Duration, topic: &str, event: PresenceEvent) {
        let receivers: Vec<u64> = self
            .members
            .iter()
            .filter(|(_, m)| m.topic == topic && m.subscribed)
            .map(|(k, _)| *k)
            .collect();
        for member in receivers {
            self.schedule(now, member, event.clone());
        }
    }
}

impl PresenceTransport for SimHub {
    type Channel = SimChannel;

    fn open(&self, topic: &str) -> Arc<SimChannel> {
        let mut state = lock(&self.state);
        let member = state.next_member;
        state.next_member += 1;
        state.members.insert(
            member,
            Member {
                topic: topic.to_string(),
                ..Member::default()
            },
        );
        debug!(member, topic, "channel opened");
        Arc::new(SimChannel {
            hub: self.clone(),
            member,
            topic: topic.to_string(),
        })
    }
}

/// One participant's connection to the [`SimHub`].
pub struct SimChannel {
    hub: SimHub,
    member: u64,
    topic: String,
}

impl SimChannel {
    pub fn member(&self) -> u64 {
        self.member
    }
}

#[async_trait]
impl PresenceChannel for SimChannel {
    async fn subscribe(&self) -> Result<SubscribeStatus, EnvError> {
        let mode = self.hub.with_state(|state, now| {
            let mode = state.config.subscribe;
            // members are only ever forgotten after closing
            let Some(member) = state.members.get_mut(&self.member).filter(|m| !m.closed) else {
                return Ok(Some(SubscribeStatus::Closed));
            };
            match mode {
                SubscribeMode::Accept => {
                    member.subscribed = true;
                    let snapshot = state.snapshot(&self.topic);
                    state.schedule(now, self.member, PresenceEvent::Sync(snapshot));
                    Ok(Some(SubscribeStatus::Subscribed))
                }
                SubscribeMode::Reject => Ok(Some(SubscribeStatus::ChannelError)),
                SubscribeMode::Stall => Ok(None),
            }
        })?;

        match mode {
            Some(status) => Ok(status),
            None => std::future::pending::<Result<SubscribeStatus, EnvError>>().await,
        }
    }

    async fn track(&self, position: PositionState) -> Result<(), EnvError> {
        self.hub.with_state(|state, now| {
            let subscribed = state
                .members
                .get(&self.member)
                .map(|m| m.subscribed)
                .unwrap_or(false);
            if !subscribed {
                return Err(EnvError::not_subscribed(&self.topic));
            }

            let loss_rate = state.config.loss_rate;
            if loss_rate > 0.0 && state.rng.gen_bool(loss_rate.clamp(0.0, 1.0)) {
                state.stats.tracks_lost += 1;
                return Err(EnvError::network("announce lost"));
            }

            let record = PresenceRecord::from_state(&position)
                .with_field("presence_ref", format!("ref-{}-{}", self.member, state.next_seq));
            let duplicate_rate = state.config.duplicate_rate;
            let keep_stale = duplicate_rate > 0.0 && state.rng.gen_bool(duplicate_rate.clamp(0.0, 1.0));

            let Some(member) = state.members.get_mut(&self.member) else {
                return Err(EnvError::not_subscribed(&self.topic));
            };
            let previous = member.record.replace(record.clone());
            let first = previous.is_none();
            member.stale = if keep_stale { previous } else { None };
            state.stats.tracks += 1;

            if first {
                state.broadcast(now, &self.topic, PresenceEvent::Join(vec![record]));
            }
            let snapshot = state.snapshot(&self.topic);
            state.broadcast(now, &self.topic, PresenceEvent::Sync(snapshot));
            Ok(())
        })
    }

    fn register(&self, sink: EventSink) {
        self.hub.with_state(|state, _| {
            if let Some(member) = state.members.get_mut(&self.member) {
                member.sink = Some(sink);
            }
        })
    }

    fn unregister(&self) {
        self.hub.with_state(|state, _| {
            if let Some(member) = state.members.get_mut(&self.member) {
                member.sink = None;
            }
        })
    }

    fn unsubscribe(&self) {
        self.hub.with_state(|state, now| {
            let Some(member) = state.members.get_mut(&self.member) else {
                return;
            };
            if member.closed {
                return;
            }
            member.closed = true;
            member.subscribed = false;
            member.stale = None;
            let departed = member.record.take();

            if let Some(record) = departed {
                debug!(member = self.member, id = ?record.id(), "member left");
                state.broadcast(now, &self.topic, PresenceEvent::Leave(vec![record]));
                let snapshot = state.snapshot(&self.topic);
                state.broadcast(now, &self.topic, PresenceEvent::Sync(snapshot));
            }
            state.prune();
        })
    }

    fn topic(&self) -> &str {
        &self.topic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn hub(config: SimHubConfig) -> (Arc<SimContext>, SimHub) {
        let ctx = SimContext::shared(7);
        let hub = SimHub::new(ctx.clone(), config, 7);
        (ctx, hub)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<PresenceEvent>) -> Vec<PresenceEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    async fn joined(hub: &SimHub) -> (Arc<SimChannel>, mpsc::UnboundedReceiver<PresenceEvent>) {
        let channel = hub.open("game");
        let (tx, rx) = mpsc::unbounded_channel();
        channel.register(tx);
        assert_eq!(channel.subscribe().await.unwrap(), SubscribeStatus::Subscribed);
        (channel, rx)
    }

    fn pos(id: &str, x: f64, y: f64) -> PositionState {
        PositionState::new(id.into(), x, y)
    }

    #[tokio::test]
    async fn test_subscriber_receives_current_state() {
        let (ctx, hub) = hub(SimHubConfig::default());
        let (a, mut rx_a) = joined(&hub).await;
        a.track(pos("A", 1.0, 2.0)).await.unwrap();

        let (_b, mut rx_b) = joined(&hub).await;
        hub.deliver(ctx.now());

        let events = drain(&mut rx_b);
        assert_eq!(events.len(), 1);
        match &events[0] {
            PresenceEvent::Sync(snapshot) => {
                let (_, record) = snapshot.first_records().next().unwrap();
                assert_eq!(record.to_state().unwrap(), pos("A", 1.0, 2.0));
            }
            other => panic!("expected sync, got {:?}", other),
        }

        // A saw its own join and sync, after its initial empty sync
        let kinds: Vec<_> = drain(&mut rx_a).iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, vec!["sync", "join", "sync"]);
    }

    #[tokio::test]
    async fn test_join_only_on_first_track() {
        let (ctx, hub) = hub(SimHubConfig::default());
        let (a, mut rx) = joined(&hub).await;
        a.track(pos("A", 0.0, 0.0)).await.unwrap();
        a.track(pos("A", 5.0, 0.0)).await.unwrap();
        hub.deliver(ctx.now());

        let kinds: Vec<_> = drain(&mut rx).iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, vec!["sync", "join", "sync", "sync"]);
        assert_eq!(hub.published("game")[&ParticipantId::from("A")].x, 5.0);
        assert_eq!(hub.stats().tracks, 2);
    }

    #[tokio::test]
    async fn test_unsubscribe_broadcasts_leave_once() {
        let (ctx, hub) = hub(SimHubConfig::default());
        let (a, _rx_a) = joined(&hub).await;
        let (_b, mut rx_b) = joined(&hub).await;
        a.track(pos("A", 0.0, 0.0)).await.unwrap();
        hub.deliver(ctx.now());
        drain(&mut rx_b);

        a.unsubscribe();
        a.unsubscribe();
        hub.deliver(ctx.now());

        let events = drain(&mut rx_b);
        let kinds: Vec<_> = events.iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, vec!["leave", "sync"]);
        assert!(hub.published("game").is_empty());
        assert_eq!(hub.member_count("game"), 1);

        // closed channels cannot come back or announce
        assert_eq!(a.subscribe().await.unwrap(), SubscribeStatus::Closed);
        assert!(matches!(a.track(pos("A", 1.0, 1.0)).await, Err(EnvError::NotSubscribed(_))));
    }

    #[tokio::test]
    async fn test_closed_members_are_forgotten_after_delivery() {
        let (ctx, hub) = hub(SimHubConfig {
            latency_ms: 50,
            ..SimHubConfig::default()
        });
        let (a, _rx_a) = joined(&hub).await;
        let (_b, mut rx_b) = joined(&hub).await;
        a.track(pos("A", 0.0, 0.0)).await.unwrap();
        a.unsubscribe();

        // A still has its own join and sync in flight
        assert_eq!(hub.channel_count(), 2);
        hub.deliver(ctx.now() + Duration::from_millis(50));
        assert_eq!(hub.channel_count(), 1);
        assert_eq!(hub.member_count("game"), 1);

        let kinds: Vec<_> = drain(&mut rx_b).iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, vec!["sync", "join", "sync", "leave", "sync"]);

        // a forgotten member behaves like a closed one
        assert_eq!(a.subscribe().await.unwrap(), SubscribeStatus::Closed);
        assert!(matches!(a.track(pos("A", 1.0, 1.0)).await, Err(EnvError::NotSubscribed(_))));
        assert_eq!(hub.channel_count(), 1);
    }

    #[tokio::test]
    async fn test_closed_member_without_backlog_is_forgotten_at_once() {
        let (_ctx, hub) = hub(SimHubConfig::default());
        let never_subscribed = hub.open("game");
        assert_eq!(hub.channel_count(), 1);

        never_subscribed.unsubscribe();
        assert_eq!(hub.channel_count(), 0);
    }

    #[tokio::test]
    async fn test_latency_holds_events_until_due() {
        let (ctx, hub) = hub(SimHubConfig {
            latency_ms: 50,
            ..SimHubConfig::default()
        });
        let (a, mut rx) = joined(&hub).await;
        a.track(pos("A", 0.0, 0.0)).await.unwrap();

        assert_eq!(hub.deliver(ctx.now()), 0);
        ctx.advance_time(Duration::from_millis(49));
        assert_eq!(hub.deliver(ctx.now()), 0);
        ctx.advance_time(Duration::from_millis(1));
        assert_eq!(hub.deliver(ctx.now()), 3);
        assert_eq!(drain(&mut rx).len(), 3);
        assert_eq!(hub.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_fifo_without_reorder_under_jitter() {
        let (ctx, hub) = hub(SimHubConfig {
            jitter_ms: 200,
            ..SimHubConfig::default()
        });
        let (a, mut rx) = joined(&hub).await;
        for i in 0..20 {
            a.track(pos("A", i as f64, 0.0)).await.unwrap();
        }
        ctx.advance_time(Duration::from_millis(200));
        hub.deliver(ctx.now());

        let xs: Vec<f64> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                PresenceEvent::Sync(s) => s.first_records().next().map(|(_, r)| r.to_state().unwrap().x),
                _ => None,
            })
            .collect();
        let mut sorted = xs.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(xs, sorted);
        assert_eq!(xs.len(), 20);
    }

    #[tokio::test]
    async fn test_stale_duplicates_follow_fresh_record() {
        let (_ctx, hub) = hub(SimHubConfig {
            duplicate_rate: 1.0,
            ..SimHubConfig::default()
        });
        let (a, _rx) = joined(&hub).await;
        a.track(pos("A", 1.0, 0.0)).await.unwrap();
        a.track(pos("A", 2.0, 0.0)).await.unwrap();

        let snapshot = lock(&hub.state).snapshot("game");
        let records = snapshot.0.values().next().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].to_state().unwrap().x, 2.0);
        assert_eq!(records[1].to_state().unwrap().x, 1.0);
    }

    #[tokio::test]
    async fn test_full_loss_rejects_every_track() {
        let (_ctx, hub) = hub(SimHubConfig {
            loss_rate: 1.0,
            ..SimHubConfig::default()
        });
        let (a, _rx) = joined(&hub).await;
        assert!(a.track(pos("A", 0.0, 0.0)).await.is_err());
        assert!(hub.published("game").is_empty());
        assert_eq!(hub.stats().tracks_lost, 1);
    }

    #[tokio::test]
    async fn test_rejecting_hub() {
        let (_ctx, hub) = hub(SimHubConfig {
            subscribe: SubscribeMode::Reject,
            ..SimHubConfig::default()
        });
        let channel = hub.open("game");
        assert_eq!(channel.subscribe().await.unwrap(), SubscribeStatus::ChannelError);
        assert_eq!(hub.member_count("game"), 0);
    }

    #[tokio::test]
    async fn test_unregistered_member_events_are_discarded() {
        let (ctx, hub) = hub(SimHubConfig::default());
        let (a, _rx) = joined(&hub).await;
        a.unregister();
        a.track(pos("A", 0.0, 0.0)).await.unwrap();
        assert_eq!(hub.deliver(ctx.now()), 0);
        assert_eq!(hub.stats().events_discarded, 3);
    }
}
