//! Test doubles for the environment seams.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tandem_env::{
    EnvError, EventSink, ParticipantId, PositionState, PresenceChannel, PresenceEvent,
    PresenceTransport, SubscribeStatus, TandemContext,
};

use crate::controller::Key;
use crate::surface::{EntityKind, InputState, RenderSurface};

type Task = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Context with a hand-driven clock and an explicit task queue.
pub struct ManualContext {
    now: Mutex<Duration>,
    rng: Mutex<u64>,
    tasks: Mutex<Vec<Task>>,
    seed: u64,
}

impl ManualContext {
    pub fn new(seed: u64) -> Self {
        Self {
            now: Mutex::new(Duration::ZERO),
            rng: Mutex::new(seed),
            tasks: Mutex::new(Vec::new()),
            seed,
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }

    pub fn advance_ms(&self, ms: u64) {
        self.advance(Duration::from_millis(ms));
    }

    /// Runs every spawned task to completion, in spawn order.
    pub async fn run_pending(&self) {
        loop {
            let batch: Vec<Task> = std::mem::take(&mut *self.tasks.lock().unwrap());
            if batch.is_empty() {
                break;
            }
            for task in batch {
                task.await;
            }
        }
    }
}

#[async_trait]
impl TandemContext for ManualContext {
    fn now(&self) -> Duration {
        *self.now.lock().unwrap()
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }

    fn spawn<F>(&self, _name: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.lock().unwrap().push(Box::pin(future));
    }

    fn random_u64(&self) -> u64 {
        // splitmix64
        let mut state = self.rng.lock().unwrap();
        *state = state.wrapping_add(0x9e3779b97f4a7c15);
        let mut z = *state;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
        z ^ (z >> 31)
    }

    fn seed(&self) -> u64 {
        self.seed
    }
}

/// How a [`MockChannel`] answers `subscribe`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SubscribeBehavior {
    Accept,
    Reply(SubscribeStatus),
    Fail,
    Hang,
}

#[derive(Default)]
struct MockState {
    tracked: Vec<PositionState>,
    sink: Option<EventSink>,
    unsubscribed: usize,
    calls: Vec<&'static str>,
    fail_tracks: bool,
}

/// Channel that records every call and lets tests inject events.
pub struct MockChannel {
    topic: String,
    behavior: SubscribeBehavior,
    state: Mutex<MockState>,
}

impl MockChannel {
    pub fn new(behavior: SubscribeBehavior) -> Self {
        Self {
            topic: "game".to_string(),
            behavior,
            state: Mutex::new(MockState::default()),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new(SubscribeBehavior::Accept))
    }

    pub fn set_fail_tracks(&self, fail: bool) {
        self.state.lock().unwrap().fail_tracks = fail;
    }

    pub fn tracked(&self) -> Vec<PositionState> {
        self.state.lock().unwrap().tracked.clone()
    }

    pub fn unsubscribe_count(&self) -> usize {
        self.state.lock().unwrap().unsubscribed
    }

    pub fn has_sink(&self) -> bool {
        self.state.lock().unwrap().sink.is_some()
    }

    /// Order of register/unregister/unsubscribe calls.
    pub fn calls(&self) -> Vec<&'static str> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Pushes an event to the registered sink. Returns false if none is registered.
    pub fn emit(&self, event: PresenceEvent) -> bool {
        match &self.state.lock().unwrap().sink {
            Some(sink) => sink.send(event).is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl PresenceChannel for MockChannel {
    async fn subscribe(&self) -> Result<SubscribeStatus, EnvError> {
        match self.behavior {
            SubscribeBehavior::Accept => Ok(SubscribeStatus::Subscribed),
            SubscribeBehavior::Reply(status) => Ok(status),
            SubscribeBehavior::Fail => Err(EnvError::network("refused")),
            SubscribeBehavior::Hang => std::future::pending::<Result<SubscribeStatus, EnvError>>().await,
        }
    }

    async fn track(&self, state: PositionState) -> Result<(), EnvError> {
        let mut inner = self.state.lock().unwrap();
        if inner.fail_tracks {
            return Err(EnvError::network("track rejected"));
        }
        inner.tracked.push(state);
        Ok(())
    }

    fn register(&self, sink: EventSink) {
        let mut inner = self.state.lock().unwrap();
        inner.calls.push("register");
        inner.sink = Some(sink);
    }

    fn unregister(&self) {
        let mut inner = self.state.lock().unwrap();
        inner.calls.push("unregister");
        inner.sink = None;
    }

    fn unsubscribe(&self) {
        let mut inner = self.state.lock().unwrap();
        inner.calls.push("unsubscribe");
        inner.unsubscribed += 1;
    }

    fn topic(&self) -> &str {
        &self.topic
    }
}

/// Transport that hands out a fresh accepting [`MockChannel`] per `open`.
#[derive(Default)]
pub struct MockTransport {
    opened: Mutex<Vec<Arc<MockChannel>>>,
}

impl MockTransport {
    pub fn opened(&self) -> Vec<Arc<MockChannel>> {
        self.opened.lock().unwrap().clone()
    }
}

impl PresenceTransport for MockTransport {
    type Channel = MockChannel;

    fn open(&self, _topic: &str) -> Arc<MockChannel> {
        let channel = MockChannel::shared();
        self.opened.lock().unwrap().push(channel.clone());
        channel
    }
}

/// Surface that records the scene and holds a settable key set.
#[derive(Debug, Default)]
pub struct TestSurface {
    pub held: BTreeSet<Key>,
    pub entities: Vec<(ParticipantId, EntityKind, [f64; 2])>,
    pub input_attached: bool,
}

impl TestSurface {
    pub fn new() -> Self {
        Self {
            input_attached: true,
            ..Self::default()
        }
    }

    pub fn hold(&mut self, key: Key) {
        self.held.insert(key);
    }

    pub fn position_of(&self, id: &ParticipantId) -> Option<[f64; 2]> {
        self.entities
            .iter()
            .find(|(eid, _, _)| eid == id)
            .map(|(_, _, pos)| *pos)
    }
}

impl InputState for TestSurface {
    fn is_held(&self, key: Key) -> bool {
        self.input_attached && self.held.contains(&key)
    }
}

impl RenderSurface for TestSurface {
    fn add_entity(&mut self, id: &ParticipantId, kind: EntityKind, x: f64, y: f64) {
        self.entities.push((id.clone(), kind, [x, y]));
    }

    fn remove_entity(&mut self, id: &ParticipantId) {
        self.entities.retain(|(eid, _, _)| eid != id);
    }

    fn place_entity(&mut self, id: &ParticipantId, x: f64, y: f64) {
        if let Some(entry) = self.entities.iter_mut().find(|(eid, _, _)| eid == id) {
            entry.2 = [x, y];
        }
    }

    fn attach_input(&mut self) {
        self.input_attached = true;
    }

    fn detach_input(&mut self) {
        self.input_attached = false;
    }
}
