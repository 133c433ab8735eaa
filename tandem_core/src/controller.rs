//! Local entity control: input -> velocity -> position -> announcement.
//!
//! The local entity moves every tick a direction is held, with no throttling.
//! Only the outbound announcement goes through the publish throttle, so the
//! local view stays responsive while the network sees at most one update per
//! window.

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};
use tandem_env::{ParticipantId, PositionState};

use crate::config::MovementConfig;
use crate::surface::InputState;
use crate::throttle::{Announcer, ThrottleDecision};

/// Keys the controller polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Key {
    Up,
    Down,
    Left,
    Right,
    W,
    A,
    S,
    D,
}

/// The participant's own entity. Never written by replication.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalEntity {
    state: PositionState,
}

impl LocalEntity {
    pub fn new(id: ParticipantId, x: f64, y: f64) -> Self {
        Self {
            state: PositionState::new(id, x, y),
        }
    }

    pub fn state(&self) -> &PositionState {
        &self.state
    }

    pub fn position(&self) -> Vector2<f64> {
        Vector2::new(self.state.x, self.state.y)
    }
}

/// What one controller tick did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControllerStep {
    pub velocity: Vector2<f64>,
    /// `None` when the entity did not move (nothing announced)
    pub decision: Option<ThrottleDecision>,
}

impl ControllerStep {
    pub fn moved(&self) -> bool {
        self.velocity != Vector2::zeros()
    }
}

/// Reads held keys and integrates the local entity.
#[derive(Debug, Clone)]
pub struct LocalController {
    entity: LocalEntity,
    speed: f64,
}

impl LocalController {
    pub fn new(id: ParticipantId, config: &MovementConfig) -> Self {
        let [x, y] = config.spawn;
        Self {
            entity: LocalEntity::new(id, x, y),
            speed: config.speed,
        }
    }

    pub fn entity(&self) -> &LocalEntity {
        &self.entity
    }

    pub fn state(&self) -> &PositionState {
        self.entity.state()
    }

    /// Velocity for the currently held keys. Opposite directions cancel.
    pub fn velocity<I: InputState + ?Sized>(&self, input: &I) -> Vector2<f64> {
        let held = |a: Key, b: Key| input.is_held(a) || input.is_held(b);
        let axis = |neg: bool, pos: bool| match (neg, pos) {
            (true, false) => -1.0,
            (false, true) => 1.0,
            _ => 0.0,
        };

        // Screen coordinates: y grows downward
        let dx = axis(held(Key::Left, Key::A), held(Key::Right, Key::D));
        let dy = axis(held(Key::Up, Key::W), held(Key::Down, Key::S));
        Vector2::new(dx, dy) * self.speed
    }

    /// Runs one tick: read input, integrate, announce if moved.
    pub fn tick<I, A>(&mut self, input: &I, announcer: &mut A) -> ControllerStep
    where
        I: InputState + ?Sized,
        A: Announcer + ?Sized,
    {
        let velocity = self.velocity(input);
        if velocity == Vector2::zeros() {
            return ControllerStep {
                velocity,
                decision: None,
            };
        }

        let next = self.entity.position() + velocity;
        self.entity.state.x = next.x;
        self.entity.state.y = next.y;

        let decision = announcer.announce(self.entity.state.clone());
        ControllerStep {
            velocity,
            decision: Some(decision),
        }
    }
}
