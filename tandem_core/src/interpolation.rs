//! Visual smoothing of remote entities.
//!
//! Announcements arrive at most once per throttle window and with jitter, so
//! drawing remote entities at their announced position would make them jump.
//! Instead every tick moves each entity a fixed fraction of the way to its
//! target (exponential smoothing):
//!
//! ```text
//! current' = current + (target - current) * t
//! ```
//!
//! With `0 < t < 1` the remaining distance shrinks by `(1 - t)` each tick, so
//! it strictly decreases while the target holds still and drops below any
//! `eps` after [`Interpolator::ticks_to_within`] ticks. Entities closer than
//! `snap_epsilon` are placed exactly on target.

use nalgebra::Vector2;

use crate::config::InterpolationConfig;
use crate::replication::{RemoteEntity, ReplicationEngine};

/// Per-tick exponential smoother.
#[derive(Debug, Clone)]
pub struct Interpolator {
    factor: f64,
    snap_epsilon: f64,
}

impl Interpolator {
    pub fn new(config: &InterpolationConfig) -> Self {
        Self {
            factor: config.factor.clamp(f64::EPSILON, 1.0),
            snap_epsilon: config.snap_epsilon.max(0.0),
        }
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }

    /// Advances every remote entity one tick. Returns how many moved.
    pub fn step(&self, engine: &mut ReplicationEngine) -> usize {
        engine
            .entities_mut()
            .map(|entity| self.advance(entity))
            .filter(|moved| *moved)
            .count()
    }

    /// Advances one entity. Returns false if it was already on target.
    pub fn advance(&self, entity: &mut RemoteEntity) -> bool {
        let current = Vector2::new(entity.current().x, entity.current().y);
        let target = Vector2::new(entity.target().x, entity.target().y);
        let delta = target - current;

        if delta.norm() == 0.0 {
            return false;
        }

        let next = if delta.norm() < self.snap_epsilon {
            target
        } else {
            current + delta * self.factor
        };
        entity.set_current(next.x, next.y);
        true
    }

    /// Ticks needed to bring a gap of `distance` below `epsilon` with a
    /// stationary target, ignoring the snap.
    pub fn ticks_to_within(&self, distance: f64, epsilon: f64) -> u32 {
        if distance < epsilon {
            return 0;
        }
        if self.factor >= 1.0 {
            return 1;
        }
        // (1 - t)^n * d < eps  <=>  n > ln(eps / d) / ln(1 - t)
        let n = ((epsilon / distance).ln() / (1.0 - self.factor).ln()).floor() + 1.0;
        n as u32
    }
}

impl Default for Interpolator {
    fn default() -> Self {
        Self::new(&InterpolationConfig::default())
    }
}
