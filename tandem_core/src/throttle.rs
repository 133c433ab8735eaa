//! Publish throttling for outbound presence announcements.
//!
//! Each participant owns one [`PublishThrottle`]. It is an explicit two-state
//! machine:
//!
//! ```text
//!            admit (fires)
//!   ┌──────┐ ─────────────────► ┌──────────────────┐
//!   │ Idle │                    │ Cooling { until } │ ── admit: drop / defer
//!   └──────┘ ◄───────────────── └──────────────────┘
//!            clock reaches `until`
//! ```
//!
//! The window is measured on the context clock from the moment a call fires,
//! regardless of whether the transport later accepts or rejects it, so a
//! failing transport can never wedge the throttle shut.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tandem_env::{PositionState, PresenceChannel, TandemContext};
use tracing::{trace, warn};

use crate::config::{OverflowPolicy, ThrottleConfig};

/// Current throttle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleState {
    Idle,
    Cooling { until: Duration },
}

/// What happened to one announcement request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleDecision {
    /// Sent to the transport now
    Fired,
    /// Discarded (Drop policy)
    Dropped,
    /// Held as the pending state until the window closes (Coalesce policy)
    Deferred,
}

/// Result of [`PublishThrottle::admit`].
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    Fire(PositionState),
    Dropped,
    Deferred,
}

/// Minimum-interval gate for one participant's announcements.
#[derive(Debug, Clone)]
pub struct PublishThrottle {
    interval: Duration,
    policy: OverflowPolicy,
    state: ThrottleState,
    pending: Option<PositionState>,
}

impl PublishThrottle {
    pub fn new(config: &ThrottleConfig) -> Self {
        Self {
            interval: config.interval(),
            policy: config.policy,
            state: ThrottleState::Idle,
            pending: None,
        }
    }

    /// Returns the phase as of `now`.
    pub fn state_at(&mut self, now: Duration) -> ThrottleState {
        self.expire(now);
        self.state
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn pending(&self) -> Option<&PositionState> {
        self.pending.as_ref()
    }

    /// Offers a state for announcement at time `now`.
    pub fn admit(&mut self, now: Duration, state: PositionState) -> Admission {
        self.expire(now);
        match self.state {
            ThrottleState::Idle => {
                // A fresh state supersedes anything still waiting
                self.pending = None;
                self.arm(now);
                Admission::Fire(state)
            }
            ThrottleState::Cooling { .. } => match self.policy {
                OverflowPolicy::Drop => Admission::Dropped,
                OverflowPolicy::Coalesce => {
                    self.pending = Some(state);
                    Admission::Deferred
                }
            },
        }
    }

    /// Releases the pending state if the window has closed.
    ///
    /// Always `None` under the Drop policy.
    pub fn flush(&mut self, now: Duration) -> Option<PositionState> {
        self.expire(now);
        if self.state != ThrottleState::Idle {
            return None;
        }
        let state = self.pending.take()?;
        self.arm(now);
        Some(state)
    }

    fn arm(&mut self, now: Duration) {
        self.state = ThrottleState::Cooling {
            until: now + self.interval,
        };
    }

    fn expire(&mut self, now: Duration) {
        if let ThrottleState::Cooling { until } = self.state {
            if now >= until {
                self.state = ThrottleState::Idle;
            }
        }
    }
}

/// Anything that accepts announcements from the local controller.
pub trait Announcer {
    fn announce(&mut self, state: PositionState) -> ThrottleDecision;
}

/// Counters shared with in-flight announce tasks.
#[derive(Debug, Default)]
pub struct AnnounceStats {
    fired: AtomicU64,
    dropped: AtomicU64,
    deferred: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of [`AnnounceStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AnnounceCounts {
    pub fired: u64,
    pub dropped: u64,
    pub deferred: u64,
    pub failed: u64,
}

impl AnnounceStats {
    pub fn counts(&self) -> AnnounceCounts {
        AnnounceCounts {
            fired: self.fired.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            deferred: self.deferred.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// A throttle bound to a channel: admitted states are tracked fire-and-forget.
pub struct ThrottledAnnouncer<Ctx, Ch>
where
    Ctx: TandemContext,
    Ch: PresenceChannel,
{
    context: Arc<Ctx>,
    channel: Arc<Ch>,
    throttle: PublishThrottle,
    stats: Arc<AnnounceStats>,
}

impl<Ctx, Ch> ThrottledAnnouncer<Ctx, Ch>
where
    Ctx: TandemContext,
    Ch: PresenceChannel,
{
    pub fn new(context: Arc<Ctx>, channel: Arc<Ch>, config: &ThrottleConfig) -> Self {
        Self {
            context,
            channel,
            throttle: PublishThrottle::new(config),
            stats: Arc::new(AnnounceStats::default()),
        }
    }

    /// Sends a deferred state once its window has closed. Returns true if one was sent.
    pub fn flush(&mut self) -> bool {
        match self.throttle.flush(self.context.now()) {
            Some(state) => {
                self.dispatch(state);
                true
            }
            None => false,
        }
    }

    pub fn stats(&self) -> AnnounceCounts {
        self.stats.counts()
    }

    pub fn throttle(&self) -> &PublishThrottle {
        &self.throttle
    }

    fn dispatch(&self, state: PositionState) {
        self.stats.fired.fetch_add(1, Ordering::Relaxed);
        let channel = Arc::clone(&self.channel);
        let stats = Arc::clone(&self.stats);
        self.context.spawn("announce", async move {
            let id = state.id.clone();
            if let Err(e) = channel.track(state).await {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!(participant = %id, error = %e, "announce failed");
            }
        });
    }
}

impl<Ctx, Ch> Announcer for ThrottledAnnouncer<Ctx, Ch>
where
    Ctx: TandemContext,
    Ch: PresenceChannel,
{
    fn announce(&mut self, state: PositionState) -> ThrottleDecision {
        match self.throttle.admit(self.context.now(), state) {
            Admission::Fire(state) => {
                trace!(x = state.x, y = state.y, "announce fired");
                self.dispatch(state);
                ThrottleDecision::Fired
            }
            Admission::Dropped => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                ThrottleDecision::Dropped
            }
            Admission::Deferred => {
                self.stats.deferred.fetch_add(1, Ordering::Relaxed);
                ThrottleDecision::Deferred
            }
        }
    }
}
