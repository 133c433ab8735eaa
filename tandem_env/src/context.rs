//! Core environment context trait for Tandem sessions.

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

/// The central interface for environment interaction.
///
/// This trait abstracts the "real world" so that a Tandem session can run
/// against a live runtime (tokio) or inside the deterministic simulator.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time`, `tokio::spawn`, thread RNG
/// - **Simulation**: `SimContext` - virtual clock, seeded RNG, ordered task queue
///
/// # Determinism
///
/// Everything that would otherwise introduce non-determinism (time,
/// randomness, task scheduling) goes through the context.
#[async_trait]
pub trait TandemContext: Send + Sync + 'static {
    /// Returns the current monotonic time since context creation.
    ///
    /// Drives the publish throttle windows. In simulation this is the
    /// virtual clock.
    fn now(&self) -> Duration;

    /// Suspends execution for the given duration.
    ///
    /// In production: wraps `tokio::time::sleep`
    /// In simulation: advances the virtual clock
    async fn sleep(&self, duration: Duration);

    /// Spawns a fire-and-forget background task.
    ///
    /// Used for throttled `track` announcements, which the caller never awaits.
    fn spawn<F>(&self, name: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static;

    /// Returns 64 random bits.
    ///
    /// Participant identifiers are built from this, so a seeded context
    /// produces reproducible identities.
    fn random_u64(&self) -> u64;

    /// Returns the context's seed (for logging/debugging).
    ///
    /// In production, returns 0 (not seeded).
    fn seed(&self) -> u64;
}
