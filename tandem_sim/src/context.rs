//! Simulation context implementing TandemContext for deterministic testing.

use async_trait::async_trait;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tandem_env::TandemContext;

type Task = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Simulation context backed by deterministic time, RNG and scheduling.
///
/// This implements `TandemContext` using:
/// - A virtual clock that only moves when the world advances it
/// - A seeded ChaCha8 RNG for participant identities
/// - A FIFO task queue drained explicitly with [`run_pending`](Self::run_pending)
pub struct SimContext {
    /// Master seed for this simulation
    seed: u64,

    /// Current virtual time (nanoseconds since simulation start)
    virtual_time_ns: Arc<Mutex<u64>>,

    /// Deterministic RNG
    rng: Arc<Mutex<ChaCha8Rng>>,

    /// Spawned tasks waiting for the next drain
    tasks: Arc<Mutex<Vec<(String, Task)>>>,
}

impl SimContext {
    /// Creates a new SimContext with the given seed.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            virtual_time_ns: Arc::new(Mutex::new(0)),
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
            tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Creates an Arc-wrapped context for sharing.
    pub fn shared(seed: u64) -> Arc<Self> {
        Arc::new(Self::new(seed))
    }

    /// Advances virtual time by the given duration.
    pub fn advance_time(&self, duration: Duration) {
        let mut time = lock(&self.virtual_time_ns);
        *time += duration.as_nanos() as u64;
    }

    /// Returns the current virtual time in nanoseconds.
    pub fn time_ns(&self) -> u64 {
        *lock(&self.virtual_time_ns)
    }

    /// Number of spawned tasks not yet run.
    pub fn pending_tasks(&self) -> usize {
        lock(&self.tasks).len()
    }

    /// Runs every queued task to completion in spawn order, including tasks
    /// spawned while draining. Returns how many ran.
    pub async fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            let batch = std::mem::take(&mut *lock(&self.tasks));
            if batch.is_empty() {
                return ran;
            }
            for (_name, task) in batch {
                task.await;
                ran += 1;
            }
        }
    }
}

impl Clone for SimContext {
    fn clone(&self) -> Self {
        Self {
            seed: self.seed,
            virtual_time_ns: Arc::clone(&self.virtual_time_ns),
            rng: Arc::clone(&self.rng),
            tasks: Arc::clone(&self.tasks),
        }
    }
}

#[async_trait]
impl TandemContext for SimContext {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.time_ns())
    }

    async fn sleep(&self, duration: Duration) {
        // Nothing else runs while a simulated sleep is pending, so sleeping
        // is just jumping the clock.
        self.advance_time(duration);
    }

    fn spawn<F>(&self, name: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        lock(&self.tasks).push((name.to_string(), Box::pin(future)));
    }

    fn random_u64(&self) -> u64 {
        lock(&self.rng).next_u64()
    }

    fn seed(&self) -> u64 {
        self.seed
    }
}

/// Locks a simulator mutex. A poisoned lock only means another simulated
/// task panicked, and the data is still usable for reporting.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
