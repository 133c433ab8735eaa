//! Scenario runner - executes replication scenarios and checks the outcome.
//!
//! Every scenario has the same shape: spawn participants, let them move for
//! the active phase (with scenario-specific disturbances), stop all input,
//! let the world settle, then compare what every observer draws against what
//! the hub holds.

use crate::exporter::SimExport;
use crate::scenarios::ScenarioId;
use crate::script::InputScript;
use crate::world::{Observation, SimConfig, SimWorld};

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tandem_core::{Key, OverflowPolicy};
use tandem_env::TandemContext;
use tracing::{debug, info, warn};

/// Largest accepted gap between a settled view and the announced position.
pub const VIEW_TOLERANCE: f64 = 0.01;

/// Results from running a scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Total ticks executed
    pub total_ticks: u64,

    /// Final simulation time in seconds
    pub final_time_secs: f64,

    /// Participants active at the end
    pub final_participants: usize,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScenarioMetrics {
    /// Presence events handed to sessions
    pub events_delivered: u64,

    /// Events addressed to torn-down sessions
    pub events_discarded: u64,

    /// Announcements the hub accepted
    pub tracks: u64,

    /// Announcements lost to injected faults
    pub tracks_lost: u64,

    pub announce_fired: u64,
    pub announce_dropped: u64,
    pub announce_deferred: u64,
    pub announce_failed: u64,

    pub reinitializations: u64,
    pub tick_errors: u64,

    /// Final consistency check
    pub observation: Observation,

    /// Staleness accepted for this run
    pub staleness_bound: f64,
}

/// Runs replication scenarios.
pub struct ScenarioRunner {
    base: SimConfig,
}

impl ScenarioRunner {
    /// Creates a new scenario runner with default settings.
    pub fn new(seed: u64, participants: usize) -> Self {
        Self::from_config(SimConfig {
            seed,
            participants,
            ..SimConfig::default()
        })
    }

    /// Creates a runner from a full configuration.
    pub fn from_config(base: SimConfig) -> Self {
        Self { base }
    }

    /// Sets the active phase duration.
    pub fn with_duration(mut self, secs: f64) -> Self {
        self.base.duration_secs = secs;
        self
    }

    pub fn config(&self) -> &SimConfig {
        &self.base
    }

    /// Runs a scenario and returns the result.
    pub async fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        self.execute(scenario, None).await
    }

    /// Runs a scenario, recording a frame every `frame_every` ticks.
    pub async fn run_recorded(&self, scenario: ScenarioId, frame_every: u64) -> (ScenarioResult, SimExport) {
        let mut export = SimExport::new(scenario.name(), self.base.seed);
        let result = self.execute(scenario, Some((&mut export, frame_every.max(1)))).await;
        export.finalize(result.passed, Some(result.metrics.observation.max_view_error));
        (result, export)
    }

    async fn execute(
        &self,
        scenario: ScenarioId,
        mut export: Option<(&mut SimExport, u64)>,
    ) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.base.seed);
        debug!("{}", scenario.description());

        let config = scenario.configure(self.base.clone());
        let mut world = SimWorld::new(config.clone());
        let mut failures = Vec::new();

        if let Err(e) = world.spawn_participants().await {
            failures.push(format!("participant failed to start: {}", e));
            return self.finish(scenario, &world, &config, failures);
        }

        if scenario == ScenarioId::Burst {
            world.set_all_scripts(InputScript::hold([Key::D, Key::S]));
        }

        // Active phase
        let active_ticks = config.active_ticks();
        for tick in 0..active_ticks {
            if scenario == ScenarioId::Churn {
                if let Err(reason) = churn(&mut world, tick, active_ticks).await {
                    failures.push(reason);
                }
            }
            world.step().await;

            if let Some((export, every)) = export.as_mut() {
                if tick % *every == 0 {
                    export.add_frame(world.frame());
                }
            }
            if tick % config.tick_rate_hz.max(1) as u64 == 0 {
                debug!(
                    "  t={:.1}s | active={} | in_flight={}",
                    world.time_secs(),
                    world.participants().iter().filter(|p| p.is_active()).count(),
                    world.hub().in_flight()
                );
            }
        }

        // Settle phase
        world.release_all();
        if config.hub.reorder {
            // Reordered events can leave an older target last; a full sync
            // after the backlog drains puts every view back on the latest.
            world.drain(config.settle_ticks()).await;
            world.hub().broadcast_sync(&config.session.topic);
        }
        world.run_ticks(config.settle_ticks()).await;

        if let Some((export, _)) = export.as_mut() {
            export.add_frame(world.frame());
        }

        if scenario == ScenarioId::Burst {
            failures.extend(check_throttle_bound(&world, &config));
        }
        self.finish(scenario, &world, &config, failures)
    }

    fn finish(
        &self,
        scenario: ScenarioId,
        world: &SimWorld,
        config: &SimConfig,
        mut failures: Vec<String>,
    ) -> ScenarioResult {
        let obs = world.observe();
        let hub = world.hub().stats();
        let announce = world.announce_totals();
        let staleness_bound = staleness_bound(config);

        let metrics = ScenarioMetrics {
            events_delivered: hub.events_delivered,
            events_discarded: hub.events_discarded,
            tracks: hub.tracks,
            tracks_lost: hub.tracks_lost,
            announce_fired: announce.fired,
            announce_dropped: announce.dropped,
            announce_deferred: announce.deferred,
            announce_failed: announce.failed,
            reinitializations: world.reinitializations(),
            tick_errors: world.tick_errors(),
            observation: obs,
            staleness_bound,
        };

        if obs.active == 0 {
            failures.push("no active participants".to_string());
        }
        if obs.missing > 0 {
            failures.push(format!("{} published peers missing from views", obs.missing));
        }
        if obs.ghosts > 0 {
            failures.push(format!("{} ghost entities remain", obs.ghosts));
        }
        if obs.max_view_error > VIEW_TOLERANCE {
            failures.push(format!(
                "view error {:.3} exceeds {:.3}",
                obs.max_view_error, VIEW_TOLERANCE
            ));
        }
        if metrics.tick_errors > 0 {
            failures.push(format!("{} ticks failed", metrics.tick_errors));
        }

        // Lost announcements leave staleness unbounded by design
        if scenario != ScenarioId::Lossy && obs.max_staleness > staleness_bound {
            failures.push(format!(
                "staleness {:.2} exceeds bound {:.2}",
                obs.max_staleness, staleness_bound
            ));
        }
        match scenario {
            ScenarioId::Lossy if metrics.tracks_lost == 0 => {
                failures.push("no announcements were lost".to_string());
            }
            ScenarioId::Burst if metrics.announce_dropped == 0 => {
                failures.push("throttle never engaged".to_string());
            }
            ScenarioId::Churn if metrics.reinitializations == 0 => {
                failures.push("no reinitializations happened".to_string());
            }
            _ => {}
        }

        let passed = failures.is_empty();
        if !passed {
            warn!(scenario = scenario.name(), "scenario failed: {}", failures.join("; "));
        }

        ScenarioResult {
            scenario,
            seed: config.seed,
            passed,
            total_ticks: world.tick_count(),
            final_time_secs: world.time_secs(),
            final_participants: obs.active,
            failure_reason: if passed { None } else { Some(failures.join("; ")) },
            metrics,
        }
    }
}

/// How far a participant's published record may trail its true position
/// once it stops.
///
/// Under the drop policy every move made inside the window after the last
/// announcement can be lost, each at most a diagonal step. Coalescing always
/// announces the final state.
pub fn staleness_bound(config: &SimConfig) -> f64 {
    match config.session.throttle.policy {
        OverflowPolicy::Coalesce => 1e-9,
        OverflowPolicy::Drop => {
            let window = config.session.throttle.interval().as_secs_f64();
            let ticks = (window / config.dt().as_secs_f64()).ceil();
            config.session.movement.speed * std::f64::consts::SQRT_2 * ticks
        }
    }
}

/// Churn schedule: rotate reinitializations through the active participants,
/// one departure a third of the way in and one late joiner at two thirds.
async fn churn(world: &mut SimWorld, tick: u64, active_ticks: u64) -> Result<(), String> {
    let interval = (active_ticks / 6).max(1);
    let active: Vec<usize> = world
        .participants()
        .iter()
        .filter(|p| p.is_active())
        .map(|p| p.index())
        .collect();

    if tick > 0 && tick % interval == 0 && !active.is_empty() {
        let index = active[(tick / interval) as usize % active.len()];
        world
            .reinitialize(index)
            .await
            .map_err(|e| format!("reinitialize {} failed: {}", index, e))?;
    }
    if tick == active_ticks / 3 && active.len() > 2 {
        world.depart(active[0]);
    }
    if tick == 2 * active_ticks / 3 {
        world
            .add_participant()
            .await
            .map_err(|e| format!("late joiner failed: {}", e))?;
    }
    Ok(())
}

/// No session may announce more than once per throttle window.
fn check_throttle_bound(world: &SimWorld, config: &SimConfig) -> Vec<String> {
    let window = config.session.throttle.interval();
    let elapsed = world.context().now();
    let allowed = windows_in(elapsed, window) + 1;

    world
        .participants()
        .iter()
        .filter_map(|p| Some((p.index(), p.session()?.announce_stats()?)))
        .filter(|(_, counts)| counts.fired > allowed)
        .map(|(index, counts)| {
            format!(
                "participant {} announced {} times, at most {} allowed",
                index, counts.fired, allowed
            )
        })
        .collect()
}

fn windows_in(elapsed: Duration, window: Duration) -> u64 {
    if window.is_zero() {
        return u64::MAX - 1;
    }
    (elapsed.as_nanos() / window.as_nanos()) as u64
}
