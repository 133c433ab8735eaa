//! Replication scenarios for the simulator.

use crate::hub::SimHubConfig;
use crate::world::SimConfig;
use serde::{Deserialize, Serialize};
use tandem_core::OverflowPolicy;

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioId {
    /// Clean network, random walkers
    Steady,

    /// Participants reinitialize, leave and join while others move
    Churn,

    /// Latency with jitter that reorders events
    Jitter,

    /// A third of all announcements are lost
    Lossy,

    /// The hub keeps stale duplicate records behind fresh ones
    Duplicates,

    /// Everyone moves every tick at a high tick rate
    Burst,

    /// Steady, but with the coalescing throttle policy
    Coalesce,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Steady,
            ScenarioId::Churn,
            ScenarioId::Jitter,
            ScenarioId::Lossy,
            ScenarioId::Duplicates,
            ScenarioId::Burst,
            ScenarioId::Coalesce,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Steady => "steady",
            ScenarioId::Churn => "churn",
            ScenarioId::Jitter => "jitter",
            ScenarioId::Lossy => "lossy",
            ScenarioId::Duplicates => "duplicates",
            ScenarioId::Burst => "burst",
            ScenarioId::Coalesce => "coalesce",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Steady => "Random walkers on a clean network; views converge to announcements",
            ScenarioId::Churn => "Identity changes, departures and late joiners; no ghosts, nobody missing",
            ScenarioId::Jitter => "40ms latency + 0-120ms jitter with reordering; a full sync heals positions",
            ScenarioId::Lossy => "30% announcement loss; views still match what the hub holds",
            ScenarioId::Duplicates => "Stale duplicate records behind fresh ones; first record wins",
            ScenarioId::Burst => "60Hz ticks, constant movement; at most one announcement per window",
            ScenarioId::Coalesce => "Coalescing throttle; final positions are announced exactly",
        }
    }

    /// Applies this scenario's faults and policies on top of `base`.
    pub fn configure(&self, base: SimConfig) -> SimConfig {
        let mut config = base;
        match self {
            ScenarioId::Steady | ScenarioId::Churn => {}
            ScenarioId::Jitter => {
                config.hub = SimHubConfig {
                    latency_ms: 40,
                    jitter_ms: 120,
                    reorder: true,
                    ..config.hub
                };
            }
            ScenarioId::Lossy => {
                config.hub.loss_rate = 0.3;
            }
            ScenarioId::Duplicates => {
                config.hub.duplicate_rate = 0.5;
            }
            ScenarioId::Burst => {
                config.tick_rate_hz = 60;
            }
            ScenarioId::Coalesce => {
                config.session.throttle.policy = OverflowPolicy::Coalesce;
            }
        }
        config
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "steady" => Ok(ScenarioId::Steady),
            "churn" => Ok(ScenarioId::Churn),
            "jitter" => Ok(ScenarioId::Jitter),
            "lossy" | "loss" => Ok(ScenarioId::Lossy),
            "duplicates" | "dupes" => Ok(ScenarioId::Duplicates),
            "burst" => Ok(ScenarioId::Burst),
            "coalesce" => Ok(ScenarioId::Coalesce),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}
