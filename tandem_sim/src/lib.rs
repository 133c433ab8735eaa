//! Tandem Deterministic Simulation Testing (DST) Harness
//!
//! Runs many replication sessions against one in-memory presence hub, all on
//! a virtual clock, so a whole multi-participant run is reproducible from a
//! single seed.
//!
//! # Core Principle
//!
//! All sources of non-determinism are intercepted and controlled:
//! - **Time**: a virtual clock that moves one tick at a time
//! - **Network**: a hub with configurable latency, jitter, loss and stale duplicates
//! - **Randomness**: identities, faults and input all derive from the seed
//! - **Scheduling**: spawned announce tasks queue up and run at a fixed point in each step
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         SimWorld                            │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │ SimContext (Virtual Clock + Task Queue + ChaCha8)    │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! │       │                        │                            │
//! │  ┌────▼────────┐          ┌────▼────────┐                   │
//! │  │ SessionHost │          │ SessionHost │     ...           │
//! │  │  + script   │          │  + script   │                   │
//! │  └─────▲───────┘          └─────▲───────┘                   │
//! │        │  track / sync,join,leave │                          │
//! │  ┌─────┴──────────────────────────┴─────┐                   │
//! │  │               SimHub                 │                   │
//! │  │   (presence state + fault injection) │                   │
//! │  └──────────────────────────────────────┘                   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use tandem_sim::{ScenarioRunner, ScenarioId};
//!
//! let runner = ScenarioRunner::new(42, 4).with_duration(10.0);
//! let result = runner.run(ScenarioId::Churn).await;
//! assert!(result.passed);
//! ```

mod context;
mod exporter;
mod hub;
mod runner;
mod script;
mod surface;
mod world;
pub mod scenarios;

pub use context::SimContext;
pub use exporter::{ObserverFrame, ParticipantPosition, SimEvent, SimExport, SimFrame};
pub use hub::{HubStats, SimChannel, SimHub, SimHubConfig, SubscribeMode};
pub use runner::{staleness_bound, ScenarioMetrics, ScenarioResult, ScenarioRunner, VIEW_TOLERANCE};
pub use scenarios::ScenarioId;
pub use script::InputScript;
pub use surface::{HeadlessSurface, SceneEntity};
pub use world::{Observation, Participant, SimConfig, SimHost, SimSession, SimWorld};
