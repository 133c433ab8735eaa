//! JSON exporter for offline inspection of simulation runs.
//!
//! Each frame records where every participant really is and what every
//! observer currently draws for the others, so divergence can be plotted.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use tandem_core::RemoteView;

/// A single frame of simulation data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimFrame {
    /// Simulation time in seconds
    pub time_sec: f64,

    pub tick: u64,

    /// True local positions
    pub participants: Vec<ParticipantPosition>,

    /// Each observer's view of the others
    pub views: Vec<ObserverFrame>,

    /// Events (reinitializations, departures, etc.)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<SimEvent>,
}

/// Position of a participant's own entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantPosition {
    pub id: String,
    pub x: f64,
    pub y: f64,
}

/// What one observer draws.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObserverFrame {
    pub observer: String,
    pub remotes: Vec<RemoteView>,
}

/// Simulation event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimEvent {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

impl SimEvent {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level: None,
        }
    }
}

/// Complete simulation export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Duration in seconds
    pub duration_sec: f64,

    /// All frames
    pub frames: Vec<SimFrame>,

    /// Final results
    pub passed: bool,

    /// Largest observer/announcement gap at the end of the run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_view_error: Option<f64>,
}

impl SimExport {
    /// Creates a new export container.
    pub fn new(scenario: &str, seed: u64) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            duration_sec: 0.0,
            frames: Vec::new(),
            passed: false,
            final_view_error: None,
        }
    }

    /// Adds a frame.
    pub fn add_frame(&mut self, frame: SimFrame) {
        self.duration_sec = frame.time_sec;
        self.frames.push(frame);
    }

    /// Finalizes the export.
    pub fn finalize(&mut self, passed: bool, view_error: Option<f64>) {
        self.passed = passed;
        self.final_view_error = view_error;
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
