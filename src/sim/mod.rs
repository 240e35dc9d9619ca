//! Simulation driver for the extended Kalman filter.
//!
//! A scenario file lists test cases, each describing a dynamical system, its process noise and
//! a set of observation streams. [`Simulation`] propagates a noisy ground truth for one case,
//! synthesizes measurements from it, runs the filter alongside and hands a [`StepRecord`] per
//! step to a [`RecordSink`].
//!
//! ```toml
//! seed = 42
//!
//! [[case]]
//! name = "constant velocity"
//! dt = 0.1
//! duration = 10.0
//! x0 = [0.0, 0.0, 1.0, 1.0]
//! process_noise = { diagonal = [0.0, 0.0, 0.1, 0.1], scale = 1.0 }
//! model = { kind = "constant_velocity" }
//! observations = [{ diagonal = [0.5, 0.5], scale = 1.0, every = 1 }]
//! ```
//!
//! Ground truth, controls and measurements can be recorded to CSV files and replayed in place
//! of their generated counterparts, see `ground_truth_to_file`, `ground_truth_from_file`,
//! `control_to_file`, `control_from_file` and the per-stream `to_file` and `from_file` keys.

mod config;
mod output;
mod replay;
mod simulation;

pub use config::{CaseConfig, ModelConfig, NoiseConfig, ObservationConfig, ScenarioConfig};
pub use output::{CsvSink, MemorySink, RecordSink};
pub use replay::{VectorReader, VectorWriter};
pub use simulation::{RunSummary, Simulation, StepRecord, StreamResidual, STEERING_PERIOD};

use std::path::PathBuf;

use crate::error::FilterError;

/// Errors of the simulation driver.
#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid scenario file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("case {index} requested but the scenario defines {available} case(s)")]
    UnknownCase { index: usize, available: usize },

    #[error("case '{case}': {reason}")]
    InvalidCase { case: String, reason: String },

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("replay file {}: {reason}", .path.display())]
    Replay { path: PathBuf, reason: String },

    #[error(transparent)]
    Filter(#[from] FilterError),
}

impl SimulationError {
    pub(crate) fn invalid_case(case: &str, reason: impl Into<String>) -> Self {
        SimulationError::InvalidCase {
            case: case.to_string(),
            reason: reason.into(),
        }
    }
}
