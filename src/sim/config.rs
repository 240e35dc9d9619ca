use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2};
use serde::Deserialize;

use super::SimulationError;
use crate::model::{
    ConstantVelocity, Dynamics, DynamicsModel, RestrictedThreeBody, Vehicle, EARTH_MOON_MASS_RATIO,
};
use crate::noise::covariance_from_diagonal;

/// Contents of a scenario file.
#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioConfig {
    /// Seed of the random source; a time-derived seed is used when absent.
    #[serde(default)]
    pub seed: Option<u64>,

    #[serde(rename = "case", default)]
    pub cases: Vec<CaseConfig>,
}

impl ScenarioConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SimulationError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, SimulationError> {
        Ok(toml::from_str(content)?)
    }

    /// Case by its 1-based index, as given on the command line.
    pub fn case(&self, index: usize) -> Result<&CaseConfig, SimulationError> {
        index
            .checked_sub(1)
            .and_then(|position| self.cases.get(position))
            .ok_or(SimulationError::UnknownCase {
                index,
                available: self.cases.len(),
            })
    }
}

/// One simulated system with its noise sources.
#[derive(Debug, Clone, Deserialize)]
pub struct CaseConfig {
    pub name: String,
    /// Filter and simulation time step.
    pub dt: f64,
    /// Simulated time span; the run has `floor(duration / dt)` steps.
    pub duration: f64,
    /// Initial ground truth, also the initial filter mean.
    pub x0: Vec<f64>,
    /// Control input; empty for uncontrolled models.
    #[serde(default)]
    pub u: Vec<f64>,
    pub process_noise: NoiseConfig,
    /// Standard deviations of the initial estimate; the initial covariance is zero when absent.
    #[serde(default)]
    pub initial_covariance: Option<Vec<f64>>,
    pub model: ModelConfig,
    #[serde(default)]
    pub observations: Vec<ObservationConfig>,
    /// Records the full ground truth state of every completed step.
    #[serde(default)]
    pub ground_truth_to_file: Option<PathBuf>,
    /// Replays ground truth recorded with `ground_truth_to_file` instead of simulating it.
    #[serde(default)]
    pub ground_truth_from_file: Option<PathBuf>,
    /// Records the control input of every completed step.
    #[serde(default)]
    pub control_to_file: Option<PathBuf>,
    /// Replays controls recorded with `control_to_file`; the steering is then not perturbed.
    #[serde(default)]
    pub control_from_file: Option<PathBuf>,
}

/// Noise level given as per-component standard deviations and a common factor.
#[derive(Debug, Clone, Deserialize)]
pub struct NoiseConfig {
    pub diagonal: Vec<f64>,
    #[serde(default = "unit_scale")]
    pub scale: f64,
}

impl NoiseConfig {
    pub fn covariance(&self) -> Array2<f64> {
        covariance_from_diagonal(&Array1::from(self.diagonal.clone()), self.scale)
    }
}

/// Measurement stream sampled every `every` steps.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservationConfig {
    pub diagonal: Vec<f64>,
    #[serde(default = "unit_scale")]
    pub scale: f64,
    #[serde(default = "every_step")]
    pub every: usize,
    /// Records every measurement of this stream.
    #[serde(default)]
    pub to_file: Option<PathBuf>,
    /// Replays measurements recorded with `to_file` instead of synthesizing them.
    #[serde(default)]
    pub from_file: Option<PathBuf>,
}

impl ObservationConfig {
    pub fn covariance(&self) -> Array2<f64> {
        covariance_from_diagonal(&Array1::from(self.diagonal.clone()), self.scale)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelConfig {
    ConstantVelocity,
    ThreeBody {
        #[serde(default = "earth_moon")]
        mu: f64,
    },
    Vehicle {
        wheelbase: f64,
        response_time: f64,
        max_steering_angle: f64,
    },
}

fn unit_scale() -> f64 {
    1.0
}

fn every_step() -> usize {
    1
}

fn same_file(target: &Option<PathBuf>, source: &Option<PathBuf>) -> bool {
    matches!((target, source), (Some(target), Some(source)) if target == source)
}

fn earth_moon() -> f64 {
    EARTH_MOON_MASS_RATIO
}

impl CaseConfig {
    /// Builds the dynamics model and checks every vector and noise level against it.
    pub fn dynamics(&self) -> Result<Dynamics, SimulationError> {
        let dynamics: Dynamics = match self.model {
            ModelConfig::ConstantVelocity => ConstantVelocity::new(self.x0.len())?.into(),
            ModelConfig::ThreeBody { mu } => RestrictedThreeBody::new(mu).into(),
            ModelConfig::Vehicle {
                wheelbase,
                response_time,
                ..
            } => Vehicle::new(wheelbase, response_time).into(),
        };
        self.validate(&dynamics)?;
        Ok(dynamics)
    }

    /// Steering limit of the vehicle model, `None` for other models.
    pub fn steering_limit(&self) -> Option<f64> {
        match self.model {
            ModelConfig::Vehicle {
                max_steering_angle, ..
            } => Some(max_steering_angle),
            _ => None,
        }
    }

    pub fn steps(&self) -> usize {
        // tolerate round-off such as 0.3 / 0.1 = 2.9999999999999996
        (self.duration / self.dt + 1e-9).floor() as usize
    }

    pub fn initial_mean(&self) -> Array1<f64> {
        Array1::from(self.x0.clone())
    }

    pub fn initial_covariance(&self) -> Array2<f64> {
        match &self.initial_covariance {
            Some(diagonal) => covariance_from_diagonal(&Array1::from(diagonal.clone()), 1.0),
            None => Array2::zeros([self.x0.len(), self.x0.len()]),
        }
    }

    pub fn control(&self) -> Array1<f64> {
        Array1::from(self.u.clone())
    }

    fn validate(&self, dynamics: &Dynamics) -> Result<(), SimulationError> {
        let invalid = |reason: String| Err(SimulationError::invalid_case(&self.name, reason));

        if !(self.dt.is_finite() && self.dt > 0.0) {
            return invalid(format!("time step must be positive, got {}", self.dt));
        }
        if !(self.duration.is_finite() && self.duration >= 0.0) {
            return invalid(format!("duration must be non-negative, got {}", self.duration));
        }
        match self.model {
            ModelConfig::Vehicle {
                wheelbase,
                response_time,
                max_steering_angle,
            } => {
                if !(wheelbase.is_finite() && wheelbase > 0.0) {
                    return invalid(format!("wheelbase must be positive, got {}", wheelbase));
                }
                if !(response_time.is_finite() && response_time > 0.0) {
                    return invalid(format!("response time must be positive, got {}", response_time));
                }
                if !(max_steering_angle.is_finite() && max_steering_angle >= 0.0) {
                    return invalid(format!(
                        "maximum steering angle must be non-negative, got {}",
                        max_steering_angle
                    ));
                }
            }
            ModelConfig::ThreeBody { mu } if !mu.is_finite() => {
                return invalid(format!("mass ratio must be finite, got {}", mu));
            }
            _ => {}
        }
        let state_dim = dynamics.state_dim();
        if self.x0.len() != state_dim {
            return invalid(format!("x0 has {} entries, the model has {}", self.x0.len(), state_dim));
        }
        if self.u.len() != dynamics.control_dim() {
            return invalid(format!(
                "u has {} entries, the model takes {}",
                self.u.len(),
                dynamics.control_dim()
            ));
        }
        if self.process_noise.diagonal.len() != state_dim {
            return invalid(format!(
                "process noise has {} entries, expected {}",
                self.process_noise.diagonal.len(),
                state_dim
            ));
        }
        if let Some(diagonal) = &self.initial_covariance {
            if diagonal.len() != state_dim {
                return invalid(format!(
                    "initial covariance has {} entries, expected {}",
                    diagonal.len(),
                    state_dim
                ));
            }
        }
        if same_file(&self.ground_truth_to_file, &self.ground_truth_from_file) {
            return invalid("ground truth is recorded to the file it is replayed from".into());
        }
        if same_file(&self.control_to_file, &self.control_from_file) {
            return invalid("controls are recorded to the file they are replayed from".into());
        }
        for (index, observation) in self.observations.iter().enumerate() {
            if same_file(&observation.to_file, &observation.from_file) {
                return invalid(format!(
                    "observation {} is recorded to the file it is replayed from",
                    index + 1
                ));
            }
            if observation.every == 0 {
                return invalid(format!("observation {} has a zero sampling interval", index + 1));
            }
            if observation.diagonal.len() != dynamics.observation_dim() {
                return invalid(format!(
                    "observation {} has {} noise entries, the model observes {}",
                    index + 1,
                    observation.diagonal.len(),
                    dynamics.observation_dim()
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    const SCENARIO: &str = r#"
        seed = 7

        [[case]]
        name = "constant velocity"
        dt = 0.1
        duration = 1.0
        x0 = [0.0, 0.0, 1.0, 1.0]
        process_noise = { diagonal = [0.0, 0.0, 0.1, 0.1] }
        model = { kind = "constant_velocity" }
        observations = [{ diagonal = [0.5, 0.5], scale = 2.0 }]

        [[case]]
        name = "earth moon"
        dt = 0.01
        duration = 2.0
        x0 = [0.8, 0.0, 0.0, 0.15]
        process_noise = { diagonal = [0.0, 0.0, 1e-4, 1e-4] }
        model = { kind = "three_body" }

        [[case]]
        name = "vehicle"
        dt = 0.1
        duration = 10.0
        x0 = [0.0, 0.0, 0.0, 5.0, 0.0, 0.0]
        u = [5.0, 0.1]
        initial_covariance = [1.0, 1.0, 0.1, 0.5, 0.5, 0.1]
        process_noise = { diagonal = [0.1, 0.1, 0.01, 0.5, 0.2, 0.05], scale = 0.5 }
        model = { kind = "vehicle", wheelbase = 2.7, response_time = 0.4, max_steering_angle = 0.3 }

        [[case.observations]]
        diagonal = [0.2, 0.2, 0.02]
        every = 5
    "#;

    #[test]
    fn parses_all_cases() {
        let scenario = ScenarioConfig::from_toml(SCENARIO).unwrap();
        assert_eq!(scenario.seed, Some(7));
        assert_eq!(scenario.cases.len(), 3);

        let first = scenario.case(1).unwrap();
        assert_eq!(first.model, ModelConfig::ConstantVelocity);
        assert_eq!(first.steps(), 10);
        assert_eq!(first.observations[0].every, 1);
        assert_eq!(first.observations[0].covariance(), array![[1.0, 0.0], [0.0, 1.0]]);
        assert_eq!(first.initial_covariance(), Array2::<f64>::zeros([4, 4]));

        let second = scenario.case(2).unwrap();
        assert_eq!(second.model, ModelConfig::ThreeBody { mu: EARTH_MOON_MASS_RATIO });
        assert!(second.observations.is_empty());

        let third = scenario.case(3).unwrap();
        assert_eq!(third.steering_limit(), Some(0.3));
        assert_eq!(third.observations[0].every, 5);
        assert_eq!(third.dynamics().unwrap().control_dim(), 2);
    }

    #[test]
    fn case_index_is_one_based() {
        let scenario = ScenarioConfig::from_toml(SCENARIO).unwrap();
        assert!(matches!(
            scenario.case(0),
            Err(SimulationError::UnknownCase { index: 0, available: 3 })
        ));
        assert!(matches!(scenario.case(4), Err(SimulationError::UnknownCase { .. })));
    }

    #[test]
    fn mismatched_dimensions_are_reported() {
        let mut scenario = ScenarioConfig::from_toml(SCENARIO).unwrap();
        let mut case = scenario.cases.remove(2);
        case.u = vec![5.0];
        assert!(matches!(case.dynamics(), Err(SimulationError::InvalidCase { .. })));

        let mut case = scenario.cases.remove(0);
        case.observations[0].diagonal = vec![0.5, 0.5, 0.5];
        assert!(matches!(case.dynamics(), Err(SimulationError::InvalidCase { .. })));

        case.observations[0].diagonal = vec![0.5, 0.5];
        case.x0 = vec![0.0, 0.0, 1.0];
        assert!(matches!(
            case.dynamics(),
            Err(SimulationError::Filter(crate::error::FilterError::OddStateDimension(3)))
        ));
    }

    #[test]
    fn degenerate_vehicle_parameters_are_reported() {
        let vehicle = |parameters: &str| {
            let content = SCENARIO.replace(
                "wheelbase = 2.7, response_time = 0.4, max_steering_angle = 0.3",
                parameters,
            );
            ScenarioConfig::from_toml(&content).unwrap().cases.remove(2)
        };
        for parameters in [
            "wheelbase = 2.7, response_time = 0.4, max_steering_angle = nan",
            "wheelbase = 2.7, response_time = 0.4, max_steering_angle = -0.3",
            "wheelbase = 0.0, response_time = 0.4, max_steering_angle = 0.3",
            "wheelbase = inf, response_time = 0.4, max_steering_angle = 0.3",
            "wheelbase = 2.7, response_time = 0.0, max_steering_angle = 0.3",
            "wheelbase = 2.7, response_time = nan, max_steering_angle = 0.3",
        ] {
            let case = vehicle(parameters);
            assert!(
                matches!(case.dynamics(), Err(SimulationError::InvalidCase { .. })),
                "accepted {}",
                parameters
            );
        }
        assert!(vehicle("wheelbase = 2.7, response_time = 0.4, max_steering_angle = 0.0")
            .dynamics()
            .is_ok());
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        assert!(matches!(
            ScenarioConfig::from_toml("[[case]]\nname = 1"),
            Err(SimulationError::Parse(_))
        ));
    }
}
