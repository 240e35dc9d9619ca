use std::fs::File;
use std::path::PathBuf;

use ndarray::{s, Array1, Array2};
use rand::Rng;
use tracing::{debug, info, warn};

use super::replay::{VectorReader, VectorWriter};
use super::{CaseConfig, RecordSink, SimulationError};
use crate::error::FilterError;
use crate::filter::kalman::nonlinear::REPORTING_DIVISIONS;
use crate::filter::{ExtendedKalmanFilter, Filter, Innovation};
use crate::integrate::Dopri5;
use crate::model::{Dynamics, DynamicsModel, Vehicle};
use crate::noise::NoiseGenerator;

/// The vehicle's steering command is perturbed once every this many steps.
pub const STEERING_PERIOD: usize = 10;

/// Largest steering perturbation, 5°.
const STEERING_JITTER: f64 = 5.0 * std::f64::consts::PI / 180.0;

/// State of a single simulated step.
///
/// Planar quantities are the first two state components, the position for every bundled model.
#[derive(Debug, Clone, PartialEq)]
pub struct StepRecord {
    /// 1-based step number.
    pub step: usize,
    pub time: f64,
    pub truth: [f64; 2],
    /// Position reconstructed from each observation stream alone.
    pub tracks: Vec<[f64; 2]>,
    /// One entry per observation stream, `None` on steps where the stream was not sampled or
    /// the filter did not run.
    pub residuals: Vec<Option<StreamResidual>>,
    pub estimate: [f64; 2],
    /// Top-left 2×2 block of the covariance, row-major.
    pub covariance: [f64; 4],
    pub covariance_trace: f64,
}

/// How far a stream's measurement was from the filter's prediction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamResidual {
    /// First two components of `y = z - h(x)`; zero past the measurement length.
    pub residual: [f64; 2],
    /// Normalized innovation squared `yᵀ S⁻¹ y`.
    pub nis: f64,
}

impl From<&Innovation> for StreamResidual {
    fn from(innovation: &Innovation) -> Self {
        let component = |index: usize| innovation.residual.get(index).copied().unwrap_or(0.0);
        StreamResidual {
            residual: [component(0), component(1)],
            nis: innovation.normalized_squared(),
        }
    }
}

/// Outcome of a run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub steps_completed: usize,
    /// Step at which the covariance stopped being finite.
    pub diverged_at: Option<usize>,
    pub final_mean: Array1<f64>,
    pub final_covariance: Array2<f64>,
    /// Root mean square distance between estimated and true position over all recorded steps.
    pub rms_position_error: f64,
}

struct ObservationStream {
    every: usize,
    covariance: Array2<f64>,
    noise: NoiseGenerator,
    /// Dead-reckoned or directly measured state of this stream alone.
    track: Array1<f64>,
    /// Ground truth at the previous sample, for the velocity estimate of the vehicle.
    previous_truth: Array1<f64>,
    source: Option<VectorReader<File>>,
    recorder: Option<VectorWriter<File>>,
}

impl ObservationStream {
    /// Folds a measurement into the stream's own track. Vehicle body rates are dead-reckoned
    /// over `interval`, other measurements replace the leading state components.
    fn follow(&mut self, dynamics: &Dynamics, measurement: &Array1<f64>, interval: f64) {
        match dynamics {
            Dynamics::Vehicle(_) => {
                let world_rates = Vehicle::body_to_world(&measurement.view(), self.track[2]);
                let mut pose = self.track.slice_mut(s![..3]);
                pose.scaled_add(interval, &world_rates);
            }
            _ => self
                .track
                .slice_mut(s![..measurement.len()])
                .assign(measurement),
        }
    }
}

/// Simulation of one test case.
///
/// Every step propagates the ground truth with a process noise sample held over the step, runs
/// the filter prediction, feeds each due observation stream a noisy synthetic measurement and
/// records the result. Ground truth and filter are integrated with the same integrator.
///
/// Ground truth, controls and measurements are read from their replay files instead when the
/// case names one, and written to their record files after they were used.
pub struct Simulation {
    name: String,
    dynamics: Dynamics,
    dt: f64,
    steps: usize,
    control: Array1<f64>,
    steering_limit: Option<f64>,
    process_covariance: Array2<f64>,
    process_noise: NoiseGenerator,
    streams: Vec<ObservationStream>,
    filter: ExtendedKalmanFilter<Dynamics>,
    truth: Array1<f64>,
    integrator: Dopri5,
    ground_truth_only: bool,
    truth_source: Option<VectorReader<File>>,
    truth_recorder: Option<VectorWriter<File>>,
    control_source: Option<VectorReader<File>>,
    control_recorder: Option<VectorWriter<File>>,
}

impl Simulation {
    /// Prepares a run of `case`, opening its replay files and truncating its record files. With
    /// `ground_truth_only` the filter is never stepped and only truth and stream tracks evolve.
    pub fn new(case: &CaseConfig, ground_truth_only: bool) -> Result<Self, SimulationError> {
        let dynamics = case.dynamics()?;
        let truth = case.initial_mean();
        let mut filter = ExtendedKalmanFilter::new(dynamics.clone(), &truth, &case.initial_covariance())?;
        filter.set_constant_dt(case.dt)?;

        let process_covariance = case.process_noise.covariance();
        let process_noise = NoiseGenerator::new(&process_covariance)?;
        let streams = case
            .observations
            .iter()
            .map(|observation| -> Result<ObservationStream, SimulationError> {
                let covariance = observation.covariance();
                Ok(ObservationStream {
                    every: observation.every,
                    noise: NoiseGenerator::new(&covariance)?,
                    covariance,
                    track: truth.clone(),
                    previous_truth: truth.clone(),
                    source: open_source(&observation.from_file)?,
                    recorder: create_recorder(&observation.to_file)?,
                })
            })
            .collect::<Result<Vec<_>, SimulationError>>()?;

        Ok(Simulation {
            name: case.name.clone(),
            dynamics,
            dt: case.dt,
            steps: case.steps(),
            control: case.control(),
            steering_limit: case.steering_limit(),
            process_covariance,
            process_noise,
            streams,
            filter,
            truth,
            integrator: Dopri5::default(),
            ground_truth_only,
            truth_source: open_source(&case.ground_truth_from_file)?,
            truth_recorder: create_recorder(&case.ground_truth_to_file)?,
            control_source: open_source(&case.control_from_file)?,
            control_recorder: create_recorder(&case.control_to_file)?,
        })
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn filter(&self) -> &ExtendedKalmanFilter<Dynamics> {
        &self.filter
    }

    pub fn truth(&self) -> &Array1<f64> {
        &self.truth
    }

    /// Runs all steps, drawing every random number from `rng`.
    ///
    /// A non-finite covariance ends the run early; it is logged and reported in the summary
    /// rather than returned as an error.
    pub fn run<R: Rng>(
        &mut self,
        rng: &mut R,
        sink: &mut dyn RecordSink,
    ) -> Result<RunSummary, SimulationError> {
        info!(
            case = %self.name,
            steps = self.steps,
            streams = self.streams.len(),
            replay_truth = self.truth_source.is_some(),
            replay_control = self.control_source.is_some(),
            "starting simulation"
        );

        let mut steps_completed = 0;
        let mut diverged_at = None;
        let mut squared_error = 0.0;

        for step in 1..=self.steps {
            if let Some(source) = self.control_source.as_mut() {
                self.control = source.next_vector(self.dynamics.control_dim())?;
            } else if let Some(limit) = self.steering_limit {
                if step % STEERING_PERIOD == 0 {
                    self.perturb_steering(rng, limit);
                }
            }

            match self.truth_source.as_mut() {
                Some(source) => self.truth = source.next_vector(self.dynamics.state_dim())?,
                None => self.propagate_truth(rng)?,
            }

            if !self.ground_truth_only {
                self.filter.predict(&self.control, &self.process_covariance)?;
            }

            let mut residuals = vec![None; self.streams.len()];
            for (index, stream) in self.streams.iter_mut().enumerate() {
                if step % stream.every != 0 {
                    continue;
                }
                let interval = self.dt * stream.every as f64;
                let measurement = match stream.source.as_mut() {
                    Some(source) => source.next_vector(self.dynamics.observation_dim())?,
                    None => synthesize_measurement(&self.dynamics, stream, &self.truth, interval, rng),
                };
                stream.follow(&self.dynamics, &measurement, interval);
                if let Some(recorder) = stream.recorder.as_mut() {
                    recorder.write(&measurement)?;
                }
                if !self.ground_truth_only {
                    let innovation = self.filter.update(&measurement, &stream.covariance)?;
                    residuals[index] = Some(StreamResidual::from(&innovation));
                }
            }

            if !self.filter.estimate().is_finite() {
                warn!(case = %self.name, step, "covariance is no longer finite, stopping");
                diverged_at = Some(step);
                break;
            }

            let record = self.record(step, residuals);
            squared_error += (record.estimate[0] - record.truth[0]).powi(2)
                + (record.estimate[1] - record.truth[1]).powi(2);
            debug!(
                step,
                trace = record.covariance_trace,
                x = record.estimate[0],
                y = record.estimate[1],
                "step completed"
            );
            sink.record(&record)?;
            if let Some(recorder) = self.truth_recorder.as_mut() {
                recorder.write(&self.truth)?;
            }
            if let Some(recorder) = self.control_recorder.as_mut() {
                recorder.write(&self.control)?;
            }
            steps_completed = step;
        }
        sink.finish()?;
        self.flush_recorders()?;

        let rms_position_error = if steps_completed > 0 {
            (squared_error / steps_completed as f64).sqrt()
        } else {
            0.0
        };
        let (final_mean, final_covariance) = self.filter.estimate().clone().into_parts();
        info!(
            case = %self.name,
            steps_completed,
            rms_position_error,
            "simulation finished"
        );
        Ok(RunSummary {
            steps_completed,
            diverged_at,
            final_mean,
            final_covariance,
            rms_position_error,
        })
    }

    fn perturb_steering<R: Rng>(&mut self, rng: &mut R, limit: f64) {
        let steering = self.control[1] + rng.gen_range(-1.0..1.0) * STEERING_JITTER;
        self.control[1] = Vehicle::clamp_steering(steering, limit);
    }

    /// Advances the ground truth by one step with a process noise sample added to its rate.
    fn propagate_truth<R: Rng>(&mut self, rng: &mut R) -> Result<(), SimulationError> {
        let disturbance: Array1<f64> = rng.sample(&self.process_noise);
        let dynamics = &self.dynamics;
        let control = self.control.view();
        self.integrator
            .integrate_const(
                |_t, state: &Array1<f64>| dynamics.transition(&state.view(), &control) + &disturbance,
                &mut self.truth,
                0.0,
                self.dt,
                self.dt / REPORTING_DIVISIONS as f64,
            )
            .map_err(FilterError::from)?;
        Ok(())
    }

    fn flush_recorders(&mut self) -> Result<(), SimulationError> {
        let recorders = self
            .streams
            .iter_mut()
            .filter_map(|stream| stream.recorder.as_mut())
            .chain(self.truth_recorder.as_mut())
            .chain(self.control_recorder.as_mut());
        for recorder in recorders {
            recorder.flush()?;
        }
        Ok(())
    }

    fn record(&self, step: usize, residuals: Vec<Option<StreamResidual>>) -> StepRecord {
        let mean = self.filter.mean();
        let covariance = self.filter.covariance();
        StepRecord {
            step,
            time: step as f64 * self.dt,
            truth: [self.truth[0], self.truth[1]],
            tracks: self
                .streams
                .iter()
                .map(|stream| [stream.track[0], stream.track[1]])
                .collect(),
            residuals,
            estimate: [mean[0], mean[1]],
            covariance: [
                covariance[[0, 0]],
                covariance[[0, 1]],
                covariance[[1, 0]],
                covariance[[1, 1]],
            ],
            covariance_trace: self.filter.estimate().covariance_trace(),
        }
    }
}

fn open_source(path: &Option<PathBuf>) -> Result<Option<VectorReader<File>>, SimulationError> {
    path.as_ref().map(VectorReader::open).transpose()
}

fn create_recorder(path: &Option<PathBuf>) -> Result<Option<VectorWriter<File>>, SimulationError> {
    path.as_ref().map(VectorWriter::create).transpose()
}

/// Noisy measurement of the current ground truth.
fn synthesize_measurement<R: Rng>(
    dynamics: &Dynamics,
    stream: &mut ObservationStream,
    truth: &Array1<f64>,
    interval: f64,
    rng: &mut R,
) -> Array1<f64> {
    match dynamics {
        Dynamics::Vehicle(_) => measure_body_rates(stream, truth, interval, rng),
        model => {
            let noise: Array1<f64> = rng.sample(&stream.noise);
            model.observation(&truth.view()) + noise
        }
    }
}

/// Body-frame velocity and heading rate of the vehicle, estimated from the pose change since
/// the stream's previous sample and expressed in the heading of that sample.
fn measure_body_rates<R: Rng>(
    stream: &mut ObservationStream,
    truth: &Array1<f64>,
    interval: f64,
    rng: &mut R,
) -> Array1<f64> {
    let pose_rates = (&truth.slice(s![..3]) - &stream.previous_truth.slice(s![..3])) / interval;
    let mut measurement = Vehicle::world_to_body(&pose_rates.view(), stream.previous_truth[2]);
    stream.previous_truth.assign(truth);
    let noise: Array1<f64> = rng.sample(&stream.noise);
    measurement += &noise;
    measurement
}
