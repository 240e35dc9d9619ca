//! Continuous-discrete extended Kalman filter.
//!
//! Between measurements the mean follows the process model and the covariance follows the
//! Riccati differential equation of the linearized model; both are integrated together over
//! the elapsed time. Measurements correct the estimate at discrete instants.

use std::time::Instant;

use ndarray::{Array1, Array2, ArrayBase, ArrayView1, ArrayView2, Data, Ix1, Ix2};
use ndarray_linalg::Solve;

use crate::error::{FilterError, Result};
use crate::filter::estimate::StateEstimate;
use crate::filter::kalman_common::{
    corrected_covariance, ensure_len, ensure_square, innovation_covariance, kalman_gain,
};
use crate::filter::traits::Filter;
use crate::integrate::{Dopri5, JointState};
use crate::model::{ConstantVelocity, DynamicsModel};

/// Number of reporting intervals a prediction step is split into for the integrator.
pub const REPORTING_DIVISIONS: usize = 100;

/// Source of the time step covered by [`Filter::predict`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepClock {
    /// Every prediction covers the same, fixed time step.
    Constant(f64),
    /// Every prediction covers the wall-clock time elapsed since the previous one.
    WallClock(Instant),
}

/// Difference between a measurement and the measurement predicted from the prior estimate.
#[derive(Debug, Clone, PartialEq)]
pub struct Innovation {
    /// `y = z - h(x)`
    pub residual: Array1<f64>,
    /// `S = H P Hᵀ + R`
    pub covariance: Array2<f64>,
}

impl Innovation {
    /// Normalized innovation squared `yᵀ S⁻¹ y`, NaN when `S` is singular.
    ///
    /// For a consistent filter it follows a χ² distribution with one degree of freedom per
    /// measured quantity.
    pub fn normalized_squared(&self) -> f64 {
        match self.covariance.solve(&self.residual) {
            Ok(weighted) => self.residual.dot(&weighted),
            Err(_) => f64::NAN,
        }
    }
}

/// Extended Kalman filter with continuous-time dynamics and discrete-time measurements
///
/// The filter owns the current estimate and is generic over the [`DynamicsModel`] that supplies
/// the process and observation functions together with their Jacobians. Process noise enters
/// additively in the state derivative, measurement noise additively in the observation.
///
/// Prediction integrates, over the time step `dt`,
///
/// * `dx/dt = f(x, u)`
/// * `dP/dt = F P + P Fᵀ + Q` with `F = ∂f/∂x` evaluated at the current intermediate mean
///
/// using an adaptive Dormand-Prince integrator that reports every `dt / 100`. The covariance
/// stays symmetric up to integration error; it is not re-symmetrized.
///
/// The update is the standard linearized correction with `K = P Hᵀ S⁻¹` and the short
/// covariance form `P = (I - K H) P`. Neither step checks for NaN or infinite values: a
/// degenerate model or noise matrix poisons the estimate, which callers detect with
/// [`StateEstimate::is_finite`].
///
/// ```
/// use ndarray::{array, Array1, Array2};
/// use rusty_fusion::filter::{ExtendedKalmanFilter, Filter};
///
/// // Two dimensional constant velocity motion: state [x, y, vx, vy], positions measured.
/// let mut ekf = ExtendedKalmanFilter::constant_velocity(
///     &array![0.0, 0.0, 1.0, 1.0],
///     &Array2::<f64>::eye(4),
/// ).unwrap();
/// ekf.set_constant_dt(0.1).unwrap();
///
/// let no_control = Array1::<f64>::zeros(0);
/// let process_covariance = Array2::<f64>::eye(4) * 1e-3;
/// let dt = ekf.predict(&no_control, &process_covariance).unwrap();
/// assert_eq!(dt, 0.1);
/// assert!((ekf.mean()[0] - 0.1).abs() < 1e-9);
///
/// let innovation = ekf.update(&array![0.12, 0.09], &(Array2::<f64>::eye(2) * 0.01)).unwrap();
/// assert_eq!(innovation.residual.len(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct ExtendedKalmanFilter<M> {
    model: M,
    estimate: StateEstimate,
    clock: StepClock,
    integrator: Dopri5,
}

impl<M: DynamicsModel> ExtendedKalmanFilter<M> {
    /// Creates the filter from a model and the initial mean and covariance.
    ///
    /// The time step defaults to the wall-clock time elapsed since construction and since each
    /// prediction; use [`ExtendedKalmanFilter::set_constant_dt`] for simulations.
    pub fn new<S1, S2>(
        model: M,
        mean: &ArrayBase<S1, Ix1>,
        covariance: &ArrayBase<S2, Ix2>,
    ) -> Result<Self>
    where
        S1: Data<Elem = f64>,
        S2: Data<Elem = f64>,
    {
        ensure_len("initial mean", mean, model.state_dim())?;
        let estimate = StateEstimate::new(mean, covariance)?;
        Ok(ExtendedKalmanFilter {
            model,
            estimate,
            clock: StepClock::WallClock(Instant::now()),
            integrator: Dopri5::default(),
        })
    }

    /// Replaces the integrator, e.g. to tighten its tolerances.
    pub fn with_integrator(mut self, integrator: Dopri5) -> Self {
        self.integrator = integrator;
        self
    }

    /// Swaps the dynamics model, keeping the current estimate and time source.
    pub fn with_model<N: DynamicsModel>(self, model: N) -> Result<ExtendedKalmanFilter<N>> {
        ensure_len("estimate mean", &self.estimate.mean(), model.state_dim())?;
        Ok(ExtendedKalmanFilter {
            model,
            estimate: self.estimate,
            clock: self.clock,
            integrator: self.integrator,
        })
    }

    /// Every following prediction covers exactly `dt`.
    pub fn set_constant_dt(&mut self, dt: f64) -> Result<()> {
        check_time_step(dt)?;
        self.clock = StepClock::Constant(dt);
        Ok(())
    }

    /// Every following prediction covers the wall-clock time since the previous one, counted
    /// from now for the first.
    pub fn use_wall_clock(&mut self) {
        self.clock = StepClock::WallClock(Instant::now());
    }

    /// Replaces the estimate, e.g. to restart the filter after divergence.
    pub fn reset<S1, S2>(&mut self, mean: &ArrayBase<S1, Ix1>, covariance: &ArrayBase<S2, Ix2>) -> Result<()>
    where
        S1: Data<Elem = f64>,
        S2: Data<Elem = f64>,
    {
        ensure_len("mean", mean, self.model.state_dim())?;
        self.estimate = StateEstimate::new(mean, covariance)?;
        Ok(())
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn clock(&self) -> StepClock {
        self.clock
    }

    pub fn estimate(&self) -> &StateEstimate {
        &self.estimate
    }

    pub fn mean(&self) -> ArrayView1<f64> {
        self.estimate.mean()
    }

    pub fn covariance(&self) -> ArrayView2<f64> {
        self.estimate.covariance()
    }

    /// Prediction over an explicitly given time step, bypassing the configured clock.
    pub fn predict_over<A, B>(
        &mut self,
        control: &ArrayBase<A, Ix1>,
        process_covariance: &ArrayBase<B, Ix2>,
        dt: f64,
    ) -> Result<f64>
    where
        A: Data<Elem = f64>,
        B: Data<Elem = f64>,
    {
        ensure_len("control", control, self.model.control_dim())?;
        ensure_square("process covariance", process_covariance, self.estimate.dim())?;
        check_time_step(dt)?;

        let model = &self.model;
        let control = control.view();
        let process_covariance = process_covariance.view();
        let (mean, covariance) = self.estimate.clone().into_parts();
        let mut joint = JointState::new(mean, covariance);

        self.integrator.integrate_const(
            |_t, state: &JointState| propagation_rate(model, state, &control, &process_covariance),
            &mut joint,
            0.0,
            dt,
            dt / REPORTING_DIVISIONS as f64,
        )?;

        let (mean, covariance) = joint.into_parts();
        self.estimate = StateEstimate::from_parts(mean, covariance);
        Ok(dt)
    }

    /// Time step of the next prediction together with the clock to keep once it succeeded.
    fn next_time_step(&self) -> Result<(f64, StepClock)> {
        match self.clock {
            StepClock::Constant(dt) => Ok((dt, self.clock)),
            StepClock::WallClock(previous) => {
                let now = Instant::now();
                let dt = now.duration_since(previous).as_secs_f64();
                check_time_step(dt)?;
                Ok((dt, StepClock::WallClock(now)))
            }
        }
    }
}

impl ExtendedKalmanFilter<ConstantVelocity> {
    /// Filter over the constant-velocity model matching the length of `mean`, the default when
    /// no specific dynamics are known.
    pub fn constant_velocity<S1, S2>(mean: &ArrayBase<S1, Ix1>, covariance: &ArrayBase<S2, Ix2>) -> Result<Self>
    where
        S1: Data<Elem = f64>,
        S2: Data<Elem = f64>,
    {
        let model = ConstantVelocity::new(mean.len())?;
        ExtendedKalmanFilter::new(model, mean, covariance)
    }
}

impl<M: DynamicsModel> Filter for ExtendedKalmanFilter<M> {
    /// The time step covered by the prediction.
    type Prediction = f64;

    /// Residual and innovation covariance of the processed measurement.
    type Update = Innovation;

    fn predict<A, B>(
        &mut self,
        control: &ArrayBase<A, Ix1>,
        process_covariance: &ArrayBase<B, Ix2>,
    ) -> Result<f64>
    where
        A: Data<Elem = f64>,
        B: Data<Elem = f64>,
    {
        ensure_len("control", control, self.model.control_dim())?;
        ensure_square("process covariance", process_covariance, self.estimate.dim())?;
        let (dt, clock) = self.next_time_step()?;
        self.predict_over(control, process_covariance, dt)?;
        self.clock = clock;
        Ok(dt)
    }

    fn update<A, B>(
        &mut self,
        measurement: &ArrayBase<A, Ix1>,
        measurement_covariance: &ArrayBase<B, Ix2>,
    ) -> Result<Innovation>
    where
        A: Data<Elem = f64>,
        B: Data<Elem = f64>,
    {
        let observation_dim = self.model.observation_dim();
        ensure_len("measurement", measurement, observation_dim)?;
        ensure_square("measurement covariance", measurement_covariance, observation_dim)?;

        let mean = self.estimate.mean();
        let covariance = self.estimate.covariance();
        let expected = self.model.observation(&mean);
        let jacobian = self.model.observation_jacobian(&mean);

        let residual = measurement - &expected;
        let innovation = innovation_covariance(&jacobian, &covariance, measurement_covariance);
        let gain = kalman_gain(&covariance, &jacobian, &innovation);

        let updated_mean = &mean + &gain.dot(&residual);
        let updated_covariance = corrected_covariance(&covariance, &gain, &jacobian);
        self.estimate = StateEstimate::from_parts(updated_mean, updated_covariance);

        Ok(Innovation {
            residual,
            covariance: innovation,
        })
    }
}

fn check_time_step(dt: f64) -> Result<()> {
    if !(dt.is_finite() && dt > 0.0) {
        return Err(FilterError::InvalidTimeStep(dt));
    }
    Ok(())
}

/// Joint time derivative of mean and covariance: `(f(x, u), F P + P Fᵀ + Q)`.
fn propagation_rate<M: DynamicsModel>(
    model: &M,
    state: &JointState,
    control: &ArrayView1<f64>,
    process_covariance: &ArrayView2<f64>,
) -> JointState {
    let mean = state.mean.view();
    let jacobian = model.transition_jacobian(&mean, control);
    let mean_rate = model.transition(&mean, control);
    let covariance_rate = jacobian.dot(&state.covariance)
        + state.covariance.dot(&jacobian.t())
        + process_covariance;
    JointState::new(mean_rate, covariance_rate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::kalman_common::asymmetry;
    use crate::integrate::{IntegrateError, IntegratorSettings};
    use crate::model::{RestrictedThreeBody, Vehicle};
    use crate::testing::max_abs_diff;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn no_control() -> Array1<f64> {
        Array1::zeros(0)
    }

    fn cv_filter(mean: Array1<f64>, covariance: Array2<f64>) -> ExtendedKalmanFilter<ConstantVelocity> {
        let mut ekf = ExtendedKalmanFilter::constant_velocity(&mean, &covariance).unwrap();
        ekf.set_constant_dt(0.1).unwrap();
        ekf
    }

    #[test]
    fn stationary_mean_is_unchanged_without_noise() {
        let mean = array![3.0, -1.0, 0.0, 0.0];
        let covariance = array![
            [2.0, 0.1, 0.0, 0.0],
            [0.1, 1.0, 0.0, 0.0],
            [0.0, 0.0, 0.5, 0.0],
            [0.0, 0.0, 0.0, 0.5]
        ];
        let mut ekf = cv_filter(mean.clone(), covariance);
        for _ in 0..5 {
            ekf.predict(&no_control(), &Array2::<f64>::zeros([4, 4])).unwrap();
        }
        assert_eq!(ekf.mean(), mean.view());
    }

    #[test]
    fn constant_velocity_covariance_matches_closed_form() {
        // P(t) = Φ P0 Φᵀ with Φ = [[1, t], [0, 1]] for zero process noise
        let mut ekf = cv_filter(array![0.0, 1.0], array![[1.0, 0.0], [0.0, 2.0]]);
        ekf.predict_over(&no_control(), &Array2::<f64>::zeros([2, 2]), 0.5).unwrap();
        let expected = array![[1.5, 1.0], [1.0, 2.0]];
        assert!(max_abs_diff(&ekf.covariance().to_owned(), &expected) < 1e-9);
        assert_abs_diff_eq!(ekf.mean()[0], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn predicted_covariance_stays_symmetric() {
        let model = Vehicle::default();
        let mean = array![0.0, 0.0, 0.3, 2.0, 0.1, 0.05];
        let covariance = Array2::<f64>::eye(6) * 0.2;
        let mut ekf = ExtendedKalmanFilter::new(model, &mean, &covariance).unwrap();
        let control = array![3.0, 0.2];
        let process_covariance = Array2::from_diag(&array![0.1, 0.1, 0.01, 0.5, 0.5, 0.05]);
        for dt in [0.01, 0.1, 0.5, 1.0] {
            ekf.predict_over(&control, &process_covariance, dt).unwrap();
            assert!(asymmetry(&ekf.covariance()) < 1e-9);
        }
    }

    #[test]
    fn process_noise_grows_covariance_trace() {
        let mut ekf = cv_filter(array![0.0, 0.0, 1.0, 1.0], Array2::<f64>::eye(4) * 0.1);
        let process_covariance = Array2::<f64>::eye(4) * 0.01;
        let mut previous = ekf.estimate().covariance_trace();
        for _ in 0..10 {
            ekf.predict(&no_control(), &process_covariance).unwrap();
            let current = ekf.estimate().covariance_trace();
            assert!(current > previous);
            previous = current;
        }
    }

    #[test]
    fn precise_measurement_is_trusted() {
        let mut ekf = cv_filter(array![0.0, 0.0, 1.0, 1.0], Array2::<f64>::eye(4));
        let measurement = array![3.0, -2.0];
        ekf.update(&measurement, &(Array2::<f64>::eye(2) * 1e-12)).unwrap();
        assert_abs_diff_eq!(ekf.mean()[0], 3.0, epsilon = 1e-9);
        assert_abs_diff_eq!(ekf.mean()[1], -2.0, epsilon = 1e-9);
        assert!(ekf.covariance()[[0, 0]] < 1e-9);
    }

    #[test]
    fn vague_measurement_is_ignored() {
        let mean = array![0.5, 0.0, 1.0, 1.0];
        let covariance = Array2::<f64>::eye(4);
        let mut ekf = cv_filter(mean.clone(), covariance.clone());
        ekf.update(&array![100.0, -100.0], &(Array2::<f64>::eye(2) * 1e14)).unwrap();
        assert!(max_abs_diff(&ekf.mean().to_owned(), &mean) < 1e-9);
        assert!(max_abs_diff(&ekf.covariance().to_owned(), &covariance) < 1e-9);
    }

    #[test]
    fn update_returns_innovation() {
        let mut ekf = cv_filter(array![1.0, 2.0, 0.0, 0.0], Array2::<f64>::eye(4));
        let innovation = ekf
            .update(&array![1.5, 1.0], &(Array2::<f64>::eye(2) * 0.5))
            .unwrap();
        assert_eq!(innovation.residual, array![0.5, -1.0]);
        assert_eq!(innovation.covariance, Array2::<f64>::eye(2) * 1.5);
        assert_abs_diff_eq!(innovation.normalized_squared(), 1.25 / 1.5, epsilon = 1e-12);
    }

    #[test]
    fn mismatched_shapes_are_rejected_without_touching_the_estimate() {
        let mut ekf = cv_filter(array![0.0, 0.0, 1.0, 1.0], Array2::<f64>::eye(4));
        let before = ekf.estimate().clone();

        assert!(matches!(
            ekf.update(&array![1.0, 2.0, 3.0], &Array2::<f64>::eye(3)),
            Err(FilterError::VectorLength { name: "measurement", expected: 2, found: 3 })
        ));
        assert!(matches!(
            ekf.update(&array![1.0, 2.0], &Array2::<f64>::eye(3)),
            Err(FilterError::MatrixShape { .. })
        ));
        assert!(matches!(
            ekf.predict(&no_control(), &Array2::<f64>::eye(3)),
            Err(FilterError::MatrixShape { .. })
        ));
        assert!(matches!(
            ekf.predict(&array![1.0], &Array2::<f64>::eye(4)),
            Err(FilterError::VectorLength { name: "control", .. })
        ));
        assert_eq!(ekf.estimate(), &before);
    }

    #[test]
    fn initial_estimate_has_to_match_model() {
        let result = ExtendedKalmanFilter::new(Vehicle::default(), &array![0.0, 0.0], &Array2::<f64>::eye(2));
        assert!(result.is_err());
        let result = ExtendedKalmanFilter::new(
            RestrictedThreeBody::default(),
            &array![0.8, 0.0, 0.0, 0.1],
            &Array2::<f64>::eye(3),
        );
        assert!(result.is_err());
    }

    #[test]
    fn invalid_time_steps_are_rejected() {
        let mut ekf = cv_filter(array![0.0, 1.0], Array2::<f64>::eye(2));
        assert!(ekf.set_constant_dt(0.0).is_err());
        assert!(ekf.set_constant_dt(-0.1).is_err());
        assert!(ekf.set_constant_dt(f64::NAN).is_err());
        assert!(matches!(
            ekf.predict_over(&no_control(), &Array2::<f64>::zeros([2, 2]), 0.0),
            Err(FilterError::InvalidTimeStep(_))
        ));
        assert_eq!(ekf.clock(), StepClock::Constant(0.1));
    }

    #[test]
    fn wall_clock_reports_elapsed_time() {
        let mut ekf = cv_filter(array![0.0, 1.0], Array2::<f64>::eye(2));
        ekf.use_wall_clock();
        std::thread::sleep(std::time::Duration::from_millis(20));
        let dt = ekf.predict(&no_control(), &Array2::<f64>::zeros([2, 2])).unwrap();
        assert!(dt >= 0.02);
        assert_abs_diff_eq!(ekf.mean()[0], dt, epsilon = 1e-9);
    }

    #[test]
    fn swapping_model_checks_state_dimension() {
        let ekf = cv_filter(array![0.8, 0.0, 0.0, 0.1], Array2::<f64>::eye(4));
        assert!(ekf.clone().with_model(Vehicle::default()).is_err());
        let swapped = ekf.with_model(RestrictedThreeBody::default()).unwrap();
        assert_eq!(swapped.clock(), StepClock::Constant(0.1));
    }

    #[test]
    fn three_body_prediction_conserves_jacobi_constant() {
        let model = RestrictedThreeBody::default();
        let mean = array![0.48, 0.86, 0.02, -0.01];
        let initial = model.jacobi_constant(&mean.view());
        let mut ekf = ExtendedKalmanFilter::new(model, &mean, &(Array2::<f64>::eye(4) * 1e-4)).unwrap();
        ekf.set_constant_dt(0.05).unwrap();
        for _ in 0..20 {
            ekf.predict(&no_control(), &Array2::<f64>::zeros([4, 4])).unwrap();
        }
        let last = model.jacobi_constant(&ekf.mean());
        assert_abs_diff_eq!(last, initial, epsilon = 1e-7);
    }

    #[test]
    fn non_finite_noise_poisons_estimate_without_error() {
        let mut ekf = cv_filter(array![0.0, 1.0], Array2::<f64>::eye(2));
        let process_covariance = array![[f64::NAN, 0.0], [0.0, 0.0]];
        ekf.predict(&no_control(), &process_covariance).unwrap();
        assert!(!ekf.estimate().is_finite());
    }

    #[test]
    fn singular_innovation_covariance_poisons_estimate_without_error() {
        let mut ekf = cv_filter(array![0.0, 0.0, 1.0, 1.0], Array2::<f64>::zeros([4, 4]));
        let innovation = ekf.update(&array![0.5, 0.5], &Array2::<f64>::zeros([2, 2])).unwrap();
        assert_eq!(innovation.residual, array![0.5, 0.5]);
        assert!(!ekf.estimate().is_finite());
        assert!(innovation.normalized_squared().is_nan());
    }

    #[test]
    fn reset_recovers_from_divergence() {
        let mut ekf = cv_filter(array![0.0, 1.0], Array2::<f64>::eye(2));
        ekf.predict(&no_control(), &array![[f64::NAN, 0.0], [0.0, 0.0]]).unwrap();
        assert!(!ekf.estimate().is_finite());

        assert!(ekf.reset(&array![0.0, 1.0, 2.0], &Array2::<f64>::eye(3)).is_err());
        assert!(!ekf.estimate().is_finite());

        ekf.reset(&array![2.0, 1.0], &Array2::<f64>::eye(2)).unwrap();
        assert!(ekf.estimate().is_finite());
        ekf.predict(&no_control(), &Array2::<f64>::zeros([2, 2])).unwrap();
        assert_abs_diff_eq!(ekf.mean()[0], 2.1, epsilon = 1e-9);
    }

    #[test]
    fn failed_integration_keeps_estimate_and_wall_clock() {
        let settings = IntegratorSettings {
            max_steps: 3,
            ..IntegratorSettings::default()
        };
        let mut ekf = cv_filter(array![0.0, 1.0], Array2::<f64>::eye(2)).with_integrator(Dopri5::new(settings));
        assert_eq!(ekf.integrator.settings().max_steps, 3);
        ekf.use_wall_clock();
        let clock = ekf.clock();
        let before = ekf.estimate().clone();
        std::thread::sleep(std::time::Duration::from_millis(5));

        assert!(matches!(
            ekf.predict(&no_control(), &Array2::<f64>::zeros([2, 2])),
            Err(FilterError::Integration(IntegrateError::MaxStepsExceeded { .. }))
        ));
        assert_eq!(ekf.clock(), clock);
        assert_eq!(ekf.estimate(), &before);

        ekf = ekf.with_integrator(Dopri5::default());
        let dt = ekf.predict(&no_control(), &Array2::<f64>::zeros([2, 2])).unwrap();
        assert!(dt >= 0.005);
        assert_ne!(ekf.clock(), clock);
    }
}
