use tracing::trace;

use super::{IntegrateError, IntegratorSettings, OdeState};

// Dormand-Prince 5(4) tableau.
const C: [f64; 7] = [0.0, 1.0 / 5.0, 3.0 / 10.0, 4.0 / 5.0, 8.0 / 9.0, 1.0, 1.0];

const A: [[f64; 6]; 7] = [
    [0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
    [1.0 / 5.0, 0.0, 0.0, 0.0, 0.0, 0.0],
    [3.0 / 40.0, 9.0 / 40.0, 0.0, 0.0, 0.0, 0.0],
    [44.0 / 45.0, -56.0 / 15.0, 32.0 / 9.0, 0.0, 0.0, 0.0],
    [
        19372.0 / 6561.0,
        -25360.0 / 2187.0,
        64448.0 / 6561.0,
        -212.0 / 729.0,
        0.0,
        0.0,
    ],
    [
        9017.0 / 3168.0,
        -355.0 / 33.0,
        46732.0 / 5247.0,
        49.0 / 176.0,
        -5103.0 / 18656.0,
        0.0,
    ],
    [
        35.0 / 384.0,
        0.0,
        500.0 / 1113.0,
        125.0 / 192.0,
        -2187.0 / 6784.0,
        11.0 / 84.0,
    ],
];

// Fifth order weights; the last stage is evaluated at the new state (first same as last).
const B: [f64; 7] = [
    35.0 / 384.0,
    0.0,
    500.0 / 1113.0,
    125.0 / 192.0,
    -2187.0 / 6784.0,
    11.0 / 84.0,
    0.0,
];

// Difference between the fifth and the embedded fourth order weights.
const E: [f64; 7] = [
    71.0 / 57600.0,
    0.0,
    -71.0 / 16695.0,
    71.0 / 1920.0,
    -17253.0 / 339200.0,
    22.0 / 525.0,
    -1.0 / 40.0,
];

const ORDER: f64 = 5.0;

/// Counters collected during one integration call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IntegrationStats {
    pub accepted: usize,
    pub rejected: usize,
    pub evaluations: usize,
}

/// Adaptive Dormand-Prince 5(4) integrator.
///
/// The integrator holds no state between calls apart from its settings; stage buffers are
/// allocated per call.
#[derive(Debug, Clone, Default)]
pub struct Dopri5 {
    settings: IntegratorSettings,
}

impl Dopri5 {
    pub fn new(settings: IntegratorSettings) -> Self {
        Dopri5 { settings }
    }

    pub fn settings(&self) -> &IntegratorSettings {
        &self.settings
    }

    /// Integrates `state` from `t0` to `t1`, visiting every multiple of `stride` on the way.
    ///
    /// Between two reporting points the step size is chosen adaptively; the last accepted step
    /// size carries over to the next interval. The final interval is shortened so that the
    /// integration ends exactly at `t1`. An empty interval (`t0 == t1`) leaves `state` untouched.
    pub fn integrate_const<S, F>(
        &self,
        mut system: F,
        state: &mut S,
        t0: f64,
        t1: f64,
        stride: f64,
    ) -> Result<IntegrationStats, IntegrateError>
    where
        S: OdeState,
        F: FnMut(f64, &S) -> S,
    {
        if !t0.is_finite() || !t1.is_finite() || t1 < t0 {
            return Err(IntegrateError::InvalidInterval { from: t0, to: t1 });
        }
        if !(stride.is_finite() && stride > 0.0) {
            return Err(IntegrateError::InvalidStride(stride));
        }

        let mut stats = IntegrationStats::default();
        if t1 == t0 {
            return Ok(stats);
        }

        let intervals = (((t1 - t0) / stride) - 1e-9).ceil().max(1.0) as usize;
        let mut h = stride;
        let mut t = t0;
        for index in 1..=intervals {
            let target = if index == intervals {
                t1
            } else {
                t0 + stride * index as f64
            };
            h = self.advance(&mut system, state, t, target, h, &mut stats)?;
            t = target;
        }

        trace!(
            accepted = stats.accepted,
            rejected = stats.rejected,
            evaluations = stats.evaluations,
            "integrated [{}, {}]",
            t0,
            t1
        );
        Ok(stats)
    }

    /// Integrates `state` from `t0` to `t1` with a single adaptive pass.
    pub fn integrate_adaptive<S, F>(
        &self,
        mut system: F,
        state: &mut S,
        t0: f64,
        t1: f64,
        initial_step: f64,
    ) -> Result<IntegrationStats, IntegrateError>
    where
        S: OdeState,
        F: FnMut(f64, &S) -> S,
    {
        if !t0.is_finite() || !t1.is_finite() || t1 < t0 {
            return Err(IntegrateError::InvalidInterval { from: t0, to: t1 });
        }
        let mut stats = IntegrationStats::default();
        if t1 > t0 {
            let h = if initial_step > 0.0 { initial_step } else { t1 - t0 };
            self.advance(&mut system, state, t0, t1, h, &mut stats)?;
        }
        Ok(stats)
    }

    /// Steps from `t` to `target`, returning the step size proposed for the next step.
    fn advance<S, F>(
        &self,
        system: &mut F,
        state: &mut S,
        mut t: f64,
        target: f64,
        mut h: f64,
        stats: &mut IntegrationStats,
    ) -> Result<f64, IntegrateError>
    where
        S: OdeState,
        F: FnMut(f64, &S) -> S,
    {
        let settings = &self.settings;
        let mut derivative = system(t, state);
        stats.evaluations += 1;
        let mut proposal = h;

        while t < target {
            if stats.accepted + stats.rejected >= settings.max_steps {
                return Err(IntegrateError::MaxStepsExceeded {
                    steps: settings.max_steps,
                    t,
                });
            }

            let remaining = target - t;
            let last = h >= remaining;
            if last {
                h = remaining;
            }

            let (candidate, candidate_derivative, error) =
                Self::try_step(system, state, &derivative, t, h);
            stats.evaluations += 6;

            let norm = state.error_norm(&candidate, &error, settings.abs_tol, settings.rel_tol);
            if norm <= 1.0 || !norm.is_finite() || h <= settings.min_step {
                *state = candidate;
                derivative = candidate_derivative;
                t = if last { target } else { t + h };
                stats.accepted += 1;

                let grow = growth_factor(settings, norm);
                // A shortened final step must not shrink the proposal for the next interval.
                if !last || h >= proposal {
                    proposal = h * grow;
                }
                h = proposal;
            } else {
                stats.rejected += 1;
                h *= shrink_factor(settings, norm);
                proposal = h;
            }
        }

        Ok(proposal)
    }

    /// One Dormand-Prince step of size `h`, returning the fifth order solution, its derivative
    /// and the local error estimate.
    fn try_step<S, F>(system: &mut F, y: &S, k1: &S, t: f64, h: f64) -> (S, S, S)
    where
        S: OdeState,
        F: FnMut(f64, &S) -> S,
    {
        let mut stages: Vec<S> = Vec::with_capacity(7);
        stages.push(k1.clone());
        for i in 1..6 {
            let mut argument = y.clone();
            for (j, stage) in stages.iter().enumerate() {
                if A[i][j] != 0.0 {
                    argument.axpy(h * A[i][j], stage);
                }
            }
            stages.push(system(t + C[i] * h, &argument));
        }

        let mut next = y.clone();
        for (weight, stage) in B.iter().zip(stages.iter()) {
            if *weight != 0.0 {
                next.axpy(h * weight, stage);
            }
        }
        let next_derivative = system(t + h, &next);
        stages.push(next_derivative.clone());

        let mut error = stages[0].clone();
        error.scale(h * E[0]);
        for (weight, stage) in E.iter().zip(stages.iter()).skip(1) {
            if *weight != 0.0 {
                error.axpy(h * weight, stage);
            }
        }

        (next, next_derivative, error)
    }
}

/// Step size factor after an accepted step; steps with a comfortable error margin grow.
fn growth_factor(settings: &IntegratorSettings, norm: f64) -> f64 {
    if norm < 0.5 {
        (settings.safety * norm.powf(-1.0 / ORDER)).min(settings.max_factor)
    } else {
        1.0
    }
}

/// Step size factor after a rejected step, `norm > 1`.
fn shrink_factor(settings: &IntegratorSettings, norm: f64) -> f64 {
    (settings.safety * norm.powf(-1.0 / ORDER)).max(settings.min_factor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array1};

    #[test]
    fn exponential_decay_matches_closed_form() {
        let stepper = Dopri5::default();
        let mut y = array![1.0];
        stepper
            .integrate_const(|_t, y: &Array1<f64>| -y, &mut y, 0.0, 2.0, 0.02)
            .unwrap();
        assert_abs_diff_eq!(y[0], (-2.0_f64).exp(), epsilon = 1e-7);
    }

    #[test]
    fn polynomial_of_low_degree_is_integrated_exactly() {
        // dy/dt = 3t^2 has solution t^3, which a fifth order method reproduces to round-off.
        let stepper = Dopri5::default();
        let mut y = array![0.0];
        stepper
            .integrate_const(|t, _y: &Array1<f64>| array![3.0 * t * t], &mut y, 0.0, 1.5, 0.015)
            .unwrap();
        assert_abs_diff_eq!(y[0], 3.375, epsilon = 1e-12);
    }

    #[test]
    fn empty_interval_leaves_state_untouched() {
        let stepper = Dopri5::default();
        let mut y = array![0.25, -4.0];
        let stats = stepper
            .integrate_const(|_t, y: &Array1<f64>| y * 10.0, &mut y, 1.0, 1.0, 0.1)
            .unwrap();
        assert_eq!(y, array![0.25, -4.0]);
        assert_eq!(stats, IntegrationStats::default());
    }

    #[test]
    fn backwards_interval_is_rejected() {
        let stepper = Dopri5::default();
        let mut y = array![1.0];
        let result = stepper.integrate_const(|_t, y: &Array1<f64>| y.clone(), &mut y, 1.0, 0.0, 0.1);
        assert_eq!(
            result,
            Err(IntegrateError::InvalidInterval { from: 1.0, to: 0.0 })
        );
    }

    #[test]
    fn non_positive_stride_is_rejected() {
        let stepper = Dopri5::default();
        let mut y = array![1.0];
        let result = stepper.integrate_const(|_t, y: &Array1<f64>| y.clone(), &mut y, 0.0, 1.0, 0.0);
        assert_eq!(result, Err(IntegrateError::InvalidStride(0.0)));
    }

    #[test]
    fn step_budget_is_enforced() {
        let settings = IntegratorSettings {
            max_steps: 3,
            ..IntegratorSettings::default()
        };
        let stepper = Dopri5::new(settings);
        let mut y = array![1.0];
        let result = stepper.integrate_const(|_t, y: &Array1<f64>| -y, &mut y, 0.0, 1.0, 0.01);
        assert!(matches!(
            result,
            Err(IntegrateError::MaxStepsExceeded { steps: 3, .. })
        ));
    }

    #[test]
    fn fast_growth_triggers_step_rejections() {
        let stepper = Dopri5::default();
        let mut y = array![1.0];
        let stats = stepper
            .integrate_adaptive(|_t, y: &Array1<f64>| y * 50.0, &mut y, 0.0, 0.2, 0.2)
            .unwrap();
        assert!(stats.rejected > 0);
        assert_abs_diff_eq!(y[0] / 10.0_f64.exp(), 1.0, epsilon = 1e-4);
    }

    #[test]
    fn rejected_steps_shrink_with_fifth_order_exponent() {
        let settings = IntegratorSettings::default();
        // 0.9 * 32^(-1/5) = 0.45
        assert_abs_diff_eq!(shrink_factor(&settings, 32.0), 0.45, epsilon = 1e-12);
        assert_eq!(shrink_factor(&settings, 1e12), settings.min_factor);
        assert_abs_diff_eq!(growth_factor(&settings, 1.0 / 32.0), 1.8, epsilon = 1e-12);
        assert_eq!(growth_factor(&settings, 1e-30), settings.max_factor);
        assert_eq!(growth_factor(&settings, 0.7), 1.0);
    }

    #[test]
    fn non_finite_derivative_poisons_the_state() {
        let stepper = Dopri5::default();
        let mut y = array![1.0];
        stepper
            .integrate_const(|_t, _y: &Array1<f64>| array![f64::NAN], &mut y, 0.0, 0.1, 0.01)
            .unwrap();
        assert!(y[0].is_nan());
    }
}
