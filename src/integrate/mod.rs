//! Numerical integration of ordinary differential equations.
//!
//! The estimators in this crate advance a state estimate through continuous time by integrating
//! the dynamics of its mean together with the Riccati equation of its covariance. The integrator
//! here is an embedded Runge-Kutta pair of order 5(4) (Dormand-Prince) with adaptive step-size
//! control. It works on any type implementing [`OdeState`], which is implemented for owned
//! `ndarray` arrays of any dimension and for the typed [`JointState`] of a filter.
//!
//! ```
//! use ndarray::{array, Array1};
//! use rusty_fusion::integrate::{Dopri5, IntegratorSettings};
//!
//! // Harmonic oscillator: [y, y'] with dy/dt = [y', -y]
//! let stepper = Dopri5::new(IntegratorSettings::default());
//! let mut y = array![1.0, 0.0];
//! let tau = 2.0 * std::f64::consts::PI;
//! stepper
//!     .integrate_const(|_t, y: &Array1<f64>| array![y[1], -y[0]], &mut y, 0.0, tau, tau / 100.0)
//!     .unwrap();
//! assert!((y[0] - 1.0).abs() < 1e-4);
//! assert!(y[1].abs() < 1e-4);
//! ```

mod dopri5;
mod state;

pub use dopri5::{Dopri5, IntegrationStats};
pub use state::{JointState, OdeState};

/// Errors produced while integrating.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum IntegrateError {
    /// The step budget of a single call was exhausted before reaching the end of the interval.
    #[error("maximum number of steps ({steps}) exceeded at t = {t}")]
    MaxStepsExceeded { steps: usize, t: f64 },

    /// The end of the interval lies before its start, or either bound is not finite.
    #[error("invalid integration interval [{from}, {to}]")]
    InvalidInterval { from: f64, to: f64 },

    /// The reporting stride is not finite and positive.
    #[error("reporting stride must be finite and positive, got {0}")]
    InvalidStride(f64),
}

/// Tolerances and limits for adaptive step-size control.
#[derive(Debug, Clone, PartialEq)]
pub struct IntegratorSettings {
    /// Absolute error tolerance (default: 1e-6).
    pub abs_tol: f64,
    /// Relative error tolerance (default: 1e-6).
    pub rel_tol: f64,
    /// Safety factor applied to every step-size proposal (default: 0.9).
    pub safety: f64,
    /// Smallest factor a rejected step may shrink by (default: 0.2).
    pub min_factor: f64,
    /// Largest factor an accepted step may grow by (default: 5.0).
    pub max_factor: f64,
    /// Steps below this size are accepted regardless of their error (default: 1e-12).
    pub min_step: f64,
    /// Maximum number of attempted steps in a single call (default: 100_000).
    pub max_steps: usize,
}

impl Default for IntegratorSettings {
    fn default() -> Self {
        Self {
            abs_tol: 1e-6,
            rel_tol: 1e-6,
            safety: 0.9,
            min_factor: 0.2,
            max_factor: 5.0,
            min_step: 1e-12,
            max_steps: 100_000,
        }
    }
}
