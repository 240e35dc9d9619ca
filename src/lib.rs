#![crate_name = "rusty_fusion"]
//! The `rusty-fusion` crate estimates the state of continuous-time dynamical systems from noisy,
//! intermittent measurements with a continuous-discrete extended Kalman filter.
//!
//! Between measurements the estimate is carried forward by integrating the nonlinear process
//! model together with the Riccati equation of its linearization; measurements correct it at
//! discrete instants. The crate is organized leaf-first:
//!
//! - [`integrate`]: adaptive Dormand-Prince 5(4) integrator over typed ODE states
//! - [`model`]: process and observation models with analytic Jacobians (constant velocity,
//!   restricted three-body problem, ground vehicle)
//! - [`noise`]: correlated zero-mean Gaussian sampling
//! - [`filter`]: the estimator itself, built on the pieces above
//! - [`sim`]: a configurable simulation driver which generates ground truth and synthetic
//!   measurements, runs the filter and records the results
//!
//! ## Numerical failures
//! Shape mismatches are reported as errors before any state is modified. Numerical pathologies
//! such as a degenerate noise matrix are not: NaN and infinite values flow into the estimate,
//! where [`filter::StateEstimate::is_finite`] detects them.
extern crate blas_src;

pub mod error;
pub mod filter;
pub mod integrate;
pub mod model;
pub mod noise;
pub mod sim;

pub use error::{FilterError, Result};
pub use filter::{ExtendedKalmanFilter, Filter, StateEstimate};
pub use model::{Dynamics, DynamicsModel};
pub use noise::NoiseGenerator;
