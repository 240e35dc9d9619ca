//! This module contains the nonlinear approximations to the Kalman filter. The extended Kalman
//! filter propagates its estimate through continuous-time dynamics and linearizes the
//! measurement model at every update.

pub mod extended;

pub use extended::{ExtendedKalmanFilter, Innovation, StepClock, REPORTING_DIVISIONS};
