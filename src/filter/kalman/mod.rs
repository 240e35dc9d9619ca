//! Contains modules representing algorithms based on Kalman filtering methodology. The
//! nonlinear module holds the continuous-discrete extended Kalman filter, which linearizes
//! the process and observation models around the current estimate.

pub mod nonlinear;
