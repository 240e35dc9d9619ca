pub mod estimate;
pub mod kalman;
mod kalman_common;
pub mod traits;

pub use estimate::StateEstimate;
pub use kalman::nonlinear::{ExtendedKalmanFilter, Innovation, StepClock};
pub use kalman_common::{asymmetry, symmetrize, trace};
pub use traits::Filter;
pub(crate) use kalman_common::ensure_square;
