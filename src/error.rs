//! Error types shared by the filtering algorithms.

use ndarray_linalg::error::LinalgError;

use crate::integrate::IntegrateError;

pub type Result<T> = std::result::Result<T, FilterError>;

/// Errors raised by the estimation engine and its building blocks.
///
/// Shape errors are configuration mistakes and are reported before any state is touched.
/// Numerical trouble (NaN or infinite entries) has no variant: it is carried in the
/// estimate itself and callers inspect it with [`StateEstimate::is_finite`].
///
/// [`StateEstimate::is_finite`]: crate::filter::StateEstimate::is_finite
#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error("{name} has length {found}, expected {expected}")]
    VectorLength {
        name: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("{name} has shape {found:?}, expected {expected:?}")]
    MatrixShape {
        name: &'static str,
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("state dimension {0} must be even (positions followed by velocities)")]
    OddStateDimension(usize),

    #[error("time step must be finite and positive, got {0}")]
    InvalidTimeStep(f64),

    #[error("linear algebra failure: {0}")]
    Linalg(#[from] LinalgError),

    #[error("integration failed: {0}")]
    Integration(#[from] IntegrateError),
}

impl FilterError {
    pub fn vector_length(name: &'static str, expected: usize, found: usize) -> Self {
        Self::VectorLength {
            name,
            expected,
            found,
        }
    }

    pub fn matrix_shape(name: &'static str, expected: (usize, usize), found: (usize, usize)) -> Self {
        Self::MatrixShape {
            name,
            expected,
            found,
        }
    }
}
