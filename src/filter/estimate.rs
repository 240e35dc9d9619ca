use ndarray::{Array1, Array2, ArrayBase, ArrayView1, ArrayView2, Data, Ix1, Ix2};

use super::kalman_common::{asymmetry, ensure_square, trace};
use crate::error::Result;

/// Gaussian belief over the state: a mean vector and its covariance matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct StateEstimate {
    mean: Array1<f64>,
    covariance: Array2<f64>,
}

impl StateEstimate {
    /// Creates an estimate, checking that the covariance is square and matches the mean.
    pub fn new<S1, S2>(mean: &ArrayBase<S1, Ix1>, covariance: &ArrayBase<S2, Ix2>) -> Result<Self>
    where
        S1: Data<Elem = f64>,
        S2: Data<Elem = f64>,
    {
        ensure_square("covariance", covariance, mean.len())?;
        Ok(StateEstimate {
            mean: mean.to_owned(),
            covariance: covariance.to_owned(),
        })
    }

    pub(crate) fn from_parts(mean: Array1<f64>, covariance: Array2<f64>) -> Self {
        debug_assert_eq!(covariance.dim(), (mean.len(), mean.len()));
        StateEstimate { mean, covariance }
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    pub fn mean(&self) -> ArrayView1<f64> {
        self.mean.view()
    }

    pub fn covariance(&self) -> ArrayView2<f64> {
        self.covariance.view()
    }

    pub fn into_parts(self) -> (Array1<f64>, Array2<f64>) {
        (self.mean, self.covariance)
    }

    /// `false` once any entry of the mean or covariance has become NaN or infinite.
    ///
    /// A non-finite estimate cannot recover; a simulation should treat it as the end of the run.
    pub fn is_finite(&self) -> bool {
        self.mean.iter().all(|value| value.is_finite())
            && self.covariance.iter().all(|value| value.is_finite())
    }

    pub fn covariance_trace(&self) -> f64 {
        trace(&self.covariance)
    }

    pub fn covariance_asymmetry(&self) -> f64 {
        asymmetry(&self.covariance)
    }
}
