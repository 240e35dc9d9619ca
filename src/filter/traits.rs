//! Traits representing the filtering algorithms

use ndarray::{ArrayBase, Data, Ix1, Ix2};

use crate::error::Result;

/// Filtering algorithm trait
///
/// This trait indicates that implementor is a recursive estimator owning a single state
/// estimate, which it refines by alternating prediction and update steps. Prediction moves the
/// estimate forward in time under a control input and process noise, while update corrects it
/// with a measurement.
pub trait Filter {
    /// Result of prediction operation, e.g. the time step that was covered
    type Prediction;
    /// Result of update operation, e.g. the innovation of the measurement
    type Update;

    /// Prediction operation executed by filtering algorithm.
    ///
    /// This method has two parameters:
    /// * control - control input of the process model, with the length the model expects
    /// * process_covariance - covariance of the process noise, a square matrix with one row per
    /// state component
    ///
    /// Inputs whose shapes do not match the model are rejected before the estimate is touched.
    fn predict<A, B>(
        &mut self,
        control: &ArrayBase<A, Ix1>,
        process_covariance: &ArrayBase<B, Ix2>,
    ) -> Result<Self::Prediction>
    where
        A: Data<Elem = f64>,
        B: Data<Elem = f64>;

    /// Update operation executed by filtering algorithm.
    ///
    /// This method has two parameters:
    /// * measurement - measured values, with one entry per observed quantity
    /// * measurement_covariance - covariance of the measurement noise
    ///
    /// Inputs whose shapes do not match the model are rejected before the estimate is touched.
    fn update<A, B>(
        &mut self,
        measurement: &ArrayBase<A, Ix1>,
        measurement_covariance: &ArrayBase<B, Ix2>,
    ) -> Result<Self::Update>
    where
        A: Data<Elem = f64>,
        B: Data<Elem = f64>;
}
