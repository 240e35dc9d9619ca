use ndarray::{Array, Array1, Array2, Dimension, Zip};

/// A state that can be advanced by a Runge-Kutta integrator.
///
/// The integrator only needs linear combinations of states and a scalar measure of the local
/// error, so implementors provide exactly that: an in-place `y += alpha * x`, in-place scaling,
/// and an error norm scaled by the tolerances.
pub trait OdeState: Clone {
    /// `self += alpha * rhs`
    fn axpy(&mut self, alpha: f64, rhs: &Self);

    /// `self *= alpha`
    fn scale(&mut self, alpha: f64);

    /// Largest component of `error` relative to `abs_tol + rel_tol * max(|self|, |next|)`.
    ///
    /// A value below one means the step that produced `next` from `self` is acceptable.
    /// NaN entries are ignored by the maximum, so a poisoned state does not stall the integrator.
    fn error_norm(&self, next: &Self, error: &Self, abs_tol: f64, rel_tol: f64) -> f64;
}

impl<D: Dimension> OdeState for Array<f64, D> {
    fn axpy(&mut self, alpha: f64, rhs: &Self) {
        self.scaled_add(alpha, rhs);
    }

    fn scale(&mut self, alpha: f64) {
        self.mapv_inplace(|v| v * alpha);
    }

    fn error_norm(&self, next: &Self, error: &Self, abs_tol: f64, rel_tol: f64) -> f64 {
        Zip::from(self)
            .and(next)
            .and(error)
            .fold(0.0, |acc: f64, &current, &candidate, &err| {
                let tolerance = abs_tol + rel_tol * current.abs().max(candidate.abs());
                acc.max((err / tolerance).abs())
            })
    }
}

/// Mean and covariance of a Gaussian belief, propagated together through continuous time.
///
/// Both parts keep their natural shapes, so no packing into a rectangular buffer is needed
/// to hand them to the integrator.
#[derive(Debug, Clone, PartialEq)]
pub struct JointState {
    pub mean: Array1<f64>,
    pub covariance: Array2<f64>,
}

impl JointState {
    pub fn new(mean: Array1<f64>, covariance: Array2<f64>) -> Self {
        JointState { mean, covariance }
    }

    pub fn into_parts(self) -> (Array1<f64>, Array2<f64>) {
        (self.mean, self.covariance)
    }
}

impl OdeState for JointState {
    fn axpy(&mut self, alpha: f64, rhs: &Self) {
        self.mean.axpy(alpha, &rhs.mean);
        self.covariance.axpy(alpha, &rhs.covariance);
    }

    fn scale(&mut self, alpha: f64) {
        self.mean.scale(alpha);
        self.covariance.scale(alpha);
    }

    fn error_norm(&self, next: &Self, error: &Self, abs_tol: f64, rel_tol: f64) -> f64 {
        let mean_norm = self
            .mean
            .error_norm(&next.mean, &error.mean, abs_tol, rel_tol);
        let covariance_norm =
            self.covariance
                .error_norm(&next.covariance, &error.covariance, abs_tol, rel_tol);
        mean_norm.max(covariance_norm)
    }
}
