//! Nonlinear process and observation models.
//!
//! A model bundles the four functions an extended Kalman filter linearizes: the continuous-time
//! state derivative `f(x, u)`, its Jacobian `∂f/∂x`, the observation function `h(x)` and its
//! Jacobian `∂h/∂x`. All of them are pure, so one model value can be shared by every predict
//! and update call of a filter.

mod constant_velocity;
mod three_body;
mod vehicle;

use ndarray::{Array1, Array2, ArrayView1};

pub use constant_velocity::ConstantVelocity;
pub use three_body::{RestrictedThreeBody, EARTH_MOON_MASS_RATIO};
pub use vehicle::Vehicle;

/// Continuous-time process model with a nonlinear observation function.
///
/// Implementors must return vectors and matrices whose shapes agree with the dimensions they
/// report: `transition` has length `state_dim`, `transition_jacobian` is
/// `state_dim × state_dim`, `observation` has length `observation_dim` and
/// `observation_jacobian` is `observation_dim × state_dim`.
pub trait DynamicsModel {
    /// Length of the state vector.
    fn state_dim(&self) -> usize;

    /// Length of the control vector accepted by `transition`.
    fn control_dim(&self) -> usize;

    /// Length of the observation vector produced by `observation`.
    fn observation_dim(&self) -> usize;

    /// Time derivative of the state, `dx/dt = f(x, u)`.
    fn transition(&self, state: &ArrayView1<f64>, control: &ArrayView1<f64>) -> Array1<f64>;

    /// Jacobian of `transition` with respect to the state, evaluated at `(state, control)`.
    fn transition_jacobian(&self, state: &ArrayView1<f64>, control: &ArrayView1<f64>)
        -> Array2<f64>;

    /// Expected measurement of the state, `z = h(x)`.
    fn observation(&self, state: &ArrayView1<f64>) -> Array1<f64>;

    /// Jacobian of `observation` with respect to the state.
    fn observation_jacobian(&self, state: &ArrayView1<f64>) -> Array2<f64>;
}

impl<M: DynamicsModel + ?Sized> DynamicsModel for &M {
    fn state_dim(&self) -> usize {
        (**self).state_dim()
    }

    fn control_dim(&self) -> usize {
        (**self).control_dim()
    }

    fn observation_dim(&self) -> usize {
        (**self).observation_dim()
    }

    fn transition(&self, state: &ArrayView1<f64>, control: &ArrayView1<f64>) -> Array1<f64> {
        (**self).transition(state, control)
    }

    fn transition_jacobian(
        &self,
        state: &ArrayView1<f64>,
        control: &ArrayView1<f64>,
    ) -> Array2<f64> {
        (**self).transition_jacobian(state, control)
    }

    fn observation(&self, state: &ArrayView1<f64>) -> Array1<f64> {
        (**self).observation(state)
    }

    fn observation_jacobian(&self, state: &ArrayView1<f64>) -> Array2<f64> {
        (**self).observation_jacobian(state)
    }
}

/// Runtime selection between the bundled models, e.g. from a scenario file.
#[derive(Debug, Clone, PartialEq)]
pub enum Dynamics {
    ConstantVelocity(ConstantVelocity),
    ThreeBody(RestrictedThreeBody),
    Vehicle(Vehicle),
}

impl Dynamics {
    fn inner(&self) -> &dyn DynamicsModel {
        match self {
            Dynamics::ConstantVelocity(model) => model,
            Dynamics::ThreeBody(model) => model,
            Dynamics::Vehicle(model) => model,
        }
    }
}

impl From<ConstantVelocity> for Dynamics {
    fn from(model: ConstantVelocity) -> Self {
        Dynamics::ConstantVelocity(model)
    }
}

impl From<RestrictedThreeBody> for Dynamics {
    fn from(model: RestrictedThreeBody) -> Self {
        Dynamics::ThreeBody(model)
    }
}

impl From<Vehicle> for Dynamics {
    fn from(model: Vehicle) -> Self {
        Dynamics::Vehicle(model)
    }
}

impl DynamicsModel for Dynamics {
    fn state_dim(&self) -> usize {
        self.inner().state_dim()
    }

    fn control_dim(&self) -> usize {
        self.inner().control_dim()
    }

    fn observation_dim(&self) -> usize {
        self.inner().observation_dim()
    }

    fn transition(&self, state: &ArrayView1<f64>, control: &ArrayView1<f64>) -> Array1<f64> {
        self.inner().transition(state, control)
    }

    fn transition_jacobian(
        &self,
        state: &ArrayView1<f64>,
        control: &ArrayView1<f64>,
    ) -> Array2<f64> {
        self.inner().transition_jacobian(state, control)
    }

    fn observation(&self, state: &ArrayView1<f64>) -> Array1<f64> {
        self.inner().observation(state)
    }

    fn observation_jacobian(&self, state: &ArrayView1<f64>) -> Array2<f64> {
        self.inner().observation_jacobian(state)
    }
}

/// Central finite-difference Jacobian, used to check analytic Jacobians in tests.
#[cfg(test)]
pub(crate) fn numerical_jacobian<F>(function: F, at: &Array1<f64>) -> Array2<f64>
where
    F: Fn(&ArrayView1<f64>) -> Array1<f64>,
{
    let rows = function(&at.view()).len();
    let cols = at.len();
    let mut jacobian = Array2::zeros([rows, cols]);
    for j in 0..cols {
        let step = 1e-6 * at[j].abs().max(1.0);
        let mut forward = at.clone();
        let mut backward = at.clone();
        forward[j] += step;
        backward[j] -= step;
        let column = (function(&forward.view()) - function(&backward.view())) / (2.0 * step);
        jacobian.column_mut(j).assign(&column);
    }
    jacobian
}
