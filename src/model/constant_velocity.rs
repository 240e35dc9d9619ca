use ndarray::{s, Array1, Array2, ArrayView1};

use super::DynamicsModel;
use crate::error::{FilterError, Result};

/// Constant-velocity motion in `k` dimensions.
///
/// The state is `[p₁, …, p_k, v₁, …, v_k]`: positions followed by their velocities, so the state
/// dimension is `2k`. Positions drift with the velocities and velocities stay constant. Only the
/// positions are observed. The model takes no control input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstantVelocity {
    state_dim: usize,
}

impl ConstantVelocity {
    /// Creates the model for a state of dimension `state_dim`, which has to be even and positive.
    pub fn new(state_dim: usize) -> Result<Self> {
        if state_dim == 0 || state_dim % 2 != 0 {
            return Err(FilterError::OddStateDimension(state_dim));
        }
        Ok(ConstantVelocity { state_dim })
    }

    fn half(&self) -> usize {
        self.state_dim / 2
    }
}

impl DynamicsModel for ConstantVelocity {
    fn state_dim(&self) -> usize {
        self.state_dim
    }

    fn control_dim(&self) -> usize {
        0
    }

    fn observation_dim(&self) -> usize {
        self.half()
    }

    fn transition(&self, state: &ArrayView1<f64>, _control: &ArrayView1<f64>) -> Array1<f64> {
        let k = self.half();
        let mut derivative = Array1::zeros(self.state_dim);
        derivative.slice_mut(s![..k]).assign(&state.slice(s![k..]));
        derivative
    }

    fn transition_jacobian(
        &self,
        _state: &ArrayView1<f64>,
        _control: &ArrayView1<f64>,
    ) -> Array2<f64> {
        let k = self.half();
        let mut jacobian = Array2::zeros([self.state_dim, self.state_dim]);
        jacobian
            .slice_mut(s![..k, k..])
            .assign(&Array2::<f64>::eye(k));
        jacobian
    }

    fn observation(&self, state: &ArrayView1<f64>) -> Array1<f64> {
        state.slice(s![..self.half()]).to_owned()
    }

    fn observation_jacobian(&self, _state: &ArrayView1<f64>) -> Array2<f64> {
        let k = self.half();
        let mut jacobian = Array2::zeros([k, self.state_dim]);
        jacobian.slice_mut(s![.., ..k]).assign(&Array2::<f64>::eye(k));
        jacobian
    }
}
