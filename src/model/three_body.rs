use ndarray::{array, s, Array1, Array2, ArrayView1};

use super::DynamicsModel;

/// Mass ratio of the Earth-Moon system.
pub const EARTH_MOON_MASS_RATIO: f64 = 0.012_150_585_609_624;

/// Planar circular restricted three-body problem in the rotating, normalized frame.
///
/// A massless body moves under the gravity of two primaries of masses `1 - μ` and `μ`, fixed at
/// `(-μ, 0)` and `(1 - μ, 0)` in a frame rotating with unit angular rate. The state is
/// `[x, y, vx, vy]`; positions are observed. The control input is ignored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RestrictedThreeBody {
    mu: f64,
}

impl Default for RestrictedThreeBody {
    fn default() -> Self {
        RestrictedThreeBody {
            mu: EARTH_MOON_MASS_RATIO,
        }
    }
}

impl RestrictedThreeBody {
    pub fn new(mu: f64) -> Self {
        RestrictedThreeBody { mu }
    }

    pub fn mass_ratio(&self) -> f64 {
        self.mu
    }

    /// Jacobi constant `C = 2Ω(x, y) - (vx² + vy²)`, conserved along every trajectory.
    pub fn jacobi_constant(&self, state: &ArrayView1<f64>) -> f64 {
        let (x, y, vx, vy) = (state[0], state[1], state[2], state[3]);
        let (r1, r2) = self.distances(x, y);
        let potential = 0.5 * (x * x + y * y) + (1.0 - self.mu) / r1 + self.mu / r2;
        2.0 * potential - (vx * vx + vy * vy)
    }

    fn distances(&self, x: f64, y: f64) -> (f64, f64) {
        let r1 = ((x + self.mu).powi(2) + y * y).sqrt();
        let r2 = ((x - 1.0 + self.mu).powi(2) + y * y).sqrt();
        (r1, r2)
    }
}

impl DynamicsModel for RestrictedThreeBody {
    fn state_dim(&self) -> usize {
        4
    }

    fn control_dim(&self) -> usize {
        0
    }

    fn observation_dim(&self) -> usize {
        2
    }

    fn transition(&self, state: &ArrayView1<f64>, _control: &ArrayView1<f64>) -> Array1<f64> {
        let mu = self.mu;
        let (x, y, vx, vy) = (state[0], state[1], state[2], state[3]);
        let (r1, r2) = self.distances(x, y);
        let r1_3 = r1.powi(3);
        let r2_3 = r2.powi(3);

        let ax = 2.0 * vy + x - (1.0 - mu) * (x + mu) / r1_3 - mu * (x - 1.0 + mu) / r2_3;
        let ay = -2.0 * vx + y - (1.0 - mu) * y / r1_3 - mu * y / r2_3;
        array![vx, vy, ax, ay]
    }

    fn transition_jacobian(
        &self,
        state: &ArrayView1<f64>,
        _control: &ArrayView1<f64>,
    ) -> Array2<f64> {
        let mu = self.mu;
        let (x, y) = (state[0], state[1]);
        let dx1 = x + mu;
        let dx2 = x - 1.0 + mu;
        let (r1, r2) = self.distances(x, y);
        let r1_3 = r1.powi(3);
        let r2_3 = r2.powi(3);
        let r1_5 = r1.powi(5);
        let r2_5 = r2.powi(5);

        let uxx = 1.0 - (1.0 - mu) * (1.0 / r1_3 - 3.0 * dx1 * dx1 / r1_5)
            - mu * (1.0 / r2_3 - 3.0 * dx2 * dx2 / r2_5);
        let uyy = 1.0 - (1.0 - mu) * (1.0 / r1_3 - 3.0 * y * y / r1_5)
            - mu * (1.0 / r2_3 - 3.0 * y * y / r2_5);
        let uxy = 3.0 * (1.0 - mu) * dx1 * y / r1_5 + 3.0 * mu * dx2 * y / r2_5;

        array![
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
            [uxx, uxy, 0.0, 2.0],
            [uxy, uyy, -2.0, 0.0],
        ]
    }

    fn observation(&self, state: &ArrayView1<f64>) -> Array1<f64> {
        state.slice(s![..2]).to_owned()
    }

    fn observation_jacobian(&self, _state: &ArrayView1<f64>) -> Array2<f64> {
        array![[1.0, 0.0, 0.0, 0.0], [0.0, 1.0, 0.0, 0.0]]
    }
}
