use ndarray::{array, s, Array1, Array2, ArrayView1};

use super::DynamicsModel;

/// Ground vehicle following kinematic bicycle dynamics.
///
/// State: `[x, y, θ, v, w, ω]`, the planar pose in the world frame followed by the forward and
/// lateral velocity in the body frame and the heading rate. Control: `[speed, steering]`, the
/// commanded forward speed and the front wheel steering angle.
///
/// Body velocities respond to the commands with a first order lag of time constant
/// `response_time`: the forward velocity relaxes to the commanded speed, the lateral velocity
/// decays to zero (no side slip) and the heading rate relaxes to the bicycle yaw rate
/// `v · tan(steering) / wheelbase`. The observation is the body velocity and heading rate
/// `[v, w, ω]`, as measured by odometry or visual ego-motion.
///
/// Steering limits are not applied here; callers clamp the steering command with
/// [`Vehicle::clamp_steering`] before passing it in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vehicle {
    wheelbase: f64,
    response_time: f64,
}

impl Default for Vehicle {
    fn default() -> Self {
        Vehicle {
            wheelbase: 2.5,
            response_time: 0.5,
        }
    }
}

impl Vehicle {
    pub fn new(wheelbase: f64, response_time: f64) -> Self {
        Vehicle {
            wheelbase,
            response_time,
        }
    }

    pub fn wheelbase(&self) -> f64 {
        self.wheelbase
    }

    pub fn response_time(&self) -> f64 {
        self.response_time
    }

    /// Limits a steering command to `[-max_angle, max_angle]`.
    pub fn clamp_steering(steering: f64, max_angle: f64) -> f64 {
        let limit = max_angle.abs();
        // max/min pass a NaN limit through instead of panicking like f64::clamp
        steering.max(-limit).min(limit)
    }

    /// Rotates a world-frame planar velocity and heading rate into the body frame of a vehicle
    /// with heading `heading`, giving a vector comparable with [`DynamicsModel::observation`].
    pub fn world_to_body(world_rates: &ArrayView1<f64>, heading: f64) -> Array1<f64> {
        let (sin, cos) = heading.sin_cos();
        let (dx, dy, dtheta) = (world_rates[0], world_rates[1], world_rates[2]);
        array![dx * cos + dy * sin, -dx * sin + dy * cos, dtheta]
    }

    /// Inverse of [`Vehicle::world_to_body`].
    pub fn body_to_world(body_rates: &ArrayView1<f64>, heading: f64) -> Array1<f64> {
        let (sin, cos) = heading.sin_cos();
        let (v, w, omega) = (body_rates[0], body_rates[1], body_rates[2]);
        array![v * cos - w * sin, v * sin + w * cos, omega]
    }
}

impl DynamicsModel for Vehicle {
    fn state_dim(&self) -> usize {
        6
    }

    fn control_dim(&self) -> usize {
        2
    }

    fn observation_dim(&self) -> usize {
        3
    }

    fn transition(&self, state: &ArrayView1<f64>, control: &ArrayView1<f64>) -> Array1<f64> {
        let (theta, v, w, omega) = (state[2], state[3], state[4], state[5]);
        let (speed, steering) = (control[0], control[1]);
        let (sin, cos) = theta.sin_cos();
        let tau = self.response_time;
        let yaw_rate = v * steering.tan() / self.wheelbase;

        array![
            v * cos - w * sin,
            v * sin + w * cos,
            omega,
            (speed - v) / tau,
            -w / tau,
            (yaw_rate - omega) / tau,
        ]
    }

    fn transition_jacobian(
        &self,
        state: &ArrayView1<f64>,
        control: &ArrayView1<f64>,
    ) -> Array2<f64> {
        let (theta, v, w) = (state[2], state[3], state[4]);
        let steering = control[1];
        let (sin, cos) = theta.sin_cos();
        let tau = self.response_time;
        let yaw_gain = steering.tan() / (self.wheelbase * tau);

        array![
            [0.0, 0.0, -v * sin - w * cos, cos, -sin, 0.0],
            [0.0, 0.0, v * cos - w * sin, sin, cos, 0.0],
            [0.0, 0.0, 0.0, 0.0, 0.0, 1.0],
            [0.0, 0.0, 0.0, -1.0 / tau, 0.0, 0.0],
            [0.0, 0.0, 0.0, 0.0, -1.0 / tau, 0.0],
            [0.0, 0.0, 0.0, yaw_gain, 0.0, -1.0 / tau],
        ]
    }

    fn observation(&self, state: &ArrayView1<f64>) -> Array1<f64> {
        state.slice(s![3..]).to_owned()
    }

    fn observation_jacobian(&self, _state: &ArrayView1<f64>) -> Array2<f64> {
        let mut jacobian = Array2::zeros([3, 6]);
        jacobian.slice_mut(s![.., 3..]).assign(&Array2::<f64>::eye(3));
        jacobian
    }
}
