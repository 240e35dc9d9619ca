//! Zero-mean Gaussian noise with a prescribed covariance.
//!
//! Samples are drawn as `T ξ` with `ξ` standard normal and `T = V diag(√λ)` built from the
//! eigendecomposition `Σ = V diag(λ) Vᵀ`. Eigenvalues slightly below zero, as produced by
//! round-off on positive semi-definite input, are treated as zero.

use ndarray::{Array1, Array2, ArrayBase, ArrayView2, Axis, Data, Ix1, Ix2};
use ndarray_linalg::{Eigh, UPLO};
use rand::distributions::Distribution;
use rand::Rng;
use rand_distr::StandardNormal;

use crate::error::Result;
use crate::filter::{ensure_square, symmetrize};

/// Sampler for `N(0, Σ)`.
///
/// ```
/// use ndarray::{array, Array1};
/// use rand::{rngs::StdRng, Rng, SeedableRng};
/// use rusty_fusion::noise::NoiseGenerator;
///
/// let noise = NoiseGenerator::new(&array![[4.0, 0.0], [0.0, 1.0]]).unwrap();
/// let mut rng = StdRng::seed_from_u64(7);
/// let sample: Array1<f64> = rng.sample(&noise);
/// assert_eq!(sample.len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct NoiseGenerator {
    covariance: Array2<f64>,
    transform: Array2<f64>,
    degenerate: bool,
}

impl NoiseGenerator {
    /// Decomposes `covariance`, which has to be square and symmetric positive semi-definite.
    ///
    /// Only the lower triangle is read.
    pub fn new<S>(covariance: &ArrayBase<S, Ix2>) -> Result<Self>
    where
        S: Data<Elem = f64>,
    {
        ensure_square("noise covariance", covariance, covariance.nrows())?;
        let (eigenvalues, eigenvectors) = covariance.eigh(UPLO::Lower)?;
        let scales = eigenvalues.mapv(|value| value.max(0.0).sqrt());
        let degenerate = scales.iter().all(|&scale| scale == 0.0);
        let transform = &eigenvectors * &scales.insert_axis(Axis(0));
        Ok(NoiseGenerator {
            covariance: covariance.to_owned(),
            transform,
            degenerate,
        })
    }

    /// Generator that always yields the zero vector of length `dim`.
    pub fn zeros(dim: usize) -> Self {
        NoiseGenerator {
            covariance: Array2::zeros([dim, dim]),
            transform: Array2::zeros([dim, dim]),
            degenerate: true,
        }
    }

    pub fn dim(&self) -> usize {
        self.covariance.nrows()
    }

    pub fn covariance(&self) -> ArrayView2<f64> {
        self.covariance.view()
    }

    /// `T` with `T Tᵀ = Σ`.
    pub fn transform(&self) -> ArrayView2<f64> {
        self.transform.view()
    }
}

impl Distribution<Array1<f64>> for NoiseGenerator {
    /// A zero covariance yields zeros without drawing from `rng`.
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Array1<f64> {
        let dim = self.dim();
        if self.degenerate {
            return Array1::zeros(dim);
        }
        let standard = Array1::from_shape_fn(dim, |_| rng.sample::<f64, _>(StandardNormal));
        self.transform.dot(&standard)
    }
}

/// Covariance `AᵀA` with `A = scale · diag(diagonal)`.
///
/// This is how noise levels are written in configuration files: a list of per-component
/// standard deviations and a common factor.
pub fn covariance_from_diagonal<S>(diagonal: &ArrayBase<S, Ix1>, scale: f64) -> Array2<f64>
where
    S: Data<Elem = f64>,
{
    let factor = Array2::from_diag(&diagonal.mapv(|value| value * scale));
    symmetrize(&factor.t().dot(&factor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::max_abs_diff;
    use approx::assert_relative_eq;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::{RngCore, SeedableRng};

    fn sample_covariance(samples: &[Array1<f64>]) -> Array2<f64> {
        let dim = samples[0].len();
        let count = samples.len() as f64;
        let mut mean = Array1::<f64>::zeros(dim);
        for sample in samples {
            mean += sample;
        }
        mean /= count;
        let mut covariance = Array2::<f64>::zeros([dim, dim]);
        for sample in samples {
            let centered = (sample - &mean).insert_axis(Axis(1));
            covariance += &centered.dot(&centered.t());
        }
        covariance / (count - 1.0)
    }

    #[test]
    fn zero_covariance_yields_zeros_without_drawing() {
        let noise = NoiseGenerator::new(&Array2::<f64>::zeros([3, 3])).unwrap();
        let mut rng = StdRng::seed_from_u64(11);
        let mut untouched = StdRng::seed_from_u64(11);
        for _ in 0..5 {
            let sample: Array1<f64> = rng.sample(&noise);
            assert_eq!(sample, Array1::<f64>::zeros(3));
        }
        assert_eq!(rng.next_u64(), untouched.next_u64());

        let noise = NoiseGenerator::zeros(2);
        let sample: Array1<f64> = rng.sample(&noise);
        assert_eq!(sample, Array1::<f64>::zeros(2));
    }

    #[test]
    fn transform_reproduces_covariance() {
        let covariance = array![[2.0, 0.8, 0.1], [0.8, 1.0, 0.0], [0.1, 0.0, 0.5]];
        let noise = NoiseGenerator::new(&covariance).unwrap();
        let transform = noise.transform();
        assert!(max_abs_diff(&transform.dot(&transform.t()), &covariance) < 1e-12);
    }

    #[test]
    fn diagonal_samples_have_requested_variance() {
        let noise = NoiseGenerator::new(&Array2::from_diag(&array![1.0, 4.0, 9.0])).unwrap();
        let mut rng = StdRng::seed_from_u64(1234);
        let samples: Vec<Array1<f64>> = (0..20_000).map(|_| rng.sample(&noise)).collect();
        let empirical = sample_covariance(&samples);
        assert_relative_eq!(empirical[[0, 0]], 1.0, max_relative = 0.05);
        assert_relative_eq!(empirical[[1, 1]], 4.0, max_relative = 0.05);
        assert_relative_eq!(empirical[[2, 2]], 9.0, max_relative = 0.05);
        assert!(empirical[[0, 1]].abs() < 0.1);
    }

    #[test]
    fn correlated_samples_follow_covariance() {
        let covariance = array![[2.0, 0.8], [0.8, 1.0]];
        let noise = NoiseGenerator::new(&covariance).unwrap();
        let mut rng = StdRng::seed_from_u64(99);
        let samples: Vec<Array1<f64>> = (0..20_000).map(|_| rng.sample(&noise)).collect();
        let empirical = sample_covariance(&samples);
        assert!(max_abs_diff(&empirical, &covariance) < 0.1);
    }

    #[test]
    fn slightly_indefinite_covariance_is_accepted() {
        let covariance = array![[1.0, 1.0], [1.0, 1.0 - 1e-15]];
        let noise = NoiseGenerator::new(&covariance).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let sample: Array1<f64> = rng.sample(&noise);
        assert!(sample.iter().all(|value| value.is_finite()));
    }

    #[test]
    fn non_square_covariance_is_rejected() {
        assert!(NoiseGenerator::new(&Array2::<f64>::zeros([2, 3])).is_err());
    }

    #[test]
    fn diagonal_covariance_squares_scaled_entries() {
        let covariance = covariance_from_diagonal(&array![1.0, 2.0], 0.5);
        assert_eq!(covariance, array![[0.25, 0.0], [0.0, 1.0]]);
    }
}
