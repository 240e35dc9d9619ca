//! Shape checks and covariance algebra shared by the Kalman filter variants.

use cauchy::Scalar;
use ndarray::{Array2, ArrayBase, Data, Ix1, Ix2};
use ndarray_linalg::{Inverse, Lapack};

use crate::error::{FilterError, Result};

pub(crate) fn ensure_len<A, S>(name: &'static str, vector: &ArrayBase<S, Ix1>, expected: usize) -> Result<()>
where
    S: Data<Elem = A>,
{
    if vector.len() != expected {
        return Err(FilterError::vector_length(name, expected, vector.len()));
    }
    Ok(())
}

pub(crate) fn ensure_shape<A, S>(
    name: &'static str,
    matrix: &ArrayBase<S, Ix2>,
    expected: (usize, usize),
) -> Result<()>
where
    S: Data<Elem = A>,
{
    if matrix.dim() != expected {
        return Err(FilterError::matrix_shape(name, expected, matrix.dim()));
    }
    Ok(())
}

pub(crate) fn ensure_square<A, S>(name: &'static str, matrix: &ArrayBase<S, Ix2>, size: usize) -> Result<()>
where
    S: Data<Elem = A>,
{
    ensure_shape(name, matrix, (size, size))
}

/// Returns `(P + Pᵀ) / 2`.
///
/// The estimators never call this themselves; it is meant for callers which need an exactly
/// symmetric covariance downstream.
pub fn symmetrize<A, S>(matrix: &ArrayBase<S, Ix2>) -> Array2<A>
where
    A: Scalar + Lapack,
    S: Data<Elem = A>,
{
    let two = A::one() + A::one();
    (matrix + &matrix.t()).mapv(|value| value / two)
}

/// Largest absolute entry of `P - Pᵀ`.
pub fn asymmetry<A, S>(matrix: &ArrayBase<S, Ix2>) -> A::Real
where
    A: Scalar + Lapack,
    S: Data<Elem = A>,
{
    let transposed = matrix.t();
    matrix
        .iter()
        .zip(transposed.iter())
        .fold(A::real(0.0), |worst, (&value, &mirrored)| {
            let difference = (value - mirrored).abs();
            if difference > worst {
                difference
            } else {
                worst
            }
        })
}

/// Sum of the diagonal entries.
pub fn trace<A, S>(matrix: &ArrayBase<S, Ix2>) -> A
where
    A: Scalar + Lapack,
    S: Data<Elem = A>,
{
    matrix.diag().iter().fold(A::zero(), |sum, &value| sum + value)
}

/// Innovation covariance `S = H P Hᵀ + R`.
pub(crate) fn innovation_covariance<A, S1, S2, S3>(
    observation_jacobian: &ArrayBase<S1, Ix2>,
    covariance: &ArrayBase<S2, Ix2>,
    measurement_covariance: &ArrayBase<S3, Ix2>,
) -> Array2<A>
where
    A: Scalar + Lapack,
    S1: Data<Elem = A>,
    S2: Data<Elem = A>,
    S3: Data<Elem = A>,
{
    observation_jacobian
        .dot(covariance)
        .dot(&observation_jacobian.t())
        + measurement_covariance
}

/// Kalman gain `K = P Hᵀ S⁻¹`, inverting `S` directly.
///
/// `S` is small (one row per measured quantity) so the LU inverse is cheap. A nearly singular
/// `S` is inverted and amplifies round-off. When the factorization fails on an exactly singular
/// `S` the gain is filled with NaN, so the corrected estimate is poisoned like any other
/// numerical breakdown instead of failing the update.
pub(crate) fn kalman_gain<A, S1, S2, S3>(
    covariance: &ArrayBase<S1, Ix2>,
    observation_jacobian: &ArrayBase<S2, Ix2>,
    innovation_covariance: &ArrayBase<S3, Ix2>,
) -> Array2<A>
where
    A: Scalar + Lapack,
    S1: Data<Elem = A>,
    S2: Data<Elem = A>,
    S3: Data<Elem = A>,
{
    let cross_covariance = covariance.dot(&observation_jacobian.t());
    match innovation_covariance.inv() {
        Ok(inverse) => cross_covariance.dot(&inverse),
        Err(_) => Array2::from_elem(cross_covariance.dim(), A::from_real(A::real(f64::NAN))),
    }
}

/// Covariance after a measurement, `(I - K H) P`.
///
/// This is the short form of the update, not the Joseph form, so symmetry and positive
/// semi-definiteness can erode over long update sequences.
pub(crate) fn corrected_covariance<A, S1, S2, S3>(
    covariance: &ArrayBase<S1, Ix2>,
    gain: &ArrayBase<S2, Ix2>,
    observation_jacobian: &ArrayBase<S3, Ix2>,
) -> Array2<A>
where
    A: Scalar + Lapack,
    S1: Data<Elem = A>,
    S2: Data<Elem = A>,
    S3: Data<Elem = A>,
{
    let size = covariance.nrows();
    let reduction = Array2::<A>::eye(size) - gain.dot(observation_jacobian);
    reduction.dot(covariance)
}
