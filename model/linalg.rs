//! Dense matrix functions used by the transition-matrix model.
//!
//! LAPACK-backed primitives (inverse, SVD, eigenvalues) come from `ndarray-linalg`;
//! the matrix exponential and the principal logarithm are built on top of them:
//!
//! - `expm`: scaling and squaring with a degree-13 Padé approximant (Higham, 2005).
//! - `logm`: inverse scaling and squaring. Repeated Denman–Beavers square roots bring the
//!   argument close to the identity, after which `log(X) = 2·atanh((X - I)(X + I)^-1)` is
//!   summed as a power series and rescaled.
//!
//! Every routine refuses inputs for which the result would be meaningless instead of
//! returning NaN-filled arrays.

use ndarray::{Array2, ArrayBase, Data, Ix2};
use ndarray_linalg::{EigVals, Inverse, OperationNorm, SVD};
use thiserror::Error;

/// Condition numbers above this are treated as numerically singular for inversion.
pub const MAX_CONDITION_NUMBER: f64 = 1e12;

const PADE_13_THETA: f64 = 5.371_920_351_148_152;
const PADE_13_COEFFICIENTS: [f64; 14] = [
    64_764_752_532_480_000.0,
    32_382_376_266_240_000.0,
    7_771_770_303_897_600.0,
    1_187_353_796_428_800.0,
    129_060_195_264_000.0,
    10_559_470_521_600.0,
    670_442_572_800.0,
    33_522_128_640.0,
    1_323_241_920.0,
    40_840_800.0,
    960_960.0,
    16_380.0,
    182.0,
    1.0,
];

const LOG_SERIES_RADIUS: f64 = 0.25;
const MAX_SQUARE_ROOTS: usize = 64;
const MAX_DENMAN_BEAVERS_ITERATIONS: usize = 100;
const MAX_SERIES_TERMS: usize = 200;

#[derive(Debug, Error)]
pub enum NumericError {
    #[error("matrix must be square, found {rows}x{cols}")]
    NotSquare { rows: usize, cols: usize },
    #[error("matrix is singular (smallest singular value {smallest_singular_value:e})")]
    Singular { smallest_singular_value: f64 },
    #[error("matrix is ill-conditioned (condition number {condition:e} exceeds {limit:e})")]
    IllConditioned { condition: f64, limit: f64 },
    #[error(
        "no real principal logarithm: eigenvalue {real}{imaginary:+}i lies on the closed negative real axis"
    )]
    NonRealLogarithm { real: f64, imaginary: f64 },
    #[error("matrix square root iteration did not converge after {0} iterations")]
    SquareRootNotConverged(usize),
    #[error("LAPACK routine failed: {0}")]
    Lapack(#[from] ndarray_linalg::error::LinalgError),
}

fn ensure_square<S: Data<Elem = f64>>(a: &ArrayBase<S, Ix2>) -> Result<usize, NumericError> {
    let (rows, cols) = a.dim();
    if rows != cols {
        return Err(NumericError::NotSquare { rows, cols });
    }
    Ok(rows)
}

/// Induced 1-norm (maximum absolute column sum).
pub fn one_norm<S: Data<Elem = f64>>(a: &ArrayBase<S, Ix2>) -> Result<f64, NumericError> {
    if a.is_empty() {
        return Ok(0.0);
    }
    Ok(a.opnorm_one()?)
}

/// Ratio of the largest to the smallest singular value.
pub fn condition_number<S: Data<Elem = f64>>(a: &ArrayBase<S, Ix2>) -> Result<f64, NumericError> {
    ensure_square(a)?;
    let (_u, sigma, _vt) = a.svd(false, false)?;
    let max_sv = sigma.iter().fold(0.0_f64, |max, &val| max.max(val));
    let min_sv = sigma.iter().fold(f64::INFINITY, |min, &val| min.min(val));
    if min_sv <= 0.0 {
        return Ok(f64::INFINITY);
    }
    Ok(max_sv / min_sv)
}

/// Inverse that refuses singular and ill-conditioned input.
pub fn checked_inverse<S: Data<Elem = f64>>(
    a: &ArrayBase<S, Ix2>,
) -> Result<Array2<f64>, NumericError> {
    let n = ensure_square(a)?;
    if n == 0 {
        return Ok(Array2::zeros((0, 0)));
    }
    let (_u, sigma, _vt) = a.svd(false, false)?;
    let max_sv = sigma.iter().fold(0.0_f64, |max, &val| max.max(val));
    let min_sv = sigma.iter().fold(f64::INFINITY, |min, &val| min.min(val));
    if max_sv == 0.0 || min_sv <= f64::EPSILON * max_sv {
        return Err(NumericError::Singular {
            smallest_singular_value: min_sv,
        });
    }
    let condition = max_sv / min_sv;
    if condition > MAX_CONDITION_NUMBER {
        return Err(NumericError::IllConditioned {
            condition,
            limit: MAX_CONDITION_NUMBER,
        });
    }
    Ok(a.inv()?)
}

/// `a` multiplied by itself `n - 1` times; `n == 0` yields the identity.
pub fn matrix_power<S: Data<Elem = f64>>(
    a: &ArrayBase<S, Ix2>,
    n: u32,
) -> Result<Array2<f64>, NumericError> {
    let dim = ensure_square(a)?;
    let mut result = Array2::<f64>::eye(dim);
    for _ in 0..n {
        result = result.dot(a);
    }
    Ok(result)
}

/// Matrix exponential by scaling and squaring with a [13/13] Padé approximant.
pub fn expm<S: Data<Elem = f64>>(a: &ArrayBase<S, Ix2>) -> Result<Array2<f64>, NumericError> {
    let n = ensure_square(a)?;
    let identity = Array2::<f64>::eye(n);
    if n == 0 {
        return Ok(identity);
    }

    let norm = one_norm(a)?;
    let squarings = if norm > PADE_13_THETA {
        (norm / PADE_13_THETA).log2().ceil().max(0.0) as i32
    } else {
        0
    };
    let scaled = a.mapv(|v| v / 2f64.powi(squarings));

    let b = &PADE_13_COEFFICIENTS;
    let a2 = scaled.dot(&scaled);
    let a4 = a2.dot(&a2);
    let a6 = a4.dot(&a2);

    let inner_u = &a6 * b[13] + &a4 * b[11] + &a2 * b[9];
    let u_poly = a6.dot(&inner_u) + &a6 * b[7] + &a4 * b[5] + &a2 * b[3] + &identity * b[1];
    let u = scaled.dot(&u_poly);

    let inner_v = &a6 * b[12] + &a4 * b[10] + &a2 * b[8];
    let v = a6.dot(&inner_v) + &a6 * b[6] + &a4 * b[4] + &a2 * b[2] + &identity * b[0];

    let denominator = &v - &u;
    let numerator = &v + &u;
    let mut result = denominator.inv()?.dot(&numerator);
    for _ in 0..squarings {
        result = result.dot(&result);
    }
    Ok(result)
}

/// Principal square root by the Denman–Beavers iteration.
pub fn sqrtm<S: Data<Elem = f64>>(a: &ArrayBase<S, Ix2>) -> Result<Array2<f64>, NumericError> {
    let n = ensure_square(a)?;
    let mut y = a.to_owned();
    let mut z = Array2::<f64>::eye(n);
    for iteration in 0..MAX_DENMAN_BEAVERS_ITERATIONS {
        let y_inv = y.inv()?;
        let z_inv = z.inv()?;
        let y_next = (&y + &z_inv) * 0.5;
        let z_next = (&z + &y_inv) * 0.5;
        let delta = one_norm(&(&y_next - &y))?;
        y = y_next;
        z = z_next;
        if delta <= 1e-14 * one_norm(&y)?.max(1.0) {
            log::debug!("Denman-Beavers square root converged after {} iterations", iteration + 1);
            return Ok(y);
        }
    }
    Err(NumericError::SquareRootNotConverged(
        MAX_DENMAN_BEAVERS_ITERATIONS,
    ))
}

/// Principal matrix logarithm.
///
/// Fails with [`NumericError::NonRealLogarithm`] when an eigenvalue lies on the closed
/// negative real axis, where no real principal logarithm exists.
pub fn logm<S: Data<Elem = f64>>(a: &ArrayBase<S, Ix2>) -> Result<Array2<f64>, NumericError> {
    let n = ensure_square(a)?;
    let identity = Array2::<f64>::eye(n);
    if n == 0 {
        return Ok(identity);
    }

    for eigenvalue in a.eigvals()?.iter() {
        let scale = eigenvalue.norm().max(1.0);
        if eigenvalue.im.abs() <= 1e-12 * scale && eigenvalue.re <= 0.0 {
            return Err(NumericError::NonRealLogarithm {
                real: eigenvalue.re,
                imaginary: eigenvalue.im,
            });
        }
    }

    let mut x = a.to_owned();
    let mut square_roots = 0usize;
    while one_norm(&(&x - &identity))? > LOG_SERIES_RADIUS {
        if square_roots == MAX_SQUARE_ROOTS {
            return Err(NumericError::SquareRootNotConverged(square_roots));
        }
        x = sqrtm(&x)?;
        square_roots += 1;
    }
    log::debug!("matrix logarithm used {} square roots", square_roots);

    let z = (&x - &identity).dot(&(&x + &identity).inv()?);
    let z2 = z.dot(&z);
    let mut term = z.clone();
    let mut series = z;
    for k in 1..MAX_SERIES_TERMS {
        term = term.dot(&z2);
        let contribution = &term / (2 * k + 1) as f64;
        series += &contribution;
        if one_norm(&contribution)? <= f64::EPSILON * one_norm(&series)?.max(f64::MIN_POSITIVE) {
            break;
        }
    }

    let rescale = 2.0 * 2f64.powi(square_roots as i32);
    Ok(series * rescale)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn exponential_of_zero_is_identity() {
        let zero = Array2::<f64>::zeros((3, 3));
        let result = expm(&zero).unwrap();
        for ((i, j), value) in result.indexed_iter() {
            let expected = if i == j { 1.0 } else { 0.0 };
            assert_abs_diff_eq!(*value, expected, epsilon = 1e-14);
        }
    }

    #[test]
    fn exponential_of_diagonal_matches_scalar_exponential() {
        let diagonal = array![[1.5, 0.0], [0.0, -2.0]];
        let result = expm(&diagonal).unwrap();
        assert_abs_diff_eq!(result[[0, 0]], 1.5f64.exp(), epsilon = 1e-10);
        assert_abs_diff_eq!(result[[1, 1]], (-2.0f64).exp(), epsilon = 1e-12);
        assert_abs_diff_eq!(result[[0, 1]], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn logarithm_inverts_exponential() {
        let a = array![[1.0, 3.0], [1.0, 4.0]];
        let log_a = logm(&a).unwrap();
        let back = expm(&log_a).unwrap();
        for (observed, expected) in back.iter().zip(a.iter()) {
            assert_abs_diff_eq!(*observed, *expected, epsilon = 1e-8);
        }
    }

    #[test]
    fn logarithm_of_generator_exponential_recovers_generator() {
        let generator = array![[-0.3, 0.2, 0.1], [0.05, -0.15, 0.1], [0.0, 0.0, 0.0]];
        let p = expm(&generator).unwrap();
        let recovered = logm(&p).unwrap();
        for (observed, expected) in recovered.iter().zip(generator.iter()) {
            assert_abs_diff_eq!(*observed, *expected, epsilon = 1e-9);
        }
    }

    #[test]
    fn logarithm_rejects_negative_eigenvalue() {
        let a = array![[0.0, 1.0], [1.0, 0.0]];
        let err = logm(&a).unwrap_err();
        assert!(matches!(err, NumericError::NonRealLogarithm { .. }));
    }

    #[test]
    fn square_root_squares_back() {
        let a = array![[4.0, 1.0], [0.0, 9.0]];
        let root = sqrtm(&a).unwrap();
        let squared = root.dot(&root);
        for (observed, expected) in squared.iter().zip(a.iter()) {
            assert_abs_diff_eq!(*observed, *expected, epsilon = 1e-10);
        }
    }

    #[test]
    fn inverse_rejects_singular_matrix() {
        let singular = array![[1.0, 2.0, 3.0], [2.0, 4.0, 6.0], [3.0, 6.0, 9.0]];
        let err = checked_inverse(&singular).unwrap_err();
        assert!(matches!(
            err,
            NumericError::Singular { .. } | NumericError::IllConditioned { .. }
        ));
    }

    #[test]
    fn inverse_of_absorbing_matrix() {
        let a = array![[0.75, 0.25], [0.0, 1.0]];
        let inverse = checked_inverse(&a).unwrap();
        let product = a.dot(&inverse);
        assert_abs_diff_eq!(product[[0, 0]], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(product[[0, 1]], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(product[[1, 1]], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn power_counts_multiplications() {
        let a = array![[0.5, 0.5], [0.0, 1.0]];
        let identity = matrix_power(&a, 0).unwrap();
        assert_abs_diff_eq!(identity[[0, 1]], 0.0);
        let cubed = matrix_power(&a, 3).unwrap();
        assert_abs_diff_eq!(cubed[[0, 0]], 0.125, epsilon = 1e-15);
        assert_abs_diff_eq!(cubed[[0, 1]], 0.875, epsilon = 1e-15);
    }

    #[test]
    fn non_square_input_is_rejected() {
        let rect = Array2::<f64>::zeros((2, 3));
        assert!(matches!(
            expm(&rect).unwrap_err(),
            NumericError::NotSquare { rows: 2, cols: 3 }
        ));
    }
}
