//! Covariance helpers around the fitted models. Factorisation and inversion
//! go through `linfa-linalg`; the normal tail comes from `statrs`.

use linfa_linalg::cholesky::{Cholesky, InverseC};
use ndarray::Array2;
use statrs::function::erf::erfc;

/// Pivots below this fraction of the largest diagonal entry count as zero.
const PIVOT_TOLERANCE: f64 = 1e-10;

/// Lower-triangular `L` with `a = L Lᵀ`, or `None` when `a` is not
/// numerically positive definite.
pub fn cholesky(a: &Array2<f64>) -> Option<Array2<f64>> {
    if a.is_empty() {
        return Some(Array2::zeros(a.raw_dim()));
    }
    let l = a.cholesky().ok()?;
    let scale = a.diag().iter().fold(0.0_f64, |m, d| m.max(d.abs()));
    let tolerance = scale * PIVOT_TOLERANCE;
    // also rejects NaN pivots
    if l.diag().iter().all(|d| d * d > tolerance) {
        Some(l)
    } else {
        None
    }
}

pub fn spd_inverse(a: &Array2<f64>) -> Option<Array2<f64>> {
    cholesky(a)?;
    if a.is_empty() {
        return Some(Array2::zeros(a.raw_dim()));
    }
    a.invc().ok()
}

/// Determinant of a symmetric positive semi-definite matrix; zero when the
/// factorisation breaks down. The empty matrix has determinant one.
pub fn spd_determinant(a: &Array2<f64>) -> f64 {
    match cholesky(a) {
        Some(l) => l.diag().iter().map(|d| d * d).product(),
        None => 0.0,
    }
}

/// Rows and columns `indices` of a square matrix.
pub fn submatrix(a: &Array2<f64>, indices: &[usize]) -> Array2<f64> {
    Array2::from_shape_fn((indices.len(), indices.len()), |(i, j)| {
        a[[indices[i], indices[j]]]
    })
}

/// Two-sided p-value of a standard normal statistic.
pub fn normal_two_sided_p(z: f64) -> f64 {
    if !z.is_finite() {
        return if z.is_nan() { f64::NAN } else { 0.0 };
    }
    erfc(z.abs() / std::f64::consts::SQRT_2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn inverse_of_spd_matrix() {
        let a = array![[4.0, 2.0, 0.4], [2.0, 5.0, 1.0], [0.4, 1.0, 3.0]];
        let inv = spd_inverse(&a).unwrap();
        let identity = a.dot(&inv);
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((identity[[i, j]] - expected).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn singular_matrix_has_no_factor() {
        let a = array![[1.0, 2.0], [2.0, 4.0]];
        assert!(cholesky(&a).is_none());
        assert!(spd_inverse(&a).is_none());
        assert_eq!(spd_determinant(&a), 0.0);
    }

    #[test]
    fn near_singular_pivot_is_rejected() {
        let a = array![[1.0, 1.0], [1.0, 1.0 + 1e-13]];
        assert!(cholesky(&a).is_none());
    }

    #[test]
    fn determinant_matches_closed_form() {
        let a = array![[2.0, 0.5], [0.5, 1.0]];
        assert!((spd_determinant(&a) - 1.75).abs() < 1e-12);
        assert_eq!(spd_determinant(&Array2::zeros((0, 0))), 1.0);
    }

    #[test]
    fn normal_p_values() {
        assert!((normal_two_sided_p(0.0) - 1.0).abs() < 1e-9);
        assert!((normal_two_sided_p(1.959_964) - 0.05).abs() < 1e-6);
        assert!((normal_two_sided_p(-1.959_964) - 0.05).abs() < 1e-6);
        assert_eq!(normal_two_sided_p(f64::INFINITY), 0.0);
    }
}
