//! Dense solves for the Newton iterations.
//!
//! The occupancy likelihood is maximized with Newton steps on a small
//! parameter vector (at most `2 + 2k` entries), so we work with `nalgebra`
//! dense matrices throughout.
//!
//! Implementation choices:
//! - The negative Hessian is symmetric positive definite near a maximum, so we
//!   use Cholesky.
//! - Away from the maximum it may be indefinite. We add a growing ridge
//!   (`λ I`) until Cholesky succeeds, which blends the Newton step towards
//!   gradient ascent (Levenberg-style damping).

use nalgebra::{DMatrix, DVector};

/// Ridge values tried in order when the matrix is not positive definite.
const RIDGES: [f64; 8] = [0.0, 1e-8, 1e-6, 1e-4, 1e-2, 1.0, 1e2, 1e4];

/// Solve `(a + λ I) x = b` for the smallest ridge `λ` that makes the system
/// positive definite.
///
/// Returns `None` if no ridge works or the solution is not finite.
pub fn solve_damped(a: &DMatrix<f64>, b: &DVector<f64>) -> Option<DVector<f64>> {
    let scale = a.diagonal().iter().map(|v| v.abs()).fold(1.0_f64, f64::max);
    for &ridge in &RIDGES {
        let mut m = a.clone();
        if ridge > 0.0 {
            for i in 0..m.nrows() {
                m[(i, i)] += ridge * scale;
            }
        }
        if let Some(chol) = m.cholesky() {
            let x = chol.solve(b);
            if x.iter().all(|v| v.is_finite()) {
                return Some(x);
            }
        }
    }
    None
}

/// Invert a symmetric positive definite matrix.
///
/// Returns `None` if the matrix is not positive definite (e.g. a flat
/// likelihood direction) or the inverse has non-finite entries.
pub fn invert_spd(a: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    let inv = a.clone().cholesky()?.inverse();
    if inv.iter().all(|v| v.is_finite()) {
        Some(inv)
    } else {
        None
    }
}

/// Force exact symmetry: `(a + aᵀ) / 2`.
pub fn symmetrize(a: &DMatrix<f64>) -> DMatrix<f64> {
    (a + a.transpose()) * 0.5
}
