//! Small dense linear algebra on the host.

use nalgebra::DMatrix;

use crate::error::{CoreError, Result};

/// Proper rotation closest to `a` in the Frobenius sense.
///
/// With `a = U S Vᵀ`, returns `U · diag(1, …, 1, det(U Vᵀ)) · Vᵀ`, so the
/// result is orthogonal with determinant +1 even when the best orthogonal
/// fit is a reflection. Used both to solve the weighted Procrustes problem
/// (with `a` the cross-covariance) and to re-project a blended rotation.
pub fn fit_rotation(a: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    let (rows, cols) = a.shape();
    if rows != cols || rows == 0 {
        return Err(CoreError::linalg(format!(
            "rotation fit needs a non-empty square matrix, got {}x{}",
            rows, cols
        )));
    }
    ensure_finite(a, "rotation fit")?;

    let svd = a
        .clone()
        .try_svd(true, true, f64::EPSILON, 0)
        .ok_or_else(|| CoreError::linalg("SVD did not converge"))?;
    let u = svd.u.ok_or_else(|| CoreError::linalg("SVD returned no U"))?;
    let v_t = svd.v_t.ok_or_else(|| CoreError::linalg("SVD returned no Vᵀ"))?;

    let mut c = DMatrix::<f64>::identity(rows, rows);
    c[(rows - 1, rows - 1)] = (&u * &v_t).determinant().signum();

    Ok(u * c * v_t)
}

/// Moore-Penrose pseudo-inverse with singular values below `eps` dropped.
pub fn pseudo_inverse(m: &DMatrix<f64>, eps: f64) -> Result<DMatrix<f64>> {
    ensure_finite(m, "pseudo-inverse")?;
    m.clone()
        .pseudo_inverse(eps)
        .map_err(|e| CoreError::linalg(format!("pseudo-inverse failed: {}", e)))
}

// The SVD iterates without a cap, so NaN input must not reach it.
fn ensure_finite(m: &DMatrix<f64>, what: &str) -> Result<()> {
    if m.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(CoreError::linalg(format!("{} got non-finite input", what)))
    }
}

/// Determinant of a square matrix.
pub fn determinant(m: &DMatrix<f64>) -> f64 {
    m.determinant()
}
