//! Closed-form parameter updates of the variational loop.
//!
//! Each function documents which state it reads and which fields it writes.
//! Small `[D, D]` and `[K, K]` solves happen on the host; everything sized by
//! the number of points stays on the device.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use nalgebra::{DMatrix, DVector};
use spareg_core::backend::{
    digamma, digamma_scalar, fit_rotation, from_matrix, from_values, pseudo_inverse, scalar, scale_rows,
    to_matrix, to_values,
};
use spareg_core::transform::Transform;

use super::assignment::Assignment;
use super::state::{AnchorSet, GuidanceState, VariationalState};
use crate::error::Result;

pub const GAMMA_MIN: f64 = 0.01;
pub const GAMMA_MAX: f64 = 0.99;
/// Beta prior pseudo-counts of the inlier fraction.
const GAMMA_PRIOR_A: f64 = 1.0;
const GAMMA_PRIOR_B: f64 = 1.0;

pub const SIGMA2_FLOOR: f64 = 1e-3;
pub const SIGMA2_WARMUP_FLOOR: f64 = 1e-2;
pub const SIGMA2_WARMUP_ITERATIONS: usize = 100;

/// Relative singular-value cutoff of the coefficient covariance.
const PINV_RCOND: f64 = 1e-6;

/// Kernel basis of the deformation field.
#[derive(Debug, Clone)]
pub struct KernelBasis<B: Backend> {
    /// Cross kernel between moving points and inducing points `[N, K]`.
    pub cross: Tensor<B, 2>,
    /// Gram matrix of the inducing points `[K, K]`.
    pub gram: Tensor<B, 2>,
    pub lambda_vf: f64,
}

/// `max(value, floor)` that lets NaN through.
fn floor_at(value: f64, floor: f64) -> f64 {
    if value < floor {
        floor
    } else {
        value
    }
}

fn blend(step: f64, fresh: f64, previous: f64) -> f64 {
    step * fresh + (1.0 - step) * previous
}

/// `wᵀ X` as a host vector of length D.
fn weighted_column_sum<B: Backend>(x: Tensor<B, 2>, w: Tensor<B, 1>) -> DVector<f64> {
    DVector::from_vec(to_values(scale_rows(x, w).sum_dim(0)))
}

/// Subtract a host row vector from every row of `x`.
fn center<B: Backend>(x: Tensor<B, 2>, mean: &DVector<f64>) -> Tensor<B, 2> {
    let device = x.device();
    x - from_values::<B>(mean.as_slice(), &device).unsqueeze_dim::<2>(0)
}

fn center_host(x: &DMatrix<f64>, mean: &DVector<f64>) -> DMatrix<f64> {
    let mut out = x.clone();
    for mut row in out.row_iter_mut() {
        row -= mean.transpose();
    }
    out
}

/// Inlier fraction of the moving set.
///
/// Reads `Sp_spatial`; writes `gamma`. `batch_scale` is `M / m` when only a
/// batch of `m` reference points was assigned.
pub fn update_gamma<B: Backend>(
    state: &mut VariationalState<B>,
    assignment: &Assignment<B>,
    n_moving: usize,
    batch_scale: f64,
) {
    let inlier_mass = assignment.sp_spatial * batch_scale;
    let gamma = (digamma_scalar(GAMMA_PRIOR_A + inlier_mass)
        - digamma_scalar(GAMMA_PRIOR_A + GAMMA_PRIOR_B + n_moving as f64))
    .exp();
    state.gamma = gamma.clamp(GAMMA_MIN, GAMMA_MAX);
}

/// Per-point mixture weights.
///
/// Reads `K_NA_spatial`, `Sp_spatial`, `kappa`, `step_size`; writes `alpha`.
pub fn update_alpha<B: Backend>(state: &mut VariationalState<B>, assignment: &Assignment<B>) {
    let n = assignment.k_na_spatial.dims()[0] as f64;
    let kappa = state.kappa;
    let fresh = (digamma(assignment.k_na_spatial.clone().add_scalar(kappa))
        .sub_scalar(digamma_scalar(kappa * n + assignment.sp_spatial)))
    .exp();
    let step = state.step_size;
    state.alpha = if step < 1.0 {
        fresh.mul_scalar(step) + state.alpha.clone().mul_scalar(1.0 - step)
    } else {
        fresh
    };
}

/// Deformation coefficients and their posterior variance.
///
/// Reads `P`, `K_NA`, `RnA`, `sigma2`, `step_size` and the guidance pairs;
/// writes `sigma_inv`, `pxb_term`, `coefficients`, `displacement`,
/// `sigma_diag` and the guidance displacement.
pub fn update_nonrigid<B: Backend>(
    state: &mut VariationalState<B>,
    assignment: &Assignment<B>,
    reference_batch: Tensor<B, 2>,
    basis: &KernelBasis<B>,
    guidance: Option<&mut GuidanceState<B>>,
) -> Result<()> {
    let device = state.aligned.device();
    let sigma2 = state.sigma2;
    let step = state.step_size;
    let u = basis.cross.clone();

    let precision = basis.gram.clone().mul_scalar(sigma2 * basis.lambda_vf)
        + u.clone().transpose().matmul(scale_rows(u.clone(), assignment.k_na.clone()));
    let pxb = assignment.p.clone().matmul(reference_batch)
        - scale_rows(state.rigid.clone(), assignment.k_na.clone());
    if step < 1.0 {
        state.sigma_inv = precision.mul_scalar(step) + state.sigma_inv.clone().mul_scalar(1.0 - step);
        state.pxb_term = pxb.mul_scalar(step) + state.pxb_term.clone().mul_scalar(1.0 - step);
    } else {
        state.sigma_inv = precision;
        state.pxb_term = pxb;
    }

    let mut precision = state.sigma_inv.clone();
    let mut rhs = u.clone().transpose().matmul(state.pxb_term.clone());
    if let Some(g) = guidance.as_deref().filter(|g| g.effect.affects_nonrigid()) {
        let w = g.weight(sigma2);
        let ui_t = g.kernel.clone().transpose();
        precision = precision + ui_t.clone().matmul(g.kernel.clone()).mul_scalar(w);
        rhs = rhs + ui_t.matmul(g.reference.clone() - g.rigid.clone()).mul_scalar(w);
    }

    let host = to_matrix(precision);
    let covariance = pseudo_inverse(&host, PINV_RCOND * host.norm())?;
    let covariance = from_matrix::<B>(&covariance, &device);

    state.coefficients = covariance.clone().matmul(rhs);
    state.displacement = u.clone().matmul(state.coefficients.clone());
    if let Some(g) = guidance {
        g.displacement = g.kernel.clone().matmul(state.coefficients.clone());
    }
    state.sigma_diag = (u.clone() * u.matmul(covariance))
        .sum_dim(1)
        .squeeze::<1>(1)
        .mul_scalar(sigma2);
    Ok(())
}

/// Guidance pairs copied to the host for the rigid solve.
struct HostPairs {
    moving: DMatrix<f64>,
    reference: DMatrix<f64>,
    displacement: DMatrix<f64>,
    weight: f64,
}

/// Rotation and translation.
///
/// Reads `P`, `K_NA`, `K_NB`, `Sp`, `VnA`, `sigma2`, `step_size`, the
/// guidance pairs and the coarse anchors; writes `rotation`, `translation`,
/// `rigid` and the rigidly transformed guidance points. The moving side is
/// always transformed from its base coordinates.
pub fn update_rigid<B: Backend>(
    state: &mut VariationalState<B>,
    assignment: &Assignment<B>,
    moving: &Tensor<B, 2>,
    reference_batch: Tensor<B, 2>,
    guidance: Option<&mut GuidanceState<B>>,
    anchors: Option<&AnchorSet>,
) -> Result<()> {
    let sigma2 = state.sigma2;
    let sp = assignment.sp;

    let pxa = weighted_column_sum(moving.clone(), assignment.k_na.clone());
    let pva = weighted_column_sum(state.displacement.clone(), assignment.k_na.clone());
    let pxb = weighted_column_sum(reference_batch.clone(), assignment.k_nb.clone());

    let pairs = guidance
        .as_deref()
        .filter(|g| g.effect.affects_rigid())
        .map(|g| HostPairs {
            moving: to_matrix(g.moving.clone()),
            reference: to_matrix(g.reference.clone()),
            displacement: to_matrix(g.displacement.clone()),
            weight: g.weight(sigma2),
        });

    let mut mu_xb = pxb.clone();
    let mut mu_xa = pxa.clone();
    let mut mu_vn = pva.clone();
    let mut x_den = sp;
    let mut v_den = sp;
    if let Some(h) = &pairs {
        let count = h.moving.nrows() as f64;
        mu_xb += h.reference.row_sum().transpose() * h.weight;
        mu_xa += h.moving.row_sum().transpose() * h.weight;
        mu_vn += h.displacement.row_sum().transpose() * h.weight;
        x_den += h.weight * count;
        v_den += h.weight * count;
    }
    let anchor_weight = anchors.map(|a| DVector::from_column_slice(&a.weight));
    if let (Some(a), Some(w)) = (anchors, &anchor_weight) {
        let r = a.scale(sigma2);
        mu_xb += a.reference.transpose() * w * r;
        mu_xa += a.moving.transpose() * w * r;
        x_den += r * a.total_weight();
    }
    mu_xb /= x_den;
    mu_xa /= x_den;
    if v_den > 0.0 {
        mu_vn /= v_den;
    } else {
        mu_vn.fill(0.0);
    }

    let xa_hat = center(moving.clone(), &mu_xa);
    let vna_hat = center(state.displacement.clone(), &mu_vn);
    let xb_hat = center(reference_batch, &mu_xb);
    let cross = xb_hat
        .transpose()
        .matmul(assignment.p.clone().transpose().matmul(xa_hat.clone()))
        - vna_hat
            .transpose()
            .matmul(scale_rows(xa_hat, assignment.k_na.clone()));
    let mut a_mat = to_matrix(cross);

    if let Some(h) = &pairs {
        let xai = center_host(&h.moving, &mu_xa);
        let xbi = center_host(&h.reference, &mu_xb);
        let vai = center_host(&h.displacement, &mu_vn);
        a_mat += (xbi - vai).transpose() * xai * h.weight;
    }
    if let (Some(a), Some(w)) = (anchors, &anchor_weight) {
        let ainl = center_host(&a.moving, &mu_xa);
        let binl = center_host(&a.reference, &mu_xb);
        a_mat += binl.transpose() * DMatrix::from_diagonal(w) * ainl * a.scale(sigma2);
    }

    let step = state.step_size;
    let fitted = fit_rotation(&a_mat)?;
    state.rotation = if step < 1.0 {
        // The blend leaves SO(D); project back.
        fit_rotation(&(fitted * step + &state.rotation * (1.0 - step)))?
    } else {
        fitted
    };
    let rotation = &state.rotation;

    let mut numerator = pxb - pva - rotation * pxa;
    let mut denominator = sp;
    if let Some(h) = &pairs {
        let residual = &h.reference - &h.displacement - &h.moving * rotation.transpose();
        numerator += residual.row_sum().transpose() * h.weight;
        denominator += h.weight * h.moving.nrows() as f64;
    }
    if let (Some(a), Some(w)) = (anchors, &anchor_weight) {
        let r = a.scale(sigma2);
        numerator += (a.reference.transpose() * w - rotation * (a.moving.transpose() * w)) * r;
        denominator += r * a.total_weight();
    }
    let fresh = numerator / denominator;
    state.translation = if step < 1.0 {
        fresh
            .iter()
            .zip(&state.translation)
            .map(|(&f, &p)| blend(step, f, p))
            .collect()
    } else {
        fresh.iter().copied().collect()
    };

    let rigid = state.rigid_transform();
    state.rigid = rigid.transform_points(moving.clone());
    if let Some(g) = guidance {
        g.rigid = rigid.transform_points(g.moving.clone());
    }
    Ok(())
}

/// Spatial variance.
///
/// Reads `sigma2_related`, `K_NA_sigma2`, `Sp_sigma2`, `sigma_diag`; writes
/// `sigma2`.
pub fn update_sigma2<B: Backend>(state: &mut VariationalState<B>, assignment: &Assignment<B>, iteration: usize) {
    let correction = scalar(assignment.k_na_sigma2.clone() * state.sigma_diag.clone()) / assignment.sp_sigma2;
    let mut sigma2 = floor_at(assignment.sigma2_related + correction, SIGMA2_FLOOR);
    if iteration < SIGMA2_WARMUP_ITERATIONS {
        sigma2 = floor_at(sigma2, SIGMA2_WARMUP_FLOOR);
    }
    state.sigma2 = sigma2;
}

/// Weighted Procrustes fit of the base moving coordinates to the full
/// reference set under a full assignment, ignoring the deformation.
pub fn optimal_rigid<B: Backend>(
    moving: &Tensor<B, 2>,
    reference: &Tensor<B, 2>,
    assignment: &Assignment<B>,
) -> Result<(DMatrix<f64>, Vec<f64>)> {
    let sp = assignment.sp;
    let mu_a = weighted_column_sum(moving.clone(), assignment.k_na.clone()) / sp;
    let mu_b = weighted_column_sum(reference.clone(), assignment.k_nb.clone()) / sp;
    let a_bar = center(moving.clone(), &mu_a);
    let b_bar = center(reference.clone(), &mu_b);
    let cross = to_matrix(assignment.p.clone().matmul(b_bar).transpose().matmul(a_bar));
    let rotation = fit_rotation(&cross)?;
    let translation = &mu_b - &rotation * &mu_a;
    Ok((rotation, translation.iter().copied().collect()))
}

/// Initial spatial variance: `scale` times the mean squared distance over
/// all moving/reference pairs, per dimension.
pub fn initial_sigma2(moving: &DMatrix<f64>, reference: &DMatrix<f64>, scale: f64) -> f64 {
    let (n, dim) = moving.shape();
    let m = reference.nrows();
    let sq_a: f64 = moving.iter().map(|v| v * v).sum();
    let sq_b: f64 = reference.iter().map(|v| v * v).sum();
    let cross = moving.row_sum().dot(&reference.row_sum());
    let total = m as f64 * sq_a + n as f64 * sq_b - 2.0 * cross;
    scale * total.max(0.0) / (dim as f64 * n as f64 * m as f64)
}

/// Larger bounding-box volume of the two sets.
pub fn bounding_volume(moving: &DMatrix<f64>, reference: &DMatrix<f64>) -> f64 {
    let volume = |m: &DMatrix<f64>| -> f64 { m.column_iter().map(|c| c.max() - c.min()).product() };
    volume(moving).max(volume(reference))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GuidanceEffect;
    use crate::engine::state::guidance_state;
    use burn_ndarray::NdArray;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;
    use spareg_core::backend::determinant;

    type TestBackend = NdArray<f32>;

    fn cloud(n: usize, seed: u64) -> DMatrix<f64> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        DMatrix::from_fn(n, 2, |_, _| rng.gen_range(-1.0..1.0))
    }

    fn rotation(theta: f64) -> DMatrix<f64> {
        let (s, c) = theta.sin_cos();
        DMatrix::from_row_slice(2, 2, &[c, -s, s, c])
    }

    fn transform(x: &DMatrix<f64>, r: &DMatrix<f64>, t: [f64; 2]) -> DMatrix<f64> {
        let mut y = x * r.transpose();
        for mut row in y.row_iter_mut() {
            row[0] += t[0];
            row[1] += t[1];
        }
        y
    }

    /// One-to-one assignment between row `i` of both sets.
    fn diagonal_assignment(n: usize) -> Assignment<TestBackend> {
        let device = Default::default();
        let p: Tensor<TestBackend, 2> = Tensor::eye(n, &device);
        Assignment {
            p,
            k_na: Tensor::ones([n], &device),
            k_nb: Tensor::ones([n], &device),
            sp: n as f64,
            k_na_spatial: Tensor::ones([n], &device),
            sp_spatial: n as f64,
            k_na_sigma2: Tensor::ones([n], &device),
            sp_sigma2: n as f64,
            sigma2_related: 0.0,
        }
    }

    #[test]
    fn test_gamma_is_clamped() {
        let device = Default::default();
        let moving = Tensor::<TestBackend, 2>::zeros([10, 2], &device);
        let mut state = VariationalState::new(&moving, DMatrix::identity(2, 2), vec![0.0; 2], 0.1, 3);
        let mut a = diagonal_assignment(10);

        a.sp_spatial = 0.0;
        update_gamma(&mut state, &a, 10, 1.0);
        assert_eq!(state.gamma, GAMMA_MIN);

        a.sp_spatial = 1000.0;
        update_gamma(&mut state, &a, 10, 1.0);
        assert_eq!(state.gamma, GAMMA_MAX);

        a.sp_spatial = 6.0;
        update_gamma(&mut state, &a, 12, 1.0);
        assert!(state.gamma > 0.4 && state.gamma < 0.55);
    }

    #[test]
    fn test_alpha_blends_with_step() {
        let device = Default::default();
        let moving = Tensor::<TestBackend, 2>::zeros([4, 2], &device);
        let mut state = VariationalState::new(&moving, DMatrix::identity(2, 2), vec![0.0; 2], 0.1, 3);
        let a = diagonal_assignment(4);

        update_alpha(&mut state, &a);
        let full = to_values(state.alpha.clone());
        // exp(ψ(2) − ψ(8))
        let expected = (digamma_scalar(2.0) - digamma_scalar(8.0)).exp();
        assert!((full[0] - expected).abs() < 1e-5);

        state.alpha = Tensor::ones([4], &device);
        state.step_size = 0.5;
        update_alpha(&mut state, &a);
        let half = to_values(state.alpha.clone());
        assert!((half[0] - (0.5 * expected + 0.5)).abs() < 1e-5);
    }

    #[test]
    fn test_sigma2_floors() {
        let device = Default::default();
        let moving = Tensor::<TestBackend, 2>::zeros([5, 2], &device);
        let mut state = VariationalState::new(&moving, DMatrix::identity(2, 2), vec![0.0; 2], 0.1, 3);
        let mut a = diagonal_assignment(5);
        a.sigma2_related = 1e-6;

        update_sigma2(&mut state, &a, 10);
        assert_eq!(state.sigma2, SIGMA2_WARMUP_FLOOR);
        update_sigma2(&mut state, &a, 150);
        assert_eq!(state.sigma2, SIGMA2_FLOOR);

        a.sigma2_related = 0.3;
        update_sigma2(&mut state, &a, 150);
        assert!((state.sigma2 - 0.3).abs() < 1e-12);

        a.sigma2_related = f64::NAN;
        update_sigma2(&mut state, &a, 150);
        assert!(state.sigma2.is_nan());
    }

    #[test]
    fn test_rigid_update_recovers_transform() {
        let device = Default::default();
        let x = cloud(40, 2);
        let r = rotation(0.7);
        let y = transform(&x, &r, [0.3, -0.2]);
        let moving = from_matrix::<TestBackend>(&x, &device);
        let reference = from_matrix::<TestBackend>(&y, &device);

        let mut state = VariationalState::new(&moving, DMatrix::identity(2, 2), vec![0.0; 2], 0.1, 3);
        update_rigid(&mut state, &diagonal_assignment(40), &moving, reference, None, None).unwrap();

        assert!((&state.rotation - &r).abs().max() < 1e-4);
        assert!((state.translation[0] - 0.3).abs() < 1e-4);
        assert!((state.translation[1] + 0.2).abs() < 1e-4);
        let rigid = to_matrix(state.rigid.clone());
        assert!((rigid - y).abs().max() < 1e-4);
    }

    #[test]
    fn test_blended_rotation_stays_proper() {
        let device = Default::default();
        let x = cloud(30, 4);
        let y = transform(&x, &rotation(2.5), [0.0, 0.0]);
        let moving = from_matrix::<TestBackend>(&x, &device);
        let reference = from_matrix::<TestBackend>(&y, &device);

        let mut state = VariationalState::new(&moving, rotation(-0.4), vec![0.1, 0.1], 0.1, 3);
        state.step_size = 0.3;
        update_rigid(&mut state, &diagonal_assignment(30), &moving, reference, None, None).unwrap();

        let rtr = state.rotation.transpose() * &state.rotation;
        assert!((rtr - DMatrix::<f64>::identity(2, 2)).abs().max() < 1e-9);
        assert!((determinant(&state.rotation) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_anchors_pull_rigid_fit() {
        let device = Default::default();
        let x = cloud(20, 6);
        let r = rotation(0.3);
        let y = transform(&x, &r, [0.5, 0.5]);
        let moving = from_matrix::<TestBackend>(&x, &device);
        let reference = from_matrix::<TestBackend>(&y, &device);

        // No probabilistic mass at all: the anchors alone define the fit.
        let mut a = diagonal_assignment(20);
        a.p = Tensor::zeros([20, 20], &device);
        a.k_na = Tensor::zeros([20], &device);
        a.k_nb = Tensor::zeros([20], &device);
        a.sp = 0.0;
        let anchors = AnchorSet {
            moving: x.clone(),
            reference: y.clone(),
            weight: vec![1.0; 20],
            lambda: 1.0,
        };
        let mut state = VariationalState::new(&moving, DMatrix::identity(2, 2), vec![0.0; 2], 0.1, 3);
        update_rigid(&mut state, &a, &moving, reference, None, Some(&anchors)).unwrap();

        assert!((&state.rotation - &r).abs().max() < 1e-6);
        assert!((state.translation[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_nonrigid_update_reduces_residual() {
        let device = Default::default();
        let x = cloud(50, 8);
        let mut y = x.clone();
        for i in 0..50 {
            y[(i, 0)] += 0.1 * x[(i, 1)];
        }
        let moving = from_matrix::<TestBackend>(&x, &device);
        let reference = from_matrix::<TestBackend>(&y, &device);

        let inducing = spareg_core::transform::InducingPoints::<TestBackend>::from_host(
            x.select_rows([0usize, 5, 10, 15, 20, 25, 30, 35, 40, 45].iter()),
            1.0,
            &device,
        );
        let basis = KernelBasis {
            cross: inducing.cross_kernel(moving.clone()),
            gram: inducing.gram(),
            lambda_vf: 1.0,
        };
        let mut state = VariationalState::new(&moving, DMatrix::identity(2, 2), vec![0.0; 2], 0.01, 10);
        update_nonrigid(&mut state, &diagonal_assignment(50), reference, &basis, None).unwrap();
        state.recompose();

        let before = (&x - &y).norm();
        let after = (to_matrix(state.aligned.clone()) - &y).norm();
        assert!(after < 0.7 * before, "{} vs {}", after, before);
        assert!(to_values(state.sigma_diag.clone()).iter().all(|&v| v >= -1e-6));
    }

    #[test]
    fn test_guidance_moves_with_rigid_update() {
        let device = Default::default();
        let x = cloud(20, 9);
        let y = transform(&x, &rotation(0.2), [0.1, 0.0]);
        let moving = from_matrix::<TestBackend>(&x, &device);
        let reference = from_matrix::<TestBackend>(&y, &device);

        let mut state = VariationalState::new(&moving, DMatrix::identity(2, 2), vec![0.0; 2], 0.1, 2);
        let pairs_a = x.select_rows([0usize, 1, 2].iter());
        let pairs_b = y.select_rows([0usize, 1, 2].iter());
        let kernel = Tensor::<TestBackend, 2>::zeros([3, 2], &device);
        let mut guidance = guidance_state(&pairs_a, &pairs_b, GuidanceEffect::Both, 1.0, kernel, &state);
        update_rigid(
            &mut state,
            &diagonal_assignment(20),
            &moving,
            reference,
            Some(&mut guidance),
            None,
        )
        .unwrap();

        let moved = to_matrix(guidance.rigid.clone());
        assert!((moved - pairs_b).abs().max() < 1e-4);
    }

    #[test]
    fn test_optimal_rigid_matches_known_rotation() {
        let device = Default::default();
        let x = cloud(25, 3);
        let r = rotation(-1.1);
        let y = transform(&x, &r, [1.0, 2.0]);
        let (rot, t) = optimal_rigid(
            &from_matrix::<TestBackend>(&x, &device),
            &from_matrix::<TestBackend>(&y, &device),
            &diagonal_assignment(25),
        )
        .unwrap();
        assert!((rot - r).abs().max() < 1e-4);
        assert!((t[0] - 1.0).abs() < 1e-4);
        assert!((t[1] - 2.0).abs() < 1e-4);
    }

    #[test]
    fn test_initial_sigma2_matches_pairwise_mean() {
        let a = cloud(7, 1);
        let b = cloud(5, 2);
        let mut total = 0.0;
        for i in 0..7 {
            for j in 0..5 {
                total += (a.row(i) - b.row(j)).norm_squared();
            }
        }
        let expected = 0.1 * total / (2.0 * 7.0 * 5.0);
        assert!((initial_sigma2(&a, &b, 0.1) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_bounding_volume_takes_larger_set() {
        let a = DMatrix::from_row_slice(2, 2, &[0.0, 0.0, 1.0, 2.0]);
        let b = DMatrix::from_row_slice(2, 2, &[0.0, 0.0, 3.0, 1.0]);
        assert_eq!(bounding_volume(&a, &b), 3.0);
    }
}
