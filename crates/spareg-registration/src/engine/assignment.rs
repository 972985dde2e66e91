//! Assignment (E-step) between the current moving estimate and a batch of
//! reference points.
//!
//! Reference columns are processed in chunks to bound the size of the
//! `[N, chunk]` intermediates. Marginals are summed over chunks and the
//! assignment columns concatenated, so the result does not depend on the
//! chunk size beyond floating-point summation order.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use spareg_core::backend::{index_tensor, scalar, squared_distances};

use crate::metric::FeatureModel;

/// Added to column sums before normalizing assignment columns.
const COLUMN_EPS: f64 = 1e-8;
/// Chunk budget unit, in matrix entries.
const CHUNK_BASE: f64 = 1e8;

/// Posterior assignment of a reference batch and its marginals.
#[derive(Debug, Clone)]
pub struct Assignment<B: Backend> {
    /// `P` `[N, m]`.
    pub p: Tensor<B, 2>,
    /// Row sums of `P` `[N]`.
    pub k_na: Tensor<B, 1>,
    /// Column sums of `P` `[m]`.
    pub k_nb: Tensor<B, 1>,
    pub sp: f64,
    /// Row sums of the spatial-only posterior `[N]`.
    pub k_na_spatial: Tensor<B, 1>,
    pub sp_spatial: f64,
    /// Row sums of the variance posterior `[N]`.
    pub k_na_sigma2: Tensor<B, 1>,
    pub sp_sigma2: f64,
    /// Mean weighted squared distance per dimension under the variance
    /// posterior.
    pub sigma2_related: f64,
}

/// Parameters the E-step reads from the current state.
#[derive(Debug, Clone)]
pub struct AssignmentParams<B: Backend> {
    pub sigma2: f64,
    pub gamma: f64,
    pub outlier_variance: f64,
    pub alpha: Tensor<B, 1>,
    pub sigma_diag: Tensor<B, 1>,
    /// Larger bounding-box volume (area in 2D) of the two sets.
    pub volume: f64,
}

/// Columns per chunk for `n_moving` rows and a `capacity` budget, never more
/// than the batch and never zero.
pub fn chunk_size(capacity: f64, n_moving: usize, batch: usize) -> usize {
    let split = (capacity * CHUNK_BASE / n_moving.max(1) as f64) as usize;
    split.min(batch).max(1)
}

/// Compute the assignment of `columns` of `reference` to `aligned`.
///
/// `chunk` bounds the number of reference columns processed at once; pass
/// `columns.len()` for a single pass.
pub fn compute_assignment<B: Backend>(
    aligned: &Tensor<B, 2>,
    reference: &Tensor<B, 2>,
    columns: &[usize],
    features: &FeatureModel<B>,
    params: &AssignmentParams<B>,
    chunk: usize,
) -> Assignment<B> {
    let device = aligned.device();
    let [n, dim] = aligned.dims();
    let sigma2 = params.sigma2;
    let two_sigma2 = 2.0 * sigma2;

    let outlier = (2.0 * std::f64::consts::PI * sigma2).powf(dim as f64 / 2.0) * (1.0 - params.gamma)
        / (params.gamma * params.volume * n as f64);

    // alpha_i * exp(-SigmaDiag_i / sigma2), [N, 1]
    let model_mul = (params.alpha.clone() * params.sigma_diag.clone().div_scalar(-sigma2).exp())
        .unsqueeze_dim::<2>(1);

    let mut blocks = Vec::new();
    let mut k_na_spatial: Tensor<B, 2> = Tensor::zeros([n, 1], &device);
    let mut k_na_sigma2: Tensor<B, 2> = Tensor::zeros([n, 1], &device);
    let mut sigma2_raw = 0.0;

    for cols in columns.chunks(chunk.max(1)) {
        let idx = index_tensor::<B>(cols, &device);
        let dist = squared_distances(aligned.clone(), reference.clone().select(0, idx));

        let kernel = dist.clone().mul_scalar(-params.outlier_variance / two_sigma2).exp();
        let robust = model_mul.clone() * kernel.clone();
        let robust_total = robust.clone().sum_dim(0).add_scalar(outlier); // [1, c]
        k_na_spatial = k_na_spatial + (robust / robust_total).sum_dim(1);
        // Inlier weight of each column from the unweighted kernel mass.
        let inlier = inlier_weight(kernel.sum_dim(0), outlier);

        let spatial = model_mul.clone() * dist.clone().div_scalar(-two_sigma2).exp();

        let term = spatial.clone() * features.likelihood(cols);
        let norm = term.clone().sum_dim(0).add_scalar(COLUMN_EPS);
        blocks.push(term / norm * inlier.clone());

        let norm = spatial.clone().sum_dim(0).add_scalar(COLUMN_EPS);
        let sigma2_p = spatial / norm * inlier;
        sigma2_raw += scalar(sigma2_p.clone() * dist);
        k_na_sigma2 = k_na_sigma2 + sigma2_p.sum_dim(1);
    }

    let p = Tensor::cat(blocks, 1);
    let k_na = p.clone().sum_dim(1).squeeze::<1>(1);
    let k_nb = p.clone().sum_dim(0).squeeze::<1>(0);
    let sp = scalar(p.clone());
    let k_na_spatial = k_na_spatial.squeeze::<1>(1);
    let k_na_sigma2 = k_na_sigma2.squeeze::<1>(1);
    let sp_spatial = scalar(k_na_spatial.clone());
    let sp_sigma2 = scalar(k_na_sigma2.clone());

    Assignment {
        p,
        k_na,
        k_nb,
        sp,
        k_na_spatial,
        sp_spatial,
        k_na_sigma2,
        sp_sigma2,
        sigma2_related: sigma2_raw / (dim as f64 * sp_sigma2),
    }
}

/// `1 - outlier / (outlier + mass)` per column.
fn inlier_weight<B: Backend>(mass: Tensor<B, 2>, outlier: f64) -> Tensor<B, 2> {
    let total = mass.add_scalar(outlier);
    total.clone().sub_scalar(outlier) / total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeatureLayerConfig;
    use crate::preprocess::LayerData;
    use burn_ndarray::NdArray;
    use nalgebra::DMatrix;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;
    use spareg_core::backend::{from_matrix, to_matrix, to_values};

    type TestBackend = NdArray<f32>;

    struct Fixture {
        aligned: Tensor<TestBackend, 2>,
        reference: Tensor<TestBackend, 2>,
        features: FeatureModel<TestBackend>,
        params: AssignmentParams<TestBackend>,
    }

    fn fixture(n: usize, m: usize) -> Fixture {
        let device = Default::default();
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let a = DMatrix::from_fn(n, 2, |_, _| rng.gen_range(-1.0..1.0));
        let b = DMatrix::from_fn(m, 2, |_, _| rng.gen_range(-1.0..1.0));
        let ga = DMatrix::from_fn(n, 6, |_, _| rng.gen_range(0.0..5.0));
        let gb = DMatrix::from_fn(m, 6, |_, _| rng.gen_range(0.0..5.0));
        let layer = LayerData {
            config: FeatureLayerConfig::layer("X").with_bandwidth(0.5),
            moving: ga,
            reference: gb,
            transfer: None,
        };
        let features = FeatureModel::new(&[layer], n, m, &mut rng, &device);
        Fixture {
            aligned: from_matrix(&a, &device),
            reference: from_matrix(&b, &device),
            features,
            params: AssignmentParams {
                sigma2: 0.1,
                gamma: 0.5,
                outlier_variance: 1.0,
                alpha: Tensor::ones([n], &device),
                sigma_diag: Tensor::zeros([n], &device),
                volume: 4.0,
            },
        }
    }

    #[test]
    fn test_chunk_size_bounds() {
        assert_eq!(chunk_size(1.0, 1000, 500), 500);
        assert_eq!(chunk_size(1e-6, 1000, 500), 1);
        assert_eq!(chunk_size(1e-5, 100, 500), 10);
    }

    #[test]
    fn test_assignment_is_nonnegative_and_bounded() {
        let f = fixture(30, 20);
        let columns: Vec<usize> = (0..20).collect();
        let a = compute_assignment(&f.aligned, &f.reference, &columns, &f.features, &f.params, 20);

        assert_eq!(a.p.dims(), [30, 20]);
        let p = to_matrix(a.p.clone());
        assert!(p.iter().all(|&v| v >= 0.0));
        for j in 0..20 {
            assert!(p.column(j).sum() <= 1.0 + 1e-5);
        }
        assert!((a.sp - p.sum()).abs() < 1e-3);
        assert!(a.sp_spatial > 0.0 && a.sp_spatial <= 20.0 + 1e-4);
        assert!(a.sigma2_related > 0.0);
        assert_eq!(to_values(a.k_nb.clone()).len(), 20);
    }

    #[test]
    fn test_chunked_matches_single_pass() {
        let f = fixture(25, 17);
        let columns: Vec<usize> = (0..17).rev().collect();
        let full = compute_assignment(&f.aligned, &f.reference, &columns, &f.features, &f.params, 17);
        let chunked = compute_assignment(&f.aligned, &f.reference, &columns, &f.features, &f.params, 4);

        let diff = (to_matrix(full.p.clone()) - to_matrix(chunked.p.clone())).abs().max();
        assert!(diff < 1e-6);
        assert!((full.sp - chunked.sp).abs() < 1e-4);
        assert!((full.sp_spatial - chunked.sp_spatial).abs() < 1e-4);
        assert!((full.sp_sigma2 - chunked.sp_sigma2).abs() < 1e-4);
        assert!((full.sigma2_related - chunked.sigma2_related).abs() < 1e-5);
        let k_full = to_values(full.k_na_sigma2);
        let k_chunk = to_values(chunked.k_na_sigma2);
        for (x, y) in k_full.iter().zip(&k_chunk) {
            assert!((x - y).abs() < 1e-5);
        }
    }

    #[test]
    fn test_far_reference_points_are_outliers() {
        let mut f = fixture(10, 5);
        // Move the reference batch far away from every moving point.
        f.reference = f.reference.add_scalar(50.0);
        let columns: Vec<usize> = (0..5).collect();
        let a = compute_assignment(&f.aligned, &f.reference, &columns, &f.features, &f.params, 5);
        assert!(a.sp < 1e-6);
        assert!(a.sp_spatial < 1e-6);
    }

    #[test]
    fn test_inlier_weight_ignores_mixture_weights() {
        let device = Default::default();
        let n = 2;
        let aligned = Tensor::<TestBackend, 2>::from_floats([[0.0, 0.0], [1.0, 0.0]], &device);
        let reference = Tensor::<TestBackend, 2>::from_floats([[0.0, 0.0]], &device);
        let layer = LayerData {
            config: FeatureLayerConfig::embedding("e").with_bandwidth(1.0),
            moving: DMatrix::zeros(n, 1),
            reference: DMatrix::zeros(1, 1),
            transfer: None,
        };
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let features = FeatureModel::new(&[layer], n, 1, &mut rng, &device);
        let (sigma2, gamma, volume) = (0.5, 0.8, 4.0);
        let params = AssignmentParams {
            sigma2,
            gamma,
            outlier_variance: 1.0,
            alpha: Tensor::from_floats([0.5, 0.5], &device),
            sigma_diag: Tensor::zeros([n], &device),
            volume,
        };
        let a = compute_assignment(&aligned, &reference, &[0], &features, &params, 1);

        // Kernel column: exp(0) + exp(-1 / (2 sigma2)).
        let mass = 1.0 + (-1.0f64).exp();
        let outlier = 2.0 * std::f64::consts::PI * sigma2 * (1.0 - gamma) / (gamma * volume * n as f64);
        let inlier = 1.0 - outlier / (outlier + mass);
        // P columns are normalized to the inlier weight.
        assert!((a.sp - inlier).abs() < 1e-5);

        // The spatial marginal still carries alpha.
        let spatial = 0.5 * mass / (0.5 * mass + outlier);
        assert!((a.sp_spatial - spatial).abs() < 1e-5);
    }
}
