//! Feature likelihood models.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use nalgebra::DMatrix;

use crate::config::ProbabilityModel;

/// Fallback Gaussian bandwidth when the data give no usable estimate.
pub const DEFAULT_BANDWIDTH: f64 = 1.0;

/// Turn a dissimilarity block into match weights.
pub fn likelihood<B: Backend>(model: ProbabilityModel, dissimilarity: Tensor<B, 2>, bandwidth: f64) -> Tensor<B, 2> {
    match model {
        ProbabilityModel::Gauss => dissimilarity.div_scalar(-2.0 * bandwidth).exp(),
        ProbabilityModel::Cosine => dissimilarity.neg().add_scalar(1.0).clamp_min(0.0),
        ProbabilityModel::Label => dissimilarity,
    }
}

/// Gaussian bandwidth from a (subsampled) dissimilarity matrix.
///
/// Takes the 5th percentile of the per-row minimum dissimilarity divided by
/// 5, floored at 1% of the mean dissimilarity.
pub fn estimate_bandwidth(dissimilarity: &DMatrix<f64>) -> f64 {
    if dissimilarity.is_empty() {
        return DEFAULT_BANDWIDTH;
    }
    let mut row_min: Vec<f64> = dissimilarity.row_iter().map(|r| r.min()).collect();
    row_min.sort_by(|a, b| a.total_cmp(b));
    let idx = ((row_min.len() as f64 * 0.05) as usize).min(row_min.len() - 1);
    let estimate = row_min[idx] / 5.0;
    let floor = 0.01 * dissimilarity.mean();

    let bandwidth = estimate.max(floor);
    if bandwidth.is_finite() && bandwidth > 0.0 {
        bandwidth
    } else {
        DEFAULT_BANDWIDTH
    }
}
