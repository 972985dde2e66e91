//! Zero-centering and isotropic scaling of coordinate matrices.

use nalgebra::{DMatrix, RowDVector};
use serde::{Deserialize, Serialize};

/// Per-set normalization: `x' = (x - mean) / scale`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationParams {
    pub mean: Vec<f64>,
    pub scale: f64,
}

impl NormalizationParams {
    /// No-op normalization in `dim` dimensions.
    pub fn identity(dim: usize) -> Self {
        Self {
            mean: vec![0.0; dim],
            scale: 1.0,
        }
    }

    /// Fit parameters for a moving/reference pair.
    ///
    /// Each set is centered on its own mean unless `separate_mean` is false,
    /// in which case both use the average of the two means. Each set's scale
    /// is its root-mean-square radius after centering; unless `separate_scale`
    /// is set, both sets share the average of the two.
    pub fn fit_pair(
        a: &DMatrix<f64>,
        b: &DMatrix<f64>,
        separate_mean: bool,
        separate_scale: bool,
    ) -> (Self, Self) {
        let mut mean_a = column_mean(a);
        let mut mean_b = column_mean(b);
        if !separate_mean {
            let shared: Vec<f64> = mean_a.iter().zip(&mean_b).map(|(x, y)| 0.5 * (x + y)).collect();
            mean_a = shared.clone();
            mean_b = shared;
        }

        let mut scale_a = rms_radius(a, &mean_a);
        let mut scale_b = rms_radius(b, &mean_b);
        if !separate_scale {
            let shared = 0.5 * (scale_a + scale_b);
            scale_a = shared;
            scale_b = shared;
        }

        (
            Self {
                mean: mean_a,
                scale: sanitize_scale(scale_a),
            },
            Self {
                mean: mean_b,
                scale: sanitize_scale(scale_b),
            },
        )
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    /// Map coordinates into the normalized frame.
    pub fn normalize(&self, coords: &DMatrix<f64>) -> DMatrix<f64> {
        let mean = RowDVector::from_row_slice(&self.mean);
        let mut out = coords.clone();
        for mut row in out.row_iter_mut() {
            row -= &mean;
            row /= self.scale;
        }
        out
    }

    /// Map normalized coordinates back into this set's original frame.
    pub fn denormalize(&self, coords: &DMatrix<f64>) -> DMatrix<f64> {
        let mean = RowDVector::from_row_slice(&self.mean);
        let mut out = coords * self.scale;
        for mut row in out.row_iter_mut() {
            row += &mean;
        }
        out
    }
}

fn column_mean(m: &DMatrix<f64>) -> Vec<f64> {
    let n = m.nrows().max(1) as f64;
    m.column_iter().map(|c| c.sum() / n).collect()
}

fn rms_radius(m: &DMatrix<f64>, mean: &[f64]) -> f64 {
    let n = m.nrows().max(1) as f64;
    let total: f64 = m
        .row_iter()
        .map(|row| {
            row.iter()
                .zip(mean)
                .map(|(x, mu)| (x - mu) * (x - mu))
                .sum::<f64>()
        })
        .sum();
    (total / n).sqrt()
}

fn sanitize_scale(scale: f64) -> f64 {
    if scale.is_finite() && scale > 0.0 {
        scale
    } else {
        tracing::warn!(scale, "degenerate coordinate scale, falling back to 1");
        1.0
    }
}
