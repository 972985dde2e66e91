//! Isotropic scale-and-shift transform.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use super::trait_::Transform;
use crate::backend::bridge::from_values;
use crate::normalization::NormalizationParams;

/// `T(x) = s · x + o` with a scalar scale `s` and offset vector `o`.
///
/// Covers coordinate normalization, its inverse, and the bounding-box
/// preserving rescale applied to aligned output.
#[derive(Debug, Clone)]
pub struct ScaleShiftTransform<B: Backend> {
    scale: f64,
    offset: Tensor<B, 1>, // [D]
}

impl<B: Backend> ScaleShiftTransform<B> {
    pub fn new(scale: f64, offset: Tensor<B, 1>) -> Self {
        Self { scale, offset }
    }

    /// Pure scaling about the origin.
    pub fn scaling(scale: f64, dim: usize, device: &B::Device) -> Self {
        Self::new(scale, Tensor::zeros([dim], device))
    }

    /// Forward normalization `(x - mean) / scale`.
    pub fn normalizing(params: &NormalizationParams, device: &B::Device) -> Self {
        let inv = 1.0 / params.scale;
        let offset: Vec<f64> = params.mean.iter().map(|m| -m * inv).collect();
        Self::new(inv, from_values(&offset, device))
    }

    /// Inverse normalization `x · scale + mean`.
    pub fn denormalizing(params: &NormalizationParams, device: &B::Device) -> Self {
        Self::new(params.scale, from_values(&params.mean, device))
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }
}

impl<B: Backend> Transform<B> for ScaleShiftTransform<B> {
    fn dim(&self) -> usize {
        self.offset.dims()[0]
    }

    fn transform_points(&self, points: Tensor<B, 2>) -> Tensor<B, 2> {
        let o = self.offset.clone().reshape([1, self.dim()]);
        points.mul_scalar(self.scale) + o
    }
}
