//! Rigid transform implementation.
//!
//! This module provides a rigid transform (rotation + translation).

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use nalgebra::DMatrix;

use super::trait_::{map_chunked, Transform};
use super::CHUNK_SIZE;
use crate::backend::bridge::{from_matrix, from_values, to_matrix, to_values};

/// Rigid Transform (Rotation + Translation).
///
/// `T(x) = R x + t`, applied to row vectors as `y = x Rᵀ + t`.
/// `R` is expected to be a proper rotation (orthogonal, det = +1).
#[derive(Debug, Clone)]
pub struct RigidTransform<B: Backend> {
    rotation: Tensor<B, 2>,    // [D, D]
    translation: Tensor<B, 1>, // [D]
}

impl<B: Backend> RigidTransform<B> {
    /// Create a new rigid transform.
    ///
    /// # Arguments
    /// * `rotation` - Tensor of shape `[D, D]`
    /// * `translation` - Tensor of shape `[D]`
    pub fn new(rotation: Tensor<B, 2>, translation: Tensor<B, 1>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// Identity transform in `dim` dimensions.
    pub fn identity(dim: usize, device: &B::Device) -> Self {
        Self::new(Tensor::eye(dim, device), Tensor::zeros([dim], device))
    }

    /// Build from host-side parameters.
    pub fn from_host(rotation: &DMatrix<f64>, translation: &[f64], device: &B::Device) -> Self {
        Self::new(from_matrix(rotation, device), from_values(translation, device))
    }

    pub fn rotation(&self) -> Tensor<B, 2> {
        self.rotation.clone()
    }

    pub fn translation(&self) -> Tensor<B, 1> {
        self.translation.clone()
    }

    /// Rotation copied to the host.
    pub fn rotation_matrix(&self) -> DMatrix<f64> {
        to_matrix(self.rotation.clone())
    }

    /// Translation copied to the host.
    pub fn translation_vector(&self) -> Vec<f64> {
        to_values(self.translation.clone())
    }
}

impl<B: Backend> Transform<B> for RigidTransform<B> {
    fn dim(&self) -> usize {
        self.translation.dims()[0]
    }

    fn transform_points(&self, points: Tensor<B, 2>) -> Tensor<B, 2> {
        let dim = self.dim();
        let r_t = self.rotation.clone().transpose();
        let t = self.translation.clone().reshape([1, dim]);

        map_chunked(points, CHUNK_SIZE, |chunk| chunk.matmul(r_t.clone()) + t.clone())
    }
}
