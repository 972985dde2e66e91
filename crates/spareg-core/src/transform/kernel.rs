//! Kernel-based non-rigid deformation over inducing points.
//!
//! The displacement of a point `x` is `v(x) = Σ_k k(x, z_k) c_k` where the
//! `z_k` are K inducing points sampled from the moving set and `k` is the
//! squared-exponential kernel `k(x, y) = exp(-β‖x - y‖²)`.

use std::collections::HashSet;

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use nalgebra::DMatrix;
use rand::Rng;

use super::rigid::RigidTransform;
use super::trait_::{map_chunked, Transform};
use super::CHUNK_SIZE;
use crate::backend::bridge::from_matrix;
use crate::backend::ops::squared_distances;

/// Squared-exponential kernel matrix `[N, M]` between rows of `x` and `y`.
pub fn se_kernel<B: Backend>(x: Tensor<B, 2>, y: Tensor<B, 2>, beta: f64) -> Tensor<B, 2> {
    squared_distances(x, y).mul_scalar(-beta).exp()
}

/// Control points of the deformation field and their Gram matrix.
#[derive(Debug, Clone)]
pub struct InducingPoints<B: Backend> {
    points: Tensor<B, 2>, // [K, D]
    gram: Tensor<B, 2>,   // [K, K]
    host: DMatrix<f64>,
    beta: f64,
}

impl<B: Backend> InducingPoints<B> {
    /// Sample `k` inducing points without replacement from the unique rows of
    /// `coords`. Fewer are returned when there are not enough unique rows.
    pub fn sample<R: Rng + ?Sized>(
        coords: &DMatrix<f64>,
        k: usize,
        beta: f64,
        rng: &mut R,
        device: &B::Device,
    ) -> Self {
        let unique = unique_rows(coords);
        let k = k.min(unique.len());
        let picked: Vec<usize> = rand::seq::index::sample(rng, unique.len(), k)
            .into_iter()
            .map(|i| unique[i])
            .collect();
        let host = coords.select_rows(picked.iter());
        Self::from_host(host, beta, device)
    }

    /// Use the given rows as inducing points.
    pub fn from_host(host: DMatrix<f64>, beta: f64, device: &B::Device) -> Self {
        let points = from_matrix::<B>(&host, device);
        let gram = se_kernel(points.clone(), points.clone(), beta);
        Self {
            points,
            gram,
            host,
            beta,
        }
    }

    /// Number of inducing points K.
    pub fn len(&self) -> usize {
        self.host.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.host.nrows() == 0
    }

    pub fn points(&self) -> Tensor<B, 2> {
        self.points.clone()
    }

    /// Gram matrix `[K, K]` among the inducing points.
    pub fn gram(&self) -> Tensor<B, 2> {
        self.gram.clone()
    }

    /// Inducing points copied to the host.
    pub fn host(&self) -> &DMatrix<f64> {
        &self.host
    }

    pub fn beta(&self) -> f64 {
        self.beta
    }

    /// Cross-kernel `[N, K]` between `x` and the inducing points.
    pub fn cross_kernel(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        se_kernel(x, self.points.clone(), self.beta)
    }
}

/// Indices of the first occurrence of every distinct row.
fn unique_rows(coords: &DMatrix<f64>) -> Vec<usize> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for (i, row) in coords.row_iter().enumerate() {
        let key: Vec<u64> = row.iter().map(|v| v.to_bits()).collect();
        if seen.insert(key) {
            out.push(i);
        }
    }
    out
}

/// Displacement field `v(x) = k(x, Z) · C`.
#[derive(Debug, Clone)]
pub struct KernelDeformation<B: Backend> {
    inducing: Tensor<B, 2>,     // [K, D]
    coefficients: Tensor<B, 2>, // [K, D]
    beta: f64,
}

impl<B: Backend> KernelDeformation<B> {
    pub fn new(inducing: Tensor<B, 2>, coefficients: Tensor<B, 2>, beta: f64) -> Self {
        Self {
            inducing,
            coefficients,
            beta,
        }
    }

    pub fn coefficients(&self) -> Tensor<B, 2> {
        self.coefficients.clone()
    }

    /// Displacement `[N, D]` at each row of `points`.
    pub fn displacement(&self, points: Tensor<B, 2>) -> Tensor<B, 2> {
        let z = self.inducing.clone();
        let c = self.coefficients.clone();
        let beta = self.beta;
        map_chunked(points, CHUNK_SIZE, |chunk| {
            se_kernel(chunk, z.clone(), beta).matmul(c.clone())
        })
    }
}

/// Rigid motion plus a displacement evaluated at the undeformed position:
/// `T(x) = R x + t + v(x)`.
#[derive(Debug, Clone)]
pub struct DeformedRigidTransform<B: Backend> {
    pub rigid: RigidTransform<B>,
    pub deformation: KernelDeformation<B>,
}

impl<B: Backend> DeformedRigidTransform<B> {
    pub fn new(rigid: RigidTransform<B>, deformation: KernelDeformation<B>) -> Self {
        Self { rigid, deformation }
    }
}

impl<B: Backend> Transform<B> for DeformedRigidTransform<B> {
    fn dim(&self) -> usize {
        self.rigid.dim()
    }

    fn transform_points(&self, points: Tensor<B, 2>) -> Tensor<B, 2> {
        self.rigid.transform_points(points.clone()) + self.deformation.displacement(points)
    }
}
