//! Mutable state of the variational loop.
//!
//! Every field is written by exactly one update step:
//!
//! | field                                     | written by         |
//! |-------------------------------------------|--------------------|
//! | `gamma`                                   | gamma update       |
//! | `alpha`                                   | alpha update       |
//! | `coefficients`, `displacement`, `sigma_diag`, `sigma_inv`, `pxb_term` | non-rigid update |
//! | `rotation`, `translation`, `rigid`        | rigid update       |
//! | `aligned`                                 | recomposition      |
//! | `sigma2`                                  | sigma2 update      |
//! | `outlier_variance`                        | annealing          |
//! | `phase`                                   | non-rigid latch    |

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use nalgebra::DMatrix;
use spareg_core::backend::from_matrix;
use spareg_core::transform::{RigidTransform, Transform};

use crate::config::GuidanceEffect;

/// Below this sigma2 the deformation field is switched on.
pub const NONRIGID_SIGMA2: f64 = 0.015;
/// After this iteration the deformation field is switched on regardless.
pub const NONRIGID_ITERATION: usize = 80;

/// One-way latch between rigid-only and rigid-plus-deformation updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeformationPhase {
    #[default]
    RigidOnly,
    RigidPlusNonrigid,
}

impl DeformationPhase {
    pub fn is_nonrigid(self) -> bool {
        matches!(self, Self::RigidPlusNonrigid)
    }

    /// Phase for the current iteration. Once non-rigid, always non-rigid.
    pub fn advance(self, sigma2: f64, iteration: usize) -> Self {
        match self {
            Self::RigidPlusNonrigid => self,
            Self::RigidOnly if sigma2 < NONRIGID_SIGMA2 || iteration > NONRIGID_ITERATION => {
                Self::RigidPlusNonrigid
            }
            Self::RigidOnly => self,
        }
    }
}

impl std::fmt::Display for DeformationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RigidOnly => write!(f, "rigid"),
            Self::RigidPlusNonrigid => write!(f, "rigid+nonrigid"),
        }
    }
}

/// User correspondence pairs on the device.
#[derive(Debug, Clone)]
pub struct GuidanceState<B: Backend> {
    /// Moving side in its base (untransformed) frame `[P, D]`.
    pub moving: Tensor<B, 2>,
    pub reference: Tensor<B, 2>,
    /// Kernel between the moving side and the inducing points `[P, K]`.
    pub kernel: Tensor<B, 2>,
    /// Rigidly transformed moving side.
    pub rigid: Tensor<B, 2>,
    /// Displacement of the moving side.
    pub displacement: Tensor<B, 2>,
    pub effect: GuidanceEffect,
    pub epsilon: f64,
    pub n_pairs: usize,
}

impl<B: Backend> GuidanceState<B> {
    /// Pair-term weight `sigma2 / epsilon`.
    pub fn weight(&self, sigma2: f64) -> f64 {
        sigma2 / self.epsilon
    }
}

/// Confident coarse correspondences used as a rigid anchor, kept on the
/// host.
#[derive(Debug, Clone)]
pub struct AnchorSet {
    /// Moving side in its base frame `[Q, D]`.
    pub moving: DMatrix<f64>,
    pub reference: DMatrix<f64>,
    pub weight: Vec<f64>,
    pub lambda: f64,
}

impl AnchorSet {
    pub fn len(&self) -> usize {
        self.weight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weight.is_empty()
    }

    pub fn total_weight(&self) -> f64 {
        self.weight.iter().sum()
    }

    /// Anchor-term weight `sigma2 / lambda_reg`.
    pub fn scale(&self, sigma2: f64) -> f64 {
        sigma2 / self.lambda
    }
}

#[derive(Debug, Clone)]
pub struct VariationalState<B: Backend> {
    pub sigma2: f64,
    pub gamma: f64,
    /// Per-point mixture weight `[N]`.
    pub alpha: Tensor<B, 1>,
    pub kappa: f64,
    pub outlier_variance: f64,

    pub rotation: DMatrix<f64>,
    pub translation: Vec<f64>,

    /// Deformation coefficients `[K, D]`.
    pub coefficients: Tensor<B, 2>,
    /// `VnA`, displacement of every moving point `[N, D]`.
    pub displacement: Tensor<B, 2>,
    /// `RnA`, rigidly transformed moving points `[N, D]`.
    pub rigid: Tensor<B, 2>,
    /// `XAHat`, rigid plus displacement `[N, D]`.
    pub aligned: Tensor<B, 2>,
    /// Posterior variance of the displacement per point `[N]`.
    pub sigma_diag: Tensor<B, 1>,

    pub phase: DeformationPhase,
    /// Accumulated precision `[K, K]` of the coefficient posterior.
    pub sigma_inv: Tensor<B, 2>,
    /// Accumulated `P·X_B − diag(K_NA)·RnA` `[N, D]`.
    pub pxb_term: Tensor<B, 2>,
    pub step_size: f64,
}

impl<B: Backend> VariationalState<B> {
    /// Initial state: unit mixture weights, zero displacement, and the given
    /// rigid transform applied to `moving`.
    pub fn new(
        moving: &Tensor<B, 2>,
        rotation: DMatrix<f64>,
        translation: Vec<f64>,
        sigma2: f64,
        n_inducing: usize,
    ) -> Self {
        let device = moving.device();
        let [n, dim] = moving.dims();
        let rigid = RigidTransform::from_host(&rotation, &translation, &device).transform_points(moving.clone());
        Self {
            sigma2,
            gamma: 0.5,
            alpha: Tensor::ones([n], &device),
            kappa: 1.0,
            outlier_variance: 1.0,
            rotation,
            translation,
            coefficients: Tensor::zeros([n_inducing, dim], &device),
            displacement: Tensor::zeros([n, dim], &device),
            aligned: rigid.clone(),
            rigid,
            sigma_diag: Tensor::zeros([n], &device),
            phase: DeformationPhase::RigidOnly,
            sigma_inv: Tensor::zeros([n_inducing, n_inducing], &device),
            pxb_term: Tensor::zeros([n, dim], &device),
            step_size: 1.0,
        }
    }

    pub fn dim(&self) -> usize {
        self.rotation.nrows()
    }

    /// Current rigid transform on the device.
    pub fn rigid_transform(&self) -> RigidTransform<B> {
        RigidTransform::from_host(&self.rotation, &self.translation, &self.aligned.device())
    }

    /// `XAHat = RnA + VnA`.
    pub fn recompose(&mut self) {
        self.aligned = self.rigid.clone() + self.displacement.clone();
    }
}

/// Upload host correspondences and evaluate their kernel rows.
pub fn guidance_state<B: Backend>(
    moving: &DMatrix<f64>,
    reference: &DMatrix<f64>,
    effect: GuidanceEffect,
    epsilon: f64,
    kernel: Tensor<B, 2>,
    state: &VariationalState<B>,
) -> GuidanceState<B> {
    let device = state.aligned.device();
    let moving_t = from_matrix::<B>(moving, &device);
    let rigid = state.rigid_transform().transform_points(moving_t.clone());
    let displacement = rigid.zeros_like();
    GuidanceState {
        moving: moving_t,
        reference: from_matrix(reference, &device),
        kernel,
        rigid,
        displacement,
        effect,
        epsilon,
        n_pairs: moving.nrows(),
    }
}
