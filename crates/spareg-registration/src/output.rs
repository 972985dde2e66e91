//! Alignment results and the reusable transform record.

use burn::tensor::backend::Backend;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use spareg_core::backend::{from_matrix, from_values, to_matrix, CpuBackend};
use spareg_core::transform::{
    ChainedTransform, DeformedRigidTransform, KernelDeformation, RigidTransform, ScaleShiftTransform, Transform,
};
use spareg_core::NormalizationParams;
use tracing::info;

use crate::coarse::CoarseAlignment;
use crate::config::{AlignmentConfig, Dissimilarity};
use crate::engine::{updates::bounding_volume, EngineOutput};
use crate::error::{RegistrationError, Result};
use crate::preprocess::PreparedInput;

/// Aligned coordinates after one iteration, in the reference frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: usize,
    pub aligned: DMatrix<f64>,
    pub sigma2: f64,
}

/// Everything needed to map new moving-frame points into the reference
/// frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformRecord {
    pub rotation: DMatrix<f64>,
    pub translation: Vec<f64>,
    pub optimal_rotation: DMatrix<f64>,
    pub optimal_translation: Vec<f64>,
    pub init_rotation: DMatrix<f64>,
    pub init_translation: Vec<f64>,
    /// Moving coordinates are mirrored along their last axis before the
    /// rotation applies.
    pub reflection: bool,
    pub beta: f64,
    /// Deformation coefficients `[K, D]`.
    pub coefficients: DMatrix<f64>,
    pub inducing_points: DMatrix<f64>,
    pub moving_normalization: NormalizationParams,
    pub reference_normalization: NormalizationParams,
    /// Scale applied to the deformed coordinates before denormalization.
    pub keep_size_factor: f64,
    pub sigma2: f64,
    pub gamma: f64,
    pub outlier_variance: f64,
    pub dissimilarities: Vec<Dissimilarity>,
    pub n_moving: usize,
}

/// Result of one alignment run.
#[derive(Debug, Clone)]
pub struct AlignmentResult {
    /// Rigid plus non-rigid alignment of the moving points `[N, D]`.
    pub aligned: DMatrix<f64>,
    /// Moving points under the optimal rigid transform `[N, D]`.
    pub rigid_aligned: DMatrix<f64>,
    /// Rigid component of `aligned`, without the deformation `[N, D]`.
    pub rigid_component: DMatrix<f64>,
    /// Final assignment, one row per reference point `[M, N]`.
    pub assignment: DMatrix<f64>,
    pub sigma2: f64,
    pub gamma: f64,
    pub record: TransformRecord,
    pub iterations: Vec<IterationRecord>,
}

impl TransformRecord {
    pub fn dim(&self) -> usize {
        self.rotation.nrows()
    }

    fn check_dim(&self, points: &DMatrix<f64>) -> Result<()> {
        if points.ncols() != self.dim() {
            return Err(RegistrationError::dimension_mismatch(format!(
                "transform is {}-dimensional but points have {} columns",
                self.dim(),
                points.ncols()
            )));
        }
        Ok(())
    }

    /// Normalize with the moving parameters and mirror if needed.
    fn base_frame<B: Backend>(&self, device: &B::Device) -> ChainedTransform<B, ScaleShiftTransform<B>, RigidTransform<B>> {
        let dim = self.dim();
        let mut orientation = DMatrix::identity(dim, dim);
        if self.reflection {
            orientation[(dim - 1, dim - 1)] = -1.0;
        }
        ChainedTransform::new(
            ScaleShiftTransform::normalizing(&self.moving_normalization, device),
            RigidTransform::from_host(&orientation, &vec![0.0; dim], device),
        )
    }

    /// Keep-size rescale followed by denormalization into the reference
    /// frame.
    fn output_frame<B: Backend>(&self, keep_size: bool, device: &B::Device) -> ScaleShiftTransform<B> {
        let factor = if keep_size { self.keep_size_factor } else { 1.0 };
        ScaleShiftTransform::new(
            self.reference_normalization.scale * factor,
            from_values(&self.reference_normalization.mean, device),
        )
    }

    /// Full rigid-plus-deformation transform on any backend.
    pub fn to_transform<B: Backend>(&self, device: &B::Device) -> impl Transform<B> {
        let deformed = DeformedRigidTransform::new(
            RigidTransform::from_host(&self.rotation, &self.translation, device),
            KernelDeformation::new(
                from_matrix(&self.inducing_points, device),
                from_matrix(&self.coefficients, device),
                self.beta,
            ),
        );
        ChainedTransform::new(
            self.base_frame(device),
            ChainedTransform::new(deformed, self.output_frame(true, device)),
        )
    }

    /// Optimal rigid transform on any backend.
    pub fn to_rigid_transform<B: Backend>(&self, device: &B::Device) -> impl Transform<B> {
        ChainedTransform::new(
            self.base_frame(device),
            ChainedTransform::new(
                RigidTransform::from_host(&self.optimal_rotation, &self.optimal_translation, device),
                self.output_frame(false, device),
            ),
        )
    }

    /// Map moving-frame points into the reference frame with the full
    /// transform.
    pub fn apply(&self, points: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        self.check_dim(points)?;
        let device = Default::default();
        let x = from_matrix::<CpuBackend>(points, &device);
        Ok(to_matrix(self.to_transform::<CpuBackend>(&device).transform_points(x)))
    }

    /// Map moving-frame points into the reference frame with the optimal
    /// rigid transform only.
    pub fn apply_rigid(&self, points: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        self.check_dim(points)?;
        let device = Default::default();
        let x = from_matrix::<CpuBackend>(points, &device);
        Ok(to_matrix(self.to_rigid_transform::<CpuBackend>(&device).transform_points(x)))
    }

    /// Optimal rigid transform as an affine map `y = A x + b` between the
    /// original moving and reference frames.
    pub fn rigid_affine(&self) -> (DMatrix<f64>, Vec<f64>) {
        let dim = self.dim();
        let mut linear = self.optimal_rotation.clone();
        if self.reflection {
            linear.column_mut(dim - 1).neg_mut();
        }
        let ratio = self.reference_normalization.scale / self.moving_normalization.scale;
        let a = &linear * ratio;
        let moving_mean = nalgebra::DVector::from_column_slice(&self.moving_normalization.mean);
        let b: Vec<f64> = (0..dim)
            .map(|i| {
                self.reference_normalization.scale * self.optimal_translation[i] + self.reference_normalization.mean[i]
                    - (a.row(i) * &moving_mean)[(0, 0)]
            })
            .collect();
        (a, b)
    }
}

/// Keep-size factor: the D-th root of the bounding-box volume ratio between
/// the moving points before and after alignment.
fn keep_size_factor(before: &DMatrix<f64>, after: &DMatrix<f64>) -> f64 {
    let dim = before.ncols() as f64;
    let v_before = bounding_volume(before, before);
    let v_after = bounding_volume(after, after);
    if v_before > 0.0 && v_after > 0.0 {
        (v_before / v_after).powf(1.0 / dim)
    } else {
        1.0
    }
}

/// Denormalize engine output into the reference frame and build the record.
pub fn assemble<B: Backend>(
    engine: EngineOutput<B>,
    prepared: &PreparedInput,
    coarse: Option<&CoarseAlignment>,
    config: &AlignmentConfig,
) -> AlignmentResult {
    let dim = prepared.dim;
    let reference_params = &prepared.reference_params;
    let state = &engine.state;

    let aligned_norm = to_matrix(state.aligned.clone());
    let factor = if config.keep_size {
        keep_size_factor(&prepared.moving_coords, &aligned_norm)
    } else {
        1.0
    };
    let aligned = reference_params.denormalize(&(aligned_norm * factor));
    let rigid_component = reference_params.denormalize(&to_matrix(state.rigid.clone()));
    let rigid_aligned = reference_params.denormalize(&to_matrix(engine.optimal_rigid.clone()));

    let (init_rotation, init_translation) = match coarse {
        Some(c) => (c.rotation.clone(), c.translation.clone()),
        None => (DMatrix::identity(dim, dim), vec![0.0; dim]),
    };

    let record = TransformRecord {
        rotation: state.rotation.clone(),
        translation: state.translation.clone(),
        optimal_rotation: engine.optimal_rotation.clone(),
        optimal_translation: engine.optimal_translation.clone(),
        init_rotation,
        init_translation,
        reflection: engine.reflected,
        beta: config.beta,
        coefficients: to_matrix(state.coefficients.clone()),
        inducing_points: engine.inducing.host().clone(),
        moving_normalization: prepared.moving_params.clone(),
        reference_normalization: reference_params.clone(),
        keep_size_factor: factor,
        sigma2: state.sigma2,
        gamma: state.gamma,
        outlier_variance: state.outlier_variance,
        dissimilarities: config.layers.iter().map(|l| l.dissimilarity).collect(),
        n_moving: prepared.moving_coords.nrows(),
    };

    let iterations = engine
        .snapshots
        .iter()
        .map(|s| IterationRecord {
            iteration: s.iteration,
            aligned: reference_params.denormalize(&s.aligned),
            sigma2: s.sigma2,
        })
        .collect();

    info!(
        sigma2 = state.sigma2,
        gamma = state.gamma,
        keep_size_factor = factor,
        reflection = engine.reflected,
        "alignment assembled"
    );

    AlignmentResult {
        aligned,
        rigid_aligned,
        rigid_component,
        assignment: to_matrix(engine.assignment.p.clone()).transpose(),
        sigma2: state.sigma2,
        gamma: state.gamma,
        record,
        iterations,
    }
}
