//! Variational registration engine.
//!
//! Alternates an assignment step with closed-form updates of the inlier
//! fraction, per-point mixture weights, the kernel deformation, the rigid
//! transform and the spatial variance, optionally on stochastic batches of
//! the reference set. The loop runs a fixed number of iterations.

pub mod assignment;
pub mod schedule;
pub mod state;
pub mod updates;

pub use assignment::{chunk_size, compute_assignment, Assignment, AssignmentParams};
pub use schedule::{BatchSampler, OutlierVarianceSchedule, StepSchedule};
pub use state::{AnchorSet, DeformationPhase, GuidanceState, VariationalState};
pub use updates::KernelBasis;

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use nalgebra::DMatrix;
use rand::Rng;
use spareg_core::backend::{from_matrix, index_tensor, to_matrix};
use spareg_core::transform::{InducingPoints, RigidTransform, Transform};
use tracing::{debug, info};

use crate::coarse::CoarseAlignment;
use crate::config::AlignmentConfig;
use crate::error::Result;
use crate::metric::FeatureModel;
use crate::preprocess::PreparedInput;
use crate::progress::{IterationStats, ProgressTracker};
use crate::validation::{check_scalar, check_tensor};

/// Aligned coordinates and variance after one iteration, in the normalized
/// frame.
#[derive(Debug, Clone)]
pub struct IterationSnapshot {
    pub iteration: usize,
    pub aligned: DMatrix<f64>,
    pub sigma2: f64,
}

/// Everything the loop leaves behind, in the normalized frame.
#[derive(Debug, Clone)]
pub struct EngineOutput<B: Backend> {
    pub state: VariationalState<B>,
    /// Assignment over the full reference set `[N, M]`.
    pub assignment: Assignment<B>,
    /// Base moving coordinates the transforms apply to (mirrored when the
    /// coarse aligner detected a flip).
    pub moving: Tensor<B, 2>,
    pub reflected: bool,
    pub optimal_rotation: DMatrix<f64>,
    pub optimal_translation: Vec<f64>,
    /// Moving points under the optimal rigid transform.
    pub optimal_rigid: Tensor<B, 2>,
    pub inducing: InducingPoints<B>,
    pub bandwidths: Vec<f64>,
    pub snapshots: Vec<IterationSnapshot>,
    pub iterations: usize,
}

/// Mirror the last coordinate axis.
pub fn mirror_last_axis(m: &DMatrix<f64>) -> DMatrix<f64> {
    let mut out = m.clone();
    let last = m.ncols() - 1;
    out.column_mut(last).neg_mut();
    out
}

/// Run the variational loop on preprocessed input.
pub fn run<B: Backend, R: Rng + ?Sized>(
    prepared: &PreparedInput,
    coarse: Option<&CoarseAlignment>,
    config: &AlignmentConfig,
    tracker: &ProgressTracker,
    rng: &mut R,
    device: &B::Device,
) -> Result<EngineOutput<B>> {
    let dim = prepared.dim;
    let n = prepared.moving_coords.nrows();
    let m = prepared.reference_coords.nrows();
    let reflected = coarse.map_or(false, |c| c.reflected);
    let orient = |x: &DMatrix<f64>| if reflected { mirror_last_axis(x) } else { x.clone() };

    let moving_host = orient(&prepared.moving_coords);
    let moving = from_matrix::<B>(&moving_host, device);
    let reference = from_matrix::<B>(&prepared.reference_coords, device);

    let mut features = FeatureModel::<B>::new(&prepared.layers, n, m, rng, device);
    if !config.svi || (config.pre_compute_dist && config.chunk.is_none()) {
        features.precompute();
    }
    info!(bandwidths = ?features.bandwidths(), "feature likelihoods ready");

    let inducing = InducingPoints::<B>::sample(&moving_host, config.inducing_points, config.beta, rng, device);
    let basis = KernelBasis {
        cross: inducing.cross_kernel(moving.clone()),
        gram: inducing.gram(),
        lambda_vf: config.lambda_vf,
    };

    let (rotation, translation) = match coarse {
        Some(c) => (c.rotation.clone(), c.translation.clone()),
        None => (DMatrix::identity(dim, dim), vec![0.0; dim]),
    };
    let seeded = RigidTransform::<B>::from_host(&rotation, &translation, device).transform_points(moving.clone());
    let sigma2 = updates::initial_sigma2(&to_matrix(seeded), &prepared.reference_coords, config.sigma2_init_scale);
    let mut state = VariationalState::new(&moving, rotation, translation, sigma2, inducing.len());

    let mut guidance = prepared.guidance.as_ref().map(|g| {
        let pairs = orient(&g.moving);
        let kernel = inducing.cross_kernel(from_matrix(&pairs, device));
        state::guidance_state(&pairs, &g.reference, g.effect, g.epsilon, kernel, &state)
    });
    let anchors = coarse.map(|c| AnchorSet {
        moving: c.inlier_moving.clone(),
        reference: c.inlier_reference.clone(),
        weight: c.inlier_weight.clone(),
        lambda: config.lambda_reg,
    });

    let volume = updates::bounding_volume(&moving_host, &prepared.reference_coords);
    let volume = if volume > 0.0 { volume } else { 1.0 };

    let mut sampler = if config.svi {
        BatchSampler::stochastic(m, config.batch_size, rng)
    } else {
        BatchSampler::full(m)
    };
    let steps = StepSchedule::new(config.svi_decay, config.svi);
    let annealing = OutlierVarianceSchedule::new(config.partial_robust_level, config.max_iter);
    let chunk = config
        .chunk
        .map_or(sampler.batch_size(), |c| chunk_size(c.capacity, n, sampler.batch_size()));
    let batch_scale = m as f64 / sampler.batch_size() as f64;

    info!(
        n_moving = n,
        n_reference = m,
        dim,
        sigma2,
        inducing_points = inducing.len(),
        batch_size = sampler.batch_size(),
        chunk,
        anchors = anchors.as_ref().map_or(0, AnchorSet::len),
        guidance_pairs = guidance.as_ref().map_or(0, |g| g.n_pairs),
        "starting variational registration"
    );

    tracker.start();
    let mut snapshots = Vec::new();
    let mut last_assignment = None;
    for iteration in 0..config.max_iter {
        let columns = sampler.next_batch();
        state.step_size = steps.step_size(iteration);

        let params = AssignmentParams {
            sigma2: state.sigma2,
            gamma: state.gamma,
            outlier_variance: state.outlier_variance,
            alpha: state.alpha.clone(),
            sigma_diag: state.sigma_diag.clone(),
            volume,
        };
        let assignment = compute_assignment(&state.aligned, &reference, &columns, &features, &params, chunk);
        if config.check_numerics {
            if let Err(err) = check_scalar("assignment mass", assignment.sp) {
                tracker.error(&err.to_string());
                return Err(err);
            }
        }

        updates::update_gamma(&mut state, &assignment, n, batch_scale);
        updates::update_alpha(&mut state, &assignment);

        let phase = state.phase.advance(state.sigma2, iteration);
        if phase != state.phase {
            info!(iteration, sigma2 = state.sigma2, "enabling non-rigid deformation");
            state.phase = phase;
        }
        let reference_batch = reference.clone().select(0, index_tensor::<B>(&columns, device));
        if state.phase.is_nonrigid() {
            updates::update_nonrigid(&mut state, &assignment, reference_batch.clone(), &basis, guidance.as_mut())?;
        }
        updates::update_rigid(
            &mut state,
            &assignment,
            &moving,
            reference_batch,
            guidance.as_mut(),
            anchors.as_ref(),
        )?;
        state.recompose();
        updates::update_sigma2(&mut state, &assignment, iteration);
        state.outlier_variance = annealing.advance(iteration, state.outlier_variance);

        debug!(
            iteration,
            sigma2 = state.sigma2,
            gamma = state.gamma,
            outlier_variance = state.outlier_variance,
            step_size = state.step_size,
            "iteration done"
        );
        tracker.update(iteration, config.max_iter, stats(&state));
        if config.record_iterations {
            snapshots.push(IterationSnapshot {
                iteration,
                aligned: to_matrix(state.aligned.clone()),
                sigma2: state.sigma2,
            });
        }
        last_assignment = Some(assignment);
    }

    let assignment = match last_assignment {
        Some(a) if !config.svi => a,
        _ => {
            let columns: Vec<usize> = (0..m).collect();
            let chunk = config.chunk.map_or(m, |c| chunk_size(c.capacity, n, m));
            let params = AssignmentParams {
                sigma2: state.sigma2,
                gamma: state.gamma,
                outlier_variance: state.outlier_variance,
                alpha: state.alpha.clone(),
                sigma_diag: state.sigma_diag.clone(),
                volume,
            };
            compute_assignment(&state.aligned, &reference, &columns, &features, &params, chunk)
        }
    };

    let (optimal_rotation, optimal_translation) = updates::optimal_rigid(&moving, &reference, &assignment)?;
    let optimal_rigid = RigidTransform::<B>::from_host(&optimal_rotation, &optimal_translation, device)
        .transform_points(moving.clone());

    if config.check_numerics {
        let checked = check_scalar("sigma2", state.sigma2)
            .and_then(|_| check_scalar("gamma", state.gamma))
            .and_then(|_| check_tensor("alpha", &state.alpha))
            .and_then(|_| check_tensor("aligned coordinates", &state.aligned))
            .and_then(|_| check_tensor("assignment", &assignment.p));
        if let Err(err) = checked {
            tracker.error(&err.to_string());
            return Err(err);
        }
    }

    tracker.complete(config.max_iter, stats(&state));
    info!(sigma2 = state.sigma2, gamma = state.gamma, "variational registration finished");

    Ok(EngineOutput {
        state,
        assignment,
        moving,
        reflected,
        optimal_rotation,
        optimal_translation,
        optimal_rigid,
        bandwidths: features.bandwidths(),
        inducing,
        snapshots,
        iterations: config.max_iter,
    })
}

fn stats<B: Backend>(state: &VariationalState<B>) -> IterationStats {
    IterationStats {
        sigma2: state.sigma2,
        gamma: state.gamma,
        outlier_variance: state.outlier_variance,
        step_size: state.step_size,
        phase: state.phase,
    }
}
