//! Top-level alignment driver.

use std::marker::PhantomData;
use std::sync::Arc;

use burn::tensor::backend::Backend;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use spareg_core::backend::CpuBackend;
use spareg_core::PointSet;
use tracing::info;

use crate::coarse::{coarse_rigid_alignment, CoarseOptions};
use crate::config::AlignmentConfig;
use crate::engine;
use crate::error::Result;
use crate::output::{assemble, AlignmentResult};
use crate::preprocess::preprocess;
use crate::progress::{ProgressCallback, ProgressTracker};

/// Aligns a moving point set onto a reference point set.
///
/// Runs preprocessing, the optional coarse rigid aligner, the variational
/// loop and output assembly. All randomness comes from a generator seeded
/// with `config.seed`, so repeated runs on the same input agree.
pub struct Registration<B: Backend> {
    config: AlignmentConfig,
    tracker: ProgressTracker,
    _phantom: PhantomData<B>,
}

impl<B: Backend> Registration<B> {
    pub fn new(config: AlignmentConfig) -> Self {
        Self {
            config,
            tracker: ProgressTracker::new(),
            _phantom: PhantomData,
        }
    }

    pub fn with_callback(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.tracker.add_callback(callback);
        self
    }

    pub fn config(&self) -> &AlignmentConfig {
        &self.config
    }

    pub fn execute(&self, moving: &PointSet, reference: &PointSet, device: &B::Device) -> Result<AlignmentResult> {
        let config = &self.config;
        let prepared = preprocess(moving, reference, config)?;
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);

        let coarse = match (&prepared.init, config.nn_init) {
            (Some(init), true) => {
                let options = CoarseOptions {
                    top_k: config.top_k,
                    subsample: config.coarse_subsample,
                    allow_flip: config.allow_flip,
                };
                Some(coarse_rigid_alignment::<B, _>(
                    &prepared.moving_coords,
                    &prepared.reference_coords,
                    init,
                    &options,
                    &mut rng,
                    device,
                )?)
            }
            _ => None,
        };

        let output = engine::run::<B, _>(&prepared, coarse.as_ref(), config, &self.tracker, &mut rng, device)?;
        let result = assemble(output, &prepared, coarse.as_ref(), config);
        info!(
            n_moving = result.aligned.nrows(),
            n_reference = result.assignment.nrows(),
            "registration complete"
        );
        Ok(result)
    }
}

/// Align `moving` onto `reference` on the CPU backend.
pub fn align(moving: &PointSet, reference: &PointSet, config: AlignmentConfig) -> Result<AlignmentResult> {
    let device = Default::default();
    Registration::<CpuBackend>::new(config).execute(moving, reference, &device)
}
