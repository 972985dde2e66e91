//! Iteration schedules of the variational loop.
//!
//! Reference-point batches and step sizes for stochastic variational updates,
//! and the outlier-variance ramp.

use rand::seq::SliceRandom;
use rand::Rng;

/// Minimum batch as a fraction of the reference set.
const MIN_BATCH_FRACTION: usize = 10;

/// Cycles contiguous windows over a fixed random permutation of the
/// reference indices.
#[derive(Debug, Clone)]
pub struct BatchSampler {
    permutation: Vec<usize>,
    batch_size: usize,
    offset: usize,
}

impl BatchSampler {
    /// Full-batch sampler over `n` indices in order.
    pub fn full(n: usize) -> Self {
        Self {
            permutation: (0..n).collect(),
            batch_size: n,
            offset: 0,
        }
    }

    /// Random sampler; the batch holds `max(n / 10, batch_size)` indices,
    /// capped at `n`.
    pub fn stochastic<R: Rng + ?Sized>(n: usize, batch_size: usize, rng: &mut R) -> Self {
        let mut permutation: Vec<usize> = (0..n).collect();
        permutation.shuffle(rng);
        Self {
            permutation,
            batch_size: (n / MIN_BATCH_FRACTION).max(batch_size).min(n).max(1),
            offset: 0,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Whether every batch covers the whole population.
    pub fn is_full(&self) -> bool {
        self.batch_size >= self.permutation.len()
    }

    /// Indices of the next batch, advancing the window.
    pub fn next_batch(&mut self) -> Vec<usize> {
        let n = self.permutation.len();
        if n == 0 {
            return Vec::new();
        }
        let batch = (0..self.batch_size)
            .map(|i| self.permutation[(self.offset + i) % n])
            .collect();
        self.offset = (self.offset + self.batch_size) % n;
        batch
    }
}

/// Robbins-Monro step size `min(1, decay / (t + 1))`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepSchedule {
    pub decay: f64,
    pub enabled: bool,
}

impl StepSchedule {
    pub fn new(decay: f64, enabled: bool) -> Self {
        Self { decay, enabled }
    }

    pub fn step_size(&self, iteration: usize) -> f64 {
        if self.enabled {
            (self.decay / (iteration as f64 + 1.0)).min(1.0)
        } else {
            1.0
        }
    }
}

/// Geometric ramp of the outlier variance towards `level`, reaching it after
/// `max_iter / 2` updates. Updates start after iteration 5.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutlierVarianceSchedule {
    pub level: f64,
    factor: f64,
}

impl OutlierVarianceSchedule {
    pub const START: usize = 5;

    pub fn new(level: f64, max_iter: usize) -> Self {
        let half = (max_iter as f64 / 2.0).max(1.0);
        Self {
            level,
            factor: level.powf(1.0 / half),
        }
    }

    /// Outlier variance after `iteration`, given the current value.
    pub fn advance(&self, iteration: usize, current: f64) -> f64 {
        if iteration > Self::START {
            (current * self.factor).min(self.level)
        } else {
            current
        }
    }
}
