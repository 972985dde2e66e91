//! Feature dissimilarities and likelihood models.
//!
//! A [`FeatureModel`] combines every configured representation into one
//! `[N, m]` match-weight block (the product of per-layer likelihoods) for any
//! subset of reference points.

pub mod dissimilarity;
pub mod probability;

use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor};
use rand::Rng;
use spareg_core::backend::{from_matrix, index_tensor, to_matrix};
use tracing::info;

use crate::config::{Dissimilarity, ProbabilityModel};
use crate::preprocess::LayerData;

pub use dissimilarity::pairwise;
pub use probability::{estimate_bandwidth, likelihood};

/// Rows per side used to estimate a Gaussian bandwidth.
pub const BANDWIDTH_SUBSAMPLE: usize = 20_000;

/// One representation uploaded to the device.
#[derive(Debug, Clone)]
pub struct FeatureLayer<B: Backend> {
    name: String,
    dissimilarity: Dissimilarity,
    probability: ProbabilityModel,
    bandwidth: f64,
    moving: Tensor<B, 2>,
    reference: Tensor<B, 2>,
    transfer: Option<Tensor<B, 2>>,
}

impl<B: Backend> FeatureLayer<B> {
    /// Upload a layer, estimating its Gaussian bandwidth if none was given.
    pub fn new<R: Rng + ?Sized>(data: &LayerData, rng: &mut R, device: &B::Device) -> Self {
        let transfer = data.transfer.as_ref().map(|t| from_matrix::<B>(t, device));
        let bandwidth = match (data.config.probability, data.config.bandwidth) {
            (_, Some(bw)) => bw,
            (ProbabilityModel::Gauss, None) => {
                let n = data.moving.nrows();
                let m = data.reference.nrows();
                let rows_a = subsample(n, rng);
                let rows_b = subsample(m, rng);
                let a = from_matrix::<B>(&data.moving.select_rows(rows_a.iter()), device);
                let b = from_matrix::<B>(&data.reference.select_rows(rows_b.iter()), device);
                let d = pairwise(data.config.dissimilarity, a, b, transfer.as_ref());
                let bw = estimate_bandwidth(&to_matrix(d));
                info!(layer = data.config.key.name(), bandwidth = bw, "estimated feature bandwidth");
                bw
            }
            _ => probability::DEFAULT_BANDWIDTH,
        };

        Self {
            name: data.config.key.name().to_string(),
            dissimilarity: data.config.dissimilarity,
            probability: data.config.probability,
            bandwidth,
            moving: from_matrix(&data.moving, device),
            reference: from_matrix(&data.reference, device),
            transfer,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bandwidth(&self) -> f64 {
        self.bandwidth
    }

    /// Dissimilarity `[N, m]` against the selected reference rows (all if `None`).
    pub fn dissimilarity(&self, columns: Option<&Tensor<B, 1, Int>>) -> Tensor<B, 2> {
        let reference = match columns {
            Some(idx) => self.reference.clone().select(0, idx.clone()),
            None => self.reference.clone(),
        };
        pairwise(self.dissimilarity, self.moving.clone(), reference, self.transfer.as_ref())
    }

    /// Likelihood `[N, m]` against the selected reference rows.
    pub fn likelihood(&self, columns: Option<&Tensor<B, 1, Int>>) -> Tensor<B, 2> {
        likelihood(self.probability, self.dissimilarity(columns), self.bandwidth)
    }
}

fn subsample<R: Rng + ?Sized>(n: usize, rng: &mut R) -> Vec<usize> {
    if n > BANDWIDTH_SUBSAMPLE {
        rand::seq::index::sample(rng, n, BANDWIDTH_SUBSAMPLE).into_vec()
    } else {
        (0..n).collect()
    }
}

/// Product of all layer likelihoods, optionally cached for the full
/// reference set.
#[derive(Debug, Clone)]
pub struct FeatureModel<B: Backend> {
    layers: Vec<FeatureLayer<B>>,
    cached: Option<Tensor<B, 2>>,
    n_moving: usize,
    n_reference: usize,
    device: B::Device,
}

impl<B: Backend> FeatureModel<B> {
    pub fn new<R: Rng + ?Sized>(
        layers: &[LayerData],
        n_moving: usize,
        n_reference: usize,
        rng: &mut R,
        device: &B::Device,
    ) -> Self {
        Self {
            layers: layers.iter().map(|l| FeatureLayer::new(l, rng, device)).collect(),
            cached: None,
            n_moving,
            n_reference,
            device: device.clone(),
        }
    }

    /// Compute and keep the full `[N, M]` likelihood.
    pub fn precompute(&mut self) {
        self.cached = Some(self.compute(None, self.n_reference));
    }

    pub fn layers(&self) -> &[FeatureLayer<B>] {
        &self.layers
    }

    pub fn bandwidths(&self) -> Vec<f64> {
        self.layers.iter().map(FeatureLayer::bandwidth).collect()
    }

    /// Joint likelihood `[N, m]` for the given reference indices.
    pub fn likelihood(&self, columns: &[usize]) -> Tensor<B, 2> {
        let idx = index_tensor::<B>(columns, &self.device);
        match &self.cached {
            Some(full) => full.clone().select(1, idx),
            None => self.compute(Some(&idx), columns.len()),
        }
    }

    fn compute(&self, columns: Option<&Tensor<B, 1, Int>>, width: usize) -> Tensor<B, 2> {
        self.layers
            .iter()
            .map(|layer| layer.likelihood(columns))
            .reduce(|acc, p| acc * p)
            .unwrap_or_else(|| Tensor::ones([self.n_moving, width], &self.device))
    }
}
