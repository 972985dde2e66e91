//! Coarse rigid pre-alignment.
//!
//! Both sets are binned onto a coarse grid, voxel representatives are matched
//! by feature dissimilarity through mutual top-K neighbour lists, and a robust
//! rigid fit over the candidate pairs gives an initial rotation/translation
//! plus a small set of confident correspondences. Those correspondences later
//! anchor the rigid update of the variational engine.

use std::collections::BTreeMap;

use burn::tensor::backend::Backend;
use nalgebra::{DMatrix, RowDVector};
use rand::Rng;
use rayon::prelude::*;
use spareg_core::backend::{fit_rotation, from_matrix, to_matrix};
use tracing::{debug, info, warn};

use crate::engine::mirror_last_axis;
use crate::error::Result;
use crate::metric::pairwise;
use crate::preprocess::InitData;

/// Number of robust-fit iterations.
const FIT_ITERATIONS: usize = 100;
/// Iteration after which the feature prior starts to flatten.
const PRIOR_ANNEAL_START: usize = 20;
const PRIOR_ALPHA_END: f64 = 0.1;
/// Posterior floor during the robust fit.
const MIN_PAIR_WEIGHT: f64 = 1e-6;
const MIN_FIT_SIGMA2: f64 = 1e-6;
/// Fixed variance and inlier fraction for the final pair posterior.
const FINAL_SIGMA2: f64 = 1e-2;
const FINAL_GAMMA: f64 = 0.1;
/// Rank of the weight used as the inlier threshold.
const INLIER_RANK: usize = 20;
const MAX_INLIER_THRESHOLD: f64 = 0.5;

/// Options of the coarse aligner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoarseOptions {
    pub top_k: usize,
    pub subsample: usize,
    pub allow_flip: bool,
}

/// Result of the coarse alignment, in normalized coordinates.
///
/// When `reflected` is set, the moving coordinates must be mirrored along
/// their last axis before `rotation`/`translation` apply; `inlier_moving` is
/// already given in the mirrored frame.
#[derive(Debug, Clone)]
pub struct CoarseAlignment {
    pub rotation: DMatrix<f64>,
    pub translation: Vec<f64>,
    pub reflected: bool,
    pub inlier_moving: DMatrix<f64>,
    pub inlier_reference: DMatrix<f64>,
    pub inlier_weight: Vec<f64>,
    pub sigma2: f64,
    pub gamma: f64,
}

impl CoarseAlignment {
    pub fn n_inliers(&self) -> usize {
        self.inlier_weight.len()
    }
}

/// Fit an initial rigid transform between normalized moving and reference
/// coordinates using the representation in `init`.
pub fn coarse_rigid_alignment<B: Backend, R: Rng + ?Sized>(
    moving_coords: &DMatrix<f64>,
    reference_coords: &DMatrix<f64>,
    init: &InitData,
    options: &CoarseOptions,
    rng: &mut R,
    device: &B::Device,
) -> Result<CoarseAlignment> {
    info!("performing coarse rigid alignment");
    let dim = moving_coords.ncols();

    let rows_a = subsample(moving_coords.nrows(), options.subsample, rng);
    let rows_b = subsample(reference_coords.nrows(), options.subsample, rng);
    let (vox_coords_a, vox_feat_a) = voxelize(
        &moving_coords.select_rows(rows_a.iter()),
        &init.moving.select_rows(rows_a.iter()),
        voxel_count(rows_a.len()),
    );
    let (vox_coords_b, vox_feat_b) = voxelize(
        &reference_coords.select_rows(rows_b.iter()),
        &init.reference.select_rows(rows_b.iter()),
        voxel_count(rows_b.len()),
    );
    debug!(
        moving_voxels = vox_coords_a.nrows(),
        reference_voxels = vox_coords_b.nrows(),
        "voxelized point sets"
    );

    let dist = to_matrix(pairwise::<B>(
        init.dissimilarity,
        from_matrix(&vox_feat_a, device),
        from_matrix(&vox_feat_b, device),
        None,
    ));
    let pairs = mutual_top_k(&dist, options.top_k);

    let train_x = DMatrix::from_fn(pairs.len(), dim, |p, j| vox_coords_a[(pairs[p].0, j)]);
    let train_y = DMatrix::from_fn(pairs.len(), dim, |p, j| vox_coords_b[(pairs[p].1, j)]);
    let distance: Vec<f64> = pairs.iter().map(|p| p.2).collect();

    let mut fit = fit_pairs(&train_x, &train_y, &distance)?;
    let mut reflected = false;
    let mut train_x = train_x;
    if options.allow_flip {
        let flipped = mirror_last_axis(&train_x);
        let flipped_fit = fit_pairs(&flipped, &train_y, &distance)?;
        if flipped_fit.gamma > fit.gamma {
            info!(
                gamma = flipped_fit.gamma,
                unflipped_gamma = fit.gamma,
                "flipping detected in coarse rigid alignment"
            );
            fit = flipped_fit;
            train_x = flipped;
            reflected = true;
        }
    }

    let inliers = select_inliers(&fit.weights);
    let inlier_moving = train_x.select_rows(inliers.iter());
    let inlier_reference = train_y.select_rows(inliers.iter());
    let inlier_weight: Vec<f64> = inliers.iter().map(|&i| fit.weights[i]).collect();

    info!(
        pairs = pairs.len(),
        inliers = inlier_weight.len(),
        gamma = fit.gamma,
        sigma2 = fit.sigma2,
        "coarse rigid alignment done"
    );

    Ok(CoarseAlignment {
        rotation: fit.rotation,
        translation: fit.translation,
        reflected,
        inlier_moving,
        inlier_reference,
        inlier_weight,
        sigma2: fit.sigma2,
        gamma: fit.gamma,
    })
}

fn subsample<R: Rng + ?Sized>(n: usize, limit: usize, rng: &mut R) -> Vec<usize> {
    if n > limit {
        let mut idx = rand::seq::index::sample(rng, n, limit).into_vec();
        idx.sort_unstable();
        idx
    } else {
        (0..n).collect()
    }
}

/// Target number of voxels for `n` points: `n / 20` clamped to `[100, 1000]`.
pub fn voxel_count(n: usize) -> usize {
    (n / 20).clamp(100, 1000)
}

/// Bin points on a regular grid with `floor(voxel_num^(1/D))` cells per axis
/// spanning the bounding box. Every occupied cell yields the mean coordinate
/// and mean feature vector of its members, in cell order.
pub fn voxelize(
    coords: &DMatrix<f64>,
    features: &DMatrix<f64>,
    voxel_num: usize,
) -> (DMatrix<f64>, DMatrix<f64>) {
    let (n, dim) = coords.shape();
    let bins = (((voxel_num as f64).powf(1.0 / dim as f64) + 1e-9).floor() as usize).max(1);

    let lo: Vec<f64> = coords.column_iter().map(|c| c.min()).collect();
    let hi: Vec<f64> = coords.column_iter().map(|c| c.max()).collect();

    let mut cells: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for i in 0..n {
        let mut key = 0usize;
        for j in 0..dim {
            let span = hi[j] - lo[j];
            let cell = if span > 0.0 {
                (((coords[(i, j)] - lo[j]) / span * bins as f64) as usize).min(bins - 1)
            } else {
                0
            };
            key = key * bins + cell;
        }
        cells.entry(key).or_default().push(i);
    }

    let mut out_coords = DMatrix::zeros(cells.len(), dim);
    let mut out_features = DMatrix::zeros(cells.len(), features.ncols());
    for (row, members) in cells.values().enumerate() {
        let count = members.len() as f64;
        let mut c = RowDVector::zeros(dim);
        let mut f = RowDVector::zeros(features.ncols());
        for &i in members {
            c += coords.row(i);
            f += features.row(i);
        }
        out_coords.set_row(row, &(c / count));
        out_features.set_row(row, &(f / count));
    }
    (out_coords, out_features)
}

/// Candidate pairs `(moving, reference, dissimilarity)`: for each reference
/// column its `k` most similar moving rows, followed by each moving row's `k`
/// most similar reference columns.
pub fn mutual_top_k(dist: &DMatrix<f64>, k: usize) -> Vec<(usize, usize, f64)> {
    let (n, m) = dist.shape();
    let k_rows = k.min(n);
    let k_cols = k.min(m);

    let by_reference: Vec<(usize, usize, f64)> = (0..m)
        .into_par_iter()
        .flat_map_iter(|j| {
            let column: Vec<f64> = dist.column(j).iter().copied().collect();
            smallest(&column, k_rows).into_iter().map(move |i| (i, j, dist[(i, j)]))
        })
        .collect();
    let by_moving: Vec<(usize, usize, f64)> = (0..n)
        .into_par_iter()
        .flat_map_iter(|i| {
            let row: Vec<f64> = dist.row(i).iter().copied().collect();
            smallest(&row, k_cols).into_iter().map(move |j| (i, j, dist[(i, j)]))
        })
        .collect();

    let mut pairs = by_reference;
    pairs.extend(by_moving);
    pairs
}

/// Indices of the `k` smallest values, in ascending order of value.
fn smallest(values: &[f64], k: usize) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..values.len()).collect();
    if k == 0 {
        return Vec::new();
    }
    if k < idx.len() {
        idx.select_nth_unstable_by(k - 1, |&a, &b| values[a].total_cmp(&values[b]));
        idx.truncate(k);
    }
    idx.sort_by(|&a, &b| values[a].total_cmp(&values[b]).then(a.cmp(&b)));
    idx
}

struct PairFit {
    weights: Vec<f64>,
    rotation: DMatrix<f64>,
    translation: Vec<f64>,
    sigma2: f64,
    gamma: f64,
}

/// Robust rigid fit `y ≈ R x + t` over candidate pairs.
///
/// Alternates weighted Procrustes with a Gaussian/uniform mixture posterior
/// whose inlier prior is `exp(-α d)` on the (rescaled) feature dissimilarity.
fn fit_pairs(x: &DMatrix<f64>, y: &DMatrix<f64>, distance: &[f64]) -> Result<PairFit> {
    let (n, dim) = x.shape();
    let dims = dim as f64;

    let max_d = distance.iter().copied().fold(0.0f64, f64::max);
    let scale = if max_d > 0.0 {
        max_d / (2.0 * std::f64::consts::LN_10)
    } else {
        1.0
    };
    let distance: Vec<f64> = distance.iter().map(|d| d.max(0.0) / scale).collect();

    let mut alpha = 1.0;
    let alpha_decay = PRIOR_ALPHA_END.powf(1.0 / (FIT_ITERATIONS - PRIOR_ANNEAL_START) as f64);
    let mut prior: Vec<f64> = distance.iter().map(|d| (-d * alpha).exp()).collect();
    let mut weights = prior.clone();

    let area = bbox_volume(x).max(bbox_volume(y));
    let area = if area > 0.0 { area } else { 1.0 };

    let residuals = |r: &DMatrix<f64>, t: &[f64]| -> Vec<f64> {
        (0..n)
            .map(|p| {
                (0..dim)
                    .map(|a| {
                        let pred: f64 = (0..dim).map(|b| x[(p, b)] * r[(a, b)]).sum::<f64>() + t[a];
                        (y[(p, a)] - pred).powi(2)
                    })
                    .sum()
            })
            .collect()
    };

    let mut rotation = DMatrix::identity(dim, dim);
    let mut translation = vec![0.0; dim];
    let mut sigma2 = (residuals(&rotation, &translation).iter().sum::<f64>() / (dims * n as f64))
        .max(MIN_FIT_SIGMA2);
    let mut gamma: f64 = 0.5;

    for iter in 0..FIT_ITERATIONS {
        let sp: f64 = weights.iter().sum();
        let mu_x = weighted_mean(x, &weights, sp);
        let mu_y = weighted_mean(y, &weights, sp);

        let mut a = DMatrix::zeros(dim, dim);
        for p in 0..n {
            for r in 0..dim {
                for c in 0..dim {
                    a[(r, c)] += weights[p] * (y[(p, r)] - mu_y[r]) * (x[(p, c)] - mu_x[c]);
                }
            }
        }
        rotation = fit_rotation(&a)?;
        translation = (0..dim)
            .map(|r| mu_y[r] - (0..dim).map(|c| rotation[(r, c)] * mu_x[c]).sum::<f64>())
            .collect();

        let res = residuals(&rotation, &translation);
        let max_prior = prior.iter().copied().fold(0.0f64, f64::max);
        let outlier =
            max_prior * (1.0 - gamma) * (2.0 * std::f64::consts::PI * sigma2).powf(dims / 2.0) / (gamma * area);
        for p in 0..n {
            let inlier = (-res[p] / (2.0 * sigma2)).exp() * prior[p];
            weights[p] = inlier / (inlier + outlier);
        }
        let sp: f64 = weights.iter().sum();
        gamma = (sp / n as f64).clamp(0.01, 0.99);
        for w in weights.iter_mut() {
            *w = w.max(MIN_PAIR_WEIGHT);
        }
        let sp: f64 = weights.iter().sum();
        sigma2 = (res.iter().zip(&weights).map(|(r, w)| r * w).sum::<f64>() / (dims * sp))
            .max(MIN_FIT_SIGMA2);

        if iter > PRIOR_ANNEAL_START {
            alpha *= alpha_decay;
            prior = distance.iter().map(|d| (-d * alpha).exp()).collect();
            let top = prior.iter().copied().fold(0.0f64, f64::max);
            if top > 0.0 {
                prior.iter_mut().for_each(|v| *v /= top);
            }
        }
    }

    // Final posterior at a fixed, sharp variance.
    let res = residuals(&rotation, &translation);
    let max_prior = prior.iter().copied().fold(0.0f64, f64::max);
    let outlier = max_prior * (1.0 - FINAL_GAMMA) * (2.0 * std::f64::consts::PI * FINAL_SIGMA2).powf(dims / 2.0)
        / (FINAL_GAMMA * area);
    for p in 0..n {
        let inlier = (-res[p] / (2.0 * FINAL_SIGMA2)).exp() * prior[p];
        weights[p] = inlier / (inlier + outlier);
    }
    let gamma = (weights.iter().sum::<f64>() / n as f64).clamp(0.01, 0.99);

    Ok(PairFit {
        weights,
        rotation,
        translation,
        sigma2,
        gamma,
    })
}

fn weighted_mean(m: &DMatrix<f64>, w: &[f64], total: f64) -> Vec<f64> {
    (0..m.ncols())
        .map(|j| (0..m.nrows()).map(|i| w[i] * m[(i, j)]).sum::<f64>() / total)
        .collect()
}

fn bbox_volume(m: &DMatrix<f64>) -> f64 {
    m.column_iter().map(|c| c.max() - c.min()).product()
}

/// Pairs whose weight exceeds `min(20th-highest weight, 0.5)`; falls back to
/// the 20 highest-ranked pairs when fewer than that clear the threshold.
fn select_inliers(weights: &[f64]) -> Vec<usize> {
    if weights.is_empty() {
        return Vec::new();
    }
    let mut order: Vec<usize> = (0..weights.len()).collect();
    order.sort_by(|&a, &b| weights[b].total_cmp(&weights[a]));
    let rank = INLIER_RANK.min(order.len() - 1);
    let threshold = weights[order[rank]].min(MAX_INLIER_THRESHOLD);

    let selected: Vec<usize> = (0..weights.len()).filter(|&i| weights[i] > threshold).collect();
    if selected.len() < INLIER_RANK.min(weights.len()) {
        warn!(
            threshold,
            selected = selected.len(),
            "too few confident coarse correspondences; keeping the highest-ranked pairs"
        );
        let mut top: Vec<usize> = order.into_iter().take(INLIER_RANK.max(1)).collect();
        top.sort_unstable();
        return top;
    }
    selected
}
