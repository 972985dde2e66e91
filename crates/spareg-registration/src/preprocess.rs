//! Input extraction and normalization.
//!
//! Pulls coordinates and feature representations out of the two point sets,
//! restricts dense layers to their common genes, normalizes coordinates (and
//! optionally features) and maps guidance pairs into the normalized frames.
//! Every configuration problem surfaces here, before any iteration runs.

use std::collections::HashSet;

use nalgebra::DMatrix;
use spareg_core::{NormalizationParams, PointSet};
use tracing::info;

use crate::config::{
    AlignmentConfig, Dissimilarity, FeatureKey, FeatureLayerConfig, GuidanceEffect, LabelTransfer,
};
use crate::error::{RegistrationError, Result};
use crate::validation::validate_finite_matrix;

/// Feature matrices of one layer for both sets.
///
/// Label layers are one-hot encoded; `transfer` then holds the
/// `[moving labels, reference labels]` weight matrix.
#[derive(Debug, Clone)]
pub struct LayerData {
    pub config: FeatureLayerConfig,
    pub moving: DMatrix<f64>,
    pub reference: DMatrix<f64>,
    pub transfer: Option<DMatrix<f64>>,
}

/// Guidance pairs in normalized coordinates.
#[derive(Debug, Clone)]
pub struct GuidanceData {
    pub moving: DMatrix<f64>,
    pub reference: DMatrix<f64>,
    pub effect: GuidanceEffect,
    pub epsilon: f64,
}

/// Representation used by the coarse rigid aligner.
#[derive(Debug, Clone)]
pub struct InitData {
    pub moving: DMatrix<f64>,
    pub reference: DMatrix<f64>,
    pub dissimilarity: Dissimilarity,
}

/// Everything the engine needs, extracted from the two point sets.
#[derive(Debug, Clone)]
pub struct PreparedInput {
    pub dim: usize,
    pub moving_coords: DMatrix<f64>,
    pub reference_coords: DMatrix<f64>,
    pub moving_params: NormalizationParams,
    pub reference_params: NormalizationParams,
    pub genes: Vec<String>,
    pub layers: Vec<LayerData>,
    pub init: Option<InitData>,
    pub guidance: Option<GuidanceData>,
}

/// Validate the configuration against both point sets and extract the
/// normalized working copies. The point sets themselves are not modified.
pub fn preprocess(
    moving: &PointSet,
    reference: &PointSet,
    config: &AlignmentConfig,
) -> Result<PreparedInput> {
    config.validate()?;

    let coords_a = spatial(moving, &config.spatial_key, "moving")?;
    let coords_b = spatial(reference, &config.spatial_key, "reference")?;
    let dim = coords_a.ncols();
    if coords_b.ncols() != dim {
        return Err(RegistrationError::dimension_mismatch(format!(
            "moving coordinates are {}-dimensional but reference coordinates are {}-dimensional",
            dim,
            coords_b.ncols()
        )));
    }
    if !(dim == 2 || dim == 3) {
        return Err(RegistrationError::dimension_mismatch(format!(
            "spatial coordinates must be 2- or 3-dimensional, got {}",
            dim
        )));
    }
    if moving.is_empty() || reference.is_empty() {
        return Err(RegistrationError::invalid_configuration(
            "both point sets must contain at least one point",
        ));
    }
    validate_finite_matrix("moving coordinates", coords_a)?;
    validate_finite_matrix("reference coordinates", coords_b)?;

    let genes = common_genes(moving, reference, config.genes.as_deref());
    let uses_genes = config
        .layers
        .iter()
        .map(|l| &l.key)
        .chain(config.init_key.iter())
        .any(|k| matches!(k, FeatureKey::Layer(_)));
    if uses_genes && genes.is_empty() {
        return Err(RegistrationError::invalid_configuration(
            "the two point sets share no features",
        ));
    }

    let mut layers = config
        .layers
        .iter()
        .map(|layer| extract_layer(moving, reference, layer, &genes))
        .collect::<Result<Vec<_>>>()?;

    let init = if config.nn_init {
        let key = match &config.init_key {
            Some(key) => key.clone(),
            None => config
                .layers
                .iter()
                .map(|l| l.key.clone())
                .find(|k| !matches!(k, FeatureKey::Label(_)))
                .ok_or_else(|| {
                    RegistrationError::invalid_configuration(
                        "coarse initialization needs a non-label representation; set `init_key`",
                    )
                })?,
        };
        let (moving_rep, reference_rep) = representation(moving, reference, &key, &genes)?;
        let dissimilarity = match key {
            FeatureKey::Layer(_) => Dissimilarity::Kl,
            _ => Dissimilarity::SquareEuclidean,
        };
        Some(InitData {
            moving: moving_rep,
            reference: reference_rep,
            dissimilarity,
        })
    } else {
        None
    };

    let (moving_params, reference_params) = if config.normalize_coordinates {
        NormalizationParams::fit_pair(coords_a, coords_b, config.separate_mean, config.separate_scale)
    } else {
        (NormalizationParams::identity(dim), NormalizationParams::identity(dim))
    };
    let moving_coords = moving_params.normalize(coords_a);
    let reference_coords = reference_params.normalize(coords_b);
    info!(
        moving_scale = moving_params.scale,
        reference_scale = reference_params.scale,
        "spatial coordinates normalized"
    );

    if config.normalize_features {
        for layer in layers.iter_mut() {
            normalize_features(layer);
        }
    }

    let guidance = match &config.guidance {
        Some(g) => {
            if g.moving.ncols() != dim {
                return Err(RegistrationError::ShapeMismatch {
                    expected: vec![g.moving.nrows(), dim],
                    actual: vec![g.moving.nrows(), g.moving.ncols()],
                });
            }
            Some(GuidanceData {
                moving: moving_params.normalize(&g.moving),
                reference: reference_params.normalize(&g.reference),
                effect: g.effect,
                epsilon: g.epsilon,
            })
        }
        None => None,
    };

    info!(
        n_moving = moving.len(),
        n_reference = reference.len(),
        dim,
        n_genes = genes.len(),
        n_layers = layers.len(),
        "preprocess finished"
    );

    Ok(PreparedInput {
        dim,
        moving_coords,
        reference_coords,
        moving_params,
        reference_params,
        genes,
        layers,
        init,
        guidance,
    })
}

fn spatial<'a>(set: &'a PointSet, key: &str, which: &str) -> Result<&'a DMatrix<f64>> {
    set.coordinates(key).map_err(|_| {
        RegistrationError::missing_key(format!(
            "spatial key '{}' not found in the {} point set",
            key, which
        ))
    })
}

/// Features present in both sets, in moving-set order, optionally restricted
/// to a user gene list.
fn common_genes(moving: &PointSet, reference: &PointSet, subset: Option<&[String]>) -> Vec<String> {
    let in_reference: HashSet<&str> = reference.feature_names().iter().map(String::as_str).collect();
    let wanted: Option<HashSet<&str>> = subset.map(|s| s.iter().map(String::as_str).collect());
    moving
        .feature_names()
        .iter()
        .filter(|g| in_reference.contains(g.as_str()))
        .filter(|g| wanted.as_ref().map_or(true, |w| w.contains(g.as_str())))
        .cloned()
        .collect()
}

fn representation(
    moving: &PointSet,
    reference: &PointSet,
    key: &FeatureKey,
    genes: &[String],
) -> Result<(DMatrix<f64>, DMatrix<f64>)> {
    match key {
        FeatureKey::Layer(name) => Ok((
            moving.layer_columns(name, genes).map_err(|_| missing("layer", name, "moving"))?,
            reference.layer_columns(name, genes).map_err(|_| missing("layer", name, "reference"))?,
        )),
        FeatureKey::Embedding(name) => {
            let a = moving.embedding(name).map_err(|_| missing("embedding", name, "moving"))?;
            let b = reference.embedding(name).map_err(|_| missing("embedding", name, "reference"))?;
            if a.ncols() != b.ncols() {
                return Err(RegistrationError::dimension_mismatch(format!(
                    "embedding '{}' has width {} on the moving set and {} on the reference set",
                    name,
                    a.ncols(),
                    b.ncols()
                )));
            }
            Ok((a.clone(), b.clone()))
        }
        FeatureKey::Label(name) => Err(RegistrationError::invalid_configuration(format!(
            "label column '{}' is not a numeric representation",
            name
        ))),
    }
}

fn missing(kind: &str, name: &str, which: &str) -> RegistrationError {
    RegistrationError::missing_key(format!("{} '{}' not found in the {} point set", kind, name, which))
}

fn extract_layer(
    moving: &PointSet,
    reference: &PointSet,
    config: &FeatureLayerConfig,
    genes: &[String],
) -> Result<LayerData> {
    if let FeatureKey::Label(column) = &config.key {
        let labels_a = moving
            .labels(column)
            .map_err(|_| missing("label column", column, "moving"))?;
        let labels_b = reference
            .labels(column)
            .map_err(|_| missing("label column", column, "reference"))?;
        let (moving_onehot, cats_a) = one_hot(labels_a);
        let (reference_onehot, cats_b) = one_hot(labels_b);
        let transfer = transfer_matrix(&cats_a, &cats_b, config.label_transfer.as_ref());
        return Ok(LayerData {
            config: config.clone(),
            moving: moving_onehot,
            reference: reference_onehot,
            transfer: Some(transfer),
        });
    }

    let (a, b) = representation(moving, reference, &config.key, genes)?;
    Ok(LayerData {
        config: config.clone(),
        moving: a,
        reference: b,
        transfer: None,
    })
}

/// One-hot encoding with categories in order of first appearance.
fn one_hot(labels: &[String]) -> (DMatrix<f64>, Vec<String>) {
    let mut categories: Vec<String> = Vec::new();
    let codes: Vec<usize> = labels
        .iter()
        .map(|label| match categories.iter().position(|c| c == label) {
            Some(i) => i,
            None => {
                categories.push(label.clone());
                categories.len() - 1
            }
        })
        .collect();
    let mut m = DMatrix::zeros(labels.len(), categories.len());
    for (row, code) in codes.into_iter().enumerate() {
        m[(row, code)] = 1.0;
    }
    (m, categories)
}

fn transfer_matrix(cats_a: &[String], cats_b: &[String], transfer: Option<&LabelTransfer>) -> DMatrix<f64> {
    DMatrix::from_fn(cats_a.len(), cats_b.len(), |i, j| match transfer {
        Some(t) => t.weight(&cats_a[i], &cats_b[j]),
        None => {
            if cats_a[i] == cats_b[j] {
                1.0
            } else {
                0.0
            }
        }
    })
}

/// Divide both sides of a non-KL numeric layer by the mean of their RMS row norms.
fn normalize_features(layer: &mut LayerData) {
    if layer.transfer.is_some() || layer.config.dissimilarity == Dissimilarity::Kl {
        return;
    }
    let rms = |m: &DMatrix<f64>| (m.norm_squared() / m.nrows().max(1) as f64).sqrt();
    let scale = 0.5 * (rms(&layer.moving) + rms(&layer.reference));
    if scale > 0.0 && scale.is_finite() {
        layer.moving /= scale;
        layer.reference /= scale;
        info!(layer = layer.config.key.name(), scale, "feature normalization");
    }
}
