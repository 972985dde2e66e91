//! Point sets: spatial coordinates plus per-point feature matrices.

use std::collections::BTreeMap;

use nalgebra::DMatrix;

use crate::error::{CoreError, Result};

/// Default key of the spatial coordinate matrix.
pub const DEFAULT_SPATIAL_KEY: &str = "spatial";

/// Default key of the main expression layer.
pub const DEFAULT_LAYER_KEY: &str = "X";

/// An ordered set of N points (cells or spots).
///
/// Every matrix stored here has exactly one row per point. Dense layers share
/// the column names in `feature_names` (genes); embeddings carry their own
/// width (e.g. a PCA) and have no names. Inputs are never modified by the
/// registration, which works on normalized copies.
#[derive(Debug, Clone)]
pub struct PointSet {
    n_points: usize,
    feature_names: Vec<String>,
    coordinates: BTreeMap<String, DMatrix<f64>>,
    layers: BTreeMap<String, DMatrix<f64>>,
    embeddings: BTreeMap<String, DMatrix<f64>>,
    labels: BTreeMap<String, Vec<String>>,
}

impl PointSet {
    /// Create a point set from its spatial coordinates `[N, D]`, stored under
    /// [`DEFAULT_SPATIAL_KEY`].
    pub fn new(coordinates: DMatrix<f64>) -> Self {
        let n_points = coordinates.nrows();
        let mut map = BTreeMap::new();
        map.insert(DEFAULT_SPATIAL_KEY.to_string(), coordinates);
        Self {
            n_points,
            feature_names: Vec::new(),
            coordinates: map,
            layers: BTreeMap::new(),
            embeddings: BTreeMap::new(),
            labels: BTreeMap::new(),
        }
    }

    /// Set the feature (gene) names shared by all dense layers.
    ///
    /// Fails if an already attached layer has a different width.
    pub fn with_feature_names<S: Into<String>>(
        mut self,
        names: impl IntoIterator<Item = S>,
    ) -> Result<Self> {
        self.feature_names = names.into_iter().map(Into::into).collect();
        for (key, layer) in &self.layers {
            check_cols(key, self.feature_names.len(), layer.ncols())?;
        }
        Ok(self)
    }

    /// Attach an additional coordinate matrix (e.g. a pre-aligned frame).
    pub fn with_coordinates(mut self, key: impl Into<String>, coords: DMatrix<f64>) -> Result<Self> {
        let key = key.into();
        check_rows(&key, self.n_points, coords.nrows())?;
        self.coordinates.insert(key, coords);
        Ok(self)
    }

    /// Attach a dense feature layer `[N, G]` whose columns follow
    /// `feature_names`.
    pub fn with_layer(mut self, key: impl Into<String>, layer: DMatrix<f64>) -> Result<Self> {
        let key = key.into();
        check_rows(&key, self.n_points, layer.nrows())?;
        check_cols(&key, self.feature_names.len(), layer.ncols())?;
        self.layers.insert(key, layer);
        Ok(self)
    }

    /// Attach an embedding `[N, E]` (no feature names).
    pub fn with_embedding(mut self, key: impl Into<String>, embedding: DMatrix<f64>) -> Result<Self> {
        let key = key.into();
        check_rows(&key, self.n_points, embedding.nrows())?;
        self.embeddings.insert(key, embedding);
        Ok(self)
    }

    /// Attach a categorical label column.
    pub fn with_labels<S: Into<String>>(
        mut self,
        key: impl Into<String>,
        labels: impl IntoIterator<Item = S>,
    ) -> Result<Self> {
        let key = key.into();
        let labels: Vec<String> = labels.into_iter().map(Into::into).collect();
        check_rows(&key, self.n_points, labels.len())?;
        self.labels.insert(key, labels);
        Ok(self)
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.n_points
    }

    /// True when the set has no points.
    pub fn is_empty(&self) -> bool {
        self.n_points == 0
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    /// Coordinate matrix stored under `key`.
    pub fn coordinates(&self, key: &str) -> Result<&DMatrix<f64>> {
        self.coordinates.get(key).ok_or_else(|| CoreError::missing_key(key))
    }

    /// Dense layer stored under `key`.
    pub fn layer(&self, key: &str) -> Result<&DMatrix<f64>> {
        self.layers.get(key).ok_or_else(|| CoreError::missing_key(key))
    }

    /// Embedding stored under `key`.
    pub fn embedding(&self, key: &str) -> Result<&DMatrix<f64>> {
        self.embeddings.get(key).ok_or_else(|| CoreError::missing_key(key))
    }

    /// Label column stored under `key`.
    pub fn labels(&self, key: &str) -> Result<&[String]> {
        self.labels
            .get(key)
            .map(Vec::as_slice)
            .ok_or_else(|| CoreError::missing_key(key))
    }

    /// Columns of layer `key` restricted to `genes`, in that order.
    ///
    /// Genes absent from `feature_names` are reported as missing keys.
    pub fn layer_columns(&self, key: &str, genes: &[String]) -> Result<DMatrix<f64>> {
        let layer = self.layer(key)?;
        let mut columns = Vec::with_capacity(genes.len());
        for gene in genes {
            let idx = self
                .feature_names
                .iter()
                .position(|name| name == gene)
                .ok_or_else(|| CoreError::missing_key(gene.as_str()))?;
            columns.push(idx);
        }
        Ok(layer.select_columns(columns.iter()))
    }

    /// Copy of this set restricted to the rows in `indices`.
    pub fn select_rows(&self, indices: &[usize]) -> Self {
        let pick = |m: &DMatrix<f64>| m.select_rows(indices.iter());
        Self {
            n_points: indices.len(),
            feature_names: self.feature_names.clone(),
            coordinates: self.coordinates.iter().map(|(k, m)| (k.clone(), pick(m))).collect(),
            layers: self.layers.iter().map(|(k, m)| (k.clone(), pick(m))).collect(),
            embeddings: self.embeddings.iter().map(|(k, m)| (k.clone(), pick(m))).collect(),
            labels: self
                .labels
                .iter()
                .map(|(k, v)| (k.clone(), indices.iter().map(|&i| v[i].clone()).collect()))
                .collect(),
        }
    }
}

fn check_rows(key: &str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(CoreError::RowCountMismatch {
            key: key.to_string(),
            expected,
            actual,
        });
    }
    Ok(())
}

fn check_cols(key: &str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(CoreError::ColumnCountMismatch {
            key: key.to_string(),
            expected,
            actual,
        });
    }
    Ok(())
}
