//! Alignment configuration.
//!
//! Every tunable of a registration run lives in [`AlignmentConfig`]. Option
//! enums parse from their conventional short names (`"kl"`, `"gauss"`,
//! `"both"`, ...) so configurations can come from strings as well as code.

use std::fmt;
use std::str::FromStr;

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::error::{RegistrationError, Result};
use crate::validation::validate_positive;

/// Dissimilarity between feature vectors of moving and reference points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dissimilarity {
    /// Kullback-Leibler divergence of pseudocount-smoothed row profiles.
    Kl,
    /// Mean of the two directed KL divergences.
    SymKl,
    Euclidean,
    SquareEuclidean,
    /// One minus cosine similarity.
    Cosine,
    /// Label transfer weight looked up from categorical labels.
    Label,
}

impl FromStr for Dissimilarity {
    type Err = RegistrationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "kl" => Ok(Self::Kl),
            "sym_kl" => Ok(Self::SymKl),
            "euc" | "euclidean" => Ok(Self::Euclidean),
            "square_euc" | "square_euclidean" => Ok(Self::SquareEuclidean),
            "cos" | "cosine" => Ok(Self::Cosine),
            "label" => Ok(Self::Label),
            other => Err(invalid_option(
                "dissimilarity",
                other,
                &["kl", "sym_kl", "euc", "euclidean", "square_euc", "square_euclidean", "cos", "cosine", "label"],
            )),
        }
    }
}

impl fmt::Display for Dissimilarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Kl => "kl",
            Self::SymKl => "sym_kl",
            Self::Euclidean => "euclidean",
            Self::SquareEuclidean => "square_euclidean",
            Self::Cosine => "cosine",
            Self::Label => "label",
        };
        f.write_str(name)
    }
}

/// Likelihood model turning a feature dissimilarity into a match weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbabilityModel {
    Gauss,
    Cosine,
    Label,
}

impl FromStr for ProbabilityModel {
    type Err = RegistrationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "gauss" | "gaussian" => Ok(Self::Gauss),
            "cos" | "cosine" => Ok(Self::Cosine),
            "label" => Ok(Self::Label),
            other => Err(invalid_option(
                "probability_type",
                other,
                &["gauss", "gaussian", "cos", "cosine", "label"],
            )),
        }
    }
}

/// Which part of the transform guidance pairs constrain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuidanceEffect {
    Rigid,
    Nonrigid,
    Both,
}

impl GuidanceEffect {
    pub fn affects_rigid(self) -> bool {
        matches!(self, Self::Rigid | Self::Both)
    }

    pub fn affects_nonrigid(self) -> bool {
        matches!(self, Self::Nonrigid | Self::Both)
    }
}

impl FromStr for GuidanceEffect {
    type Err = RegistrationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "rigid" => Ok(Self::Rigid),
            "nonrigid" => Ok(Self::Nonrigid),
            "both" => Ok(Self::Both),
            other => Err(invalid_option(
                "guidance_effect",
                other,
                &["nonrigid", "rigid", "both"],
            )),
        }
    }
}

/// Kernel of the deformation field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelType {
    /// Squared-exponential kernel on euclidean distance.
    #[default]
    Euc,
}

impl FromStr for KernelType {
    type Err = RegistrationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "euc" => Ok(Self::Euc),
            other => Err(invalid_option("kernel_type", other, &["euc"])),
        }
    }
}

fn invalid_option(option: &str, value: &str, valid: &[&str]) -> RegistrationError {
    RegistrationError::invalid_configuration(format!(
        "invalid `{}` value '{}'; available values are: {}",
        option,
        value,
        valid.join(", ")
    ))
}

/// Where a feature representation is read from on a point set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKey {
    /// Dense layer sharing the set's feature names (genes).
    Layer(String),
    /// Embedding without feature names (e.g. a PCA).
    Embedding(String),
    /// Categorical label column.
    Label(String),
}

impl FeatureKey {
    pub fn name(&self) -> &str {
        match self {
            Self::Layer(k) | Self::Embedding(k) | Self::Label(k) => k,
        }
    }
}

/// Explicit label-to-label transfer weights: `(moving label, reference label, weight)`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LabelTransfer {
    pub entries: Vec<(String, String, f64)>,
}

impl LabelTransfer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, moving: impl Into<String>, reference: impl Into<String>, weight: f64) -> Self {
        self.entries.push((moving.into(), reference.into(), weight));
        self
    }

    /// Weight for a label pair; pairs not listed weigh 0.
    pub fn weight(&self, moving: &str, reference: &str) -> f64 {
        self.entries
            .iter()
            .find(|(a, b, _)| a == moving && b == reference)
            .map(|(_, _, w)| *w)
            .unwrap_or(0.0)
    }
}

/// Settings of one feature representation taking part in the E-step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureLayerConfig {
    pub key: FeatureKey,
    pub dissimilarity: Dissimilarity,
    pub probability: ProbabilityModel,
    /// Gaussian bandwidth; estimated from the data when `None`.
    pub bandwidth: Option<f64>,
    /// Label weights for `Label` keys; identity when `None`.
    pub label_transfer: Option<LabelTransfer>,
}

impl FeatureLayerConfig {
    /// Dense layer compared with KL divergence under a Gaussian model.
    pub fn layer(name: impl Into<String>) -> Self {
        Self {
            key: FeatureKey::Layer(name.into()),
            dissimilarity: Dissimilarity::Kl,
            probability: ProbabilityModel::Gauss,
            bandwidth: None,
            label_transfer: None,
        }
    }

    /// Embedding compared with squared euclidean distance under a Gaussian model.
    pub fn embedding(name: impl Into<String>) -> Self {
        Self {
            key: FeatureKey::Embedding(name.into()),
            dissimilarity: Dissimilarity::SquareEuclidean,
            probability: ProbabilityModel::Gauss,
            bandwidth: None,
            label_transfer: None,
        }
    }

    /// Categorical labels used as direct match weights.
    pub fn label(column: impl Into<String>) -> Self {
        Self {
            key: FeatureKey::Label(column.into()),
            dissimilarity: Dissimilarity::Label,
            probability: ProbabilityModel::Label,
            bandwidth: None,
            label_transfer: None,
        }
    }

    pub fn with_dissimilarity(mut self, dissimilarity: Dissimilarity) -> Self {
        self.dissimilarity = dissimilarity;
        self
    }

    pub fn with_probability(mut self, probability: ProbabilityModel) -> Self {
        self.probability = probability;
        self
    }

    pub fn with_bandwidth(mut self, bandwidth: f64) -> Self {
        self.bandwidth = Some(bandwidth);
        self
    }

    pub fn with_label_transfer(mut self, transfer: LabelTransfer) -> Self {
        self.label_transfer = Some(transfer);
        self
    }

    fn validate(&self) -> Result<()> {
        let is_label_key = matches!(self.key, FeatureKey::Label(_));
        let is_label_metric = self.dissimilarity == Dissimilarity::Label;
        if is_label_key != is_label_metric {
            return Err(RegistrationError::invalid_configuration(format!(
                "feature '{}': the `label` dissimilarity is used exactly with label columns",
                self.key.name()
            )));
        }
        if (self.probability == ProbabilityModel::Label) != is_label_metric {
            return Err(RegistrationError::invalid_configuration(format!(
                "feature '{}': the `label` probability model requires the `label` dissimilarity",
                self.key.name()
            )));
        }
        if let Some(bw) = self.bandwidth {
            if !(bw.is_finite() && bw > 0.0) {
                return Err(RegistrationError::invalid_configuration(format!(
                    "feature '{}': bandwidth must be positive, got {}",
                    self.key.name(),
                    bw
                )));
            }
        }
        Ok(())
    }
}

/// User-supplied corresponding coordinates, one pair per row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuidanceConfig {
    /// Points on the moving set `[P, D]`, in its original frame.
    pub moving: DMatrix<f64>,
    /// Matching points on the reference set `[P, D]`.
    pub reference: DMatrix<f64>,
    pub effect: GuidanceEffect,
    /// Penalty scale; the pair term is weighted by `sigma2 / epsilon`.
    pub epsilon: f64,
}

/// Chunked assignment computation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// Budget in units of 1e8 matrix entries per chunk.
    pub capacity: f64,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self { capacity: 1.0 }
    }
}

/// Configuration for one alignment run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentConfig {
    pub spatial_key: String,
    pub layers: Vec<FeatureLayerConfig>,
    /// Restrict dense layers to these genes (intersected with the common ones).
    pub genes: Option<Vec<String>>,

    pub normalize_coordinates: bool,
    pub normalize_features: bool,
    pub separate_mean: bool,
    pub separate_scale: bool,

    /// Run the coarse rigid aligner before the variational loop.
    pub nn_init: bool,
    pub allow_flip: bool,
    /// Representation for the coarse aligner; first non-label layer if `None`.
    pub init_key: Option<FeatureKey>,
    pub top_k: usize,
    pub coarse_subsample: usize,

    pub kernel_type: KernelType,
    /// Kernel bandwidth `beta` of `exp(-beta‖x - y‖²)`.
    pub beta: f64,
    /// Number of inducing points K.
    pub inducing_points: usize,
    pub lambda_vf: f64,
    /// Weight divisor of the coarse inlier anchor term.
    pub lambda_reg: f64,

    pub max_iter: usize,
    pub svi: bool,
    pub batch_size: usize,
    pub svi_decay: f64,
    pub pre_compute_dist: bool,
    pub sigma2_init_scale: f64,
    pub partial_robust_level: f64,

    pub guidance: Option<GuidanceConfig>,
    pub chunk: Option<ChunkConfig>,

    pub keep_size: bool,
    pub seed: u64,
    pub check_numerics: bool,
    pub record_iterations: bool,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            spatial_key: spareg_core::DEFAULT_SPATIAL_KEY.to_string(),
            layers: vec![FeatureLayerConfig::layer(spareg_core::DEFAULT_LAYER_KEY)],
            genes: None,
            normalize_coordinates: true,
            normalize_features: true,
            separate_mean: true,
            separate_scale: false,
            nn_init: true,
            allow_flip: false,
            init_key: None,
            top_k: 10,
            coarse_subsample: 20_000,
            kernel_type: KernelType::Euc,
            beta: 0.01,
            inducing_points: 15,
            lambda_vf: 1e2,
            lambda_reg: 1.0,
            max_iter: 200,
            svi: true,
            batch_size: 1000,
            svi_decay: 10.0,
            pre_compute_dist: true,
            sigma2_init_scale: 0.1,
            partial_robust_level: 25.0,
            guidance: None,
            chunk: None,
            keep_size: false,
            seed: 42,
            check_numerics: true,
            record_iterations: false,
        }
    }
}

impl AlignmentConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_spatial_key(mut self, key: impl Into<String>) -> Self {
        self.spatial_key = key.into();
        self
    }

    pub fn with_layers(mut self, layers: Vec<FeatureLayerConfig>) -> Self {
        self.layers = layers;
        self
    }

    pub fn with_genes(mut self, genes: Vec<String>) -> Self {
        self.genes = Some(genes);
        self
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn with_svi(mut self, svi: bool, batch_size: usize) -> Self {
        self.svi = svi;
        self.batch_size = batch_size;
        self
    }

    pub fn with_nn_init(mut self, nn_init: bool) -> Self {
        self.nn_init = nn_init;
        self
    }

    pub fn with_allow_flip(mut self, allow_flip: bool) -> Self {
        self.allow_flip = allow_flip;
        self
    }

    pub fn with_kernel(mut self, beta: f64, inducing_points: usize) -> Self {
        self.beta = beta;
        self.inducing_points = inducing_points;
        self
    }

    pub fn with_lambda_vf(mut self, lambda_vf: f64) -> Self {
        self.lambda_vf = lambda_vf;
        self
    }

    pub fn with_partial_robust_level(mut self, level: f64) -> Self {
        self.partial_robust_level = level;
        self
    }

    pub fn with_guidance(mut self, guidance: GuidanceConfig) -> Self {
        self.guidance = Some(guidance);
        self
    }

    pub fn with_chunk(mut self, capacity: f64) -> Self {
        self.chunk = Some(ChunkConfig { capacity });
        self
    }

    pub fn with_keep_size(mut self, keep_size: bool) -> Self {
        self.keep_size = keep_size;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_record_iterations(mut self, record: bool) -> Self {
        self.record_iterations = record;
        self
    }

    /// Check every option that does not depend on the input data.
    pub fn validate(&self) -> Result<()> {
        if self.layers.is_empty() {
            return Err(RegistrationError::invalid_configuration(
                "at least one feature layer is required",
            ));
        }
        for layer in &self.layers {
            layer.validate()?;
        }
        if let Some(FeatureKey::Label(name)) = &self.init_key {
            return Err(RegistrationError::invalid_configuration(format!(
                "coarse initialization cannot use label column '{}'",
                name
            )));
        }
        if self.max_iter == 0 {
            return Err(RegistrationError::invalid_configuration(
                "max_iter must be positive",
            ));
        }
        if self.inducing_points == 0 {
            return Err(RegistrationError::invalid_configuration(
                "number of inducing points K must be positive",
            ));
        }
        if self.top_k == 0 || self.coarse_subsample == 0 {
            return Err(RegistrationError::invalid_configuration(
                "top_k and coarse_subsample must be positive",
            ));
        }
        if self.svi && self.batch_size == 0 {
            return Err(RegistrationError::invalid_configuration(
                "batch_size must be positive in SVI mode",
            ));
        }
        validate_positive("beta", self.beta)?;
        validate_positive("lambda_vf", self.lambda_vf)?;
        validate_positive("lambda_reg", self.lambda_reg)?;
        validate_positive("svi_decay", self.svi_decay)?;
        validate_positive("sigma2_init_scale", self.sigma2_init_scale)?;
        validate_positive("partial_robust_level", self.partial_robust_level)?;
        if let Some(chunk) = &self.chunk {
            validate_positive("chunk capacity", chunk.capacity)?;
        }
        if let Some(guidance) = &self.guidance {
            validate_positive("guidance_epsilon", guidance.epsilon)?;
            if guidance.moving.shape() != guidance.reference.shape() {
                return Err(RegistrationError::ShapeMismatch {
                    expected: vec![guidance.moving.nrows(), guidance.moving.ncols()],
                    actual: vec![guidance.reference.nrows(), guidance.reference.ncols()],
                });
            }
            if guidance.moving.nrows() == 0 {
                return Err(RegistrationError::invalid_configuration(
                    "guidance pairs are empty",
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_options() {
        assert_eq!("euc".parse::<Dissimilarity>().unwrap(), Dissimilarity::Euclidean);
        assert_eq!("SQUARE_EUC".parse::<Dissimilarity>().unwrap(), Dissimilarity::SquareEuclidean);
        assert_eq!("gaussian".parse::<ProbabilityModel>().unwrap(), ProbabilityModel::Gauss);
        assert_eq!("both".parse::<GuidanceEffect>().unwrap(), GuidanceEffect::Both);
        assert_eq!("euc".parse::<KernelType>().unwrap(), KernelType::Euc);
    }

    #[test]
    fn test_unknown_option_lists_valid_values() {
        let err = "hamming".parse::<Dissimilarity>().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("dissimilarity"));
        assert!(msg.contains("hamming"));
        assert!(msg.contains("sym_kl"));

        assert!("partial".parse::<GuidanceEffect>().is_err());
        assert!("rbf".parse::<KernelType>().is_err());
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(AlignmentConfig::default().validate().is_ok());
    }

    #[test]
    fn test_label_probability_requires_label_dissimilarity() {
        let config = AlignmentConfig::default().with_layers(vec![
            FeatureLayerConfig::layer("X").with_probability(ProbabilityModel::Label),
        ]);
        assert!(matches!(
            config.validate(),
            Err(RegistrationError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_guidance_shapes_must_match() {
        let config = AlignmentConfig::default().with_guidance(GuidanceConfig {
            moving: DMatrix::zeros(3, 2),
            reference: DMatrix::zeros(2, 2),
            effect: GuidanceEffect::Both,
            epsilon: 1.0,
        });
        assert!(matches!(
            config.validate(),
            Err(RegistrationError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_non_positive_tunables_are_rejected() {
        assert!(AlignmentConfig::default().with_kernel(0.0, 15).validate().is_err());
        assert!(AlignmentConfig::default().with_max_iter(0).validate().is_err());
        assert!(AlignmentConfig::default().with_chunk(-1.0).validate().is_err());
    }

    #[test]
    fn test_label_transfer_lookup() {
        let transfer = LabelTransfer::new().with("a", "b", 0.7);
        assert_eq!(transfer.weight("a", "b"), 0.7);
        assert_eq!(transfer.weight("b", "a"), 0.0);
    }
}
