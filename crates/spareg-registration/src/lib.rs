//! Probabilistic rigid + non-rigid alignment of spatial-omics point sets.

pub mod coarse;
pub mod config;
pub mod engine;
pub mod error;
pub mod metric;
pub mod output;
pub mod preprocess;
pub mod progress;
pub mod registration;
pub mod validation;

pub use config::{
    AlignmentConfig, ChunkConfig, Dissimilarity, FeatureKey, FeatureLayerConfig, GuidanceConfig, GuidanceEffect,
    KernelType, LabelTransfer, ProbabilityModel,
};
pub use error::{RegistrationError, Result};
pub use output::{AlignmentResult, IterationRecord, TransformRecord};
pub use progress::{ConsoleProgressCallback, HistoryCallback, ProgressCallback, ProgressInfo, ProgressTracker};
pub use registration::{align, Registration};
