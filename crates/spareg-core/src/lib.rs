//! Core data model for spatial-omics point-set registration.
//!
//! Provides point sets, coordinate normalization, the numeric backend layer
//! (burn tensors for bulk math, nalgebra for small dense solves) and the
//! transform family used to express and re-apply an alignment.

pub mod backend;
pub mod error;
pub mod normalization;
pub mod point_set;
pub mod transform;

pub use error::{CoreError, Result};
pub use normalization::NormalizationParams;
pub use point_set::{PointSet, DEFAULT_LAYER_KEY, DEFAULT_SPATIAL_KEY};
