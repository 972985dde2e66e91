//! Transform types and operations.
//!
//! Point-set transforms map `[N, D]` coordinate tensors to `[N, D]`. The
//! registration result composes a rigid motion with a kernel-based
//! displacement field, wrapped between normalization and denormalization.

pub mod chained;
pub mod kernel;
pub mod rigid;
pub mod scale;
pub mod trait_;

pub use chained::ChainedTransform;
pub use kernel::{se_kernel, DeformedRigidTransform, InducingPoints, KernelDeformation};
pub use rigid::RigidTransform;
pub use scale::ScaleShiftTransform;
pub use trait_::Transform;

/// Rows per dispatch when transforming large point sets.
///
/// WGPU has a dispatch limit of 65535 workgroups.
pub(crate) const CHUNK_SIZE: usize = 32768;
