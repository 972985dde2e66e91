//! Numeric backend layer.
//!
//! Large N×M and N×K work is expressed on `burn` tensors and stays generic
//! over `burn::tensor::backend::Backend`, so the same registration code runs on the CPU
//! (`NdArray`) or on an accelerator (`Wgpu`, behind the `wgpu` feature).
//! Small dense problems (D×D SVD, K×K pseudo-inverse) are solved on the host
//! with nalgebra; [`bridge`] moves data between the two worlds.

pub mod bridge;
pub mod linalg;
pub mod ops;

pub use bridge::{from_matrix, from_values, index_tensor, scalar, to_matrix, to_values};
pub use linalg::{determinant, fit_rotation, pseudo_inverse};
pub use ops::{digamma, digamma_scalar, scale_rows, squared_distances};

/// Always-available CPU backend.
pub type CpuBackend = burn_ndarray::NdArray<f32>;

/// Accelerator backend.
#[cfg(feature = "wgpu")]
pub type GpuBackend = burn::backend::Wgpu;
