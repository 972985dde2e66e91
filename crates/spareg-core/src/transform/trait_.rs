//! Transform trait for point-set coordinate transformations.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// Maps points from one coordinate frame to another.
///
/// Transforms here are plain values, not trainable modules: their parameters
/// come out of closed-form updates rather than gradient descent.
pub trait Transform<B: Backend> {
    /// Spatial dimensionality (2 or 3).
    fn dim(&self) -> usize;

    /// Apply the transform to a batch of points `[N, D]`.
    fn transform_points(&self, points: Tensor<B, 2>) -> Tensor<B, 2>;
}

/// Run `f` over row chunks of `points` and concatenate the results.
pub(crate) fn map_chunked<B: Backend, F>(points: Tensor<B, 2>, chunk: usize, f: F) -> Tensor<B, 2>
where
    F: Fn(Tensor<B, 2>) -> Tensor<B, 2>,
{
    let [n_points, dim] = points.dims();
    if n_points <= chunk {
        return f(points);
    }

    let num_chunks = n_points.div_ceil(chunk);
    let mut chunks = Vec::with_capacity(num_chunks);
    for i in 0..num_chunks {
        let start = i * chunk;
        let end = std::cmp::min(start + chunk, n_points);
        chunks.push(f(points.clone().slice([start..end, 0..dim])));
    }
    Tensor::cat(chunks, 0)
}
