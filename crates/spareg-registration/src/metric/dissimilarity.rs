//! Pairwise feature dissimilarities between moving and reference points.
//!
//! All functions take the moving features `[N, G]` and a block of reference
//! features `[M, G]` and return an `[N, M]` matrix.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use spareg_core::backend::squared_distances;

use crate::config::Dissimilarity;

/// Pseudocount added to every entry before building KL profiles.
const KL_PSEUDOCOUNT: f64 = 0.01;

/// Dissimilarity of every moving row against every reference row.
///
/// `transfer` is the label weight matrix and is only used by
/// [`Dissimilarity::Label`], where the feature matrices are one-hot codes.
pub fn pairwise<B: Backend>(
    metric: Dissimilarity,
    moving: Tensor<B, 2>,
    reference: Tensor<B, 2>,
    transfer: Option<&Tensor<B, 2>>,
) -> Tensor<B, 2> {
    match metric {
        Dissimilarity::Kl => kl(moving, reference),
        Dissimilarity::SymKl => {
            let forward = kl(moving.clone(), reference.clone());
            let backward = kl(reference, moving).transpose();
            (forward + backward).mul_scalar(0.5)
        }
        Dissimilarity::Euclidean => squared_distances(moving, reference).sqrt(),
        Dissimilarity::SquareEuclidean => squared_distances(moving, reference),
        Dissimilarity::Cosine => cosine(moving, reference),
        Dissimilarity::Label => match transfer {
            Some(t) => moving.matmul(t.clone()).matmul(reference.transpose()),
            // Identity transfer over shared one-hot columns.
            None => moving.matmul(reference.transpose()),
        },
    }
}

/// Row-normalized profiles with a pseudocount.
fn profiles<B: Backend>(x: Tensor<B, 2>) -> Tensor<B, 2> {
    let x = x.add_scalar(KL_PSEUDOCOUNT);
    let total = x.clone().sum_dim(1);
    x / total
}

/// `KL(a_i ‖ b_j) = Σ_g a_ig ln a_ig − Σ_g a_ig ln b_jg`.
fn kl<B: Backend>(a: Tensor<B, 2>, b: Tensor<B, 2>) -> Tensor<B, 2> {
    let a = profiles(a);
    let b = profiles(b);
    let entropy = (a.clone() * a.clone().log()).sum_dim(1); // [N, 1]
    let cross = a.matmul(b.log().transpose()); // [N, M]
    entropy - cross
}

fn cosine<B: Backend>(a: Tensor<B, 2>, b: Tensor<B, 2>) -> Tensor<B, 2> {
    let unit = |x: Tensor<B, 2>| {
        let norm = x.clone().powf_scalar(2.0).sum_dim(1).sqrt().clamp_min(1e-12);
        x / norm
    };
    let sim = unit(a).matmul(unit(b).transpose());
    sim.neg().add_scalar(1.0)
}
