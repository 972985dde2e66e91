//! Backend-generic tensor kernels shared by the registration engine.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// Pairwise squared euclidean distances between the rows of `x` `[N, D]`
/// and `y` `[M, D]`, returned as `[N, M]`.
pub fn squared_distances<B: Backend>(x: Tensor<B, 2>, y: Tensor<B, 2>) -> Tensor<B, 2> {
    let x_norm = x.clone().powf_scalar(2.0).sum_dim(1); // [N, 1]
    let y_norm = y.clone().powf_scalar(2.0).sum_dim(1).transpose(); // [1, M]
    let cross = x.matmul(y.transpose());

    (x_norm + y_norm - cross.mul_scalar(2.0)).clamp_min(0.0)
}

/// Multiply row `i` of `m` `[N, K]` by `w[i]`.
pub fn scale_rows<B: Backend>(m: Tensor<B, 2>, w: Tensor<B, 1>) -> Tensor<B, 2> {
    m * w.unsqueeze_dim::<2>(1)
}

const DIGAMMA_SHIFT: usize = 6;

/// Digamma function ψ(x) for x > 0.
pub fn digamma_scalar(x: f64) -> f64 {
    let mut z = x;
    let mut acc = 0.0;
    for _ in 0..DIGAMMA_SHIFT {
        acc -= 1.0 / z;
        z += 1.0;
    }
    let inv2 = 1.0 / (z * z);
    acc + z.ln() - 0.5 / z - inv2 * (1.0 / 12.0 - inv2 * (1.0 / 120.0 - inv2 / 252.0))
}

/// Elementwise digamma ψ(x) for a tensor of positive values.
pub fn digamma<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    let mut z = x;
    let mut acc = z.zeros_like();
    for _ in 0..DIGAMMA_SHIFT {
        acc = acc - z.clone().recip();
        z = z.add_scalar(1.0);
    }
    let inv = z.clone().recip();
    let inv2 = inv.clone().powf_scalar(2.0);
    let series = inv2
        .clone()
        .mul(
            inv2.clone()
                .mul(inv2.clone().div_scalar(-252.0).add_scalar(1.0 / 120.0))
                .neg()
                .add_scalar(1.0 / 12.0),
        );
    acc + z.log() - inv.mul_scalar(0.5) - series
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::bridge::to_values;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    const EULER_MASCHERONI: f64 = 0.577_215_664_901_532_9;

    #[test]
    fn test_squared_distances() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 2>::from_floats([[0.0, 0.0], [1.0, 1.0]], &device);
        let y = Tensor::<TestBackend, 2>::from_floats([[0.0, 0.0], [3.0, 4.0]], &device);
        let d = to_values(squared_distances(x, y));
        let expected = [0.0, 25.0, 2.0, 13.0];
        for (a, b) in d.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-5, "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_digamma_scalar_known_values() {
        assert!((digamma_scalar(1.0) + EULER_MASCHERONI).abs() < 1e-8);
        let half = -EULER_MASCHERONI - 2.0 * std::f64::consts::LN_2;
        assert!((digamma_scalar(0.5) - half).abs() < 1e-8);
    }

    #[test]
    fn test_digamma_tensor_matches_scalar() {
        let device = Default::default();
        let xs = [0.3, 1.0, 2.5, 40.0, 1000.0];
        let t = Tensor::<TestBackend, 1>::from_floats(xs, &device);
        let out = to_values(digamma(t));
        for (x, y) in xs.iter().zip(out.iter()) {
            let expected = digamma_scalar(*x);
            assert!((expected - y).abs() < 1e-4 * expected.abs().max(1.0), "psi({})", x);
        }
    }

    #[test]
    fn test_scale_rows() {
        let device = Default::default();
        let m = Tensor::<TestBackend, 2>::from_floats([[1.0, 1.0], [2.0, 2.0]], &device);
        let w = Tensor::<TestBackend, 1>::from_floats([3.0, 0.5], &device);
        assert_eq!(to_values(scale_rows(m, w)), vec![3.0, 3.0, 1.0, 1.0]);
    }
}
