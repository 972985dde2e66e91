//! Chained transform implementation.
//!
//! T(x) = T2(T1(x))

use std::marker::PhantomData;

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use super::trait_::Transform;

/// Chained Transform (T2 after T1).
///
/// Used to wrap a transform estimated in normalized coordinates between the
/// moving set's normalization and the reference set's denormalization.
#[derive(Debug, Clone)]
pub struct ChainedTransform<B: Backend, T1, T2> {
    pub first: T1,
    pub second: T2,
    _phantom: PhantomData<B>,
}

impl<B: Backend, T1, T2> ChainedTransform<B, T1, T2> {
    pub fn new(first: T1, second: T2) -> Self {
        Self {
            first,
            second,
            _phantom: PhantomData,
        }
    }
}

impl<B: Backend, T1, T2> Transform<B> for ChainedTransform<B, T1, T2>
where
    T1: Transform<B>,
    T2: Transform<B>,
{
    fn dim(&self) -> usize {
        self.second.dim()
    }

    fn transform_points(&self, points: Tensor<B, 2>) -> Tensor<B, 2> {
        let intermediate = self.first.transform_points(points);
        self.second.transform_points(intermediate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::bridge::to_values;
    use crate::transform::{RigidTransform, ScaleShiftTransform};
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_chained_transform_order() {
        let device = Default::default();

        // T1: rotate 90 degrees, T2: double
        let rotation = Tensor::<TestBackend, 2>::from_floats([[0.0, -1.0], [1.0, 0.0]], &device);
        let t1 = RigidTransform::new(rotation, Tensor::from_floats([1.0, 0.0], &device));
        let t2 = ScaleShiftTransform::<TestBackend>::scaling(2.0, 2, &device);
        let chain = ChainedTransform::new(t1, t2);

        // [1, 0] -> [0, 1] + [1, 0] = [1, 1] -> [2, 2]
        let points = Tensor::<TestBackend, 2>::from_floats([[1.0, 0.0]], &device);
        let out = to_values(chain.transform_points(points));
        assert!((out[0] - 2.0).abs() < 1e-6);
        assert!((out[1] - 2.0).abs() < 1e-6);
    }
}
