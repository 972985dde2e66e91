//! Conversions between backend tensors and host-side nalgebra matrices.

use burn::tensor::backend::Backend;
use burn::tensor::{ElementConversion, Int, Tensor, TensorData};
use nalgebra::DMatrix;

/// Copy a rank-2 tensor into a host matrix.
pub fn to_matrix<B: Backend>(tensor: Tensor<B, 2>) -> DMatrix<f64> {
    let [rows, cols] = tensor.dims();
    let values: Vec<f64> = tensor.into_data().iter::<f64>().collect();
    DMatrix::from_row_slice(rows, cols, &values)
}

/// Upload a host matrix as a rank-2 tensor.
pub fn from_matrix<B: Backend>(matrix: &DMatrix<f64>, device: &B::Device) -> Tensor<B, 2> {
    let (rows, cols) = matrix.shape();
    // nalgebra is column-major; the transpose's storage is row-major.
    let values: Vec<f64> = matrix.transpose().as_slice().to_vec();
    let data = TensorData::new(values, [rows, cols]).convert::<B::FloatElem>();
    Tensor::from_data(data, device)
}

/// Copy a tensor of any rank into a flat row-major vector.
pub fn to_values<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Vec<f64> {
    tensor.into_data().iter::<f64>().collect()
}

/// Upload a flat vector as a rank-1 tensor.
pub fn from_values<B: Backend>(values: &[f64], device: &B::Device) -> Tensor<B, 1> {
    let data = TensorData::new(values.to_vec(), [values.len()]).convert::<B::FloatElem>();
    Tensor::from_data(data, device)
}

/// Reduce a tensor to its total as an `f64`.
pub fn scalar<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> f64 {
    tensor.sum().into_scalar().elem::<f64>()
}

/// Build an integer index tensor for `select`.
pub fn index_tensor<B: Backend>(indices: &[usize], device: &B::Device) -> Tensor<B, 1, Int> {
    let values: Vec<i64> = indices.iter().map(|&i| i as i64).collect();
    let data = TensorData::new(values, [indices.len()]).convert::<B::IntElem>();
    Tensor::from_data(data, device)
}
