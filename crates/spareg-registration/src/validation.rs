//! Numerical validation of inputs and loop state.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use nalgebra::DMatrix;
use spareg_core::backend::scalar;

use crate::error::{RegistrationError, Result};

/// Fail when a host matrix holds NaN or infinite entries.
pub fn validate_finite_matrix(name: &str, matrix: &DMatrix<f64>) -> Result<()> {
    if let Some(pos) = matrix.iter().position(|v| !v.is_finite()) {
        let (row, col) = (pos % matrix.nrows(), pos / matrix.nrows());
        return Err(RegistrationError::invalid_configuration(format!(
            "{} contains a non-finite value at ({}, {})",
            name, row, col
        )));
    }
    Ok(())
}

/// Fail when a scalar parameter is NaN or infinite.
pub fn check_scalar(name: &str, value: f64) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(RegistrationError::numerical_degeneracy(format!(
            "{} is {}",
            name, value
        )))
    }
}

/// Fail when a tensor holds NaN or infinite entries.
pub fn check_tensor<B: Backend, const D: usize>(name: &str, tensor: &Tensor<B, D>) -> Result<()> {
    let total = scalar(tensor.clone().abs());
    if total.is_finite() {
        Ok(())
    } else {
        Err(RegistrationError::numerical_degeneracy(format!(
            "{} contains non-finite values",
            name
        )))
    }
}

/// Fail unless `value` is finite and strictly positive.
pub fn validate_positive(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(RegistrationError::invalid_configuration(format!(
            "{} must be positive, got {}",
            name, value
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_finite_matrix() {
        let ok = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 3.0, 4.0]);
        assert!(validate_finite_matrix("coords", &ok).is_ok());

        let bad = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, f64::NAN, 4.0]);
        let err = validate_finite_matrix("coords", &bad).unwrap_err();
        assert!(err.to_string().contains("(1, 0)"));
        assert!(err.is_configuration_error());
    }

    #[test]
    fn test_scalar_and_tensor_checks() {
        assert!(check_scalar("sigma2", 0.1).is_ok());
        assert!(matches!(
            check_scalar("sigma2", f64::NAN),
            Err(RegistrationError::NumericalDegeneracy(_))
        ));

        let device = Default::default();
        let good = Tensor::<TestBackend, 2>::from_floats([[1.0, -2.0]], &device);
        assert!(check_tensor("P", &good).is_ok());
        let bad = Tensor::<TestBackend, 1>::from_floats([1.0, f32::INFINITY], &device);
        assert!(check_tensor("alpha", &bad).is_err());
    }

    #[test]
    fn test_validate_positive() {
        assert!(validate_positive("beta", 0.01).is_ok());
        assert!(validate_positive("beta", 0.0).is_err());
        assert!(validate_positive("beta", f64::INFINITY).is_err());
    }
}
