use nalgebra::DMatrix;
use proptest::prelude::*;
use spareg_core::backend::{determinant, digamma_scalar, fit_rotation};

fn matrix_strategy(dim: usize) -> impl Strategy<Value = DMatrix<f64>> {
    prop::collection::vec(-10.0f64..10.0, dim * dim)
        .prop_map(move |values| DMatrix::from_row_slice(dim, dim, &values))
}

fn assert_proper_rotation(r: &DMatrix<f64>) {
    let dim = r.nrows();
    let gram = r.transpose() * r;
    let err = (gram - DMatrix::<f64>::identity(dim, dim)).abs().max();
    assert!(err < 1e-8, "RᵀR deviates from I by {}", err);
    assert!((determinant(r) - 1.0).abs() < 1e-8, "det(R) = {}", determinant(r));
}

proptest! {
    #[test]
    fn test_fit_rotation_2d_is_proper(a in matrix_strategy(2)) {
        prop_assume!(a.abs().max() > 1e-3);
        let r = fit_rotation(&a).unwrap();
        assert_proper_rotation(&r);
    }

    #[test]
    fn test_fit_rotation_3d_is_proper(a in matrix_strategy(3)) {
        prop_assume!(a.abs().max() > 1e-3);
        let r = fit_rotation(&a).unwrap();
        assert_proper_rotation(&r);
    }

    #[test]
    fn test_fit_rotation_recovers_planar_angle(theta in -3.1f64..3.1, s in 0.1f64..10.0) {
        let r = DMatrix::from_row_slice(2, 2, &[theta.cos(), -theta.sin(), theta.sin(), theta.cos()]);
        let fitted = fit_rotation(&(&r * s)).unwrap();
        prop_assert!((fitted - r).abs().max() < 1e-8);
    }

    #[test]
    fn test_digamma_recurrence(x in 0.05f64..200.0) {
        // ψ(x + 1) = ψ(x) + 1/x
        let lhs = digamma_scalar(x + 1.0);
        let rhs = digamma_scalar(x) + 1.0 / x;
        prop_assert!((lhs - rhs).abs() < 1e-7);
    }
}
