use nalgebra::DMatrix;
use spareg_core::PointSet;
use spareg_registration::{align, AlignmentConfig, FeatureLayerConfig, TransformRecord};

fn grid(n: usize) -> DMatrix<f64> {
    DMatrix::from_fn(n * n, 2, |i, j| if j == 0 { (i % n) as f64 } else { (i / n) as f64 })
}

fn features(coords: &DMatrix<f64>) -> DMatrix<f64> {
    DMatrix::from_fn(coords.nrows(), 3, |i, j| {
        let (x, y) = (coords[(i, 0)], coords[(i, 1)]);
        match j {
            0 => x,
            1 => y,
            _ => (0.5 * x).sin() * (0.3 * y).cos(),
        }
    })
}

fn warp(coords: &DMatrix<f64>) -> DMatrix<f64> {
    let (s, c) = 0.4f64.sin_cos();
    DMatrix::from_fn(coords.nrows(), 2, |i, j| {
        let (x, y) = (coords[(i, 0)], coords[(i, 1)]);
        let bend = 0.3 * (0.4 * y).sin();
        let (x, y) = (x + bend, y);
        if j == 0 {
            c * x - s * y + 7.0
        } else {
            s * x + c * y - 2.0
        }
    })
}

fn run(config: AlignmentConfig) -> (DMatrix<f64>, spareg_registration::AlignmentResult) {
    let coords = grid(10);
    let emb = features(&coords);
    let moving = PointSet::new(coords.clone()).with_embedding("emb", emb.clone()).unwrap();
    let reference = PointSet::new(warp(&coords)).with_embedding("emb", emb).unwrap();
    let config = config
        .with_layers(vec![FeatureLayerConfig::embedding("emb")])
        .with_max_iter(90);
    (coords, align(&moving, &reference, config).unwrap())
}

#[test]
fn test_record_reproduces_alignment() {
    let (coords, result) = run(AlignmentConfig::new());
    let applied = result.record.apply(&coords).unwrap();
    assert!((applied - &result.aligned).abs().max() < 1e-2);

    let rigid = result.record.apply_rigid(&coords).unwrap();
    assert!((rigid - &result.rigid_aligned).abs().max() < 1e-2);
}

#[test]
fn test_record_reproduces_keep_size_alignment() {
    let (coords, result) = run(AlignmentConfig::new().with_keep_size(true));
    assert!(result.record.keep_size_factor > 0.0);
    let applied = result.record.apply(&coords).unwrap();
    assert!((applied - &result.aligned).abs().max() < 1e-2);
}

#[test]
fn test_record_survives_json() {
    let (coords, result) = run(AlignmentConfig::new());
    let json = serde_json::to_string(&result.record).unwrap();
    let restored: TransformRecord = serde_json::from_str(&json).unwrap();

    assert_eq!(restored.n_moving, 100);
    assert_eq!(restored.reflection, result.record.reflection);
    assert_eq!(restored.coefficients.shape(), result.record.coefficients.shape());
    let a = result.record.apply(&coords).unwrap();
    let b = restored.apply(&coords).unwrap();
    assert!((a - b).abs().max() < 1e-4);
}

#[test]
fn test_apply_generalizes_to_new_points() {
    let (_, result) = run(AlignmentConfig::new());
    // Cell centres between grid nodes follow the fitted field.
    let between = DMatrix::from_row_slice(3, 2, &[2.5, 2.5, 4.5, 6.5, 7.5, 1.5]);
    let mapped = result.record.apply(&between).unwrap();
    let truth = warp(&between);
    assert!(((mapped - truth).row_iter().map(|r| r.norm()).sum::<f64>() / 3.0) < 1.0);
}
