use std::sync::Arc;

use nalgebra::DMatrix;
use spareg_core::backend::CpuBackend;
use spareg_core::PointSet;
use spareg_registration::{
    align, AlignmentConfig, FeatureLayerConfig, GuidanceConfig, GuidanceEffect, HistoryCallback, Registration,
    RegistrationError,
};

fn grid(nx: usize, ny: usize) -> DMatrix<f64> {
    DMatrix::from_fn(nx * ny, 2, |i, j| if j == 0 { (i % nx) as f64 } else { (i / nx) as f64 })
}

/// Position-dependent features that stay attached to each cell.
fn features(coords: &DMatrix<f64>) -> DMatrix<f64> {
    DMatrix::from_fn(coords.nrows(), 4, |i, j| {
        let (x, y) = (coords[(i, 0)], coords[(i, 1)]);
        match j {
            0 => x,
            1 => y,
            2 => (0.6 * x).sin() + (0.4 * y).cos(),
            _ => 0.1 * x * y,
        }
    })
}

fn rotate(coords: &DMatrix<f64>, theta: f64, shift: [f64; 2]) -> DMatrix<f64> {
    let (s, c) = theta.sin_cos();
    let r = DMatrix::from_row_slice(2, 2, &[c, -s, s, c]);
    let mut out = coords * r.transpose();
    for mut row in out.row_iter_mut() {
        row[0] += shift[0];
        row[1] += shift[1];
    }
    out
}

fn point_set(coords: &DMatrix<f64>, emb: &DMatrix<f64>) -> PointSet {
    PointSet::new(coords.clone()).with_embedding("emb", emb.clone()).unwrap()
}

fn config() -> AlignmentConfig {
    AlignmentConfig::new()
        .with_layers(vec![FeatureLayerConfig::embedding("emb")])
        .with_max_iter(60)
}

fn mean_error(a: &DMatrix<f64>, b: &DMatrix<f64>) -> f64 {
    (a - b).row_iter().map(|r| r.norm()).sum::<f64>() / a.nrows() as f64
}

#[test]
fn test_identical_sets_stay_in_place() {
    let coords = grid(12, 12);
    let emb = features(&coords);
    let set = point_set(&coords, &emb);

    let result = align(&set, &set, config()).unwrap();

    assert_eq!(result.aligned.shape(), (144, 2));
    assert_eq!(result.assignment.shape(), (144, 144));
    assert!(mean_error(&result.aligned, &coords) < 0.15);
    assert!(mean_error(&result.rigid_aligned, &coords) < 0.15);

    let (a, b) = result.record.rigid_affine();
    assert!((a - DMatrix::<f64>::identity(2, 2)).abs().max() < 0.05);
    assert!(b.iter().all(|v| v.abs() < 0.5), "translation {:?}", b);
    // Nothing to deform: the non-rigid displacement stays near zero.
    assert!(mean_error(&result.aligned, &result.rigid_component) < 0.15);

    let diagonal = (0..144).filter(|&j| result.assignment.row(j).transpose().argmax().0 == j).count();
    assert!(diagonal >= 130, "only {} reference points matched their copy", diagonal);
    assert!(result.assignment.iter().all(|&p| p >= 0.0));
}

#[test]
fn test_recovers_rotation_and_translation() {
    let coords = grid(12, 12);
    let emb = features(&coords);
    let target = rotate(&coords, 0.5, [20.0, -5.0]);

    let result = align(&point_set(&coords, &emb), &point_set(&target, &emb), config()).unwrap();

    assert!(mean_error(&result.aligned, &target) < 0.5);
    assert!(mean_error(&result.rigid_aligned, &target) < 0.5);

    let (a, b) = result.record.rigid_affine();
    let (s, c) = 0.5f64.sin_cos();
    let expected = DMatrix::from_row_slice(2, 2, &[c, -s, s, c]);
    assert!((a - expected).abs().max() < 0.1);
    assert!((b[0] - 20.0).abs() < 1.0, "translation {:?}", b);
    assert!((b[1] + 5.0).abs() < 1.0, "translation {:?}", b);
    assert!(!result.record.reflection);
}

#[test]
fn test_mini_batch_updates_recover_rotation() {
    let coords = grid(25, 25);
    let emb = features(&coords);
    let target = rotate(&coords, 0.2, [1.0, -2.0]);
    let moving = point_set(&coords, &emb);
    let reference = point_set(&target, &emb);

    let batched = config().with_svi(true, 100);
    let result = align(&moving, &reference, batched.clone()).unwrap();
    assert_eq!(result.assignment.shape(), (625, 625));
    assert!(mean_error(&result.aligned, &target) < 0.5);

    let chunked = align(&moving, &reference, batched.with_chunk(3e-7)).unwrap();
    assert!(mean_error(&chunked.aligned, &target) < 0.5);
}

#[test]
fn test_allow_flip_recovers_mirrored_section() {
    let coords = grid(12, 12);
    let emb = features(&coords);
    let mut mirrored = coords.clone();
    for mut row in mirrored.row_iter_mut() {
        row[1] = -row[1];
    }

    let result = align(
        &point_set(&coords, &emb),
        &point_set(&mirrored, &emb),
        config().with_allow_flip(true),
    )
    .unwrap();

    assert!(result.record.reflection);
    let (a, _) = result.record.rigid_affine();
    assert!(a.determinant() < 0.0);
    assert!(mean_error(&result.aligned, &mirrored) < 0.25);
}

#[test]
fn test_guidance_pairs_are_honoured() {
    let coords = grid(12, 12);
    let emb = features(&coords);
    let target = rotate(&coords, 0.3, [4.0, 2.0]);
    let anchors = [0usize, 11, 132, 143, 66];
    let guidance = GuidanceConfig {
        moving: coords.select_rows(anchors.iter()),
        reference: target.select_rows(anchors.iter()),
        effect: GuidanceEffect::Both,
        epsilon: 1.0,
    };

    let result = align(
        &point_set(&coords, &emb),
        &point_set(&target, &emb),
        config().with_guidance(guidance.clone()),
    )
    .unwrap();

    assert!(mean_error(&result.aligned, &target) < 0.25);
    let mapped = result.record.apply(&guidance.moving).unwrap();
    assert!(mean_error(&mapped, &guidance.reference) < 0.5);
}

#[test]
fn test_default_expression_layer_aligns() {
    let coords = grid(12, 12);
    let centers = [[1.0, 2.0], [9.0, 1.0], [4.0, 9.0], [10.0, 8.0], [6.0, 5.0], [2.0, 11.0]];
    let expression = DMatrix::from_fn(coords.nrows(), centers.len(), |i, g| {
        let dx = coords[(i, 0)] - centers[g][0];
        let dy = coords[(i, 1)] - centers[g][1];
        10.0 * (-(dx * dx + dy * dy) / 12.0).exp()
    });
    let genes: Vec<String> = (0..centers.len()).map(|g| format!("g{}", g)).collect();
    let target = rotate(&coords, 0.2, [3.0, -1.0]);
    let section = |c: &DMatrix<f64>| {
        PointSet::new(c.clone())
            .with_feature_names(genes.clone())
            .unwrap()
            .with_layer("X", expression.clone())
            .unwrap()
    };

    let result = align(&section(&coords), &section(&target), AlignmentConfig::new().with_max_iter(60)).unwrap();

    assert!(mean_error(&result.aligned, &target) < 0.5);
    assert!(!result.record.reflection);
}

#[test]
fn test_partial_overlap_lowers_inlier_fraction() {
    let coords = grid(15, 10);
    let emb = features(&coords);
    // Reference keeps the left 10 columns only.
    let keep: Vec<usize> = (0..coords.nrows()).filter(|&i| coords[(i, 0)] < 10.0).collect();
    let sub = coords.select_rows(keep.iter());
    let target = rotate(&sub, 0.3, [3.0, 1.0]);

    let result = align(
        &point_set(&coords, &emb),
        &point_set(&target, &emb.select_rows(keep.iter())),
        config(),
    )
    .unwrap();

    assert_eq!(result.assignment.shape(), (100, 150));
    assert!(result.gamma < 0.9);
    assert!(result.gamma >= 0.01);
    let overlap = result.aligned.select_rows(keep.iter());
    assert!(mean_error(&overlap, &target) < 1.0);
}

#[test]
fn test_chunked_assignment_matches_single_pass() {
    let coords = grid(10, 10);
    let emb = features(&coords);
    let target = rotate(&coords, 0.2, [1.0, 2.0]);
    let moving = point_set(&coords, &emb);
    let reference = point_set(&target, &emb);

    let base = config().with_svi(false, 1000).with_max_iter(30);
    let single = align(&moving, &reference, base.clone()).unwrap();
    let chunked = align(&moving, &reference, base.with_chunk(3e-7)).unwrap();

    assert!((single.aligned - chunked.aligned).abs().max() < 1e-2);
    assert!((single.sigma2 - chunked.sigma2).abs() < 1e-3);
}

#[test]
fn test_runs_are_deterministic() {
    let coords = grid(10, 10);
    let emb = features(&coords);
    let target = rotate(&coords, -0.4, [0.0, 5.0]);
    let moving = point_set(&coords, &emb);
    let reference = point_set(&target, &emb);

    let first = align(&moving, &reference, config().with_seed(7)).unwrap();
    let second = align(&moving, &reference, config().with_seed(7)).unwrap();
    assert!((first.aligned - second.aligned).abs().max() < 1e-9);
}

#[test]
fn test_progress_reports_bounded_parameters() {
    let coords = grid(10, 10);
    let emb = features(&coords);
    let target = rotate(&coords, 0.1, [0.0, 0.0]);
    let history = Arc::new(HistoryCallback::new());

    let device = Default::default();
    Registration::<CpuBackend>::new(config().with_max_iter(25))
        .with_callback(history.clone())
        .execute(&point_set(&coords, &emb), &point_set(&target, &emb), &device)
        .unwrap();

    let records = history.get_history();
    assert_eq!(records.len(), 25);
    for info in &records {
        assert!(info.stats.sigma2 >= 1e-2);
        assert!(info.stats.gamma >= 0.01 && info.stats.gamma <= 0.99);
        assert!(info.stats.step_size > 0.0 && info.stats.step_size <= 1.0);
    }
    let trace = history.sigma2_trace();
    assert_eq!(trace.len(), 25);
    assert!(trace[24] <= trace[0]);
}

#[test]
fn test_iteration_snapshots_are_recorded() {
    let coords = grid(8, 8);
    let emb = features(&coords);
    let set = point_set(&coords, &emb);

    let result = align(&set, &set, config().with_max_iter(10).with_record_iterations(true)).unwrap();
    assert_eq!(result.iterations.len(), 10);
    assert_eq!(result.iterations[9].iteration, 9);
    assert_eq!(result.iterations[9].aligned.shape(), (64, 2));
}

#[test]
fn test_configuration_errors_surface_before_iterating() {
    let coords = grid(5, 5);
    let emb = features(&coords);
    let set = point_set(&coords, &emb);

    let err = align(&set, &set, config().with_spatial_key("missing")).unwrap_err();
    assert!(matches!(err, RegistrationError::MissingKey(_)));

    let err = align(&set, &set, AlignmentConfig::new().with_layers(vec![FeatureLayerConfig::embedding("nope")]))
        .unwrap_err();
    assert!(matches!(err, RegistrationError::MissingKey(_)));

    let err = align(&set, &set, config().with_kernel(-1.0, 10)).unwrap_err();
    assert!(matches!(err, RegistrationError::InvalidConfiguration(_)));

    let flat = point_set(&DMatrix::from_fn(25, 4, |i, j| (i + j) as f64), &emb);
    let err = align(&flat, &flat, config()).unwrap_err();
    assert!(matches!(err, RegistrationError::DimensionMismatch(_)));
    assert!(err.is_configuration_error());

    let mut bad = coords.clone();
    bad[(3, 1)] = f64::NAN;
    let err = align(&point_set(&bad, &emb), &set, config()).unwrap_err();
    assert!(matches!(err, RegistrationError::InvalidConfiguration(_)));
}
