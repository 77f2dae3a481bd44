use glam::DVec2;

use super::*;

fn options(lambda: f64) -> TpsBakeOptions {
    TpsBakeOptions {
        lambda,
        width: 100,
        height: 80,
    }
}

fn baker() -> TpsBaker {
    TpsBaker::new(TpsBakeConfig { map_resolution: 16 })
}

fn scattered_points() -> (Vec<DVec2>, Vec<DVec2>) {
    let a = vec![
        DVec2::new(10.0, 10.0),
        DVec2::new(90.0, 12.0),
        DVec2::new(50.0, 40.0),
        DVec2::new(15.0, 70.0),
        DVec2::new(85.0, 75.0),
        DVec2::new(40.0, 60.0),
        DVec2::new(70.0, 30.0),
    ];
    let b = a
        .iter()
        .enumerate()
        .map(|(i, p)| *p + DVec2::new((i as f64 * 1.3).sin() * 4.0, (i as f64 * 0.7).cos() * 3.0))
        .collect();
    (a, b)
}

#[test]
fn test_exact_at_control_points_without_regularization() {
    let (a, b) = scattered_points();
    let tps = baker().bake(&a, &b, &options(0.0)).unwrap();
    for (pa, pb) in a.iter().zip(&b) {
        let mapped = tps.evaluate(*pa);
        assert!(mapped.distance(*pb) <= 1e-3, "{pa} -> {mapped}, want {pb}");
    }
    assert!(tps.residuals().iter().all(|&r| r <= 1e-3));
}

#[test]
fn test_identity_mapping_has_zero_displacement() {
    let points = [
        DVec2::new(0.0, 0.0),
        DVec2::new(10.0, 0.0),
        DVec2::new(0.0, 10.0),
    ];
    let tps = baker().bake(&points, &points, &options(0.0)).unwrap();

    for p in [
        DVec2::new(5.0, 5.0),
        DVec2::new(-20.0, 40.0),
        DVec2::new(99.0, 79.0),
    ] {
        assert!(tps.displacement_at(p).length() < 1e-9);
    }
    assert!(tps.displacement_field().iter().all(|v| v.abs() < 1e-6));
}

#[test]
fn test_pure_translation_is_captured_by_affine_part() {
    let (a, _) = scattered_points();
    let shift = DVec2::new(3.0, -2.0);
    let b: Vec<DVec2> = a.iter().map(|p| *p + shift).collect();
    let tps = baker().bake(&a, &b, &options(0.0)).unwrap();

    assert!(tps.weights().iter().all(|w| w.abs() < 1e-9));
    let affine = tps.affine();
    assert!((affine[0] - 3.0).abs() < 1e-9);
    assert!((affine[3] + 2.0).abs() < 1e-9);
    let d = tps.displacement_at(DVec2::new(33.0, 44.0));
    assert!(d.distance(shift) < 1e-9);
}

#[test]
fn test_regularization_smooths_instead_of_interpolating() {
    let (a, b) = scattered_points();
    let exact = baker().bake(&a, &b, &options(0.0)).unwrap();
    let smooth = baker().bake(&a, &b, &options(1.0e6)).unwrap();

    let exact_max = exact.residuals().into_iter().fold(0.0, f64::max);
    let smooth_max = smooth.residuals().into_iter().fold(0.0, f64::max);
    assert!(smooth_max > exact_max);
    assert!(smooth_max > 1e-2);
}

#[test]
fn test_weights_are_interleaved() {
    let (a, b) = scattered_points();
    let tps = baker().bake(&a, &b, &options(0.0)).unwrap();
    assert_eq!(tps.weights().len(), 2 * a.len());
    // RBF weights of a TPS sum to zero per axis
    let sum_x: f64 = tps.weights().iter().step_by(2).sum();
    let sum_y: f64 = tps.weights().iter().skip(1).step_by(2).sum();
    assert!(sum_x.abs() < 1e-9);
    assert!(sum_y.abs() < 1e-9);
}

#[test]
fn test_displacement_field_is_lazy_and_matches_evaluation() {
    let (a, b) = scattered_points();
    let tps = baker().bake(&a, &b, &options(0.0)).unwrap();
    assert!(!tps.is_field_materialized());

    let field = tps.displacement_field();
    assert!(tps.is_field_materialized());
    assert_eq!(field.len(), 2 * 16 * 16);

    // Cell (3, 5) center in image space
    let p = DVec2::new(3.5 * 100.0 / 16.0, 5.5 * 80.0 / 16.0);
    let expected = tps.displacement_at(p);
    let i = 2 * (5 * 16 + 3);
    assert!((field[i] as f64 - expected.x).abs() < 1e-4);
    assert!((field[i + 1] as f64 - expected.y).abs() < 1e-4);

    // Second access returns the cached grid
    assert!(std::ptr::eq(field, tps.displacement_field()));
}

#[test]
fn test_rejects_too_few_or_mismatched_points() {
    let two = [DVec2::ZERO, DVec2::X];
    assert!(matches!(
        baker().bake(&two, &two, &options(0.0)),
        Err(BakeError::InsufficientControlPoints { found: 2, .. })
    ));

    let (a, b) = scattered_points();
    assert!(matches!(
        baker().bake(&a, &b[..5], &options(0.0)),
        Err(BakeError::MismatchedControlPoints { a: 7, b: 5 })
    ));
}

#[test]
fn test_rejects_empty_image() {
    let (a, b) = scattered_points();
    let options = TpsBakeOptions {
        lambda: 0.0,
        width: 0,
        height: 10,
    };
    assert!(matches!(
        baker().bake(&a, &b, &options),
        Err(BakeError::InvalidDimensions { .. })
    ));
}

#[test]
fn test_duplicate_control_points_do_not_produce_nan() {
    let a = [
        DVec2::new(0.0, 0.0),
        DVec2::new(0.0, 0.0),
        DVec2::new(10.0, 0.0),
        DVec2::new(0.0, 10.0),
    ];
    let b = [
        DVec2::new(1.0, 1.0),
        DVec2::new(1.0, 1.0),
        DVec2::new(11.0, 1.0),
        DVec2::new(1.0, 11.0),
    ];
    let tps = baker().bake(&a, &b, &options(0.0)).unwrap();
    assert!(tps.displacement_at(DVec2::new(5.0, 5.0)).is_finite());
    assert!(tps.displacement_field().iter().all(|v| v.is_finite()));
}
