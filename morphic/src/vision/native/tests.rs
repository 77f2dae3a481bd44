use glam::DVec2;

use super::*;
use crate::testing::{init_tracing, shifted_image, textured_image};

fn gray(image: &image::RgbaImage) -> Plane {
    Plane::from_rgba_luma(image)
}

#[test]
fn test_translated_image_matches_and_fits() {
    init_tracing();
    let vision = NativeVision::default();
    let a = textured_image(128, 128, 3);
    let b = shifted_image(&a, 5, 3);

    let matches = vision.detect_and_match(&gray(&a), &gray(&b), 300).unwrap();
    assert!(matches.len() >= 20, "only {} matches", matches.len());

    let consistent = matches
        .iter()
        .filter(|m| (m.dst - m.src).distance(DVec2::new(5.0, 3.0)) < 0.5)
        .count();
    assert!(
        consistent * 2 > matches.len(),
        "{consistent} of {} matches follow the shift",
        matches.len()
    );

    let src: Vec<DVec2> = matches.iter().map(|m| m.src).collect();
    let dst: Vec<DVec2> = matches.iter().map(|m| m.dst).collect();
    let fit = vision.fit_homography(&src, &dst, 2.0).unwrap().unwrap();
    assert!(fit.inlier_count() >= consistent);
    let p = fit.homography.project(DVec2::new(64.0, 64.0)).unwrap();
    assert!(p.distance(DVec2::new(69.0, 67.0)) < 0.5, "projected to {p}");
}

#[test]
fn test_matching_is_deterministic() {
    let vision = NativeVision::default();
    let a = gray(&textured_image(96, 80, 11));
    let b = gray(&textured_image(96, 80, 12));
    let first = vision.detect_and_match(&a, &b, 200).unwrap();
    let second = vision.detect_and_match(&a, &b, 200).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_flat_images_yield_no_matches() {
    let vision = NativeVision::default();
    let flat = Plane::new_filled(64, 64, 0.5);
    assert!(vision.detect_and_match(&flat, &flat, 100).unwrap().is_empty());
}

#[test]
fn test_mismatched_point_lists_are_invalid() {
    let vision = NativeVision::default();
    let err = vision
        .fit_homography(&[DVec2::ZERO; 5], &[DVec2::ZERO; 4], 1.0)
        .unwrap_err();
    assert!(matches!(err, VisionError::InvalidInput(_)));
}

#[test]
fn test_flow_size_mismatch_fails() {
    let vision = NativeVision::default();
    let a = Plane::new_filled(16, 16, 0.0);
    let b = Plane::new_filled(16, 8, 0.0);
    let err = vision
        .dense_optical_flow(&a, &b, &FlowParams::default())
        .unwrap_err();
    assert!(matches!(
        err,
        VisionError::Failed {
            primitive: "dense_optical_flow",
            ..
        }
    ));
}

#[test]
#[should_panic(expected = "harris_k")]
fn test_invalid_config_panics() {
    NativeVision::new(NativeVisionConfig {
        harris_k: 0.0,
        ..Default::default()
    });
}
