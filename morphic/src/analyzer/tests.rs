use std::sync::Arc;

use glam::DVec2;

use super::*;
use crate::testing::{
    FakeVision, grid_matches, init_tracing, shifted_image, solid_image, textured_image,
};
use crate::vision::NativeVision;

fn analyzer(vision: FakeVision) -> ImageAnalyzer {
    ImageAnalyzer::new(AnalyzerConfig::default(), Arc::new(vision))
}

fn assert_dvec2_near(actual: DVec2, expected: DVec2, tolerance: f64) {
    assert!(
        actual.distance(expected) <= tolerance,
        "expected {expected}, got {actual}"
    );
}

#[test]
fn test_unavailable_vision_gives_neutral_report() {
    init_tracing();
    let image = textured_image(64, 64, 1);
    let report = analyzer(FakeVision::unavailable()).analyze(&image, &image);

    assert!(report.degraded);
    assert_eq!(report.inlier_ratio, 0.0);
    assert_eq!(report.coverage_score, 0.0);
    assert_eq!(report.edge_overlap, 0.0);
    assert_eq!(report.histogram_distance, 0.5);
    assert!(report.homography.is_none());
    assert!(report.correspondences.is_empty());
    assert_eq!(report.coverage_heatmap.len(), 64);
}

#[test]
fn test_good_matches_are_best_fifteen_percent() {
    // 10x10 grid: 100 matches, 15 good
    let vision = FakeVision {
        matches: grid_matches(10, 10, 5.0, DVec2::ZERO),
        inliers: Some(12),
        ..Default::default()
    };
    let image = textured_image(64, 64, 2);
    let report = analyzer(vision).analyze(&image, &image);

    assert!(!report.degraded);
    assert_eq!(report.total_matches, 100);
    assert_eq!(report.good_match_count, 15);
    assert_eq!(report.match_count, 12);
    assert!((report.inlier_ratio - 0.12).abs() < 1e-12);
    assert_eq!(report.correspondences.len(), 12);
    assert!(report.homography.is_some());
}

#[test]
fn test_good_matches_capped_at_fifty() {
    let vision = FakeVision {
        matches: grid_matches(20, 20, 3.0, DVec2::ZERO),
        ..Default::default()
    };
    let image = textured_image(64, 64, 2);
    let report = analyzer(vision).analyze(&image, &image);
    assert_eq!(report.total_matches, 400);
    assert_eq!(report.good_match_count, 50);
}

#[test]
fn test_good_match_ratio_basis() {
    let vision = FakeVision {
        matches: grid_matches(10, 10, 5.0, DVec2::ZERO),
        inliers: Some(12),
        ..Default::default()
    };
    let config = AnalyzerConfig {
        inlier_ratio_basis: InlierRatioBasis::GoodMatches,
        ..Default::default()
    };
    let image = textured_image(64, 64, 2);
    let report = ImageAnalyzer::new(config, Arc::new(vision)).analyze(&image, &image);
    assert!((report.inlier_ratio - 12.0 / 15.0).abs() < 1e-12);
}

#[test]
fn test_all_matches_basis_caps_ratio_at_good_fraction() {
    // Every good match is an inlier, yet the ratio stays at 15/100
    let vision = FakeVision {
        matches: grid_matches(10, 10, 5.0, DVec2::ZERO),
        inliers: Some(usize::MAX),
        ..Default::default()
    };
    let image = textured_image(64, 64, 2);
    let report = analyzer(vision).analyze(&image, &image);
    assert_eq!(report.match_count, 15);
    assert!((report.inlier_ratio - 0.15).abs() < 1e-12);
    assert!(report.inlier_ratio < crate::config::PlannerConfig::default().moderate_inlier_ratio);
}

#[test]
fn test_fewer_than_four_good_matches_skip_homography() {
    // 20 matches -> 3 good
    let vision = FakeVision {
        matches: grid_matches(5, 4, 8.0, DVec2::ZERO),
        inliers: Some(3),
        ..Default::default()
    };
    let image = textured_image(64, 64, 4);
    let report = analyzer(vision).analyze(&image, &image);

    assert_eq!(report.good_match_count, 3);
    assert!(report.homography.is_none());
    assert_eq!(report.match_count, 0);
    assert_eq!(report.inlier_ratio, 0.0);
    // Good matches still serve as control points
    assert_eq!(report.correspondences.len(), 3);
}

#[test]
fn test_reprojection_error_over_inliers() {
    let vision = FakeVision {
        matches: grid_matches(10, 10, 5.0, DVec2::new(3.0, 4.0)),
        inliers: Some(15),
        homography: Some(Homography::identity()),
        ..Default::default()
    };
    let image = textured_image(64, 64, 5);
    let report = analyzer(vision).analyze(&image, &image);
    assert!((report.avg_reprojection_error - 5.0).abs() < 1e-9);
}

#[test]
fn test_correspondences_scaled_to_full_resolution() {
    let vision = FakeVision {
        matches: grid_matches(10, 10, 10.0, DVec2::new(2.0, 0.0)),
        inliers: Some(15),
        ..Default::default()
    };
    // 512 px long edge analyzed at 256: scale 0.5
    let a = textured_image(512, 256, 6);
    let b = textured_image(512, 256, 7);
    let report = analyzer(vision).analyze(&a, &b);

    assert!(!report.correspondences.is_empty());
    for c in &report.correspondences {
        assert_dvec2_near(c.b - c.a, DVec2::new(4.0, 0.0), 1e-9);
    }
    let first = report.correspondences[0];
    assert_dvec2_near(first.a, DVec2::new(20.0, 20.0), 1e-9);
}

#[test]
fn test_identical_images_have_zero_histogram_distance() {
    let vision = FakeVision::default();
    let image = textured_image(80, 60, 8);
    let report = analyzer(vision).analyze(&image, &image);
    assert_eq!(report.histogram_distance, 0.0);
    // Fake gradient is the image itself
    assert!((report.edge_overlap - 1.0).abs() < 1e-9);
    assert_eq!(report.coverage_score, 0.0);
}

#[test]
fn test_histogram_distance_symmetric() {
    let a = textured_image(64, 64, 9);
    let b = solid_image(64, 64, [200, 30, 30, 255]);
    let analyzer = analyzer(FakeVision::default());
    let ab = analyzer.analyze(&a, &b).histogram_distance;
    let ba = analyzer.analyze(&b, &a).histogram_distance;
    assert!((ab - ba).abs() < 1e-12);
    assert!(ab > 0.0 && ab <= 2.0 / 16.0);
}

#[test]
fn test_color_disjoint_pair_without_matches_plans_similar_color() {
    use crate::config::PlannerConfig;
    use crate::planner::{MorphMode, MorphPlanner, Regime};

    let black = solid_image(64, 64, [0, 0, 0, 255]);
    let white = solid_image(64, 64, [255, 255, 255, 255]);
    let report = analyzer(FakeVision::default()).analyze(&black, &white);

    assert!(!report.degraded);
    assert_eq!(report.total_matches, 0);
    assert!((report.histogram_distance - 0.125).abs() < 1e-12);

    let plan = MorphPlanner::new(PlannerConfig::default()).plan(&report);
    assert_eq!(plan.regime, Regime::SimilarColor);
    assert_eq!(plan.modes(), vec![MorphMode::Tps, MorphMode::Crossfade]);
}

#[test]
fn test_mismatched_inlier_mask_degrades() {
    struct ShortMask;
    impl VisionPrimitives for ShortMask {
        fn detect_and_match(
            &self,
            _a: &Plane,
            _b: &Plane,
            _max_features: usize,
        ) -> Result<Vec<FeatureMatch>, VisionError> {
            Ok(grid_matches(10, 10, 5.0, DVec2::ZERO))
        }
        fn fit_homography(
            &self,
            _src: &[DVec2],
            _dst: &[DVec2],
            _threshold: f64,
        ) -> Result<Option<crate::vision::HomographyFit>, VisionError> {
            Ok(Some(crate::vision::HomographyFit {
                homography: Homography::identity(),
                inlier_mask: vec![true; 2],
            }))
        }
        fn gradient_magnitude(&self, image: &Plane) -> Result<Plane, VisionError> {
            Ok(image.clone())
        }
        fn dense_optical_flow(
            &self,
            a: &Plane,
            _b: &Plane,
            _params: &crate::vision::FlowParams,
        ) -> Result<crate::vision::FlowField, VisionError> {
            Ok(crate::vision::FlowField::zeros(a.width(), a.height()))
        }
    }

    let image = textured_image(32, 32, 1);
    let report =
        ImageAnalyzer::new(AnalyzerConfig::default(), Arc::new(ShortMask)).analyze(&image, &image);
    assert!(report.degraded);
}

#[test]
fn test_native_analysis_of_shifted_pair() {
    init_tracing();
    let a = textured_image(200, 160, 21);
    let b = shifted_image(&a, 6, -4);
    let analyzer = ImageAnalyzer::new(AnalyzerConfig::default(), Arc::new(NativeVision::default()));
    let report = analyzer.analyze(&a, &b);

    assert!(!report.degraded);
    assert!(report.total_matches >= 30, "{} matches", report.total_matches);
    let h = report.homography.expect("homography should be fitted");
    let p = h.project(DVec2::new(100.0, 80.0)).unwrap();
    assert_dvec2_near(p, DVec2::new(106.0, 76.0), 1.0);
    assert!(report.avg_reprojection_error < 1.0);
    assert!((0.0..=1.0).contains(&report.edge_overlap));
    assert!(report.histogram_distance < 0.1);
    for c in &report.correspondences {
        assert_dvec2_near(c.b - c.a, DVec2::new(6.0, -4.0), 3.0);
    }
}
