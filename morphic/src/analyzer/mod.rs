//! Image-pair similarity analysis.
//!
//! [`ImageAnalyzer::analyze`] turns two images into a [`SimilarityReport`]:
//! how many features match, how well a homography explains them, where the
//! matches are, how well the edges line up and how close the colors are.
//! Vision failures never escape; they produce a neutral, degraded report.

pub mod metrics;

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Instant;

use glam::DVec2;
use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::config::{AnalyzerConfig, InlierRatioBasis};
use crate::error::VisionError;
use crate::math::Homography;
use crate::plane::{Plane, downscale_rgba};
use crate::vision::{self, FeatureMatch, VisionPrimitives};

/// Histogram distance reported when nothing could be measured.
pub const NEUTRAL_HISTOGRAM_DISTANCE: f64 = 0.5;

/// A control-point pair in full-resolution pixel coordinates of image A and
/// image B respectively.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Correspondence {
    pub a: DVec2,
    pub b: DVec2,
}

/// Similarity and alignment metrics for one image pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityReport {
    /// Matches consistent with the fitted homography (the inlier count).
    pub match_count: usize,
    /// Every match returned by the matcher, not just the good subset.
    pub total_matches: usize,
    /// Best-distance matches kept for fitting.
    pub good_match_count: usize,
    pub inlier_ratio: f64,
    pub homography: Option<Homography>,
    /// Mean inlier reprojection error in analysis-space pixels.
    pub avg_reprojection_error: f64,
    /// Row-major `heatmap_size x heatmap_size` match density in [0, 1].
    pub coverage_heatmap: Vec<f32>,
    pub heatmap_size: usize,
    /// Fraction of non-empty heatmap cells.
    pub coverage_score: f64,
    pub edge_overlap: f64,
    /// 0 for identical color distributions, 1 for disjoint ones.
    pub histogram_distance: f64,
    /// Control points for the warping bakers: the homography inliers, or the
    /// good matches when no homography was fitted.
    pub correspondences: Vec<Correspondence>,
    /// Set when the vision primitives failed and the metrics are neutral.
    pub degraded: bool,
}

impl SimilarityReport {
    /// Report for a pair that could not be analyzed: "insufficient signal".
    pub fn neutral(heatmap_size: usize) -> Self {
        Self {
            match_count: 0,
            total_matches: 0,
            good_match_count: 0,
            inlier_ratio: 0.0,
            homography: None,
            avg_reprojection_error: 0.0,
            coverage_heatmap: vec![0.0; heatmap_size * heatmap_size],
            heatmap_size,
            coverage_score: 0.0,
            edge_overlap: 0.0,
            histogram_distance: NEUTRAL_HISTOGRAM_DISTANCE,
            correspondences: Vec::new(),
            degraded: true,
        }
    }

    pub fn inlier_count(&self) -> usize {
        self.match_count
    }

    /// Control points in image A and image B, in matching order.
    pub fn control_points(&self) -> (Vec<DVec2>, Vec<DVec2>) {
        self.correspondences.iter().map(|c| (c.a, c.b)).unzip()
    }
}

/// Runs the analysis pipeline on top of a [`VisionPrimitives`] backend.
pub struct ImageAnalyzer {
    config: AnalyzerConfig,
    vision: Arc<dyn VisionPrimitives>,
}

impl ImageAnalyzer {
    pub fn new(config: AnalyzerConfig, vision: Arc<dyn VisionPrimitives>) -> Self {
        config.validate();
        Self { config, vision }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Analyze an image pair. Never fails; see [`SimilarityReport::degraded`].
    pub fn analyze(&self, a: &RgbaImage, b: &RgbaImage) -> SimilarityReport {
        let start = Instant::now();
        match self.try_analyze(a, b) {
            Ok(report) => {
                tracing::debug!(
                    total_matches = report.total_matches,
                    good_matches = report.good_match_count,
                    inliers = report.match_count,
                    inlier_ratio = report.inlier_ratio,
                    coverage = report.coverage_score,
                    edge_overlap = report.edge_overlap,
                    histogram_distance = report.histogram_distance,
                    elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "image pair analyzed"
                );
                report
            }
            Err(err) => {
                tracing::warn!(error = %err, "vision primitives failed, using neutral report");
                SimilarityReport::neutral(self.config.heatmap_size)
            }
        }
    }

    fn try_analyze(&self, a: &RgbaImage, b: &RgbaImage) -> Result<SimilarityReport, VisionError> {
        let config = &self.config;
        if a.width() == 0 || a.height() == 0 || b.width() == 0 || b.height() == 0 {
            return Err(VisionError::InvalidInput("empty image".to_string()));
        }

        let ((small_a, scale_a), (small_b, scale_b)) = rayon::join(
            || downscale_rgba(a, config.target_res),
            || downscale_rgba(b, config.target_res),
        );
        let gray_a = Plane::from_rgba_luma(&small_a);
        let gray_b = Plane::from_rgba_luma(&small_b);

        let mut matches = self
            .vision
            .detect_and_match(&gray_a, &gray_b, config.max_features)?;
        vision::check_matches(&matches)?;
        let total_matches = matches.len();

        matches.sort_by(|x, y| x.distance.total_cmp(&y.distance));
        let good_count = ((total_matches as f64 * config.good_match_fraction).floor() as usize)
            .min(config.max_good_matches);
        matches.truncate(good_count);
        let good = matches;

        let alignment = self.fit_alignment(&good, total_matches)?;

        let good_src: Vec<DVec2> = good.iter().map(|m| m.src).collect();
        let (coverage_heatmap, coverage_score) = metrics::coverage_heatmap(
            &good_src,
            gray_a.width(),
            gray_a.height(),
            config.heatmap_size,
        );

        let gradient_a = self.vision.gradient_magnitude(&gray_a)?;
        let gradient_b = self.vision.gradient_magnitude(&gray_b)?;
        if gradient_a.len() != gray_a.len() || gradient_b.len() != gray_b.len() {
            return Err(VisionError::InvalidInput(
                "gradient field size differs from its image".to_string(),
            ));
        }
        let edge_overlap = metrics::edge_overlap(&gradient_a, &gradient_b);

        let histogram_distance =
            metrics::histogram_distance(&small_a, &small_b, config.histogram_bins);

        let to_full = |m: &FeatureMatch| Correspondence {
            a: m.src / scale_a,
            b: m.dst / scale_b,
        };
        let correspondences = match &alignment.inlier_mask {
            Some(mask) => good
                .iter()
                .zip(mask)
                .filter(|&(_, &inlier)| inlier)
                .map(|(m, _)| to_full(m))
                .collect(),
            None => good.iter().map(to_full).collect(),
        };

        Ok(SimilarityReport {
            match_count: alignment.inliers,
            total_matches,
            good_match_count: good.len(),
            inlier_ratio: alignment.inlier_ratio,
            homography: alignment.homography,
            avg_reprojection_error: alignment.avg_reprojection_error,
            coverage_heatmap,
            heatmap_size: config.heatmap_size,
            coverage_score,
            edge_overlap,
            histogram_distance,
            correspondences,
            degraded: false,
        })
    }

    fn fit_alignment(
        &self,
        good: &[FeatureMatch],
        total_matches: usize,
    ) -> Result<Alignment, VisionError> {
        if good.len() < self.config.min_homography_matches {
            return Ok(Alignment::default());
        }

        let src: Vec<DVec2> = good.iter().map(|m| m.src).collect();
        let dst: Vec<DVec2> = good.iter().map(|m| m.dst).collect();
        let Some(fit) = self
            .vision
            .fit_homography(&src, &dst, self.config.ransac_threshold)?
        else {
            return Ok(Alignment::default());
        };

        if fit.inlier_mask.len() != good.len() {
            return Err(VisionError::InvalidInput(format!(
                "inlier mask has {} entries for {} matches",
                fit.inlier_mask.len(),
                good.len()
            )));
        }
        if !fit.homography.is_finite() {
            return Err(VisionError::InvalidInput(
                "homography has non-finite entries".to_string(),
            ));
        }

        let (inlier_src, inlier_dst): (Vec<DVec2>, Vec<DVec2>) = src
            .iter()
            .zip(&dst)
            .zip(&fit.inlier_mask)
            .filter(|&(_, &inlier)| inlier)
            .map(|((s, d), _)| (*s, *d))
            .unzip();
        let inliers = inlier_src.len();

        let denominator = match self.config.inlier_ratio_basis {
            InlierRatioBasis::AllMatches => total_matches,
            InlierRatioBasis::GoodMatches => good.len(),
        };
        let inlier_ratio = if denominator == 0 {
            0.0
        } else {
            inliers as f64 / denominator as f64
        };

        Ok(Alignment {
            inliers,
            inlier_ratio,
            avg_reprojection_error: metrics::average_reprojection_error(
                &fit.homography,
                &inlier_src,
                &inlier_dst,
            ),
            homography: Some(fit.homography),
            inlier_mask: Some(fit.inlier_mask),
        })
    }
}

#[derive(Debug, Default)]
struct Alignment {
    inliers: usize,
    inlier_ratio: f64,
    avg_reprojection_error: f64,
    homography: Option<Homography>,
    inlier_mask: Option<Vec<bool>>,
}
