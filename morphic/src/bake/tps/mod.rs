//! Thin-plate spline (TPS) warp baking.
//!
//! Smooth RBF interpolation from image A control points onto image B:
//!
//! ```text
//! f(x,y) = a0 + a1*x + a2*y + sum_i w_i U(||(x,y) - p_i||)
//! ```
//!
//! where U(r) = r^2 ln(r). The renderer samples a relative displacement
//! grid, `f(p) - p`, so it can scale the warp by progress and amplitude.

#[cfg(test)]
mod tests;

use std::sync::OnceLock;
use std::time::Instant;

use glam::DVec2;
use rayon::prelude::*;

use crate::bake::{check_control_points, check_dimensions};
use crate::config::TpsBakeConfig;
use crate::error::BakeError;
use crate::math::solve_linear_system;

/// Per-bake inputs that come from the plan stage and the image pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TpsBakeOptions {
    /// Regularization added to the kernel diagonal.
    pub lambda: f64,
    /// Image size the displacement grid is laid over.
    pub width: u32,
    pub height: u32,
}

/// A fitted thin-plate spline plus its displacement grid, built on demand.
#[derive(Debug)]
pub struct TpsData {
    control_points_a: Vec<DVec2>,
    control_points_b: Vec<DVec2>,
    /// Interleaved `[wx0, wy0, wx1, wy1, ...]`.
    weights: Vec<f64>,
    /// `[ax0, ax1, ax2, ay0, ay1, ay2]`: `x' = ax0 + ax1*x + ax2*y`.
    affine: [f64; 6],
    map_resolution: usize,
    width: u32,
    height: u32,
    displacement_field: OnceLock<Vec<f32>>,
}

impl TpsData {
    pub fn control_points_a(&self) -> &[DVec2] {
        &self.control_points_a
    }

    pub fn control_points_b(&self) -> &[DVec2] {
        &self.control_points_b
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn affine(&self) -> &[f64; 6] {
        &self.affine
    }

    pub fn map_resolution(&self) -> usize {
        self.map_resolution
    }

    pub fn image_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Map a point in image A to image B.
    pub fn evaluate(&self, p: DVec2) -> DVec2 {
        let a = &self.affine;
        let mut x = a[0] + a[1] * p.x + a[2] * p.y;
        let mut y = a[3] + a[4] * p.x + a[5] * p.y;

        for (i, &cp) in self.control_points_a.iter().enumerate() {
            let u = tps_kernel(p.distance(cp));
            x += self.weights[2 * i] * u;
            y += self.weights[2 * i + 1] * u;
        }
        DVec2::new(x, y)
    }

    /// Relative displacement `f(p) - p`.
    #[inline]
    pub fn displacement_at(&self, p: DVec2) -> DVec2 {
        self.evaluate(p) - p
    }

    /// Row-major `map_resolution^2` grid of interleaved `[dx, dy]`
    /// displacements, sampled at cell centers mapped onto the image.
    ///
    /// Computed on first access and cached.
    pub fn displacement_field(&self) -> &[f32] {
        self.displacement_field.get_or_init(|| {
            let start = Instant::now();
            let res = self.map_resolution;
            let sx = self.width as f64 / res as f64;
            let sy = self.height as f64 / res as f64;
            let mut field = vec![0.0f32; 2 * res * res];
            field.par_chunks_mut(2 * res).enumerate().for_each(|(j, row)| {
                let y = (j as f64 + 0.5) * sy;
                for i in 0..res {
                    let p = DVec2::new((i as f64 + 0.5) * sx, y);
                    let d = self.displacement_at(p);
                    row[2 * i] = d.x as f32;
                    row[2 * i + 1] = d.y as f32;
                }
            });
            tracing::debug!(
                resolution = res,
                elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
                "tps displacement field materialized"
            );
            field
        })
    }

    pub fn is_field_materialized(&self) -> bool {
        self.displacement_field.get().is_some()
    }

    /// Distance between `f(a_i)` and `b_i` for every control point.
    pub fn residuals(&self) -> Vec<f64> {
        self.control_points_a
            .iter()
            .zip(&self.control_points_b)
            .map(|(&a, &b)| self.evaluate(a).distance(b))
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct TpsBaker {
    config: TpsBakeConfig,
}

impl TpsBaker {
    pub fn new(config: TpsBakeConfig) -> Self {
        assert!(
            config.map_resolution >= 2,
            "tps map_resolution must be at least 2"
        );
        Self { config }
    }

    /// Fit the spline mapping `points_a` onto `points_b`.
    pub fn bake(
        &self,
        points_a: &[DVec2],
        points_b: &[DVec2],
        options: &TpsBakeOptions,
    ) -> Result<TpsData, BakeError> {
        check_control_points(points_a, points_b)?;
        check_dimensions(options.width, options.height)?;
        let start = Instant::now();

        // [K + lambda*I  P] [w]   [v]
        // [P^T           0] [a] = [0]
        //
        // K[i][j] = U(||p_i - p_j||), P[i] = [1, x_i, y_i]
        let n = points_a.len();
        let size = n + 3;
        let mut matrix = vec![vec![0.0; size]; size];
        for i in 0..n {
            for j in 0..n {
                matrix[i][j] = if i == j {
                    options.lambda
                } else {
                    tps_kernel(points_a[i].distance(points_a[j]))
                };
            }
            let p = points_a[i];
            matrix[i][n] = 1.0;
            matrix[i][n + 1] = p.x;
            matrix[i][n + 2] = p.y;
            matrix[n][i] = 1.0;
            matrix[n + 1][i] = p.x;
            matrix[n + 2][i] = p.y;
        }

        let mut rhs_x = vec![0.0; size];
        let mut rhs_y = vec![0.0; size];
        for (i, b) in points_b.iter().enumerate() {
            rhs_x[i] = b.x;
            rhs_y[i] = b.y;
        }

        let solution_x = solve_linear_system(&matrix, &rhs_x);
        let solution_y = solve_linear_system(&matrix, &rhs_y);
        if !solution_x.is_exact() || !solution_y.is_exact() {
            tracing::debug!(
                singular_x = solution_x.singular_columns,
                singular_y = solution_y.singular_columns,
                "tps system is singular, affected unknowns left at zero"
            );
        }

        let (x, y) = (&solution_x.x, &solution_y.x);
        let weights = (0..n).flat_map(|i| [x[i], y[i]]).collect();
        let affine = [x[n], x[n + 1], x[n + 2], y[n], y[n + 1], y[n + 2]];

        tracing::debug!(
            control_points = n,
            lambda = options.lambda,
            elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
            "tps baked"
        );

        Ok(TpsData {
            control_points_a: points_a.to_vec(),
            control_points_b: points_b.to_vec(),
            weights,
            affine,
            map_resolution: self.config.map_resolution,
            width: options.width,
            height: options.height,
            displacement_field: OnceLock::new(),
        })
    }
}

/// TPS radial basis function: U(r) = r^2 ln(r), with U(0) = 0.
#[inline]
pub(crate) fn tps_kernel(r: f64) -> f64 {
    if r < 1e-10 { 0.0 } else { r * r * r.ln() }
}
