//! Dense pyramidal Lucas-Kanade.
//!
//! Every pixel solves the 2x2 normal equations of the brightness-constancy
//! constraint over a square window. Window sums are box filters over the
//! gradient products, so the cost does not depend on the feature count.
//! Coarse levels seed the finer ones with a doubled flow estimate.

use glam::Vec2;
use rayon::prelude::*;

use super::gradient::{box_blur, sobel};
use crate::plane::Plane;
use crate::vision::FlowField;

/// Smallest eigenvalue of the structure tensor below which a pixel's
/// window carries too little texture to solve.
const MIN_EIGENVALUE: f32 = 1e-6;

/// Pyramid levels stop once the short edge would fall below this.
const MIN_LEVEL_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct DenseLkParams {
    pub window_radius: usize,
    pub max_levels: usize,
    pub iterations: usize,
}

pub(crate) fn dense_lucas_kanade(a: &Plane, b: &Plane, params: &DenseLkParams) -> FlowField {
    debug_assert_eq!((a.width(), a.height()), (b.width(), b.height()));

    let pyramid_a = build_pyramid(a, params.max_levels);
    let pyramid_b = build_pyramid(b, params.max_levels);

    let mut flow: Option<FlowField> = None;
    for level in (0..pyramid_a.len()).rev() {
        let level_a = &pyramid_a[level];
        let level_b = &pyramid_b[level];
        let mut current = match flow.take() {
            Some(coarse) => upsample_flow(&coarse, level_a.width(), level_a.height()),
            None => FlowField::zeros(level_a.width(), level_a.height()),
        };
        refine_level(level_a, level_b, &mut current, params, level == 0);
        flow = Some(current);
    }

    flow.unwrap_or_else(|| FlowField::zeros(a.width(), a.height()))
}

fn build_pyramid(image: &Plane, max_levels: usize) -> Vec<Plane> {
    let mut levels = vec![image.clone()];
    while levels.len() < max_levels.max(1) {
        let last = &levels[levels.len() - 1];
        let (w, h) = (last.width() / 2, last.height() / 2);
        if w.min(h) < MIN_LEVEL_SIZE {
            break;
        }
        let next = last.resampled(w, h);
        levels.push(next);
    }
    levels
}

fn upsample_flow(coarse: &FlowField, width: usize, height: usize) -> FlowField {
    let mut fine = FlowField::zeros(width, height);
    for y in 0..height {
        let cy = (y / 2).min(coarse.height() - 1);
        for x in 0..width {
            let cx = (x / 2).min(coarse.width() - 1);
            fine.set_vector(x, y, coarse.vector(cx, cy) * 2.0);
        }
    }
    fine
}

/// Iterative refinement at one pyramid level.
///
/// On the finest level, pixels whose window is untextured are reset to zero.
fn refine_level(
    a: &Plane,
    b: &Plane,
    flow: &mut FlowField,
    params: &DenseLkParams,
    finest: bool,
) {
    let width = a.width();
    let height = a.height();
    let radius = params.window_radius;

    // Sobel sums 8x the central difference
    let (gx, gy) = sobel(a);
    let ix: Vec<f32> = gx.pixels().iter().map(|v| v / 8.0).collect();
    let iy: Vec<f32> = gy.pixels().iter().map(|v| v / 8.0).collect();

    let product = |f: &dyn Fn(usize) -> f32| {
        let pixels = (0..width * height).map(f).collect();
        box_blur(&Plane::new(width, height, pixels), radius)
    };
    let sxx = product(&|i| ix[i] * ix[i]);
    let syy = product(&|i| iy[i] * iy[i]);
    let sxy = product(&|i| ix[i] * iy[i]);

    let well_conditioned: Vec<bool> = (0..width * height)
        .map(|i| {
            let (a11, a22, a12) = (sxx.pixels()[i], syy.pixels()[i], sxy.pixels()[i]);
            let half_trace = 0.5 * (a11 + a22);
            let disc = (0.25 * (a11 - a22) * (a11 - a22) + a12 * a12).sqrt();
            half_trace - disc > MIN_EIGENVALUE
        })
        .collect();

    for _ in 0..params.iterations {
        // Temporal difference against B warped by the current flow
        let it: Vec<f32> = (0..width * height)
            .into_par_iter()
            .map(|i| {
                let (x, y) = (i % width, i / width);
                let d = flow.vector(x, y);
                b.sample_bilinear(x as f32 + d.x, y as f32 + d.y) - a.get(x, y)
            })
            .collect();
        let sxt = product(&|i| ix[i] * it[i]);
        let syt = product(&|i| iy[i] * it[i]);

        for i in 0..width * height {
            if !well_conditioned[i] {
                continue;
            }
            let (a11, a22, a12) = (sxx.pixels()[i], syy.pixels()[i], sxy.pixels()[i]);
            let (b1, b2) = (sxt.pixels()[i], syt.pixels()[i]);
            let det = a11 * a22 - a12 * a12;
            let delta = Vec2::new(-(a22 * b1 - a12 * b2) / det, -(a11 * b2 - a12 * b1) / det);
            let (x, y) = (i % width, i / width);
            flow.set_vector(x, y, flow.vector(x, y) + delta);
        }
    }

    if finest {
        for (i, ok) in well_conditioned.iter().enumerate() {
            if !ok {
                flow.set_vector(i % width, i / width, Vec2::ZERO);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> DenseLkParams {
        DenseLkParams {
            window_radius: 3,
            max_levels: 3,
            iterations: 3,
        }
    }

    fn pattern(width: usize, height: usize, shift_x: f32) -> Plane {
        let pixels = (0..height)
            .flat_map(|y| {
                (0..width).map(move |x| {
                    let xf = x as f32 - shift_x;
                    0.5 + 0.25 * (xf * 0.3).sin() + 0.25 * (y as f32 * 0.25).cos()
                })
            })
            .collect();
        Plane::new(width, height, pixels)
    }

    #[test]
    fn test_recovers_horizontal_shift() {
        let a = pattern(64, 64, 0.0);
        let b = pattern(64, 64, 1.0);
        let flow = dense_lucas_kanade(&a, &b, &params());

        let mut us: Vec<f32> = Vec::new();
        let mut vs: Vec<f32> = Vec::new();
        for y in 16..48 {
            for x in 16..48 {
                let d = flow.vector(x, y);
                us.push(d.x);
                vs.push(d.y);
            }
        }
        let u = crate::math::median_f32_mut(&mut us);
        let v = crate::math::median_f32_mut(&mut vs);
        assert!((u - 1.0).abs() < 0.2, "median u = {u}");
        assert!(v.abs() < 0.2, "median v = {v}");
    }

    #[test]
    fn test_flat_images_have_zero_flow() {
        let a = Plane::new_filled(32, 32, 0.3);
        let b = Plane::new_filled(32, 32, 0.6);
        let flow = dense_lucas_kanade(&a, &b, &params());
        assert!(flow.data().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_pyramid_stops_at_min_size() {
        let image = Plane::new_filled(40, 40, 0.0);
        let levels = build_pyramid(&image, 5);
        assert_eq!(levels.len(), 2);
        assert_eq!((levels[1].width(), levels[1].height()), (20, 20));
    }
}
