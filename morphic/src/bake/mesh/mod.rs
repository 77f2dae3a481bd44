//! Triangulated control-mesh baking.
//!
//! Matched control points are averaged into mesh space, topped up with a
//! regular grid and perimeter points, triangulated, and every triangle gets a
//! pair of affine transforms taking mesh-space coordinates into image A and
//! image B. Affines are stored row-major as `[a, b, c, d, e, f]`:
//!
//! ```text
//! x' = a*x + b*y + c
//! y' = d*x + e*y + f
//! ```


use std::sync::Arc;
use std::time::Instant;

use glam::DVec2;
use rayon::prelude::*;

use crate::bake::{check_control_points, check_dimensions};
use crate::config::{AffineFit, MeshBakeConfig};
use crate::error::{BakeError, VisionError};
use crate::math::solve_linear_system;
use crate::vision::Triangulator;

/// Matched offsets blended into each synthetic vertex.
const IDW_NEIGHBORS: usize = 4;

/// Per-bake inputs that come from the plan stage and the image pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshBakeOptions {
    /// Requested triangle budget; the mesh aims for half as many vertices.
    pub tri_count: usize,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshTriangle {
    pub indices: [usize; 3],
    pub affine_to_a: [f32; 6],
    pub affine_to_b: [f32; 6],
}

impl MeshTriangle {
    pub fn map_to_a(&self, p: DVec2) -> DVec2 {
        apply_affine(&self.affine_to_a, p)
    }

    pub fn map_to_b(&self, p: DVec2) -> DVec2 {
        apply_affine(&self.affine_to_b, p)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MeshData {
    vertices: Vec<DVec2>,
    triangles: Vec<MeshTriangle>,
    width: u32,
    height: u32,
}

impl MeshData {
    pub fn vertices(&self) -> &[DVec2] {
        &self.vertices
    }

    pub fn triangles(&self) -> &[MeshTriangle] {
        &self.triangles
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    pub fn image_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn centroid(&self, triangle: &MeshTriangle) -> DVec2 {
        let [i0, i1, i2] = triangle.indices;
        (self.vertices[i0] + self.vertices[i1] + self.vertices[i2]) / 3.0
    }
}

/// Where a mesh vertex came from.
#[derive(Debug, Clone, Copy, PartialEq)]
enum VertexKind {
    /// Average of control pair `i`.
    Matched(usize),
    Grid,
    Border,
}

pub struct MeshBaker {
    config: MeshBakeConfig,
    triangulator: Arc<dyn Triangulator>,
}

impl MeshBaker {
    pub fn new(config: MeshBakeConfig, triangulator: Arc<dyn Triangulator>) -> Self {
        Self {
            config,
            triangulator,
        }
    }

    pub fn config(&self) -> &MeshBakeConfig {
        &self.config
    }

    pub fn bake(
        &self,
        points_a: &[DVec2],
        points_b: &[DVec2],
        options: &MeshBakeOptions,
    ) -> Result<MeshData, BakeError> {
        check_control_points(points_a, points_b)?;
        check_dimensions(options.width, options.height)?;
        let start = Instant::now();

        let (vertices, kinds) = self.build_vertices(points_a, points_b, options);
        let indices = self
            .triangulator
            .triangulate(&vertices)
            .map_err(BakeError::Triangulation)?;
        if indices.is_empty() {
            return Err(BakeError::EmptyTriangulation);
        }
        if let Some(bad) = indices.iter().flatten().find(|&&i| i >= vertices.len()) {
            return Err(BakeError::Triangulation(VisionError::InvalidInput(format!(
                "triangle index {bad} out of range for {} vertices",
                vertices.len()
            ))));
        }

        let targets = match self.config.affine_fit {
            AffineFit::Translation => None,
            AffineFit::ThreePoint => Some(vertex_targets(&vertices, &kinds, points_a, points_b)),
        };

        let triangles: Vec<MeshTriangle> = indices
            .par_iter()
            .map(|&tri| {
                let corners = tri.map(|i| vertices[i]);
                let centroid = (corners[0] + corners[1] + corners[2]) / 3.0;
                let fitted = targets.as_ref().and_then(|(to_a, to_b)| {
                    Some((
                        fit_affine(corners, tri.map(|i| to_a[i]))?,
                        fit_affine(corners, tri.map(|i| to_b[i]))?,
                    ))
                });
                let (affine_to_a, affine_to_b) = fitted.unwrap_or_else(|| {
                    (
                        translation_to_nearest(centroid, points_a),
                        translation_to_nearest(centroid, points_b),
                    )
                });
                MeshTriangle {
                    indices: tri,
                    affine_to_a,
                    affine_to_b,
                }
            })
            .collect();

        tracing::debug!(
            control_points = points_a.len(),
            vertices = vertices.len(),
            triangles = triangles.len(),
            requested_triangles = options.tri_count,
            affine_fit = ?self.config.affine_fit,
            elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
            "mesh baked"
        );

        Ok(MeshData {
            vertices,
            triangles,
            width: options.width,
            height: options.height,
        })
    }

    /// Averaged control pairs, grid top-up, then the optional perimeter.
    fn build_vertices(
        &self,
        points_a: &[DVec2],
        points_b: &[DVec2],
        options: &MeshBakeOptions,
    ) -> (Vec<DVec2>, Vec<VertexKind>) {
        let width = options.width as f64;
        let height = options.height as f64;

        let mut vertices: Vec<DVec2> = points_a
            .iter()
            .zip(points_b)
            .map(|(&a, &b)| (a + b) * 0.5)
            .collect();
        let mut kinds: Vec<VertexKind> = (0..vertices.len()).map(VertexKind::Matched).collect();

        let target = options.tri_count / 2;
        if target > vertices.len() {
            let needed = target - vertices.len();
            let side = (needed as f64).sqrt().ceil() as usize;
            let cell = DVec2::new(width / side as f64, height / side as f64);
            for j in 0..side {
                for i in 0..side {
                    vertices.push(DVec2::new(i as f64 + 0.5, j as f64 + 0.5) * cell);
                    kinds.push(VertexKind::Grid);
                }
            }
        }

        if self.config.add_border_points {
            let border = border_points(width, height, self.config.border_points_per_side);
            kinds.extend(std::iter::repeat_n(VertexKind::Border, border.len()));
            vertices.extend(border);
        }

        (vertices, kinds)
    }
}

/// Four corners plus `per_side` evenly spaced points along each edge.
fn border_points(width: f64, height: f64, per_side: usize) -> Vec<DVec2> {
    let mut points = vec![
        DVec2::new(0.0, 0.0),
        DVec2::new(width, 0.0),
        DVec2::new(0.0, height),
        DVec2::new(width, height),
    ];
    let steps = (per_side + 1) as f64;
    for k in 1..=per_side {
        let t = k as f64 / steps;
        points.push(DVec2::new(t * width, 0.0));
        points.push(DVec2::new(t * width, height));
        points.push(DVec2::new(0.0, t * height));
        points.push(DVec2::new(width, t * height));
    }
    points
}

/// Where each mesh vertex lands in image A and image B.
///
/// Matched vertices use their control pair, border vertices stay put and grid
/// vertices borrow the inverse-distance-weighted offsets of the nearest
/// matched vertices.
fn vertex_targets(
    vertices: &[DVec2],
    kinds: &[VertexKind],
    points_a: &[DVec2],
    points_b: &[DVec2],
) -> (Vec<DVec2>, Vec<DVec2>) {
    let matched: Vec<(DVec2, DVec2, DVec2)> = kinds
        .iter()
        .zip(vertices)
        .filter_map(|(kind, &v)| match *kind {
            VertexKind::Matched(i) => Some((v, points_a[i] - v, points_b[i] - v)),
            _ => None,
        })
        .collect();

    vertices
        .iter()
        .zip(kinds)
        .map(|(&v, kind)| match *kind {
            VertexKind::Matched(i) => (points_a[i], points_b[i]),
            VertexKind::Border => (v, v),
            VertexKind::Grid => {
                let (offset_a, offset_b) = idw_offsets(v, &matched);
                (v + offset_a, v + offset_b)
            }
        })
        .unzip()
}

fn idw_offsets(p: DVec2, matched: &[(DVec2, DVec2, DVec2)]) -> (DVec2, DVec2) {
    let mut nearest: Vec<(f64, DVec2, DVec2)> = matched
        .iter()
        .map(|&(v, off_a, off_b)| (v.distance_squared(p), off_a, off_b))
        .collect();
    let k = IDW_NEIGHBORS.min(nearest.len());
    if k == 0 {
        return (DVec2::ZERO, DVec2::ZERO);
    }
    if k < nearest.len() {
        nearest.select_nth_unstable_by(k - 1, |x, y| x.0.total_cmp(&y.0));
    }

    let mut sum_a = DVec2::ZERO;
    let mut sum_b = DVec2::ZERO;
    let mut total = 0.0;
    for &(d2, off_a, off_b) in &nearest[..k] {
        if d2 < 1e-12 {
            return (off_a, off_b);
        }
        let w = 1.0 / d2;
        sum_a += off_a * w;
        sum_b += off_b * w;
        total += w;
    }
    (sum_a / total, sum_b / total)
}

/// Pure translation from `centroid` to the closest of `points`.
fn translation_to_nearest(centroid: DVec2, points: &[DVec2]) -> [f32; 6] {
    let nearest = points
        .iter()
        .copied()
        .min_by(|x, y| {
            x.distance_squared(centroid)
                .total_cmp(&y.distance_squared(centroid))
        })
        .unwrap_or(centroid);
    let d = nearest - centroid;
    [1.0, 0.0, d.x as f32, 0.0, 1.0, d.y as f32]
}

/// Exact affine taking the three `from` corners onto `to`.
///
/// Returns `None` for a degenerate (collinear) triangle.
fn fit_affine(from: [DVec2; 3], to: [DVec2; 3]) -> Option<[f32; 6]> {
    // Unknowns [a, b, c, d, e, f]; two rows per correspondence.
    let mut matrix = vec![vec![0.0; 6]; 6];
    let mut rhs = vec![0.0; 6];
    for (k, (p, q)) in from.iter().zip(&to).enumerate() {
        matrix[2 * k][0] = p.x;
        matrix[2 * k][1] = p.y;
        matrix[2 * k][2] = 1.0;
        matrix[2 * k + 1][3] = p.x;
        matrix[2 * k + 1][4] = p.y;
        matrix[2 * k + 1][5] = 1.0;
        rhs[2 * k] = q.x;
        rhs[2 * k + 1] = q.y;
    }

    let solution = solve_linear_system(&matrix, &rhs);
    if !solution.is_exact() || solution.x.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let x = &solution.x;
    Some([
        x[0] as f32,
        x[1] as f32,
        x[2] as f32,
        x[3] as f32,
        x[4] as f32,
        x[5] as f32,
    ])
}

#[inline]
fn apply_affine(affine: &[f32; 6], p: DVec2) -> DVec2 {
    let m = affine.map(f64::from);
    DVec2::new(
        m[0] * p.x + m[1] * p.y + m[2],
        m[3] * p.x + m[4] * p.y + m[5],
    )
}
