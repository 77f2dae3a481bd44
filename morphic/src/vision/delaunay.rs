//! Incremental Delaunay triangulation (Bowyer-Watson).
//!
//! Points are inserted one at a time into a triangulation seeded with a
//! super-triangle that encloses every input. Each insertion removes the
//! triangles whose circumcircle contains the new point and re-fans the
//! resulting polygonal cavity. Triangles touching the super-triangle are
//! dropped at the end.

use glam::DVec2;
use hashbrown::{HashMap, HashSet};

use crate::error::VisionError;
use crate::vision::Triangulator;

/// Default [`Triangulator`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BowyerWatson;

impl Triangulator for BowyerWatson {
    fn triangulate(&self, points: &[DVec2]) -> Result<Vec<[usize; 3]>, VisionError> {
        if let Some(index) = points.iter().position(|p| !p.is_finite()) {
            return Err(VisionError::InvalidInput(format!(
                "point {index} is not finite"
            )));
        }
        Ok(triangulate(points))
    }
}

#[derive(Debug, Clone, Copy)]
struct Triangle {
    v: [usize; 3],
    center: DVec2,
    radius_sq: f64,
}

impl Triangle {
    /// Counter-clockwise triangle with its circumcircle, or `None` when the
    /// vertices are collinear.
    fn new(vertices: &[DVec2], a: usize, b: usize, c: usize) -> Option<Self> {
        let (pa, pb, pc) = (vertices[a], vertices[b], vertices[c]);
        let cross = (pb - pa).perp_dot(pc - pa);
        if cross.abs() < 1e-12 {
            return None;
        }
        let v = if cross > 0.0 { [a, b, c] } else { [a, c, b] };

        let d = 2.0 * cross;
        let (ba, ca) = (pb - pa, pc - pa);
        let (ba_sq, ca_sq) = (ba.length_squared(), ca.length_squared());
        let center = pa
            + DVec2::new(
                (ca.y * ba_sq - ba.y * ca_sq) / d,
                (ba.x * ca_sq - ca.x * ba_sq) / d,
            );
        Some(Self {
            v,
            center,
            radius_sq: center.distance_squared(pa),
        })
    }

    #[inline]
    fn circumcircle_contains(&self, p: DVec2) -> bool {
        self.center.distance_squared(p) < self.radius_sq
    }
}

fn edge_key(a: usize, b: usize) -> (usize, usize) {
    if a < b { (a, b) } else { (b, a) }
}

pub(crate) fn triangulate(points: &[DVec2]) -> Vec<[usize; 3]> {
    let n = points.len();
    if n < 3 {
        return Vec::new();
    }

    let (min, max) = points
        .iter()
        .fold((points[0], points[0]), |(lo, hi), p| (lo.min(*p), hi.max(*p)));
    let span = (max - min).max_element().max(1.0);
    let mid = (min + max) * 0.5;

    // Super-triangle vertices live after the inputs
    let mut vertices = points.to_vec();
    vertices.push(mid + DVec2::new(-20.0 * span, -span));
    vertices.push(mid + DVec2::new(0.0, 20.0 * span));
    vertices.push(mid + DVec2::new(20.0 * span, -span));

    let Some(super_triangle) = Triangle::new(&vertices, n, n + 1, n + 2) else {
        return Vec::new();
    };
    let mut triangles = vec![super_triangle];

    let mut seen: HashSet<(u64, u64)> = HashSet::with_capacity(n);
    let mut edge_counts: HashMap<(usize, usize), (usize, [usize; 2])> = HashMap::new();

    for (index, p) in points.iter().enumerate() {
        // +0.0 keeps -0.0 and 0.0 together
        if !seen.insert(((p.x + 0.0).to_bits(), (p.y + 0.0).to_bits())) {
            continue;
        }

        edge_counts.clear();
        triangles.retain(|t| {
            if !t.circumcircle_contains(*p) {
                return true;
            }
            for k in 0..3 {
                let (a, b) = (t.v[k], t.v[(k + 1) % 3]);
                edge_counts
                    .entry(edge_key(a, b))
                    .and_modify(|(count, _)| *count += 1)
                    .or_insert((1, [a, b]));
            }
            false
        });

        for &(count, [a, b]) in edge_counts.values() {
            if count != 1 {
                continue;
            }
            if let Some(t) = Triangle::new(&vertices, a, b, index) {
                triangles.push(t);
            }
        }
    }

    let mut result: Vec<[usize; 3]> = triangles
        .iter()
        .filter(|t| t.v.iter().all(|&v| v < n))
        .map(|t| {
            // Rotate the lowest index first; winding is unchanged
            let mut v = t.v;
            let lowest = (0..3).min_by_key(|&k| v[k]).unwrap_or(0);
            v.rotate_left(lowest);
            v
        })
        .collect();
    result.sort_unstable();
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn area(points: &[DVec2], t: &[usize; 3]) -> f64 {
        0.5 * (points[t[1]] - points[t[0]]).perp_dot(points[t[2]] - points[t[0]])
    }

    #[test]
    fn test_square_gives_two_triangles() {
        let points = [
            DVec2::new(0.0, 0.0),
            DVec2::new(10.0, 0.0),
            DVec2::new(10.0, 10.0),
            DVec2::new(0.0, 10.0),
        ];
        let triangles = BowyerWatson.triangulate(&points).unwrap();
        assert_eq!(triangles.len(), 2);
        let total: f64 = triangles.iter().map(|t| area(&points, t)).sum();
        assert!((total - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_triangles_are_counter_clockwise() {
        let points: Vec<DVec2> = (0..30)
            .map(|i| {
                let f = i as f64;
                DVec2::new((f * 7.3) % 50.0, (f * 13.1) % 40.0)
            })
            .collect();
        for t in BowyerWatson.triangulate(&points).unwrap() {
            assert!(area(&points, &t) > 0.0);
        }
    }

    #[test]
    fn test_empty_circumcircle_property() {
        let points: Vec<DVec2> = (0..40)
            .map(|i| {
                let f = i as f64;
                DVec2::new((f * 17.77).sin() * 50.0, (f * 3.31).cos() * 35.0)
            })
            .collect();
        let triangles = triangulate(&points);
        assert!(!triangles.is_empty());
        for t in &triangles {
            let tri = Triangle::new(&points, t[0], t[1], t[2]).unwrap();
            for (i, p) in points.iter().enumerate() {
                if t.contains(&i) {
                    continue;
                }
                assert!(
                    tri.center.distance_squared(*p) >= tri.radius_sq * (1.0 - 1e-9),
                    "point {i} inside circumcircle of {t:?}"
                );
            }
        }
    }

    #[test]
    fn test_grid_covers_hull() {
        let points: Vec<DVec2> = (0..5)
            .flat_map(|y| (0..5).map(move |x| DVec2::new(x as f64 * 10.0, y as f64 * 10.0)))
            .collect();
        let triangles = triangulate(&points);
        assert_eq!(triangles.len(), 32);
        let total: f64 = triangles.iter().map(|t| area(&points, t)).sum();
        assert!((total - 1600.0).abs() < 1e-6);
    }

    #[test]
    fn test_duplicates_are_ignored() {
        let points = [
            DVec2::new(0.0, 0.0),
            DVec2::new(4.0, 0.0),
            DVec2::new(0.0, 4.0),
            DVec2::new(4.0, 0.0),
        ];
        let triangles = triangulate(&points);
        assert_eq!(triangles, vec![[0, 1, 2]]);
    }

    #[test]
    fn test_degenerate_inputs() {
        assert!(triangulate(&[DVec2::ZERO, DVec2::X]).is_empty());
        let collinear: Vec<DVec2> = (0..5).map(|i| DVec2::new(i as f64, 0.0)).collect();
        assert!(triangulate(&collinear).is_empty());
        assert!(
            BowyerWatson
                .triangulate(&[DVec2::ZERO, DVec2::new(f64::NAN, 1.0), DVec2::X])
                .is_err()
        );
    }
}
