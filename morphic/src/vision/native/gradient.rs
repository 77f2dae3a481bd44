//! Sobel derivatives with clamped borders.

use rayon::prelude::*;

use crate::plane::Plane;

/// Horizontal and vertical Sobel responses.
pub(crate) fn sobel(image: &Plane) -> (Plane, Plane) {
    let width = image.width();
    let height = image.height();
    let mut gx = vec![0.0f32; width * height];
    let mut gy = vec![0.0f32; width * height];

    if width == 0 || height == 0 {
        return (Plane::new(width, height, gx), Plane::new(width, height, gy));
    }

    gx.par_chunks_mut(width)
        .zip(gy.par_chunks_mut(width))
        .enumerate()
        .for_each(|(y, (row_x, row_y))| {
            let y = y as isize;
            for x in 0..width {
                let xi = x as isize;
                let p = |dx: isize, dy: isize| image.get_clamped(xi + dx, y + dy);

                row_x[x] = (p(1, -1) + 2.0 * p(1, 0) + p(1, 1))
                    - (p(-1, -1) + 2.0 * p(-1, 0) + p(-1, 1));
                row_y[x] = (p(-1, 1) + 2.0 * p(0, 1) + p(1, 1))
                    - (p(-1, -1) + 2.0 * p(0, -1) + p(1, -1));
            }
        });

    (Plane::new(width, height, gx), Plane::new(width, height, gy))
}

/// Euclidean norm of the Sobel gradient.
pub(crate) fn gradient_magnitude(image: &Plane) -> Plane {
    let (gx, gy) = sobel(image);
    let pixels = gx
        .pixels()
        .iter()
        .zip(gy.pixels())
        .map(|(x, y)| (x * x + y * y).sqrt())
        .collect();
    Plane::new(image.width(), image.height(), pixels)
}

/// Mean over a `(2r+1)^2` window, clamped at the borders.
pub(crate) fn box_blur(image: &Plane, radius: usize) -> Plane {
    let width = image.width();
    let height = image.height();
    if radius == 0 || image.is_empty() {
        return image.clone();
    }
    let r = radius as isize;
    let norm = 1.0 / ((2 * radius + 1) as f32);

    // Separable: horizontal then vertical
    let mut horizontal = Plane::new_filled(width, height, 0.0);
    for y in 0..height {
        for x in 0..width {
            let sum: f32 = (-r..=r)
                .map(|d| image.get_clamped(x as isize + d, y as isize))
                .sum();
            horizontal[(x, y)] = sum * norm;
        }
    }

    let mut out = Plane::new_filled(width, height, 0.0);
    for y in 0..height {
        for x in 0..width {
            let sum: f32 = (-r..=r)
                .map(|d| horizontal.get_clamped(x as isize, y as isize + d))
                .sum();
            out[(x, y)] = sum * norm;
        }
    }
    out
}
