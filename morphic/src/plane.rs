//! Single-channel `f32` image plane.
//!
//! Used for grayscale working images, gradient magnitudes and other scalar
//! maps. Pixels are stored row-major.

use std::ops::{Index, IndexMut};

use image::RgbaImage;
use image::imageops::{self, FilterType};

#[derive(Debug, Clone, PartialEq)]
pub struct Plane {
    pixels: Vec<f32>,
    width: usize,
    height: usize,
}

impl Plane {
    pub fn new(width: usize, height: usize, pixels: Vec<f32>) -> Self {
        assert_eq!(
            pixels.len(),
            width * height,
            "pixels length must equal width * height"
        );
        Self {
            pixels,
            width,
            height,
        }
    }

    pub fn new_filled(width: usize, height: usize, value: f32) -> Self {
        Self {
            pixels: vec![value; width * height],
            width,
            height,
        }
    }

    /// Luma plane in [0, 1] (Rec. 601 weights).
    pub fn from_rgba_luma(image: &RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        let pixels = image
            .pixels()
            .map(|p| {
                let [r, g, b, _] = p.0;
                (0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32) / 255.0
            })
            .collect();
        Self::new(width as usize, height as usize, pixels)
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    #[inline]
    pub fn pixels(&self) -> &[f32] {
        &self.pixels
    }

    #[inline]
    pub fn pixels_mut(&mut self) -> &mut [f32] {
        &mut self.pixels
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        debug_assert!(x < self.width && y < self.height);
        self.pixels[y * self.width + x]
    }

    /// Pixel lookup with coordinates clamped to the plane bounds.
    #[inline]
    pub fn get_clamped(&self, x: isize, y: isize) -> f32 {
        let x = x.clamp(0, self.width as isize - 1) as usize;
        let y = y.clamp(0, self.height as isize - 1) as usize;
        self.pixels[y * self.width + x]
    }

    /// Bilinear sample at a sub-pixel position, clamped at the borders.
    pub fn sample_bilinear(&self, x: f32, y: f32) -> f32 {
        if self.is_empty() {
            return 0.0;
        }
        let x = x.clamp(0.0, (self.width - 1) as f32);
        let y = y.clamp(0.0, (self.height - 1) as f32);
        let x0 = x.floor() as usize;
        let y0 = y.floor() as usize;
        let x1 = (x0 + 1).min(self.width - 1);
        let y1 = (y0 + 1).min(self.height - 1);
        let fx = x - x0 as f32;
        let fy = y - y0 as f32;

        let top = self.get(x0, y0) * (1.0 - fx) + self.get(x1, y0) * fx;
        let bottom = self.get(x0, y1) * (1.0 - fx) + self.get(x1, y1) * fx;
        top * (1.0 - fy) + bottom * fy
    }

    /// Bilinear resample to new dimensions. Pixel centers are aligned.
    pub fn resampled(&self, width: usize, height: usize) -> Self {
        if width == self.width && height == self.height {
            return self.clone();
        }
        let sx = self.width as f32 / width as f32;
        let sy = self.height as f32 / height as f32;
        let mut pixels = Vec::with_capacity(width * height);
        for y in 0..height {
            let src_y = (y as f32 + 0.5) * sy - 0.5;
            for x in 0..width {
                let src_x = (x as f32 + 0.5) * sx - 0.5;
                pixels.push(self.sample_bilinear(src_x, src_y));
            }
        }
        Self::new(width, height, pixels)
    }

    pub fn max_value(&self) -> f32 {
        self.pixels.iter().copied().fold(0.0f32, f32::max)
    }

    /// Scale values so the maximum becomes 1. An all-zero plane is unchanged.
    pub fn normalize_max(&mut self) {
        let max = self.max_value();
        if max > f32::EPSILON {
            let inv = 1.0 / max;
            self.pixels.iter_mut().for_each(|v| *v *= inv);
        }
    }
}

impl Index<(usize, usize)> for Plane {
    type Output = f32;

    #[inline]
    fn index(&self, (x, y): (usize, usize)) -> &Self::Output {
        &self.pixels[y * self.width + x]
    }
}

impl IndexMut<(usize, usize)> for Plane {
    #[inline]
    fn index_mut(&mut self, (x, y): (usize, usize)) -> &mut Self::Output {
        &mut self.pixels[y * self.width + x]
    }
}

/// Scale factor that brings the long edge of `width`x`height` down to
/// `target_res`. Images already within the target are left at scale 1.
pub fn downscale_factor(width: u32, height: u32, target_res: u32) -> f64 {
    let long_edge = width.max(height);
    if long_edge == 0 || long_edge <= target_res {
        1.0
    } else {
        target_res as f64 / long_edge as f64
    }
}

/// Downscaled copy of `image` with its long edge at most `target_res`,
/// together with the applied scale factor.
pub fn downscale_rgba(image: &RgbaImage, target_res: u32) -> (RgbaImage, f64) {
    let (width, height) = image.dimensions();
    let scale = downscale_factor(width, height, target_res);
    if scale >= 1.0 {
        return (image.clone(), 1.0);
    }
    let new_width = ((width as f64 * scale).round() as u32).max(1);
    let new_height = ((height as f64 * scale).round() as u32).max(1);
    let resized = imageops::resize(image, new_width, new_height, FilterType::Triangle);
    (resized, scale)
}

/// Grayscale working plane at `target_res` plus the scale factor from the
/// original image to the plane.
pub fn prepare_gray(image: &RgbaImage, target_res: u32) -> (Plane, f64) {
    let (small, scale) = downscale_rgba(image, target_res);
    (Plane::from_rgba_luma(&small), scale)
}

#[cfg(test)]
mod tests {
    use image::Rgba;

    use super::*;

    #[test]
    fn test_downscale_factor_keeps_small_images() {
        assert_eq!(downscale_factor(200, 100, 256), 1.0);
        assert_eq!(downscale_factor(512, 256, 256), 0.5);
        assert_eq!(downscale_factor(100, 1000, 250), 0.25);
    }

    #[test]
    fn test_prepare_gray_downscales_long_edge() {
        let image = RgbaImage::from_pixel(400, 200, Rgba([255, 255, 255, 255]));
        let (gray, scale) = prepare_gray(&image, 100);
        assert_eq!(gray.width(), 100);
        assert_eq!(gray.height(), 50);
        assert!((scale - 0.25).abs() < 1e-12);
        assert!(gray.pixels().iter().all(|&v| (v - 1.0).abs() < 1e-3));
    }

    #[test]
    fn test_sample_bilinear_midpoint() {
        let plane = Plane::new(2, 1, vec![0.0, 1.0]);
        assert!((plane.sample_bilinear(0.5, 0.0) - 0.5).abs() < 1e-6);
        // Clamped outside the plane
        assert_eq!(plane.sample_bilinear(-3.0, 0.0), 0.0);
        assert_eq!(plane.sample_bilinear(9.0, 4.0), 1.0);
    }

    #[test]
    fn test_normalize_max() {
        let mut plane = Plane::new(3, 1, vec![0.5, 2.0, 1.0]);
        plane.normalize_max();
        assert_eq!(plane.pixels(), &[0.25, 1.0, 0.5]);

        let mut zeros = Plane::new_filled(2, 2, 0.0);
        zeros.normalize_max();
        assert!(zeros.pixels().iter().all(|&v| v == 0.0));
    }
}
