//! Dot rasterization onto a transparent RGBA canvas.

use tracing::debug;

use crate::png::create_png_auto;
use crate::style::{PointStyle, Rgba};

/// A straight-alpha RGBA8 raster, row-major, top-left origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Canvas {
    width: usize,
    height: usize,
    pixels: Vec<u8>,
}

impl Canvas {
    /// Create a fully transparent canvas.
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            pixels: vec![0u8; width * height * 4],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Raw RGBA bytes.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Colour of one pixel, `None` outside the canvas.
    pub fn pixel(&self, x: usize, y: usize) -> Option<Rgba> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y * self.width + x) * 4;
        Some(Rgba::new(
            self.pixels[idx],
            self.pixels[idx + 1],
            self.pixels[idx + 2],
            self.pixels[idx + 3],
        ))
    }

    /// True while nothing has been painted.
    pub fn is_blank(&self) -> bool {
        self.pixels.chunks_exact(4).all(|p| p[3] == 0)
    }

    /// Composite `color` over the pixel at (x, y) with source-over blending.
    /// Coordinates outside the canvas are ignored.
    pub fn blend_pixel(&mut self, x: i64, y: i64, color: Rgba) {
        if x < 0 || y < 0 || x as usize >= self.width || y as usize >= self.height || color.a == 0
        {
            return;
        }
        let idx = (y as usize * self.width + x as usize) * 4;

        let src_a = color.a as f32 / 255.0;
        let dst_a = self.pixels[idx + 3] as f32 / 255.0;
        let out_a = src_a + dst_a * (1.0 - src_a);
        if out_a <= 0.0 {
            return;
        }

        let blend = |src: u8, dst: u8| -> u8 {
            ((src as f32 * src_a + dst as f32 * dst_a * (1.0 - src_a)) / out_a).round() as u8
        };

        self.pixels[idx] = blend(color.r, self.pixels[idx]);
        self.pixels[idx + 1] = blend(color.g, self.pixels[idx + 1]);
        self.pixels[idx + 2] = blend(color.b, self.pixels[idx + 2]);
        self.pixels[idx + 3] = (out_a * 255.0).round() as u8;
    }

    /// Paint a filled disc centred at (cx, cy) in pixel units.
    ///
    /// A pixel is covered when its centre lies within `radius` of the disc
    /// centre. Only the part overlapping the canvas is drawn, so centres may
    /// lie outside it.
    pub fn fill_circle(&mut self, cx: f64, cy: f64, radius: f64, color: Rgba) {
        if !cx.is_finite() || !cy.is_finite() || radius <= 0.0 {
            return;
        }

        let x_min = ((cx - radius - 0.5).floor() as i64).max(0);
        let y_min = ((cy - radius - 0.5).floor() as i64).max(0);
        let x_max = ((cx + radius - 0.5).ceil() as i64).min(self.width as i64 - 1);
        let y_max = ((cy + radius - 0.5).ceil() as i64).min(self.height as i64 - 1);

        let r2 = radius * radius;
        for py in y_min..=y_max {
            let dy = py as f64 + 0.5 - cy;
            for px in x_min..=x_max {
                let dx = px as f64 + 0.5 - cx;
                if dx * dx + dy * dy <= r2 {
                    self.blend_pixel(px, py, color);
                }
            }
        }
    }

    /// Encode the canvas as PNG.
    pub fn to_png(&self) -> Result<Vec<u8>, String> {
        create_png_auto(&self.pixels, self.width, self.height)
    }
}

/// Draw every pixel-space position as a dot on a new `tile_size` square canvas.
///
/// Positions are offsets from the tile's top-left corner in pixels; dots
/// whose footprint misses the tile leave it untouched.
pub fn rasterize(positions: &[(f64, f64)], tile_size: u32, style: &PointStyle) -> Canvas {
    let size = tile_size as usize;
    let mut canvas = Canvas::new(size, size);

    let reach = style.radius + 0.5;
    let limit = tile_size as f64 + reach;
    let mut drawn = 0usize;

    for &(u, v) in positions {
        if u < -reach || v < -reach || u > limit || v > limit {
            continue;
        }
        canvas.fill_circle(u, v, style.radius, style.color);
        drawn += 1;
    }

    debug!(
        positions = positions.len(),
        drawn = drawn,
        tile_size = tile_size,
        "Rasterized points"
    );

    canvas
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: Rgba = Rgba::new(255, 0, 0, 255);

    #[test]
    fn test_new_canvas_is_transparent() {
        let canvas = Canvas::new(8, 4);
        assert_eq!(canvas.pixels().len(), 8 * 4 * 4);
        assert!(canvas.is_blank());
    }

    #[test]
    fn test_blend_opaque_replaces() {
        let mut canvas = Canvas::new(2, 2);
        canvas.blend_pixel(1, 1, RED);
        assert_eq!(canvas.pixel(1, 1), Some(RED));
        assert_eq!(canvas.pixel(0, 0), Some(Rgba::TRANSPARENT));
    }

    #[test]
    fn test_blend_translucent_accumulates_alpha() {
        let mut canvas = Canvas::new(1, 1);
        let half = Rgba::new(0, 0, 255, 128);
        canvas.blend_pixel(0, 0, half);
        let once = canvas.pixel(0, 0).unwrap();
        canvas.blend_pixel(0, 0, half);
        let twice = canvas.pixel(0, 0).unwrap();
        assert_eq!(once.a, 128);
        assert!(twice.a > once.a);
        assert_eq!((twice.r, twice.g, twice.b), (0, 0, 255));
    }

    #[test]
    fn test_blend_out_of_bounds_ignored() {
        let mut canvas = Canvas::new(2, 2);
        canvas.blend_pixel(-1, 0, RED);
        canvas.blend_pixel(0, 2, RED);
        assert!(canvas.is_blank());
    }

    #[test]
    fn test_fill_circle_covers_centre_pixels() {
        let mut canvas = Canvas::new(16, 16);
        canvas.fill_circle(8.0, 8.0, 2.0, RED);
        // The four pixels around the centre point
        for (x, y) in [(7, 7), (8, 7), (7, 8), (8, 8)] {
            assert_eq!(canvas.pixel(x, y), Some(RED), "pixel ({}, {})", x, y);
        }
        // Outside the radius
        assert_eq!(canvas.pixel(8, 11), Some(Rgba::TRANSPARENT));
        assert_eq!(canvas.pixel(0, 0), Some(Rgba::TRANSPARENT));
    }

    #[test]
    fn test_fill_circle_clipped_at_edge() {
        let mut canvas = Canvas::new(4, 4);
        canvas.fill_circle(-1.0, 0.5, 2.0, RED);
        assert_eq!(canvas.pixel(0, 0), Some(RED));
        assert_eq!(canvas.pixel(3, 0), Some(Rgba::TRANSPARENT));
    }

    #[test]
    fn test_rasterize_skips_far_points() {
        let style = PointStyle::new(2.0, RED);
        let canvas = rasterize(&[(-50.0, 10.0), (300.0, 300.0)], 256, &style);
        assert!(canvas.is_blank());
    }

    #[test]
    fn test_rasterize_draws_inside_points() {
        let style = PointStyle::new(1.5, RED);
        let canvas = rasterize(&[(100.5, 200.5)], 256, &style);
        assert_eq!(canvas.pixel(100, 200), Some(RED));
        assert!(!canvas.is_blank());
    }
}
