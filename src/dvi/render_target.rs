//! Drawing surfaces the interpreter paints on

use std::path::Path;

use image::{Rgba, RgbaImage};

use crate::fonts::glyph::{GlyphBitmap, Rgb};

pub trait RenderTarget {
    /// Composite `bitmap` with its top-left corner at pixel (x, y)
    fn draw_glyph(&mut self, x: i32, y: i32, bitmap: &GlyphBitmap);

    fn fill_rect(&mut self, x: i32, y: i32, width: u32, height: u32, color: Rgb);

    /// Whether partially transparent glyph pixels are blended
    fn supports_alpha(&self) -> bool {
        true
    }
}

/// In-memory RGBA page image
pub struct PageCanvas {
    image: RgbaImage,
}

impl PageCanvas {
    #[must_use]
    pub fn new(width: u32, height: u32, background: Rgb) -> Self {
        Self {
            image: RgbaImage::from_pixel(
                width,
                height,
                Rgba([background.r, background.g, background.b, 0xFF]),
            ),
        }
    }

    #[must_use]
    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    #[must_use]
    pub fn into_image(self) -> RgbaImage {
        self.image
    }

    pub fn save_png(&self, path: &Path) -> image::ImageResult<()> {
        self.image.save_with_format(path, image::ImageFormat::Png)
    }

    /// Visible part of a `width`×`height` box at (x, y), in unsigned pixels
    fn clip(&self, x: i32, y: i32, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let x0 = i64::from(x).max(0);
        let y0 = i64::from(y).max(0);
        let x1 = (i64::from(x) + i64::from(width)).min(i64::from(self.image.width()));
        let y1 = (i64::from(y) + i64::from(height)).min(i64::from(self.image.height()));
        (x0 < x1 && y0 < y1).then(|| (x0 as u32, y0 as u32, x1 as u32, y1 as u32))
    }
}

impl RenderTarget for PageCanvas {
    fn draw_glyph(&mut self, x: i32, y: i32, bitmap: &GlyphBitmap) {
        let Some((x0, y0, x1, y1)) = self.clip(x, y, bitmap.width(), bitmap.height()) else {
            return;
        };
        for py in y0..y1 {
            for px in x0..x1 {
                let [r, g, b, a] =
                    bitmap.pixel((i64::from(px) - i64::from(x)) as u32, (i64::from(py) - i64::from(y)) as u32);
                if a == 0 {
                    continue;
                }
                let dst = self.image.get_pixel_mut(px, py);
                let blend = |src: u8, dst: u8| {
                    ((u32::from(src) * u32::from(a) + u32::from(dst) * (255 - u32::from(a)) + 127) / 255)
                        as u8
                };
                *dst = Rgba([blend(r, dst[0]), blend(g, dst[1]), blend(b, dst[2]), 0xFF]);
            }
        }
    }

    fn fill_rect(&mut self, x: i32, y: i32, width: u32, height: u32, color: Rgb) {
        let Some((x0, y0, x1, y1)) = self.clip(x, y, width, height) else {
            return;
        };
        for py in y0..y1 {
            for px in x0..x1 {
                self.image
                    .put_pixel(px, py, Rgba([color.r, color.g, color.b, 0xFF]));
            }
        }
    }
}

/// One recorded drawing call
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DrawOp {
    Glyph {
        x: i32,
        y: i32,
        width: u32,
        height: u32,
    },
    Rect {
        x: i32,
        y: i32,
        width: u32,
        height: u32,
        color: Rgb,
    },
}

/// Target that only remembers what was drawn
#[derive(Debug, Default)]
pub struct RecordingTarget {
    pub ops: Vec<DrawOp>,
    pub alpha: bool,
}

impl RecordingTarget {
    #[must_use]
    pub fn new() -> Self {
        Self {
            ops: Vec::new(),
            alpha: true,
        }
    }

    pub fn glyphs(&self) -> impl Iterator<Item = &DrawOp> {
        self.ops.iter().filter(|op| matches!(op, DrawOp::Glyph { .. }))
    }

    pub fn rects(&self) -> impl Iterator<Item = &DrawOp> {
        self.ops.iter().filter(|op| matches!(op, DrawOp::Rect { .. }))
    }
}

impl RenderTarget for RecordingTarget {
    fn draw_glyph(&mut self, x: i32, y: i32, bitmap: &GlyphBitmap) {
        self.ops.push(DrawOp::Glyph {
            x,
            y,
            width: bitmap.width(),
            height: bitmap.height(),
        });
    }

    fn fill_rect(&mut self, x: i32, y: i32, width: u32, height: u32, color: Rgb) {
        self.ops.push(DrawOp::Rect {
            x,
            y,
            width,
            height,
            color,
        });
    }

    fn supports_alpha(&self) -> bool {
        self.alpha
    }
}
