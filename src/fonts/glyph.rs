//! Glyph cache: per-character metrics plus a lazily rasterized bitmap
//!
//! Metrics are stored independently of bitmaps, so a resolution change can
//! drop every bitmap while the advance widths stay valid.

use crate::dvi::opcodes::MAX_CHARS_IN_FONT;

/// Opaque RGB color
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb::new(0, 0, 0);
    pub const WHITE: Rgb = Rgb::new(0xFF, 0xFF, 0xFF);

    #[must_use]
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Build from unit-interval components, clamping out-of-range values
    #[must_use]
    pub fn from_unit(r: f64, g: f64, b: f64) -> Self {
        let channel = |c: f64| (c.clamp(0.0, 1.0) * 255.0 + 0.5) as u8;
        Self::new(channel(r), channel(g), channel(b))
    }
}

/// A colored glyph image in straight-alpha RGBA
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GlyphBitmap {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl GlyphBitmap {
    /// Zero-sized bitmap, used as the placeholder for failed rasterizations
    #[must_use]
    pub fn empty() -> Self {
        Self {
            width: 0,
            height: 0,
            pixels: Vec::new(),
        }
    }

    /// Fully opaque rectangle of `color`
    #[must_use]
    pub fn solid(width: u32, height: u32, color: Rgb) -> Self {
        let pixels = [color.r, color.g, color.b, 0xFF].repeat((width * height) as usize);
        Self {
            width,
            height,
            pixels,
        }
    }

    /// Colorize an 8-bit coverage mask
    ///
    /// With `alpha` false the mask is thresholded at one half, for targets
    /// that can only draw fully opaque pixels.
    #[must_use]
    pub fn from_coverage(width: u32, height: u32, coverage: &[u8], color: Rgb, alpha: bool) -> Self {
        debug_assert_eq!(coverage.len(), (width * height) as usize);
        let mut pixels = Vec::with_capacity(coverage.len() * 4);
        for &c in coverage {
            let a = if alpha {
                c
            } else if c >= 0x80 {
                0xFF
            } else {
                0
            };
            pixels.extend_from_slice(&[color.r, color.g, color.b, a]);
        }
        Self {
            width,
            height,
            pixels,
        }
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Raw RGBA rows, `width * 4` bytes per row
    #[must_use]
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = ((y * self.width + x) * 4) as usize;
        [
            self.pixels[i],
            self.pixels[i + 1],
            self.pixels[i + 2],
            self.pixels[i + 3],
        ]
    }
}

/// Metrics and cached image of one character
#[derive(Clone, Debug, Default)]
pub struct Glyph {
    /// Advance width as a fix_word, in units of 2^-20 of the design size
    pub advance: i32,
    /// Hotspot: pixel offset of the reference point inside the bitmap
    pub x2: i32,
    pub y2: i32,
    /// Cached bitmap, valid only for `color`
    pub bitmap: Option<GlyphBitmap>,
    pub color: Rgb,
    /// Set when this glyph could not be produced
    pub error: Option<String>,
}

impl Glyph {
    /// Placeholder carrying an error, with no metrics and an empty image
    #[must_use]
    pub fn placeholder(error: impl Into<String>) -> Self {
        Self {
            bitmap: Some(GlyphBitmap::empty()),
            error: Some(error.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn needs_bitmap(&self, color: Rgb) -> bool {
        self.bitmap.is_none() || self.color != color
    }

    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.error.is_none()
    }
}

/// The 256 glyph slots of one font together with a rasterization counter
#[derive(Debug)]
pub struct GlyphTable {
    glyphs: Vec<Glyph>,
    rasterizations: u64,
}

impl Default for GlyphTable {
    fn default() -> Self {
        Self::new()
    }
}

impl GlyphTable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            glyphs: vec![Glyph::default(); MAX_CHARS_IN_FONT],
            rasterizations: 0,
        }
    }

    #[must_use]
    pub fn get(&self, ch: u8) -> &Glyph {
        &self.glyphs[ch as usize]
    }

    pub fn get_mut(&mut self, ch: u8) -> &mut Glyph {
        &mut self.glyphs[ch as usize]
    }

    /// Return the glyph, rasterizing it first when a bitmap in `color` is
    /// wanted and not cached
    ///
    /// `rasterize` must either store a bitmap or set an error together with
    /// a placeholder bitmap, so a failing character is not retried until
    /// the next invalidation.
    pub fn fetch<F>(&mut self, ch: u8, want_bitmap: bool, color: Rgb, rasterize: F) -> &Glyph
    where
        F: FnOnce(&mut Glyph, Rgb),
    {
        let glyph = &mut self.glyphs[ch as usize];
        if want_bitmap && glyph.needs_bitmap(color) {
            rasterize(glyph, color);
            if glyph.bitmap.is_none() {
                glyph.bitmap = Some(GlyphBitmap::empty());
            }
            glyph.color = color;
            self.rasterizations += 1;
        }
        &self.glyphs[ch as usize]
    }

    /// Drop every cached bitmap, keeping metrics
    pub fn invalidate_bitmaps(&mut self) {
        for glyph in &mut self.glyphs {
            glyph.bitmap = None;
        }
    }

    /// Number of rasterizations performed since construction
    #[must_use]
    pub fn rasterizations(&self) -> u64 {
        self.rasterizations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paint(glyph: &mut Glyph, color: Rgb) {
        glyph.bitmap = Some(GlyphBitmap::solid(2, 2, color));
    }

    #[test]
    fn fetch_without_bitmap_never_rasterizes() {
        let mut table = GlyphTable::new();
        table.get_mut(b'a').advance = 1 << 19;
        let glyph = table.fetch(b'a', false, Rgb::BLACK, paint);
        assert_eq!(glyph.advance, 1 << 19);
        assert!(glyph.bitmap.is_none());
        assert_eq!(table.rasterizations(), 0);
    }

    #[test]
    fn recolor_rasterizes_once_more() {
        let mut table = GlyphTable::new();
        table.fetch(b'a', true, Rgb::BLACK, paint);
        table.fetch(b'a', true, Rgb::BLACK, paint);
        assert_eq!(table.rasterizations(), 1);
        let red = Rgb::new(0xFF, 0, 0);
        let glyph = table.fetch(b'a', true, red, paint);
        assert_eq!(glyph.bitmap.as_ref().unwrap().pixel(0, 0), [0xFF, 0, 0, 0xFF]);
        assert_eq!(table.rasterizations(), 2);
    }

    #[test]
    fn failed_rasterization_is_cached_as_placeholder() {
        let mut table = GlyphTable::new();
        let fail = |g: &mut Glyph, _: Rgb| g.error = Some("bad raster".into());
        let glyph = table.fetch(7, true, Rgb::BLACK, fail);
        assert!(!glyph.is_usable());
        assert!(glyph.bitmap.as_ref().unwrap().is_empty());
        table.fetch(7, true, Rgb::BLACK, fail);
        assert_eq!(table.rasterizations(), 1);
    }

    #[test]
    fn invalidation_keeps_metrics() {
        let mut table = GlyphTable::new();
        table.get_mut(3).advance = 42;
        table.fetch(3, true, Rgb::BLACK, paint);
        table.invalidate_bitmaps();
        assert!(table.get(3).bitmap.is_none());
        assert_eq!(table.get(3).advance, 42);
    }

    #[test]
    fn binary_coverage_thresholds_at_half() {
        let bitmap = GlyphBitmap::from_coverage(3, 1, &[0x10, 0x80, 0xFF], Rgb::BLACK, false);
        assert_eq!(bitmap.pixel(0, 0)[3], 0);
        assert_eq!(bitmap.pixel(1, 0)[3], 0xFF);
        assert_eq!(bitmap.pixel(2, 0)[3], 0xFF);
    }
}
