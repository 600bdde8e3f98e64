//! Metrics-only backend reading TeX font metric files
//!
//! Glyph shapes are not available, so bitmap requests produce a solid
//! rectangle sized from the width and height tables.

use std::path::Path;

use log::debug;

use super::backend::{FontBackend, FontKind, RasterParams};
use super::error::FontError;
use super::glyph::{Glyph, GlyphBitmap, GlyphTable, Rgb};
use crate::dvi::cursor::ByteCursor;
use crate::dvi::opcodes::MAX_CHARS_IN_FONT;

/// Largest placeholder edge in pixels
const MAX_PLACEHOLDER_PX: u32 = 50;

/// Width substituted for zero-width entries, in units of the design size
const ZERO_WIDTH_SUBSTITUTE: f64 = 0.4;

pub(crate) const FIX_WORD_UNIT: f64 = (1u32 << 20) as f64;

pub struct TfmFont {
    name: String,
    checksum: u32,
    /// Design size in TeX points
    design_size_pt: f64,
    /// Per-character height in units of the design size
    heights: Vec<f64>,
    glyphs: GlyphTable,
    params: RasterParams,
}

impl TfmFont {
    pub fn open(path: &Path, params: RasterParams) -> Result<Self, FontError> {
        let data = std::fs::read(path).map_err(|source| FontError::FileUnreadable {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&path.display().to_string(), &data, params)
    }

    /// Parse the header, char-info, width and height tables
    pub fn parse(name: &str, data: &[u8], params: RasterParams) -> Result<Self, FontError> {
        let mut cursor = ByteCursor::new(data);
        let _lf = cursor.read_u16()?;
        let lh = cursor.read_u16()? as usize;
        let bc = cursor.read_u16()? as usize;
        let ec = cursor.read_u16()? as usize;
        let nw = cursor.read_u16()? as usize;
        let nh = cursor.read_u16()? as usize;
        let _nd = cursor.read_u16()?;

        if bc > ec || ec >= MAX_CHARS_IN_FONT {
            return Err(FontError::invalid_table(
                name,
                format!("character range {bc}..={ec}"),
            ));
        }

        cursor.seek(24)?;
        let checksum = cursor.read_u32()?;
        let design_size_pt = f64::from(cursor.read_i32()?) / FIX_WORD_UNIT;

        let char_info_start = 24 + 4 * lh;
        let width_start = char_info_start + 4 * (ec - bc + 1);
        let height_start = width_start + 4 * nw;

        cursor.seek(width_start)?;
        let mut widths = Vec::with_capacity(nw);
        for _ in 0..nw {
            let raw = cursor.read_i32()?;
            widths.push(if raw == 0 {
                (ZERO_WIDTH_SUBSTITUTE * FIX_WORD_UNIT) as i32
            } else {
                raw
            });
        }

        cursor.seek(height_start)?;
        let mut height_table = Vec::with_capacity(nh);
        for _ in 0..nh {
            height_table.push(f64::from(cursor.read_i32()?) / FIX_WORD_UNIT);
        }

        let mut glyphs = GlyphTable::new();
        let mut heights = vec![0.0; MAX_CHARS_IN_FONT];
        cursor.seek(char_info_start)?;
        for code in bc..=ec {
            let info = cursor.take(4)?;
            let width_index = info[0] as usize;
            let height_index = (info[1] >> 4) as usize;
            if width_index >= nw {
                return Err(FontError::invalid_table(
                    name,
                    format!("char-info of {code} has width index {width_index}, table has {nw}"),
                ));
            }
            if height_index >= nh && height_index != 0 {
                return Err(FontError::invalid_table(
                    name,
                    format!("char-info of {code} has height index {height_index}, table has {nh}"),
                ));
            }
            glyphs.get_mut(code as u8).advance = widths[width_index];
            heights[code] = height_table.get(height_index).copied().unwrap_or(0.0);
        }

        debug!("TFM {name}: chars {bc}..={ec}, design size {design_size_pt:.2}pt");

        Ok(Self {
            name: name.to_string(),
            checksum,
            design_size_pt,
            heights,
            glyphs,
            params,
        })
    }

    #[must_use]
    pub fn design_size_pt(&self) -> f64 {
        self.design_size_pt
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn placeholder_edge(&self, units_of_design_size: f64) -> u32 {
        let px = self.params.dpi * self.design_size_pt * units_of_design_size * 100.0 / 7227.0 + 0.5;
        (px.max(0.0) as u32).min(MAX_PLACEHOLDER_PX)
    }
}

impl FontBackend for TfmFont {
    fn kind(&self) -> FontKind {
        FontKind::Tfm
    }

    fn checksum(&self) -> u32 {
        self.checksum
    }

    fn get_glyph(&mut self, ch: u8, want_bitmap: bool, color: Rgb) -> &Glyph {
        let width = self.placeholder_edge(f64::from(self.glyphs.get(ch).advance) / FIX_WORD_UNIT);
        let height = self.placeholder_edge(self.heights[ch as usize]);
        self.glyphs.fetch(ch, want_bitmap, color, |glyph, color| {
            glyph.bitmap = Some(GlyphBitmap::solid(width, height, color));
            glyph.x2 = 0;
            glyph.y2 = height as i32;
        })
    }

    fn set_raster_params(&mut self, params: RasterParams) {
        if self.params != params {
            self.params = params;
            self.glyphs.invalidate_bitmaps();
        }
    }

    fn rasterizations(&self) -> u64 {
        self.glyphs.rasterizations()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TfmBuilder;

    fn params(dpi: f64) -> RasterParams {
        RasterParams {
            dpi,
            ..RasterParams::default()
        }
    }

    #[test]
    fn reads_widths_through_char_info() {
        let data = TfmBuilder::new(65, 66)
            .widths(&[0.0, 0.5, 0.25])
            .heights(&[0.0, 0.7])
            .char_info(65, 1, 1)
            .char_info(66, 2, 0)
            .build();
        let mut font = TfmFont::parse("test.tfm", &data, params(100.0)).unwrap();
        assert_eq!(font.get_glyph(65, false, Rgb::BLACK).advance, 1 << 19);
        assert_eq!(font.get_glyph(66, false, Rgb::BLACK).advance, 1 << 18);
        assert!((font.design_size_pt() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn zero_width_is_replaced() {
        let data = TfmBuilder::new(0, 0).widths(&[0.0]).char_info(0, 0, 0).build();
        let mut font = TfmFont::parse("z.tfm", &data, params(100.0)).unwrap();
        let expected = (0.4 * FIX_WORD_UNIT) as i32;
        assert_eq!(font.get_glyph(0, false, Rgb::BLACK).advance, expected);
    }

    #[test]
    fn width_index_out_of_table_is_invalid() {
        let data = TfmBuilder::new(5, 10)
            .widths(&[0.0, 0.1, 0.2, 0.3])
            .char_info(7, 4, 0)
            .build();
        let err = TfmFont::parse("bad.tfm", &data, params(100.0)).err().unwrap();
        assert!(matches!(err, FontError::InvalidTable { .. }));
    }

    #[test]
    fn inverted_character_range_is_invalid() {
        let data = TfmBuilder::new(10, 5).build();
        assert!(matches!(
            TfmFont::parse("bad.tfm", &data, params(100.0)),
            Err(FontError::InvalidTable { .. })
        ));
    }

    #[test]
    fn placeholder_is_clamped_and_colored() {
        let data = TfmBuilder::new(65, 65)
            .widths(&[0.0, 100.0])
            .heights(&[0.0, 0.5])
            .char_info(65, 1, 1)
            .build();
        let mut font = TfmFont::parse("big.tfm", &data, params(7227.0 / 1000.0)).unwrap();
        let red = Rgb::new(0xFF, 0, 0);
        let glyph = font.get_glyph(65, true, red);
        let bitmap = glyph.bitmap.as_ref().unwrap();
        assert_eq!(bitmap.width(), MAX_PLACEHOLDER_PX);
        // 7.227 dpi * 10pt * 0.5 * 100 / 7227 = 0.05 px, rounds to 0
        assert_eq!(bitmap.height(), 0);
        assert_eq!(glyph.y2, 0);
        assert_eq!(font.rasterizations(), 1);
    }

    #[test]
    fn placeholder_height_follows_height_table() {
        let data = TfmBuilder::new(65, 65)
            .widths(&[0.0, 0.5])
            .heights(&[0.0, 0.5])
            .char_info(65, 1, 1)
            .build();
        let mut font = TfmFont::parse("h.tfm", &data, params(722.7)).unwrap();
        // 722.7 dpi * 10pt / 72.27 = 100 px per design size
        let glyph = font.get_glyph(65, true, Rgb::BLACK);
        assert_eq!(glyph.bitmap.as_ref().unwrap().width(), 50);
        assert_eq!(glyph.bitmap.as_ref().unwrap().height(), 50);
        assert_eq!(glyph.y2, 50);
    }
}
