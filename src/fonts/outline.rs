//! Outline font backend (TrueType, OpenType and CFF fonts)
//!
//! Outlines come from `ttf-parser` and are filled with the `tiny-skia`
//! rasterizer that `resvg` re-exports. The face is parsed once when the
//! font is opened; the outlines of the 256 addressable characters are
//! kept in font units and only scaled and filled per request.

use std::path::Path;

use log::{debug, warn};
use resvg::tiny_skia::{FillRule, Paint, Path as SkiaPath, PathBuilder, Pixmap, Transform};
use ttf_parser::{Face, GlyphId, OutlineBuilder, PlatformId};

use super::backend::{FontBackend, FontKind, RasterParams};
use super::error::FontError;
use super::fontmap::OutlineHints;
use super::glyph::{Glyph, GlyphBitmap, GlyphTable, Rgb};
use super::tfm::FIX_WORD_UNIT;
use crate::dvi::opcodes::MAX_CHARS_IN_FONT;

/// Windows symbol fonts place their glyphs at U+F000..U+F0FF
const SYMBOL_BASE: u32 = 0xF000;

/// Shape of one character code
#[derive(Clone, Debug)]
enum CharOutline {
    /// No glyph for this code
    Unmapped,
    /// A glyph without contours, such as the space
    Blank,
    /// Contours in font units, y up
    Contours(SkiaPath),
}

pub struct OutlineFont {
    name: String,
    outlines: Vec<CharOutline>,
    units_per_em: f64,
    /// Nominal size the font is drawn at, in TeX points
    design_size_pt: f64,
    hints: OutlineHints,
    glyphs: GlyphTable,
    params: RasterParams,
}

impl OutlineFont {
    pub fn open(
        path: &Path,
        design_size_pt: f64,
        hints: OutlineHints,
        params: RasterParams,
    ) -> Result<Self, FontError> {
        let data = std::fs::read(path).map_err(|source| FontError::FileUnreadable {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&path.display().to_string(), &data, design_size_pt, hints, params)
    }

    pub fn parse(
        name: &str,
        data: &[u8],
        design_size_pt: f64,
        hints: OutlineHints,
        params: RasterParams,
    ) -> Result<Self, FontError> {
        let face = Face::parse(data, 0).map_err(|e| FontError::outline(name, e.to_string()))?;
        let units_per_em = f64::from(face.units_per_em());

        let mut glyphs = GlyphTable::new();
        let mut outlines = Vec::with_capacity(MAX_CHARS_IN_FONT);
        for (code, glyph_id) in build_char_map(&face, &hints).into_iter().enumerate() {
            let Some(glyph_id) = glyph_id else {
                outlines.push(CharOutline::Unmapped);
                continue;
            };
            let advance = f64::from(face.glyph_hor_advance(glyph_id).unwrap_or(0));
            glyphs.get_mut(code as u8).advance =
                (advance / units_per_em * hints.extend * FIX_WORD_UNIT).round() as i32;

            let mut builder = SkiaOutline(PathBuilder::new());
            let path = face
                .outline_glyph(glyph_id, &mut builder)
                .and_then(|_| builder.0.finish());
            outlines.push(path.map_or(CharOutline::Blank, CharOutline::Contours));
        }

        debug!(
            "Outline font {name}: {} mapped characters",
            outlines
                .iter()
                .filter(|o| !matches!(o, CharOutline::Unmapped))
                .count()
        );
        Ok(Self {
            name: name.to_string(),
            outlines,
            units_per_em,
            design_size_pt,
            hints,
            glyphs,
            params,
        })
    }

    /// Pixels per em; whole pixels when hinting is on
    fn em_px(&self) -> f64 {
        let em = self.design_size_pt * self.params.dpi / 72.27;
        if self.params.hinting { em.round() } else { em }
    }
}

/// Character code → glyph map: the encoding vector first, then a
/// suitable cmap subtable, then the identity
fn build_char_map(face: &Face<'_>, hints: &OutlineHints) -> Vec<Option<GlyphId>> {
    if let Some(encoding) = &hints.encoding {
        return (0..MAX_CHARS_IN_FONT)
            .map(|code| {
                encoding
                    .get(code)
                    .and_then(|glyph_name| face.glyph_index_by_name(glyph_name))
            })
            .collect();
    }

    if let Some(cmap) = face.tables().cmap {
        let symbol = cmap
            .subtables
            .into_iter()
            .find(|s| s.platform_id == PlatformId::Windows && s.encoding_id == 0);
        if let Some(subtable) = symbol {
            return (0..MAX_CHARS_IN_FONT as u32)
                .map(|code| subtable.glyph_index(SYMBOL_BASE | code))
                .collect();
        }
        if let Some(subtable) = cmap.subtables.into_iter().find(|s| s.is_unicode()) {
            return (0..MAX_CHARS_IN_FONT as u32)
                .map(|code| subtable.glyph_index(code))
                .collect();
        }
    }

    (0..MAX_CHARS_IN_FONT as u16)
        .map(|code| (code < face.number_of_glyphs()).then_some(GlyphId(code)))
        .collect()
}

/// Collects a glyph outline into a tiny-skia path, in font units
struct SkiaOutline(PathBuilder);

impl OutlineBuilder for SkiaOutline {
    fn move_to(&mut self, x: f32, y: f32) {
        self.0.move_to(x, y);
    }

    fn line_to(&mut self, x: f32, y: f32) {
        self.0.line_to(x, y);
    }

    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        self.0.quad_to(x1, y1, x, y);
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        self.0.cubic_to(x1, y1, x2, y2, x, y);
    }

    fn close(&mut self) {
        self.0.close();
    }
}

/// Rasterized glyph: 8-bit coverage plus the reference point inside it
struct Coverage {
    width: u32,
    height: u32,
    alpha: Vec<u8>,
    x2: i32,
    y2: i32,
}

fn rasterize(
    contours: &SkiaPath,
    units_per_em: f64,
    em_px: f64,
    hints: &OutlineHints,
) -> Result<Coverage, String> {
    let scale = (em_px / units_per_em) as f32;
    let to_pixels = Transform::from_row(
        scale * hints.extend as f32,
        0.0,
        scale * hints.slant as f32,
        -scale,
        0.0,
        0.0,
    );
    let path = contours
        .clone()
        .transform(to_pixels)
        .ok_or_else(|| "degenerate glyph transform".to_string())?;
    let bounds = path.bounds();
    let left = bounds.left().floor();
    let top = bounds.top().floor();
    let width = (bounds.right().ceil() - left).max(1.0) as u32;
    let height = (bounds.bottom().ceil() - top).max(1.0) as u32;

    let mut pixmap =
        Pixmap::new(width, height).ok_or_else(|| format!("cannot allocate {width}x{height}"))?;
    let mut paint = Paint::default();
    paint.set_color_rgba8(0, 0, 0, 0xFF);
    paint.anti_alias = true;
    pixmap.fill_path(
        &path,
        &paint,
        FillRule::Winding,
        Transform::from_translate(-left, -top),
        None,
    );

    let alpha = pixmap.data().chunks_exact(4).map(|px| px[3]).collect();
    Ok(Coverage {
        width,
        height,
        alpha,
        x2: -left as i32,
        y2: -top as i32,
    })
}

impl FontBackend for OutlineFont {
    fn kind(&self) -> FontKind {
        FontKind::Outline
    }

    fn checksum(&self) -> u32 {
        0
    }

    fn get_glyph(&mut self, ch: u8, want_bitmap: bool, color: Rgb) -> &Glyph {
        let em_px = self.em_px();
        let alpha = self.params.alpha;
        let (name, outline, units_per_em, hints) = (
            &self.name,
            &self.outlines[usize::from(ch)],
            self.units_per_em,
            &self.hints,
        );
        self.glyphs.fetch(ch, want_bitmap, color, |glyph, color| {
            let contours = match outline {
                CharOutline::Unmapped => {
                    glyph.error = Some(format!("character {ch} not mapped in {name}"));
                    return;
                }
                CharOutline::Blank => {
                    glyph.bitmap = Some(GlyphBitmap::empty());
                    return;
                }
                CharOutline::Contours(contours) => contours,
            };
            match rasterize(contours, units_per_em, em_px, hints) {
                Ok(coverage) => {
                    glyph.bitmap = Some(GlyphBitmap::from_coverage(
                        coverage.width,
                        coverage.height,
                        &coverage.alpha,
                        color,
                        alpha,
                    ));
                    glyph.x2 = coverage.x2;
                    glyph.y2 = coverage.y2;
                    glyph.error = None;
                }
                Err(e) => {
                    warn!("Outline font {name}, character {ch}: {e}");
                    glyph.error = Some(e);
                }
            }
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
    use std::sync::Arc;

    use super::*;
    use crate::test_utils::TtfBuilder;

    /// 'I' is a bar 200 units wide and 700 high, 'J' a wider block, and
    /// the space has no contours
    fn bars() -> TtfBuilder {
        TtfBuilder::new(1000)
            .glyph("bar.narrow", 400, Some([100, 0, 300, 700]))
            .glyph("bar.wide", 900, Some([50, -100, 850, 600]))
            .glyph("blank", 333, None)
    }

    fn unhinted(alpha: bool) -> RasterParams {
        RasterParams {
            dpi: 100.0,
            alpha,
            hinting: false,
        }
    }

    fn glyph_ids(data: &[u8], hints: &OutlineHints) -> Vec<Option<u16>> {
        let face = Face::parse(data, 0).unwrap();
        build_char_map(&face, hints)
            .into_iter()
            .map(|id| id.map(|g| g.0))
            .collect()
    }

    fn first_inked_column(bitmap: &GlyphBitmap, row: u32) -> Option<u32> {
        (0..bitmap.width()).find(|&x| bitmap.pixel(x, row)[3] > 0)
    }

    #[test]
    fn garbage_is_not_an_outline_font() {
        let result = OutlineFont::parse(
            "junk.ttf",
            &[0, 1, 2, 3, 4, 5],
            10.0,
            OutlineHints::default(),
            RasterParams::default(),
        );
        assert!(matches!(result, Err(FontError::Outline { .. })));
    }

    #[test]
    fn hinting_rounds_the_em_size() {
        let data = bars().build();
        let hinted =
            OutlineFont::parse("t", &data, 10.0, OutlineHints::default(), RasterParams::default())
                .unwrap();
        // 10pt at 100 dpi is 13.84 px
        assert!((hinted.em_px() - 14.0).abs() < 1e-9);
        let plain =
            OutlineFont::parse("t", &data, 10.0, OutlineHints::default(), unhinted(true)).unwrap();
        assert!((plain.em_px() - 13.837).abs() < 1e-3);
    }

    #[test]
    fn without_a_cmap_codes_are_glyph_ids() {
        let ids = glyph_ids(&bars().build(), &OutlineHints::default());
        assert_eq!(ids[0], Some(0));
        assert_eq!(ids[2], Some(2));
        assert_eq!(ids[3], Some(3));
        assert_eq!(ids[4], None);
    }

    #[test]
    fn unicode_cmap_maps_character_codes() {
        let data = bars().cmap(0, 3, u16::from(b'I'), &[1, 2]).build();
        let ids = glyph_ids(&data, &OutlineHints::default());
        assert_eq!(ids[usize::from(b'I')], Some(1));
        assert_eq!(ids[usize::from(b'J')], Some(2));
        assert_eq!(ids[1], None);
    }

    #[test]
    fn windows_symbol_cmap_wins_over_unicode() {
        let data = bars()
            .cmap(0, 3, u16::from(b'I'), &[1])
            .cmap(3, 0, 0xF000 | u16::from(b'I'), &[2])
            .build();
        let ids = glyph_ids(&data, &OutlineHints::default());
        assert_eq!(ids[usize::from(b'I')], Some(2));
    }

    #[test]
    fn encoding_vector_wins_over_every_cmap() {
        let data = bars()
            .cmap(0, 3, u16::from(b'I'), &[1])
            .cmap(3, 0, 0xF000 | u16::from(b'I'), &[2])
            .build();
        let mut names = vec![".notdef".to_string(); MAX_CHARS_IN_FONT];
        names[usize::from(b'I')] = "blank".into();
        names[usize::from(b'K')] = "bar.narrow".into();
        names[usize::from(b'L')] = "no.such.glyph".into();
        let hints = OutlineHints {
            encoding: Some(Arc::new(names)),
            ..OutlineHints::default()
        };
        let ids = glyph_ids(&data, &hints);
        assert_eq!(ids[usize::from(b'I')], Some(3));
        assert_eq!(ids[usize::from(b'K')], Some(1));
        assert_eq!(ids[usize::from(b'L')], None);
    }

    #[test]
    fn bar_is_rasterized_above_the_baseline() {
        let data = bars().build();
        let mut font =
            OutlineFont::parse("bars", &data, 10.0, OutlineHints::default(), unhinted(false))
                .unwrap();
        let glyph = font.get_glyph(1, true, Rgb::BLACK);
        assert!(glyph.is_usable());
        // 400/1000 of the design size
        assert_eq!(glyph.advance, 419_430);
        let bitmap = glyph.bitmap.as_ref().unwrap();
        // 100..300 and 0..700 units at 13.84 px per em
        assert_eq!(bitmap.width(), 4);
        assert_eq!(bitmap.height(), 10);
        assert_eq!((glyph.x2, glyph.y2), (-1, 10));
        assert_eq!(bitmap.pixel(1, 5), [0, 0, 0, 0xFF]);

        // the wide block reaches below the baseline
        let wide = font.get_glyph(2, true, Rgb::BLACK);
        let bitmap = wide.bitmap.as_ref().unwrap();
        assert!(bitmap.height() > 10);
        assert!(wide.y2 < bitmap.height() as i32);
    }

    #[test]
    fn glyphs_without_contours_are_blank_but_usable() {
        let data = bars().build();
        let mut font =
            OutlineFont::parse("bars", &data, 10.0, OutlineHints::default(), unhinted(true))
                .unwrap();
        let space = font.get_glyph(3, true, Rgb::BLACK);
        assert!(space.is_usable());
        assert!(space.bitmap.as_ref().unwrap().is_empty());
        assert!(space.advance > 0);

        let unmapped = font.get_glyph(200, true, Rgb::BLACK);
        assert!(!unmapped.is_usable());
    }

    #[test]
    fn slant_shifts_the_top_of_the_glyph_right() {
        let data = bars().build();
        let mut upright =
            OutlineFont::parse("bars", &data, 10.0, OutlineHints::default(), unhinted(true))
                .unwrap();
        let upright = upright.get_glyph(1, true, Rgb::BLACK).bitmap.clone().unwrap();

        let slanted_hints = OutlineHints {
            slant: 0.5,
            ..OutlineHints::default()
        };
        let mut slanted =
            OutlineFont::parse("bars", &data, 10.0, slanted_hints, unhinted(true)).unwrap();
        let slanted = slanted.get_glyph(1, true, Rgb::BLACK).bitmap.clone().unwrap();

        assert!(slanted.width() > upright.width() + 2);
        assert_eq!(slanted.height(), upright.height());
        let bottom = slanted.height() - 1;
        let top_start = first_inked_column(&slanted, 0).unwrap();
        let bottom_start = first_inked_column(&slanted, bottom).unwrap();
        assert!(top_start >= bottom_start + 3, "top {top_start}, bottom {bottom_start}");
        assert_eq!(
            first_inked_column(&upright, 0),
            first_inked_column(&upright, bottom)
        );
    }

    #[test]
    fn binary_mode_drops_partial_coverage() {
        let data = bars().build();
        let partial = |bitmap: &GlyphBitmap| {
            bitmap
                .pixels()
                .chunks_exact(4)
                .filter(|px| px[3] != 0 && px[3] != 0xFF)
                .count()
        };
        let mut font =
            OutlineFont::parse("bars", &data, 10.0, OutlineHints::default(), unhinted(true))
                .unwrap();
        let smooth = font.get_glyph(1, true, Rgb::BLACK).bitmap.clone().unwrap();
        assert!(partial(&smooth) > 0);

        font.set_raster_params(unhinted(false));
        let binary = font.get_glyph(1, true, Rgb::BLACK).bitmap.clone().unwrap();
        assert_eq!(partial(&binary), 0);
        assert_eq!(binary.pixel(1, 5)[3], 0xFF);
        assert_eq!(font.rasterizations(), 2);
    }
}
