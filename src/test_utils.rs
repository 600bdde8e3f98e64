//! Builders for synthetic DVI, TFM, PK and VF files and a scripted font
//! locator, shared by unit and integration tests

use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use flume::{Receiver, Sender};

use crate::dvi::opcodes::{
    BOP, DOWN4, DVI_ID, EOP, FNT1, FNT_DEF1, FNT_NUM_0, NOP, POP, POST, POST_POST, PRE, PUSH, PUT1,
    PUT_RULE, PK_ID, PK_POST, PK_PRE, RIGHT4, SET1, SET_RULE, TRAILER, VF_ID, VF_LONG_CHAR, W0, W4,
    X0, X4, XXX1, XXX4, Y0, Y4, Z0, Z4,
};
use crate::fonts::definition::FontId;
use crate::fonts::locator::{ExitKind, LocatorConfig, ProcessEvent, ProcessLauncher, RunningProcess};
use crate::fonts::pool::FontPool;

/// TeX's usual numerator and denominator: one DVI unit is one scaled point
const TEX_NUMERATOR: u32 = 25_400_000;
const TEX_DENOMINATOR: u32 = 473_628_672;

fn fix_word(value: f64) -> i32 {
    (value * f64::from(1u32 << 20)).round() as i32
}

/// Pool whose locator never finds anything
#[must_use]
pub fn test_pool() -> FontPool {
    FontPool::with_launcher(LocatorConfig::default(), Box::new(ScriptedLauncher::new()))
}

/// Write `data` to `dir/file_name` and hand the file to font `id`
pub fn install_font(
    pool: &mut FontPool,
    id: FontId,
    dir: &Path,
    file_name: &str,
    data: &[u8],
) -> PathBuf {
    let path = dir.join(file_name);
    std::fs::write(&path, data).unwrap();
    pool.receive_font_file(id, &path);
    path
}

/// Commands of one page body
#[derive(Debug, Default)]
pub struct PageBuilder {
    bytes: Vec<u8>,
}

impl PageBuilder {
    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.bytes.extend_from_slice(bytes);
        self
    }

    fn op_i32(self, op: u8, value: i32) -> Self {
        self.raw(&[op]).raw(&value.to_be_bytes())
    }

    pub fn set_char(self, ch: u8) -> Self {
        if ch < 128 {
            self.raw(&[ch])
        } else {
            self.raw(&[SET1, ch])
        }
    }

    pub fn put_char(self, ch: u8) -> Self {
        self.raw(&[PUT1, ch])
    }

    pub fn set_rule(self, height: i32, width: i32) -> Self {
        self.op_i32(SET_RULE, height).raw(&width.to_be_bytes())
    }

    pub fn put_rule(self, height: i32, width: i32) -> Self {
        self.op_i32(PUT_RULE, height).raw(&width.to_be_bytes())
    }

    pub fn nop(self) -> Self {
        self.raw(&[NOP])
    }

    pub fn push(self) -> Self {
        self.raw(&[PUSH])
    }

    pub fn pop(self) -> Self {
        self.raw(&[POP])
    }

    pub fn right(self, a: i32) -> Self {
        self.op_i32(RIGHT4, a)
    }

    pub fn down(self, a: i32) -> Self {
        self.op_i32(DOWN4, a)
    }

    pub fn w(self, a: i32) -> Self {
        self.op_i32(W4, a)
    }

    pub fn w0(self) -> Self {
        self.raw(&[W0])
    }

    pub fn x(self, a: i32) -> Self {
        self.op_i32(X4, a)
    }

    pub fn x0(self) -> Self {
        self.raw(&[X0])
    }

    pub fn y(self, a: i32) -> Self {
        self.op_i32(Y4, a)
    }

    pub fn y0(self) -> Self {
        self.raw(&[Y0])
    }

    pub fn z(self, a: i32) -> Self {
        self.op_i32(Z4, a)
    }

    pub fn z0(self) -> Self {
        self.raw(&[Z0])
    }

    pub fn fnt_num(self, number: u8) -> Self {
        if number < 64 {
            self.raw(&[FNT_NUM_0 + number])
        } else {
            self.raw(&[FNT1, number])
        }
    }

    pub fn special(self, text: &str) -> Self {
        let len = text.len();
        let this = if len < 256 {
            self.raw(&[XXX1, len as u8])
        } else {
            self.op_i32(XXX4, len as i32)
        };
        this.raw(text.as_bytes())
    }
}

struct FontSpec {
    number: u32,
    name: String,
    checksum: u32,
    scale: u32,
    design: u32,
}

fn write_font_def(out: &mut Vec<u8>, font: &FontSpec) {
    out.push(FNT_DEF1 + 3);
    out.extend_from_slice(&font.number.to_be_bytes());
    out.extend_from_slice(&font.checksum.to_be_bytes());
    out.extend_from_slice(&font.scale.to_be_bytes());
    out.extend_from_slice(&font.design.to_be_bytes());
    out.push(0);
    out.push(font.name.len() as u8);
    out.extend_from_slice(font.name.as_bytes());
}

/// Complete DVI file with fonts defined in the postamble
pub struct DviBuilder {
    numerator: u32,
    denominator: u32,
    magnification: u32,
    comment: String,
    fonts: Vec<FontSpec>,
    pages: Vec<Vec<u8>>,
}

impl Default for DviBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DviBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            numerator: TEX_NUMERATOR,
            denominator: TEX_DENOMINATOR,
            magnification: 1000,
            comment: String::new(),
            fonts: Vec::new(),
            pages: Vec::new(),
        }
    }

    pub fn comment(mut self, comment: &str) -> Self {
        self.comment = comment.to_string();
        self
    }

    /// Length of a DVI unit as `numerator / denominator` * 1e-7 m
    pub fn units(mut self, numerator: u32, denominator: u32) -> Self {
        self.numerator = numerator;
        self.denominator = denominator;
        self
    }

    pub fn magnification(mut self, magnification: u32) -> Self {
        self.magnification = magnification;
        self
    }

    pub fn font(mut self, number: u32, name: &str, checksum: u32, scale: u32, design: u32) -> Self {
        self.fonts.push(FontSpec {
            number,
            name: name.to_string(),
            checksum,
            scale,
            design,
        });
        self
    }

    pub fn page(mut self, body: impl FnOnce(PageBuilder) -> PageBuilder) -> Self {
        self.pages.push(body(PageBuilder::default()).bytes);
        self
    }

    #[must_use]
    pub fn build(self) -> Vec<u8> {
        let mut out = vec![PRE, DVI_ID];
        out.extend_from_slice(&self.numerator.to_be_bytes());
        out.extend_from_slice(&self.denominator.to_be_bytes());
        out.extend_from_slice(&self.magnification.to_be_bytes());
        out.push(self.comment.len() as u8);
        out.extend_from_slice(self.comment.as_bytes());

        let mut previous: i32 = -1;
        for (index, body) in self.pages.iter().enumerate() {
            let bop = out.len() as i32;
            out.push(BOP);
            out.extend_from_slice(&(index as i32 + 1).to_be_bytes());
            out.extend_from_slice(&[0; 36]);
            out.extend_from_slice(&previous.to_be_bytes());
            out.extend_from_slice(body);
            out.push(EOP);
            previous = bop;
        }

        let post = out.len() as u32;
        out.push(POST);
        out.extend_from_slice(&previous.to_be_bytes());
        out.extend_from_slice(&self.numerator.to_be_bytes());
        out.extend_from_slice(&self.denominator.to_be_bytes());
        out.extend_from_slice(&self.magnification.to_be_bytes());
        out.extend_from_slice(&[0; 8]); // tallest page, widest page
        out.extend_from_slice(&10u16.to_be_bytes());
        out.extend_from_slice(&(self.pages.len() as u16).to_be_bytes());
        for font in &self.fonts {
            write_font_def(&mut out, font);
        }
        out.push(POST_POST);
        out.extend_from_slice(&post.to_be_bytes());
        out.push(DVI_ID);
        out.extend_from_slice(&[TRAILER; 4]);
        while out.len() % 4 != 0 {
            out.push(TRAILER);
        }
        out
    }
}

/// TFM file with a 10pt design size
pub struct TfmBuilder {
    bc: u16,
    ec: u16,
    checksum: u32,
    design_size_pt: f64,
    widths: Vec<f64>,
    heights: Vec<f64>,
    char_info: Vec<(u16, u8, u8)>,
}

impl TfmBuilder {
    #[must_use]
    pub fn new(bc: u16, ec: u16) -> Self {
        Self {
            bc,
            ec,
            checksum: 0,
            design_size_pt: 10.0,
            widths: vec![0.0],
            heights: vec![0.0],
            char_info: Vec::new(),
        }
    }

    pub fn checksum(mut self, checksum: u32) -> Self {
        self.checksum = checksum;
        self
    }

    pub fn design_size(mut self, points: f64) -> Self {
        self.design_size_pt = points;
        self
    }

    /// Width table in units of the design size
    pub fn widths(mut self, widths: &[f64]) -> Self {
        self.widths = widths.to_vec();
        self
    }

    pub fn heights(mut self, heights: &[f64]) -> Self {
        self.heights = heights.to_vec();
        self
    }

    pub fn char_info(mut self, code: u16, width_index: u8, height_index: u8) -> Self {
        self.char_info.push((code, width_index, height_index));
        self
    }

    #[must_use]
    pub fn build(self) -> Vec<u8> {
        let chars = if self.ec >= self.bc {
            usize::from(self.ec - self.bc) + 1
        } else {
            0
        };
        let (lh, nw, nh, nd, ni) = (2, self.widths.len(), self.heights.len(), 1, 1);
        let lf = 6 + lh + chars + nw + nh + nd + ni;

        let mut out = Vec::with_capacity(lf * 4);
        for value in [lf, lh, usize::from(self.bc), usize::from(self.ec), nw, nh, nd, ni, 0, 0, 0, 0] {
            out.extend_from_slice(&(value as u16).to_be_bytes());
        }
        out.extend_from_slice(&self.checksum.to_be_bytes());
        out.extend_from_slice(&fix_word(self.design_size_pt).to_be_bytes());

        let mut info = vec![[0u8; 4]; chars];
        for (code, width_index, height_index) in self.char_info {
            if let Some(slot) = code
                .checked_sub(self.bc)
                .and_then(|i| info.get_mut(usize::from(i)))
            {
                slot[0] = width_index;
                slot[1] = height_index << 4;
            }
        }
        out.extend(info.into_iter().flatten());
        for value in self.widths.iter().chain(&self.heights) {
            out.extend_from_slice(&fix_word(*value).to_be_bytes());
        }
        out.extend_from_slice(&[0; 8]); // depth and italic correction 0
        out
    }
}

/// PK file whose characters use the short preamble form
pub struct PkBuilder {
    dpi: f64,
    design_size: u32,
    chars: Vec<u8>,
}

impl PkBuilder {
    #[must_use]
    pub fn new(dpi: f64) -> Self {
        Self {
            dpi,
            design_size: 10 << 20,
            chars: Vec::new(),
        }
    }

    #[expect(clippy::too_many_arguments, reason = "mirrors the PK character preamble")]
    fn short_char(
        mut self,
        flag: u8,
        code: u8,
        tfm_width: i32,
        width: u8,
        height: u8,
        hoff: i8,
        voff: i8,
        raster: &[u8],
    ) -> Self {
        let len = 3 + 1 + 4 + raster.len();
        self.chars.push(flag | ((len >> 8) as u8 & 3));
        self.chars.push(len as u8);
        self.chars.push(code);
        self.chars.extend_from_slice(&tfm_width.to_be_bytes()[1..]);
        let escapement = (self.dpi / 72.27 * 10.0 * f64::from(tfm_width) / f64::from(1u32 << 20))
            .round() as u8;
        self.chars.push(escapement);
        self.chars
            .extend_from_slice(&[width, height, hoff as u8, voff as u8]);
        self.chars.extend_from_slice(raster);
        self
    }

    /// Character stored as an uncompressed bitmap; `rows` hold 0 or 1
    pub fn bit_char(self, code: u8, tfm_width: i32, hoff: i8, voff: i8, rows: &[Vec<u8>]) -> Self {
        let height = rows.len();
        let width = rows.first().map_or(0, Vec::len);
        let mut raster = vec![0u8; (width * height).div_ceil(8)];
        for (i, bit) in rows.iter().flatten().enumerate() {
            if *bit != 0 {
                raster[i / 8] |= 0x80 >> (i % 8);
            }
        }
        self.short_char(14 << 4, code, tfm_width, width as u8, height as u8, hoff, voff, &raster)
    }

    /// Character stored as packed run lengths given as nybbles
    #[expect(clippy::too_many_arguments, reason = "mirrors the PK character preamble")]
    pub fn packed_char(
        self,
        code: u8,
        tfm_width: i32,
        dyn_f: u8,
        black_first: bool,
        width: u8,
        height: u8,
        hoff: i8,
        voff: i8,
        nybbles: &[u8],
    ) -> Self {
        let raster: Vec<u8> = nybbles
            .chunks(2)
            .map(|pair| (pair[0] << 4) | pair.get(1).copied().unwrap_or(0))
            .collect();
        let flag = (dyn_f << 4) | if black_first { 8 } else { 0 };
        self.short_char(flag, code, tfm_width, width, height, hoff, voff, &raster)
    }

    #[must_use]
    pub fn build(self) -> Vec<u8> {
        let ppp = (self.dpi / 72.27 * 65536.0).round() as i32;
        let mut out = vec![PK_PRE, PK_ID, 0];
        out.extend_from_slice(&self.design_size.to_be_bytes());
        out.extend_from_slice(&0u32.to_be_bytes());
        out.extend_from_slice(&ppp.to_be_bytes());
        out.extend_from_slice(&ppp.to_be_bytes());
        out.extend_from_slice(&self.chars);
        out.push(PK_POST);
        while out.len() % 4 != 0 {
            out.push(PK_POST);
        }
        out
    }
}

/// VF file with a 10pt design size
pub struct VfBuilder {
    fonts: Vec<FontSpec>,
    packets: Vec<u8>,
}

impl Default for VfBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl VfBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            fonts: Vec::new(),
            packets: Vec::new(),
        }
    }

    /// Local font `number`; `scale` and `design` are fix_words
    pub fn font_def(mut self, number: u32, name: &str, scale: u32, design: u32) -> Self {
        self.fonts.push(FontSpec {
            number,
            name: name.to_string(),
            checksum: 0,
            scale,
            design,
        });
        self
    }

    pub fn char_packet(mut self, code: u32, width: i32, packet: &[u8]) -> Self {
        let short = packet.len() < usize::from(VF_LONG_CHAR)
            && code < 256
            && (0..1 << 24).contains(&width);
        if short {
            self.packets.push(packet.len() as u8);
            self.packets.push(code as u8);
            self.packets.extend_from_slice(&width.to_be_bytes()[1..]);
        } else {
            self.packets.push(VF_LONG_CHAR);
            self.packets.extend_from_slice(&(packet.len() as u32).to_be_bytes());
            self.packets.extend_from_slice(&code.to_be_bytes());
            self.packets.extend_from_slice(&width.to_be_bytes());
        }
        self.packets.extend_from_slice(packet);
        self
    }

    #[must_use]
    pub fn build(self) -> Vec<u8> {
        let mut out = vec![PRE, VF_ID, 0];
        out.extend_from_slice(&0u32.to_be_bytes());
        out.extend_from_slice(&(10u32 << 20).to_be_bytes());
        for font in &self.fonts {
            write_font_def(&mut out, font);
        }
        out.extend_from_slice(&self.packets);
        out.push(POST);
        while out.len() % 4 != 0 {
            out.push(POST);
        }
        out
    }
}

/// One glyph of a [`TtfBuilder`] font
struct TtfGlyph {
    name: String,
    advance: u16,
    /// x_min, y_min, x_max, y_max in font units
    rect: Option<[i16; 4]>,
}

/// A format 6 cmap subtable
struct TtfCmap {
    platform: u16,
    encoding: u16,
    first_code: u16,
    glyph_ids: Vec<u16>,
}

/// Minimal TrueType font whose glyphs are rectangles
///
/// Glyph 0 is an empty `.notdef`; the others are named in a version 2
/// `post` table. Without any [`TtfBuilder::cmap`] the font has no cmap.
pub struct TtfBuilder {
    units_per_em: u16,
    glyphs: Vec<TtfGlyph>,
    cmaps: Vec<TtfCmap>,
}

impl TtfBuilder {
    #[must_use]
    pub fn new(units_per_em: u16) -> Self {
        Self {
            units_per_em,
            glyphs: vec![TtfGlyph {
                name: ".notdef".into(),
                advance: 0,
                rect: None,
            }],
            cmaps: Vec::new(),
        }
    }

    /// Next glyph: a filled rectangle, or no contours at all
    pub fn glyph(mut self, name: &str, advance: u16, rect: Option<[i16; 4]>) -> Self {
        self.glyphs.push(TtfGlyph {
            name: name.to_string(),
            advance,
            rect,
        });
        self
    }

    /// Map codes from `first_code` on to `glyph_ids`
    pub fn cmap(mut self, platform: u16, encoding: u16, first_code: u16, glyph_ids: &[u16]) -> Self {
        self.cmaps.push(TtfCmap {
            platform,
            encoding,
            first_code,
            glyph_ids: glyph_ids.to_vec(),
        });
        self
    }

    fn glyf_and_loca(&self) -> (Vec<u8>, Vec<u8>) {
        let mut glyf = Vec::new();
        let mut loca = Vec::new();
        for glyph in &self.glyphs {
            loca.extend_from_slice(&(glyf.len() as u32).to_be_bytes());
            let Some([x0, y0, x1, y1]) = glyph.rect else {
                continue;
            };
            for v in [1, x0, y0, x1, y1] {
                glyf.extend_from_slice(&v.to_be_bytes());
            }
            glyf.extend_from_slice(&3u16.to_be_bytes()); // last point of the contour
            glyf.extend_from_slice(&0u16.to_be_bytes()); // no instructions
            glyf.extend_from_slice(&[1; 4]); // four on-curve points, long deltas
            for dx in [x0, 0, x1 - x0, 0] {
                glyf.extend_from_slice(&dx.to_be_bytes());
            }
            for dy in [y0, y1 - y0, 0, y0 - y1] {
                glyf.extend_from_slice(&dy.to_be_bytes());
            }
        }
        loca.extend_from_slice(&(glyf.len() as u32).to_be_bytes());
        (glyf, loca)
    }

    fn cmap_table(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&0u16.to_be_bytes());
        out.extend_from_slice(&(self.cmaps.len() as u16).to_be_bytes());
        let mut offset = 4 + 8 * self.cmaps.len() as u32;
        let mut subtables = Vec::new();
        for cmap in &self.cmaps {
            out.extend_from_slice(&cmap.platform.to_be_bytes());
            out.extend_from_slice(&cmap.encoding.to_be_bytes());
            out.extend_from_slice(&offset.to_be_bytes());
            let length = 10 + 2 * cmap.glyph_ids.len() as u16;
            for v in [6, length, 0, cmap.first_code, cmap.glyph_ids.len() as u16] {
                subtables.extend_from_slice(&v.to_be_bytes());
            }
            for id in &cmap.glyph_ids {
                subtables.extend_from_slice(&id.to_be_bytes());
            }
            offset += u32::from(length);
        }
        out.extend_from_slice(&subtables);
        out
    }

    fn post_table(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&0x0002_0000u32.to_be_bytes());
        out.extend_from_slice(&[0; 28]); // italic angle, underline, pitch, memory hints
        out.extend_from_slice(&(self.glyphs.len() as u16).to_be_bytes());
        // .notdef is the first standard Macintosh name, the rest follow them
        for index in 0..self.glyphs.len() as u16 {
            let name_index = if index == 0 { 0 } else { 257 + index };
            out.extend_from_slice(&name_index.to_be_bytes());
        }
        for glyph in &self.glyphs[1..] {
            out.push(glyph.name.len() as u8);
            out.extend_from_slice(glyph.name.as_bytes());
        }
        out
    }

    #[must_use]
    pub fn build(self) -> Vec<u8> {
        let count = self.glyphs.len() as u16;
        let rects = self.glyphs.iter().filter_map(|g| g.rect);
        let bbox = rects.fold([0i16; 4], |b, r| {
            [b[0].min(r[0]), b[1].min(r[1]), b[2].max(r[2]), b[3].max(r[3])]
        });
        let max_advance = self.glyphs.iter().map(|g| g.advance).max().unwrap_or(0);

        let mut head = Vec::new();
        head.extend_from_slice(&0x0001_0000u32.to_be_bytes());
        head.extend_from_slice(&0x0001_0000u32.to_be_bytes());
        head.extend_from_slice(&0u32.to_be_bytes());
        head.extend_from_slice(&0x5F0F_3CF5u32.to_be_bytes());
        head.extend_from_slice(&0u16.to_be_bytes());
        head.extend_from_slice(&self.units_per_em.to_be_bytes());
        head.extend_from_slice(&[0; 16]); // created, modified
        for v in bbox {
            head.extend_from_slice(&v.to_be_bytes());
        }
        // mac style, smallest size, direction hint, long loca, glyph format
        for v in [0u16, 8, 2, 1, 0] {
            head.extend_from_slice(&v.to_be_bytes());
        }

        let mut hhea = Vec::new();
        hhea.extend_from_slice(&0x0001_0000u32.to_be_bytes());
        let ascender = (i32::from(self.units_per_em) * 4 / 5) as i16;
        for v in [ascender, ascender - self.units_per_em as i16, 0] {
            hhea.extend_from_slice(&v.to_be_bytes());
        }
        hhea.extend_from_slice(&max_advance.to_be_bytes());
        hhea.extend_from_slice(&[0; 6]); // side bearings, extent
        hhea.extend_from_slice(&1u16.to_be_bytes()); // vertical caret
        hhea.extend_from_slice(&[0; 14]);
        hhea.extend_from_slice(&count.to_be_bytes());

        let mut hmtx = Vec::new();
        for glyph in &self.glyphs {
            hmtx.extend_from_slice(&glyph.advance.to_be_bytes());
            hmtx.extend_from_slice(&glyph.rect.map_or(0, |r| r[0]).to_be_bytes());
        }

        let mut maxp = Vec::new();
        maxp.extend_from_slice(&0x0001_0000u32.to_be_bytes());
        maxp.extend_from_slice(&count.to_be_bytes());
        // points, contours, then composite and hinting limits
        for v in [4u16, 1, 0, 0, 2, 0, 0, 0, 0, 0, 0, 0, 0] {
            maxp.extend_from_slice(&v.to_be_bytes());
        }

        let (glyf, loca) = self.glyf_and_loca();
        let mut tables: Vec<(&[u8; 4], Vec<u8>)> = Vec::new();
        if !self.cmaps.is_empty() {
            tables.push((b"cmap", self.cmap_table()));
        }
        tables.push((b"glyf", glyf));
        tables.push((b"head", head));
        tables.push((b"hhea", hhea));
        tables.push((b"hmtx", hmtx));
        tables.push((b"loca", loca));
        tables.push((b"maxp", maxp));
        tables.push((b"post", self.post_table()));

        let num_tables = tables.len() as u16;
        let mut out = Vec::new();
        out.extend_from_slice(&0x0001_0000u32.to_be_bytes());
        // table count, search range, entry selector, range shift
        for v in [num_tables, 16 * 8, 3, 16 * num_tables.saturating_sub(8)] {
            out.extend_from_slice(&v.to_be_bytes());
        }
        let mut offset = 12 + 16 * tables.len();
        let mut body = Vec::new();
        for (tag, data) in &tables {
            out.extend_from_slice(*tag);
            out.extend_from_slice(&0u32.to_be_bytes());
            out.extend_from_slice(&(offset as u32).to_be_bytes());
            out.extend_from_slice(&(data.len() as u32).to_be_bytes());
            body.extend_from_slice(data);
            while body.len() % 4 != 0 {
                body.push(0);
            }
            offset = 12 + 16 * tables.len() + body.len();
        }
        out.extend_from_slice(&body);
        out
    }
}

enum Script {
    Respond {
        stdout: Vec<String>,
        stderr: Vec<String>,
        exit: ExitKind,
    },
    Hang,
}

/// Process launcher that plays back canned locator runs, one per launch
///
/// Once the script is used up every launch fails, like a missing program.
#[derive(Default)]
pub struct ScriptedLauncher {
    scripts: VecDeque<Script>,
    launches: Arc<Mutex<Vec<Vec<String>>>>,
    killed: Arc<AtomicBool>,
}

impl ScriptedLauncher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, stdout: &[&str], stderr: &[&str], exit: ExitKind) -> Self {
        self.scripts.push_back(Script::Respond {
            stdout: stdout.iter().map(|s| (*s).to_string()).collect(),
            stderr: stderr.iter().map(|s| (*s).to_string()).collect(),
            exit,
        });
        self
    }

    /// A process that never prints or exits
    pub fn hang(mut self) -> Self {
        self.scripts.push_back(Script::Hang);
        self
    }

    /// Set when a process of this launcher was killed
    #[must_use]
    pub fn kill_flag(&self) -> Arc<AtomicBool> {
        self.killed.clone()
    }

    /// Argument lists of every launch so far
    #[must_use]
    pub fn launches(&self) -> Arc<Mutex<Vec<Vec<String>>>> {
        self.launches.clone()
    }
}

struct ScriptedProcess {
    events: Receiver<ProcessEvent>,
    exit: ExitKind,
    /// Keeps the channel open for hanging processes
    _sender: Option<Sender<ProcessEvent>>,
    killed: Arc<AtomicBool>,
}

impl ProcessLauncher for ScriptedLauncher {
    fn launch(&mut self, _program: &str, args: &[String]) -> io::Result<Box<dyn RunningProcess>> {
        self.launches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(args.to_vec());
        let script = self
            .scripts
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such program"))?;
        let (tx, rx) = flume::unbounded();
        let process = match script {
            Script::Respond {
                stdout,
                stderr,
                exit,
            } => {
                for line in stdout {
                    let _ = tx.send(ProcessEvent::Stdout(line));
                }
                for line in stderr {
                    let _ = tx.send(ProcessEvent::Stderr(line));
                }
                let _ = tx.send(ProcessEvent::StdoutClosed);
                let _ = tx.send(ProcessEvent::StderrClosed);
                ScriptedProcess {
                    events: rx,
                    exit,
                    _sender: None,
                    killed: self.killed.clone(),
                }
            }
            Script::Hang => ScriptedProcess {
                events: rx,
                exit: ExitKind::Abnormal,
                _sender: Some(tx),
                killed: self.killed.clone(),
            },
        };
        Ok(Box::new(process))
    }
}

impl RunningProcess for ScriptedProcess {
    fn events(&self) -> &Receiver<ProcessEvent> {
        &self.events
    }

    fn wait(&mut self) -> io::Result<ExitKind> {
        Ok(self.exit)
    }

    fn kill(&mut self) {
        self.killed.store(true, Ordering::SeqCst);
        self._sender = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dvi_builder_pads_trailer_to_word_boundary() {
        let data = DviBuilder::new().page(|p| p.nop()).build();
        assert_eq!(data.len() % 4, 0);
        assert!(data.ends_with(&[TRAILER; 4]));
        assert_eq!(&data[..2], &[PRE, DVI_ID]);
    }

    #[test]
    fn tfm_length_field_matches() {
        let data = TfmBuilder::new(65, 66).widths(&[0.0, 0.5]).build();
        let lf = u16::from_be_bytes([data[0], data[1]]) as usize;
        assert_eq!(lf * 4, data.len());
    }

    #[test]
    fn scripted_launcher_runs_out() {
        let mut launcher = ScriptedLauncher::new().respond(&["a"], &[], ExitKind::Success);
        assert!(launcher.launch("kpsewhich", &[]).is_ok());
        assert!(launcher.launch("kpsewhich", &[]).is_err());
        assert_eq!(launcher.launches().lock().unwrap().len(), 2);
    }
}
