//! Packed bitmap (PK) font backend
//!
//! The file is indexed once on load; each character's raster is decoded
//! on first bitmap request and shrunk from the PK resolution to the display
//! resolution with an area-weighted box filter.

use std::path::Path;

use log::{debug, warn};

use super::backend::{FontBackend, FontKind, RasterParams};
use super::error::FontError;
use super::glyph::{Glyph, GlyphBitmap, GlyphTable, Rgb};
use crate::dvi::cursor::ByteCursor;
use crate::dvi::opcodes::{
    MAX_CHARS_IN_FONT, PK_CMD_START, PK_ID, PK_NOOP, PK_POST, PK_PRE, PK_X1, PK_X4, PK_Y,
};

/// Where a character packet lives and how it is encoded
#[derive(Clone, Copy, Debug)]
struct PkEntry {
    flag: u8,
    /// Offset of the character preamble, just past the character code
    offset: usize,
}

/// Raster of one character at PK resolution, one byte per pixel (0 or 1)
#[derive(Debug, PartialEq, Eq)]
pub struct PkRaster {
    pub width: usize,
    pub height: usize,
    pub hoff: i32,
    pub voff: i32,
    pub pixels: Vec<u8>,
}

pub struct PkFont {
    name: String,
    data: Vec<u8>,
    checksum: u32,
    design_size: u32,
    /// Raster resolution of the file in dots per inch
    resolution: f64,
    entries: Vec<Option<PkEntry>>,
    glyphs: GlyphTable,
    params: RasterParams,
}

impl PkFont {
    pub fn open(path: &Path, params: RasterParams) -> Result<Self, FontError> {
        let data = std::fs::read(path).map_err(|source| FontError::FileUnreadable {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&path.display().to_string(), data, params)
    }

    /// Read the preamble and build the character directory
    pub fn parse(name: &str, data: Vec<u8>, params: RasterParams) -> Result<Self, FontError> {
        let mut cursor = ByteCursor::new(&data);
        if cursor.read_u8()? != PK_PRE || cursor.read_u8()? != PK_ID {
            return Err(FontError::pk(name, "bad preamble"));
        }
        let comment_len = cursor.read_u8()? as usize;
        cursor.skip(comment_len)?;
        let design_size = cursor.read_u32()?;
        let checksum = cursor.read_u32()?;
        let hppp = cursor.read_i32()?;
        let vppp = cursor.read_i32()?;
        if hppp != vppp {
            debug!("PK font {name} has non-square aspect ratio {vppp}:{hppp}");
        }
        let resolution = (f64::from(hppp) / 65536.0 * 72.27).round();

        let mut entries = vec![None; MAX_CHARS_IN_FONT];
        let mut glyphs = GlyphTable::new();
        loop {
            let flag = skip_specials(&mut cursor, name)?;
            if flag == PK_POST {
                break;
            }
            let low_bits = flag & 0x7;
            let (packet_len, code) = if low_bits == 7 {
                (cursor.read_u32()? as usize, cursor.read_u32()?)
            } else if low_bits > 3 {
                let len = (((low_bits - 4) as usize) << 16) + cursor.read_u16()? as usize;
                (len, u32::from(cursor.read_u8()?))
            } else {
                let len = ((low_bits as usize) << 8) + cursor.read_u8()? as usize;
                (len, u32::from(cursor.read_u8()?))
            };
            let offset = cursor.pos();
            if code as usize >= MAX_CHARS_IN_FONT {
                warn!("PK font {name}: character {code} ignored");
            } else {
                let tfm_width = if low_bits == 7 {
                    cursor.read_i32()?
                } else {
                    cursor.read_u24()? as i32
                };
                glyphs.get_mut(code as u8).advance = tfm_width;
                entries[code as usize] = Some(PkEntry { flag, offset });
            }
            cursor.seek(offset)?;
            cursor.skip(packet_len)?;
        }

        debug!("PK font {name}: {resolution:.1} dpi raster");
        Ok(Self {
            name: name.to_string(),
            data,
            checksum,
            design_size,
            resolution,
            entries,
            glyphs,
            params,
        })
    }

    /// Design size as a fix_word in points
    #[must_use]
    pub fn design_size(&self) -> u32 {
        self.design_size
    }

    #[must_use]
    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    /// Decode the raster of `ch` at PK resolution
    pub fn decode(&self, ch: u8) -> Result<PkRaster, FontError> {
        let entry = self.entries[ch as usize]
            .ok_or_else(|| FontError::pk(&self.name, format!("no character {ch}")))?;
        decode_char(&self.name, &self.data, entry)
    }

    fn shrink_factor(&self) -> f64 {
        if self.resolution > 0.0 && self.params.dpi > 0.0 {
            self.resolution / self.params.dpi
        } else {
            1.0
        }
    }
}

impl FontBackend for PkFont {
    fn kind(&self) -> FontKind {
        FontKind::Pk
    }

    fn checksum(&self) -> u32 {
        self.checksum
    }

    fn get_glyph(&mut self, ch: u8, want_bitmap: bool, color: Rgb) -> &Glyph {
        let shrink = self.shrink_factor();
        let alpha = self.params.alpha;
        let entry = self.entries[ch as usize];
        let name = &self.name;
        let data = &self.data;
        self.glyphs.fetch(ch, want_bitmap, color, |glyph, color| {
            let Some(entry) = entry else {
                glyph.error = Some(format!("character {ch} not present in {name}"));
                return;
            };
            match decode_char(name, data, entry) {
                Ok(raster) => {
                    let (bitmap, x2, y2) = shrink_raster(&raster, shrink, color, alpha);
                    glyph.bitmap = Some(bitmap);
                    glyph.x2 = x2;
                    glyph.y2 = y2;
                    glyph.error = None;
                }
                Err(e) => {
                    warn!("{e}");
                    glyph.error = Some(e.to_string());
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

/// Skip PK specials, returning the next flag byte (a character flag or POST)
fn skip_specials(cursor: &mut ByteCursor<'_>, name: &str) -> Result<u8, FontError> {
    loop {
        let flag = cursor.read_u8()?;
        if flag < PK_CMD_START {
            return Ok(flag);
        }
        match flag {
            PK_X1..=PK_X4 => {
                let len = cursor.read_uint((flag - PK_X1 + 1) as usize)? as usize;
                cursor.skip(len)?;
            }
            PK_Y => cursor.skip(4)?,
            PK_POST => return Ok(flag),
            PK_NOOP => {}
            _ => return Err(FontError::pk(name, format!("unexpected command {flag}"))),
        }
    }
}

/// Nybble-level reader for the packed run-length encoding
struct PackedReader<'c, 'a> {
    cursor: &'c mut ByteCursor<'a>,
    byte: u8,
    high_nybble_next: bool,
    dyn_f: u32,
    repeat_count: usize,
}

impl PackedReader<'_, '_> {
    fn nybble(&mut self) -> Result<u32, FontError> {
        if self.high_nybble_next {
            self.byte = self.cursor.read_u8()?;
            self.high_nybble_next = false;
            Ok(u32::from(self.byte >> 4))
        } else {
            self.high_nybble_next = true;
            Ok(u32::from(self.byte & 0xF))
        }
    }

    /// Next run length, consuming any repeat-count prefix on the way
    fn run_length(&mut self, name: &str) -> Result<usize, FontError> {
        loop {
            let i = self.nybble()?;
            match i {
                14 => self.repeat_count = self.plain_number(name)?,
                15 => self.repeat_count = 1,
                _ => return self.finish_number(i, name),
            }
        }
    }

    /// A packed number that may not itself be a repeat count
    fn plain_number(&mut self, name: &str) -> Result<usize, FontError> {
        let i = self.nybble()?;
        if i >= 14 {
            return Err(FontError::pk(name, "nested repeat count"));
        }
        self.finish_number(i, name)
    }

    fn finish_number(&mut self, first: u32, name: &str) -> Result<usize, FontError> {
        let dyn_f = self.dyn_f;
        if first == 0 {
            let mut zeros = 0;
            let mut j = loop {
                let n = self.nybble()?;
                zeros += 1;
                if n != 0 {
                    break n;
                }
                if zeros > 7 {
                    return Err(FontError::pk(name, "run length overflow"));
                }
            };
            for _ in 0..zeros {
                j = (j << 4) | self.nybble()?;
            }
            return Ok((j + ((13 - dyn_f) << 4) + dyn_f - 15) as usize);
        }
        if first <= dyn_f {
            return Ok(first as usize);
        }
        Ok((((first - dyn_f - 1) << 4) + self.nybble()? + dyn_f + 1) as usize)
    }
}

fn decode_char(name: &str, data: &[u8], entry: PkEntry) -> Result<PkRaster, FontError> {
    let mut cursor = ByteCursor::new(data);
    cursor.seek(entry.offset)?;
    let dyn_f = u32::from(entry.flag >> 4);
    if dyn_f == 15 {
        return Err(FontError::pk(name, "invalid dyn_f 15"));
    }
    let mut paint = entry.flag & 8 != 0;
    let low_bits = entry.flag & 0x7;
    let n = if low_bits == 7 {
        4
    } else if low_bits > 3 {
        2
    } else {
        1
    };

    if n == 4 {
        cursor.skip(4 + 4)?; // tfm width, horizontal escapement
    } else {
        cursor.skip(3)?;
    }
    cursor.skip(n)?; // vertical escapement, or the single escapement of short forms
    let width = cursor.read_uint(n)? as usize;
    let height = cursor.read_uint(n)? as usize;
    let hoff = cursor.read_int(n)?;
    let voff = cursor.read_int(n)?;
    if width > 0x7FFF || height > 0x7FFF {
        return Err(FontError::pk(name, format!("character {width}x{height} too large")));
    }

    let mut pixels = vec![0u8; width * height];
    if width > 0 && height > 0 {
        if dyn_f == 14 {
            let mut bit = 8;
            let mut byte = 0u8;
            for px in pixels.iter_mut() {
                if bit == 8 {
                    byte = cursor.read_u8()?;
                    bit = 0;
                }
                *px = (byte >> (7 - bit)) & 1;
                bit += 1;
            }
        } else {
            decode_runs(name, &mut cursor, dyn_f, &mut paint, width, height, &mut pixels)?;
        }
    }

    Ok(PkRaster {
        width,
        height,
        hoff,
        voff,
        pixels,
    })
}

fn decode_runs(
    name: &str,
    cursor: &mut ByteCursor<'_>,
    dyn_f: u32,
    paint: &mut bool,
    width: usize,
    height: usize,
    pixels: &mut [u8],
) -> Result<(), FontError> {
    let mut reader = PackedReader {
        cursor,
        byte: 0,
        high_nybble_next: true,
        dyn_f,
        repeat_count: 0,
    };
    let mut row = 0;
    let mut col = 0;
    while row < height {
        let mut count = reader.run_length(name)?;
        while count > 0 {
            if row >= height {
                return Err(FontError::pk(name, "too many bits"));
            }
            let room = width - col;
            let run = count.min(room);
            if *paint {
                pixels[row * width + col..row * width + col + run].fill(1);
            }
            col += run;
            count -= run;
            if col == width {
                let repeats = std::mem::take(&mut reader.repeat_count);
                for k in 1..=repeats {
                    if row + k >= height {
                        return Err(FontError::pk(name, "repeat count past last row"));
                    }
                    pixels.copy_within(row * width..(row + 1) * width, (row + k) * width);
                }
                row += repeats + 1;
                col = 0;
            }
        }
        *paint = !*paint;
    }
    Ok(())
}

/// Box-filter a raster by `shrink`, returning the colored bitmap and hotspot
fn shrink_raster(raster: &PkRaster, shrink: f64, color: Rgb, alpha: bool) -> (GlyphBitmap, i32, i32) {
    let scaled = |len: usize| ((len as f64 / shrink - 1e-6).ceil() as usize).max(1);
    let out_w = scaled(raster.width);
    let out_h = scaled(raster.height);
    let mut coverage = vec![0f32; out_w * out_h];

    // each source pixel covers [s/shrink, (s+1)/shrink) in output space
    let spans = |s: usize, limit: usize| {
        let lo = s as f64 / shrink;
        let hi = (s + 1) as f64 / shrink;
        let first = lo.floor() as usize;
        let last = (hi.ceil() as usize).min(limit);
        (first..last).filter_map(move |o| {
            let overlap = hi.min((o + 1) as f64) - lo.max(o as f64);
            (overlap > 0.0).then_some((o, overlap as f32))
        })
    };

    for sy in 0..raster.height {
        for sx in 0..raster.width {
            if raster.pixels[sy * raster.width + sx] == 0 {
                continue;
            }
            for (oy, wy) in spans(sy, out_h) {
                for (ox, wx) in spans(sx, out_w) {
                    coverage[oy * out_w + ox] += wx * wy;
                }
            }
        }
    }

    let mask: Vec<u8> = coverage
        .iter()
        .map(|c| (c.min(1.0) * 255.0 + 0.5) as u8)
        .collect();
    let bitmap = GlyphBitmap::from_coverage(out_w as u32, out_h as u32, &mask, color, alpha);
    let x2 = (f64::from(raster.hoff) / shrink).round() as i32;
    let y2 = (f64::from(raster.voff) / shrink).round() as i32;
    (bitmap, x2, y2)
}
