//! DVI file structure: preamble, postamble, font definitions and page table

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, warn};

use super::cursor::{ByteCursor, EndOfData};
use super::error::DviError;
use super::opcodes::{BOP, DVI_ID, FNT_DEF1, FNT_DEF4, NOP, POST, POST_POST, PRE, TRAILER};
use crate::fonts::definition::FontId;
use crate::fonts::pool::FontPool;

/// Spell units (1/65536 pixel at 1200 dpi) per centimeter
const SPELL_PER_CM: f64 = 1200.0 / 2.54 * 65536.0;

/// Longest DVI unit accepted; TeX itself uses about 5.4e-7 cm
const MAX_CM_PER_DVI_UNIT: f64 = 1.0;

/// Offset of the previous-page pointer inside a BOP command
const BOP_PREV_POINTER: usize = 41;

/// A font definition command as found in DVI and VF files
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FontDefRecord {
    pub number: u32,
    pub checksum: u32,
    /// Scaled size in DVI units
    pub scale: u32,
    /// Design size in DVI units
    pub design: u32,
    pub name: String,
}

impl FontDefRecord {
    /// Read the operands of `opcode`, which must be one of FNT_DEF1..FNT_DEF4
    pub fn read(cursor: &mut ByteCursor<'_>, opcode: u8) -> Result<Self, EndOfData> {
        let number = cursor.read_uint((opcode - FNT_DEF1 + 1) as usize)?;
        let checksum = cursor.read_u32()?;
        let scale = cursor.read_u32()?;
        let design = cursor.read_u32()?;
        let area_len = cursor.read_u8()? as usize;
        let name_len = cursor.read_u8()? as usize;
        let bytes = cursor.take(area_len + name_len)?;
        Ok(Self {
            number,
            checksum,
            scale,
            design,
            name: String::from_utf8_lossy(&bytes[area_len..]).into_owned(),
        })
    }
}

#[derive(Debug)]
pub struct DviDocument {
    path: Option<PathBuf>,
    data: Vec<u8>,
    /// Start of each page's BOP; the extra last entry is the postamble
    page_offsets: Vec<usize>,
    magnification: u32,
    comment: String,
    cm_per_dvi_unit: f64,
    dimconv: f64,
    checksum: u64,
    font_table: Arc<HashMap<u32, FontId>>,
    has_source_specials: bool,
}

impl DviDocument {
    pub fn open(path: &Path, pool: &mut FontPool) -> Result<Self, DviError> {
        let data = std::fs::read(path).map_err(|source| DviError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut document = Self::parse(data, pool)?;
        document.path = Some(path.to_path_buf());
        Ok(document)
    }

    /// Parse the file structure and register its fonts with `pool`
    pub fn parse(data: Vec<u8>, pool: &mut FontPool) -> Result<Self, DviError> {
        let mut cursor = ByteCursor::new(&data);
        if cursor.read_u8()? != PRE || cursor.read_u8()? != DVI_ID {
            return Err(DviError::malformed("not a DVI file"));
        }
        let numerator = cursor.read_u32()?;
        let denominator = cursor.read_u32()?;
        let magnification = cursor.read_u32()?;
        let comment_len = cursor.read_u8()? as usize;
        let comment = String::from_utf8_lossy(cursor.take(comment_len)?).into_owned();
        if numerator == 0 || denominator == 0 || magnification == 0 {
            return Err(DviError::malformed("zero numerator, denominator or magnification"));
        }
        let cm_per_dvi_unit = f64::from(numerator) / f64::from(denominator)
            * f64::from(magnification)
            / 1000.0
            * 1e-5;
        if cm_per_dvi_unit > MAX_CM_PER_DVI_UNIT {
            return Err(DviError::malformed(format!(
                "one DVI unit would be {cm_per_dvi_unit:e} cm"
            )));
        }
        pool.set_cm_per_dvi_unit(cm_per_dvi_unit);

        let postamble = find_postamble(&data)?;
        cursor.seek(postamble)?;
        if cursor.read_u8()? != POST {
            return Err(DviError::malformed("postamble pointer does not point to POST"));
        }
        let last_page = cursor.read_i32()?;
        cursor.skip(22)?; // num, den, mag, max height, max width, max stack depth
        let total_pages = cursor.read_u16()? as usize;

        let mut font_table = HashMap::new();
        loop {
            match cursor.read_u8()? {
                op @ FNT_DEF1..=FNT_DEF4 => {
                    let record = FontDefRecord::read(&mut cursor, op)?;
                    let enlargement = if record.design == 0 {
                        1.0
                    } else {
                        f64::from(record.scale) * f64::from(magnification)
                            / (f64::from(record.design) * 1000.0)
                    };
                    let id = pool.append_or_reuse(&record.name, record.checksum, record.scale, enlargement);
                    font_table.insert(record.number, id);
                }
                NOP => {}
                POST_POST => break,
                op => {
                    return Err(DviError::malformed(format!(
                        "command {op} in postamble font definitions"
                    )));
                }
            }
        }

        let page_offsets = page_table(&data, postamble, last_page, total_pages)?;

        let mut hasher = DefaultHasher::new();
        data.hash(&mut hasher);
        let checksum = hasher.finish();

        debug!(
            "DVI document: {total_pages} pages, {} fonts, comment {comment:?}",
            font_table.len()
        );
        Ok(Self {
            path: None,
            data,
            page_offsets,
            magnification,
            comment,
            cm_per_dvi_unit,
            dimconv: cm_per_dvi_unit * SPELL_PER_CM,
            checksum,
            font_table: Arc::new(font_table),
            has_source_specials: false,
        })
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub fn total_pages(&self) -> usize {
        self.page_offsets.len() - 1
    }

    #[must_use]
    pub fn page_offsets(&self) -> &[usize] {
        &self.page_offsets
    }

    /// Byte range `[start, end)` of page `page` (0-based)
    #[must_use]
    pub fn page_range(&self, page: usize) -> Option<(usize, usize)> {
        (page < self.total_pages()).then(|| (self.page_offsets[page], self.page_offsets[page + 1]))
    }

    #[must_use]
    pub fn magnification(&self) -> u32 {
        self.magnification
    }

    /// Generator comment from the preamble
    #[must_use]
    pub fn comment(&self) -> &str {
        &self.comment
    }

    #[must_use]
    pub fn cm_per_dvi_unit(&self) -> f64 {
        self.cm_per_dvi_unit
    }

    /// Spell units per DVI unit
    #[must_use]
    pub fn dimconv(&self) -> f64 {
        self.dimconv
    }

    #[must_use]
    pub fn checksum(&self) -> u64 {
        self.checksum
    }

    #[must_use]
    pub fn font_table(&self) -> &Arc<HashMap<u32, FontId>> {
        &self.font_table
    }

    #[must_use]
    pub fn has_source_specials(&self) -> bool {
        self.has_source_specials
    }

    pub(crate) fn set_source_specials(&mut self, present: bool) {
        self.has_source_specials = present;
    }
}

/// Scan back over the 223 padding bytes to the postamble pointer
fn find_postamble(data: &[u8]) -> Result<usize, DviError> {
    let padding = data.iter().rev().take_while(|&&b| b == TRAILER).count();
    if padding < 4 {
        return Err(DviError::malformed("trailer has fewer than four 223 bytes"));
    }
    let id_pos = data
        .len()
        .checked_sub(padding + 1)
        .ok_or_else(|| DviError::malformed("file consists of trailer bytes"))?;
    if data[id_pos] != DVI_ID {
        return Err(DviError::malformed(format!(
            "wrong DVI id {} before trailer",
            data[id_pos]
        )));
    }
    let pointer_pos = id_pos
        .checked_sub(4)
        .ok_or_else(|| DviError::malformed("no postamble pointer"))?;
    let mut cursor = ByteCursor::new(data);
    cursor.seek(pointer_pos)?;
    let pointer = cursor.read_u32()? as usize;
    if pointer >= pointer_pos {
        return Err(DviError::malformed(format!("postamble pointer {pointer} out of range")));
    }
    Ok(pointer)
}

/// Follow the BOP back-pointers from the last page to the first
fn page_table(
    data: &[u8],
    postamble: usize,
    last_page: i32,
    total_pages: usize,
) -> Result<Vec<usize>, DviError> {
    let mut offsets = vec![0; total_pages + 1];
    offsets[total_pages] = postamble;
    let mut cursor = ByteCursor::new(data);
    let mut bop = i64::from(last_page);
    for page in (0..total_pages).rev() {
        if bop < 0 || bop as usize >= postamble || data[bop as usize] != BOP {
            return Err(DviError::malformed(format!(
                "page {} does not start with BOP (offset {bop})",
                page + 1
            )));
        }
        offsets[page] = bop as usize;
        cursor.seek(bop as usize + BOP_PREV_POINTER)?;
        bop = i64::from(cursor.read_i32()?);
    }
    if bop != -1 {
        warn!("First page has back pointer {bop}, expected -1");
    }
    Ok(offsets)
}
