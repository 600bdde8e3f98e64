//! One font as referenced by a document
//!
//! A definition starts out unlocated and empty. The pool's location
//! pipeline hands it a file name; the file's magic number and extension
//! then select what the definition becomes. Real fonts construct their
//! backend on the first glyph request, virtual fonts read their macro
//! table immediately because the sub-fonts it references must be located
//! as well.

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bitflags::bitflags;
use log::{error, warn};

use super::backend::{BackendState, FontBackend, FontKind, RasterParams};
use super::error::FontError;
use super::fontmap::OutlineHints;
use super::glyph::{Glyph, Rgb};
use super::pk::PkFont;
use super::tfm::{TfmFont, FIX_WORD_UNIT};
use super::vf::{MacroTable, VfIndex};
use crate::dvi::opcodes::{PK_MAGIC, VF_MAGIC};

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct FontFlags: u8 {
        /// Referenced by the current document
        const IN_USE = 1;
        /// A backend or macro table has been loaded
        const LOADED = 1 << 1;
        const VIRTUAL = 1 << 2;
        /// The location pipeline is done with this font, found or not
        const LOCATED = 1 << 3;
    }
}

/// Handle of a font inside its pool
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FontId(pub(crate) u32);

/// What setting a character of this font does
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SetCharKind {
    /// No file: nothing is drawn and the position does not move
    #[default]
    Empty,
    /// Glyphs come from the backend
    Regular,
    /// Characters are macros interpreted recursively
    Virtual,
}

/// Information for a font list or info dialog
#[derive(Clone, Debug, PartialEq)]
pub struct FontStatus {
    pub name: String,
    pub kind: Option<FontKind>,
    pub enlargement_percent: i32,
    pub filename: Option<PathBuf>,
    pub error: Option<String>,
}

pub struct FontDefinition {
    pub name: String,
    /// Checksum the document expects
    pub checksum: u32,
    /// Scaled size in DVI units
    pub scaled_size: u32,
    pub enlargement: f64,
    pub flags: FontFlags,
    filename: Option<PathBuf>,
    kind: Option<FontKind>,
    set_char: SetCharKind,
    backend: BackendState,
    macros: Option<Arc<MacroTable>>,
    /// Local font number → pool font, for virtual fonts
    vf_table: Arc<HashMap<u32, FontId>>,
    first_font: Option<FontId>,
    /// Spell units per fix_word of this font's scaled size
    dimconv: f64,
    cm_per_dvi_unit: f64,
    params: RasterParams,
    hints: OutlineHints,
    error: Option<String>,
}

impl std::fmt::Debug for FontDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FontDefinition")
            .field("name", &self.name)
            .field("enlargement", &self.enlargement)
            .field("flags", &self.flags)
            .field("set_char", &self.set_char)
            .field("backend", &self.backend)
            .finish_non_exhaustive()
    }
}

impl FontDefinition {
    #[must_use]
    pub fn new(name: &str, checksum: u32, scaled_size: u32, enlargement: f64) -> Self {
        Self {
            name: name.to_string(),
            checksum,
            scaled_size,
            enlargement,
            flags: FontFlags::IN_USE,
            filename: None,
            kind: None,
            set_char: SetCharKind::Empty,
            backend: BackendState::Unloaded,
            macros: None,
            vf_table: Arc::new(HashMap::new()),
            first_font: None,
            dimconv: 0.0,
            cm_per_dvi_unit: 0.0,
            params: RasterParams::default(),
            hints: OutlineHints::default(),
            error: None,
        }
    }

    #[must_use]
    pub fn set_char(&self) -> SetCharKind {
        self.set_char
    }

    #[must_use]
    pub fn kind(&self) -> Option<FontKind> {
        self.kind
    }

    #[must_use]
    pub fn filename(&self) -> Option<&Path> {
        self.filename.as_deref()
    }

    #[must_use]
    pub fn is_located(&self) -> bool {
        self.flags.contains(FontFlags::LOCATED)
    }

    #[must_use]
    pub fn dimconv(&self) -> f64 {
        self.dimconv
    }

    #[must_use]
    pub fn macros(&self) -> Option<&Arc<MacroTable>> {
        self.macros.as_ref()
    }

    #[must_use]
    pub fn vf_table(&self) -> &Arc<HashMap<u32, FontId>> {
        &self.vf_table
    }

    /// Font used by virtual characters set before any font command
    #[must_use]
    pub fn first_font(&self) -> Option<FontId> {
        self.first_font
    }

    #[must_use]
    pub fn params(&self) -> RasterParams {
        self.params
    }

    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref().or_else(|| self.backend.error())
    }

    /// Number of glyph bitmaps the backend produced
    #[must_use]
    pub fn rasterizations(&self) -> u64 {
        self.backend.backend().map_or(0, |b| b.rasterizations())
    }

    /// Design size in TeX points at enlargement 1
    #[must_use]
    pub fn design_size_pt(&self) -> f64 {
        f64::from(self.scaled_size) * self.cm_per_dvi_unit * 72.27 / 2.54 / self.enlargement
    }

    /// Spell units per DVI unit of the document changed
    pub(crate) fn set_document_scale(&mut self, cm_per_dvi_unit: f64, document_dimconv: f64) {
        self.cm_per_dvi_unit = cm_per_dvi_unit;
        self.dimconv = f64::from(self.scaled_size) * document_dimconv / FIX_WORD_UNIT;
    }

    /// Apply display resolution and rendering switches; drops bitmaps on change
    pub fn set_raster_params(&mut self, display_dpi: f64, alpha: bool, hinting: bool) {
        self.params = RasterParams {
            dpi: display_dpi * self.enlargement,
            alpha,
            hinting,
        };
        self.backend.set_raster_params(self.params);
    }

    pub(crate) fn set_hints(&mut self, hints: OutlineHints) {
        self.hints = hints;
    }

    /// Take a located file and decide what this font becomes
    ///
    /// Returns the parsed index when the file is a virtual font, so the
    /// pool can register the fonts it references.
    pub fn font_name_receiver(&mut self, path: &Path) -> Result<Option<VfIndex>, FontError> {
        self.flags |= FontFlags::LOCATED;
        self.filename = Some(path.to_path_buf());

        let magic = match read_magic(path) {
            Ok(magic) => magic,
            Err(source) => {
                let e = FontError::FileUnreadable {
                    path: path.to_path_buf(),
                    source,
                };
                error!("{e}");
                self.error = Some(e.to_string());
                self.set_char = SetCharKind::Empty;
                return Err(e);
            }
        };
        let file = path.to_string_lossy();

        if file.ends_with("pk") && magic == PK_MAGIC {
            self.kind = Some(FontKind::Pk);
            self.set_char = SetCharKind::Regular;
            return Ok(None);
        }
        if file.ends_with(".vf") && magic == VF_MAGIC {
            let index = VfIndex::open(path).inspect_err(|e| {
                error!("{e}");
                self.error = Some(e.to_string());
            })?;
            if self.checksum != 0 && index.checksum != 0 && self.checksum != index.checksum {
                warn!(
                    "{}",
                    FontError::ChecksumMismatch {
                        file: file.to_string(),
                        expected: self.checksum,
                        found: index.checksum,
                    }
                );
            }
            self.kind = Some(FontKind::Virtual);
            self.flags |= FontFlags::VIRTUAL | FontFlags::LOADED;
            return Ok(Some(index));
        }
        if file.ends_with(".tfm") {
            self.kind = Some(FontKind::Tfm);
            self.set_char = SetCharKind::Regular;
            return Ok(None);
        }
        self.kind = Some(FontKind::Outline);
        self.set_char = SetCharKind::Regular;
        Ok(None)
    }

    /// Install the macro table of a virtual font together with its
    /// local font table
    pub(crate) fn attach_macros(
        &mut self,
        macros: MacroTable,
        vf_table: HashMap<u32, FontId>,
        first_font: Option<FontId>,
    ) {
        self.macros = Some(Arc::new(macros));
        self.vf_table = Arc::new(vf_table);
        self.first_font = first_font;
        self.set_char = SetCharKind::Virtual;
    }

    /// Glyph of `ch`, loading the backend on first use
    ///
    /// Returns None for fonts whose characters are not backed by glyphs.
    pub fn get_glyph(&mut self, ch: u8, want_bitmap: bool, color: Rgb) -> Option<&Glyph> {
        if self.set_char != SetCharKind::Regular {
            return None;
        }
        if matches!(self.backend, BackendState::Unloaded) {
            let (Some(kind), Some(path)) = (self.kind, self.filename.as_deref()) else {
                return None;
            };
            let design_size_pt = self.design_size_pt();
            let (params, hints) = (self.params, &self.hints);
            self.backend.ensure_loaded(&self.name, || {
                open_backend(kind, path, params, design_size_pt, hints)
            });
            if let Some(backend) = self.backend.backend() {
                self.flags |= FontFlags::LOADED;
                let found = backend.checksum();
                if self.checksum != 0 && found != 0 && found != self.checksum {
                    warn!(
                        "{}",
                        FontError::ChecksumMismatch {
                            file: path.display().to_string(),
                            expected: self.checksum,
                            found,
                        }
                    );
                }
            }
        }
        self.backend.get_glyph(ch, want_bitmap, color)
    }

    /// Forget the located file and everything loaded from it
    pub fn reset(&mut self) {
        self.filename = None;
        self.kind = None;
        self.set_char = SetCharKind::Empty;
        self.backend = BackendState::Unloaded;
        self.macros = None;
        self.vf_table = Arc::new(HashMap::new());
        self.first_font = None;
        self.error = None;
        self.flags
            .remove(FontFlags::LOADED | FontFlags::VIRTUAL | FontFlags::LOCATED);
    }

    /// Record that the locator found no file for this font
    pub(crate) fn mark_unlocatable(&mut self) {
        self.flags |= FontFlags::LOCATED;
        if self.filename.is_none() {
            self.error = Some("font file not found".to_string());
        }
    }

    #[must_use]
    pub fn status(&self) -> FontStatus {
        FontStatus {
            name: self.name.clone(),
            kind: self.kind,
            enlargement_percent: (self.enlargement * 100.0 + 0.5) as i32,
            filename: self.filename.clone(),
            error: self.error().map(str::to_string),
        }
    }
}

fn read_magic(path: &Path) -> std::io::Result<u16> {
    let mut magic = [0u8; 2];
    std::fs::File::open(path)?.read_exact(&mut magic)?;
    Ok(u16::from_be_bytes(magic))
}

fn open_backend(
    kind: FontKind,
    path: &Path,
    params: RasterParams,
    design_size_pt: f64,
    hints: &OutlineHints,
) -> Result<Box<dyn FontBackend>, FontError> {
    match kind {
        FontKind::Pk => Ok(Box::new(PkFont::open(path, params)?)),
        FontKind::Tfm => Ok(Box::new(TfmFont::open(path, params)?)),
        FontKind::Outline => open_outline(path, params, design_size_pt, hints),
        FontKind::Virtual => Err(FontError::BackendUnavailable(path.display().to_string())),
    }
}

#[cfg(feature = "outline")]
fn open_outline(
    path: &Path,
    params: RasterParams,
    design_size_pt: f64,
    hints: &OutlineHints,
) -> Result<Box<dyn FontBackend>, FontError> {
    let font = super::outline::OutlineFont::open(path, design_size_pt, hints.clone(), params)?;
    Ok(Box::new(font))
}

#[cfg(not(feature = "outline"))]
fn open_outline(
    path: &Path,
    _params: RasterParams,
    _design_size_pt: f64,
    _hints: &OutlineHints,
) -> Result<Box<dyn FontBackend>, FontError> {
    Err(FontError::BackendUnavailable(path.display().to_string()))
}
