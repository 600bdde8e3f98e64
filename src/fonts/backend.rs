//! Common contract of the PK, TFM and outline font backends

use log::{debug, warn};

use super::error::FontError;
use super::glyph::{Glyph, Rgb};

/// Rasterization parameters pushed from the font pool into every backend
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RasterParams {
    /// Display resolution multiplied by the font's enlargement
    pub dpi: f64,
    /// Produce true alpha coverage instead of a binary mask
    pub alpha: bool,
    /// Round the em size of outline fonts to whole pixels
    pub hinting: bool,
}

impl Default for RasterParams {
    fn default() -> Self {
        Self {
            dpi: 100.0,
            alpha: true,
            hinting: true,
        }
    }
}

/// File formats a font definition can be backed by
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FontKind {
    Pk,
    Virtual,
    Tfm,
    Outline,
}

impl FontKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            FontKind::Pk => "PK",
            FontKind::Virtual => "Virtual",
            FontKind::Tfm => "TFM",
            FontKind::Outline => "Outline",
        }
    }
}

/// Glyph rasterization and metrics for one font file
///
/// `get_glyph` is idempotent for repeated `(ch, color)` pairs: a bitmap is
/// produced only when none is cached or the cached one has another color,
/// and never when `want_bitmap` is false.
pub trait FontBackend: Send {
    fn kind(&self) -> FontKind;

    /// Checksum stored in the font file, 0 when the format has none
    fn checksum(&self) -> u32;

    fn get_glyph(&mut self, ch: u8, want_bitmap: bool, color: Rgb) -> &Glyph;

    /// Apply new raster parameters; cached bitmaps are dropped when they change
    fn set_raster_params(&mut self, params: RasterParams);

    /// Number of bitmaps produced so far
    fn rasterizations(&self) -> u64;
}

/// Lifecycle of a font's backend
///
/// `LoadFailed` is terminal: the failed load is not retried on every
/// character request, a placeholder glyph is returned instead.
#[derive(Default)]
pub enum BackendState {
    #[default]
    Unloaded,
    Loading,
    Ready(Box<dyn FontBackend>),
    LoadFailed {
        error: String,
        placeholder: Glyph,
    },
}

impl std::fmt::Debug for BackendState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendState::Unloaded => write!(f, "Unloaded"),
            BackendState::Loading => write!(f, "Loading"),
            BackendState::Ready(backend) => write!(f, "Ready({})", backend.kind().as_str()),
            BackendState::LoadFailed { error, .. } => write!(f, "LoadFailed({error})"),
        }
    }
}

impl BackendState {
    /// Load the backend unless a load was already attempted
    pub fn ensure_loaded<F>(&mut self, name: &str, open: F)
    where
        F: FnOnce() -> Result<Box<dyn FontBackend>, FontError>,
    {
        if !matches!(self, BackendState::Unloaded) {
            return;
        }
        *self = BackendState::Loading;
        *self = match open() {
            Ok(backend) => {
                debug!("Loaded {} font {name}", backend.kind().as_str());
                BackendState::Ready(backend)
            }
            Err(e) => {
                warn!("Failed to load font {name}: {e}");
                let error = e.to_string();
                BackendState::LoadFailed {
                    placeholder: Glyph::placeholder(error.clone()),
                    error,
                }
            }
        };
    }

    pub fn get_glyph(&mut self, ch: u8, want_bitmap: bool, color: Rgb) -> Option<&Glyph> {
        match self {
            BackendState::Ready(backend) => Some(backend.get_glyph(ch, want_bitmap, color)),
            BackendState::LoadFailed { placeholder, .. } => Some(placeholder),
            BackendState::Unloaded | BackendState::Loading => None,
        }
    }

    pub fn set_raster_params(&mut self, params: RasterParams) {
        if let BackendState::Ready(backend) = self {
            backend.set_raster_params(params);
        }
    }

    #[must_use]
    pub fn backend(&self) -> Option<&dyn FontBackend> {
        match self {
            BackendState::Ready(backend) => Some(backend.as_ref()),
            _ => None,
        }
    }

    #[must_use]
    pub fn error(&self) -> Option<&str> {
        match self {
            BackendState::LoadFailed { error, .. } => Some(error),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fonts::glyph::GlyphTable;

    struct Fixed {
        glyphs: GlyphTable,
    }

    impl FontBackend for Fixed {
        fn kind(&self) -> FontKind {
            FontKind::Tfm
        }
        fn checksum(&self) -> u32 {
            0
        }
        fn get_glyph(&mut self, ch: u8, want_bitmap: bool, color: Rgb) -> &Glyph {
            self.glyphs.fetch(ch, want_bitmap, color, |_, _| {})
        }
        fn set_raster_params(&mut self, _params: RasterParams) {
            self.glyphs.invalidate_bitmaps();
        }
        fn rasterizations(&self) -> u64 {
            self.glyphs.rasterizations()
        }
    }

    #[test]
    fn failed_load_is_not_retried() {
        let mut state = BackendState::default();
        let mut attempts = 0;
        for _ in 0..3 {
            state.ensure_loaded("cmr10", || {
                attempts += 1;
                Err(FontError::BackendUnavailable("cmr10".into()))
            });
        }
        assert_eq!(attempts, 1);
        let glyph = state.get_glyph(b'A', true, Rgb::BLACK).unwrap();
        assert!(!glyph.is_usable());
        assert!(state.error().is_some());
    }

    #[test]
    fn successful_load_becomes_ready() {
        let mut state = BackendState::default();
        assert!(state.get_glyph(0, false, Rgb::BLACK).is_none());
        state.ensure_loaded("cmr10", || {
            Ok(Box::new(Fixed {
                glyphs: GlyphTable::new(),
            }))
        });
        assert!(matches!(state, BackendState::Ready(_)));
        assert!(state.get_glyph(0, false, Rgb::BLACK).unwrap().is_usable());
    }
}
