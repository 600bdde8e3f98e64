//! View state of an open DVI document

use std::path::PathBuf;

/// Current view parameters of a document session
#[derive(Clone, Debug)]
pub struct ViewState {
    /// Path of the DVI file, if it was loaded from disk
    pub doc_path: Option<PathBuf>,

    /// Display resolution in dots per inch
    pub dpi: f64,

    pub use_font_hints: bool,

    /// Blend glyph edges instead of drawing binary masks
    pub alpha_blending: bool,

    /// Current page (0-indexed)
    pub current_page: usize,

    pub page_count: usize,

    /// Set after an error the document cannot recover from
    pub unusable: Option<String>,
}

/// Lowest resolution a page is rendered at
pub const MIN_DPI: f64 = 10.0;

impl ViewState {
    #[must_use]
    pub fn new(dpi: f64, use_font_hints: bool, alpha_blending: bool) -> Self {
        Self {
            doc_path: None,
            dpi: dpi.max(MIN_DPI),
            use_font_hints,
            alpha_blending,
            current_page: 0,
            page_count: 0,
            unusable: None,
        }
    }

    /// Apply a command and return resulting effects
    #[must_use]
    pub fn apply(&mut self, cmd: Command) -> Vec<Effect> {
        match cmd {
            Command::Reload => {
                self.unusable = None;
                vec![Effect::InvalidateCache]
            }

            Command::Open(path) => {
                self.doc_path = path;
                self.current_page = 0;
                self.unusable = None;
                vec![Effect::InvalidateCache]
            }

            Command::SetResolution(dpi) => {
                let clamped = dpi.max(MIN_DPI);
                if (self.dpi - clamped).abs() > f64::EPSILON {
                    self.dpi = clamped;
                    vec![
                        Effect::UpdateFontParameters,
                        Effect::InvalidateCache,
                        Effect::RenderCurrentPage,
                    ]
                } else {
                    vec![]
                }
            }

            Command::SetFontHints(enabled) => {
                if self.use_font_hints != enabled {
                    self.use_font_hints = enabled;
                    vec![
                        Effect::UpdateFontParameters,
                        Effect::InvalidateCache,
                        Effect::RenderCurrentPage,
                    ]
                } else {
                    vec![]
                }
            }

            Command::SetAlphaBlending(enabled) => {
                if self.alpha_blending != enabled {
                    self.alpha_blending = enabled;
                    vec![
                        Effect::UpdateFontParameters,
                        Effect::InvalidateCache,
                        Effect::RenderCurrentPage,
                    ]
                } else {
                    vec![]
                }
            }

            Command::GoToPage(page) => {
                let clamped = page.min(self.page_count.saturating_sub(1));
                if self.current_page != clamped {
                    self.current_page = clamped;
                    vec![Effect::RenderCurrentPage]
                } else {
                    vec![]
                }
            }

            Command::SetPageCount(count) => {
                self.page_count = count;
                if self.current_page >= count {
                    self.current_page = count.saturating_sub(1);
                }
                vec![]
            }

            Command::PageNeedsRerender(page) => {
                vec![Effect::InvalidatePage(page), Effect::RenderPage(page)]
            }

            Command::DocumentFailed(reason) => {
                self.unusable = Some(reason);
                vec![Effect::InvalidateCache]
            }
        }
    }
}

/// Commands that modify the view state
#[derive(Clone, Debug)]
pub enum Command {
    Reload,
    /// A new document replaces the current one
    Open(Option<PathBuf>),
    SetResolution(f64),
    SetFontHints(bool),
    SetAlphaBlending(bool),
    GoToPage(usize),
    SetPageCount(usize),
    PageNeedsRerender(usize),
    /// An error poisoned the document until it is reloaded
    DocumentFailed(String),
}

/// Effects produced by state changes
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    InvalidateCache,
    InvalidatePage(usize),
    /// Push resolution, hinting and blending into the font pool
    UpdateFontParameters,
    /// Render the current page ahead of the next request
    RenderCurrentPage,
    /// Render a page again ahead of the next request
    RenderPage(usize),
}
