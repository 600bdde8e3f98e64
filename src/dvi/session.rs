//! An open DVI document and everything needed to show its pages
//!
//! [`DviSession`] owns the document, the font pool, the prescan tables and
//! the page cache. Loading runs font garbage collection, font location and
//! the prescan; rendering runs the interpreter on demand and caches the
//! result per page and resolution. View changes render the page they
//! affect ahead of time, so the next request is served from the cache.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use log::{debug, error, info, warn};

use super::cache::{PageCache, Rendering};
use super::document::DviDocument;
use super::error::DviError;
use super::interpreter::{self, InterpreterOptions, RenderOutput};
use super::page::RenderedPage;
use super::prescan::{Anchor, PrescanData};
use super::render_target::{PageCanvas, RenderTarget};
use super::special::PaperSize;
use super::state::{Command, Effect, ViewState};
use crate::fonts::definition::{FontId, FontStatus};
use crate::fonts::glyph::Rgb;
use crate::fonts::locator::CancelToken;
use crate::fonts::pool::{FontPool, LocateSummary};
use crate::notification::Notifier;
use crate::settings::Settings;

pub struct DviSession {
    pool: FontPool,
    options: InterpreterOptions,
    state: ViewState,
    cache: PageCache,
    document: Option<DviDocument>,
    prescan: PrescanData,
    last_error: Option<String>,
    last_locate: Option<LocateSummary>,
}

impl DviSession {
    #[must_use]
    pub fn new(pool: FontPool, options: InterpreterOptions, state: ViewState, cache_size: usize) -> Self {
        let mut session = Self {
            pool,
            options,
            state,
            cache: PageCache::new(cache_size),
            document: None,
            prescan: PrescanData::default(),
            last_error: None,
            last_locate: None,
        };
        session.update_font_parameters();
        session
    }

    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            FontPool::from_settings(settings),
            settings.interpreter_options(),
            ViewState::new(
                settings.display_dpi,
                settings.use_font_hints,
                settings.alpha_blending,
            ),
            settings.page_cache_size,
        )
    }

    /// Load a DVI file from disk
    pub fn open(&mut self, path: &Path, notifier: &mut dyn Notifier) -> Result<(), DviError> {
        let data = std::fs::read(path).map_err(|source| DviError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.dispatch(Command::Open(Some(path.to_path_buf())));
        self.load(data, notifier)
    }

    /// Load a DVI file that is already in memory
    pub fn load_bytes(&mut self, data: Vec<u8>, notifier: &mut dyn Notifier) -> Result<(), DviError> {
        self.dispatch(Command::Open(None));
        self.load(data, notifier)
    }

    /// Read the current file again, e.g. after TeX rewrote it
    pub fn reload(&mut self, notifier: &mut dyn Notifier) -> Result<(), DviError> {
        let path = self.state.doc_path.clone().ok_or(DviError::NoDocument)?;
        let data = std::fs::read(&path).map_err(|source| DviError::Io {
            path: path.clone(),
            source,
        })?;
        self.dispatch(Command::Reload);
        self.load(data, notifier)
    }

    fn load(&mut self, data: Vec<u8>, notifier: &mut dyn Notifier) -> Result<(), DviError> {
        self.document = None;
        self.prescan = PrescanData::default();
        self.last_error = None;
        self.last_locate = None;

        self.pool.mark_fonts_as_unused();
        let mut document = match DviDocument::parse(data, &mut self.pool) {
            Ok(document) => document,
            Err(e) => {
                self.pool.release_fonts();
                self.dispatch(Command::SetPageCount(0));
                return Err(self.record_error(e));
            }
        };
        let fonts = document.font_table().clone();
        self.mark_fonts(&fonts);
        self.pool.release_fonts();

        if !self.pool.check_if_fonts_are_located() {
            match self.pool.locate_fonts(notifier) {
                Ok(summary) => self.last_locate = Some(summary),
                Err(e) => {
                    // the page still renders, with blank characters
                    warn!("Font location failed: {e}");
                    self.last_error = Some(e.to_string());
                }
            }
            // virtual fonts found by the locator added sub-fonts
            self.mark_fonts(&fonts);
        }

        self.dispatch(Command::SetPageCount(document.total_pages()));
        let prescan = interpreter::prescan_document(&document, &mut self.pool, &self.options);
        let result = match prescan {
            Ok(data) => {
                document.set_source_specials(data.has_source_specials());
                for warning in &data.warnings {
                    notifier.warning(warning);
                }
                self.prescan = data;
                Ok(())
            }
            Err(e) => {
                let e = self.record_error(e);
                notifier.error(&e.to_string());
                Err(e)
            }
        };
        info!(
            "Loaded DVI document with {} pages and {} fonts",
            document.total_pages(),
            document.font_table().len()
        );
        self.document = Some(document);
        result
    }

    fn mark_fonts(&mut self, fonts: &HashMap<u32, FontId>) {
        for id in fonts.values() {
            self.pool.mark_as_used(*id);
        }
    }

    /// Apply a state command and carry out its effects
    fn dispatch(&mut self, command: Command) {
        for effect in self.state.apply(command) {
            match effect {
                Effect::InvalidateCache => self.cache.invalidate_all(),
                Effect::InvalidatePage(page) => self.cache.invalidate_page(page),
                Effect::UpdateFontParameters => self.update_font_parameters(),
                Effect::RenderCurrentPage => self.prerender(self.state.current_page),
                Effect::RenderPage(page) => self.prerender(page),
            }
        }
    }

    /// Fill the cache for `page` if there is a document to render
    fn prerender(&mut self, page: usize) {
        if !self.is_usable() || page >= self.total_pages() {
            return;
        }
        if let Err(e) = self.render_page(page) {
            debug!("Rendering page {} ahead failed: {e}", page + 1);
        }
    }

    fn update_font_parameters(&mut self) {
        self.pool.set_display_resolution(self.state.dpi);
        self.pool
            .set_parameters(self.state.use_font_hints, self.state.alpha_blending);
    }

    fn record_error(&mut self, e: DviError) -> DviError {
        if e.is_fatal() {
            error!("Document unusable: {e}");
            self.dispatch(Command::DocumentFailed(e.to_string()));
        } else {
            warn!("{e}");
        }
        self.last_error = Some(e.to_string());
        e
    }

    #[must_use]
    pub fn document(&self) -> Option<&DviDocument> {
        self.document.as_ref()
    }

    #[must_use]
    pub fn total_pages(&self) -> usize {
        self.document.as_ref().map_or(0, DviDocument::total_pages)
    }

    #[must_use]
    pub fn current_page(&self) -> usize {
        self.state.current_page
    }

    /// Move to `page`, clamped to the document
    pub fn go_to_page(&mut self, page: usize) {
        self.dispatch(Command::GoToPage(page));
    }

    #[must_use]
    pub fn display_resolution(&self) -> f64 {
        self.state.dpi
    }

    pub fn set_display_resolution(&mut self, dpi: f64) {
        self.dispatch(Command::SetResolution(dpi));
    }

    pub fn set_font_hints(&mut self, enabled: bool) {
        self.dispatch(Command::SetFontHints(enabled));
    }

    pub fn set_alpha_blending(&mut self, enabled: bool) {
        self.dispatch(Command::SetAlphaBlending(enabled));
    }

    /// Replace the cached rendering of one page
    pub fn invalidate_page(&mut self, page: usize) {
        self.dispatch(Command::PageNeedsRerender(page));
    }

    fn usable_document(&self) -> Result<&DviDocument, DviError> {
        if let Some(reason) = &self.state.unusable {
            return Err(DviError::DocumentUnusable(reason.clone()));
        }
        self.document.as_ref().ok_or(DviError::NoDocument)
    }

    /// Paper size in pixels at the current resolution
    #[must_use]
    pub fn page_size_px(&self) -> (u32, u32) {
        self.prescan
            .paper_size
            .unwrap_or(PaperSize::A4)
            .pixels(self.state.dpi)
    }

    /// Render `page` at the current resolution, reusing a cached image
    pub fn render_page(&mut self, page: usize) -> Result<Arc<RenderedPage>, DviError> {
        let document = self.usable_document()?;
        let rendering = Rendering::new(document.checksum(), self.state.dpi);
        if let Some(cached) = self.cache.get(rendering, page) {
            debug!("Page {} served from cache", page + 1);
            return Ok(cached);
        }
        let (width, height) = self.page_size_px();
        let background = self.prescan.background_for(page).unwrap_or(Rgb::WHITE);
        let mut canvas = PageCanvas::new(width, height, background);
        let output = self.render_into(page, &mut canvas)?;
        let rendered = RenderedPage {
            page,
            dpi: self.state.dpi,
            image: canvas.into_image(),
            content: output.content,
            warnings: output.trace.warnings,
        };
        Ok(self.cache.insert(rendering, rendered))
    }

    /// Render `page` onto a caller-supplied target, bypassing the cache
    pub fn render_into(
        &mut self,
        page: usize,
        target: &mut dyn RenderTarget,
    ) -> Result<RenderOutput, DviError> {
        self.usable_document()?;
        self.pool.set_parameters(
            self.state.use_font_hints,
            self.state.alpha_blending && target.supports_alpha(),
        );
        let Some(document) = self.document.as_ref() else {
            return Err(DviError::NoDocument);
        };
        let result = interpreter::render_page(
            document,
            &mut self.pool,
            &self.options,
            page,
            self.state.dpi,
            target,
        );
        match result {
            Ok(output) => Ok(output),
            Err(e) => {
                error!("Rendering page {} failed: {e}", page + 1);
                Err(self.record_error(e))
            }
        }
    }

    #[must_use]
    pub fn prescan_data(&self) -> &PrescanData {
        &self.prescan
    }

    /// Resolve a reference to a place in the document
    ///
    /// Accepts a page number (1-based), a `src:<line><file>` source
    /// reference as sent by editors for forward search, or `#name` for a
    /// named anchor.
    #[must_use]
    pub fn parse_reference(&self, reference: &str) -> Option<Anchor> {
        let reference = reference.trim();
        let total = self.total_pages();
        if let Ok(number) = reference.parse::<usize>() {
            return (1..=total).contains(&number).then_some(Anchor {
                page: number - 1,
                v: 0,
            });
        }
        if let Some(name) = reference.strip_prefix('#') {
            return self.prescan.anchors.get(name).copied();
        }
        let rest = reference.strip_prefix("src:")?;
        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        let line: u32 = rest[..digits].parse().ok()?;
        let file = rest[digits..].trim();

        let same_file = |candidate: &str| {
            candidate == file
                || candidate.strip_suffix(".tex") == Some(file)
                || file.strip_suffix(".tex") == Some(candidate)
        };
        let anchors = self
            .prescan
            .source_anchors
            .iter()
            .filter(|a| file.is_empty() || same_file(&a.file));
        let first = anchors.clone().next()?;
        let best = anchors
            .filter(|a| a.line <= line)
            .max_by_key(|a| a.line)
            .unwrap_or(first);
        Some(Anchor {
            page: best.page,
            v: best.v,
        })
    }

    #[must_use]
    pub fn font_status(&self) -> Vec<FontStatus> {
        self.pool.status()
    }

    #[must_use]
    pub fn last_locate(&self) -> Option<&LocateSummary> {
        self.last_locate.as_ref()
    }

    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.document.is_some() && self.state.unusable.is_none()
    }

    /// Token that aborts a running font location from another thread
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.pool.cancel_token()
    }

    #[must_use]
    pub fn pool(&self) -> &FontPool {
        &self.pool
    }

    #[must_use]
    pub fn cached_pages(&self) -> usize {
        self.cache.len()
    }
}
