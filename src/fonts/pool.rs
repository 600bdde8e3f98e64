//! Registry of every font the loaded documents reference
//!
//! Fonts are deduplicated by name and enlargement, located in three
//! passes of the external locator, kept in sync with the display
//! resolution, and pruned when the document stops referencing them.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};

use super::definition::{FontDefinition, FontFlags, FontId, FontStatus};
use super::error::LocateError;
use super::fontmap::FontMap;
use super::locator::{
    CancelToken, ExitKind, FontLocator, LocatePass, LocateTarget, LocatorConfig, ProcessLauncher,
    SystemLauncher,
};
use super::tfm::FIX_WORD_UNIT;
use super::vf::VfIndex;
use crate::notification::Notifier;
use crate::settings::Settings;

/// Spell units (1/65536 pixel at 1200 dpi) per centimeter
const SPELL_PER_CM: f64 = 1200.0 / 2.54 * 65536.0;

/// Resolution changes up to this many dpi are ignored
const RESOLUTION_TOLERANCE: f64 = 2.0;

/// What a call to [`FontPool::locate_fonts`] achieved
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LocateSummary {
    pub passes: Vec<LocatePass>,
    pub located: usize,
    /// Fonts no pass could find
    pub missing: Vec<String>,
}

pub struct FontPool {
    fonts: BTreeMap<FontId, FontDefinition>,
    next_id: u32,
    display_dpi: f64,
    cm_per_dvi_unit: f64,
    use_hints: bool,
    alpha: bool,
    locator: FontLocator,
    font_map: Option<FontMap>,
}

impl FontPool {
    #[must_use]
    pub fn new(locator: FontLocator) -> Self {
        Self {
            fonts: BTreeMap::new(),
            next_id: 0,
            display_dpi: 100.0,
            cm_per_dvi_unit: 0.0,
            use_hints: true,
            alpha: true,
            locator,
            font_map: None,
        }
    }

    #[must_use]
    pub fn with_launcher(config: LocatorConfig, launcher: Box<dyn ProcessLauncher>) -> Self {
        Self::new(FontLocator::new(config, launcher))
    }

    /// Pool configured from the user settings, running real processes
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        let mut pool = Self::with_launcher(settings.locator_config(), Box::new(SystemLauncher));
        pool.display_dpi = settings.display_dpi;
        pool.use_hints = settings.use_font_hints;
        pool.alpha = settings.alpha_blending;
        if let Some(path) = &settings.font_map {
            match FontMap::load(path, &settings.extra_search_paths) {
                Ok(map) => pool.font_map = Some(map),
                Err(e) => warn!("Font map not loaded: {e}"),
            }
        }
        pool
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fonts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fonts.is_empty()
    }

    #[must_use]
    pub fn font(&self, id: FontId) -> Option<&FontDefinition> {
        self.fonts.get(&id)
    }

    pub fn font_mut(&mut self, id: FontId) -> Option<&mut FontDefinition> {
        self.fonts.get_mut(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = FontId> + '_ {
        self.fonts.keys().copied()
    }

    #[must_use]
    pub fn display_resolution(&self) -> f64 {
        self.display_dpi
    }

    #[must_use]
    pub fn locator(&self) -> &FontLocator {
        &self.locator
    }

    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.locator.cancel_token()
    }

    /// Existing font with this name and enlargement, or a new unloaded one
    pub fn append_or_reuse(
        &mut self,
        name: &str,
        checksum: u32,
        scaled_size: u32,
        enlargement: f64,
    ) -> FontId {
        let key = enlargement_key(enlargement);
        let existing = self
            .fonts
            .iter()
            .find(|(_, f)| f.name == name && enlargement_key(f.enlargement) == key)
            .map(|(id, _)| *id);
        if let Some(id) = existing {
            self.mark_as_used(id);
            return id;
        }

        let id = FontId(self.next_id);
        self.next_id += 1;
        let mut font = FontDefinition::new(name, checksum, scaled_size, enlargement);
        font.set_document_scale(self.cm_per_dvi_unit, self.cm_per_dvi_unit * SPELL_PER_CM);
        font.set_raster_params(self.display_dpi, self.alpha, self.use_hints);
        if let Some(map) = &mut self.font_map {
            font.set_hints(map.hints(name));
        }
        debug!("New font {name} at {:.1}% ({id:?})", enlargement * 100.0);
        self.fonts.insert(id, font);
        id
    }

    /// Propagate a new display resolution; small changes are ignored
    pub fn set_display_resolution(&mut self, dpi: f64) {
        if (dpi - self.display_dpi).abs() <= RESOLUTION_TOLERANCE {
            return;
        }
        self.display_dpi = dpi;
        self.propagate_raster_params();
    }

    /// Change the hinting and alpha switches, dropping bitmaps if either changed
    pub fn set_parameters(&mut self, use_hints: bool, alpha: bool) {
        if use_hints == self.use_hints && alpha == self.alpha {
            return;
        }
        self.use_hints = use_hints;
        self.alpha = alpha;
        self.propagate_raster_params();
    }

    pub fn set_cm_per_dvi_unit(&mut self, cm_per_dvi_unit: f64) {
        if cm_per_dvi_unit == self.cm_per_dvi_unit {
            return;
        }
        self.cm_per_dvi_unit = cm_per_dvi_unit;
        let document_dimconv = cm_per_dvi_unit * SPELL_PER_CM;
        for font in self.fonts.values_mut() {
            font.set_document_scale(cm_per_dvi_unit, document_dimconv);
        }
        self.propagate_raster_params();
    }

    /// Replace the font map; every font is located again
    pub fn set_font_map(&mut self, map: Option<FontMap>) {
        self.font_map = map;
        for font in self.fonts.values_mut() {
            font.reset();
            let hints = self
                .font_map
                .as_mut()
                .map(|map| map.hints(&font.name))
                .unwrap_or_default();
            font.set_hints(hints);
        }
    }

    fn propagate_raster_params(&mut self) {
        for font in self.fonts.values_mut() {
            font.set_raster_params(self.display_dpi, self.alpha, self.use_hints);
        }
    }

    pub fn mark_fonts_as_unused(&mut self) {
        for font in self.fonts.values_mut() {
            font.flags.remove(FontFlags::IN_USE);
        }
    }

    /// Mark `id` and every font its virtual font table reaches as used
    pub fn mark_as_used(&mut self, id: FontId) {
        let mut work = vec![id];
        while let Some(id) = work.pop() {
            let Some(font) = self.fonts.get_mut(&id) else {
                continue;
            };
            font.flags |= FontFlags::IN_USE;
            let subs = font.vf_table().clone();
            work.extend(subs.values().copied().filter(|sub| {
                self.fonts
                    .get(sub)
                    .is_some_and(|f| !f.flags.contains(FontFlags::IN_USE))
            }));
        }
    }

    /// Drop every font not marked as used; returns how many were removed
    pub fn release_fonts(&mut self) -> usize {
        let before = self.fonts.len();
        self.fonts.retain(|_, font| font.flags.contains(FontFlags::IN_USE));
        let released = before - self.fonts.len();
        if released > 0 {
            debug!("Released {released} unused fonts");
        }
        released
    }

    #[must_use]
    pub fn check_if_fonts_are_located(&self) -> bool {
        self.fonts.values().all(FontDefinition::is_located)
    }

    #[must_use]
    pub fn status(&self) -> Vec<FontStatus> {
        self.fonts.values().map(FontDefinition::status).collect()
    }

    /// Hand a located file to a font; virtual fonts register their sub-fonts
    ///
    /// Returns true when the file was a virtual font.
    pub fn receive_font_file(&mut self, id: FontId, path: &Path) -> bool {
        let Some(font) = self.fonts.get_mut(&id) else {
            return false;
        };
        match font.font_name_receiver(path) {
            Ok(Some(index)) => {
                self.attach_virtual_font(id, index);
                true
            }
            Ok(None) => false,
            Err(e) => {
                debug!("Font {id:?} stays empty: {e}");
                false
            }
        }
    }

    fn attach_virtual_font(&mut self, id: FontId, index: VfIndex) {
        let Some(parent) = self.fonts.get(&id) else {
            return;
        };
        let parent_size = f64::from(parent.scaled_size);
        let mut vf_table = HashMap::new();
        let mut first_font = None;
        for record in &index.fonts {
            let size = f64::from(record.scale) * parent_size / FIX_WORD_UNIT;
            let design_pt = f64::from(record.design) / FIX_WORD_UNIT;
            let enlargement = if record.design == 0 {
                1.0
            } else {
                size * self.cm_per_dvi_unit * 72.27 / 2.54 / design_pt
            };
            let sub = self.append_or_reuse(&record.name, record.checksum, size as u32, enlargement);
            vf_table.insert(record.number, sub);
            first_font.get_or_insert(sub);
        }
        if let Some(font) = self.fonts.get_mut(&id) {
            font.attach_macros(index.macros, vf_table, first_font);
        }
    }

    fn pending(&self) -> Vec<FontId> {
        self.fonts
            .iter()
            .filter(|(_, f)| !f.is_located())
            .map(|(id, _)| *id)
            .collect()
    }

    fn target(&self, font: &FontDefinition) -> LocateTarget {
        LocateTarget {
            name: font.name.clone(),
            enlargement: font.enlargement,
            outline_alias: self
                .font_map
                .as_ref()
                .and_then(|map| map.outline_alias(&font.name))
                .map(str::to_string),
        }
    }

    fn mark_all_located(&mut self) {
        for font in self.fonts.values_mut() {
            if !font.is_located() {
                font.mark_unlocatable();
            }
        }
    }

    /// Run one pass; returns whether a virtual font was found
    fn run_pass(&mut self, pass: LocatePass, notifier: &mut dyn Notifier) -> Result<bool, LocateError> {
        let targets: Vec<LocateTarget> = self
            .pending()
            .into_iter()
            .filter_map(|id| self.fonts.get(&id))
            .map(|font| self.target(font))
            .collect();

        let outcome = match self.locator.run(pass, &targets, notifier) {
            Ok(outcome) => outcome,
            Err(e @ LocateError::Launch { .. }) => {
                notifier.error(&format!(
                    "{e}. Fonts cannot be found or generated, characters will be left blank."
                ));
                self.mark_all_located();
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        if outcome.exit == ExitKind::Abnormal && !pass.generates() {
            let program = self.locator.config().program.clone();
            error!("{program} terminated abnormally during pass {pass:?}");
            notifier.error(&format!("{program} terminated abnormally, fonts cannot be found."));
            self.mark_all_located();
            return Err(LocateError::AbnormalExit { program });
        }

        let mut found_virtual = false;
        'restart: loop {
            for id in self.pending() {
                let Some(font) = self.fonts.get(&id) else {
                    continue;
                };
                if font.filename().is_some() {
                    continue;
                }
                let alias = self.target(font).outline_alias;
                let stem = format!("{}.", font.name);
                let line = alias
                    .as_deref()
                    .and_then(|alias| outcome.files.iter().find(|line| line.contains(alias)))
                    .or_else(|| outcome.files.iter().find(|line| line.contains(&stem)));
                let Some(line) = line else {
                    continue;
                };
                debug!("Font {} → {line}", font.name);
                if self.receive_font_file(id, &PathBuf::from(line)) {
                    found_virtual = true;
                    continue 'restart;
                }
            }
            break;
        }
        Ok(found_virtual)
    }

    /// Find files for every unlocated font
    ///
    /// Pass 0 is repeated while it turns up virtual fonts, because those
    /// add new fonts to locate. Fonts still missing after the metrics-only
    /// pass are reported once and marked located.
    pub fn locate_fonts(&mut self, notifier: &mut dyn Notifier) -> Result<LocateSummary, LocateError> {
        self.locator.cancel_token().reset();
        self.locator.clear_log();
        let mut summary = LocateSummary::default();
        let before = self.pending().len();

        while !self.pending().is_empty() {
            summary.passes.push(LocatePass::Existing);
            if !self.run_pass(LocatePass::Existing, notifier)? {
                break;
            }
        }
        for pass in [LocatePass::Generate, LocatePass::MetricsOnly] {
            if self.pending().is_empty() {
                break;
            }
            summary.passes.push(pass);
            self.run_pass(pass, notifier)?;
        }

        summary.missing = self
            .pending()
            .into_iter()
            .filter_map(|id| self.fonts.get(&id).map(|f| f.name.clone()))
            .collect();
        self.mark_all_located();
        summary.located = before.saturating_sub(summary.missing.len());

        if !summary.missing.is_empty() {
            let message = format!(
                "Fonts not found: {}. Characters of these fonts will be left blank.\n\n{}",
                summary.missing.join(", "),
                self.locator.log()
            );
            notifier.warning(&message);
        }
        info!(
            "Font location finished: {} located, {} missing",
            summary.located,
            summary.missing.len()
        );
        Ok(summary)
    }
}

/// Enlargements closer than 0.1% are the same font
fn enlargement_key(enlargement: f64) -> i64 {
    (enlargement * 1000.0 + 0.5) as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fonts::definition::SetCharKind;
    use crate::test_utils::test_pool;

    #[test]
    fn dedup_by_name_and_enlargement() {
        let mut pool = test_pool();
        let a = pool.append_or_reuse("cmr10", 7, 10 << 16, 1.0);
        let b = pool.append_or_reuse("cmr10", 7, 10 << 16, 1.0);
        let c = pool.append_or_reuse("cmr10", 7, 10 << 16, 1.2);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(pool.len(), 2);
        let d = pool.append_or_reuse("cmr10", 7, 10 << 16, 1.0004);
        assert_eq!(a, d);
    }

    #[test]
    fn small_resolution_changes_are_ignored() {
        let mut pool = test_pool();
        let id = pool.append_or_reuse("cmr10", 0, 10 << 16, 2.0);
        pool.set_display_resolution(101.5);
        assert!((pool.display_resolution() - 100.0).abs() < 1e-9);
        pool.set_display_resolution(150.0);
        assert!((pool.font(id).unwrap().params().dpi - 300.0).abs() < 1e-9);
    }

    #[test]
    fn release_prunes_unused_fonts() {
        let mut pool = test_pool();
        let keep = pool.append_or_reuse("cmr10", 0, 10 << 16, 1.0);
        pool.append_or_reuse("cmbx10", 0, 10 << 16, 1.0);
        pool.mark_fonts_as_unused();
        pool.mark_as_used(keep);
        assert_eq!(pool.release_fonts(), 1);
        assert_eq!(pool.len(), 1);
        assert!(pool.font(keep).is_some());
    }

    #[test]
    fn document_scale_sets_dimconv() {
        let mut pool = test_pool();
        let id = pool.append_or_reuse("cmr10", 0, 1 << 20, 1.0);
        pool.set_cm_per_dvi_unit(2.54 / 1200.0 / 65536.0);
        // one DVI unit per spell unit
        assert!((pool.font(id).unwrap().dimconv() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn font_map_change_resets_fonts() {
        let mut pool = test_pool();
        let id = pool.append_or_reuse("cmr10", 0, 10 << 16, 1.0);
        pool.font_mut(id).unwrap().flags |= FontFlags::LOCATED;
        pool.set_font_map(Some(FontMap::parse("cmr10 CMR10 <cmr10.ttf\n")));
        let font = pool.font(id).unwrap();
        assert!(!font.is_located());
        assert_eq!(font.set_char(), SetCharKind::Empty);
        assert_eq!(
            pool.target(font).outline_alias.as_deref(),
            Some("cmr10.ttf")
        );

        pool.set_font_map(Some(FontMap::parse("cmr10 CMR10 <cmr10.pfb\n")));
        let font = pool.font(id).unwrap();
        assert_eq!(pool.target(font).outline_alias, None);
    }
}
