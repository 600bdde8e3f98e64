use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, PoisonError, RwLock};
use std::time::Duration;

use crate::dvi::interpreter::{InterpreterOptions, StackPolicy, DEFAULT_VF_RECURSION_LIMIT};
use crate::fonts::locator::LocatorConfig;

pub const CURRENT_VERSION: u32 = 2;
const SETTINGS_FILENAME: &str = "config.yaml";
const APP_NAME: &str = "dviview";
const DEFAULT_LOCATE_TIMEOUT_SECS: u64 = 300;

/// Severity of an unbalanced register stack, per pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EopStackPolicy {
    #[serde(default = "default_prescan_policy")]
    pub prescan: StackPolicy,
    #[serde(default = "default_render_policy")]
    pub render: StackPolicy,
}

impl Default for EopStackPolicy {
    fn default() -> Self {
        Self {
            prescan: default_prescan_policy(),
            render: default_render_policy(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default = "default_display_dpi")]
    pub display_dpi: f64,

    /// Resolution PK fonts are searched for and generated at
    #[serde(default = "default_generation_dpi")]
    pub generation_dpi: u32,

    #[serde(default = "default_metafont_mode")]
    pub metafont_mode: String,

    #[serde(default = "default_locator_program")]
    pub locator_program: String,

    /// Seconds before a font location process is killed; 0 in version 1
    /// files meant no limit
    #[serde(default = "default_locate_timeout")]
    pub locate_timeout_secs: u64,

    #[serde(default = "default_true")]
    pub use_font_hints: bool,

    /// False draws glyphs with binary masks
    #[serde(default = "default_true")]
    pub alpha_blending: bool,

    #[serde(default = "default_vf_recursion_limit")]
    pub vf_recursion_limit: u32,

    #[serde(default)]
    pub eop_stack_policy: EopStackPolicy,

    /// psfonts.map style file naming outline fonts for TeX fonts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_map: Option<PathBuf>,

    /// Directories searched for encoding files besides the map's own
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_search_paths: Vec<PathBuf>,

    #[serde(default = "default_page_cache_size")]
    pub page_cache_size: usize,
}

fn default_true() -> bool {
    true
}

fn default_version() -> u32 {
    CURRENT_VERSION
}

fn default_display_dpi() -> f64 {
    100.0
}

fn default_generation_dpi() -> u32 {
    1200
}

fn default_metafont_mode() -> String {
    "lexmarks".to_string()
}

fn default_locator_program() -> String {
    "kpsewhich".to_string()
}

fn default_locate_timeout() -> u64 {
    DEFAULT_LOCATE_TIMEOUT_SECS
}

fn default_vf_recursion_limit() -> u32 {
    DEFAULT_VF_RECURSION_LIMIT
}

fn default_prescan_policy() -> StackPolicy {
    StackPolicy::Warn
}

fn default_render_policy() -> StackPolicy {
    StackPolicy::Error
}

fn default_page_cache_size() -> usize {
    8
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            display_dpi: default_display_dpi(),
            generation_dpi: default_generation_dpi(),
            metafont_mode: default_metafont_mode(),
            locator_program: default_locator_program(),
            locate_timeout_secs: default_locate_timeout(),
            use_font_hints: true,
            alpha_blending: true,
            vf_recursion_limit: default_vf_recursion_limit(),
            eop_stack_policy: EopStackPolicy::default(),
            font_map: None,
            extra_search_paths: Vec::new(),
            page_cache_size: default_page_cache_size(),
        }
    }
}

impl Settings {
    #[must_use]
    pub fn locator_config(&self) -> LocatorConfig {
        LocatorConfig {
            program: self.locator_program.clone(),
            generation_dpi: self.generation_dpi,
            metafont_mode: self.metafont_mode.clone(),
            timeout: Duration::from_secs(self.locate_timeout_secs),
        }
    }

    #[must_use]
    pub fn interpreter_options(&self) -> InterpreterOptions {
        InterpreterOptions {
            vf_recursion_limit: self.vf_recursion_limit,
            prescan_stack_policy: self.eop_stack_policy.prescan,
            render_stack_policy: self.eop_stack_policy.render,
            record_trajectory: false,
        }
    }

    /// Parse a settings file, migrating older versions
    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        let mut settings: Settings = serde_yaml::from_str(content)?;
        if settings.version < CURRENT_VERSION {
            migrate_settings(&mut settings);
        }
        Ok(settings)
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self).map(|body| format!("{SETTINGS_HEADER}{body}"))
    }
}

const SETTINGS_HEADER: &str = "# dviview settings\n\
# display_dpi: resolution pages are rendered at\n\
# generation_dpi, metafont_mode: passed to the font locator for PK fonts\n\
# eop_stack_policy: warn or error when a page leaves values on the stack\n\n";

static SETTINGS: LazyLock<RwLock<Settings>> = LazyLock::new(|| RwLock::new(Settings::default()));

fn preferred_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|config| config.join(APP_NAME).join(SETTINGS_FILENAME))
}

/// Load the settings file, creating it with defaults when absent
pub fn load_settings() {
    let Some(path) = preferred_config_path() else {
        warn!("Could not determine config directory, using default settings");
        return;
    };
    if path.exists() {
        load_settings_from_path(&path);
    } else {
        info!("Settings file not found, creating with defaults at {path:?}");
        save_settings_to_file(&current(), &path);
    }
}

pub fn load_settings_from_path(path: &Path) {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            error!("Failed to read settings file {path:?}: {e}");
            return;
        }
    };
    match serde_yaml::from_str::<Settings>(&content) {
        Ok(mut settings) => {
            debug!("Loaded settings from {path:?}");
            if settings.version < CURRENT_VERSION {
                migrate_settings(&mut settings);
                save_settings_to_file(&settings, path);
            }
            *SETTINGS.write().unwrap_or_else(PoisonError::into_inner) = settings;
        }
        Err(e) => error!("Failed to parse settings file {path:?}: {e}"),
    }
}

fn migrate_settings(settings: &mut Settings) {
    info!(
        "Migrating settings from v{} to v{}",
        settings.version, CURRENT_VERSION
    );
    if settings.version < 2 && settings.locate_timeout_secs == 0 {
        settings.locate_timeout_secs = DEFAULT_LOCATE_TIMEOUT_SECS;
    }
    settings.version = CURRENT_VERSION;
}

pub fn save_settings() {
    let Some(path) = preferred_config_path() else {
        warn!("Could not determine config directory, cannot save settings");
        return;
    };
    save_settings_to_file(&current(), &path);
}

fn save_settings_to_file(settings: &Settings, path: &Path) {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            if let Err(e) = fs::create_dir_all(parent) {
                error!("Failed to create config directory {parent:?}: {e}");
                return;
            }
        }
    }
    let content = match settings.to_yaml() {
        Ok(content) => content,
        Err(e) => {
            error!("Failed to serialize settings: {e}");
            return;
        }
    };
    match fs::write(path, content) {
        Ok(()) => debug!("Saved settings to {path:?}"),
        Err(e) => error!("Failed to save settings to {path:?}: {e}"),
    }
}

// Public API for accessing/modifying settings

#[must_use]
pub fn current() -> Settings {
    SETTINGS
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

pub fn update(change: impl FnOnce(&mut Settings)) {
    change(&mut SETTINGS.write().unwrap_or_else(PoisonError::into_inner));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_takes_defaults() {
        let settings = Settings::from_yaml("version: 2\ndisplay_dpi: 150\n").unwrap();
        assert!((settings.display_dpi - 150.0).abs() < f64::EPSILON);
        assert_eq!(settings.generation_dpi, 1200);
        assert_eq!(settings.metafont_mode, "lexmarks");
        assert_eq!(settings.eop_stack_policy, EopStackPolicy::default());
        assert_eq!(settings.page_cache_size, 8);
    }

    #[test]
    fn stack_policies_parse_lowercase() {
        let settings =
            Settings::from_yaml("eop_stack_policy:\n  prescan: error\n  render: warn\n").unwrap();
        let options = settings.interpreter_options();
        assert_eq!(options.prescan_stack_policy, StackPolicy::Error);
        assert_eq!(options.render_stack_policy, StackPolicy::Warn);
    }

    #[test]
    fn version_one_gets_a_timeout() {
        let settings = Settings::from_yaml("version: 1\nlocate_timeout_secs: 0\n").unwrap();
        assert_eq!(settings.version, CURRENT_VERSION);
        assert_eq!(
            settings.locator_config().timeout,
            Duration::from_secs(DEFAULT_LOCATE_TIMEOUT_SECS)
        );
    }

    #[test]
    fn saved_yaml_loads_back() {
        let mut settings = Settings::default();
        settings.font_map = Some(PathBuf::from("/usr/share/texmf/psfonts.map"));
        settings.vf_recursion_limit = 8;
        let yaml = settings.to_yaml().unwrap();
        assert!(yaml.starts_with("# dviview settings"));
        let loaded = Settings::from_yaml(&yaml).unwrap();
        assert_eq!(loaded.font_map, settings.font_map);
        assert_eq!(loaded.interpreter_options().vf_recursion_limit, 8);
    }

    #[test]
    fn settings_file_is_read_into_global() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "version: 1\nlocator_program: mykpsewhich\n").unwrap();
        load_settings_from_path(&path);
        assert_eq!(current().locator_program, "mykpsewhich");
        // migrated files are written back
        let rewritten = fs::read_to_string(&path).unwrap();
        assert!(rewritten.contains("version: 2"));
        update(|s| s.locator_program = default_locator_program());
    }
}
