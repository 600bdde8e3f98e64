//! TeX font name → outline font file map
//!
//! Reads dvips-style map files:
//!
//! ```text
//! ptmr8r Times-Roman "TeXBase1Encoding ReEncodeFont" <8r.enc <utmr8a.pfb
//! ptmro8r Times-Roman "0.167 SlantFont" <8r.enc <utmr8a.pfb
//! ```
//!
//! and the encoding vectors they reference.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, warn};

use super::error::FontError;
use crate::dvi::opcodes::MAX_CHARS_IN_FONT;

/// Type 1 programs; the outline backend only reads sfnt files, so
/// these fonts are left to the PK passes
const TYPE1_EXTENSIONS: [&str; 2] = ["pfb", "pfa"];

/// One line of a font map
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FontMapEntry {
    pub tex_name: String,
    pub ps_name: Option<String>,
    /// Outline file name, e.g. `utmr8a.pfb`
    pub font_file: Option<String>,
    pub encoding_file: Option<String>,
    pub slant: f64,
    pub extend: f64,
}

/// Per-font hints handed to the outline backend
#[derive(Clone, Debug)]
pub struct OutlineHints {
    /// Glyph names indexed by character code
    pub encoding: Option<Arc<Vec<String>>>,
    pub slant: f64,
    pub extend: f64,
}

impl Default for OutlineHints {
    fn default() -> Self {
        Self {
            encoding: None,
            slant: 0.0,
            extend: 1.0,
        }
    }
}

#[derive(Debug, Default)]
pub struct FontMap {
    entries: HashMap<String, FontMapEntry>,
    search_dirs: Vec<PathBuf>,
    encodings: HashMap<String, Arc<Vec<String>>>,
}

impl FontMap {
    /// Load a map file; encodings are looked up next to it and in `extra_dirs`
    pub fn load(path: &Path, extra_dirs: &[PathBuf]) -> Result<Self, FontError> {
        let text = std::fs::read_to_string(path).map_err(|source| FontError::FileUnreadable {
            path: path.to_path_buf(),
            source,
        })?;
        let mut map = Self::parse(&text);
        if let Some(dir) = path.parent() {
            map.search_dirs.push(dir.to_path_buf());
        }
        map.search_dirs.extend(extra_dirs.iter().cloned());
        debug!("Font map {}: {} entries", path.display(), map.entries.len());
        Ok(map)
    }

    #[must_use]
    pub fn parse(text: &str) -> Self {
        let entries = text
            .lines()
            .filter_map(parse_map_line)
            .map(|entry| (entry.tex_name.clone(), entry))
            .collect();
        Self {
            entries,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn entry(&self, tex_name: &str) -> Option<&FontMapEntry> {
        self.entries.get(tex_name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Outline file name the locator should ask for besides the TeX name
    #[must_use]
    pub fn outline_alias(&self, tex_name: &str) -> Option<&str> {
        let file = self.entry(tex_name)?.font_file.as_deref()?;
        let is_type1 = Path::new(file)
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| TYPE1_EXTENSIONS.iter().any(|t| ext.eq_ignore_ascii_case(t)));
        if is_type1 {
            debug!("{tex_name}: {file} is a Type 1 font, using bitmaps instead");
            return None;
        }
        Some(file)
    }

    /// Encoding vector and transforms for `tex_name`, loading the
    /// encoding file on first use
    pub fn hints(&mut self, tex_name: &str) -> OutlineHints {
        let Some(entry) = self.entries.get(tex_name) else {
            return OutlineHints::default();
        };
        let (slant, extend) = (entry.slant, entry.extend);
        let encoding = entry
            .encoding_file
            .clone()
            .and_then(|file| self.encoding(&file));
        OutlineHints {
            encoding,
            slant,
            extend,
        }
    }

    fn encoding(&mut self, file: &str) -> Option<Arc<Vec<String>>> {
        if let Some(vector) = self.encodings.get(file) {
            return Some(vector.clone());
        }
        let path = self
            .search_dirs
            .iter()
            .map(|dir| dir.join(file))
            .find(|candidate| candidate.is_file())?;
        match std::fs::read_to_string(&path) {
            Ok(text) => {
                let vector = Arc::new(parse_encoding(&text));
                self.encodings.insert(file.to_string(), vector.clone());
                Some(vector)
            }
            Err(e) => {
                warn!("Cannot read encoding {}: {e}", path.display());
                None
            }
        }
    }
}

fn parse_map_line(line: &str) -> Option<FontMapEntry> {
    let line = line.trim();
    if line.is_empty() || line.starts_with(['%', '#', '*', ';']) {
        return None;
    }

    let mut tokens = tokenize(line).into_iter();
    let tex_name = tokens.next()?;
    let mut entry = FontMapEntry {
        tex_name,
        extend: 1.0,
        ..FontMapEntry::default()
    };
    let mut file_follows = false;
    for token in tokens {
        if let Some(quoted) = token.strip_prefix('"') {
            apply_ps_code(&mut entry, quoted);
            continue;
        }
        let file = if let Some(rest) = token.strip_prefix("<<").or_else(|| token.strip_prefix("<[")) {
            Some(rest.to_string())
        } else if let Some(rest) = token.strip_prefix('<') {
            Some(rest.to_string())
        } else if file_follows {
            Some(token.clone())
        } else {
            None
        };
        match file {
            Some(name) if name.is_empty() => file_follows = true,
            Some(name) => {
                file_follows = false;
                if name.ends_with(".enc") {
                    entry.encoding_file = Some(name);
                } else {
                    entry.font_file = Some(name);
                }
            }
            None if entry.ps_name.is_none() => entry.ps_name = Some(token),
            None => {}
        }
    }
    Some(entry)
}

/// Split on whitespace, keeping `"..."` groups together (with the
/// leading quote retained as a marker)
fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut rest = line;
    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            break;
        }
        if let Some(body) = rest.strip_prefix('"') {
            let end = body.find('"').unwrap_or(body.len());
            tokens.push(format!("\"{}", &body[..end]));
            rest = body.get(end + 1..).unwrap_or("");
        } else {
            let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
            tokens.push(rest[..end].to_string());
            rest = &rest[end..];
        }
    }
    tokens
}

fn apply_ps_code(entry: &mut FontMapEntry, code: &str) {
    let words: Vec<&str> = code.split_whitespace().collect();
    for pair in words.windows(2) {
        let Ok(value) = pair[0].parse::<f64>() else {
            continue;
        };
        match pair[1] {
            "SlantFont" => entry.slant = value,
            "ExtendFont" => entry.extend = value,
            _ => {}
        }
    }
}

/// Parse a PostScript encoding vector `/Name [ /g0 /g1 ... ] def`
#[must_use]
pub fn parse_encoding(text: &str) -> Vec<String> {
    let body: String = text
        .lines()
        .map(|line| line.split('%').next().unwrap_or(""))
        .collect::<Vec<_>>()
        .join(" ");
    let Some(open) = body.find('[') else {
        return Vec::new();
    };
    let close = body[open..].find(']').map_or(body.len(), |i| open + i);
    body[open + 1..close]
        .split_whitespace()
        .filter_map(|token| token.strip_prefix('/'))
        .take(MAX_CHARS_IN_FONT)
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_slanted_entry() {
        let map = FontMap::parse(
            "% comment\n\
             ptmro8r Times-Roman \"0.167 SlantFont\" <8r.enc <utmr8a.pfb\n",
        );
        let entry = map.entry("ptmro8r").unwrap();
        assert_eq!(entry.ps_name.as_deref(), Some("Times-Roman"));
        assert_eq!(entry.encoding_file.as_deref(), Some("8r.enc"));
        assert_eq!(entry.font_file.as_deref(), Some("utmr8a.pfb"));
        assert!((entry.slant - 0.167).abs() < 1e-9);
        assert!((entry.extend - 1.0).abs() < 1e-9);
        // Type 1 files are not outline aliases
        assert_eq!(map.outline_alias("ptmro8r"), None);
    }

    #[test]
    fn only_sfnt_files_are_outline_aliases() {
        let map = FontMap::parse(
            "cmr10 CMR10 <cmr10.pfb
             cmti10 CMTI10 <cmti10.PFA
             lmr10 LMRoman10 <lmroman10-regular.otf
             dejavu DejaVuSans <DejaVuSans.ttf
",
        );
        assert_eq!(map.outline_alias("cmr10"), None);
        assert_eq!(map.outline_alias("cmti10"), None);
        assert_eq!(map.outline_alias("lmr10"), Some("lmroman10-regular.otf"));
        assert_eq!(map.outline_alias("dejavu"), Some("DejaVuSans.ttf"));
        assert_eq!(map.outline_alias("cmbx10"), None);
    }

    #[test]
    fn detached_file_marker_and_extend() {
        let map = FontMap::parse("cmr10 CMR10 \"1.2 ExtendFont\" < cmr10.pfb\n");
        let entry = map.entry("cmr10").unwrap();
        assert_eq!(entry.font_file.as_deref(), Some("cmr10.pfb"));
        assert!((entry.extend - 1.2).abs() < 1e-9);
        assert!(map.entry("cmr12").is_none());
    }

    #[test]
    fn encoding_vector_ignores_comments() {
        let vector = parse_encoding(
            "% header\n/TeXBase1Encoding [\n/.notdef /dotaccent % 0x01\n/fi /fl\n] def\n",
        );
        assert_eq!(vector, vec![".notdef", "dotaccent", "fi", "fl"]);
    }

    #[test]
    fn hints_load_encoding_from_map_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("t.enc"), "/T [ /A /B ] def").unwrap();
        let map_path = dir.path().join("test.map");
        std::fs::write(&map_path, "tfont TFont <t.enc <tfont.ttf\n").unwrap();
        let mut map = FontMap::load(&map_path, &[]).unwrap();
        let hints = map.hints("tfont");
        assert_eq!(hints.encoding.unwrap().as_slice(), ["A", "B"]);
        assert!(map.hints("other").encoding.is_none());
    }
}
