//! Document-wide tables gathered by the prescan pass
//!
//! The prescan walks every page once before anything is drawn. It collects
//! what later needs random access: source anchors for inverse search, named
//! anchors and bookmarks for hyperlinks, PostScript code, paper size and
//! page backgrounds.

use std::collections::{BTreeMap, HashMap};

use log::{debug, warn};

use super::special::{self, PaperSize, PdfMark, Special};
use crate::fonts::glyph::Rgb;

/// Spell units per PostScript point at 300 dpi
const PS_SPELL_DIVISOR: f64 = 65536.0 * 1200.0 / 300.0;

/// Position of a `src:` special
#[derive(Clone, Debug, PartialEq)]
pub struct SourceAnchor {
    pub file: String,
    pub line: u32,
    /// 0-based page index
    pub page: usize,
    pub v: i64,
}

/// Destination of a named anchor
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Anchor {
    pub page: usize,
    pub v: i64,
}

/// Flat bookmark entry as hyperref writes it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bookmark {
    pub title: String,
    pub destination: String,
    /// Number of direct children following this entry
    pub count: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BookmarkNode {
    pub title: String,
    pub destination: String,
    pub children: Vec<BookmarkNode>,
}

#[derive(Clone, Debug, Default)]
pub struct PrescanData {
    pub source_anchors: Vec<SourceAnchor>,
    pub anchors: HashMap<String, Anchor>,
    pub bookmarks: Vec<Bookmark>,
    /// PostScript code per page; empty strings for pages without any
    pub page_postscript: Vec<String>,
    pub ps_header: String,
    pub paper_size: Option<PaperSize>,
    /// Page from which a background color applies
    pub backgrounds: BTreeMap<usize, Rgb>,
    pub external_ps_files: usize,
    pub external_other_files: usize,
    pub warnings: Vec<String>,
}

impl PrescanData {
    #[must_use]
    pub fn with_pages(total_pages: usize) -> Self {
        Self {
            page_postscript: vec![String::new(); total_pages],
            ..Self::default()
        }
    }

    /// Background color in effect on `page`
    #[must_use]
    pub fn background_for(&self, page: usize) -> Option<Rgb> {
        self.backgrounds.range(..=page).next_back().map(|(_, c)| *c)
    }

    #[must_use]
    pub fn postscript_for(&self, page: usize) -> Option<&str> {
        self.page_postscript
            .get(page)
            .map(String::as_str)
            .filter(|ps| !ps.is_empty())
    }

    #[must_use]
    pub fn has_postscript(&self) -> bool {
        !self.ps_header.is_empty() || self.page_postscript.iter().any(|ps| !ps.is_empty())
    }

    #[must_use]
    pub fn has_source_specials(&self) -> bool {
        !self.source_anchors.is_empty()
    }

    /// Rebuild the outline hierarchy from the flat child counts
    #[must_use]
    pub fn bookmark_tree(&self) -> Vec<BookmarkNode> {
        let mut entries = self.bookmarks.iter();
        let mut roots = Vec::new();
        while let Some(node) = take_node(&mut entries) {
            roots.push(node);
        }
        roots
    }

    /// Record a special met at top level of `page` with the point at (h, v)
    pub(crate) fn record_special(&mut self, text: &str, page: usize, h: i64, v: i64) {
        match special::classify(text) {
            Special::PaperSize(spec) => match PaperSize::parse(spec) {
                Some(size) => self.paper_size = Some(size),
                None => self.warn(format!("Unrecognized paper size {spec:?}")),
            },
            Special::Background(spec) => match special::parse_color(spec) {
                Some(color) => {
                    self.backgrounds.insert(page, color);
                }
                None => self.warn(format!("Unrecognized background color {spec:?}")),
            },
            Special::HtmlAnchor(name) => {
                self.anchors.insert(name.to_string(), Anchor { page, v });
            }
            Special::PsHeader(file) => {
                self.ps_header
                    .push_str(&format!(" ({file}) run\n"));
            }
            Special::PsBang(code) => {
                self.ps_header
                    .push_str(&format!(" @defspecial \n{code} @fedspecial \n"));
            }
            Special::PsQuote(code) => {
                let (x, y) = ps_position(h, v);
                self.page_ps(page).push_str(&format!(
                    " {x} {y} moveto\n @beginspecial @setspecial \n{code} @endspecial \n"
                ));
            }
            Special::Ps(code) => self.record_ps(code, page, h, v),
            Special::PsFile(args) => self.record_ps_file(args, page, h, v),
            Special::Source { line, file } => {
                self.source_anchors.push(SourceAnchor {
                    file: file.to_string(),
                    line,
                    page,
                    v,
                });
            }
            Special::HtmlHref(_) | Special::HtmlAnchorEnd | Special::Color(_) => {}
            Special::Unknown(text) => debug!("Ignoring special {text:?}"),
        }
    }

    fn record_ps(&mut self, code: &str, page: usize, h: i64, v: i64) {
        match special::classify_pdfmark(code) {
            PdfMark::Ignore => return,
            PdfMark::Anchor(name) => {
                self.anchors.insert(name.to_string(), Anchor { page, v });
                return;
            }
            PdfMark::Bookmark {
                title,
                destination,
                count,
            } => {
                self.bookmarks.push(Bookmark {
                    title: title.to_string(),
                    destination: destination.to_string(),
                    count,
                });
                return;
            }
            PdfMark::Other => {}
        }
        let (x, y) = ps_position(h, v);
        let moveto = format!(" {x} {y} moveto\n");
        let ps = self.page_ps(page);
        if let Some(rest) = code.strip_prefix("ps::[begin]") {
            ps.push_str(&moveto);
            ps.push_str(rest);
        } else if let Some(rest) = code.strip_prefix("ps::[end]") {
            ps.push_str(rest);
        } else if let Some(rest) = code.strip_prefix("ps::") {
            ps.push_str(rest);
        } else if let Some(rest) = code.get(3..) {
            ps.push_str(&moveto);
            ps.push_str(rest);
        }
        ps.push('\n');
    }

    fn record_ps_file(&mut self, args: &str, page: usize, h: i64, v: i64) {
        let file = args
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .trim_matches('"');
        if file.is_empty() {
            self.warn("PSfile special without a file name".to_string());
            return;
        }
        let lower = file.to_ascii_lowercase();
        let is_postscript = [".ps", ".eps", ".ps.gz", ".eps.gz"]
            .iter()
            .any(|ext| lower.ends_with(ext));
        if !is_postscript {
            self.external_other_files += 1;
            return;
        }
        self.external_ps_files += 1;
        let (x, y) = ps_position(h, v);
        self.page_ps(page).push_str(&format!(
            " {x} {y} moveto\n @beginspecial @setspecial \n ({file}) run\n @endspecial \n"
        ));
    }

    fn page_ps(&mut self, page: usize) -> &mut String {
        if self.page_postscript.len() <= page {
            self.page_postscript.resize(page + 1, String::new());
        }
        &mut self.page_postscript[page]
    }

    fn warn(&mut self, message: String) {
        warn!("{message}");
        self.warnings.push(message);
    }
}

/// PostScript coordinates of a DVI position, 300 dpi with a one inch offset
fn ps_position(h: i64, v: i64) -> (i64, i64) {
    let to_ps = |spell: i64| (spell as f64 / PS_SPELL_DIVISOR) as i64 - 300;
    (to_ps(h), to_ps(v))
}

fn take_node<'a>(entries: &mut impl Iterator<Item = &'a Bookmark>) -> Option<BookmarkNode> {
    let entry = entries.next()?;
    let mut children = Vec::new();
    for _ in 0..entry.count {
        match take_node(entries) {
            Some(child) => children.push(child),
            None => break,
        }
    }
    Some(BookmarkNode {
        title: entry.title.clone(),
        destination: entry.destination.clone(),
        children,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORIGIN: i64 = 1200 << 16;

    #[test]
    fn quote_special_places_code_at_point() {
        let mut data = PrescanData::with_pages(1);
        data.record_special("\"0 0 moveto", 0, ORIGIN, ORIGIN);
        assert_eq!(
            data.postscript_for(0),
            Some(" 0 0 moveto\n @beginspecial @setspecial \n0 0 moveto @endspecial \n")
        );
    }

    #[test]
    fn ps_variants() {
        let mut data = PrescanData::with_pages(1);
        data.record_special("ps::[begin] gsave", 0, ORIGIN, ORIGIN);
        data.record_special("ps::[end] grestore", 0, ORIGIN, ORIGIN);
        data.record_special("ps: 1 setgray", 0, ORIGIN, ORIGIN);
        assert_eq!(
            data.postscript_for(0),
            Some(" 0 0 moveto\n gsave\n grestore\n 0 0 moveto\n 1 setgray\n")
        );
    }

    #[test]
    fn header_specials_accumulate() {
        let mut data = PrescanData::with_pages(1);
        data.record_special("header=color.pro", 0, 0, 0);
        data.record_special("!/a 1 def", 0, 0, 0);
        assert_eq!(
            data.ps_header,
            " (color.pro) run\n @defspecial \n/a 1 def @fedspecial \n"
        );
        assert!(data.has_postscript());
    }

    #[test]
    fn anchors_and_sources() {
        let mut data = PrescanData::with_pages(3);
        data.record_special("html:<A name=\"intro\">", 2, 0, 777);
        data.record_special("src:12 main.tex", 1, 0, 555);
        assert_eq!(data.anchors["intro"], Anchor { page: 2, v: 777 });
        assert_eq!(
            data.source_anchors,
            vec![SourceAnchor {
                file: "main.tex".into(),
                line: 12,
                page: 1,
                v: 555
            }]
        );
    }

    #[test]
    fn backgrounds_carry_forward() {
        let mut data = PrescanData::with_pages(5);
        data.record_special("background rgb 1 0 0", 1, 0, 0);
        data.record_special("background gray 1", 3, 0, 0);
        assert_eq!(data.background_for(0), None);
        assert_eq!(data.background_for(2), Some(Rgb::new(0xFF, 0, 0)));
        assert_eq!(data.background_for(4), Some(Rgb::WHITE));
    }

    #[test]
    fn ps_file_counts() {
        let mut data = PrescanData::with_pages(1);
        data.record_special("PSfile=fig.eps llx=0", 0, ORIGIN, ORIGIN);
        data.record_special("PSfile=\"photo.png\"", 0, ORIGIN, ORIGIN);
        assert_eq!(data.external_ps_files, 1);
        assert_eq!(data.external_other_files, 1);
        assert!(data.postscript_for(0).unwrap().contains("(fig.eps) run"));
    }

    #[test]
    fn bookmarks_nest_by_count() {
        let mut data = PrescanData::with_pages(1);
        for (title, count) in [("One", 2), ("1.1", 0), ("1.2", 1), ("1.2.1", 0), ("Two", 0)] {
            data.bookmarks.push(Bookmark {
                title: title.into(),
                destination: title.into(),
                count,
            });
        }
        let tree = data.bookmark_tree();
        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].children.len(), 2);
        assert_eq!(tree[0].children[1].children[0].title, "1.2.1");
        assert_eq!(tree[1].title, "Two");
    }

    #[test]
    fn bad_papersize_is_a_warning() {
        let mut data = PrescanData::with_pages(1);
        data.record_special("papersize=huge", 0, 0, 0);
        assert!(data.paper_size.is_none());
        assert_eq!(data.warnings.len(), 1);
        data.record_special("papersize=210mm,297mm", 0, 0, 0);
        assert_eq!(data.paper_size, Some(PaperSize::A4));
    }
}
