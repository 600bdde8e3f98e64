//! Classification and parsing of `\special` strings

use crate::fonts::glyph::Rgb;

/// Recognized special commands, borrowing from the special's text
#[derive(Clone, Debug, PartialEq)]
pub enum Special<'a> {
    /// `papersize=...`; the text after the keyword
    PaperSize(&'a str),
    /// `background <color>`
    Background(&'a str),
    /// `html:<A name="...">`, the anchor name
    HtmlAnchor(&'a str),
    /// `html:<A href="...">`, the link target
    HtmlHref(&'a str),
    /// `html:</A>`
    HtmlAnchorEnd,
    /// `header=<file>`
    PsHeader(&'a str),
    /// `!<literal PostScript header>`
    PsBang(&'a str),
    /// `"<literal PostScript>`
    PsQuote(&'a str),
    /// `ps:...`, the whole special
    Ps(&'a str),
    /// `PSfile=<file> <options>`
    PsFile(&'a str),
    /// `src:<line><file>`
    Source { line: u32, file: &'a str },
    Color(ColorCommand),
    Unknown(&'a str),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColorCommand {
    Push(Rgb),
    Pop,
    Set(Rgb),
}

fn strip_prefix_ci<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let head = text.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &text[prefix.len()..])
}

/// Up to the first `"`, which closes an HTML attribute value
fn until_quote(text: &str) -> &str {
    text.split('"').next().unwrap_or(text)
}

#[must_use]
pub fn classify(text: &str) -> Special<'_> {
    if let Some(rest) = strip_prefix_ci(text, "papersize") {
        return Special::PaperSize(rest);
    }
    if let Some(rest) = strip_prefix_ci(text, "background") {
        return Special::Background(rest.trim());
    }
    if let Some(rest) = strip_prefix_ci(text, "html:<A name=") {
        return Special::HtmlAnchor(until_quote(rest.strip_prefix('"').unwrap_or(rest)));
    }
    if let Some(rest) = strip_prefix_ci(text, "html:<A href=") {
        return Special::HtmlHref(until_quote(rest.strip_prefix('"').unwrap_or(rest)));
    }
    if strip_prefix_ci(text, "html:</A>").is_some() {
        return Special::HtmlAnchorEnd;
    }
    if let Some(rest) = strip_prefix_ci(text, "header=") {
        return Special::PsHeader(rest.trim());
    }
    if let Some(rest) = text.strip_prefix('!') {
        return Special::PsBang(rest);
    }
    if let Some(rest) = text.strip_prefix('"') {
        return Special::PsQuote(rest);
    }
    if strip_prefix_ci(text, "ps:").is_some() {
        return Special::Ps(text);
    }
    if let Some(rest) = strip_prefix_ci(text, "PSfile=") {
        return Special::PsFile(rest);
    }
    if let Some(rest) = strip_prefix_ci(text, "src:") {
        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        return Special::Source {
            line: rest[..digits].parse().unwrap_or(0),
            file: rest[digits..].trim(),
        };
    }
    if let Some(rest) = strip_prefix_ci(text, "color") {
        if let Some(command) = parse_color_command(rest.trim()) {
            return Special::Color(command);
        }
    }
    Special::Unknown(text)
}

fn parse_color_command(text: &str) -> Option<ColorCommand> {
    if let Some(spec) = strip_prefix_ci(text, "push") {
        return parse_color(spec.trim()).map(ColorCommand::Push);
    }
    if strip_prefix_ci(text, "pop").is_some() {
        return Some(ColorCommand::Pop);
    }
    parse_color(text).map(ColorCommand::Set)
}

/// Parse `rgb r g b`, `gray g`, `cmyk c m y k` or a color name
#[must_use]
pub fn parse_color(spec: &str) -> Option<Rgb> {
    let mut words = spec.split_whitespace();
    let model = words.next()?;
    let values: Vec<f64> = words.map(str::parse).collect::<Result<_, _>>().ok()?;
    match (model.to_ascii_lowercase().as_str(), values.as_slice()) {
        ("rgb", [r, g, b]) => Some(Rgb::from_unit(*r, *g, *b)),
        ("gray", [g]) => Some(Rgb::from_unit(*g, *g, *g)),
        ("cmyk", [c, m, y, k]) => Some(Rgb::from_unit(
            1.0 - (c + k).min(1.0),
            1.0 - (m + k).min(1.0),
            1.0 - (y + k).min(1.0),
        )),
        (name, []) => named_color(name),
        _ => None,
    }
}

fn named_color(name: &str) -> Option<Rgb> {
    let color = match name {
        "black" => Rgb::BLACK,
        "white" => Rgb::WHITE,
        "red" => Rgb::new(0xFF, 0, 0),
        "green" => Rgb::new(0, 0xFF, 0),
        "blue" => Rgb::new(0, 0, 0xFF),
        "cyan" => Rgb::new(0, 0xFF, 0xFF),
        "magenta" => Rgb::new(0xFF, 0, 0xFF),
        "yellow" => Rgb::new(0xFF, 0xFF, 0),
        _ => return None,
    };
    Some(color)
}

/// Physical page size requested by the document
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PaperSize {
    pub width_mm: f64,
    pub height_mm: f64,
}

impl PaperSize {
    pub const A4: PaperSize = PaperSize {
        width_mm: 210.0,
        height_mm: 297.0,
    };

    const MIN_MM: f64 = 50.0;
    const MAX_MM: f64 = 1200.0;

    /// Parse the argument of a `papersize` special: `=W,H` with units,
    /// `=WxH` in millimeters, or a paper name
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let spec = text.trim().strip_prefix('=')?.trim();
        if let Some(size) = Self::named(spec) {
            return Some(size);
        }
        let (width_mm, height_mm) = if let Some((w, h)) = spec.split_once(',') {
            (length_in_mm(w)?, length_in_mm(h)?)
        } else if let Some((w, h)) = spec.split_once('x') {
            (w.trim().parse().ok()?, h.trim().parse().ok()?)
        } else {
            return None;
        };
        Some(Self {
            width_mm: f64::clamp(width_mm, Self::MIN_MM, Self::MAX_MM),
            height_mm: f64::clamp(height_mm, Self::MIN_MM, Self::MAX_MM),
        })
    }

    fn named(name: &str) -> Option<Self> {
        let (width_mm, height_mm) = match name.to_ascii_lowercase().as_str() {
            "a3" | "din a3" => (297.0, 420.0),
            "a4" | "din a4" => (210.0, 297.0),
            "a5" | "din a5" => (148.5, 210.0),
            "b5" | "din b5" => (176.0, 250.0),
            "letter" | "us letter" => (215.9, 279.4),
            "legal" | "us legal" => (215.9, 355.6),
            _ => return None,
        };
        Some(Self {
            width_mm,
            height_mm,
        })
    }

    /// Pixel dimensions at `dpi`
    #[must_use]
    pub fn pixels(&self, dpi: f64) -> (u32, u32) {
        let px = |mm: f64| (mm / 25.4 * dpi).round().max(1.0) as u32;
        (px(self.width_mm), px(self.height_mm))
    }
}

/// Convert a TeX length such as `8.5in` or `597.50787pt` to millimeters
fn length_in_mm(text: &str) -> Option<f64> {
    let text = text.trim();
    let split = text
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(text.len());
    let value: f64 = text[..split].trim().parse().ok()?;
    let mm_per_unit = match text[split..].trim() {
        "mm" | "" => 1.0,
        "cm" => 10.0,
        "in" => 25.4,
        "pt" => 25.4 / 72.27,
        "bp" => 25.4 / 72.0,
        "pc" => 12.0 * 25.4 / 72.27,
        "dd" => 1238.0 / 1157.0 * 25.4 / 72.27,
        "cc" => 12.0 * 1238.0 / 1157.0 * 25.4 / 72.27,
        _ => return None,
    };
    Some(value * mm_per_unit)
}

/// hyperref's PostScript for links, anchors and bookmarks
#[derive(Clone, Debug, PartialEq)]
pub enum PdfMark<'a> {
    /// Housekeeping code with nothing to extract
    Ignore,
    Anchor(&'a str),
    Bookmark {
        title: &'a str,
        destination: &'a str,
        count: u32,
    },
    /// Not hyperref code: treat as ordinary PostScript
    Other,
}

/// Section `index` of `text` split by `open`, cut at `close`
fn section<'a>(text: &'a str, open: char, index: usize, close: char) -> &'a str {
    text.split(open)
        .nth(index)
        .and_then(|s| s.split(close).next())
        .unwrap_or("")
}

#[must_use]
pub fn classify_pdfmark(ps: &str) -> PdfMark<'_> {
    if !ps.starts_with("ps:SDict begin") {
        return PdfMark::Other;
    }
    if ps == "ps:SDict begin H.S end"
        || ps == "ps:SDict begin H.R end"
        || ps.ends_with("H.A end")
        || ps.ends_with("H.L end")
        || ps.starts_with("ps:SDict begin /product where{pop product(Distiller)")
    {
        return PdfMark::Ignore;
    }
    if ps.starts_with("ps:SDict begin [") && ps.ends_with(" pdfmark end") {
        if ps.contains("/DEST") {
            return PdfMark::Anchor(section(ps, '(', 1, ')'));
        }
        if ps.contains("/Dest") && ps.contains("/Title") {
            return PdfMark::Bookmark {
                title: section(ps, '(', 2, ')'),
                destination: section(ps, '(', 1, ')'),
                count: section(ps, '-', 1, ' ').parse().unwrap_or(0),
            };
        }
        return PdfMark::Ignore;
    }
    PdfMark::Other
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_special_splits_line_and_file() {
        assert_eq!(
            classify("src:42 foo.tex"),
            Special::Source {
                line: 42,
                file: "foo.tex"
            }
        );
        assert_eq!(
            classify("SRC:7bar.tex"),
            Special::Source {
                line: 7,
                file: "bar.tex"
            }
        );
    }

    #[test]
    fn html_specials() {
        assert_eq!(classify("html:<A name=\"sec1\">"), Special::HtmlAnchor("sec1"));
        assert_eq!(
            classify("html:<a href=\"#sec1\">"),
            Special::HtmlHref("#sec1")
        );
        assert_eq!(classify("html:</A>"), Special::HtmlAnchorEnd);
    }

    #[test]
    fn postscript_specials() {
        assert_eq!(classify("!/x 1 def"), Special::PsBang("/x 1 def"));
        assert_eq!(classify("\"newpath"), Special::PsQuote("newpath"));
        assert_eq!(classify("ps::[begin] x"), Special::Ps("ps::[begin] x"));
        assert_eq!(classify("header=foo.pro"), Special::PsHeader("foo.pro"));
        assert_eq!(classify("PSfile=a.eps llx=0"), Special::PsFile("a.eps llx=0"));
        assert_eq!(classify("em:linewidth"), Special::Unknown("em:linewidth"));
    }

    #[test]
    fn color_specials() {
        assert_eq!(
            classify("color push rgb 1 0 0"),
            Special::Color(ColorCommand::Push(Rgb::new(0xFF, 0, 0)))
        );
        assert_eq!(classify("color pop"), Special::Color(ColorCommand::Pop));
        assert_eq!(
            classify("color gray 0"),
            Special::Color(ColorCommand::Set(Rgb::BLACK))
        );
        assert_eq!(
            classify("color push Blue"),
            Special::Color(ColorCommand::Push(Rgb::new(0, 0, 0xFF)))
        );
        assert_eq!(parse_color("cmyk 0 0 0 1"), Some(Rgb::BLACK));
        assert_eq!(parse_color("rgb 1 0"), None);
    }

    #[test]
    fn paper_sizes() {
        let letter = PaperSize::parse("=8.5in,11in").unwrap();
        assert!((letter.width_mm - 215.9).abs() < 1e-6);
        assert!((letter.height_mm - 279.4).abs() < 1e-6);
        assert_eq!(PaperSize::parse("=a4"), Some(PaperSize::A4));
        let tiny = PaperSize::parse("=10x20").unwrap();
        assert!((tiny.width_mm - 50.0).abs() < 1e-9);
        assert!(PaperSize::parse("a4").is_none());
        assert!(PaperSize::parse("=3furlongs,2in").is_none());
        assert_eq!(PaperSize::A4.pixels(25.4), (210, 297));
    }

    #[test]
    fn hyperref_pdfmarks() {
        assert_eq!(classify_pdfmark("ps:SDict begin H.S end"), PdfMark::Ignore);
        assert_eq!(
            classify_pdfmark("ps:SDict begin [ /View [/XYZ H.V] /DEST (page.2) /DEST pdfmark end"),
            PdfMark::Anchor("page.2")
        );
        assert_eq!(
            classify_pdfmark(
                "ps:SDict begin [ /Count -2 /Dest (section.1) cvn /Title (Intro) /OUT pdfmark end"
            ),
            PdfMark::Bookmark {
                title: "Intro",
                destination: "section.1",
                count: 2
            }
        );
        assert_eq!(classify_pdfmark("ps: 1 0 0 setrgbcolor"), PdfMark::Other);
    }
}
