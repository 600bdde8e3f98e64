//! A rendered page and the interactive content found on it

use image::RgbaImage;

/// Axis-aligned pixel rectangle
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PixelRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    #[must_use]
    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x
            && y >= self.y
            && i64::from(x) < i64::from(self.x) + i64::from(self.width)
            && i64::from(y) < i64::from(self.y) + i64::from(self.height)
    }

    /// Smallest rectangle covering both
    #[must_use]
    pub fn union(&self, other: &PixelRect) -> PixelRect {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        PixelRect {
            x,
            y,
            width: (right - i64::from(x)) as u32,
            height: (bottom - i64::from(y)) as u32,
        }
    }

    /// Whether the vertical extents overlap
    #[must_use]
    pub fn same_line(&self, other: &PixelRect) -> bool {
        i64::from(self.y) <= other.bottom() && i64::from(other.y) <= self.bottom()
    }

    fn right(&self) -> i64 {
        i64::from(self.x) + i64::from(self.width)
    }

    fn bottom(&self) -> i64 {
        i64::from(self.y) + i64::from(self.height)
    }
}

/// Text of one glyph, for selection and search
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextBox {
    pub rect: PixelRect,
    pub text: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Hyperlink {
    pub rect: PixelRect,
    pub target: String,
}

/// Glyph area that leads back to a source line
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceLink {
    pub rect: PixelRect,
    pub line: u32,
    pub file: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PageContent {
    pub text_boxes: Vec<TextBox>,
    pub hyperlinks: Vec<Hyperlink>,
    pub source_links: Vec<SourceLink>,
}

impl PageContent {
    /// All text of the page in drawing order
    #[must_use]
    pub fn text(&self) -> String {
        self.text_boxes.iter().map(|b| b.text.as_str()).collect()
    }

    #[must_use]
    pub fn link_at(&self, x: i32, y: i32) -> Option<&Hyperlink> {
        self.hyperlinks.iter().find(|l| l.rect.contains(x, y))
    }

    #[must_use]
    pub fn source_at(&self, x: i32, y: i32) -> Option<&SourceLink> {
        self.source_links.iter().find(|l| l.rect.contains(x, y))
    }

    /// Append a separator to the last text box unless it already ends in one
    pub(crate) fn append_separator(&mut self, separator: char) {
        if let Some(last) = self.text_boxes.last_mut() {
            if !last.text.ends_with([' ', '\n']) {
                last.text.push(separator);
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct RenderedPage {
    /// 0-based page index
    pub page: usize,
    pub dpi: f64,
    pub image: RgbaImage,
    pub content: PageContent,
    pub warnings: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_box(x: i32, text: &str) -> TextBox {
        TextBox {
            rect: PixelRect {
                x,
                y: 0,
                width: 5,
                height: 5,
            },
            text: text.into(),
        }
    }

    #[test]
    fn separators_are_not_doubled() {
        let mut content = PageContent::default();
        content.append_separator(' ');
        assert!(content.text_boxes.is_empty());
        content.text_boxes.push(text_box(0, "a"));
        content.append_separator(' ');
        content.append_separator('\n');
        content.text_boxes.push(text_box(5, "b"));
        content.append_separator('\n');
        assert_eq!(content.text(), "a b\n");
    }

    #[test]
    fn hit_testing() {
        let content = PageContent {
            hyperlinks: vec![Hyperlink {
                rect: PixelRect {
                    x: 10,
                    y: 10,
                    width: 2,
                    height: 2,
                },
                target: "#a".into(),
            }],
            ..PageContent::default()
        };
        assert!(content.link_at(11, 11).is_some());
        assert!(content.link_at(12, 11).is_none());
        assert!(content.source_at(11, 11).is_none());
    }
}
