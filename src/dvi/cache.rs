//! LRU cache of rendered DVI pages
//!
//! All cached pages belong to one rendering of one document: the same
//! file contents at the same resolution. Asking for pages of another
//! rendering empties the cache first.

use std::num::NonZeroUsize;
use std::sync::Arc;

use log::debug;
use lru::LruCache;

use super::page::RenderedPage;

/// What a cached page was rendered from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rendering {
    /// Hash of the document bytes
    pub document: u64,
    /// Resolution in thousandths of a dpi
    pub dpi_millis: u64,
}

impl Rendering {
    #[must_use]
    pub fn new(document: u64, dpi: f64) -> Self {
        Self {
            document,
            dpi_millis: (dpi * 1000.0).round() as u64,
        }
    }
}

pub struct PageCache {
    pages: LruCache<usize, Arc<RenderedPage>>,
    rendering: Option<Rendering>,
}

impl PageCache {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            pages: LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).expect("1 is non-zero")),
            ),
            rendering: None,
        }
    }

    fn switch_to(&mut self, rendering: Rendering) {
        if self.rendering != Some(rendering) {
            if !self.pages.is_empty() {
                debug!("Dropping {} pages of an outdated rendering", self.pages.len());
            }
            self.pages.clear();
            self.rendering = Some(rendering);
        }
    }

    /// Cached `page` of `rendering`, promoting it in the LRU order
    pub fn get(&mut self, rendering: Rendering, page: usize) -> Option<Arc<RenderedPage>> {
        self.switch_to(rendering);
        self.pages.get(&page).cloned()
    }

    pub fn insert(&mut self, rendering: Rendering, page: RenderedPage) -> Arc<RenderedPage> {
        self.switch_to(rendering);
        let page = Arc::new(page);
        self.pages.put(page.page, page.clone());
        page
    }

    pub fn invalidate_all(&mut self) {
        self.pages.clear();
    }

    pub fn invalidate_page(&mut self, page: usize) {
        self.pages.pop(&page);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pages.len()
    }
}
