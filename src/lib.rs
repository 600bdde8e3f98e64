pub mod dvi;
pub mod fonts;
pub mod notification;
pub mod panic_handler;
pub mod settings;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use dvi::{DviDocument, DviError, DviSession, RenderedPage};
pub use fonts::FontPool;
