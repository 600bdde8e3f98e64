//! Fonts referenced by DVI files and the machinery that finds and loads them

pub mod backend;
pub mod definition;
pub mod error;
pub mod fontmap;
pub mod glyph;
pub mod locator;
#[cfg(feature = "outline")]
pub mod outline;
pub mod pk;
pub mod pool;
pub mod tfm;
pub mod vf;

pub use definition::{FontDefinition, FontId};
pub use error::{FontError, LocateError};
pub use pool::FontPool;
