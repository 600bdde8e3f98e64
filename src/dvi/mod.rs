//! DVI documents: parsing, interpretation and page rendering

pub mod cache;
pub mod cursor;
pub mod document;
pub mod error;
pub mod interpreter;
pub mod opcodes;
pub mod page;
pub mod prescan;
pub mod render_target;
pub mod session;
pub mod special;
pub mod state;

pub use document::DviDocument;
pub use error::DviError;
pub use page::RenderedPage;
pub use session::DviSession;
