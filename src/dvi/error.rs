use std::path::PathBuf;

use crate::dvi::cursor::EndOfData;
use crate::fonts::error::FontError;

#[derive(Debug, thiserror::Error)]
pub enum DviError {
    #[error("malformed DVI file: {0}")]
    MalformedDocument(String),

    #[error("unknown opcode {opcode} at offset {offset}")]
    UnknownOpcode { opcode: u8, offset: usize },

    #[error("stack imbalance: {0}")]
    StackImbalance(String),

    /// PRE, POST or POST_POST inside a page body
    #[error("command {opcode} is illegal inside a page (offset {offset})")]
    IllegalCommand { opcode: u8, offset: usize },

    #[error("font number {0} was not defined")]
    FontNotDefined(u32),

    #[error("character set before any font was selected")]
    NoFontSelected,

    #[error("virtual fonts nested deeper than {0} levels")]
    RecursionLimitExceeded(u32),

    #[error("unexpected end of DVI data: {0}")]
    UnexpectedEnd(#[from] EndOfData),

    #[error("page {page} out of range, document has {total} pages")]
    PageOutOfRange { page: usize, total: usize },

    #[error("no document loaded")]
    NoDocument,

    #[error("document is unusable until reloaded: {0}")]
    DocumentUnusable(String),

    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Font(#[from] FontError),
}

impl DviError {
    pub fn malformed(detail: impl Into<String>) -> Self {
        Self::MalformedDocument(detail.into())
    }

    /// Errors that poison the document until it is reloaded
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::IllegalCommand { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dvi::opcodes::POST;

    #[test]
    fn only_illegal_commands_are_fatal() {
        assert!(DviError::IllegalCommand { opcode: POST, offset: 10 }.is_fatal());
        assert!(!DviError::StackImbalance("pop".into()).is_fatal());
        assert!(!DviError::FontNotDefined(3).is_fatal());
    }
}
