//! Font and font-location errors

use std::path::PathBuf;

use crate::dvi::cursor::EndOfData;

/// Errors from reading or rasterizing font files
#[derive(Debug, thiserror::Error)]
pub enum FontError {
    #[error("cannot read font file {path}: {source}")]
    FileUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot recognize format of font file {0}")]
    FormatUnrecognized(PathBuf),

    #[error("invalid table in {file}: {detail}")]
    InvalidTable { file: String, detail: String },

    #[error("bad PK file {file}: {detail}")]
    PkDecode { file: String, detail: String },

    #[error("outline font {file}: {detail}")]
    Outline { file: String, detail: String },

    #[error("no backend available for {0}")]
    BackendUnavailable(String),

    #[error("checksum mismatch in {file} (document {expected:#x}, file {found:#x})")]
    ChecksumMismatch {
        file: String,
        expected: u32,
        found: u32,
    },

    #[error("truncated font data: {0}")]
    Truncated(#[from] EndOfData),
}

impl FontError {
    pub fn invalid_table(file: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::InvalidTable {
            file: file.into(),
            detail: detail.into(),
        }
    }

    pub fn pk(file: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::PkDecode {
            file: file.into(),
            detail: detail.into(),
        }
    }

    pub fn outline(file: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Outline {
            file: file.into(),
            detail: detail.into(),
        }
    }
}

/// Errors from the external font-location process
#[derive(Debug, thiserror::Error)]
pub enum LocateError {
    #[error("could not launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("a font location request is already in flight")]
    Busy,

    #[error("font location timed out after {0} s")]
    Timeout(u64),

    #[error("font location was cancelled")]
    Cancelled,

    #[error("{program} terminated abnormally")]
    AbnormalExit { program: String },
}
