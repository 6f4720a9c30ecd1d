//! Typed database-writer errors, mapped onto the CLI's exit-code taxonomy.

use std::path::PathBuf;

use hpa_core::error::ErrorKind as CoreErrorKind;

/// Errors raised while writing or reading the sparse database files.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// An I/O operation on a database file failed.
    #[error("I/O error writing {path}: {source}")]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// A file's magic tag or major version did not match what this writer
    /// produces.
    #[error("unrecognized format in {path}: expected magic {expected:?}, found {found:?}")]
    BadMagic {
        /// File that failed to parse.
        path: PathBuf,
        /// Expected 14-byte magic tag.
        expected: [u8; 14],
        /// Magic tag actually read.
        found: [u8; 14],
    },

    /// A file's footer tag did not match, indicating a truncated or
    /// corrupted write.
    #[error("missing or corrupt footer in {path}")]
    BadFooter {
        /// File that failed to parse.
        path: PathBuf,
    },

    /// A minor version newer than this writer understands and not
    /// forward-compatible.
    #[error("unsupported minor version {minor} in {path}")]
    UnsupportedVersion {
        /// File that failed to parse.
        path: PathBuf,
        /// Minor version read from the file.
        minor: u8,
    },
}

impl Error {
    /// Maps this error to the severity taxonomy used for exit-code
    /// translation at the CLI boundary.
    #[must_use]
    pub fn kind(&self) -> CoreErrorKind {
        match self {
            Error::Io { .. } => CoreErrorKind::SinkIo,
            Error::BadMagic { .. } | Error::BadFooter { .. } | Error::UnsupportedVersion { .. } => {
                CoreErrorKind::SourceFormat
            }
        }
    }
}

pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Error {
    Error::Io {
        path: path.into(),
        source,
    }
}
