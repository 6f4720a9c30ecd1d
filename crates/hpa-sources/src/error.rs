//! Errors raised while parsing a source's on-disk input, mapped onto
//! [`hpa_core::Error`] at the `Source::run` boundary.

use std::path::PathBuf;

use thiserror::Error;

/// A source-local parse or I/O failure.
#[derive(Error, Debug)]
pub enum Error {
    /// The path did not exist or could not be opened.
    #[error("{path}: {source}")]
    Io {
        /// The offending path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file's contents did not match the expected wire format.
    #[error("{path}: malformed input ({reason})")]
    Malformed {
        /// The offending path.
        path: PathBuf,
        /// What was wrong.
        reason: String,
    },

    /// A raw record referenced a metric index the metric table did not
    /// define.
    #[error("{path}: value referenced unknown metric index {index}")]
    UnknownMetric {
        /// The offending path.
        path: PathBuf,
        /// The out-of-range metric index.
        index: u32,
    },

    /// An error propagated from `hpa_core` while replaying events into the
    /// pipeline (e.g. an empty reconstruction on finalize).
    #[error(transparent)]
    Core(#[from] hpa_core::Error),

    /// An error propagated from `hpa_db` while re-reading a `profile.db`
    /// predecessor (the `merge` source).
    #[error(transparent)]
    Db(#[from] hpa_db::Error),
}

impl Error {
    /// Maps this error onto the `hpa_core::Error` variant `Source::run`
    /// must return. A propagated [`hpa_core::Error`] passes through
    /// unchanged so its severity classification is preserved; everything
    /// else (I/O, malformed input, an unreadable `profile.db`
    /// predecessor) is a source-format failure.
    #[must_use]
    pub fn into_core(self) -> hpa_core::Error {
        match self {
            Error::Core(e) => e,
            other => hpa_core::Error::SourceRead { message: other.to_string() },
        }
    }
}

pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Error {
    Error::Io {
        path: path.to_path_buf(),
        source,
    }
}
