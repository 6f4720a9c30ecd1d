//! Typed pipeline-driver errors, mapped onto the CLI's exit-code taxonomy.

use hpa_core::error::ErrorKind as CoreErrorKind;

/// Errors raised while registering nodes or driving the pipeline.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// More than 65,535 sources or sinks were registered.
    #[error("too many nodes registered (limit is 65,535)")]
    TooManyNodes,

    /// A node name collided with an already-registered node.
    #[error("a node named '{name}' is already registered")]
    DuplicateNode {
        /// The colliding name.
        name: String,
    },

    /// A sink demanded a [`crate::dataclass::Class`] no registered source
    /// can ever provide.
    #[error("unmet demand: no source provides {unmet}")]
    UnmetDemand {
        /// The unmet classes, rendered for display.
        unmet: String,
    },

    /// A source failed; matches the `SourceFormat` severity.
    #[error("source '{source_name}' failed: {error}")]
    SourceFailed {
        /// Name of the failing source.
        source_name: String,
        /// Underlying failure.
        #[source]
        error: hpa_core::Error,
    },

    /// A sink's `write` failed; matches the `SinkIO` severity.
    #[error("sink '{sink_name}' failed: {message}")]
    SinkFailed {
        /// Name of the failing sink.
        sink_name: String,
        /// Human-readable detail (I/O errors are wrapped here rather than
        /// as a `#[source]` to keep this crate free of a direct `std::io`
        /// dependency on the error type).
        message: String,
    },

    /// An invariant the pipeline driver itself is responsible for was
    /// violated; matches the `Invariant` severity.
    #[error("pipeline invariant violated: {0}")]
    Invariant(String),

    /// A sink waited longer than the configured wavefront timeout for its
    /// demanded classes to fire; matches the `Invariant` severity.
    #[error("sink '{sink_name}' stalled waiting on a wavefront for {timeout:?}")]
    WavefrontStalled {
        /// Name of the blocked sink.
        sink_name: String,
        /// The timeout that elapsed.
        timeout: std::time::Duration,
    },
}

impl Error {
    /// Maps this error to the severity taxonomy used for exit-code
    /// translation at the CLI boundary.
    #[must_use]
    pub fn kind(&self) -> CoreErrorKind {
        match self {
            Error::TooManyNodes | Error::Invariant(_) | Error::WavefrontStalled { .. } => CoreErrorKind::Invariant,
            Error::DuplicateNode { .. } | Error::UnmetDemand { .. } => CoreErrorKind::SourceFormat,
            Error::SourceFailed { error, .. } => error.kind(),
            Error::SinkFailed { .. } => CoreErrorKind::SinkIo,
        }
    }
}
