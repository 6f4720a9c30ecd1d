//! Typed errors raised by the calling-context tree, metric, and accumulation model.
//!
//! Mirrors the error-kind taxonomy of the profile-aggregation design: every
//! variant maps to one of the severities named there, and in turn to the
//! exit code the CLI surfaces to the operator.

use crate::id_tuple::ThreadId;
use crate::ContextId;

/// Severity classification for a [`Error`], used to decide whether the
/// pipeline driver can continue past it or must abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A single sample referenced something unknown; the sample is dropped
    /// and the run continues.
    Skippable,
    /// A raw input stream is malformed; the offending source fails, others
    /// continue.
    SourceFormat,
    /// Disk I/O failed while reading or writing a file.
    SinkIo,
    /// An internal invariant was violated; the process must abort.
    Invariant,
    /// The transport layer reported an unrecoverable failure.
    TransportFatal,
}

impl ErrorKind {
    /// Process exit code associated with this severity, per the CLI surface.
    #[must_use]
    pub const fn exit_code(self) -> i32 {
        match self {
            ErrorKind::Skippable => 0,
            ErrorKind::SourceFormat => 1,
            ErrorKind::SinkIo => 2,
            ErrorKind::Invariant | ErrorKind::TransportFatal => 3,
        }
    }
}

/// Errors raised while building or finalizing the calling-context tree and
/// its metric accumulators.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A sample referenced a load module that was never registered.
    #[error("sample referenced unknown load module {module_id}")]
    UnknownLoadModule {
        /// The offending module id.
        module_id: u32,
    },

    /// Two contexts were assigned the same identifier with different scopes;
    /// this can only happen if finalization runs twice or is called out of
    /// order.
    #[error("context {context:?} was assigned identifier {id} twice with differing scopes")]
    DuplicateContextIdentifier {
        /// The context whose identity collided.
        context: ContextId,
        /// The identifier that was assigned twice.
        id: u32,
    },

    /// A metric was referenced after being frozen by a prior statistic or
    /// partial request, or with a name that does not match the existing
    /// registration.
    #[error("metric '{name}' is frozen and cannot accept new statistics")]
    MetricFrozen {
        /// Name of the metric.
        name: String,
    },

    /// `notify_thread_final` observed a reconstruction whose final-context
    /// vector was empty for a nonzero point value; redistribution cannot
    /// proceed.
    #[error("thread {thread:?} has a reconstruction with zero final contexts")]
    EmptyReconstruction {
        /// The thread under finalization.
        thread: ThreadId,
    },

    /// The per-thread finalization routine was invoked a second time for
    /// the same thread with accumulator state indicating corruption
    /// (defensive check; normal double-calls are idempotent no-ops).
    #[error("per-thread finalize for {thread:?} observed inconsistent accumulator state")]
    FinalizeInvariant {
        /// The thread under finalization.
        thread: ThreadId,
    },

    /// A sink failed to write its output. The message is pre-rendered
    /// rather than wrapped as a `#[source]` so this crate stays free of a
    /// dependency on any particular sink's error type.
    #[error("sink write failed: {message}")]
    SinkWrite {
        /// Human-readable detail from the underlying sink error.
        message: String,
    },

    /// A distributed source could not complete a collective-communication
    /// call. As with [`Error::SinkWrite`], the message is pre-rendered to
    /// avoid a dependency on the transport crate's error type.
    #[error("transport call failed: {message}")]
    Transport {
        /// Human-readable detail from the underlying transport error.
        message: String,
    },

    /// A source's raw input was malformed or unreadable. Pre-rendered for
    /// the same reason as [`Error::SinkWrite`]: this crate stays free of a
    /// dependency on any particular source's error type.
    #[error("source read failed: {message}")]
    SourceRead {
        /// Human-readable detail from the underlying source error.
        message: String,
    },
}

impl Error {
    /// The severity this error maps to.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Error::UnknownLoadModule { .. } => ErrorKind::Skippable,
            Error::MetricFrozen { .. } => ErrorKind::SourceFormat,
            Error::DuplicateContextIdentifier { .. }
            | Error::EmptyReconstruction { .. }
            | Error::FinalizeInvariant { .. } => ErrorKind::Invariant,
            Error::SinkWrite { .. } => ErrorKind::SinkIo,
            Error::Transport { .. } => ErrorKind::TransportFatal,
            Error::SourceRead { .. } => ErrorKind::SourceFormat,
        }
    }
}
