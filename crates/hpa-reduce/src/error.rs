//! Errors a [`crate::Transport`] can raise.

use thiserror::Error;

/// A collective-communication failure.
#[derive(Error, Debug)]
pub enum Error {
    /// The underlying transport reported a failure that leaves the ranks
    /// out of sync; the run cannot continue.
    #[error("transport operation failed: {message}")]
    Failed {
        /// Detail from the underlying transport.
        message: String,
    },

    /// A `root`/`dst`/`src` argument named a rank outside `0..size`.
    #[error("rank {rank} is out of range for a {size}-rank world")]
    RankOutOfRange {
        /// The offending rank argument.
        rank: usize,
        /// The world's size.
        size: usize,
    },

    /// A `scatter`/`scatterv`/`gatherv` call's `counts` length did not
    /// match the world size, or a non-root caller supplied `send` data.
    #[error("malformed collective call: {reason}")]
    Malformed {
        /// What was wrong with the call.
        reason: String,
    },
}
