//! The collective-communication surface every deployment mode runs
//! against.
//!
//! `Serial` runs use [`crate::LocalTransport`], a single-rank stand-in that
//! never leaves the process; `Parallel` runs use the `mpi`-feature-gated
//! backend over `MPI_COMM_WORLD`. Both implement the same [`Transport`]
//! trait, so the aggregation core is written once against the trait.

use crate::error::Error;

/// Largest element count a single underlying send/receive call may carry.
/// MPI counts are a 32-bit `int`; a transport splits any larger buffer into
/// chunks of at most this many elements.
pub const MAX_SEGMENT: usize = i32::MAX as usize;

/// A reduction combined pointwise over matching elements across ranks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// Elementwise sum.
    Sum,
    /// Elementwise minimum.
    Min,
    /// Elementwise maximum.
    Max,
}

/// An element type a [`Transport`] can move and combine.
///
/// Implemented for the handful of primitive types the aggregation core
/// actually ships across ranks: accumulated metric values (`f64`) and
/// thread/context identifiers (`u32`/`u64`/`i64`). When the `mpi` feature
/// is enabled this also requires [`mpi::traits::Equivalence`], which every
/// implementor below already derives from the MPI library's built-in
/// datatypes.
#[cfg(not(feature = "mpi"))]
pub trait Reducible: Copy + Send + Sync + 'static {
    /// Combines `a` and `b` under `op`.
    fn combine(op: Op, a: Self, b: Self) -> Self;
    /// The identity element for `op` (e.g. `0` for [`Op::Sum`]).
    fn identity(op: Op) -> Self;
}

/// See the non-`mpi` definition above; this one additionally requires
/// [`mpi::traits::Equivalence`] so the feature-gated backend can hand
/// buffers of `Self` directly to the MPI library.
#[cfg(feature = "mpi")]
pub trait Reducible: Copy + Send + Sync + 'static + mpi::traits::Equivalence {
    /// Combines `a` and `b` under `op`.
    fn combine(op: Op, a: Self, b: Self) -> Self;
    /// The identity element for `op` (e.g. `0` for [`Op::Sum`]).
    fn identity(op: Op) -> Self;
}

macro_rules! impl_reducible_float {
    ($ty:ty) => {
        impl Reducible for $ty {
            fn combine(op: Op, a: Self, b: Self) -> Self {
                match op {
                    Op::Sum => a + b,
                    Op::Min => a.min(b),
                    Op::Max => a.max(b),
                }
            }
            fn identity(op: Op) -> Self {
                match op {
                    Op::Sum => 0.0,
                    Op::Min => <$ty>::INFINITY,
                    Op::Max => <$ty>::NEG_INFINITY,
                }
            }
        }
    };
}

macro_rules! impl_reducible_int {
    ($ty:ty) => {
        impl Reducible for $ty {
            fn combine(op: Op, a: Self, b: Self) -> Self {
                match op {
                    Op::Sum => a.wrapping_add(b),
                    Op::Min => a.min(b),
                    Op::Max => a.max(b),
                }
            }
            fn identity(op: Op) -> Self {
                match op {
                    Op::Sum => 0,
                    Op::Min => <$ty>::MAX,
                    Op::Max => <$ty>::MIN,
                }
            }
        }
    };
}

impl_reducible_float!(f64);
impl_reducible_int!(u64);
impl_reducible_int!(i64);
impl_reducible_int!(u32);

/// Splits `len` elements into `(offset, count)` chunks of at most
/// [`MAX_SEGMENT`] each. Backends loop over these rather than issuing one
/// call for the whole buffer, since MPI counts are bound by `int`.
#[must_use]
pub fn segments(len: usize) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    let mut off = 0;
    while off < len {
        let count = (len - off).min(MAX_SEGMENT);
        out.push((off, count));
        off += count;
    }
    out
}

/// A rank's view of the collective-communication world.
///
/// Every data-moving method is generic over [`Reducible`] rather than
/// `dyn`-safe; callers are themselves generic over `Tr: Transport`, or go
/// through [`crate::AnyTransport`] when the concrete backend is chosen at
/// runtime.
pub trait Transport {
    /// This process's rank, `0..size()`.
    fn rank(&self) -> usize;
    /// Total number of ranks in the world.
    fn size(&self) -> usize;
    /// Whether this process is `root`.
    fn is_root(&self, root: usize) -> bool {
        self.rank() == root
    }

    /// Blocks until every rank has called `barrier`.
    ///
    /// # Errors
    /// Returns [`Error::Failed`] if the underlying transport call fails.
    fn barrier(&self) -> Result<(), Error>;

    /// Broadcasts `data` from `root` to every rank, in place.
    ///
    /// # Errors
    /// [`Error::RankOutOfRange`] if `root` is invalid, otherwise
    /// [`Error::Failed`].
    fn bcast<T: Reducible>(&self, data: &mut [T], root: usize) -> Result<(), Error>;

    /// Combines `data` across ranks under `op`, placing the result at
    /// `root` only.
    ///
    /// # Errors
    /// [`Error::RankOutOfRange`] if `root` is invalid, otherwise
    /// [`Error::Failed`].
    fn reduce<T: Reducible>(&self, data: &[T], root: usize, op: Op) -> Result<Option<Vec<T>>, Error>;

    /// Combines `data` across ranks under `op`, placing the result at
    /// every rank.
    ///
    /// # Errors
    /// Returns [`Error::Failed`] if the underlying transport call fails.
    fn allreduce<T: Reducible>(&self, data: &[T], op: Op) -> Result<Vec<T>, Error>;

    /// Inclusive prefix combination of `data` under `op`: rank `r` receives
    /// the combination of ranks `0..=r`'s contributions.
    ///
    /// # Errors
    /// Returns [`Error::Failed`] if the underlying transport call fails.
    fn scan<T: Reducible>(&self, data: &[T], op: Op) -> Result<Vec<T>, Error>;

    /// Exclusive prefix combination of `data` under `op`: rank `r` receives
    /// the combination of ranks `0..r`'s contributions (rank 0 receives
    /// `T::identity(op)`).
    ///
    /// # Errors
    /// Returns [`Error::Failed`] if the underlying transport call fails.
    fn exscan<T: Reducible>(&self, data: &[T], op: Op) -> Result<Vec<T>, Error>;

    /// Collects every rank's `send` buffer at `root`, in rank order.
    /// `None` at non-root ranks.
    ///
    /// # Errors
    /// [`Error::RankOutOfRange`] if `root` is invalid, otherwise
    /// [`Error::Failed`].
    fn gather<T: Reducible>(&self, send: &[T], root: usize) -> Result<Option<Vec<T>>, Error>;

    /// Variable-length [`Self::gather`]: `counts[i]` is the element count
    /// rank `i` contributes. `counts` must have `size()` entries and is
    /// only consulted at `root`.
    ///
    /// # Errors
    /// [`Error::RankOutOfRange`] if `root` is invalid,
    /// [`Error::Malformed`] if `counts` has the wrong length, otherwise
    /// [`Error::Failed`].
    fn gatherv<T: Reducible>(&self, send: &[T], counts: &[usize], root: usize) -> Result<Option<Vec<T>>, Error>;

    /// Splits `send` (required at `root`, ignored elsewhere) into
    /// `size()` equal chunks of `count` elements and distributes one to
    /// each rank.
    ///
    /// # Errors
    /// [`Error::RankOutOfRange`] if `root` is invalid,
    /// [`Error::Malformed`] if `root` did not supply `send`, otherwise
    /// [`Error::Failed`].
    fn scatter<T: Reducible>(&self, send: Option<&[T]>, count: usize, root: usize) -> Result<Vec<T>, Error>;

    /// Variable-length [`Self::scatter`]: `counts[i]` is the element count
    /// rank `i` receives.
    ///
    /// # Errors
    /// [`Error::RankOutOfRange`] if `root` is invalid,
    /// [`Error::Malformed`] if `counts` has the wrong length or `root` did
    /// not supply `send`, otherwise [`Error::Failed`].
    fn scatterv<T: Reducible>(&self, send: Option<&[T]>, counts: &[usize], root: usize) -> Result<Vec<T>, Error>;

    /// Point-to-point send of `data` to `dst`, tagged `tag`.
    ///
    /// # Errors
    /// [`Error::RankOutOfRange`] if `dst` is invalid, otherwise
    /// [`Error::Failed`].
    fn send<T: Reducible>(&self, data: &[T], tag: u32, dst: usize) -> Result<(), Error>;

    /// Point-to-point receive of `count` elements from `src`, tagged
    /// `tag`.
    ///
    /// # Errors
    /// [`Error::RankOutOfRange`] if `src` is invalid, otherwise
    /// [`Error::Failed`].
    fn recv<T: Reducible>(&self, count: usize, tag: u32, src: usize) -> Result<Vec<T>, Error>;

    /// Server-style receive: blocks for a message tagged `tag` from any
    /// rank, filling `buf` and returning the sender's rank. A zero-length
    /// message on `tag` from this rank's own [`Self::cancel_server`] call
    /// ends the server loop, returning `Ok(None)` instead.
    ///
    /// # Errors
    /// Returns [`Error::Failed`] if the underlying transport call fails.
    fn recv_server<T: Reducible>(&self, buf: &mut [T], tag: u32) -> Result<Option<usize>, Error>;

    /// Sends the zero-length cancellation message [`Self::recv_server`]
    /// recognizes, addressed to this rank's own server loop.
    ///
    /// # Errors
    /// Returns [`Error::Failed`] if the underlying transport call fails.
    fn cancel_server(&self, tag: u32) -> Result<(), Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_buffer_has_no_segments() {
        assert_eq!(segments(0), Vec::new());
    }

    #[test]
    fn buffer_under_the_limit_is_one_segment() {
        assert_eq!(segments(5), vec![(0, 5)]);
    }

    #[test]
    fn buffer_exactly_at_the_limit_is_one_segment() {
        assert_eq!(segments(MAX_SEGMENT), vec![(0, MAX_SEGMENT)]);
    }

    #[test]
    fn buffer_over_the_limit_splits_at_the_boundary() {
        assert_eq!(segments(MAX_SEGMENT + 5), vec![(0, MAX_SEGMENT), (MAX_SEGMENT, 5)]);
    }

    #[test]
    fn buffer_several_limits_over_splits_into_that_many_segments() {
        let segs = segments(MAX_SEGMENT * 2);
        assert_eq!(segs, vec![(0, MAX_SEGMENT), (MAX_SEGMENT, MAX_SEGMENT)]);
    }
}
