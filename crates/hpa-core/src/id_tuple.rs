//! Identifier tuples: the global identity key for a [`Thread`](crate::thread::Thread).
//!
//! Ordinal values are pinned to the on-disk measurement format so that
//! identifier tuples sort and serialize identically to the raw measurement
//! streams `hpa-sources` reads.

use std::fmt;

/// The kind of one element of an identifier tuple.
///
/// Ordinal values are load-bearing: they are the on-disk sort key for
/// id-tuple elements and must not be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u16)]
pub enum IdTupleKind {
    /// The synthetic cross-thread summary pseudo-thread.
    Summary = 0,
    /// A cluster node.
    Node = 1,
    /// An MPI rank.
    Rank = 2,
    /// An OS thread.
    Thread = 3,
    /// A GPU device.
    GpuDevice = 4,
    /// A GPU context.
    GpuContext = 5,
    /// A GPU stream.
    GpuStream = 6,
    /// A CPU core.
    Core = 7,
}

impl IdTupleKind {
    /// Round-trips the ordinal values pinned above.
    #[must_use]
    pub const fn ordinal(self) -> u16 {
        self as u16
    }

    /// Recovers a kind from its pinned ordinal, if valid.
    #[must_use]
    pub const fn from_ordinal(ordinal: u16) -> Option<Self> {
        match ordinal {
            0 => Some(Self::Summary),
            1 => Some(Self::Node),
            2 => Some(Self::Rank),
            3 => Some(Self::Thread),
            4 => Some(Self::GpuDevice),
            5 => Some(Self::GpuContext),
            6 => Some(Self::GpuStream),
            7 => Some(Self::Core),
            _ => None,
        }
    }
}

/// One element of an identifier tuple: a `(kind, physical_id, logical_id)`
/// triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IdTupleElement {
    /// The kind of this element.
    pub kind: IdTupleKind,
    /// The physical (hardware) index, e.g. a core number.
    pub physical_index: u64,
    /// The logical index, e.g. an order-of-creation rank.
    pub logical_index: u64,
}

/// An ordered sequence of [`IdTupleElement`]s: the global identity key for a
/// measurement stream (thread, rank, GPU stream, or the synthetic summary
/// thread).
///
/// Two [`ThreadId`]s are equal iff their element sequences are equal
/// (including order), matching the source format's comparison rule.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(smallvec::SmallVec<[IdTupleElement; 4]>);

impl ThreadId {
    /// Builds an identifier tuple from its elements, in the order they
    /// appear on disk.
    #[must_use]
    pub fn new(elements: impl IntoIterator<Item = IdTupleElement>) -> Self {
        Self(elements.into_iter().collect())
    }

    /// The synthetic cross-thread summary tuple `[(Summary, 0, 0)]`.
    #[must_use]
    pub fn summary() -> Self {
        Self::new([IdTupleElement {
            kind: IdTupleKind::Summary,
            physical_index: 0,
            logical_index: 0,
        }])
    }

    /// The tuple's elements, in canonical on-disk order.
    #[must_use]
    pub fn elements(&self) -> &[IdTupleElement] {
        &self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, e) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "({:?},{},{})", e.kind, e.physical_index, e.logical_index)?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordinals_are_pinned() {
        assert_eq!(IdTupleKind::Summary.ordinal(), 0);
        assert_eq!(IdTupleKind::Node.ordinal(), 1);
        assert_eq!(IdTupleKind::Rank.ordinal(), 2);
        assert_eq!(IdTupleKind::Thread.ordinal(), 3);
        assert_eq!(IdTupleKind::GpuDevice.ordinal(), 4);
        assert_eq!(IdTupleKind::GpuContext.ordinal(), 5);
        assert_eq!(IdTupleKind::GpuStream.ordinal(), 6);
        assert_eq!(IdTupleKind::Core.ordinal(), 7);
    }

    #[test]
    fn from_ordinal_round_trips() {
        for k in [
            IdTupleKind::Summary,
            IdTupleKind::Node,
            IdTupleKind::Rank,
            IdTupleKind::Thread,
            IdTupleKind::GpuDevice,
            IdTupleKind::GpuContext,
            IdTupleKind::GpuStream,
            IdTupleKind::Core,
        ] {
            assert_eq!(IdTupleKind::from_ordinal(k.ordinal()), Some(k));
        }
        assert_eq!(IdTupleKind::from_ordinal(8), None);
    }

    #[test]
    fn equality_is_by_full_sequence() {
        let a = ThreadId::new([IdTupleElement {
            kind: IdTupleKind::Rank,
            physical_index: 0,
            logical_index: 0,
        }]);
        let b = ThreadId::new([IdTupleElement {
            kind: IdTupleKind::Rank,
            physical_index: 0,
            logical_index: 0,
        }]);
        let c = ThreadId::new([IdTupleElement {
            kind: IdTupleKind::Rank,
            physical_index: 1,
            logical_index: 0,
        }]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
