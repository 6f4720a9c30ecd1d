//! `DataClass`: the wavefront bitset sources declare as provided/required
//! and sinks declare as accepted/demanded.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// One wavefront class. Declaration order here is also registration order
/// for deterministic wake-up within a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Class {
    /// Profile-level attributes (job id, environment, time base).
    Attributes = 0,
    /// Load module / file / function references.
    References = 1,
    /// Calling-context tree nodes.
    Contexts = 2,
    /// Thread registrations.
    Threads = 3,
    /// Metric registrations and their accumulated values.
    Metrics = 4,
    /// Sample-instant timepoints.
    Timepoints = 5,
    /// Timepoints that additionally carry a finalized context id.
    CtxTimepoints = 6,
}

/// Total number of [`Class`] variants.
pub const CLASS_COUNT: usize = 7;

impl Class {
    /// All classes, in registration order.
    pub const ALL: [Class; CLASS_COUNT] = [
        Class::Attributes,
        Class::References,
        Class::Contexts,
        Class::Threads,
        Class::Metrics,
        Class::Timepoints,
        Class::CtxTimepoints,
    ];

    const fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

/// A bitset over [`Class`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DataClass(u8);

impl DataClass {
    /// The empty set.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// A singleton set containing `class`.
    #[must_use]
    pub const fn of(class: Class) -> Self {
        Self(class.bit())
    }

    /// Builds a set from an iterator of classes.
    #[must_use]
    pub fn from_iter(classes: impl IntoIterator<Item = Class>) -> Self {
        classes.into_iter().fold(Self::empty(), |acc, c| acc | Self::of(c))
    }

    /// Whether `class` is a member.
    #[must_use]
    pub const fn contains(self, class: Class) -> bool {
        self.0 & class.bit() != 0
    }

    /// Whether this set shares no members with `other`.
    #[must_use]
    pub const fn is_disjoint(self, other: Self) -> bool {
        self.0 & other.0 == 0
    }

    /// Classes this set demands that `provided` does not supply.
    #[must_use]
    pub fn unmet(self, provided: Self) -> Self {
        Self(self.0 & !provided.0)
    }

    /// Whether the set has no members.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterates the member classes, in [`Class::ALL`] order.
    pub fn iter(self) -> impl Iterator<Item = Class> {
        Class::ALL.into_iter().filter(move |&c| self.contains(c))
    }
}

impl BitOr for DataClass {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for DataClass {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for DataClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, c) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{c:?}")?;
        }
        write!(f, "}}")
    }
}
