//! Core identifier types for Grove.
//!
//! These types provide type-safe wrappers around numeric identifiers,
//! preventing accidental misuse of different ID kinds.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Object identifier - process-independent identity of a persistent object.
///
/// OIDs are assigned by the log at first commit and never change for
/// the lifetime of a database. The root object always carries `Oid::ROOT`.
///
/// # Example
///
/// ```rust
/// use grove_common::Oid;
///
/// let oid = Oid::new(42);
/// assert_eq!(oid.as_u64(), 42);
/// assert_eq!(Oid::ROOT.as_u64(), 0);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Oid(u64);

impl Oid {
    /// The root object's identifier.
    pub const ROOT: Self = Self(0);

    /// Invalid OID, used as a sentinel value.
    pub const INVALID: Self = Self(u64::MAX);

    /// Creates a new `Oid` from a raw u64 value.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw u64 value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next OID.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Checks if this is a valid OID.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }

    /// Checks if this is the root OID.
    #[inline]
    #[must_use]
    pub const fn is_root(self) -> bool {
        self.0 == Self::ROOT.0
    }
}

impl fmt::Debug for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "Oid(INVALID)")
        } else {
            write!(f, "Oid({})", self.0)
        }
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Oid {
    #[inline]
    fn from(id: u64) -> Self {
        Self::new(id)
    }
}

impl From<Oid> for u64 {
    #[inline]
    fn from(id: Oid) -> Self {
        id.0
    }
}

/// Per-object version counter.
///
/// A serial is bumped on every successful commit that modifies the
/// object; the pair `(Oid, Serial)` uniquely identifies an object
/// version. Grove assigns the committing transaction's [`TxId`] as the
/// new serial, which keeps serials strictly increasing per object.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Serial(u64);

impl Serial {
    /// Serial of an object that has never been committed.
    pub const NONE: Self = Self(0);

    /// Creates a new `Serial` from a raw u64 value.
    #[inline]
    #[must_use]
    pub const fn new(serial: u64) -> Self {
        Self(serial)
    }

    /// Returns the raw u64 value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Checks if this serial belongs to a committed version.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != Self::NONE.0
    }
}

impl fmt::Debug for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::NONE {
            write!(f, "Serial(NONE)")
        } else {
            write!(f, "Serial({})", self.0)
        }
    }
}

impl fmt::Display for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<TxId> for Serial {
    #[inline]
    fn from(txid: TxId) -> Self {
        Self(txid.as_u64())
    }
}

/// File-level transaction identifier.
///
/// TxIds are monotonically increasing and equal the transaction's
/// position in commit order. An empty log has an implicit `TxId::ZERO`
/// at offset zero; the first recorded transaction is `TxId(1)`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct TxId(u64);

impl TxId {
    /// The implicit transaction id of an empty log.
    pub const ZERO: Self = Self(0);

    /// First recorded transaction id.
    pub const FIRST: Self = Self(1);

    /// Creates a new `TxId` from a raw u64 value.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw u64 value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next transaction id.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Checks if this is a recorded (non-implicit) transaction id.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != Self::ZERO.0
    }
}

impl fmt::Debug for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxId({})", self.0)
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for TxId {
    #[inline]
    fn from(id: u64) -> Self {
        Self::new(id)
    }
}

impl From<TxId> for u64 {
    #[inline]
    fn from(id: TxId) -> Self {
        id.0
    }
}
