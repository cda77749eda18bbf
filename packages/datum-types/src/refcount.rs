//! Read/write reference counts.

use serde::{Deserialize, Serialize};

/// A pair of read and write reference counts.
///
/// Used both as the absolute counts held by a datum (never negative) and as a
/// signed delta applied to them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RefCounts {
    /// Readers that may still read the datum.
    pub read: i32,
    /// Writers that may still write to the datum or add children.
    pub write: i32,
}

impl RefCounts {
    /// No change / no counts.
    pub const ZERO: RefCounts = RefCounts { read: 0, write: 0 };

    /// One read refcount.
    pub const READ: RefCounts = RefCounts { read: 1, write: 0 };

    /// One write refcount.
    pub const WRITE: RefCounts = RefCounts { read: 0, write: 1 };

    /// Create a pair.
    pub const fn new(read: i32, write: i32) -> Self {
        Self { read, write }
    }

    /// Both dimensions are zero.
    pub fn is_zero(&self) -> bool {
        self.read == 0 && self.write == 0
    }

    /// Either dimension is negative.
    pub fn has_negative(&self) -> bool {
        self.read < 0 || self.write < 0
    }

    /// The same counts with the sign flipped.
    pub fn negate(self) -> Self {
        Self::new(-self.read, -self.write)
    }

    /// Per-dimension minimum, floored at zero.
    pub fn min_each(self, other: RefCounts) -> Self {
        Self::new(
            self.read.min(other.read).max(0),
            self.write.min(other.write).max(0),
        )
    }

    /// Per-dimension checked sum.
    pub fn checked_add(self, other: RefCounts) -> Option<Self> {
        Some(Self::new(
            self.read.checked_add(other.read)?,
            self.write.checked_add(other.write)?,
        ))
    }

    /// Which dimensions this pair touches, if any.
    pub fn kind(&self) -> Option<RefcountType> {
        match (self.read != 0, self.write != 0) {
            (true, true) => Some(RefcountType::ReadWrite),
            (true, false) => Some(RefcountType::Read),
            (false, true) => Some(RefcountType::Write),
            (false, false) => None,
        }
    }
}

impl std::ops::Add for RefCounts {
    type Output = RefCounts;

    fn add(self, rhs: RefCounts) -> RefCounts {
        RefCounts::new(self.read + rhs.read, self.write + rhs.write)
    }
}

impl std::ops::Sub for RefCounts {
    type Output = RefCounts;

    fn sub(self, rhs: RefCounts) -> RefCounts {
        RefCounts::new(self.read - rhs.read, self.write - rhs.write)
    }
}

impl std::fmt::Display for RefCounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "r:{} w:{}", self.read, self.write)
    }
}

/// Which refcount dimension(s) an operation touches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RefcountType {
    /// Read refcount only.
    Read,
    /// Write refcount only.
    Write,
    /// Both refcounts.
    ReadWrite,
}

impl RefcountType {
    /// Short name used in log output.
    pub fn as_str(self) -> &'static str {
        match self {
            RefcountType::Read => "read",
            RefcountType::Write => "write",
            RefcountType::ReadWrite => "read+write",
        }
    }
}

impl std::fmt::Display for RefcountType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Properties of a datum at creation time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateProps {
    /// Initial read refcount.
    pub read_refcount: i32,
    /// Initial write refcount.
    pub write_refcount: i32,
    /// Permanent datums ignore refcount changes and are never collected.
    pub permanent: bool,
}

impl Default for CreateProps {
    fn default() -> Self {
        Self {
            read_refcount: 1,
            write_refcount: 1,
            permanent: false,
        }
    }
}

impl CreateProps {
    /// Props with the given initial counts.
    pub fn with_refcounts(read_refcount: i32, write_refcount: i32) -> Self {
        Self {
            read_refcount,
            write_refcount,
            permanent: false,
        }
    }

    /// Mark the datum permanent.
    pub fn permanent(mut self) -> Self {
        self.permanent = true;
        self
    }

    /// The initial counts as a pair.
    pub fn refcounts(&self) -> RefCounts {
        RefCounts::new(self.read_refcount, self.write_refcount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic() {
        let a = RefCounts::new(2, 1);
        assert_eq!(a + RefCounts::READ, RefCounts::new(3, 1));
        assert_eq!(a - RefCounts::WRITE, RefCounts::new(2, 0));
        assert_eq!(a.negate(), RefCounts::new(-2, -1));
        assert!((a - a).is_zero());
    }

    #[test]
    fn min_each_floors_at_zero() {
        let held = RefCounts::READ;
        assert_eq!(held.min_each(RefCounts::new(3, 2)), RefCounts::new(1, 0));
        assert_eq!(held.min_each(RefCounts::new(-1, 0)), RefCounts::ZERO);
    }

    #[test]
    fn kind_names() {
        assert_eq!(RefCounts::new(1, 0).kind(), Some(RefcountType::Read));
        assert_eq!(RefCounts::new(0, -1).kind(), Some(RefcountType::Write));
        assert_eq!(RefCounts::new(1, 1).kind(), Some(RefcountType::ReadWrite));
        assert_eq!(RefCounts::ZERO.kind(), None);
        assert_eq!(RefcountType::ReadWrite.to_string(), "read+write");
    }

    #[test]
    fn checked_add_detects_overflow() {
        assert!(RefCounts::new(i32::MAX, 0).checked_add(RefCounts::READ).is_none());
    }

    #[test]
    fn default_props() {
        let props = CreateProps::default();
        assert_eq!(props.refcounts(), RefCounts::new(1, 1));
        assert!(!props.permanent);
        assert!(CreateProps::with_refcounts(2, 0).permanent().permanent);
    }
}
