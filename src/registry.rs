//! Object registry: `(kind, index)`-packed ids over per-kind static arrays.
//!
//! Every kernel object kind reserves a fixed-size array at build time (see
//! [`crate::cfg`] for the sizes). There is no allocation and no reclamation
//! of array slots outside the one documented exception (temporary timers,
//! see [`crate::timer`]) — external code only ever sees an opaque [`Id`],
//! never a pointer, so a stale id from a destroyed-and-recreated object
//! (which cannot happen here, since nothing but timers is ever destroyed)
//! would still fail [`Id::kind`] validation rather than aliasing live
//! memory of a different kind.

/// Which per-kind array an [`Id`] indexes into.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Task = 0,
    Semaphore = 1,
    Mutex = 2,
    Event = 3,
    Queue = 4,
    Pool = 5,
    Topic = 6,
    Timer = 7,
}

impl Kind {
    const fn from_tag(tag: u32) -> Option<Kind> {
        match tag {
            0 => Some(Kind::Task),
            1 => Some(Kind::Semaphore),
            2 => Some(Kind::Mutex),
            3 => Some(Kind::Event),
            4 => Some(Kind::Queue),
            5 => Some(Kind::Pool),
            6 => Some(Kind::Topic),
            7 => Some(Kind::Timer),
            _ => None,
        }
    }
}

const KIND_SHIFT: u32 = 24;
const INDEX_MASK: u32 = (1 << KIND_SHIFT) - 1;

/// An opaque, `Copy`able handle to a kernel object: a kind tag packed with
/// an array index. `Id::INVALID` is the distinguished sentinel; it never
/// compares equal to an id produced by [`Id::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Id(u32);

impl Id {
    pub const INVALID: Id = Id(u32::MAX);

    #[inline]
    pub const fn new(kind: Kind, index: usize) -> Id {
        debug_assert!(index as u32 <= INDEX_MASK);
        Id(((kind as u32) << KIND_SHIFT) | (index as u32 & INDEX_MASK))
    }

    #[inline]
    pub const fn kind(self) -> Option<Kind> {
        if self.0 == Id::INVALID.0 {
            return None;
        }
        Kind::from_tag(self.0 >> KIND_SHIFT)
    }

    #[inline]
    pub const fn index(self) -> usize {
        (self.0 & INDEX_MASK) as usize
    }

    #[inline]
    pub const fn is_valid(self) -> bool {
        self.0 != Id::INVALID.0
    }

    /// Validates `self` is a live id of exactly `expected`, returning its
    /// index on success. The registry-level half of every primitive's
    /// precondition check (spec "precondition" error category).
    #[inline]
    pub fn checked_index(self, expected: Kind) -> Option<usize> {
        if self.kind()? == expected {
            Some(self.index())
        } else {
            None
        }
    }
}

impl core::fmt::Display for Id {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.kind() {
            Some(k) => write!(f, "{:?}#{}", k, self.index()),
            None => write!(f, "Id::INVALID"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_kind_and_index() {
        let id = Id::new(Kind::Mutex, 7);
        assert_eq!(id.kind(), Some(Kind::Mutex));
        assert_eq!(id.index(), 7);
        assert_eq!(id.checked_index(Kind::Mutex), Some(7));
        assert_eq!(id.checked_index(Kind::Semaphore), None);
    }

    #[test]
    fn invalid_is_distinguished() {
        assert!(!Id::INVALID.is_valid());
        assert_eq!(Id::INVALID.kind(), None);
        assert_ne!(Id::new(Kind::Task, 0), Id::INVALID);
    }
}
