//! Error types for `mlib-mem`.
//!
//! Every fallible operation in this crate returns [`Result<T>`]. Errors are
//! reported to the immediate caller and never retried internally.

use std::fmt;
use std::ptr::NonNull;

/// Errors that can occur in list, chunk and dynamic array operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A parameter was zero, out of range, or a handle from another list.
    InvalidArgument {
        /// Which argument was rejected and why.
        reason: &'static str,
    },

    /// The memory interface could not provide a chunk block.
    OutOfMemory {
        /// Size of the block that was requested, in bytes.
        size: usize,
    },

    /// A capacity ceiling was reached.
    LimitExceeded {
        /// The ceiling that would have been crossed.
        limit: usize,
    },

    /// `alloc_at` targeted a slot that is already in use.
    ///
    /// The slot is left untouched; `entry` points at its existing payload so
    /// the caller can inspect it.
    AlreadyAllocated {
        /// Index of the occupied slot.
        idx: usize,
        /// Payload address of the occupied slot.
        entry: NonNull<u8>,
    },

    /// No used entry matched the lookup.
    NoSuchEntry {
        /// The index looked up, when the lookup was by index.
        idx: Option<usize>,
    },
}

impl Error {
    pub(crate) const fn invalid(reason: &'static str) -> Self {
        Error::InvalidArgument { reason }
    }

    pub(crate) const fn no_entry(idx: usize) -> Self {
        Error::NoSuchEntry { idx: Some(idx) }
    }

    /// Payload pointer carried by [`Error::AlreadyAllocated`].
    pub fn entry(&self) -> Option<NonNull<u8>> {
        match self {
            Error::AlreadyAllocated { entry, .. } => Some(*entry),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidArgument { reason } => {
                write!(f, "Invalid argument: {reason}")
            }
            Error::OutOfMemory { size } => {
                write!(f, "Out of memory: failed to allocate {size} bytes")
            }
            Error::LimitExceeded { limit } => {
                write!(f, "Limit exceeded: at most {limit} entries")
            }
            Error::AlreadyAllocated { idx, .. } => {
                write!(f, "Entry {idx} is already allocated")
            }
            Error::NoSuchEntry { idx: Some(idx) } => {
                write!(f, "No such entry: {idx}")
            }
            Error::NoSuchEntry { idx: None } => write!(f, "No matching entry"),
        }
    }
}

impl std::error::Error for Error {}

// SAFETY: `entry` is reported as an address only; the error never reads or
// writes through it.
unsafe impl Send for Error {}
unsafe impl Sync for Error {}

/// Result type for `mlib-mem` operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            Error::invalid("chunk_size must be non-zero").to_string(),
            "Invalid argument: chunk_size must be non-zero"
        );
        assert_eq!(
            Error::OutOfMemory { size: 96 }.to_string(),
            "Out of memory: failed to allocate 96 bytes"
        );
        assert_eq!(
            Error::LimitExceeded { limit: 5 }.to_string(),
            "Limit exceeded: at most 5 entries"
        );
        assert_eq!(Error::no_entry(7).to_string(), "No such entry: 7");
        assert_eq!(
            Error::NoSuchEntry { idx: None }.to_string(),
            "No matching entry"
        );
    }

    #[test]
    fn test_already_allocated_carries_entry() {
        let mut byte = 0u8;
        let entry = NonNull::from(&mut byte);
        let err = Error::AlreadyAllocated { idx: 3, entry };

        assert_eq!(err.entry(), Some(entry));
        assert_eq!(err.to_string(), "Entry 3 is already allocated");
        assert_eq!(Error::no_entry(3).entry(), None);
    }
}
