//! Bit-vector operation errors.
//!
//! Fallible façade operations validate their inputs once at entry and
//! return one of these kinds; internal helpers assume pre-validated inputs.

use core::fmt;

/// Result alias used by the fallible façade operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Errors that can occur on bit-vector operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A bit index at or beyond the addressable space.
    IndexOutOfRange {
        /// The offending index
        index: u64,
        /// Exclusive upper bound of the index space
        max: u64,
    },

    /// A range with reversed endpoints (`right < left`).
    ReversedRange {
        /// Left (inclusive) endpoint as given
        left: u64,
        /// Right (inclusive) endpoint as given
        right: u64,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::IndexOutOfRange { index, max } => {
                write!(f, "bit index {} out of range (max {})", index, max)
            }
            Error::ReversedRange { left, right } => {
                write!(f, "reversed range endpoints: left {} > right {}", left, right)
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}
