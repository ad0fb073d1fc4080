//! # Bitpress
//!
//! Compressed in-memory bit-vectors for Rust.
//!
//! This crate provides [`BitVector`], a set container over a 48-bit index
//! space that stores bits in 64Kbit blocks. Each block is held in one of four
//! forms: absent (all zero), a full-block sentinel (all one), a verbatim
//! bit-block, or a run-length coded GAP block. Mutations convert between
//! forms adaptively so dense, sparse and striped sets all stay compact.
//!
//! ## Quick Start
//!
//! ```
//! use bitpress::BitVector;
//!
//! let mut bv = BitVector::new();
//! bv.set(10).unwrap();
//! bv.set(65_536).unwrap();
//!
//! assert!(bv.test(10));
//! assert_eq!(bv.count(), 2);
//! assert_eq!(bv.find(11), Some(65_536));
//! ```
//!
//! ## Set algebra
//!
//! ```
//! use bitpress::BitVector;
//!
//! let a = BitVector::from_ids(&[1, 2, 3, 100_000]).unwrap();
//! let b = BitVector::from_ids(&[2, 3, 4]).unwrap();
//!
//! let mut u = a.clone();
//! u.bit_or(&b);
//! assert_eq!(u.count(), 5);
//! ```
//!
//! ## Features
//!
//! Popcount strategies (mutually exclusive, for benchmarking):
//! - Default: Uses Rust's `count_ones()` which auto-vectorizes
//! - `simd` - Use explicit SIMD intrinsics (NEON on ARM, POPCNT on x86)
//! - `portable-popcount` - Use portable bitwise algorithm (no intrinsics)
//!
//! Other features:
//! - `serde` - Enable serialization support for configuration/statistics types
//! - `std` - Standard library support (on by default; disable for no_std)

// Use no_std unless std feature is enabled or we're in test mode
#![cfg_attr(not(any(test, feature = "std")), no_std)]

// When using no_std, we need to explicitly link the alloc crate
#[cfg(not(any(test, feature = "std")))]
extern crate alloc;

// When using std, re-export alloc types from std for compatibility
#[cfg(any(test, feature = "std"))]
extern crate std as alloc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

mod alloc_pool;
mod bitblock;
mod bitvec;
mod block;
mod blocks;
mod enumerator;
mod error;
mod gap;
mod rs_index;
mod stats;
mod xor_scan;

pub use alloc_pool::{BlockPool, PoolGuard};
pub use bitvec::{BitVector, BulkInserter};
pub use enumerator::Enumerator;
pub use error::{Error, Result};
pub use rs_index::RsIndex;
pub use stats::Statistics;
pub use xor_scan::{RefVector, XorMatch, XorScanner, XorSearchResult};

/// Number of bits addressed by one block.
pub const BLOCK_BITS: u64 = 65_536;

/// Number of 32-bit words in a bit-block.
pub const BLOCK_WORDS: usize = (BLOCK_BITS / 32) as usize;

/// Number of block slots per sub-array (one top-level entry).
pub const SUB_ARRAY_SIZE: usize = 256;

/// Bits addressed by one sub-array.
pub const SUB_ARRAY_BITS: u64 = BLOCK_BITS * SUB_ARRAY_SIZE as u64;

/// Exclusive upper bound of the bit index space (48-bit addressing).
pub const ID_MAX: u64 = 1 << 48;

/// Ceiling of the top-level array (`ID_MAX / SUB_ARRAY_BITS`).
pub const TOP_ARRAY_MAX: usize = (ID_MAX / SUB_ARRAY_BITS) as usize;

/// Number of digest waves per block (one digest bit per wave).
pub const BLOCK_WAVES: usize = 64;

/// Number of 32-bit words per digest wave (1024 bits).
pub const DIGEST_WAVE_WORDS: usize = BLOCK_WORDS / BLOCK_WAVES;

/// Number of 32-bit words per enumerator scan wave (128 bits).
pub const SCAN_WAVE_WORDS: usize = 4;

/// Bits per enumerator scan wave.
pub const SCAN_WAVE_BITS: usize = SCAN_WAVE_WORDS * 32;

/// First intra-block border of the rank-select index (quarter point).
pub const RS3_BORDER0: u32 = (BLOCK_BITS / 4) as u32 - 1;

/// Second intra-block border of the rank-select index (three-quarter point).
pub const RS3_BORDER1: u32 = (BLOCK_BITS / 4 * 3) as u32 - 1;

/// Number of GAP capacity levels.
pub const GAP_LEVELS: usize = 4;

/// Default GAP level capacity ladder, in 16-bit words per block (header
/// included). A GAP block whose encoding outgrows the top level is promoted
/// to a bit-block.
pub const GAP_LEVEL_LADDER: [u16; GAP_LEVELS] = [128, 256, 512, 1024];

/// Capacity of the bulk-insert collector, in pending ids (`BLOCK_BITS / 32`).
pub const BULK_BUFFER_IDS: usize = (BLOCK_BITS / 32) as usize;

/// Storage optimization mode for [`BitVector::optimize`] and the 3-operand
/// logical operations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum OptMode {
    /// Leave block representations as the operation produced them.
    None,
    /// Free blocks that became all-zero.
    FreeEmpty,
    /// Free all-zero blocks and collapse all-one blocks to the full sentinel.
    Free01,
    /// Everything `Free01` does, plus demote low-entropy bit-blocks to GAP.
    #[default]
    Compress,
}

/// Block allocation strategy: preferred representation for new blocks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Strategy {
    /// Allocate new blocks as verbatim bit-blocks.
    #[default]
    Bit,
    /// Allocate new blocks as GAP blocks where possible.
    Gap,
}

/// Sort hint for bulk id import.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SortOrder {
    /// Ids are in ascending order.
    Sorted,
    /// No ordering guarantee.
    Unsorted,
}

/// Split a bit index into `(block, bit-in-block)` coordinates.
#[inline]
pub(crate) fn split_index(n: u64) -> (u64, u32) {
    (n >> 16, (n & 0xFFFF) as u32)
}

/// Split a block number into `(top, sub)` coordinates.
#[inline]
pub(crate) fn split_block(nb: u64) -> (usize, usize) {
    ((nb >> 8) as usize, (nb & 0xFF) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geometry_constants() {
        assert_eq!(BLOCK_WORDS, 2048);
        assert_eq!(DIGEST_WAVE_WORDS, 32);
        assert_eq!(SUB_ARRAY_BITS, 16_777_216);
        assert_eq!(TOP_ARRAY_MAX, 1 << 24);
        assert_eq!(RS3_BORDER0, 16_383);
        assert_eq!(RS3_BORDER1, 49_151);
    }

    #[test]
    fn test_split_index() {
        assert_eq!(split_index(0), (0, 0));
        assert_eq!(split_index(65_535), (0, 65_535));
        assert_eq!(split_index(65_536), (1, 0));
        assert_eq!(split_index(16_777_216), (256, 0));
    }

    #[test]
    fn test_split_block() {
        assert_eq!(split_block(0), (0, 0));
        assert_eq!(split_block(255), (0, 255));
        assert_eq!(split_block(256), (1, 0));
        assert_eq!(split_block(511), (1, 255));
    }
}
