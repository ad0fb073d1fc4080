//! Storage statistics.

use crate::block::Slot;
use crate::blocks::{BlocksManager, TopSlot};
use crate::{BLOCK_WORDS, GAP_LEVELS, SUB_ARRAY_SIZE};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Storage statistics reported by `BitVector::calc_stat` and
/// `BitVector::optimize`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Statistics {
    /// Number of verbatim bit-blocks.
    pub bit_blocks: usize,
    /// Number of GAP blocks.
    pub gap_blocks: usize,
    /// Number of full-block sentinels (materialized sub-array slots only).
    pub full_blocks: usize,
    /// Number of materialized sub-arrays.
    pub ptr_sub_blocks: usize,
    /// GAP block count per capacity level.
    pub gap_blocks_by_level: [usize; GAP_LEVELS],
    /// The GAP capacity ladder in effect.
    pub gap_levels: [u16; GAP_LEVELS],
    /// Heap memory used by block storage, in bytes.
    pub memory_used: usize,
    /// Upper-bound estimate of the serialized byte size.
    pub max_serialize_mem: usize,
}

/// Per-block serialization bookkeeping reserve (type token, length, id).
const BLOCK_SER_OVERHEAD: usize = 16;

impl Statistics {
    pub(crate) fn collect(man: &BlocksManager) -> Statistics {
        let mut stat = Statistics {
            gap_levels: *man.glevels(),
            ..Statistics::default()
        };
        stat.memory_used += man.top_len() * core::mem::size_of::<TopSlot>();
        stat.max_serialize_mem += 64;

        for i in 0..man.top_len() {
            let TopSlot::Sub(sub) = man.top(i) else {
                continue;
            };
            stat.ptr_sub_blocks += 1;
            stat.memory_used += SUB_ARRAY_SIZE * core::mem::size_of::<Slot>();
            for j in 0..SUB_ARRAY_SIZE {
                match sub.slot(j) {
                    Slot::Null => {}
                    Slot::Full => stat.full_blocks += 1,
                    Slot::Bit(_) => {
                        stat.bit_blocks += 1;
                        stat.memory_used += BLOCK_WORDS * 4;
                        stat.max_serialize_mem += BLOCK_WORDS * 4 + BLOCK_SER_OVERHEAD;
                    }
                    Slot::Gap(g) => {
                        stat.gap_blocks += 1;
                        stat.gap_blocks_by_level[g.level() as usize] += 1;
                        stat.memory_used += g.words_used() * 2;
                        stat.max_serialize_mem += g.words_used() * 2 + BLOCK_SER_OVERHEAD;
                    }
                }
            }
        }
        stat
    }
}
