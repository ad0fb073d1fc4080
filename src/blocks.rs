//! Two-level sparse block tree.
//!
//! The top array holds one entry per 16M-bit span. An entry is either
//! absent (the whole span reads zero), the full sentinel (the whole span
//! reads one), or an owned sub-array of 256 block slots. Slots repeat the
//! same scheme one level down. No slot or sub-array refers back to its
//! parent; operations address blocks by `(i, j)` coordinates derived from
//! the block number.

#[cfg(not(test))]
use alloc::vec::Vec;

use alloc::boxed::Box;
use core::mem;

use crate::alloc_pool::Allocator;
use crate::bitblock::BitBlock;
use crate::block::{BlockOps, Slot};
use crate::{split_block, OptMode, Strategy, GAP_LEVELS, SUB_ARRAY_SIZE};

/// Shared read-only representatives for sentinel lookups.
static NULL_SLOT: Slot = Slot::Null;
static FULL_SLOT: Slot = Slot::Full;

/// A materialized sub-array of 256 block slots.
pub(crate) struct SubArray {
    slots: [Slot; SUB_ARRAY_SIZE],
}

impl SubArray {
    fn new_null() -> Box<SubArray> {
        Box::new(SubArray {
            slots: core::array::from_fn(|_| Slot::Null),
        })
    }

    fn new_full() -> Box<SubArray> {
        Box::new(SubArray {
            slots: core::array::from_fn(|_| Slot::Full),
        })
    }

    #[inline]
    pub(crate) fn slot(&self, j: usize) -> &Slot {
        &self.slots[j]
    }

    #[inline]
    pub(crate) fn slot_mut(&mut self, j: usize) -> &mut Slot {
        &mut self.slots[j]
    }

    fn all_null(&self) -> bool {
        self.slots.iter().all(Slot::is_null)
    }

    fn all_full(&self) -> bool {
        self.slots.iter().all(Slot::is_full)
    }
}

impl Clone for SubArray {
    fn clone(&self) -> Self {
        SubArray {
            slots: core::array::from_fn(|j| self.slots[j].clone()),
        }
    }
}

/// One top-level entry: a 16M-bit span.
#[derive(Clone, Default)]
pub(crate) enum TopSlot {
    /// Whole span reads zero.
    #[default]
    Null,
    /// Whole span reads one.
    Full,
    /// Materialized span.
    Sub(Box<SubArray>),
}

/// The block store of one bit-vector.
#[derive(Clone)]
pub(crate) struct BlocksManager {
    top: Vec<TopSlot>,
    glevels: [u16; GAP_LEVELS],
    alloc: Allocator,
    strategy: Strategy,
}

/// Materialize and return the addressed slot, growing the top array and
/// expanding sentinels as needed.
fn slot_mut_raw(top: &mut Vec<TopSlot>, nb: u64) -> &mut Slot {
    let (i, j) = split_block(nb);
    if i >= top.len() {
        top.resize_with(i + 1, TopSlot::default);
    }
    let entry = &mut top[i];
    match entry {
        TopSlot::Sub(_) => {}
        TopSlot::Null => *entry = TopSlot::Sub(SubArray::new_null()),
        TopSlot::Full => *entry = TopSlot::Sub(SubArray::new_full()),
    }
    match entry {
        TopSlot::Sub(sub) => sub.slot_mut(j),
        _ => unreachable!(),
    }
}

impl BlocksManager {
    pub(crate) fn new(strategy: Strategy, glevels: [u16; GAP_LEVELS]) -> Self {
        BlocksManager {
            top: Vec::new(),
            glevels,
            alloc: Allocator::default(),
            strategy,
        }
    }

    #[inline]
    pub(crate) fn strategy(&self) -> Strategy {
        self.strategy
    }

    #[inline]
    pub(crate) fn glevels(&self) -> &[u16; GAP_LEVELS] {
        &self.glevels
    }

    #[inline]
    pub(crate) fn allocator_mut(&mut self) -> &mut Allocator {
        &mut self.alloc
    }

    #[inline]
    pub(crate) fn top_len(&self) -> usize {
        self.top.len()
    }

    #[inline]
    pub(crate) fn top(&self, i: usize) -> &TopSlot {
        self.top.get(i).unwrap_or(&TopSlot::Null)
    }

    /// Read-only slot lookup; sentinels resolve to shared representatives.
    pub(crate) fn slot(&self, nb: u64) -> &Slot {
        let (i, j) = split_block(nb);
        match self.top.get(i) {
            None | Some(TopSlot::Null) => &NULL_SLOT,
            Some(TopSlot::Full) => &FULL_SLOT,
            Some(TopSlot::Sub(sub)) => sub.slot(j),
        }
    }

    /// Mutable slot access, materializing the containing sub-array.
    pub(crate) fn slot_mut(&mut self, nb: u64) -> &mut Slot {
        slot_mut_raw(&mut self.top, nb)
    }

    /// Run `f` over the addressed slot with a combine context.
    pub(crate) fn with_ops<R>(
        &mut self,
        nb: u64,
        f: impl FnOnce(&BlockOps<'_>, &mut Slot) -> R,
    ) -> R {
        let ops = BlockOps::new(&self.alloc, &self.glevels);
        let slot = slot_mut_raw(&mut self.top, nb);
        f(&ops, slot)
    }

    /// Materialize the block as an owned bit-block and return it.
    pub(crate) fn deoptimize(&mut self, nb: u64) -> &mut BitBlock {
        let ops = BlockOps::new(&self.alloc, &self.glevels);
        let slot = slot_mut_raw(&mut self.top, nb);
        ops.deoptimize(slot)
    }

    /// Drop all storage.
    pub(crate) fn clear(&mut self) {
        self.top.clear();
    }

    /// True when no block storage exists at all.
    pub(crate) fn is_init(&self) -> bool {
        !self.top.is_empty()
    }

    // ------------------------------------------------------------------
    // Whole-tree queries
    // ------------------------------------------------------------------

    /// Total population count.
    pub(crate) fn count(&self) -> u64 {
        let mut total = 0u64;
        for entry in &self.top {
            match entry {
                TopSlot::Null => {}
                TopSlot::Full => total += crate::SUB_ARRAY_BITS,
                TopSlot::Sub(sub) => {
                    for slot in &sub.slots {
                        total += slot.count() as u64;
                    }
                }
            }
        }
        total
    }

    /// True when any bit is set.
    pub(crate) fn any(&self) -> bool {
        self.top.iter().any(|entry| match entry {
            TopSlot::Null => false,
            TopSlot::Full => true,
            TopSlot::Sub(sub) => sub.slots.iter().any(|s| match s {
                Slot::Null => false,
                Slot::Full => true,
                Slot::Bit(b) => !b.is_all_zero(),
                Slot::Gap(g) => !g.is_all_zero(),
            }),
        })
    }

    /// First non-null block at or after `nb`, with its slot.
    pub(crate) fn next_occupied(&self, nb: u64) -> Option<(u64, &Slot)> {
        let (mut i, mut j) = split_block(nb);
        while i < self.top.len() {
            match &self.top[i] {
                TopSlot::Null => {
                    i += 1;
                    j = 0;
                }
                TopSlot::Full => {
                    return Some(((i * SUB_ARRAY_SIZE + j) as u64, &FULL_SLOT));
                }
                TopSlot::Sub(sub) => {
                    while j < SUB_ARRAY_SIZE {
                        let slot = sub.slot(j);
                        if !slot.is_null() {
                            return Some(((i * SUB_ARRAY_SIZE + j) as u64, slot));
                        }
                        j += 1;
                    }
                    i += 1;
                    j = 0;
                }
            }
        }
        None
    }

    /// Last non-null block of the tree, with its slot.
    pub(crate) fn last_occupied(&self) -> Option<(u64, &Slot)> {
        for i in (0..self.top.len()).rev() {
            match &self.top[i] {
                TopSlot::Null => {}
                TopSlot::Full => {
                    return Some(((i * SUB_ARRAY_SIZE + SUB_ARRAY_SIZE - 1) as u64, &FULL_SLOT));
                }
                TopSlot::Sub(sub) => {
                    for j in (0..SUB_ARRAY_SIZE).rev() {
                        let slot = sub.slot(j);
                        if !slot.is_null() {
                            return Some(((i * SUB_ARRAY_SIZE + j) as u64, slot));
                        }
                    }
                }
            }
        }
        None
    }

    /// Iterate `(nb, slot)` pairs over occupied blocks in ascending order.
    pub(crate) fn iter_occupied(&self) -> OccupiedIter<'_> {
        OccupiedIter { man: self, nb: 0 }
    }

    // ------------------------------------------------------------------
    // Sentinel-aware range replacement
    // ------------------------------------------------------------------

    /// Replace whole blocks `[nb_from, nb_to]` with zeros.
    pub(crate) fn set_blocks_zero(&mut self, nb_from: u64, nb_to: u64) {
        self.fill_blocks(nb_from, nb_to, false);
    }

    /// Replace whole blocks `[nb_from, nb_to]` with ones.
    pub(crate) fn set_blocks_one(&mut self, nb_from: u64, nb_to: u64) {
        self.fill_blocks(nb_from, nb_to, true);
    }

    fn fill_blocks(&mut self, nb_from: u64, nb_to: u64, value: bool) {
        debug_assert!(nb_from <= nb_to);
        let mut nb = nb_from;
        while nb <= nb_to {
            let (i, j) = split_block(nb);
            // a fully covered span flips at the top level
            if j == 0 && nb + SUB_ARRAY_SIZE as u64 - 1 <= nb_to {
                if i >= self.top.len() {
                    if !value {
                        return; // beyond the tree, already zero
                    }
                    self.top.resize_with(i + 1, TopSlot::default);
                }
                self.top[i] = if value { TopSlot::Full } else { TopSlot::Null };
                nb += SUB_ARRAY_SIZE as u64;
                continue;
            }
            if !value && i >= self.top.len() {
                return;
            }
            let ops = BlockOps::new(&self.alloc, &self.glevels);
            let slot = slot_mut_raw(&mut self.top, nb);
            if value {
                if let Slot::Bit(b) = mem::replace(slot, Slot::Full) {
                    ops.alloc.free_bit(b);
                }
            } else {
                ops.free(slot);
            }
            nb += 1;
        }
    }

    /// Grow the top array with explicit zero spans up to `len` entries.
    pub(crate) fn ensure_top_len(&mut self, len: usize) {
        if self.top.len() < len {
            self.top.resize_with(len, TopSlot::default);
        }
    }

    /// Complement one whole top-level span.
    pub(crate) fn invert_top(&mut self, i: usize) {
        debug_assert!(i < self.top.len());
        let ops = BlockOps::new(&self.alloc, &self.glevels);
        match &mut self.top[i] {
            entry @ TopSlot::Null => *entry = TopSlot::Full,
            entry @ TopSlot::Full => *entry = TopSlot::Null,
            TopSlot::Sub(sub) => {
                for slot in sub.slots.iter_mut() {
                    ops.invert_slot(slot);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Tree-wide optimization
    // ------------------------------------------------------------------

    /// Walk every block: free zeros, collapse ones, optionally demote
    /// bit-blocks to GAP. Sub-arrays left uniform collapse to sentinels and
    /// a trailing run of null entries shrinks the top array.
    pub(crate) fn optimize_tree(&mut self, mode: OptMode) {
        if mode == OptMode::None {
            return;
        }
        let ops = BlockOps::new(&self.alloc, &self.glevels);
        for entry in self.top.iter_mut() {
            let TopSlot::Sub(sub) = entry else { continue };
            for slot in sub.slots.iter_mut() {
                ops.optimize_slot(slot, mode);
            }
            if sub.all_null() {
                *entry = TopSlot::Null;
            } else if mode != OptMode::FreeEmpty && sub.all_full() {
                *entry = TopSlot::Full;
            }
        }
        while matches!(self.top.last(), Some(TopSlot::Null)) {
            self.top.pop();
        }
    }
}

/// Ascending iterator over occupied blocks.
pub(crate) struct OccupiedIter<'a> {
    man: &'a BlocksManager,
    nb: u64,
}

impl<'a> Iterator for OccupiedIter<'a> {
    type Item = (u64, &'a Slot);

    fn next(&mut self) -> Option<Self::Item> {
        let (nb, slot) = self.man.next_occupied(self.nb)?;
        self.nb = nb + 1;
        Some((nb, slot))
    }
}
