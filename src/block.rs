//! Block slots and per-block combine operations.
//!
//! Every block coordinate resolves to a [`Slot`]: absent (all-zero), the
//! full sentinel (all-one), an owned bit-block, or an owned GAP block. The
//! pointer-tag discrimination of classic implementations becomes the enum
//! discriminant; sentinels are variants, never dereferenced storage.
//!
//! [`BlockOps`] implements the OR/AND/XOR/SUB dispatch over the
//! representation cross-product, plus the conversions that keep slots in
//! their memory-minimal form: all-zero results collapse to `Null`, all-one
//! results to `Full`, overflowing GAP blocks promote to bit-blocks, and
//! low-entropy bit-blocks demote to GAP on compression.

use alloc::boxed::Box;
use core::mem;

use crate::alloc_pool::Allocator;
use crate::bitblock::BitBlock;
use crate::gap::{self, GapBlock};
use crate::{OptMode, GAP_LEVELS};

/// One block position: the four storage forms.
#[derive(Clone, Default)]
pub(crate) enum Slot {
    /// No storage; every bit reads zero.
    #[default]
    Null,
    /// No storage; every bit reads one.
    Full,
    /// Verbatim 64Kbit block.
    Bit(Box<BitBlock>),
    /// Run-length coded block.
    Gap(GapBlock),
}

impl Slot {
    #[inline]
    pub(crate) fn is_null(&self) -> bool {
        matches!(self, Slot::Null)
    }

    #[inline]
    pub(crate) fn is_full(&self) -> bool {
        matches!(self, Slot::Full)
    }

    /// Test bit `nbit` within this block.
    #[inline]
    pub(crate) fn test(&self, nbit: u32) -> bool {
        match self {
            Slot::Null => false,
            Slot::Full => true,
            Slot::Bit(b) => b.test(nbit),
            Slot::Gap(g) => g.test(nbit),
        }
    }

    /// Population count of the block.
    pub(crate) fn count(&self) -> u32 {
        match self {
            Slot::Null => 0,
            Slot::Full => crate::BLOCK_BITS as u32,
            Slot::Bit(b) => b.count(),
            Slot::Gap(g) => g.count(),
        }
    }

    /// Population count over the inclusive range `[from, to]`.
    pub(crate) fn count_range(&self, from: u32, to: u32) -> u32 {
        match self {
            Slot::Null => 0,
            Slot::Full => to - from + 1,
            Slot::Bit(b) => b.count_range(from, to),
            Slot::Gap(g) => g.count_range(from, to),
        }
    }

    /// First set bit at or after `from`.
    pub(crate) fn find_from(&self, from: u32) -> Option<u32> {
        match self {
            Slot::Null => None,
            Slot::Full => Some(from),
            Slot::Bit(b) => b.find_from(from),
            Slot::Gap(g) => g.find_from(from),
        }
    }

    /// Last set bit of the block.
    pub(crate) fn find_last(&self) -> Option<u32> {
        match self {
            Slot::Null => None,
            Slot::Full => Some(crate::BLOCK_BITS as u32 - 1),
            Slot::Bit(b) => b.find_last(),
            Slot::Gap(g) => g.find_last(),
        }
    }

    /// Position of the `rank`-th set bit (1-based) at or after `from`.
    pub(crate) fn select_from(&self, from: u32, rank: u32) -> Option<u32> {
        match self {
            Slot::Null => None,
            Slot::Full => {
                let pos = from + rank - 1;
                (pos < crate::BLOCK_BITS as u32).then_some(pos)
            }
            Slot::Bit(b) => b.select_from(from, rank),
            Slot::Gap(g) => g.select_from(from, rank),
        }
    }
}

/// Per-block operation context: the allocator and the GAP level ladder.
pub(crate) struct BlockOps<'a> {
    pub(crate) alloc: &'a Allocator,
    pub(crate) ladder: &'a [u16; GAP_LEVELS],
}

impl<'a> BlockOps<'a> {
    pub(crate) fn new(alloc: &'a Allocator, ladder: &'a [u16; GAP_LEVELS]) -> Self {
        BlockOps { alloc, ladder }
    }

    /// Endpoint capacity of the top ladder level.
    #[inline]
    fn max_ends(&self) -> usize {
        self.ladder[GAP_LEVELS - 1] as usize - 1
    }

    /// Release a slot's storage, leaving `Null`.
    pub(crate) fn free(&self, slot: &mut Slot) {
        if let Slot::Bit(b) = mem::take(slot) {
            self.alloc.free_bit(b);
        }
    }

    /// Release a slot's storage, leaving `Full`.
    fn make_full(&self, slot: &mut Slot) {
        if let Slot::Bit(b) = mem::replace(slot, Slot::Full) {
            self.alloc.free_bit(b);
        }
    }

    /// Materialize the slot as an owned bit-block and return it mutably.
    ///
    /// `Null` expands to zeros, `Full` to ones, GAP decodes.
    pub(crate) fn deoptimize<'s>(&self, slot: &'s mut Slot) -> &'s mut BitBlock {
        match slot {
            Slot::Bit(_) => {}
            Slot::Null => *slot = Slot::Bit(self.alloc.alloc_bit()),
            Slot::Full => *slot = Slot::Bit(self.alloc.alloc_bit_full()),
            Slot::Gap(g) => {
                let mut b = self.alloc.alloc_bit();
                g.to_bit_block(&mut b);
                *slot = Slot::Bit(b);
            }
        }
        match slot {
            Slot::Bit(b) => b,
            _ => unreachable!(),
        }
    }

    /// Re-establish the memory-minimal form after a GAP mutation: collapse
    /// to a sentinel, refresh the level, or promote to a bit-block when the
    /// encoding outgrew the ladder.
    pub(crate) fn normalize_gap(&self, slot: &mut Slot) {
        let Slot::Gap(g) = slot else { return };
        if g.is_all_zero() {
            *slot = Slot::Null;
            return;
        }
        if g.is_all_one() {
            *slot = Slot::Full;
            return;
        }
        match gap::fit_level(g.len(), self.ladder) {
            Some(level) => g.set_level(level),
            None => {
                let mut b = self.alloc.alloc_bit();
                g.to_bit_block(&mut b);
                *slot = Slot::Bit(b);
            }
        }
    }

    /// Place a freshly computed GAP result into a slot, normalized.
    fn store_gap(&self, slot: &mut Slot, g: GapBlock) {
        self.free(slot);
        *slot = Slot::Gap(g);
        self.normalize_gap(slot);
    }

    /// Targeted single-slot optimization.
    pub(crate) fn optimize_slot(&self, slot: &mut Slot, mode: OptMode) {
        if mode == OptMode::None {
            return;
        }
        match slot {
            Slot::Null | Slot::Full => {}
            Slot::Gap(g) => {
                if g.is_all_zero() {
                    *slot = Slot::Null;
                } else if mode != OptMode::FreeEmpty && g.is_all_one() {
                    *slot = Slot::Full;
                } else if let Some(level) = gap::fit_level(g.len(), self.ladder) {
                    g.set_level(level);
                }
            }
            Slot::Bit(b) => {
                if b.is_all_zero() {
                    self.free(slot);
                    return;
                }
                if mode == OptMode::FreeEmpty {
                    return;
                }
                if b.is_all_one() {
                    self.make_full(slot);
                    return;
                }
                if mode == OptMode::Compress {
                    if let Some(g) = GapBlock::from_bit_block(b, self.max_ends()) {
                        let mut g = g;
                        if let Some(level) = gap::fit_level(g.len(), self.ladder) {
                            g.set_level(level);
                            let old = mem::replace(slot, Slot::Gap(g));
                            if let Slot::Bit(b) = old {
                                self.alloc.free_bit(b);
                            }
                        }
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // 2-operand combine: dst OP= src
    // ------------------------------------------------------------------

    /// `dst |= src`.
    pub(crate) fn or_into(&self, dst: &mut Slot, src: &Slot) {
        match (&mut *dst, src) {
            (_, Slot::Null) | (Slot::Full, _) => {}
            (_, Slot::Full) => self.make_full(dst),
            (Slot::Null, _) => *dst = src.clone(),
            (Slot::Gap(a), Slot::Gap(b)) => {
                let r = gap::gap_or(a, b);
                self.store_gap(dst, r);
            }
            (Slot::Gap(_), Slot::Bit(b)) => {
                let bb = self.deoptimize(dst);
                if bb.or_from(b) {
                    self.make_full(dst);
                }
            }
            (Slot::Bit(a), Slot::Gap(g)) => {
                g.add_to(a);
                if a.is_all_one() {
                    self.make_full(dst);
                }
            }
            (Slot::Bit(a), Slot::Bit(b)) => {
                if a.or_from(b) {
                    self.make_full(dst);
                }
            }
        }
    }

    /// `dst &= src`.
    pub(crate) fn and_into(&self, dst: &mut Slot, src: &Slot) {
        match (&mut *dst, src) {
            (Slot::Null, _) | (_, Slot::Full) => {}
            (_, Slot::Null) => self.free(dst),
            (Slot::Full, _) => *dst = src.clone(),
            (Slot::Gap(a), Slot::Gap(b)) => {
                let r = gap::gap_and(a, b);
                self.store_gap(dst, r);
            }
            (Slot::Gap(g), Slot::Bit(b)) => {
                // materialize src and mask it by the gap runs
                let mut bb = self.alloc.alloc_bit_copy(b);
                g.and_to(&mut bb);
                if bb.is_all_zero() {
                    self.alloc.free_bit(bb);
                    self.free(dst);
                } else {
                    *dst = Slot::Bit(bb);
                }
            }
            (Slot::Bit(a), Slot::Gap(g)) => {
                g.and_to(a);
                if a.is_all_zero() {
                    self.free(dst);
                }
            }
            (Slot::Bit(a), Slot::Bit(b)) => {
                if a.and_from(b) == 0 {
                    self.free(dst);
                }
            }
        }
    }

    /// `dst ^= src`.
    pub(crate) fn xor_into(&self, dst: &mut Slot, src: &Slot) {
        match (&mut *dst, src) {
            (_, Slot::Null) => {}
            (Slot::Null, _) => *dst = src.clone(),
            (Slot::Full, _) => {
                *dst = self.complement_of(src);
            }
            (_, Slot::Full) => {
                self.invert_slot(dst);
            }
            (Slot::Gap(a), Slot::Gap(b)) => {
                let r = gap::gap_xor(a, b);
                self.store_gap(dst, r);
            }
            (Slot::Gap(_), Slot::Bit(b)) => {
                let bb = self.deoptimize(dst);
                if !bb.xor_from(b) {
                    self.free(dst);
                } else if matches!(dst, Slot::Bit(b) if b.is_all_one()) {
                    self.make_full(dst);
                }
            }
            (Slot::Bit(a), Slot::Gap(g)) => {
                g.xor_to(a);
                if a.is_all_zero() {
                    self.free(dst);
                } else if a.is_all_one() {
                    self.make_full(dst);
                }
            }
            (Slot::Bit(a), Slot::Bit(b)) => {
                if !a.xor_from(b) {
                    self.free(dst);
                } else if a.is_all_one() {
                    self.make_full(dst);
                }
            }
        }
    }

    /// `dst &= !src`.
    pub(crate) fn sub_into(&self, dst: &mut Slot, src: &Slot) {
        match (&mut *dst, src) {
            (Slot::Null, _) | (_, Slot::Null) => {}
            (_, Slot::Full) => self.free(dst),
            (Slot::Full, _) => {
                *dst = self.complement_of(src);
            }
            (Slot::Gap(a), Slot::Gap(b)) => {
                let r = gap::gap_sub(a, b);
                self.store_gap(dst, r);
            }
            (Slot::Gap(_), Slot::Bit(b)) => {
                let bb = self.deoptimize(dst);
                if !bb.sub_from(b) {
                    self.free(dst);
                }
            }
            (Slot::Bit(a), Slot::Gap(g)) => {
                g.sub_to(a);
                if a.is_all_zero() {
                    self.free(dst);
                }
            }
            (Slot::Bit(a), Slot::Bit(b)) => {
                if !a.sub_from(b) {
                    self.free(dst);
                }
            }
        }
    }

    /// Complement of a slot, as a fresh normalized slot.
    fn complement_of(&self, src: &Slot) -> Slot {
        match src {
            Slot::Null => Slot::Full,
            Slot::Full => Slot::Null,
            Slot::Bit(b) => {
                let mut c = self.alloc.alloc_bit_copy(b);
                c.invert();
                if c.is_all_zero() {
                    self.alloc.free_bit(c);
                    Slot::Null
                } else if c.is_all_one() {
                    self.alloc.free_bit(c);
                    Slot::Full
                } else {
                    Slot::Bit(c)
                }
            }
            Slot::Gap(g) => {
                let mut c = g.clone();
                c.invert();
                let mut slot = Slot::Gap(c);
                self.normalize_gap(&mut slot);
                slot
            }
        }
    }

    /// Complement a slot in place.
    pub(crate) fn invert_slot(&self, slot: &mut Slot) {
        match slot {
            Slot::Null => *slot = Slot::Full,
            Slot::Full => *slot = Slot::Null,
            Slot::Gap(g) => {
                g.invert();
                self.normalize_gap(slot);
            }
            Slot::Bit(b) => {
                b.invert();
                if b.is_all_zero() {
                    self.free(slot);
                } else if b.is_all_one() {
                    self.make_full(slot);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // 3-operand combine: dst = a OP b
    // ------------------------------------------------------------------

    /// `dst = a | b`. Returns true when the result warrants a compression
    /// look (a surviving bit-block).
    pub(crate) fn or_of(&self, dst: &mut Slot, a: &Slot, b: &Slot, opt: OptMode) -> bool {
        self.assign_then(dst, a, b, opt, Self::or_into)
    }

    /// `dst = a & b`.
    pub(crate) fn and_of(&self, dst: &mut Slot, a: &Slot, b: &Slot, opt: OptMode) -> bool {
        self.assign_then(dst, a, b, opt, Self::and_into)
    }

    /// `dst = a ^ b`.
    pub(crate) fn xor_of(&self, dst: &mut Slot, a: &Slot, b: &Slot, opt: OptMode) -> bool {
        self.assign_then(dst, a, b, opt, Self::xor_into)
    }

    /// `dst = a & !b`.
    pub(crate) fn sub_of(&self, dst: &mut Slot, a: &Slot, b: &Slot, opt: OptMode) -> bool {
        self.assign_then(dst, a, b, opt, Self::sub_into)
    }

    fn assign_then(
        &self,
        dst: &mut Slot,
        a: &Slot,
        b: &Slot,
        opt: OptMode,
        op: fn(&Self, &mut Slot, &Slot),
    ) -> bool {
        self.free(dst);
        *dst = a.clone();
        op(self, dst, b);
        let needs_optimize = matches!(dst, Slot::Bit(_));
        if needs_optimize && opt == OptMode::Compress {
            self.optimize_slot(dst, OptMode::Compress);
        }
        needs_optimize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GAP_LEVEL_LADDER;

    fn ops_ctx() -> (Allocator, [u16; GAP_LEVELS]) {
        (Allocator::default(), GAP_LEVEL_LADDER)
    }

    fn gap_slot(bits: &[u32]) -> Slot {
        let mut g = GapBlock::new_zero(0);
        for &b in bits {
            g.set_bit(b, true);
        }
        Slot::Gap(g)
    }

    fn bit_slot(bits: &[u32]) -> Slot {
        let mut b = BitBlock::new_boxed();
        for &n in bits {
            b.set_bit(n);
        }
        Slot::Bit(b)
    }

    #[test]
    fn test_slot_queries() {
        assert_eq!(Slot::Null.count(), 0);
        assert_eq!(Slot::Full.count(), 65_536);
        assert!(Slot::Full.test(12_345));
        assert_eq!(Slot::Full.count_range(10, 19), 10);
        assert_eq!(Slot::Full.find_from(7), Some(7));
        assert_eq!(Slot::Null.find_from(7), None);
        assert_eq!(gap_slot(&[9]).find_last(), Some(9));
        assert_eq!(bit_slot(&[3, 9]).select_from(0, 2), Some(9));
    }

    #[test]
    fn test_deoptimize_forms() {
        let (alloc, ladder) = ops_ctx();
        let ops = BlockOps::new(&alloc, &ladder);

        let mut s = Slot::Null;
        assert!(ops.deoptimize(&mut s).is_all_zero());

        let mut s = Slot::Full;
        assert!(ops.deoptimize(&mut s).is_all_one());

        let mut s = gap_slot(&[42]);
        let b = ops.deoptimize(&mut s);
        assert!(b.test(42));
        assert_eq!(b.count(), 1);
    }

    #[test]
    fn test_or_dispatch() {
        let (alloc, ladder) = ops_ctx();
        let ops = BlockOps::new(&alloc, &ladder);

        // null | x = copy of x
        let mut d = Slot::Null;
        ops.or_into(&mut d, &gap_slot(&[5]));
        assert_eq!(d.count(), 1);

        // full absorbs
        let mut d = Slot::Full;
        ops.or_into(&mut d, &bit_slot(&[1]));
        assert!(d.is_full());

        // x | full = full, storage freed
        let mut d = bit_slot(&[1]);
        ops.or_into(&mut d, &Slot::Full);
        assert!(d.is_full());

        // gap | gap stays gap
        let mut d = gap_slot(&[1, 2]);
        ops.or_into(&mut d, &gap_slot(&[2, 3]));
        assert!(matches!(d, Slot::Gap(_)));
        assert_eq!(d.count(), 3);

        // bit | gap
        let mut d = bit_slot(&[10]);
        ops.or_into(&mut d, &gap_slot(&[20]));
        assert_eq!(d.count(), 2);

        // gap | bit materializes
        let mut d = gap_slot(&[10]);
        ops.or_into(&mut d, &bit_slot(&[20]));
        assert!(matches!(d, Slot::Bit(_)));
        assert_eq!(d.count(), 2);
    }

    #[test]
    fn test_or_detects_full_result() {
        let (alloc, ladder) = ops_ctx();
        let ops = BlockOps::new(&alloc, &ladder);

        // dense halves that union to the whole block
        let mut a = BitBlock::new_boxed();
        a.set_range(0, 40_000);
        let mut b = BitBlock::new_boxed();
        b.set_range(40_001, 65_535);

        let mut d = Slot::Bit(a);
        ops.or_into(&mut d, &Slot::Bit(b));
        assert!(d.is_full());
    }

    #[test]
    fn test_and_dispatch() {
        let (alloc, ladder) = ops_ctx();
        let ops = BlockOps::new(&alloc, &ladder);

        // x & null frees
        let mut d = bit_slot(&[1]);
        ops.and_into(&mut d, &Slot::Null);
        assert!(d.is_null());

        // full & x copies x
        let mut d = Slot::Full;
        ops.and_into(&mut d, &gap_slot(&[6]));
        assert_eq!(d.count(), 1);

        // disjoint bit blocks collapse to null
        let mut d = bit_slot(&[1]);
        ops.and_into(&mut d, &bit_slot(&[2]));
        assert!(d.is_null());

        // gap & bit materializes the intersection
        let mut d = gap_slot(&[7, 8]);
        ops.and_into(&mut d, &bit_slot(&[8, 9]));
        assert_eq!(d.count(), 1);
        assert!(d.test(8));
    }

    #[test]
    fn test_xor_dispatch() {
        let (alloc, ladder) = ops_ctx();
        let ops = BlockOps::new(&alloc, &ladder);

        // full ^ x = complement
        let mut d = Slot::Full;
        ops.xor_into(&mut d, &gap_slot(&[0]));
        assert_eq!(d.count(), 65_535);
        assert!(!d.test(0));

        // x ^ full = invert in place
        let mut d = gap_slot(&[0]);
        ops.xor_into(&mut d, &Slot::Full);
        assert!(!d.test(0));
        assert!(d.test(1));

        // identical blocks cancel to null
        let mut d = bit_slot(&[4, 5]);
        ops.xor_into(&mut d, &bit_slot(&[4, 5]));
        assert!(d.is_null());

        // gap ^ gap identical cancels too
        let mut d = gap_slot(&[4, 5]);
        ops.xor_into(&mut d, &gap_slot(&[4, 5]));
        assert!(d.is_null());
    }

    #[test]
    fn test_sub_dispatch() {
        let (alloc, ladder) = ops_ctx();
        let ops = BlockOps::new(&alloc, &ladder);

        // x \ full = null
        let mut d = bit_slot(&[1]);
        ops.sub_into(&mut d, &Slot::Full);
        assert!(d.is_null());

        // full \ x = complement
        let mut d = Slot::Full;
        ops.sub_into(&mut d, &gap_slot(&[3]));
        assert_eq!(d.count(), 65_535);

        // bit \ gap
        let mut d = bit_slot(&[3, 4]);
        ops.sub_into(&mut d, &gap_slot(&[4]));
        assert_eq!(d.count(), 1);
        assert!(d.test(3));

        // self-subtraction collapses
        let mut d = gap_slot(&[3]);
        ops.sub_into(&mut d, &gap_slot(&[3]));
        assert!(d.is_null());
    }

    #[test]
    fn test_three_operand_and_needs_optimize() {
        let (alloc, ladder) = ops_ctx();
        let ops = BlockOps::new(&alloc, &ladder);

        let a = bit_slot(&[1, 2, 3]);
        let b = bit_slot(&[2, 3, 4]);
        let mut d = Slot::Null;

        let needs = ops.and_of(&mut d, &a, &b, OptMode::None);
        assert!(needs);
        assert_eq!(d.count(), 2);
    }

    #[test]
    fn test_three_operand_compress_demotes() {
        let (alloc, ladder) = ops_ctx();
        let ops = BlockOps::new(&alloc, &ladder);

        let a = bit_slot(&[100, 101, 102]);
        let b = bit_slot(&[101, 102, 103]);
        let mut d = Slot::Null;

        ops.or_of(&mut d, &a, &b, OptMode::Compress);
        // 100..=103 is two runs worth of endpoints: easily GAP
        assert!(matches!(d, Slot::Gap(_)));
        assert_eq!(d.count(), 4);
    }

    #[test]
    fn test_optimize_slot_modes() {
        let (alloc, ladder) = ops_ctx();
        let ops = BlockOps::new(&alloc, &ladder);

        // empty bit block -> null
        let mut s = Slot::Bit(BitBlock::new_boxed());
        ops.optimize_slot(&mut s, OptMode::FreeEmpty);
        assert!(s.is_null());

        // all-one bit block -> full under Free01, untouched under FreeEmpty
        let mut s = Slot::Bit(BitBlock::full_boxed());
        ops.optimize_slot(&mut s, OptMode::FreeEmpty);
        assert!(matches!(s, Slot::Bit(_)));
        ops.optimize_slot(&mut s, OptMode::Free01);
        assert!(s.is_full());

        // sparse bit block -> gap under Compress
        let mut s = bit_slot(&[500, 501, 502]);
        ops.optimize_slot(&mut s, OptMode::Compress);
        assert!(matches!(s, Slot::Gap(_)));
        assert_eq!(s.count(), 3);

        // None leaves everything alone
        let mut s = Slot::Bit(BitBlock::new_boxed());
        ops.optimize_slot(&mut s, OptMode::None);
        assert!(matches!(s, Slot::Bit(_)));
    }

    #[test]
    fn test_gap_overflow_promotes_to_bit() {
        let (alloc, ladder) = ops_ctx();
        let ops = BlockOps::new(&alloc, &ladder);

        // two striped gaps whose XOR has ~2700 runs: beyond the ladder
        let mut a = GapBlock::new_zero(3);
        let mut b = GapBlock::new_zero(3);
        for k in 0..900u32 {
            a.set_bit(k * 48, true);
            b.set_bit(k * 48 + 24, true);
        }
        let mut d = Slot::Gap(a);
        ops.xor_into(&mut d, &Slot::Gap(b));
        assert!(matches!(d, Slot::Bit(_)));
        assert_eq!(d.count(), 1800);
    }

    #[test]
    fn test_invert_slot() {
        let (alloc, ladder) = ops_ctx();
        let ops = BlockOps::new(&alloc, &ladder);

        let mut s = Slot::Null;
        ops.invert_slot(&mut s);
        assert!(s.is_full());
        ops.invert_slot(&mut s);
        assert!(s.is_null());

        let mut s = gap_slot(&[0]);
        ops.invert_slot(&mut s);
        assert_eq!(s.count(), 65_535);
    }
}
