//! The compressed bit-vector façade.
//!
//! [`BitVector`] is the public container: a logically unbounded ordered set
//! of bit indices with an explicit `size` bound, stored as a two-level
//! sparse tree of compressed blocks. All public operations validate their
//! inputs once at entry and delegate to per-block algorithms.

#[cfg(not(test))]
use alloc::vec::Vec;

use alloc::rc::Rc;

use crate::alloc_pool::BlockPool;
use crate::block::Slot;
use crate::blocks::BlocksManager;
use crate::enumerator::Enumerator;
use crate::gap::{self, GapBlock};
use crate::rs_index::RsIndex;
use crate::stats::Statistics;
use crate::{
    split_index, Error, OptMode, Result, SortOrder, Strategy, BLOCK_BITS, BULK_BUFFER_IDS,
    GAP_LEVELS, GAP_LEVEL_LADDER, ID_MAX, SUB_ARRAY_BITS,
};

/// Exclusive upper bound of block numbers.
const NB_MAX: u64 = ID_MAX / BLOCK_BITS;

/// Last valid bit position inside a block.
const LAST_IN_BLOCK: u32 = BLOCK_BITS as u32 - 1;

/// A compressed set of bit indices over a 48-bit space.
///
/// Bits live in 64Kbit blocks held in one of four forms: absent (zero), a
/// full sentinel (one), a verbatim bit-block, or a run-length GAP block.
/// Mutations keep blocks in their memory-minimal form; [`BitVector::optimize`]
/// recompresses after bulk changes.
///
/// # Example
///
/// ```
/// use bitpress::BitVector;
///
/// let mut bv = BitVector::new();
/// bv.set(3)?;
/// bv.set(1_000_000)?;
/// assert_eq!(bv.count(), 2);
/// assert_eq!(bv.find(4), Some(1_000_000));
/// # Ok::<(), bitpress::Error>(())
/// ```
#[derive(Clone)]
pub struct BitVector {
    pub(crate) man: BlocksManager,
    size: u64,
}

impl BitVector {
    /// An empty vector with the maximal size bound and bit-block allocation
    /// strategy.
    pub fn new() -> Self {
        BitVector {
            man: BlocksManager::new(Strategy::Bit, GAP_LEVEL_LADDER),
            size: ID_MAX,
        }
    }

    /// An empty vector with an explicit size bound.
    ///
    /// # Panics
    ///
    /// Panics if `size > ID_MAX`.
    pub fn with_size(size: u64) -> Self {
        assert!(size <= ID_MAX, "size {} exceeds ID_MAX", size);
        BitVector {
            man: BlocksManager::new(Strategy::Bit, GAP_LEVEL_LADDER),
            size,
        }
    }

    /// An empty vector with an explicit allocation strategy and GAP level
    /// ladder.
    ///
    /// # Panics
    ///
    /// Panics if the ladder is not strictly ascending.
    pub fn with_strategy(strategy: Strategy, glevels: [u16; GAP_LEVELS], size: u64) -> Self {
        assert!(size <= ID_MAX, "size {} exceeds ID_MAX", size);
        assert!(
            glevels.windows(2).all(|w| w[0] < w[1]),
            "GAP ladder must ascend"
        );
        BitVector {
            man: BlocksManager::new(strategy, glevels),
            size,
        }
    }

    /// Build a vector from a list of bit indices.
    pub fn from_ids(ids: &[u64]) -> Result<Self> {
        let mut bv = BitVector::new();
        bv.set_ids(ids, SortOrder::Unsorted)?;
        Ok(bv)
    }

    #[inline]
    fn check_index(&self, n: u64) -> Result<()> {
        if n >= ID_MAX {
            return Err(Error::IndexOutOfRange {
                index: n,
                max: ID_MAX,
            });
        }
        Ok(())
    }

    #[inline]
    fn check_range(&self, from: u64, to: u64) -> Result<()> {
        if to >= ID_MAX {
            return Err(Error::IndexOutOfRange {
                index: to,
                max: ID_MAX,
            });
        }
        if from > to {
            return Err(Error::ReversedRange {
                left: from,
                right: to,
            });
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Size
    // ------------------------------------------------------------------

    /// The size bound: `test(i)` is false for all `i >= size()`.
    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Change the size bound. Shrinking clears bits at `[new_size..)`.
    pub fn resize(&mut self, new_size: u64) {
        assert!(new_size <= ID_MAX, "size {} exceeds ID_MAX", new_size);
        if new_size < self.size {
            if new_size == 0 {
                self.man.clear();
            } else if let Some(last) = self.find_reverse() {
                if last >= new_size {
                    self.clear_range_no_check(new_size, last);
                }
            }
        }
        self.size = new_size;
    }

    #[inline]
    fn grow_to(&mut self, n: u64) {
        if n >= self.size {
            self.size = n + 1;
        }
    }

    // ------------------------------------------------------------------
    // Single-bit operations
    // ------------------------------------------------------------------

    /// Set bit `n`.
    pub fn set(&mut self, n: u64) -> Result<()> {
        self.set_bit(n, true).map(|_| ())
    }

    /// Assign bit `n` to `value`. Returns true when the bit changed.
    pub fn set_bit(&mut self, n: u64, value: bool) -> Result<bool> {
        self.check_index(n)?;
        let changed = self.set_bit_no_check(n, value);
        if changed && value {
            self.grow_to(n);
        }
        Ok(changed)
    }

    /// Clear bit `n`. Returns true when the bit changed.
    pub fn clear_bit(&mut self, n: u64) -> Result<bool> {
        self.set_bit(n, false)
    }

    /// Flip bit `n`.
    pub fn flip(&mut self, n: u64) -> Result<()> {
        self.check_index(n)?;
        let cur = self.test(n);
        self.set_bit(n, !cur).map(|_| ())
    }

    pub(crate) fn set_bit_no_check(&mut self, n: u64, value: bool) -> bool {
        let (nb, nbit) = split_index(n);
        let cur = self.man.slot(nb).test(nbit);
        if cur == value {
            return false;
        }
        let strategy = self.man.strategy();
        self.man.with_ops(nb, |ops, slot| match slot {
            Slot::Null => match strategy {
                Strategy::Gap => {
                    let mut g = GapBlock::new_zero(0);
                    g.set_bit(nbit, value);
                    *slot = Slot::Gap(g);
                }
                Strategy::Bit => {
                    let mut b = ops.alloc.alloc_bit();
                    b.set_bit(nbit);
                    *slot = Slot::Bit(b);
                }
            },
            Slot::Full => match strategy {
                Strategy::Gap => {
                    let mut g = GapBlock::new_full(0);
                    g.set_bit(nbit, value);
                    *slot = Slot::Gap(g);
                    ops.normalize_gap(slot);
                }
                Strategy::Bit => {
                    ops.deoptimize(slot).assign_bit(nbit, value);
                }
            },
            Slot::Gap(g) => {
                g.set_bit(nbit, value);
                ops.normalize_gap(slot);
            }
            Slot::Bit(b) => {
                b.assign_bit(nbit, value);
            }
        });
        true
    }

    /// Test bit `n`. False for any `n >= size()`.
    #[inline]
    pub fn test(&self, n: u64) -> bool {
        if n >= self.size {
            return false;
        }
        let (nb, nbit) = split_index(n);
        self.man.slot(nb).test(nbit)
    }

    // ------------------------------------------------------------------
    // Counting
    // ------------------------------------------------------------------

    /// Total number of set bits.
    pub fn count(&self) -> u64 {
        self.man.count()
    }

    /// True when any bit is set.
    pub fn any(&self) -> bool {
        self.man.any()
    }

    /// True when no bit is set.
    pub fn none(&self) -> bool {
        !self.any()
    }

    /// Number of set bits in the inclusive range `[from, to]`.
    pub fn count_range(&self, from: u64, to: u64) -> Result<u64> {
        self.check_range(from, to)?;
        let (nb_f, off_f) = split_index(from);
        let (nb_t, off_t) = split_index(to);
        if nb_f == nb_t {
            return Ok(self.man.slot(nb_f).count_range(off_f, off_t) as u64);
        }
        let mut cnt = self.man.slot(nb_f).count_range(off_f, LAST_IN_BLOCK) as u64;
        let mut nb = nb_f + 1;
        while let Some((nbo, slot)) = self.man.next_occupied(nb) {
            if nbo >= nb_t {
                break;
            }
            cnt += slot.count() as u64;
            nb = nbo + 1;
        }
        cnt += self.man.slot(nb_t).count_range(0, off_t) as u64;
        Ok(cnt)
    }

    /// Number of set bits in `[0, n]`, using a prebuilt rank-select index.
    pub fn count_to(&self, n: u64, rs: &RsIndex) -> u64 {
        rs.count_to(self, n)
    }

    /// Like [`BitVector::count_to`], but returns zero immediately when bit
    /// `n` itself is unset.
    pub fn count_to_test(&self, n: u64, rs: &RsIndex) -> u64 {
        if !self.test(n) {
            return 0;
        }
        rs.count_to(self, n)
    }

    /// Accelerated [`BitVector::count_range`] using a rank-select index.
    pub fn count_range_with(&self, from: u64, to: u64, rs: &RsIndex) -> Result<u64> {
        self.check_range(from, to)?;
        let upto = rs.count_to(self, to);
        let before = if from == 0 {
            0
        } else {
            rs.count_to(self, from - 1)
        };
        Ok(upto - before)
    }

    // ------------------------------------------------------------------
    // Search
    // ------------------------------------------------------------------

    /// First set bit at or after `from`.
    pub fn find(&self, from: u64) -> Option<u64> {
        if from >= ID_MAX {
            return None;
        }
        let (nb, nbit) = split_index(from);
        if let Some(pos) = self.man.slot(nb).find_from(nbit) {
            return Some((nb << 16) + pos as u64);
        }
        let mut next = nb + 1;
        while let Some((nbo, slot)) = self.man.next_occupied(next) {
            if let Some(pos) = slot.find_from(0) {
                return Some((nbo << 16) + pos as u64);
            }
            next = nbo + 1;
        }
        None
    }

    /// First set bit of the vector.
    pub fn find_first(&self) -> Option<u64> {
        self.find(0)
    }

    /// Last set bit of the vector (alias of [`BitVector::find_reverse`]).
    pub fn find_last(&self) -> Option<u64> {
        self.find_reverse()
    }

    /// Last set bit of the vector.
    pub fn find_reverse(&self) -> Option<u64> {
        let (mut nb, slot) = self.man.last_occupied()?;
        if let Some(pos) = slot.find_last() {
            return Some((nb << 16) + pos as u64);
        }
        // unoptimized empty tail blocks: walk backwards
        while nb > 0 {
            nb -= 1;
            if let Some(pos) = self.man.slot(nb).find_last() {
                return Some((nb << 16) + pos as u64);
            }
        }
        None
    }

    /// Position of the `rank`-th set bit (1-based) at or after `from`.
    pub fn find_rank(&self, rank: u64, from: u64, rs: &RsIndex) -> Option<u64> {
        rs.find_rank(self, rank, from)
    }

    /// Position of the `rank`-th set bit (1-based) of the whole vector.
    pub fn select(&self, rank: u64, rs: &RsIndex) -> Option<u64> {
        rs.select(self, rank)
    }

    // ------------------------------------------------------------------
    // Ranges
    // ------------------------------------------------------------------

    /// Assign every bit of the inclusive range `[from, to]`.
    pub fn set_range(&mut self, from: u64, to: u64, value: bool) -> Result<()> {
        self.check_range(from, to)?;
        if value {
            self.set_range_no_check(from, to);
            self.grow_to(to);
        } else {
            self.clear_range_no_check(from, to);
        }
        Ok(())
    }

    fn set_range_no_check(&mut self, from: u64, to: u64) {
        self.fill_range(from, to, true);
    }

    pub(crate) fn clear_range_no_check(&mut self, from: u64, to: u64) {
        self.fill_range(from, to, false);
    }

    fn fill_range(&mut self, from: u64, to: u64, value: bool) {
        let (nb_f, off_f) = split_index(from);
        let (nb_t, off_t) = split_index(to);
        if nb_f == nb_t && !(off_f == 0 && off_t == LAST_IN_BLOCK) {
            self.apply_block_range(nb_f, off_f, off_t, value);
            return;
        }
        // block-aligned middle goes through the sentinel-aware bulk path
        let mut mid_from = nb_f;
        let mut mid_to = nb_t;
        if off_f != 0 {
            self.apply_block_range(nb_f, off_f, LAST_IN_BLOCK, value);
            mid_from = nb_f + 1;
        }
        if off_t != LAST_IN_BLOCK {
            self.apply_block_range(nb_t, 0, off_t, value);
            mid_to = nb_t - 1;
        }
        if mid_from <= mid_to {
            if value {
                self.man.set_blocks_one(mid_from, mid_to);
            } else {
                self.man.set_blocks_zero(mid_from, mid_to);
            }
        }
    }

    /// Fill `[from, to]` of one block, keeping the slot form minimal.
    fn apply_block_range(&mut self, nb: u64, from: u32, to: u32, value: bool) {
        // sentinel shortcuts that avoid materialization
        {
            let slot = self.man.slot(nb);
            if value && slot.is_full() {
                return;
            }
            if !value && slot.is_null() {
                return;
            }
        }
        if from == 0 && to == LAST_IN_BLOCK {
            if value {
                self.man.set_blocks_one(nb, nb);
            } else {
                self.man.set_blocks_zero(nb, nb);
            }
            return;
        }
        let range = GapBlock::from_range(from, to);
        self.man.with_ops(nb, |ops, slot| match slot {
            Slot::Null => {
                debug_assert!(value);
                *slot = Slot::Gap(range);
            }
            Slot::Full => {
                debug_assert!(!value);
                let r = gap::gap_sub(&GapBlock::new_full(0), &range);
                *slot = Slot::Gap(r);
                ops.normalize_gap(slot);
            }
            Slot::Gap(g) => {
                let r = if value {
                    gap::gap_or(g, &range)
                } else {
                    gap::gap_sub(g, &range)
                };
                *slot = Slot::Gap(r);
                ops.normalize_gap(slot);
            }
            Slot::Bit(b) => {
                if value {
                    b.set_range(from, to);
                    if b.is_all_one() {
                        *slot = Slot::Full;
                    }
                } else {
                    b.clear_range(from, to);
                    if b.is_all_zero() {
                        ops.free(slot);
                    }
                }
            }
        });
    }

    /// Replace this vector with `src ∩ [from, to]`.
    pub fn copy_range(&mut self, src: &BitVector, from: u64, to: u64) -> Result<()> {
        self.check_range(from, to)?;
        self.man.clear();
        self.size = src.size;
        let (nb_f, off_f) = split_index(from);
        let (nb_t, off_t) = split_index(to);
        let mut nb = nb_f;
        while let Some((nbo, slot)) = src.man.next_occupied(nb) {
            if nbo > nb_t {
                break;
            }
            *self.man.slot_mut(nbo) = slot.clone();
            nb = nbo + 1;
        }
        if off_f > 0 {
            self.apply_block_range(nb_f, 0, off_f - 1, false);
        }
        if off_t < LAST_IN_BLOCK {
            self.apply_block_range(nb_t, off_t + 1, LAST_IN_BLOCK, false);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Set algebra
    // ------------------------------------------------------------------

    /// `self |= other`.
    pub fn bit_or(&mut self, other: &BitVector) {
        self.size = self.size.max(other.size);
        for (nb, src) in other.man.iter_occupied() {
            self.man.with_ops(nb, |ops, dst| ops.or_into(dst, src));
        }
    }

    /// `self &= other`.
    pub fn bit_and(&mut self, other: &BitVector) {
        self.size = self.size.max(other.size);
        let nbs: Vec<u64> = self.man.iter_occupied().map(|(nb, _)| nb).collect();
        for nb in nbs {
            let src = other.man.slot(nb);
            self.man.with_ops(nb, |ops, dst| ops.and_into(dst, src));
        }
    }

    /// `self ^= other`.
    pub fn bit_xor(&mut self, other: &BitVector) {
        self.size = self.size.max(other.size);
        for (nb, src) in other.man.iter_occupied() {
            self.man.with_ops(nb, |ops, dst| ops.xor_into(dst, src));
        }
    }

    /// `self &= !other` (set difference).
    pub fn bit_sub(&mut self, other: &BitVector) {
        self.size = self.size.max(other.size);
        for (nb, src) in other.man.iter_occupied() {
            self.man.with_ops(nb, |ops, dst| ops.sub_into(dst, src));
        }
    }

    /// `self = a | b`.
    pub fn bit_or_of(&mut self, a: &BitVector, b: &BitVector, opt: OptMode) {
        self.assign_of(a, b, opt, |ops, dst, sa, sb, opt| {
            ops.or_of(dst, sa, sb, opt);
        });
    }

    /// `self = a & b`.
    pub fn bit_and_of(&mut self, a: &BitVector, b: &BitVector, opt: OptMode) {
        self.assign_of(a, b, opt, |ops, dst, sa, sb, opt| {
            ops.and_of(dst, sa, sb, opt);
        });
    }

    /// `self = a ^ b`.
    pub fn bit_xor_of(&mut self, a: &BitVector, b: &BitVector, opt: OptMode) {
        self.assign_of(a, b, opt, |ops, dst, sa, sb, opt| {
            ops.xor_of(dst, sa, sb, opt);
        });
    }

    /// `self = a & !b`.
    pub fn bit_sub_of(&mut self, a: &BitVector, b: &BitVector, opt: OptMode) {
        self.assign_of(a, b, opt, |ops, dst, sa, sb, opt| {
            ops.sub_of(dst, sa, sb, opt);
        });
    }

    fn assign_of(
        &mut self,
        a: &BitVector,
        b: &BitVector,
        opt: OptMode,
        f: fn(&crate::block::BlockOps<'_>, &mut Slot, &Slot, &Slot, OptMode),
    ) {
        self.man.clear();
        self.size = a.size.max(b.size);
        // merged walk over both operand trees
        let mut ia = a.man.iter_occupied().peekable();
        let mut ib = b.man.iter_occupied().peekable();
        loop {
            let nb = match (ia.peek(), ib.peek()) {
                (Some(&(na, _)), Some(&(nbn, _))) => na.min(nbn),
                (Some(&(na, _)), None) => na,
                (None, Some(&(nbn, _))) => nbn,
                (None, None) => break,
            };
            if matches!(ia.peek(), Some(&(na, _)) if na == nb) {
                ia.next();
            }
            if matches!(ib.peek(), Some(&(nbn, _)) if nbn == nb) {
                ib.next();
            }
            let sa = a.man.slot(nb);
            let sb = b.man.slot(nb);
            self.man.with_ops(nb, |ops, dst| f(ops, dst, sa, sb, opt));
        }
    }

    /// Complement every bit position below the size bound.
    ///
    /// Materializes top-level sentinels over the whole covered range, so a
    /// vector with the default (maximal) size bound should be resized before
    /// inverting.
    pub fn invert(&mut self) {
        if self.size == 0 {
            return;
        }
        let cover_tops = self.size.div_ceil(SUB_ARRAY_BITS) as usize;
        self.man.ensure_top_len(cover_tops);
        for i in 0..cover_tops {
            self.man.invert_top(i);
        }
        let cover_bits = cover_tops as u64 * SUB_ARRAY_BITS;
        if self.size < cover_bits {
            self.clear_range_no_check(self.size, cover_bits - 1);
        }
    }

    // ------------------------------------------------------------------
    // Shifts
    // ------------------------------------------------------------------

    /// Shift the whole vector one position up (`v[i+1] = v[i]`).
    ///
    /// Returns the bit carried out of the top of the index space.
    pub fn shift_right(&mut self) -> Result<bool> {
        self.insert(0, false)
    }

    /// Shift the whole vector one position down (`v[i] = v[i+1]`).
    ///
    /// Returns the bit shifted out of position 0.
    pub fn shift_left(&mut self) -> Result<bool> {
        let carried = self.test(0);
        self.erase(0)?;
        Ok(carried)
    }

    /// Insert `value` at position `n`, shifting all bits at `[n..)` up by
    /// one. Returns the bit carried out of the top of the index space.
    pub fn insert(&mut self, n: u64, value: bool) -> Result<bool> {
        self.check_index(n)?;
        if self.size < ID_MAX {
            self.size += 1;
        }
        if !self.man.is_init() {
            if value {
                self.set_bit_no_check(n, true);
                self.grow_to(n);
            }
            return Ok(false);
        }

        let (nb, nbit) = split_index(n);
        let mut carry = false;
        let mut nb_cur = nb;

        if n != 0 || value {
            let slot_null = self.man.slot(nb).is_null();
            if !(slot_null && !value) {
                let block = self.man.deoptimize(nb);
                carry = block.insert(nbit, value);
            }
            nb_cur = nb + 1;
        }

        loop {
            let next = self.man.next_occupied(nb_cur).map(|(nbo, _)| nbo);
            match next {
                Some(nbo) => {
                    if carry && nbo > nb_cur {
                        self.set_bit_no_check(nb_cur << 16, true);
                        carry = false;
                    }
                    carry = self.shift_block_r1(nbo, carry);
                    nb_cur = nbo + 1;
                    if nb_cur >= NB_MAX {
                        break;
                    }
                }
                None => {
                    if carry && nb_cur < NB_MAX {
                        self.set_bit_no_check(nb_cur << 16, true);
                        carry = false;
                    }
                    break;
                }
            }
        }
        Ok(carry)
    }

    fn shift_block_r1(&mut self, nb: u64, carry_in: bool) -> bool {
        self.man.with_ops(nb, |ops, slot| match slot {
            Slot::Null => {
                if carry_in {
                    let mut b = ops.alloc.alloc_bit();
                    b.set_bit(0);
                    *slot = Slot::Bit(b);
                }
                false
            }
            Slot::Full => {
                if carry_in {
                    true
                } else {
                    let b = ops.deoptimize(slot);
                    let (_, co) = b.shift_r1(false);
                    co
                }
            }
            Slot::Gap(g) => {
                let co = g.shift_r1(carry_in);
                ops.normalize_gap(slot);
                co
            }
            Slot::Bit(b) => {
                let (any, co) = b.shift_r1(carry_in);
                if !any {
                    ops.free(slot);
                }
                co
            }
        })
    }

    /// Remove position `n`, shifting all bits at `(n..)` down by one.
    ///
    /// The size bound does not shrink; the topmost covered bit reads zero
    /// afterwards.
    pub fn erase(&mut self, n: u64) -> Result<()> {
        self.check_index(n)?;
        if !self.man.is_init() {
            return Ok(());
        }
        let (nb, nbit) = split_index(n);

        let carry = self.test_first_block_bit(nb + 1);
        let slot_null = self.man.slot(nb).is_null();
        let slot_full = self.man.slot(nb).is_full();
        if slot_null {
            if carry {
                self.set_bit_no_check((nb << 16) + LAST_IN_BLOCK as u64, true);
            }
        } else if slot_full && carry {
            // ones shift into ones
        } else {
            let block = self.man.deoptimize(nb);
            block.erase(nbit, carry);
            self.man.with_ops(nb, |ops, slot| {
                if matches!(slot, Slot::Bit(b) if b.is_all_zero()) {
                    ops.free(slot);
                }
            });
        }

        let mut nb_cur = nb + 1;
        loop {
            let Some((nbo, _)) = self.man.next_occupied(nb_cur) else {
                break;
            };
            if nbo > nb_cur {
                // the null block just below an occupied one receives its
                // first bit
                if self.test_first_block_bit(nbo) {
                    self.set_bit_no_check(((nbo - 1) << 16) + LAST_IN_BLOCK as u64, true);
                }
            }
            let carry = self.test_first_block_bit(nbo + 1);
            self.shift_block_l1(nbo, carry);
            nb_cur = nbo + 1;
        }
        Ok(())
    }

    fn shift_block_l1(&mut self, nb: u64, carry_in: bool) {
        self.man.with_ops(nb, |ops, slot| match slot {
            Slot::Null => {
                debug_assert!(!carry_in, "null blocks are skipped by the carry walk");
            }
            Slot::Full => {
                if !carry_in {
                    let b = ops.deoptimize(slot);
                    b.shift_l1(false);
                }
            }
            Slot::Gap(g) => {
                g.shift_l1(carry_in);
                ops.normalize_gap(slot);
            }
            Slot::Bit(b) => {
                let (any, _) = b.shift_l1(carry_in);
                if !any {
                    ops.free(slot);
                }
            }
        });
    }

    fn test_first_block_bit(&self, nb: u64) -> bool {
        if nb >= NB_MAX {
            return false;
        }
        self.man.slot(nb).test(0)
    }

    // ------------------------------------------------------------------
    // Bulk import
    // ------------------------------------------------------------------

    /// Union with the given bit indices.
    ///
    /// With [`SortOrder::Sorted`] the ids must ascend; the import is then a
    /// single partition pass. Any out-of-range id fails the whole call
    /// before modification.
    pub fn set_ids(&mut self, ids: &[u64], order: SortOrder) -> Result<()> {
        if let Some(&bad) = ids.iter().find(|&&id| id >= ID_MAX) {
            return Err(Error::IndexOutOfRange {
                index: bad,
                max: ID_MAX,
            });
        }
        if ids.is_empty() {
            return Ok(());
        }
        match order {
            SortOrder::Sorted => self.import_sorted(ids),
            SortOrder::Unsorted => {
                let mut sorted = ids.to_vec();
                sorted.sort_unstable();
                self.import_sorted(&sorted);
            }
        }
        Ok(())
    }

    /// Intersect with the given bit indices.
    pub fn keep_ids(&mut self, ids: &[u64]) -> Result<()> {
        let mask = BitVector::from_ids(ids)?;
        self.bit_and(&mask);
        Ok(())
    }

    /// Remove the given bit indices.
    pub fn clear_ids(&mut self, ids: &[u64]) -> Result<()> {
        let mask = BitVector::from_ids(ids)?;
        self.bit_sub(&mask);
        Ok(())
    }

    fn import_sorted(&mut self, ids: &[u64]) {
        debug_assert!(!ids.is_empty());
        let mut start = 0;
        while start < ids.len() {
            let stop = idx_arr_block_lookup(ids, start);
            self.set_block_bits(&ids[start..stop]);
            start = stop;
        }
        let last = *ids.last().unwrap();
        self.grow_to(last);
    }

    /// Set a run of ids known to share one block.
    fn set_block_bits(&mut self, ids: &[u64]) {
        let nb = ids[0] >> 16;
        if self.man.slot(nb).is_full() {
            return;
        }
        let block = self.man.deoptimize(nb);
        for &id in ids {
            block.set_bit((id & 0xFFFF) as u32);
        }
    }

    /// A buffering bulk-insert collector for this vector.
    pub fn bulk_inserter(&mut self) -> BulkInserter<'_> {
        BulkInserter {
            bv: self,
            buf: Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Recompress storage and return post-optimization statistics.
    pub fn optimize(&mut self, mode: OptMode) -> Statistics {
        self.man.optimize_tree(mode);
        self.calc_stat()
    }

    /// Gather storage statistics.
    pub fn calc_stat(&self) -> Statistics {
        Statistics::collect(&self.man)
    }

    /// Drop all blocks; the size bound is unchanged.
    pub fn clear(&mut self) {
        self.man.clear();
    }

    /// Swap contents with another vector.
    pub fn swap(&mut self, other: &mut BitVector) {
        core::mem::swap(self, other);
    }

    /// Build a rank-select index over the current contents.
    pub fn build_rs_index(&self) -> RsIndex {
        RsIndex::build(self)
    }

    /// Iterate set bits in ascending order.
    pub fn iter(&self) -> Enumerator<'_> {
        Enumerator::new(self)
    }

    /// Iterate set bits at or after `from` in ascending order.
    pub fn iter_from(&self, from: u64) -> Enumerator<'_> {
        Enumerator::from_position(self, from)
    }

    pub(crate) fn bind_pool(&mut self, pool: Option<Rc<BlockPool>>) -> Option<Rc<BlockPool>> {
        self.man.allocator_mut().bind_pool(pool)
    }
}

impl Default for BitVector {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for BitVector {
    /// Content equality: both vectors hold the same set of bit indices,
    /// regardless of block representation or size bound.
    fn eq(&self, other: &Self) -> bool {
        let mut ia = self.man.iter_occupied().peekable();
        let mut ib = other.man.iter_occupied().peekable();
        loop {
            let nb = match (ia.peek(), ib.peek()) {
                (Some(&(na, _)), Some(&(nbn, _))) => na.min(nbn),
                (Some(&(na, _)), None) => na,
                (None, Some(&(nbn, _))) => nbn,
                (None, None) => return true,
            };
            if matches!(ia.peek(), Some(&(na, _)) if na == nb) {
                ia.next();
            }
            if matches!(ib.peek(), Some(&(nbn, _)) if nbn == nb) {
                ib.next();
            }
            if !slot_content_eq(self.man.slot(nb), other.man.slot(nb)) {
                return false;
            }
        }
    }
}

impl Eq for BitVector {}

impl core::ops::BitOrAssign<&BitVector> for BitVector {
    fn bitor_assign(&mut self, rhs: &BitVector) {
        self.bit_or(rhs);
    }
}

impl core::ops::BitAndAssign<&BitVector> for BitVector {
    fn bitand_assign(&mut self, rhs: &BitVector) {
        self.bit_and(rhs);
    }
}

impl core::ops::BitXorAssign<&BitVector> for BitVector {
    fn bitxor_assign(&mut self, rhs: &BitVector) {
        self.bit_xor(rhs);
    }
}

impl core::ops::SubAssign<&BitVector> for BitVector {
    fn sub_assign(&mut self, rhs: &BitVector) {
        self.bit_sub(rhs);
    }
}

impl<'a> IntoIterator for &'a BitVector {
    type Item = u64;
    type IntoIter = Enumerator<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl core::fmt::Debug for BitVector {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BitVector")
            .field("size", &self.size)
            .field("count", &self.count())
            .finish()
    }
}

/// Semantic per-block equality across representations.
fn slot_content_eq(a: &Slot, b: &Slot) -> bool {
    use Slot::*;
    match (a, b) {
        (Null, x) | (x, Null) => x.count() == 0,
        (Full, x) | (x, Full) => x.count() == BLOCK_BITS as u32,
        (Bit(x), Bit(y)) => x.words() == y.words(),
        (Gap(x), Gap(y)) => x.start_value() == y.start_value() && x.ends() == y.ends(),
        (Bit(_), Gap(g)) | (Gap(g), Bit(_)) => {
            let bit = if matches!(a, Bit(_)) { a } else { b };
            g.runs().all(|(v, lo, hi)| {
                let cnt = bit.count_range(lo, hi);
                if v {
                    cnt == hi - lo + 1
                } else {
                    cnt == 0
                }
            })
        }
    }
}

/// Linear scan for the end of the id run sharing the first id's block.
fn idx_arr_block_lookup(ids: &[u64], from: usize) -> usize {
    let nb = ids[from] >> 16;
    let mut stop = from + 1;
    while stop < ids.len() && ids[stop] >> 16 == nb {
        stop += 1;
    }
    stop
}

/// Buffering bulk-insert collector.
///
/// Buffers up to [`BULK_BUFFER_IDS`] pending ids and flushes them through
/// the sorted import path. The destructor flushes any remainder.
pub struct BulkInserter<'a> {
    bv: &'a mut BitVector,
    buf: Vec<u64>,
}

impl BulkInserter<'_> {
    /// Queue one bit index.
    pub fn add(&mut self, n: u64) -> Result<()> {
        if n >= ID_MAX {
            return Err(Error::IndexOutOfRange {
                index: n,
                max: ID_MAX,
            });
        }
        self.buf.push(n);
        if self.buf.len() >= BULK_BUFFER_IDS {
            self.flush();
        }
        Ok(())
    }

    /// Apply all pending ids.
    pub fn flush(&mut self) {
        if self.buf.is_empty() {
            return;
        }
        self.buf.sort_unstable();
        // ids were validated in add
        let buf = core::mem::take(&mut self.buf);
        self.bv.import_sorted(&buf);
    }
}

impl Drop for BulkInserter<'_> {
    fn drop(&mut self) {
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_test() {
        let mut bv = BitVector::new();
        assert!(!bv.test(5));
        bv.set(5).unwrap();
        assert!(bv.test(5));
        assert!(!bv.test(4));
        assert_eq!(bv.count(), 1);
        assert!(bv.set_bit(5, false).unwrap());
        assert!(bv.none());
    }

    #[test]
    fn test_range_error() {
        let mut bv = BitVector::new();
        assert!(matches!(
            bv.set(ID_MAX),
            Err(Error::IndexOutOfRange { .. })
        ));
        assert!(matches!(
            bv.count_range(9, 3),
            Err(Error::ReversedRange { .. })
        ));
    }

    #[test]
    fn test_cross_block_bits() {
        let mut bv = BitVector::new();
        for n in [0u64, 65_535, 65_536, 1 << 24, (1 << 24) + 1] {
            bv.set(n).unwrap();
        }
        assert_eq!(bv.count(), 5);
        for n in [0u64, 65_535, 65_536, 1 << 24, (1 << 24) + 1] {
            assert!(bv.test(n), "bit {} lost", n);
        }
    }

    #[test]
    fn test_gap_strategy_set() {
        let mut bv = BitVector::with_strategy(Strategy::Gap, GAP_LEVEL_LADDER, ID_MAX);
        bv.set(100).unwrap();
        bv.set(101).unwrap();
        assert_eq!(bv.count(), 2);
        let stat = bv.calc_stat();
        assert_eq!(stat.gap_blocks, 1);
        assert_eq!(stat.bit_blocks, 0);
    }

    #[test]
    fn test_size_grows_on_set() {
        let mut bv = BitVector::with_size(10);
        assert_eq!(bv.size(), 10);
        bv.set(100).unwrap();
        assert_eq!(bv.size(), 101);
        assert!(bv.test(100));
    }

    #[test]
    fn test_test_beyond_size_is_false() {
        let mut bv = BitVector::with_size(100);
        bv.set(50).unwrap();
        assert!(!bv.test(1000));
    }

    #[test]
    fn test_resize_clears() {
        let mut bv = BitVector::with_size(1000);
        bv.set(10).unwrap();
        bv.set(500).unwrap();
        bv.resize(100);
        assert!(bv.test(10));
        assert_eq!(bv.count(), 1);
        assert_eq!(bv.size(), 100);
    }

    #[test]
    fn test_count_range() {
        let mut bv = BitVector::new();
        for n in (0..200_000u64).step_by(1000) {
            bv.set(n).unwrap();
        }
        assert_eq!(bv.count_range(0, 199_999).unwrap(), 200);
        assert_eq!(bv.count_range(0, 999).unwrap(), 1);
        assert_eq!(bv.count_range(1000, 1000).unwrap(), 1);
        assert_eq!(bv.count_range(1001, 1999).unwrap(), 0);
        assert_eq!(bv.count_range(65_000, 67_000).unwrap(), 2);
    }

    #[test]
    fn test_find() {
        let mut bv = BitVector::new();
        bv.set(70_000).unwrap();
        bv.set(2).unwrap();
        assert_eq!(bv.find(0), Some(2));
        assert_eq!(bv.find(2), Some(2));
        assert_eq!(bv.find(3), Some(70_000));
        assert_eq!(bv.find(70_001), None);
        assert_eq!(bv.find_first(), Some(2));
        assert_eq!(bv.find_reverse(), Some(70_000));
    }

    #[test]
    fn test_set_range_and_clear_range() {
        let mut bv = BitVector::new();
        bv.set_range(100, 200_000, true).unwrap();
        assert_eq!(bv.count(), 200_000 - 100 + 1);
        assert!(bv.test(100) && bv.test(200_000));
        assert!(!bv.test(99) && !bv.test(200_001));

        bv.set_range(150_000, 250_000, false).unwrap();
        assert_eq!(bv.count(), 150_000 - 100);
        assert!(bv.test(149_999));
        assert!(!bv.test(150_000));
    }

    #[test]
    fn test_set_range_full_blocks_use_sentinels() {
        let mut bv = BitVector::new();
        bv.set_range(0, SUB_ARRAY_BITS * 2 - 1, true).unwrap();
        let stat = bv.calc_stat();
        // both spans flip at the top level: no real blocks at all
        assert_eq!(stat.bit_blocks, 0);
        assert_eq!(stat.gap_blocks, 0);
        assert_eq!(bv.count(), SUB_ARRAY_BITS * 2);
    }

    #[test]
    fn test_logical_ops() {
        let a = BitVector::from_ids(&[1, 2, 3, 100_000]).unwrap();
        let b = BitVector::from_ids(&[2, 3, 4, 200_000]).unwrap();

        let mut u = a.clone();
        u.bit_or(&b);
        assert_eq!(u.count(), 6);

        let mut i = a.clone();
        i.bit_and(&b);
        assert_eq!(i.count(), 2);
        assert!(i.test(2) && i.test(3));

        let mut x = a.clone();
        x.bit_xor(&b);
        assert_eq!(x.count(), 4);

        let mut s = a.clone();
        s.bit_sub(&b);
        assert_eq!(s.count(), 2);
        assert!(s.test(1) && s.test(100_000));
    }

    #[test]
    fn test_three_operand_ops() {
        let a = BitVector::from_ids(&[1, 2, 3]).unwrap();
        let b = BitVector::from_ids(&[3, 4]).unwrap();

        let mut r = BitVector::new();
        r.bit_or_of(&a, &b, OptMode::Compress);
        assert_eq!(r.count(), 4);

        r.bit_and_of(&a, &b, OptMode::Compress);
        assert_eq!(r.count(), 1);
        assert!(r.test(3));

        r.bit_xor_of(&a, &b, OptMode::Compress);
        assert_eq!(r.count(), 3);

        r.bit_sub_of(&a, &b, OptMode::Compress);
        assert_eq!(r.count(), 2);
    }

    #[test]
    fn test_operator_impls() {
        let a = BitVector::from_ids(&[1, 2]).unwrap();
        let b = BitVector::from_ids(&[2, 3]).unwrap();
        let mut r = a.clone();
        r |= &b;
        assert_eq!(r.count(), 3);
        r &= &a;
        assert_eq!(r, a);
        r ^= &a;
        assert!(r.none());
    }

    #[test]
    fn test_equality_across_forms() {
        let mut a = BitVector::new();
        a.set_range(10, 30, true).unwrap();
        let mut b = a.clone();
        b.optimize(OptMode::Compress);
        assert_eq!(a, b);
        b.set(31).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_invert() {
        let mut bv = BitVector::with_size(1000);
        bv.set(5).unwrap();
        bv.invert();
        assert!(!bv.test(5));
        assert!(bv.test(0) && bv.test(999));
        assert!(!bv.test(1000));
        assert_eq!(bv.count(), 999);
        bv.invert();
        assert_eq!(bv.count(), 1);
        assert!(bv.test(5));
    }

    #[test]
    fn test_insert_and_erase() {
        let mut bv = BitVector::new();
        for &n in &[0u64, 10, 65_535, 65_536, 131_071] {
            bv.set(n).unwrap();
        }
        let carry = bv.insert(0, false).unwrap();
        assert!(!carry);
        let expect: Vec<u64> = vec![1, 11, 65_536, 65_537, 131_072];
        let got: Vec<u64> = bv.iter().collect();
        assert_eq!(got, expect);

        bv.erase(0).unwrap();
        let got: Vec<u64> = bv.iter().collect();
        assert_eq!(got, vec![0, 10, 65_535, 65_536, 131_071]);
    }

    #[test]
    fn test_insert_value_mid_block() {
        let mut bv = BitVector::from_ids(&[100, 200]).unwrap();
        bv.insert(150, true).unwrap();
        let got: Vec<u64> = bv.iter().collect();
        assert_eq!(got, vec![100, 150, 201]);
    }

    #[test]
    fn test_erase_pulls_across_blocks() {
        let mut bv = BitVector::from_ids(&[65_536]).unwrap();
        bv.erase(0).unwrap();
        assert_eq!(bv.iter().collect::<Vec<_>>(), vec![65_535]);
    }

    #[test]
    fn test_shift_left_carry() {
        let mut bv = BitVector::from_ids(&[0, 5]).unwrap();
        let carried = bv.shift_left().unwrap();
        assert!(carried);
        assert_eq!(bv.iter().collect::<Vec<_>>(), vec![4]);
    }

    #[test]
    fn test_set_ids_sorted_and_unsorted() {
        let mut a = BitVector::new();
        a.set_ids(&[1, 5, 70_000, 70_001], SortOrder::Sorted).unwrap();
        let mut b = BitVector::new();
        b.set_ids(&[70_001, 5, 1, 70_000], SortOrder::Unsorted).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.count(), 4);
    }

    #[test]
    fn test_set_ids_range_error_is_atomic() {
        let mut bv = BitVector::new();
        let err = bv.set_ids(&[1, 2, ID_MAX], SortOrder::Sorted);
        assert!(err.is_err());
        assert!(bv.none());
    }

    #[test]
    fn test_keep_and_clear_ids() {
        let mut bv = BitVector::from_ids(&[1, 2, 3, 4, 5]).unwrap();
        bv.keep_ids(&[2, 4, 9]).unwrap();
        assert_eq!(bv.iter().collect::<Vec<_>>(), vec![2, 4]);
        bv.clear_ids(&[4]).unwrap();
        assert_eq!(bv.iter().collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn test_bulk_inserter() {
        let mut bv = BitVector::new();
        {
            let mut ins = bv.bulk_inserter();
            for n in (0..5000u64).rev() {
                ins.add(n * 7).unwrap();
            }
        } // drop flushes
        assert_eq!(bv.count(), 5000);
        assert!(bv.test(0) && bv.test(4999 * 7));
    }

    #[test]
    fn test_copy_range() {
        let src = BitVector::from_ids(&[10, 100, 70_000, 200_000]).unwrap();
        let mut dst = BitVector::new();
        dst.copy_range(&src, 50, 100_000).unwrap();
        assert_eq!(dst.iter().collect::<Vec<_>>(), vec![100, 70_000]);
    }

    #[test]
    fn test_optimize_reports_compression() {
        let mut bv = BitVector::new();
        bv.set_range(0, 127_999, true).unwrap();
        let stat = bv.optimize(OptMode::Compress);
        assert_eq!(bv.count(), 128_000);
        // a solid prefix costs at most a couple of compressed blocks
        assert!(stat.bit_blocks == 0);
        assert!(stat.gap_blocks <= 2);
    }

    #[test]
    fn test_swap() {
        let mut a = BitVector::from_ids(&[1]).unwrap();
        let mut b = BitVector::from_ids(&[2, 3]).unwrap();
        a.swap(&mut b);
        assert_eq!(a.count(), 2);
        assert_eq!(b.count(), 1);
    }
}
