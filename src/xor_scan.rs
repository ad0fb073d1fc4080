//! XOR similarity scanning.
//!
//! Serializers can store a block as the XOR of the block with a "reference"
//! block from another vector whenever that product compresses better than
//! the original. The scanner owns the metric logic: per block it evaluates
//! the three compression metrics — gap count (GC), bit count (BC) and
//! inverse bit count (iBC) — and searches a pool of reference vectors for
//! the candidate block whose XOR product yields the best per-wave gain.
//!
//! The scanner never mutates reference vectors; it owns one scratch block
//! for product evaluation.

#[cfg(not(test))]
use alloc::vec::Vec;

use alloc::boxed::Box;

use crate::bitblock::BitBlock;
use crate::bitvec::BitVector;
use crate::block::Slot;
use crate::gap::{self, GapBlock};
use crate::{BLOCK_BITS, BLOCK_WAVES, DIGEST_WAVE_WORDS};

/// Bits per digest wave.
const WAVE_BITS: u32 = (DIGEST_WAVE_WORDS * 32) as u32;

/// Serialization cost of one XOR reference: token byte, 64-bit digest and
/// a 32-bit reference id, in bits.
const REF_OVERHEAD_BITS: u32 = (1 + 8 + 4) * 8;

/// Estimated serialized bits per metric unit at the highest compression
/// level.
const BITS_PER_METRIC_UNIT: u32 = 3;

/// Which compression metric an XOR match improves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum XorMatch {
    /// Gap-count improvement.
    Gc,
    /// Bit-count improvement.
    Bc,
    /// Inverse-bit-count improvement.
    IBc,
    /// The reference block is bit-identical over the operated waves.
    Eq,
}

/// A successful reference search.
#[derive(Clone, Copy, Debug)]
pub struct XorSearchResult {
    /// Winning metric kind.
    pub match_type: XorMatch,
    /// Index of the winning vector in the reference list.
    pub ref_idx: usize,
    /// External row id of the winning vector.
    pub row: u64,
    /// Digest of waves the XOR applies to (one bit per 1024-bit wave).
    pub digest: u64,
    /// Best metric value of the XOR product.
    pub best_metric: u32,
}

/// List of reference bit-vectors with their external row associations.
#[derive(Default)]
pub struct RefVector<'a> {
    refs: Vec<(&'a BitVector, u64)>,
}

impl<'a> RefVector<'a> {
    pub fn new() -> Self {
        RefVector { refs: Vec::new() }
    }

    /// Add a reference vector under an external row id.
    pub fn add(&mut self, bv: &'a BitVector, row: u64) {
        self.refs.push((bv, row));
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    /// Reference vector by list index.
    pub fn get(&self, idx: usize) -> &'a BitVector {
        self.refs[idx].0
    }

    /// External row id by list index.
    pub fn row(&self, idx: usize) -> u64 {
        self.refs[idx].1
    }

    /// Find the list index of an external row id.
    pub fn find_row(&self, row: u64) -> Option<usize> {
        self.refs.iter().position(|&(_, r)| r == row)
    }
}

/// Per-wave complexity descriptor of a target block and its XOR products.
#[derive(Clone)]
struct WavesDescr {
    sb_gc: [u16; BLOCK_WAVES],
    sb_bc: [u16; BLOCK_WAVES],
    sb_xor_gc: [u16; BLOCK_WAVES],
    sb_xor_bc: [u16; BLOCK_WAVES],
}

impl Default for WavesDescr {
    fn default() -> Self {
        WavesDescr {
            sb_gc: [0; BLOCK_WAVES],
            sb_bc: [0; BLOCK_WAVES],
            sb_xor_gc: [0; BLOCK_WAVES],
            sb_xor_bc: [0; BLOCK_WAVES],
        }
    }
}

/// Scanner for complement similarities in a pool of reference vectors.
pub struct XorScanner<'a> {
    refs: &'a RefVector<'a>,
    descr: WavesDescr,
    /// Target block bit count.
    x_bc: u32,
    /// Target block gap count.
    x_gc: u32,
    /// Target block best metric before any XOR.
    x_block_best: u32,
    tmp: Box<BitBlock>,
}

impl<'a> XorScanner<'a> {
    pub fn new(refs: &'a RefVector<'a>) -> Self {
        XorScanner {
            refs,
            descr: WavesDescr::default(),
            x_bc: 0,
            x_gc: 0,
            x_block_best: 0,
            tmp: BitBlock::new_boxed(),
        }
    }

    /// Target block bit count from the last search.
    pub fn target_bc(&self) -> u32 {
        self.x_bc
    }

    /// Target block gap count from the last search.
    pub fn target_gc(&self) -> u32 {
        self.x_gc
    }

    /// Target block best metric before any XOR.
    pub fn target_best_metric(&self) -> u32 {
        self.x_block_best
    }

    /// Search the reference pool for the block at `nb` of `target`.
    ///
    /// Bit-block targets are matched against bit-block candidates, GAP
    /// targets against GAP candidates. Returns `None` when no reference
    /// beats the target's own best metric by more than the per-reference
    /// bookkeeping overhead.
    pub fn search(&mut self, target: &BitVector, nb: u64) -> Option<XorSearchResult> {
        match target.man.slot(nb) {
            Slot::Bit(b) => self.search_bit(target, b, nb),
            Slot::Gap(g) => self.search_gap(target, g, nb),
            Slot::Null | Slot::Full => None,
        }
    }

    // ------------------------------------------------------------------
    // Bit-block path
    // ------------------------------------------------------------------

    /// Phase 1: establish the base metric of the target alone.
    fn compute_block_stats(&mut self, block: &BitBlock) {
        for i in 0..BLOCK_WAVES {
            let (gc, bc) = block.wave_change_and_count(i);
            self.descr.sb_gc[i] = gc as u16;
            self.descr.sb_bc[i] = bc as u16;
        }
        let (gc, bc) = block.change_and_bit_count();
        self.x_gc = gc;
        self.x_bc = bc;
        let (_, best) = best_metric(bc, gc);
        self.x_block_best = best;
    }

    fn search_bit(
        &mut self,
        target: &BitVector,
        block: &BitBlock,
        nb: u64,
    ) -> Option<XorSearchResult> {
        if self.refs.is_empty() {
            return None;
        }
        self.compute_block_stats(block);

        let mut best_gain = 0u32;
        let mut best_ri = None;
        let mut best_digest = 0u64;

        for ri in 0..self.refs.len() {
            let rv = self.refs.get(ri);
            if core::ptr::eq(rv, target) {
                continue;
            }
            let Slot::Bit(cand) = rv.man.slot(nb) else {
                continue;
            };
            let (digest, gain) = self.xor_complexity(block, cand);
            if digest != 0 && gain > best_gain {
                best_gain = gain;
                best_ri = Some(ri);
                best_digest = digest;
                if gain >= BLOCK_BITS as u32 {
                    break;
                }
            }
        }

        let ri = best_ri?;
        let Slot::Bit(cand) = self.refs.get(ri).man.slot(nb) else {
            return None;
        };

        // validate the winner on the actual product
        self.tmp.xor_masked_of(block, cand, best_digest);
        let (xor_gc, xor_bc) = self.tmp.change_and_bit_count();

        if xor_bc == 0 {
            // completely cancelled over the operated waves
            let match_type = if block.words() == cand.words() {
                XorMatch::Eq
            } else {
                XorMatch::Bc
            };
            return Some(XorSearchResult {
                match_type,
                ref_idx: ri,
                row: self.refs.row(ri),
                digest: best_digest,
                best_metric: 0,
            });
        }

        let (mtype, xor_best) = best_metric(xor_bc, xor_gc);
        let bie_limit = BLOCK_BITS as u32 / BITS_PER_METRIC_UNIT;
        if xor_best >= self.x_block_best || xor_best >= bie_limit {
            return None;
        }
        let gain = (self.x_block_best - xor_best) * BITS_PER_METRIC_UNIT;
        if gain <= REF_OVERHEAD_BITS {
            return None;
        }
        Some(XorSearchResult {
            match_type: mtype,
            ref_idx: ri,
            row: self.refs.row(ri),
            digest: best_digest,
            best_metric: xor_best,
        })
    }

    /// Phase 2 for one candidate: per-wave XOR descriptors, then the three
    /// gain accumulators and their digests.
    fn xor_complexity(&mut self, block: &BitBlock, cand: &BitBlock) -> (u64, u32) {
        // waves where the target is uniformly zero need no consideration
        let d0 = !block.digest0();

        for i in 0..BLOCK_WAVES {
            let (gc, bc) = block.xor_change_wave(cand, i);
            self.descr.sb_xor_gc[i] = gc as u16;
            self.descr.sb_xor_bc[i] = bc as u16;
        }

        let mut gc_gain = 0u32;
        let mut bc_gain = 0u32;
        let mut ibc_gain = 0u32;
        let mut gc_digest = 0u64;
        let mut bc_digest = 0u64;
        let mut ibc_digest = 0u64;

        for i in 0..BLOCK_WAVES {
            let dmask = 1u64 << i;
            if d0 & dmask != 0 {
                continue;
            }
            let xor_gc = self.descr.sb_xor_gc[i] as u32;
            let sb_gc = self.descr.sb_gc[i] as u32;
            if xor_gc <= 1 {
                gc_digest |= dmask;
                gc_gain += sb_gc;
            } else if xor_gc < sb_gc {
                gc_digest |= dmask;
                gc_gain += sb_gc - xor_gc;
            }

            let xor_bc = self.descr.sb_xor_bc[i] as u32;
            let sb_bc = self.descr.sb_bc[i] as u32;
            if xor_bc < sb_bc {
                bc_digest |= dmask;
                bc_gain += sb_bc - xor_bc;
            }

            let xor_ibc = WAVE_BITS - xor_bc;
            let wave_ibc = WAVE_BITS - sb_bc;
            if xor_ibc < wave_ibc {
                ibc_digest |= dmask;
                ibc_gain += wave_ibc - xor_ibc;
            }
        }

        if gc_gain == 0 && bc_gain == 0 && ibc_gain == 0 {
            // no per-wave gain; identical zero-wave layout still makes the
            // candidate usable as a whole-block mask
            let d0_x = !cand.digest0();
            if d0 == d0_x && d0 != u64::MAX {
                return (!d0, BLOCK_WAVES as u32);
            }
            return (0, 0);
        }

        if gc_gain > bc_gain && gc_gain > ibc_gain {
            (gc_digest, gc_gain)
        } else if bc_gain >= gc_gain && bc_gain > ibc_gain {
            (bc_digest, bc_gain)
        } else {
            (ibc_digest, ibc_gain)
        }
    }

    // ------------------------------------------------------------------
    // GAP path
    // ------------------------------------------------------------------

    /// GAP targets are matched only against GAP candidates; the metric is
    /// `min(run_count, popcount)` of the GAP-XOR product and improvements
    /// below three units are rejected.
    fn search_gap(
        &mut self,
        target: &BitVector,
        g: &GapBlock,
        nb: u64,
    ) -> Option<XorSearchResult> {
        if g.len() <= 3 {
            return None;
        }
        let bc = g.count();
        self.x_gc = g.len() as u32;
        self.x_bc = bc;
        let mut best_metric = (g.len() as u32).min(bc);
        self.x_block_best = best_metric;

        let mut found: Option<XorSearchResult> = None;
        for ri in 0..self.refs.len() {
            let rv = self.refs.get(ri);
            if core::ptr::eq(rv, target) {
                continue;
            }
            let Slot::Gap(cand) = rv.man.slot(nb) else {
                continue;
            };
            if cand.len() <= 3 {
                continue;
            }
            let product = gap::gap_xor(g, cand);
            let res_len = product.len() as u32;
            let res_bc = product.count();

            if res_bc == 0 {
                // identical GAP content
                return Some(XorSearchResult {
                    match_type: XorMatch::Eq,
                    ref_idx: ri,
                    row: self.refs.row(ri),
                    digest: 0,
                    best_metric: 0,
                });
            }
            let res_ibc = BLOCK_BITS as u32 - res_bc;
            for (metric, mtype) in [
                (res_len, XorMatch::Gc),
                (res_bc, XorMatch::Bc),
                (res_ibc, XorMatch::IBc),
            ] {
                if metric < best_metric && best_metric - metric > 2 {
                    best_metric = metric;
                    found = Some(XorSearchResult {
                        match_type: mtype,
                        ref_idx: ri,
                        row: self.refs.row(ri),
                        digest: 0,
                        best_metric: metric,
                    });
                }
            }
            if best_metric <= 1 {
                break;
            }
        }
        found
    }
}


/// GC/BC/iBC triage for a whole block: the smaller metric wins, iBC breaks
/// towards dense blocks.
fn best_metric(bc: u32, gc: u32) -> (XorMatch, u32) {
    let ibc = BLOCK_BITS as u32 - bc;
    if ibc == 0 {
        return (XorMatch::Gc, gc);
    }
    if gc < bc {
        if gc < ibc {
            return (XorMatch::Gc, gc);
        }
    } else if bc < ibc {
        return (XorMatch::Bc, bc);
    }
    (XorMatch::IBc, ibc)
}
