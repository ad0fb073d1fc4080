//! Forward iteration over set bits.
//!
//! The enumerator is an explicit state machine. Inside a bit-block it
//! decodes one 128-bit scan wave at a time into a position buffer and walks
//! the buffer; inside a GAP block it walks runs; full blocks count through
//! positions directly. Crossing block boundaries goes through the block
//! tree's occupied-block scan, so null spans cost nothing.
//!
//! Results are undefined (but memory-safe) if the underlying vector is
//! mutated after construction.

use crate::bitblock::{bitscan_wave, popcount_words, BitBlock};
use crate::bitvec::BitVector;
use crate::block::Slot;
use crate::{split_index, BLOCK_BITS, SCAN_WAVE_BITS, SCAN_WAVE_WORDS};

/// Last bit position inside a block.
const LAST_IN_BLOCK: u32 = BLOCK_BITS as u32 - 1;

/// Number of scan waves per block.
const WAVES_PER_BLOCK: usize = BLOCK_BITS as usize / SCAN_WAVE_BITS;

/// Per-block cursor state.
enum Cursor {
    /// Walking a full block; the in-block position is implied by `pos`.
    Full,
    /// Walking a decoded scan wave of a bit-block.
    Bit {
        /// Current wave index within the block.
        wave: usize,
        /// Decoded in-wave positions.
        buf: [u8; SCAN_WAVE_BITS],
        /// Number of valid entries in `buf`.
        cnt: usize,
        /// Current entry.
        idx: usize,
    },
    /// Walking the runs of a GAP block.
    Gap {
        /// Index of the current (set) run.
        run_idx: usize,
        /// Inclusive end of the current run.
        run_hi: u32,
    },
}

/// Iterator over set bit positions in ascending order.
///
/// # Example
///
/// ```
/// use bitpress::BitVector;
///
/// let bv = BitVector::from_ids(&[3, 70_000]).unwrap();
/// let positions: Vec<u64> = bv.iter().collect();
/// assert_eq!(positions, vec![3, 70_000]);
/// ```
pub struct Enumerator<'a> {
    bv: &'a BitVector,
    /// Current bit position; meaningful only while `valid`.
    pos: u64,
    /// Current block number.
    nb: u64,
    cursor: Cursor,
    valid: bool,
}

impl<'a> Enumerator<'a> {
    /// Position on the first set bit.
    pub(crate) fn new(bv: &'a BitVector) -> Self {
        Self::from_position(bv, 0)
    }

    /// Position on the first set bit at or after `from`.
    pub(crate) fn from_position(bv: &'a BitVector, from: u64) -> Self {
        let mut e = Enumerator {
            bv,
            pos: 0,
            nb: 0,
            cursor: Cursor::Full,
            valid: false,
        };
        if from < crate::ID_MAX {
            e.seek(from);
        }
        e
    }

    /// True while the enumerator points at a set bit.
    #[inline]
    pub fn valid(&self) -> bool {
        self.valid
    }

    /// The current bit position.
    ///
    /// # Panics
    ///
    /// Panics when the enumerator is exhausted.
    #[inline]
    pub fn value(&self) -> u64 {
        assert!(self.valid, "enumerator exhausted");
        self.pos
    }

    /// Reposition to the first set bit at or after `n`.
    pub fn go_to(&mut self, n: u64) {
        if n >= crate::ID_MAX {
            self.valid = false;
            return;
        }
        self.seek(n);
    }

    fn seek(&mut self, from: u64) {
        let (nb, nbit) = split_index(from);
        let mut nb_cur = nb;
        let mut start = nbit;
        loop {
            let Some((nbo, slot)) = self.bv.man.next_occupied(nb_cur) else {
                self.valid = false;
                return;
            };
            if nbo > nb_cur {
                start = 0;
            }
            if self.enter_block(nbo, slot, start) {
                return;
            }
            nb_cur = nbo + 1;
            start = 0;
        }
    }

    /// Initialize the cursor inside `slot` at the first set bit `>= start`.
    fn enter_block(&mut self, nb: u64, slot: &Slot, start: u32) -> bool {
        match slot {
            Slot::Null => false,
            Slot::Full => {
                self.nb = nb;
                self.pos = (nb << 16) + start as u64;
                self.cursor = Cursor::Full;
                self.valid = true;
                true
            }
            Slot::Gap(g) => {
                let Some(pos) = g.find_from(start) else {
                    return false;
                };
                let run_idx = g.run_index(pos);
                let (_, run_hi) = g.run_bounds(run_idx);
                self.nb = nb;
                self.pos = (nb << 16) + pos as u64;
                self.cursor = Cursor::Gap { run_idx, run_hi };
                self.valid = true;
                true
            }
            Slot::Bit(b) => {
                let Some((pos, wave, buf, cnt, idx)) = bit_wave_from(b, start) else {
                    return false;
                };
                self.nb = nb;
                self.pos = (nb << 16) + pos as u64;
                self.cursor = Cursor::Bit {
                    wave,
                    buf,
                    cnt,
                    idx,
                };
                self.valid = true;
                true
            }
        }
    }

    /// Move to the next set bit after the current block is exhausted.
    fn next_block(&mut self) {
        let nb = self.nb + 1;
        self.valid = false;
        let mut nb_cur = nb;
        while let Some((nbo, slot)) = self.bv.man.next_occupied(nb_cur) {
            if self.enter_block(nbo, slot, 0) {
                return;
            }
            nb_cur = nbo + 1;
        }
    }

    /// Advance to the next set bit.
    fn advance(&mut self) {
        debug_assert!(self.valid);
        match &mut self.cursor {
            Cursor::Full => {
                if (self.pos & 0xFFFF) as u32 == LAST_IN_BLOCK {
                    self.next_block();
                } else {
                    self.pos += 1;
                }
            }
            Cursor::Gap { run_idx, run_hi } => {
                let nbit = (self.pos & 0xFFFF) as u32;
                if nbit < *run_hi {
                    self.pos += 1;
                    return;
                }
                // hop to the next set run (set runs alternate)
                let Slot::Gap(g) = self.bv.man.slot(self.nb) else {
                    self.next_block();
                    return;
                };
                let next_idx = *run_idx + 2;
                if next_idx >= g.len() {
                    self.next_block();
                    return;
                }
                let (lo, hi) = g.run_bounds(next_idx);
                *run_idx = next_idx;
                *run_hi = hi;
                self.pos = (self.nb << 16) + lo as u64;
            }
            Cursor::Bit {
                wave,
                buf,
                cnt,
                idx,
            } => {
                if *idx + 1 < *cnt {
                    *idx += 1;
                    let base = (*wave * SCAN_WAVE_BITS) as u64;
                    self.pos = (self.nb << 16) + base + buf[*idx] as u64;
                    return;
                }
                // decode the next non-empty wave
                let Slot::Bit(b) = self.bv.man.slot(self.nb) else {
                    self.next_block();
                    return;
                };
                let mut w = *wave + 1;
                while w < WAVES_PER_BLOCK {
                    let words = &b.words()[w * SCAN_WAVE_WORDS..(w + 1) * SCAN_WAVE_WORDS];
                    let n = bitscan_wave(words, buf);
                    if n > 0 {
                        *wave = w;
                        *cnt = n;
                        *idx = 0;
                        let base = (w * SCAN_WAVE_BITS) as u64;
                        self.pos = (self.nb << 16) + base + buf[0] as u64;
                        return;
                    }
                    w += 1;
                }
                self.next_block();
            }
        }
    }

    /// Advance past `k` additional set bits.
    ///
    /// Whole scan waves are skipped by popcount; only the wave containing
    /// the destination is decoded.
    pub fn skip(&mut self, mut k: u64) {
        while self.valid && k > 0 {
            match &mut self.cursor {
                Cursor::Full => {
                    let nbit = (self.pos & 0xFFFF) as u32;
                    let room = (LAST_IN_BLOCK - nbit) as u64;
                    if k <= room {
                        self.pos += k;
                        return;
                    }
                    k -= room + 1;
                    self.next_block();
                }
                Cursor::Gap { run_idx, run_hi } => {
                    let nbit = (self.pos & 0xFFFF) as u32;
                    let room = (*run_hi - nbit) as u64;
                    if k <= room {
                        self.pos += k;
                        return;
                    }
                    k -= room;
                    let Slot::Gap(g) = self.bv.man.slot(self.nb) else {
                        unreachable!("gap cursor over non-gap slot");
                    };
                    let next_idx = *run_idx + 2;
                    if next_idx >= g.len() {
                        k -= 1;
                        self.next_block();
                    } else {
                        let (lo, hi) = g.run_bounds(next_idx);
                        *run_idx = next_idx;
                        *run_hi = hi;
                        self.pos = (self.nb << 16) + lo as u64;
                        k -= 1;
                    }
                }
                Cursor::Bit {
                    wave,
                    buf,
                    cnt,
                    idx,
                } => {
                    let rest = (*cnt - *idx - 1) as u64;
                    if k <= rest {
                        *idx += k as usize;
                        let base = (*wave * SCAN_WAVE_BITS) as u64;
                        self.pos = (self.nb << 16) + base + buf[*idx] as u64;
                        return;
                    }
                    k -= rest;
                    let Slot::Bit(b) = self.bv.man.slot(self.nb) else {
                        unreachable!("bit cursor over non-bit slot");
                    };
                    let mut w = *wave + 1;
                    let mut found = false;
                    while w < WAVES_PER_BLOCK {
                        let words = &b.words()[w * SCAN_WAVE_WORDS..(w + 1) * SCAN_WAVE_WORDS];
                        let pop = popcount_words(words) as u64;
                        if pop >= k {
                            let n = bitscan_wave(words, buf);
                            *wave = w;
                            *cnt = n;
                            *idx = (k - 1) as usize;
                            let base = (w * SCAN_WAVE_BITS) as u64;
                            self.pos = (self.nb << 16) + base + buf[*idx] as u64;
                            found = true;
                            break;
                        }
                        k -= pop;
                        w += 1;
                    }
                    if found {
                        return;
                    }
                    k -= 1;
                    self.next_block();
                }
            }
        }
    }
}

/// Decode the wave containing the first set bit `>= from` of a bit-block.
fn bit_wave_from(
    block: &BitBlock,
    from: u32,
) -> Option<(u32, usize, [u8; SCAN_WAVE_BITS], usize, usize)> {
    let mut buf = [0u8; SCAN_WAVE_BITS];
    let mut wave = from as usize / SCAN_WAVE_BITS;
    let mut min_bit = from;
    while wave < WAVES_PER_BLOCK {
        let words = &block.words()[wave * SCAN_WAVE_WORDS..(wave + 1) * SCAN_WAVE_WORDS];
        let cnt = bitscan_wave(words, &mut buf);
        if cnt > 0 {
            let base = (wave * SCAN_WAVE_BITS) as u32;
            if let Some(idx) = (0..cnt).find(|&i| base + buf[i] as u32 >= min_bit) {
                return Some((base + buf[idx] as u32, wave, buf, cnt, idx));
            }
        }
        wave += 1;
        min_bit = 0;
    }
    None
}

impl Iterator for Enumerator<'_> {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        if !self.valid {
            return None;
        }
        let cur = self.pos;
        self.advance();
        Some(cur)
    }
}

impl core::iter::FusedIterator for Enumerator<'_> {}
