//! Property-based tests for the compressed bit-vector engine.

use std::collections::BTreeSet;

use bitpress::{BitVector, OptMode, RefVector, SortOrder, XorScanner};
use proptest::prelude::*;

/// Universe for randomized ids: a few blocks plus both block borders.
const UNIVERSE: u64 = 300_000;

/// Size bound used by complement-sensitive properties.
const SIZE: u64 = 320_000;

fn ids_strategy() -> impl Strategy<Value = Vec<u64>> {
    prop::collection::vec(0u64..UNIVERSE, 0..300)
}

fn vector_of(ids: &[u64]) -> BitVector {
    let mut bv = BitVector::with_size(SIZE);
    bv.set_ids(ids, SortOrder::Unsorted).unwrap();
    bv
}

fn model_of(ids: &[u64]) -> BTreeSet<u64> {
    ids.iter().copied().collect()
}

proptest! {
    /// a | b == b | a and a & b == b & a
    #[test]
    fn prop_commutativity(a in ids_strategy(), b in ids_strategy()) {
        let (va, vb) = (vector_of(&a), vector_of(&b));

        let mut ab = va.clone();
        ab.bit_or(&vb);
        let mut ba = vb.clone();
        ba.bit_or(&va);
        prop_assert_eq!(&ab, &ba);

        let mut ab = va.clone();
        ab.bit_and(&vb);
        let mut ba = vb.clone();
        ba.bit_and(&va);
        prop_assert_eq!(&ab, &ba);
    }

    /// a | (b & c) == (a | b) & (a | c)
    #[test]
    fn prop_or_distributes_over_and(
        a in ids_strategy(),
        b in ids_strategy(),
        c in ids_strategy(),
    ) {
        let (va, vb, vc) = (vector_of(&a), vector_of(&b), vector_of(&c));

        let mut lhs = vb.clone();
        lhs.bit_and(&vc);
        lhs.bit_or(&va);

        let mut ab = va.clone();
        ab.bit_or(&vb);
        let mut ac = va.clone();
        ac.bit_or(&vc);
        ab.bit_and(&ac);

        prop_assert_eq!(&lhs, &ab);
    }

    /// a \ b == a & !b within the size bound
    #[test]
    fn prop_sub_is_and_not(a in ids_strategy(), b in ids_strategy()) {
        let (va, vb) = (vector_of(&a), vector_of(&b));

        let mut sub = va.clone();
        sub.bit_sub(&vb);

        let mut not_b = vb.clone();
        not_b.invert();
        let mut and_not = va.clone();
        and_not.bit_and(&not_b);

        prop_assert_eq!(&sub, &and_not);
    }

    /// !!a == a
    #[test]
    fn prop_double_complement(a in ids_strategy()) {
        let va = vector_of(&a);
        let mut inv = va.clone();
        inv.invert();
        inv.invert();
        prop_assert_eq!(&inv, &va);
    }

    /// count(a | b) + count(a & b) == count(a) + count(b)
    #[test]
    fn prop_inclusion_exclusion(a in ids_strategy(), b in ids_strategy()) {
        let (va, vb) = (vector_of(&a), vector_of(&b));
        let mut or = va.clone();
        or.bit_or(&vb);
        let mut and = va.clone();
        and.bit_and(&vb);
        prop_assert_eq!(or.count() + and.count(), va.count() + vb.count());
    }

    /// The enumerator yields exactly the model's elements, ascending.
    #[test]
    fn prop_enumeration_matches_model(a in ids_strategy()) {
        let va = vector_of(&a);
        let model = model_of(&a);

        let got: Vec<u64> = va.iter().collect();
        prop_assert!(got.windows(2).all(|w| w[0] < w[1]), "not strictly ascending");
        let expect: Vec<u64> = model.iter().copied().collect();
        prop_assert_eq!(got, expect);
        prop_assert_eq!(va.count(), model.len() as u64);
    }

    /// test() agrees with the model at and around every element.
    #[test]
    fn prop_test_matches_model(a in ids_strategy()) {
        let va = vector_of(&a);
        let model = model_of(&a);
        for &id in model.iter() {
            prop_assert!(va.test(id));
            if id > 0 {
                prop_assert_eq!(va.test(id - 1), model.contains(&(id - 1)));
            }
            prop_assert_eq!(va.test(id + 1), model.contains(&(id + 1)));
        }
    }

    /// rank(select(r)) == r for every rank; select(rank(n)) == n on set bits.
    #[test]
    fn prop_rank_select_inverse(a in ids_strategy()) {
        let va = vector_of(&a);
        let rs = va.build_rs_index();
        let total = va.count();
        prop_assert_eq!(rs.count(), total);

        for r in 1..=total {
            let pos = va.select(r, &rs);
            prop_assert!(pos.is_some(), "select({}) of {}", r, total);
            let pos = pos.unwrap();
            prop_assert_eq!(va.count_to(pos, &rs), r, "rank(select({}))", r);
        }
        prop_assert_eq!(va.select(total + 1, &rs), None);

        for &id in model_of(&a).iter() {
            let r = va.count_to(id, &rs);
            prop_assert_eq!(va.select(r, &rs), Some(id));
        }
    }

    /// count_range(a, b) == count_to(b) - count_to(a - 1)
    #[test]
    fn prop_range_count(
        a in ids_strategy(),
        lo in 0u64..UNIVERSE,
        span in 0u64..100_000,
    ) {
        let va = vector_of(&a);
        let rs = va.build_rs_index();
        let hi = (lo + span).min(SIZE - 1);

        let range = va.count_range(lo, hi).unwrap();
        let expect = va.count_to(hi, &rs)
            - if lo > 0 { va.count_to(lo - 1, &rs) } else { 0 };
        prop_assert_eq!(range, expect);
        prop_assert_eq!(va.count_range_with(lo, hi, &rs).unwrap(), expect);
    }

    /// erase(0) then insert(0, x) restores the vector.
    #[test]
    fn prop_shift_round_trip(a in ids_strategy()) {
        let va = vector_of(&a);
        let mut v = va.clone();
        let x = v.test(0);
        v.erase(0).unwrap();
        v.insert(0, x).unwrap();
        prop_assert_eq!(&v, &va);
    }

    /// insert(n, v): bits at and above n move up one; bit n becomes v.
    #[test]
    fn prop_insert_consistency(
        a in ids_strategy(),
        n in 0u64..UNIVERSE,
        v in any::<bool>(),
    ) {
        let va = vector_of(&a);
        let model = model_of(&a);
        let mut ins = va.clone();
        ins.insert(n, v).unwrap();

        let mut expect: BTreeSet<u64> =
            model.iter().map(|&p| if p >= n { p + 1 } else { p }).collect();
        if v {
            expect.insert(n);
        }
        let got: Vec<u64> = ins.iter().collect();
        let expect: Vec<u64> = expect.into_iter().collect();
        prop_assert_eq!(got, expect);
        prop_assert_eq!(ins.test(n), v);
        prop_assert_eq!(ins.count(), va.count() + v as u64);
    }

    /// erase(n) pulls bits above n down one and drops bit n.
    #[test]
    fn prop_erase_consistency(a in ids_strategy(), n in 0u64..UNIVERSE) {
        let va = vector_of(&a);
        let model = model_of(&a);
        let mut er = va.clone();
        er.erase(n).unwrap();

        let expect: Vec<u64> = model
            .iter()
            .filter(|&&p| p != n)
            .map(|&p| if p > n { p - 1 } else { p })
            .collect();
        let got: Vec<u64> = er.iter().collect();
        prop_assert_eq!(got, expect);
    }

    /// optimize is idempotent and preserves content.
    #[test]
    fn prop_optimize_idempotent(a in ids_strategy()) {
        let va = vector_of(&a);
        let mut once = va.clone();
        let stat_once = once.optimize(OptMode::Compress);
        prop_assert_eq!(&once, &va);

        let mut twice = once.clone();
        let stat_twice = twice.optimize(OptMode::Compress);
        prop_assert_eq!(&twice, &once);
        prop_assert_eq!(stat_once, stat_twice);
        prop_assert_eq!(once.count(), va.count());
    }

    /// Accepted XOR references never increase the block's best metric.
    #[test]
    fn prop_xor_scanner_safety(
        a in prop::collection::vec(0u64..65_536, 1..200),
        flips in prop::collection::vec(0u64..65_536, 0..20),
    ) {
        let target = {
            let mut bv = BitVector::new();
            bv.set_ids(&a, SortOrder::Unsorted).unwrap();
            bv
        };
        let mut candidate = target.clone();
        for &f in &flips {
            let cur = candidate.test(f);
            candidate.set_bit(f, !cur).unwrap();
        }

        let mut refs = RefVector::new();
        refs.add(&candidate, 0);
        let mut scanner = XorScanner::new(&refs);
        if let Some(res) = scanner.search(&target, 0) {
            prop_assert!(res.best_metric <= scanner.target_best_metric());
            if res.match_type == bitpress::XorMatch::Eq {
                prop_assert_eq!(&target, &candidate);
            }
        }
    }
}
