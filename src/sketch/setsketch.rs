//! Register set sketches: the full (every-register) variant and the
//! one-permutation (single-bucket) variant.

use std::collections::HashMap;

use super::{exp_draw, reg_stream, register_race};
use crate::RegT;

/// A set sketch updating every register per admitted item.
///
/// Slower per update than [`OnePermSetSketch`] but robust on small inputs.
/// Optionally tracks, per register, the m-mer id owning the minimum and its
/// observation count.
#[derive(Debug, Clone)]
pub struct FullSetSketch {
    regs: Vec<RegT>,
    ids: Option<Vec<u64>>,
    idcounts: Option<Vec<u32>>,
}

impl FullSetSketch {
    pub fn new(sketchsize: usize, save_ids: bool, save_counts: bool) -> Self {
        FullSetSketch {
            // Counting needs the owning id to detect repeats, so ids ride
            // along whenever counts are tracked.
            ids: (save_ids || save_counts).then(|| vec![0; sketchsize]),
            idcounts: save_counts.then(|| vec![0; sketchsize]),
            regs: vec![RegT::INFINITY; sketchsize],
        }
    }

    pub fn update(&mut self, h: u64) {
        self.update_weighted(h, 1.0);
    }

    /// Admit `h` with multiplicity weight `w` (rate-scaled variates).
    pub fn update_weighted(&mut self, h: u64, w: f64) {
        register_race(
            &mut self.regs,
            self.ids.as_deref_mut(),
            self.idcounts.as_deref_mut(),
            h,
            w,
            w as u32,
        );
    }

    pub fn data(&self) -> &[RegT] {
        &self.regs
    }

    pub fn ids(&self) -> Option<&[u64]> {
        self.ids.as_deref()
    }

    pub fn idcounts(&self) -> Option<&[u32]> {
        self.idcounts.as_deref()
    }

    /// Cardinality estimate; identical to re-deriving it from the register
    /// file on disk.
    pub fn getcard(&self) -> f64 {
        let sum: f64 = self.regs.iter().sum();
        if sum.is_finite() && sum > 0. {
            self.regs.len() as f64 / sum
        } else {
            0.
        }
    }

    pub fn reset(&mut self) {
        self.regs.fill(RegT::INFINITY);
        if let Some(ids) = &mut self.ids {
            ids.fill(0);
        }
        if let Some(counts) = &mut self.idcounts {
            counts.fill(0);
        }
    }
}

/// One-permutation set sketch: each item races in exactly one register,
/// selected by its hash, making updates O(1).
///
/// Registers left empty (short inputs) are densified from the cyclically
/// next filled register by [`OnePermSetSketch::finish`], which must run
/// before `data`/`getcard` are read.
#[derive(Debug, Clone)]
pub struct OnePermSetSketch {
    regs: Vec<RegT>,
    ids: Vec<u64>,
    idcounts: Vec<u32>,
    mincount: f64,
    candidate_counts: HashMap<u64, u32>,
    total_updates: u64,
}

impl OnePermSetSketch {
    pub fn new(sketchsize: usize) -> Self {
        OnePermSetSketch {
            regs: vec![RegT::INFINITY; sketchsize],
            ids: vec![0; sketchsize],
            idcounts: vec![0; sketchsize],
            mincount: 0.,
            candidate_counts: HashMap::new(),
            total_updates: 0,
        }
    }

    /// Admit items only once they have been seen more than `mincount` times.
    pub fn set_mincount(&mut self, mincount: f64) {
        self.mincount = mincount;
    }

    pub fn update(&mut self, h: u64) {
        self.total_updates += 1;
        if self.mincount > 0. {
            let seen = self.candidate_counts.entry(h).or_insert(0);
            *seen += 1;
            if (*seen as f64) <= self.mincount {
                return;
            }
        }
        let ss = self.regs.len();
        let j = ((h as u128 * ss as u128) >> 64) as usize;
        let v = exp_draw(reg_stream(h, j)) / ss as f64;
        if v < self.regs[j] {
            self.regs[j] = v;
            self.ids[j] = h;
            self.idcounts[j] = 1;
        } else if v == self.regs[j] && self.ids[j] == h {
            self.idcounts[j] = self.idcounts[j].saturating_add(1);
        }
    }

    /// Densify empty registers so the on-disk row and the estimator never
    /// observe the empty sentinel. Idempotent.
    pub fn finish(&mut self) {
        let ss = self.regs.len();
        if self.regs.iter().all(|r| r.is_finite()) || self.regs.iter().all(|r| !r.is_finite()) {
            return;
        }
        for j in 0..ss {
            if self.regs[j].is_finite() {
                continue;
            }
            let mut src = (j + 1) % ss;
            while !self.regs[src].is_finite() {
                src = (src + 1) % ss;
            }
            self.regs[j] = self.regs[src];
            self.ids[j] = self.ids[src];
            self.idcounts[j] = self.idcounts[src];
        }
    }

    pub fn data(&self) -> &[RegT] {
        &self.regs
    }

    pub fn ids(&self) -> &[u64] {
        &self.ids
    }

    pub fn idcounts(&self) -> &[u32] {
        &self.idcounts
    }

    pub fn total_updates(&self) -> u64 {
        self.total_updates
    }

    pub fn getcard(&self) -> f64 {
        let sum: f64 = self.regs.iter().sum();
        if sum.is_finite() && sum > 0. {
            self.regs.len() as f64 / sum
        } else {
            0.
        }
    }

    pub fn reset(&mut self) {
        self.regs.fill(RegT::INFINITY);
        self.ids.fill(0);
        self.idcounts.fill(0);
        self.candidate_counts.clear();
        self.total_updates = 0;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn h(i: u64) -> u64 {
        crate::_hash_murmur(&i.to_le_bytes(), 0)
    }

    #[test]
    fn full_setsketch_estimates_cardinality() {
        let mut fss = FullSetSketch::new(512, false, false);
        let n = 10_000u64;
        for i in 0..n {
            fss.update(h(i));
        }
        let card = fss.getcard();
        let rel = (card - n as f64).abs() / n as f64;
        assert!(rel < 0.15, "estimate {card} too far from {n}");
    }

    #[test]
    fn estimator_matches_register_sum() {
        let mut fss = FullSetSketch::new(64, false, false);
        for i in 0..500u64 {
            fss.update(h(i));
        }
        let sum: f64 = fss.data().iter().sum();
        assert_eq!(fss.getcard(), 64. / sum);
    }

    #[test]
    fn duplicate_updates_do_not_move_registers() {
        let mut a = FullSetSketch::new(32, true, true);
        let mut b = FullSetSketch::new(32, true, true);
        for i in 0..100u64 {
            let h = h(i);
            a.update(h);
            b.update(h);
            b.update(h);
        }
        assert_eq!(a.data(), b.data());
        assert_eq!(a.ids(), b.ids());
        // Only the counts differ.
        let ca: u32 = a.idcounts().unwrap().iter().sum();
        let cb: u32 = b.idcounts().unwrap().iter().sum();
        assert_eq!(2 * ca, cb);
    }

    #[test]
    fn reset_restores_construction_state() {
        let fresh = FullSetSketch::new(16, true, true);
        let mut used = FullSetSketch::new(16, true, true);
        for i in 0..50u64 {
            used.update(h(i));
        }
        used.reset();
        assert_eq!(fresh.data(), used.data());
        assert_eq!(fresh.ids(), used.ids());
        assert_eq!(fresh.idcounts(), used.idcounts());
    }

    #[test]
    fn oneperm_estimates_cardinality() {
        let mut opss = OnePermSetSketch::new(512);
        let n = 20_000u64;
        for i in 0..n {
            opss.update(h(i));
        }
        opss.finish();
        let card = opss.getcard();
        let rel = (card - n as f64).abs() / n as f64;
        assert!(rel < 0.2, "estimate {card} too far from {n}");
    }

    #[test]
    fn oneperm_densifies_empty_registers() {
        let mut opss = OnePermSetSketch::new(64);
        for i in 0..5u64 {
            opss.update(h(i));
        }
        opss.finish();
        assert!(opss.data().iter().all(|r| r.is_finite()));
    }

    #[test]
    fn oneperm_mincount_gates_admission() {
        let mut opss = OnePermSetSketch::new(32);
        opss.set_mincount(1.0);
        opss.update(7);
        assert!(opss.data().iter().all(|r| !r.is_finite()));
        opss.update(7);
        assert!(opss.data().iter().any(|r| r.is_finite()));
        assert_eq!(opss.total_updates(), 2);
    }

    #[test]
    fn oneperm_reset_clears_candidates() {
        let mut opss = OnePermSetSketch::new(32);
        opss.set_mincount(1.0);
        opss.update(7);
        opss.reset();
        opss.update(7);
        // The pre-reset observation must not count toward admission.
        assert!(opss.data().iter().all(|r| !r.is_finite()));
    }
}
