//! Exact multiplicity table of hashed m-mers, with an optional approximate
//! count-sketch sideband sized by the `cssize` hint.
//!
//! A counter holds either 64- or 128-bit keys, matching the active encoder
//! width; the other map stays empty. `finalize_*` drains the table into the
//! target representation, dropping keys at or below the count threshold.

use std::collections::HashMap;

use super::{fold_u128, BagMinHash, FullSetSketch, ProbMinHash};

#[derive(Debug, Default, Clone)]
pub struct Counter {
    map64: HashMap<u64, u32>,
    map128: HashMap<u128, u32>,
    cells: Vec<i64>,
    total: u64,
}

impl Counter {
    pub fn new(cssize: usize) -> Self {
        Counter {
            map64: HashMap::new(),
            map128: HashMap::new(),
            cells: vec![0; cssize],
            total: 0,
        }
    }

    pub fn add(&mut self, h: u64) {
        *self.map64.entry(h).or_insert(0) += 1;
        self.update_cells(h);
        self.total += 1;
    }

    pub fn add128(&mut self, h: u128) {
        *self.map128.entry(h).or_insert(0) += 1;
        self.update_cells(fold_u128(h));
        self.total += 1;
    }

    fn update_cells(&mut self, h: u64) {
        if self.cells.is_empty() {
            return;
        }
        let sign = if h.rotate_right(32) & 1 == 1 { -1 } else { 1 };
        let pos = (h % self.cells.len() as u64) as usize;
        self.cells[pos] += sign;
    }

    /// Total number of additions, admitted or not.
    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.map64.is_empty() && self.map128.is_empty()
    }

    pub fn reset(&mut self) {
        self.map64.clear();
        self.map128.clear();
        self.cells.fill(0);
        self.total = 0;
    }

    /// Keys above the threshold, sorted ascending, with their counts as
    /// doubles in matching order.
    pub fn finalize_vec(&self, threshold: f64) -> (Vec<u64>, Vec<f64>) {
        let mut pairs: Vec<(u64, u32)> = self
            .map64
            .iter()
            .filter(|(_, &c)| c as f64 > threshold)
            .map(|(&k, &c)| (k, c))
            .collect();
        pairs.sort_unstable_by_key(|&(k, _)| k);
        let keys = pairs.iter().map(|&(k, _)| k).collect();
        let counts = pairs.iter().map(|&(_, c)| c as f64).collect();
        (keys, counts)
    }

    pub fn finalize_vec128(&self, threshold: f64) -> (Vec<u128>, Vec<f64>) {
        let mut pairs: Vec<(u128, u32)> = self
            .map128
            .iter()
            .filter(|(_, &c)| c as f64 > threshold)
            .map(|(&k, &c)| (k, c))
            .collect();
        pairs.sort_unstable_by_key(|&(k, _)| k);
        let keys = pairs.iter().map(|&(k, _)| k).collect();
        let counts = pairs.iter().map(|&(_, c)| c as f64).collect();
        (keys, counts)
    }

    /// Sum of the counts above the threshold.
    pub fn weight_above(&self, threshold: f64) -> f64 {
        let w64: f64 = self
            .map64
            .values()
            .filter(|&&c| c as f64 > threshold)
            .map(|&c| c as f64)
            .sum();
        let w128: f64 = self
            .map128
            .values()
            .filter(|&&c| c as f64 > threshold)
            .map(|&c| c as f64)
            .sum();
        w64 + w128
    }

    pub fn finalize_into_setsketch(&self, sketch: &mut FullSetSketch, threshold: f64) {
        for (&k, &c) in &self.map64 {
            if c as f64 > threshold {
                sketch.update_weighted(k, c as f64);
            }
        }
        for (&k, &c) in &self.map128 {
            if c as f64 > threshold {
                sketch.update_weighted(fold_u128(k), c as f64);
            }
        }
    }

    pub fn finalize_into_bagminhash(&self, sketch: &mut BagMinHash, threshold: f64) {
        for (&k, &c) in &self.map64 {
            if c as f64 > threshold {
                sketch.add_weighted(k, c as f64);
            }
        }
        for (&k, &c) in &self.map128 {
            if c as f64 > threshold {
                sketch.add_weighted(fold_u128(k), c as f64);
            }
        }
    }

    pub fn finalize_into_probminhash(&self, sketch: &mut ProbMinHash, threshold: f64) {
        let total = self.weight_above(threshold);
        if total <= 0. {
            return;
        }
        for (&k, &c) in &self.map64 {
            if c as f64 > threshold {
                sketch.add_weighted(k, c as f64, total);
            }
        }
        for (&k, &c) in &self.map128 {
            if c as f64 > threshold {
                sketch.add_weighted(fold_u128(k), c as f64, total);
            }
        }
    }
}
