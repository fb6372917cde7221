//! Streaming sketch data structures.
//!
//! Every variant shares the same register discipline: a register holds the
//! minimum of exponential variates drawn per admitted item, with the rate
//! scaled by the item weight. The minimum of `n` unit-rate draws is
//! exponential with rate `n`, so `sketchsize / sum(registers)` estimates the
//! (weighted) cardinality, and a sketch reloaded from its register file
//! yields the same estimate as the live structure.

pub mod bottomk;
pub mod counter;
pub mod minhash;
pub mod orderminhash;
pub mod setsketch;

pub use bottomk::{bottomk, bottomk128};
pub use counter::Counter;
pub use minhash::{BagMinHash, ProbMinHash};
pub use orderminhash::OrderMinHash;
pub use setsketch::{FullSetSketch, OnePermSetSketch};

use murmurhash3::murmurhash3_x64_128;

use crate::RegT;

/// Per-register substream of an item hash, keyed by the register index.
#[inline]
pub(crate) fn reg_stream(h: u64, j: usize) -> u64 {
    murmurhash3_x64_128(&h.to_le_bytes(), j as u64).0
}

/// Map 64 random bits to (0, 1].
#[inline]
pub(crate) fn u01(x: u64) -> f64 {
    ((x >> 11) + 1) as f64 * (1.0 / (1u64 << 53) as f64)
}

/// Unit-rate exponential variate from 64 random bits.
#[inline]
pub(crate) fn exp_draw(x: u64) -> f64 {
    -u01(x).ln()
}

/// Narrow a 128-bit hash for structures with 64-bit id slots.
#[inline]
pub(crate) fn fold_u128(h: u128) -> u64 {
    (h as u64) ^ (h >> 64) as u64
}

/// One exponential race across all registers. `rate` scales the variate
/// (weight), `count` is the multiplicity recorded for a winning id. A repeat
/// of the current owner accumulates into its count instead.
pub(crate) fn register_race(
    regs: &mut [RegT],
    mut ids: Option<&mut [u64]>,
    mut idcounts: Option<&mut [u32]>,
    h: u64,
    rate: f64,
    count: u32,
) {
    for j in 0..regs.len() {
        let v = exp_draw(reg_stream(h, j)) / rate;
        if v < regs[j] {
            regs[j] = v;
            if let Some(ids) = ids.as_deref_mut() {
                ids[j] = h;
            }
            if let Some(counts) = idcounts.as_deref_mut() {
                counts[j] = count;
            }
        } else if v == regs[j] {
            if let Some(ids) = ids.as_deref_mut() {
                if ids[j] == h {
                    if let Some(counts) = idcounts.as_deref_mut() {
                        counts[j] = counts[j].saturating_add(count);
                    }
                }
            }
        }
    }
}
