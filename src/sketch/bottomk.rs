//! Bottom-k selection: the k numerically smallest keys of a weighted key
//! stream, ascending.

use std::collections::BinaryHeap;

/// Select the `k` smallest keys whose count exceeds `threshold` (missing
/// counts default to 1). The result is ascending and exactly `k` long;
/// when fewer keys qualify, the leading slots stay zero.
pub fn bottomk(keys: &[u64], counts: Option<&[f64]>, k: usize, threshold: f64) -> Vec<u64> {
    let mut heap: BinaryHeap<u64> = BinaryHeap::with_capacity(k + 1);
    for (i, &key) in keys.iter().enumerate() {
        let count = counts.map_or(1., |c| c[i]);
        if count <= threshold {
            continue;
        }
        if heap.len() < k {
            heap.push(key);
        } else if heap.peek().is_some_and(|&top| key < top) {
            heap.pop();
            heap.push(key);
        }
    }
    drain_descending(heap, k)
}

/// 128-bit variant. Keys narrow to their low 64 bits before comparison,
/// matching the register width they are stored into.
pub fn bottomk128(keys: &[u128], counts: Option<&[f64]>, k: usize, threshold: f64) -> Vec<u64> {
    let mut heap: BinaryHeap<u64> = BinaryHeap::with_capacity(k + 1);
    for (i, &key) in keys.iter().enumerate() {
        let count = counts.map_or(1., |c| c[i]);
        if count <= threshold {
            continue;
        }
        let key = key as u64;
        if heap.len() < k {
            heap.push(key);
        } else if heap.peek().is_some_and(|&top| key < top) {
            heap.pop();
            heap.push(key);
        }
    }
    drain_descending(heap, k)
}

fn drain_descending(mut heap: BinaryHeap<u64>, k: usize) -> Vec<u64> {
    let mut out = vec![0u64; k];
    let mut i = k;
    while let Some(key) = heap.pop() {
        i -= 1;
        out[i] = key;
    }
    out
}
