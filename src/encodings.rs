//! K-mer enumeration over FASTX inputs.
//!
//! Two hash families are provided, both built on the murmur hashing the
//! rest of the crate uses. Nucleotide input with `k <= 64` goes through the
//! exact encoder: 2-bit packing of the canonical (strand independent)
//! k-mer, murmur-hashed as its packed bytes, 64-bit below `k = 32` and
//! 128-bit up to `k = 64`. Protein input, or longer k, murmur-hashes each
//! raw byte window directly, 128-bit when requested. When the window size
//! exceeds `k`, only the minimizer of each window is emitted.
//!
//! Enumeration is restartable per call and retains no references to its
//! inputs; per-thread scratch buffers are reused across files.

use std::collections::VecDeque;

use murmurhash3::murmurhash3_x64_128;
use needletail::parse_fastx_file;

use crate::cmd::SketchParams;
use crate::errors::SketchError;
use crate::_hash_murmur;

/// Split a path line on ASCII spaces and apply `f` to every substream path.
/// The emissions of all substreams belong to the same logical row.
pub fn for_each_substr<F>(line: &str, mut f: F) -> Result<(), SketchError>
where
    F: FnMut(&str) -> Result<(), SketchError>,
{
    for tok in line.split(' ') {
        if tok.is_empty() {
            continue;
        }
        f(tok)?;
    }
    Ok(())
}

const NUC2BIT: [u8; 256] = {
    let mut lookup = [4u8; 256];
    lookup[b'A' as usize] = 0;
    lookup[b'C' as usize] = 1;
    lookup[b'G' as usize] = 2;
    lookup[b'T' as usize] = 3;
    lookup[b'a' as usize] = 0;
    lookup[b'c' as usize] = 1;
    lookup[b'g' as usize] = 2;
    lookup[b't' as usize] = 3;
    lookup
};

#[inline]
fn murmur128(bytes: &[u8], seed: u64) -> u128 {
    let (h1, h2) = murmurhash3_x64_128(bytes, seed);
    ((h1 as u128) << 64) | h2 as u128
}

/// Reusable per-thread enumeration state.
#[derive(Default)]
pub struct EncoderScratch {
    minq64: VecDeque<(usize, u64)>,
    minq128: VecDeque<(usize, u128)>,
}

impl EncoderScratch {
    pub fn new() -> Self {
        Self::default()
    }

    fn clear(&mut self) {
        self.minq64.clear();
        self.minq128.clear();
    }
}

/// One hashed-m-mer stream over a file or sequence, configured from
/// [`SketchParams`]. The emission width is fixed by the encoder selection;
/// callers pick the matching `for_each_*` family.
#[derive(Debug, Clone, Copy)]
pub struct Encoder {
    k: usize,
    w: usize,
    exact: bool,
    hpc: bool,
    seed: u64,
}

impl Encoder {
    pub fn from_params(p: &SketchParams) -> Encoder {
        Encoder {
            k: p.k() as usize,
            w: p.window() as usize,
            exact: p.uses_exact_encoder(),
            hpc: p.homopolymer_compress_minimizers(),
            seed: p.seed(),
        }
    }

    /// Stream 64-bit hashes for every record of a FASTX file.
    pub fn for_each_in_path<F>(
        &self,
        path: &str,
        scratch: &mut EncoderScratch,
        mut f: F,
    ) -> Result<(), SketchError>
    where
        F: FnMut(u64),
    {
        let mut reader = parse_fastx_file(path)?;
        while let Some(record) = reader.next() {
            let record = record?;
            self.for_each_in_seq(&record.seq(), scratch, &mut f);
        }
        Ok(())
    }

    /// Stream 128-bit hashes for every record of a FASTX file.
    pub fn for_each_in_path_128<F>(
        &self,
        path: &str,
        scratch: &mut EncoderScratch,
        mut f: F,
    ) -> Result<(), SketchError>
    where
        F: FnMut(u128),
    {
        let mut reader = parse_fastx_file(path)?;
        while let Some(record) = reader.next() {
            let record = record?;
            self.for_each_in_seq_128(&record.seq(), scratch, &mut f);
        }
        Ok(())
    }

    /// Stream 64-bit hashes over one in-memory sequence.
    pub fn for_each_in_seq<F>(&self, seq: &[u8], scratch: &mut EncoderScratch, mut f: F)
    where
        F: FnMut(u64),
    {
        scratch.clear();
        let mut sink = Emitter64 {
            minq: &mut scratch.minq64,
            nwin: self.w - self.k + 1,
            run_start: 0,
            hpc: self.hpc,
            last: None,
            last_pos: None,
            f: &mut f,
        };
        if self.exact {
            debug_assert!(self.k < 32);
            self.walk_exact64(seq, &mut sink);
        } else {
            self.walk_rolling64(seq, &mut sink);
        }
    }

    /// Stream 128-bit hashes over one in-memory sequence.
    pub fn for_each_in_seq_128<F>(&self, seq: &[u8], scratch: &mut EncoderScratch, mut f: F)
    where
        F: FnMut(u128),
    {
        scratch.clear();
        let mut sink = Emitter128 {
            minq: &mut scratch.minq128,
            nwin: self.w - self.k + 1,
            run_start: 0,
            hpc: self.hpc,
            last: None,
            last_pos: None,
            f: &mut f,
        };
        if self.exact {
            debug_assert!((32..=64).contains(&self.k));
            self.walk_exact128(seq, &mut sink);
        } else {
            self.walk_rolling128(seq, &mut sink);
        }
    }

    fn walk_exact64<F: FnMut(u64)>(&self, seq: &[u8], sink: &mut Emitter64<'_, F>) {
        let k = self.k;
        let mask: u64 = if k == 32 { u64::MAX } else { (1u64 << (2 * k)) - 1 };
        let mut fw = 0u64;
        let mut rc = 0u64;
        let mut run = 0usize;
        let mut pos = 0usize;
        for &b in seq {
            let code = NUC2BIT[b as usize];
            if code == 4 {
                run = 0;
                sink.reset_run(pos);
                continue;
            }
            fw = ((fw << 2) | code as u64) & mask;
            rc = (rc >> 2) | (((3 ^ code) as u64) << (2 * (k - 1)));
            run += 1;
            if run >= k {
                let canon = fw.min(rc);
                sink.push(pos, _hash_murmur(&canon.to_le_bytes(), self.seed));
                pos += 1;
            }
        }
    }

    fn walk_exact128<F: FnMut(u128)>(&self, seq: &[u8], sink: &mut Emitter128<'_, F>) {
        let k = self.k;
        let mask: u128 = if k == 64 {
            u128::MAX
        } else {
            (1u128 << (2 * k)) - 1
        };
        let mut fw = 0u128;
        let mut rc = 0u128;
        let mut run = 0usize;
        let mut pos = 0usize;
        for &b in seq {
            let code = NUC2BIT[b as usize];
            if code == 4 {
                run = 0;
                sink.reset_run(pos);
                continue;
            }
            fw = ((fw << 2) | code as u128) & mask;
            rc = (rc >> 2) | (((3 ^ code) as u128) << (2 * (k - 1)));
            run += 1;
            if run >= k {
                let canon = fw.min(rc);
                sink.push(pos, murmur128(&canon.to_le_bytes(), self.seed));
                pos += 1;
            }
        }
    }

    fn walk_rolling64<F: FnMut(u64)>(&self, seq: &[u8], sink: &mut Emitter64<'_, F>) {
        for (pos, win) in seq.windows(self.k).enumerate() {
            sink.push(pos, _hash_murmur(win, self.seed));
        }
    }

    fn walk_rolling128<F: FnMut(u128)>(&self, seq: &[u8], sink: &mut Emitter128<'_, F>) {
        for (pos, win) in seq.windows(self.k).enumerate() {
            sink.push(pos, murmur128(win, self.seed));
        }
    }
}

// The window/minimizer funnel between a raw k-mer hash stream and the caller.
// `nwin` is the number of k-mers per window; 1 means every k-mer is emitted.
// Positions arrive consecutively within one valid-base run; `reset_run`
// marks a break so windows never span it.

macro_rules! emitter_impl {
    ($name:ident, $ty:ty) => {
        struct $name<'a, F: FnMut($ty)> {
            minq: &'a mut VecDeque<(usize, $ty)>,
            nwin: usize,
            run_start: usize,
            hpc: bool,
            last: Option<$ty>,
            last_pos: Option<usize>,
            f: &'a mut F,
        }

        impl<'a, F: FnMut($ty)> $name<'a, F> {
            fn push(&mut self, pos: usize, h: $ty) {
                if self.nwin == 1 {
                    self.emit(h);
                    return;
                }
                while self.minq.back().is_some_and(|&(_, bh)| bh > h) {
                    self.minq.pop_back();
                }
                self.minq.push_back((pos, h));
                while self.minq.front().is_some_and(|&(fp, _)| fp + self.nwin <= pos) {
                    self.minq.pop_front();
                }
                if pos + 1 >= self.run_start + self.nwin {
                    let &(mp, mh) = self.minq.front().unwrap();
                    if self.last_pos != Some(mp) {
                        self.last_pos = Some(mp);
                        self.emit(mh);
                    }
                }
            }

            fn emit(&mut self, h: $ty) {
                if self.hpc && self.last == Some(h) {
                    return;
                }
                self.last = Some(h);
                (self.f)(h);
            }

            fn reset_run(&mut self, next_pos: usize) {
                self.minq.clear();
                self.run_start = next_pos;
            }
        }
    };
}

emitter_impl!(Emitter64, u64);
emitter_impl!(Emitter128, u128);

#[cfg(test)]
mod test {
    use super::*;
    use crate::cmd::SketchParams;

    fn collect64(p: &SketchParams, seq: &[u8]) -> Vec<u64> {
        let enc = Encoder::from_params(p);
        let mut scratch = EncoderScratch::new();
        let mut out = vec![];
        enc.for_each_in_seq(seq, &mut scratch, |h| out.push(h));
        out
    }

    fn revcomp(seq: &[u8]) -> Vec<u8> {
        seq.iter()
            .rev()
            .map(|b| match b {
                b'A' => b'T',
                b'C' => b'G',
                b'G' => b'C',
                _ => b'A',
            })
            .collect()
    }

    #[test]
    fn substr_expansion() {
        let mut seen = vec![];
        for_each_substr("a.fa b.fa  c.fa", |s| {
            seen.push(s.to_string());
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec!["a.fa", "b.fa", "c.fa"]);
    }

    #[test]
    fn emits_all_kmers_without_window() {
        let p = SketchParams::builder().k(4).build();
        let out = collect64(&p, b"ACGTACGT");
        assert_eq!(out.len(), 5);
    }

    #[test]
    fn invalid_bases_reset_the_run() {
        let p = SketchParams::builder().k(4).build();
        let out = collect64(&p, b"ACGTNACGT");
        // One k-mer on each side of the N; nothing spans it.
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn canonical_hashing_is_strand_independent() {
        let p = SketchParams::builder().k(5).build();
        let seq = b"ACGGTTACGGA";
        let mut fwd = collect64(&p, seq);
        let mut rev = collect64(&p, &revcomp(seq));
        fwd.sort_unstable();
        rev.sort_unstable();
        assert_eq!(fwd, rev);
    }

    #[test]
    fn minimizers_are_a_subset() {
        let seq = b"ACGTTGCAACGTGGCA";
        let p = SketchParams::builder().k(4).build();
        let all = collect64(&p, seq);
        let pw = SketchParams::builder().k(4).w(8).build();
        let mins = collect64(&pw, seq);
        assert!(mins.len() < all.len());
        assert!(mins.iter().all(|m| all.contains(m)));
    }

    #[test]
    fn homopolymer_compression_suppresses_repeats() {
        let p = SketchParams::builder()
            .k(3)
            .homopolymer_compress_minimizers(true)
            .build();
        let out = collect64(&p, b"AAAAAACGT");
        assert!(!out.is_empty());
        for pair in out.windows(2) {
            assert_ne!(pair[0], pair[1]);
        }
    }

    #[test]
    fn rolling_hash_is_shift_consistent() {
        // The same window must hash identically wherever it occurs.
        let p = SketchParams::builder().k(5).parse_protein(true).build();
        let a = collect64(&p, b"MKVLAARST");
        let b = collect64(&p, b"GGMKVLAARST");
        assert_eq!(a.first(), b.get(2));
    }

    #[test]
    fn wide_kmers_use_128_bits() {
        let p = SketchParams::builder().k(33).build();
        assert!(p.hashes_are_128());
        let enc = Encoder::from_params(&p);
        let mut scratch = EncoderScratch::new();
        let mut out = vec![];
        let seq: Vec<u8> = std::iter::repeat(*b"ACGT").take(20).flatten().collect();
        let n = seq.len();
        enc.for_each_in_seq_128(&seq, &mut scratch, |h| out.push(h));
        assert_eq!(out.len(), n - 32);
    }
}
