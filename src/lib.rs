//! Compute fixed-size, comparable sketches of large sequence collections.
//!
//! This is the core library supporting fastxsketch, a command-line tool for
//! turning FASTA/FASTQ collections (nucleotide or amino acid) into compact
//! probabilistic summaries of their k-mer content. The summaries allow
//! downstream tools to approximate set similarity (Jaccard), weighted-set
//! similarity, cardinality, and edit-distance neighborhoods between very
//! large sequence collections without retaining the raw data.
//!
//! The crate is organized using the following concepts:
//!
//! - A **dataset** is anything representable with FASTA/FASTQ formats in a
//!   nucleotide ("ACGTN") or amino acid alphabet. K-mer enumeration over
//!   datasets, including minimizer windows and rolling hashes, lives in the
//!   [`encodings`] submodule.
//!
//! - A **sketch** is a sublinear representation of a dataset: a fixed number
//!   of registers, optionally with parallel k-mer id and count arrays.
//!   The streaming sketch implementations (set sketches, weighted minhash
//!   variants, order minhash, and the exact counter) live in the [`sketch`]
//!   submodule.
//!
//! - The **sketcher** drives one sketch per input file (or per sequence),
//!   in parallel, with a deterministic on-disk artifact cache, and collects
//!   every row into flat matrices. It lives in the [`sketcher`] submodule
//!   and is the main entry point: see [`sketcher::fastx2sketch`].
//!
//! Configuration is a single immutable [`cmd::SketchParams`] value shared
//! read-only across worker threads.

pub mod cmd;
pub mod encodings;
pub mod errors;
pub mod sketch;
pub mod sketcher;

pub use errors::SketchError as Error;

/// One sketch register. All register-valued artifacts on disk are arrays of
/// this type in little-endian byte order.
pub type RegT = f64;

use murmurhash3::murmurhash3_x64_128;

pub fn _hash_murmur(kmer: &[u8], seed: u64) -> u64 {
    murmurhash3_x64_128(kmer, seed).0
}
