use std::collections::HashSet;
use std::sync::Arc;

use getset::{CopyGetters, Getters, Setters};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::errors::SketchError;

/// The similarity space a sketch is built for. Determines both the sketch
/// algorithm and the comparison a downstream tool may run on the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimilaritySpace {
    /// Plain set semantics: every distinct m-mer counts once.
    Set,
    /// Multiset semantics, weighted by m-mer multiplicity (BagMinHash).
    Multiset,
    /// Probability-set semantics, weighted by normalized multiplicity
    /// (ProbMinHash).
    ProbSet,
    /// Edit-distance neighborhoods over single sequences (OrderMinHash).
    /// Only legal together with parse-by-seq.
    EditDistance,
}

impl std::fmt::Display for SimilaritySpace {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                SimilaritySpace::Set => "set",
                SimilaritySpace::Multiset => "multiset",
                SimilaritySpace::ProbSet => "pset",
                SimilaritySpace::EditDistance => "editdistance",
            }
        )
    }
}

impl TryFrom<&str> for SimilaritySpace {
    type Error = SketchError;

    fn try_from(space: &str) -> Result<Self, Self::Error> {
        match space.to_lowercase().as_ref() {
            "set" => Ok(SimilaritySpace::Set),
            "multiset" => Ok(SimilaritySpace::Multiset),
            "pset" | "probset" => Ok(SimilaritySpace::ProbSet),
            "editdistance" | "edit-distance" => Ok(SimilaritySpace::EditDistance),
            _ => Err(SketchError::config(format!(
                "unknown similarity space {space:?}"
            ))),
        }
    }
}

/// The kind of artifact produced for one row within SET space.
///
/// The first two are fixed-width register sketches; the remaining kinds keep
/// the exact m-mer content in one form or another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KmerResult {
    OnePerm,
    FullSetSketch,
    FullMmerSet,
    FullMmerCountdict,
    FullMmerSequence,
}

impl KmerResult {
    /// True for results that are `sketchsize` registers wide on disk.
    pub fn is_sketch_width(self) -> bool {
        matches!(self, KmerResult::OnePerm | KmerResult::FullSetSketch)
    }
}

impl std::fmt::Display for KmerResult {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                KmerResult::OnePerm => "oneperm",
                KmerResult::FullSetSketch => "setsketch",
                KmerResult::FullMmerSet => "kmerset",
                KmerResult::FullMmerCountdict => "kmercountdict",
                KmerResult::FullMmerSequence => "mmerseq",
            }
        )
    }
}

impl TryFrom<&str> for KmerResult {
    type Error = SketchError;

    fn try_from(result: &str) -> Result<Self, Self::Error> {
        match result.to_lowercase().as_ref() {
            "oneperm" | "one-perm" => Ok(KmerResult::OnePerm),
            "setsketch" | "full-setsketch" => Ok(KmerResult::FullSetSketch),
            "kmerset" | "full-mmer-set" => Ok(KmerResult::FullMmerSet),
            "kmercountdict" | "full-mmer-countdict" => Ok(KmerResult::FullMmerCountdict),
            "mmerseq" | "full-mmer-sequence" => Ok(KmerResult::FullMmerSequence),
            _ => Err(SketchError::config(format!(
                "unknown kmer result kind {result:?}"
            ))),
        }
    }
}

/// How one input file is consumed, flattened from the (space, result, count)
/// configuration matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SketchMode {
    /// Enumerate everything into a Counter first, then finalize.
    Counted,
    /// Stream the raw m-mer sequence into a growable buffer.
    Sequence,
    /// Stream each m-mer straight through a register sketch.
    Stream,
}

/// Optional m-mer filter: an emitted hash present in the set is discarded
/// before it reaches any sketch or counter.
#[derive(Debug, Default, Clone)]
pub struct KmerFilter {
    h64: HashSet<u64>,
    h128: HashSet<u128>,
}

impl KmerFilter {
    pub fn insert64(&mut self, h: u64) {
        self.h64.insert(h);
    }

    pub fn insert128(&mut self, h: u128) {
        self.h128.insert(h);
    }

    pub fn contains64(&self, h: u64) -> bool {
        self.h64.contains(&h)
    }

    pub fn contains128(&self, h: u128) -> bool {
        self.h128.contains(&h)
    }

    pub fn is_empty(&self) -> bool {
        self.h64.is_empty() && self.h128.is_empty()
    }
}

/// Immutable configuration for one sketching run.
///
/// Built once, validated with [`SketchParams::check`], normalized with
/// [`SketchParams::normalized`] before the parallel region, and then shared
/// read-only by every worker thread.
#[derive(Debug, Clone, TypedBuilder, CopyGetters, Getters, Setters, Serialize, Deserialize)]
pub struct SketchParams {
    /// k-mer length.
    #[getset(get_copy = "pub", set = "pub")]
    #[builder(default = 16u32)]
    k: u32,

    /// Window size; when larger than `k`, only the minimizer of each window
    /// is emitted. Zero means "same as k".
    #[getset(get_copy = "pub", set = "pub")]
    #[builder(default = 0u32)]
    w: u32,

    /// Number of registers per sketch row.
    #[getset(get_copy = "pub", set = "pub")]
    #[builder(default = 1024usize)]
    sketchsize: usize,

    #[getset(get_copy = "pub", set = "pub")]
    #[builder(default = SimilaritySpace::Set)]
    sspace: SimilaritySpace,

    #[getset(get_copy = "pub", set = "pub")]
    #[builder(default = KmerResult::OnePerm)]
    kmer_result: KmerResult,

    /// Minimum multiplicity for an m-mer to be admitted (strictly greater
    /// than this value).
    #[getset(get_copy = "pub", set = "pub")]
    #[builder(default = 0f64)]
    count_threshold: f64,

    #[getset(get_copy = "pub", set = "pub")]
    #[builder(default = false)]
    save_kmers: bool,

    #[getset(get_copy = "pub", set = "pub")]
    #[builder(default = false)]
    save_kmercounts: bool,

    #[getset(get_copy = "pub", set = "pub")]
    #[builder(default = true)]
    build_sig_matrix: bool,

    #[getset(get_copy = "pub", set = "pub")]
    #[builder(default = false)]
    build_mmer_matrix: bool,

    #[getset(get_copy = "pub", set = "pub")]
    #[builder(default = false)]
    build_count_matrix: bool,

    /// Reuse compatible prior artifacts instead of recomputing.
    #[getset(get_copy = "pub", set = "pub")]
    #[builder(default = false)]
    cache_sketches: bool,

    /// Prefer 128-bit hashes where the encoder selection allows a choice.
    #[getset(get_copy = "pub", set = "pub")]
    #[builder(default = false)]
    use128: bool,

    /// One sketch row per sequence within each file, rather than per file.
    #[getset(get_copy = "pub", set = "pub")]
    #[builder(default = false)]
    parse_by_seq: bool,

    /// Treat input as amino acid sequence (rolling hash encoder).
    #[getset(get_copy = "pub", set = "pub")]
    #[builder(default = false)]
    parse_protein: bool,

    /// Suppress consecutive equal minimizer emissions.
    #[getset(get_copy = "pub", set = "pub")]
    #[builder(default = false)]
    homopolymer_compress_minimizers: bool,

    /// Replace folder components of destination names with the basename.
    #[getset(get_copy = "pub", set = "pub")]
    #[builder(default = false)]
    trim_folder_paths: bool,

    /// Prepended to trimmed destination names.
    #[getset(get = "pub", set = "pub")]
    #[builder(default, setter(into))]
    outprefix: String,

    /// Counter size hint; nonzero enables the approximate counting cells.
    #[getset(get_copy = "pub", set = "pub")]
    #[builder(default = 0usize)]
    cssize: usize,

    /// Worker thread count; zero uses the rayon default.
    #[getset(get_copy = "pub", set = "pub")]
    #[builder(default = 0usize)]
    nthreads: usize,

    /// Seed folded into every hash stream.
    #[getset(get_copy = "pub", set = "pub")]
    #[builder(default = 42u64)]
    seed: u64,

    /// Optional filter set; matching m-mers never reach a sketch.
    #[serde(skip)]
    #[getset(get = "pub", set = "pub")]
    #[builder(default)]
    fs: Option<Arc<KmerFilter>>,
}

impl Default for SketchParams {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl SketchParams {
    /// Effective window size: `max(w, k)`.
    pub fn window(&self) -> u32 {
        self.w.max(self.k)
    }

    /// True when the exact 2-bit nucleotide encoder is selected; the rolling
    /// byte hash is used otherwise.
    pub fn uses_exact_encoder(&self) -> bool {
        !self.parse_protein && (self.window() > self.k || self.k <= 64)
    }

    /// Width of the hashes the selected encoder will emit. The `use128`
    /// flag only decides for the rolling encoder; the exact encoder is
    /// 64-bit below k=32 and 128-bit up to k=64.
    pub fn hashes_are_128(&self) -> bool {
        if self.uses_exact_encoder() {
            self.k >= 32
        } else {
            self.use128
        }
    }

    /// Bytes per key in exact m-mer artifacts.
    pub fn key_width(&self) -> usize {
        if self.hashes_are_128() {
            16
        } else {
            8
        }
    }

    /// A full set sketch fed through the counter, because counts or a count
    /// threshold were requested.
    pub fn setsketch_with_counts(&self) -> bool {
        self.kmer_result == KmerResult::FullSetSketch
            && (self.save_kmercounts || self.count_threshold > 0.)
    }

    /// Flatten the configuration matrix into the per-file consumption mode.
    /// EditDistance never reaches this; it is routed to the by-sequence
    /// pipeline before any file is opened.
    pub fn mode(&self) -> SketchMode {
        if self.kmer_result == KmerResult::FullMmerSequence {
            SketchMode::Sequence
        } else if matches!(
            self.sspace,
            SimilaritySpace::Multiset | SimilaritySpace::ProbSet
        ) || matches!(
            self.kmer_result,
            KmerResult::FullMmerSet | KmerResult::FullMmerCountdict
        ) || self.setsketch_with_counts()
        {
            SketchMode::Counted
        } else {
            SketchMode::Stream
        }
    }

    /// Fail-fast validation, before any I/O.
    pub fn check(&self) -> Result<(), SketchError> {
        if self.k == 0 {
            return Err(SketchError::config("k must be at least 1"));
        }
        if self.sketchsize == 0 {
            return Err(SketchError::config("sketchsize must be positive"));
        }
        if self.w != 0 && self.w < self.k {
            return Err(SketchError::config(format!(
                "window size {} is smaller than k = {}",
                self.w, self.k
            )));
        }
        if self.sspace == SimilaritySpace::EditDistance && !self.parse_by_seq {
            return Err(SketchError::config(
                "edit distance space is only available in parse-by-seq mode, \
                 as it is only defined on strings rather than string collections",
            ));
        }
        if !self.parse_protein && self.window() > self.k && self.k > 64 {
            return Err(SketchError::config(
                "minimizer windows over nucleotide input require k <= 64",
            ));
        }
        Ok(())
    }

    /// Copy with the implicit rules applied. Must run before the parallel
    /// region; MULTISET and PSET always save counts.
    pub fn normalized(&self) -> SketchParams {
        let mut p = self.clone();
        if matches!(
            p.sspace,
            SimilaritySpace::Multiset | SimilaritySpace::ProbSet
        ) {
            p.save_kmercounts = true;
        }
        p
    }

    /// Filename tag for the count value type.
    pub fn count_type_tag(&self) -> &'static str {
        "f64"
    }

    /// Filename tag for the active hash family.
    pub fn rolling_hash_tag(&self) -> &'static str {
        if self.parse_protein {
            "protein"
        } else {
            "dna"
        }
    }

    /// Trailing destination-name suffix identifying the artifact kind.
    pub fn suffix(&self) -> &'static str {
        match self.kmer_result {
            KmerResult::FullMmerSet => ".kmerset",
            KmerResult::FullMmerCountdict => ".kmercountdict",
            KmerResult::FullMmerSequence => ".mmerseq",
            _ => match self.sspace {
                SimilaritySpace::Multiset => ".bmh",
                SimilaritySpace::ProbSet => ".pmh",
                SimilaritySpace::EditDistance => ".omh",
                SimilaritySpace::Set => match self.kmer_result {
                    KmerResult::OnePerm => ".opss",
                    _ => ".ss",
                },
            },
        }
    }

    /// True when an m-mer must be dropped before sketching.
    pub fn filtered64(&self, h: u64) -> bool {
        self.fs.as_deref().is_some_and(|fs| fs.contains64(h))
    }

    pub fn filtered128(&self, h: u128) -> bool {
        self.fs.as_deref().is_some_and(|fs| fs.contains128(h))
    }
}
