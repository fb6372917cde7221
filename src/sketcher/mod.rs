//! The sketching pipeline: one sketch row per input file (or per sequence),
//! computed in parallel over a work queue of path lines, with per-thread
//! reusable sketch state and a deterministic artifact cache.

pub mod byseq;
pub mod dest;
pub(crate) mod onefile;

use log::{debug, info};
use rayon::prelude::*;

use crate::cmd::{KmerResult, SimilaritySpace, SketchParams};
use crate::encodings::EncoderScratch;
use crate::errors::SketchError;
use crate::sketch::{BagMinHash, Counter, FullSetSketch, OnePermSetSketch, OrderMinHash, ProbMinHash};
use crate::RegT;

/// Everything a sketching run produces, matrices laid out row-major with one
/// row per file (or per sequence when parse-by-seq is on).
#[derive(Debug, Default)]
pub struct SketchingResult {
    pub names: Vec<String>,
    pub destination_files: Vec<String>,
    pub kmerfiles: Vec<String>,
    pub kmercountfiles: Vec<String>,
    pub sequences: Vec<String>,
    pub signatures: Vec<RegT>,
    pub kmers: Vec<u64>,
    pub kmercounts: Vec<f64>,
    pub cardinalities: Vec<f64>,
    /// Rows contributed per file; only populated when parse-by-seq is on.
    pub nperfile: Vec<usize>,
}

impl SketchingResult {
    pub fn nrows(&self) -> usize {
        self.names.len()
    }

    /// Registers per row, derived from the signature matrix shape.
    pub fn sketch_size(&self) -> usize {
        if self.names.is_empty() {
            0
        } else {
            self.signatures.len() / self.names.len()
        }
    }

    pub fn summary(&self) -> String {
        let mut msg = String::new();
        if !self.names.is_empty() {
            if self.names.len() < 10 {
                for n in &self.names {
                    msg.push_str(n);
                    msg.push(',');
                }
            }
            msg.push_str(&format!("{} names;", self.names.len()));
        }
        if self.nperfile.is_empty() {
            msg.push_str("sketched by line;");
        } else {
            msg.push_str(&format!("sketched by sequence, {} files;", self.nperfile.len()));
        }
        if !self.signatures.is_empty() {
            msg.push_str(&format!("{} signatures;", self.signatures.len()));
        }
        if !self.kmers.is_empty() {
            msg.push_str(&format!("{} kmers;", self.kmers.len()));
        }
        if !self.kmercounts.is_empty() {
            let mean =
                self.kmercounts.iter().sum::<f64>() / self.kmercounts.len() as f64;
            msg.push_str(&format!(
                "{} kmercounts, mean {mean:0.4};",
                self.kmercounts.len()
            ));
        }
        msg
    }
}

/// One worker's sketch state: exactly the variants the configuration needs,
/// plus the counter and encoder scratch. Reset between files.
pub(crate) struct SketchSet {
    pub opss: Option<OnePermSetSketch>,
    pub fss: Option<FullSetSketch>,
    pub bmh: Option<BagMinHash>,
    pub pmh: Option<ProbMinHash>,
    pub omh: Option<OrderMinHash>,
    pub ctr: Counter,
    pub scratch: EncoderScratch,
}

impl SketchSet {
    pub fn for_params(p: &SketchParams) -> Self {
        let ss = p.sketchsize();
        let save_ids = p.save_kmers() || p.build_mmer_matrix();
        let save_counts = p.save_kmercounts() || p.build_count_matrix();
        let mut set = SketchSet {
            opss: None,
            fss: None,
            bmh: None,
            pmh: None,
            omh: None,
            ctr: Counter::new(p.cssize()),
            scratch: EncoderScratch::new(),
        };
        match p.sspace() {
            SimilaritySpace::Set => match p.kmer_result() {
                KmerResult::OnePerm => {
                    let mut opss = OnePermSetSketch::new(ss);
                    opss.set_mincount(p.count_threshold());
                    set.opss = Some(opss);
                }
                KmerResult::FullSetSketch => {
                    set.fss = Some(FullSetSketch::new(ss, save_ids, save_counts));
                }
                // Exact m-mer results only need the counter.
                _ => {}
            },
            SimilaritySpace::Multiset => {
                set.bmh = Some(BagMinHash::new(ss, save_ids, save_counts));
            }
            SimilaritySpace::ProbSet => {
                set.pmh = Some(ProbMinHash::new(ss));
            }
            SimilaritySpace::EditDistance => {
                set.omh = Some(OrderMinHash::new(ss, p.k() as usize));
            }
        }
        set
    }

    /// Restore every allocated variant to its post-construction state.
    pub fn reset(&mut self) {
        if let Some(s) = &mut self.opss {
            s.reset();
        }
        if let Some(s) = &mut self.fss {
            s.reset();
        }
        if let Some(s) = &mut self.bmh {
            s.reset();
        }
        if let Some(s) = &mut self.pmh {
            s.reset();
        }
        if let Some(s) = &mut self.omh {
            s.reset();
        }
        self.ctr.reset();
    }

    pub fn counter_and_scratch(&mut self) -> (&mut Counter, &mut EncoderScratch) {
        (&mut self.ctr, &mut self.scratch)
    }
}

/// Sketch every path line of `paths` under `params`.
///
/// Validates and normalizes the configuration, then runs a dynamically
/// scheduled parallel loop over the path index; each worker owns one
/// [`SketchSet`] for its whole lifetime. All errors abort the run.
pub fn fastx2sketch(
    params: &SketchParams,
    paths: &[String],
) -> Result<SketchingResult, SketchError> {
    if paths.is_empty() {
        return Err(SketchError::config("can't sketch an empty path set"));
    }
    params.check()?;
    let p = params.normalized();
    if p.parse_by_seq() && p.kmer_result() == KmerResult::FullMmerSequence {
        return Err(SketchError::config(
            "per-sequence minimizer sequences are not supported",
        ));
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(p.nthreads())
        .build()
        .map_err(|e| SketchError::internal(format!("failed to build thread pool: {e}")))?;

    if p.parse_by_seq() {
        let subs: Result<Vec<SketchingResult>, SketchError> = pool.install(|| {
            paths
                .par_iter()
                .map_init(
                    || SketchSet::for_params(&p),
                    |set, path| {
                        debug!("sketching file {path} by sequence");
                        byseq::sketch_file_by_seq(&p, path, set)
                    },
                )
                .collect()
        });
        info!("merging {} per-file results", paths.len());
        return Ok(byseq::merge(subs?, paths));
    }

    info!(
        "sketching {} paths: space {}, result {}",
        paths.len(),
        p.sspace(),
        p.kmer_result()
    );
    if paths.len() == 1 {
        debug!("only one thread is used per file; a single input may be slow");
    }

    let rows: Result<Vec<onefile::FileRow>, SketchError> = pool.install(|| {
        paths
            .par_iter()
            .map_init(
                || SketchSet::for_params(&p),
                |set, path| onefile::sketch_one_path(&p, path, set),
            )
            .collect()
    });
    let rows = rows?;

    let ss = p.sketchsize();
    let n = paths.len();
    let mut ret = SketchingResult {
        names: paths.to_vec(),
        destination_files: vec![String::new(); n],
        cardinalities: vec![0.; n],
        ..SketchingResult::default()
    };
    if p.save_kmers() {
        ret.kmerfiles = vec![String::new(); n];
    }
    if p.save_kmercounts() || p.kmer_result() == KmerResult::FullMmerCountdict {
        ret.kmercountfiles = vec![String::new(); n];
    }
    if p.build_sig_matrix() {
        ret.signatures = vec![0.; ss * n];
    }
    if p.build_mmer_matrix() || p.save_kmers() {
        ret.kmers = vec![0; ss * n];
    }
    if p.build_count_matrix() {
        ret.kmercounts = vec![0.; ss * n];
    }

    let ncached = rows.iter().filter(|r| r.cached).count();
    if ncached > 0 {
        info!("reused {ncached}/{n} cached sketches");
    }
    for (i, row) in rows.into_iter().enumerate() {
        ret.destination_files[i] = row.dest;
        ret.cardinalities[i] = row.cardinality;
        if let (Some(file), true) = (row.kmerfile, p.save_kmers()) {
            ret.kmerfiles[i] = file;
        }
        if let Some(file) = row.kmercountfile {
            if !ret.kmercountfiles.is_empty() {
                ret.kmercountfiles[i] = file;
            }
        }
        if let Some(sigs) = row.signatures {
            if !ret.signatures.is_empty() {
                ret.signatures[i * ss..(i + 1) * ss].copy_from_slice(&sigs[..ss]);
            }
        }
        if let Some(kmers) = row.kmers {
            if !ret.kmers.is_empty() {
                ret.kmers[i * ss..(i + 1) * ss].copy_from_slice(&kmers[..ss]);
            }
        }
        if let Some(counts) = row.kmercounts {
            if !ret.kmercounts.is_empty() {
                let m = counts.len().min(ss);
                ret.kmercounts[i * ss..i * ss + m].copy_from_slice(&counts[..m]);
            }
        }
    }
    Ok(ret)
}
