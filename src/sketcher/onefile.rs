//! Sketching one input path line: enumerate, update the configured sketch,
//! finalize, and write the artifact set.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::time::Instant;

use byteorder::{LittleEndian, WriteBytesExt};
use log::{debug, info};

use crate::cmd::{KmerResult, SimilaritySpace, SketchMode, SketchParams};
use crate::encodings::{for_each_substr, Encoder};
use crate::errors::SketchError;
use crate::sketch::{bottomk, bottomk128};
use crate::sketcher::dest;
use crate::sketcher::SketchSet;
use crate::RegT;

/// Everything one file contributes back to the run-level result.
#[derive(Debug, Default)]
pub(crate) struct FileRow {
    pub dest: String,
    pub kmerfile: Option<String>,
    pub kmercountfile: Option<String>,
    pub cardinality: f64,
    pub signatures: Option<Vec<RegT>>,
    pub kmers: Option<Vec<u64>>,
    pub kmercounts: Option<Vec<f64>>,
    pub cached: bool,
}

pub(crate) fn sketch_one_path(
    p: &SketchParams,
    path_line: &str,
    set: &mut SketchSet,
) -> Result<FileRow, SketchError> {
    let start = Instant::now();
    let dest = dest::destination_name(path_line, p);
    let destkmer = dest::kmer_artifact_name(&dest);
    let destkmercounts = dest::kmercount_artifact_name(&dest);
    let kmercountfile = (p.save_kmercounts()
        || p.kmer_result() == KmerResult::FullMmerCountdict)
        .then(|| destkmercounts.clone());

    if let Some(hit) = dest::probe_cache(p, path_line, &dest, &destkmer, &destkmercounts)? {
        info!("reusing cached artifacts at {dest} for {path_line}");
        return Ok(FileRow {
            dest,
            kmerfile: p.save_kmers().then_some(destkmer),
            kmercountfile,
            cardinality: hit.cardinality,
            signatures: hit.signatures,
            kmers: hit.kmers,
            kmercounts: hit.kmercounts,
            cached: true,
        });
    }

    set.reset();
    let mut row = match p.mode() {
        SketchMode::Counted => sketch_counted(p, path_line, &dest, &destkmer, &destkmercounts, set),
        SketchMode::Sequence => sketch_mmer_sequence(p, path_line, &dest, set),
        SketchMode::Stream => sketch_stream(p, path_line, &dest, &destkmer, &destkmercounts, set),
    }?;
    row.kmercountfile = kmercountfile;
    info!("sketched {path_line} into {} in {:?}", row.dest, start.elapsed());
    Ok(row)
}

/// Enumerate every substream of the path line, dropping filtered m-mers.
fn enumerate64<F: FnMut(u64)>(
    p: &SketchParams,
    enc: &Encoder,
    path_line: &str,
    scratch: &mut crate::encodings::EncoderScratch,
    mut f: F,
) -> Result<(), SketchError> {
    for_each_substr(path_line, |subpath| {
        debug!("enumerating {subpath} with 64-bit hashes");
        enc.for_each_in_path(subpath, scratch, |h| {
            if !p.filtered64(h) {
                f(h)
            }
        })
    })
}

fn enumerate128<F: FnMut(u128)>(
    p: &SketchParams,
    enc: &Encoder,
    path_line: &str,
    scratch: &mut crate::encodings::EncoderScratch,
    mut f: F,
) -> Result<(), SketchError> {
    for_each_substr(path_line, |subpath| {
        debug!("enumerating {subpath} with 128-bit hashes");
        enc.for_each_in_path_128(subpath, scratch, |h| {
            if !p.filtered128(h) {
                f(h)
            }
        })
    })
}

/// Outcome of draining a counter into the configured target; shared by the
/// per-file and per-sequence pipelines.
pub(crate) struct CountedOutcome {
    pub kmervec64: Vec<u64>,
    pub kmervec128: Vec<u128>,
    pub kmerveccounts: Vec<f64>,
    pub cardinality: f64,
    pub signatures: Option<Vec<RegT>>,
    pub ids: Option<Vec<u64>>,
    pub idcounts: Option<Vec<u32>>,
}

/// Finalize the counter per the configuration matrix. The signature row is
/// the sketch registers for the weighted sketches, or the bottom-k of the
/// exact keys reinterpreted as registers.
pub(crate) fn finalize_counted(
    p: &SketchParams,
    set: &mut SketchSet,
) -> Result<CountedOutcome, SketchError> {
    let ss = p.sketchsize();
    let th = p.count_threshold();
    let mut out = CountedOutcome {
        kmervec64: vec![],
        kmervec128: vec![],
        kmerveccounts: vec![],
        cardinality: 0.,
        signatures: None,
        ids: None,
        idcounts: None,
    };

    if matches!(
        p.kmer_result(),
        KmerResult::FullMmerSet | KmerResult::FullMmerCountdict
    ) {
        if p.hashes_are_128() {
            (out.kmervec128, out.kmerveccounts) = set.ctr.finalize_vec128(th);
        } else {
            (out.kmervec64, out.kmerveccounts) = set.ctr.finalize_vec(th);
        }
        out.cardinality = if p.kmer_result() == KmerResult::FullMmerSet {
            (out.kmervec64.len() + out.kmervec128.len()) as f64
        } else {
            out.kmerveccounts.iter().sum()
        };
    } else if p.sspace() == SimilaritySpace::Multiset {
        let bmh = set
            .bmh
            .as_mut()
            .ok_or_else(|| SketchError::internal("multiset space without a BagMinHash"))?;
        set.ctr.finalize_into_bagminhash(bmh, th);
        out.cardinality = bmh.total_weight();
        if p.build_sig_matrix() {
            out.signatures = Some(bmh.data().to_vec());
        }
        out.ids = bmh.ids().map(<[u64]>::to_vec);
        out.idcounts = bmh.idcounts().map(<[u32]>::to_vec);
    } else if p.sspace() == SimilaritySpace::ProbSet {
        let pmh = set
            .pmh
            .as_mut()
            .ok_or_else(|| SketchError::internal("pset space without a ProbMinHash"))?;
        set.ctr.finalize_into_probminhash(pmh, th);
        out.cardinality = pmh.total_weight();
        if p.build_sig_matrix() {
            out.signatures = Some(pmh.data().to_vec());
        }
        out.ids = Some(pmh.ids().to_vec());
        out.idcounts = Some(pmh.idcounts().to_vec());
    } else if p.setsketch_with_counts() {
        let fss = set
            .fss
            .as_mut()
            .ok_or_else(|| SketchError::internal("counted set space without a set sketch"))?;
        set.ctr.finalize_into_setsketch(fss, th);
        out.cardinality = fss.getcard();
        if p.build_sig_matrix() {
            out.signatures = Some(fss.data().to_vec());
        }
        out.ids = fss.ids().map(<[u64]>::to_vec);
        out.idcounts = fss.idcounts().map(<[u32]>::to_vec);
    } else {
        return Err(SketchError::internal(
            "unexpected space for counter-based m-mer encoding",
        ));
    }

    // Bottom-k of the exact keys stands in for the signature row.
    if (!out.kmervec64.is_empty() || !out.kmervec128.is_empty()) && p.build_sig_matrix() {
        let counts = (!out.kmerveccounts.is_empty()).then_some(out.kmerveccounts.as_slice());
        let keys = if !out.kmervec128.is_empty() {
            bottomk128(&out.kmervec128, counts, ss, th)
        } else {
            bottomk(&out.kmervec64, counts, ss, th)
        };
        out.signatures = Some(keys.into_iter().map(f64::from_bits).collect());
    }
    Ok(out)
}

fn sketch_counted(
    p: &SketchParams,
    path_line: &str,
    dest: &str,
    destkmer: &str,
    destkmercounts: &str,
    set: &mut SketchSet,
) -> Result<FileRow, SketchError> {
    let enc = Encoder::from_params(p);
    if p.hashes_are_128() {
        let (ctr, scratch) = set.counter_and_scratch();
        enumerate128(p, &enc, path_line, scratch, |h| ctr.add128(h))?;
    } else {
        let (ctr, scratch) = set.counter_and_scratch();
        enumerate64(p, &enc, path_line, scratch, |h| ctr.add(h))?;
    }

    let out = finalize_counted(p, set)?;
    let ss = p.sketchsize();

    // Destination buffer priority: exact keys, then the active sketch.
    if !out.kmervec128.is_empty() {
        write_u128s(dest, &out.kmervec128)?;
    } else if !out.kmervec64.is_empty() {
        write_u64s(dest, &out.kmervec64)?;
    } else if let Some(regs) = registers_for_space(p, set)? {
        write_f64s(dest, regs)?;
    } else {
        // An exact mode that admitted nothing still truncates its artifact.
        write_u64s(dest, &[])?;
    }

    let mut row = FileRow {
        dest: dest.to_string(),
        cardinality: out.cardinality,
        signatures: out.signatures,
        ..FileRow::default()
    };

    let exact = matches!(
        p.kmer_result(),
        KmerResult::FullMmerSet | KmerResult::FullMmerCountdict
    );
    if (p.save_kmers() || p.build_mmer_matrix()) && !exact {
        let ids = out
            .ids
            .as_deref()
            .ok_or_else(|| SketchError::internal("id tracking was not enabled"))?;
        write_u64s(destkmer, ids)?;
        row.kmerfile = Some(destkmer.to_string());
        row.kmers = Some(ids.to_vec());
    }

    if p.save_kmercounts() || p.kmer_result() == KmerResult::FullMmerCountdict {
        let tmp: Vec<f64> = if exact {
            out.kmerveccounts.clone()
        } else {
            out.idcounts
                .as_deref()
                .ok_or_else(|| SketchError::internal("count tracking was not enabled"))?
                .iter()
                .map(|&c| c as f64)
                .collect()
        };
        write_f64s(destkmercounts, &tmp)?;
        if p.build_count_matrix() {
            let mut padded = vec![0f64; ss];
            let n = tmp.len().min(ss);
            padded[..n].copy_from_slice(&tmp[..n]);
            row.kmercounts = Some(padded);
        }
    }
    Ok(row)
}

/// The register buffer the counted mode wrote its sketch into, if any.
fn registers_for_space<'s>(
    p: &SketchParams,
    set: &'s SketchSet,
) -> Result<Option<&'s [RegT]>, SketchError> {
    Ok(match p.sspace() {
        SimilaritySpace::Multiset => Some(
            set.bmh
                .as_ref()
                .ok_or_else(|| SketchError::internal("multiset space without a BagMinHash"))?
                .data(),
        ),
        SimilaritySpace::ProbSet => Some(
            set.pmh
                .as_ref()
                .ok_or_else(|| SketchError::internal("pset space without a ProbMinHash"))?
                .data(),
        ),
        SimilaritySpace::Set if p.setsketch_with_counts() => Some(
            set.fss
                .as_ref()
                .ok_or_else(|| SketchError::internal("counted set space without a set sketch"))?
                .data(),
        ),
        _ => None,
    })
}

/// Growable buffer for raw minimizer sequences. Backed by 16-byte cells so
/// 128-bit readers can map it directly; 64-bit entries pack two per cell.
pub(crate) enum MmerSeqBuf {
    Narrow { raw: Vec<u128>, len: usize },
    Wide(Vec<u128>),
}

impl MmerSeqBuf {
    const INITIAL_ENTRIES: usize = 1 << 20;

    pub fn new(wide: bool) -> Self {
        if wide {
            MmerSeqBuf::Wide(Vec::with_capacity(Self::INITIAL_ENTRIES))
        } else {
            MmerSeqBuf::Narrow {
                raw: Vec::with_capacity(Self::INITIAL_ENTRIES / 2),
                len: 0,
            }
        }
    }

    pub fn len(&self) -> usize {
        match self {
            MmerSeqBuf::Narrow { len, .. } => *len,
            MmerSeqBuf::Wide(v) => v.len(),
        }
    }

    pub fn push64(&mut self, x: u64) {
        match self {
            MmerSeqBuf::Narrow { raw, len } => {
                if *len % 2 == 0 {
                    raw.push(x as u128);
                } else {
                    *raw.last_mut().unwrap() |= (x as u128) << 64;
                }
                *len += 1;
            }
            MmerSeqBuf::Wide(_) => unreachable!("64-bit push into wide buffer"),
        }
    }

    pub fn push128(&mut self, x: u128) {
        match self {
            MmerSeqBuf::Wide(v) => v.push(x),
            MmerSeqBuf::Narrow { .. } => unreachable!("128-bit push into narrow buffer"),
        }
    }

    pub fn last64(&self) -> Option<u64> {
        match self {
            MmerSeqBuf::Narrow { raw, len } => {
                if *len == 0 {
                    None
                } else if *len % 2 == 1 {
                    Some(*raw.last().unwrap() as u64)
                } else {
                    Some((*raw.last().unwrap() >> 64) as u64)
                }
            }
            MmerSeqBuf::Wide(_) => None,
        }
    }

    pub fn last128(&self) -> Option<u128> {
        match self {
            MmerSeqBuf::Wide(v) => v.last().copied(),
            MmerSeqBuf::Narrow { .. } => None,
        }
    }

    fn write_to(&self, path: &str) -> Result<(), SketchError> {
        let file = File::create(path).map_err(SketchError::io_at(path))?;
        let mut w = BufWriter::new(file);
        match self {
            MmerSeqBuf::Narrow { raw, len } => {
                for i in 0..*len {
                    let cell = raw[i / 2];
                    let x = if i % 2 == 0 { cell as u64 } else { (cell >> 64) as u64 };
                    w.write_u64::<LittleEndian>(x).map_err(SketchError::io_at(path))?;
                }
            }
            MmerSeqBuf::Wide(v) => {
                for &x in v {
                    w.write_u128::<LittleEndian>(x).map_err(SketchError::io_at(path))?;
                }
            }
        }
        w.flush().map_err(SketchError::io_at(path))?;
        Ok(())
    }
}

fn sketch_mmer_sequence(
    p: &SketchParams,
    path_line: &str,
    dest: &str,
    set: &mut SketchSet,
) -> Result<FileRow, SketchError> {
    let enc = Encoder::from_params(p);
    let wide = p.hashes_are_128();
    let mut buf = MmerSeqBuf::new(wide);
    let hpc = p.homopolymer_compress_minimizers();
    if wide {
        enumerate128(p, &enc, path_line, &mut set.scratch, |h| {
            if hpc && buf.last128() == Some(h) {
                return;
            }
            buf.push128(h);
        })?;
    } else {
        enumerate64(p, &enc, path_line, &mut set.scratch, |h| {
            if hpc && buf.last64() == Some(h) {
                return;
            }
            buf.push64(h);
        })?;
    }
    buf.write_to(dest)?;
    Ok(FileRow {
        dest: dest.to_string(),
        cardinality: buf.len() as f64,
        ..FileRow::default()
    })
}

/// Register-only streaming outcome, shared by the per-sequence pipeline.
pub(crate) struct StreamOutcome {
    pub cardinality: f64,
    pub registers: Vec<RegT>,
    pub ids: Option<Vec<u64>>,
    pub idcounts: Option<Vec<u32>>,
}

pub(crate) fn finalize_stream(
    p: &SketchParams,
    set: &mut SketchSet,
) -> Result<StreamOutcome, SketchError> {
    let want_ids = p.save_kmers() || p.build_mmer_matrix();
    let want_counts = p.save_kmercounts() || p.build_count_matrix();
    if let Some(opss) = set.opss.as_mut() {
        opss.finish();
        Ok(StreamOutcome {
            cardinality: opss.getcard(),
            registers: opss.data().to_vec(),
            ids: want_ids.then(|| opss.ids().to_vec()),
            idcounts: want_counts.then(|| opss.idcounts().to_vec()),
        })
    } else if let Some(fss) = set.fss.as_ref() {
        Ok(StreamOutcome {
            cardinality: fss.getcard(),
            registers: fss.data().to_vec(),
            ids: if want_ids {
                fss.ids().map(<[u64]>::to_vec)
            } else {
                None
            },
            idcounts: if want_counts {
                fss.idcounts().map(<[u32]>::to_vec)
            } else {
                None
            },
        })
    } else {
        Err(SketchError::internal(
            "both one-perm and full set sketch are absent",
        ))
    }
}

fn sketch_stream(
    p: &SketchParams,
    path_line: &str,
    dest: &str,
    destkmer: &str,
    destkmercounts: &str,
    set: &mut SketchSet,
) -> Result<FileRow, SketchError> {
    let enc = Encoder::from_params(p);
    feed_stream(p, &enc, path_line, set)?;
    let out = finalize_stream(p, set)?;

    write_f64s(dest, &out.registers)?;
    let mut row = FileRow {
        dest: dest.to_string(),
        cardinality: out.cardinality,
        signatures: p.build_sig_matrix().then(|| out.registers.clone()),
        ..FileRow::default()
    };
    if p.save_kmers() || p.build_mmer_matrix() {
        let ids = out
            .ids
            .as_deref()
            .ok_or_else(|| SketchError::internal("id tracking was not enabled"))?;
        write_u64s(destkmer, ids)?;
        row.kmerfile = Some(destkmer.to_string());
        row.kmers = Some(ids.to_vec());
    }
    if p.save_kmercounts() || p.build_count_matrix() {
        let counts: Vec<f64> = out
            .idcounts
            .as_deref()
            .ok_or_else(|| SketchError::internal("count tracking was not enabled"))?
            .iter()
            .map(|&c| c as f64)
            .collect();
        if p.save_kmercounts() {
            write_f64s(destkmercounts, &counts)?;
        }
        if p.build_count_matrix() {
            row.kmercounts = Some(counts);
        }
    }
    Ok(row)
}

pub(crate) fn feed_stream(
    p: &SketchParams,
    enc: &Encoder,
    path_line: &str,
    set: &mut SketchSet,
) -> Result<(), SketchError> {
    let wide = p.hashes_are_128();
    if let Some(mut opss) = set.opss.take() {
        let r = if wide {
            enumerate128(p, enc, path_line, &mut set.scratch, |h| {
                opss.update(crate::sketch::fold_u128(h))
            })
        } else {
            enumerate64(p, enc, path_line, &mut set.scratch, |h| opss.update(h))
        };
        set.opss = Some(opss);
        r
    } else if let Some(mut fss) = set.fss.take() {
        let r = if wide {
            enumerate128(p, enc, path_line, &mut set.scratch, |h| {
                fss.update(crate::sketch::fold_u128(h))
            })
        } else {
            enumerate64(p, enc, path_line, &mut set.scratch, |h| fss.update(h))
        };
        set.fss = Some(fss);
        r
    } else {
        Err(SketchError::internal(
            "both one-perm and full set sketch are absent",
        ))
    }
}

pub(crate) fn write_u64s(path: &str, xs: &[u64]) -> Result<(), SketchError> {
    let file = File::create(path).map_err(SketchError::io_at(path))?;
    let mut w = BufWriter::new(file);
    for &x in xs {
        w.write_u64::<LittleEndian>(x).map_err(SketchError::io_at(path))?;
    }
    w.flush().map_err(SketchError::io_at(path))?;
    Ok(())
}

pub(crate) fn write_u128s(path: &str, xs: &[u128]) -> Result<(), SketchError> {
    let file = File::create(path).map_err(SketchError::io_at(path))?;
    let mut w = BufWriter::new(file);
    for &x in xs {
        w.write_u128::<LittleEndian>(x).map_err(SketchError::io_at(path))?;
    }
    w.flush().map_err(SketchError::io_at(path))?;
    Ok(())
}

pub(crate) fn write_f64s(path: &str, xs: &[f64]) -> Result<(), SketchError> {
    let file = File::create(path).map_err(SketchError::io_at(path))?;
    let mut w = BufWriter::new(file);
    for &x in xs {
        w.write_f64::<LittleEndian>(x).map_err(SketchError::io_at(path))?;
    }
    w.flush().map_err(SketchError::io_at(path))?;
    Ok(())
}
