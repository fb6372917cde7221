//! Per-sequence sketching: one row per FASTX record, merged across files
//! into a single flat result with `<seqname>:<filename>` row names.

use std::time::Instant;

use log::{debug, info};
use needletail::parse_fastx_file;
use rayon::prelude::*;

use crate::cmd::{SimilaritySpace, SketchMode, SketchParams};
use crate::encodings::{for_each_substr, Encoder};
use crate::errors::SketchError;
use crate::sketch::fold_u128;
use crate::sketcher::onefile::{self, finalize_counted, finalize_stream};
use crate::sketcher::{dest, SketchSet, SketchingResult};

/// Sketch every record of every substream of one path line into a
/// sub-result with local row indexing.
pub(crate) fn sketch_file_by_seq(
    p: &SketchParams,
    path_line: &str,
    set: &mut SketchSet,
) -> Result<SketchingResult, SketchError> {
    let start = Instant::now();
    let enc = Encoder::from_params(p);
    let ss = p.sketchsize();
    let mut sub = SketchingResult::default();
    let track_kmers = p.save_kmers() || p.build_mmer_matrix();
    let track_counts = p.build_count_matrix();

    for_each_substr(path_line, |subpath| {
        let mut reader = parse_fastx_file(subpath)?;
        while let Some(record) = reader.next() {
            let record = record?;
            let name = String::from_utf8_lossy(record.id()).into_owned();
            let seq = record.seq();
            set.reset();

            let (cardinality, signatures, kmers, kmercounts) =
                if p.sspace() == SimilaritySpace::EditDistance {
                    let omh = set
                        .omh
                        .as_mut()
                        .ok_or_else(|| SketchError::internal("edit distance without an OrderMinHash"))?;
                    let nmers = omh.sketch_sequence(&seq);
                    sub.sequences.push(String::from_utf8_lossy(&seq).into_owned());
                    (nmers as f64, Some(omh.data().to_vec()), None, None)
                } else {
                    sketch_record(p, &enc, &seq, set)?
                };

            sub.names.push(name);
            sub.cardinalities.push(cardinality);
            if p.build_sig_matrix() {
                match signatures {
                    Some(sigs) => sub.signatures.extend_from_slice(&sigs[..ss]),
                    None => sub.signatures.resize(sub.signatures.len() + ss, 0.),
                }
            }
            if track_kmers {
                match kmers {
                    Some(ids) => sub.kmers.extend_from_slice(&ids[..ss]),
                    None => sub.kmers.resize(sub.kmers.len() + ss, 0),
                }
            }
            if track_counts {
                match kmercounts {
                    Some(counts) => {
                        let m = counts.len().min(ss);
                        sub.kmercounts.extend_from_slice(&counts[..m]);
                        sub.kmercounts.resize(sub.kmercounts.len() + ss - m, 0.);
                    }
                    None => sub.kmercounts.resize(sub.kmercounts.len() + ss, 0.),
                }
            }
        }
        Ok(())
    })?;

    sub.nperfile = vec![sub.names.len()];
    if !sub.signatures.is_empty() {
        let dst = dest::destination_name(path_line, p);
        onefile::write_f64s(&dst, &sub.signatures)?;
        sub.destination_files = vec![dst];
    }
    debug!(
        "sketched {} sequences from {path_line} in {:?}",
        sub.names.len(),
        start.elapsed()
    );
    Ok(sub)
}

type RecordRow = (f64, Option<Vec<f64>>, Option<Vec<u64>>, Option<Vec<f64>>);

fn sketch_record(
    p: &SketchParams,
    enc: &Encoder,
    seq: &[u8],
    set: &mut SketchSet,
) -> Result<RecordRow, SketchError> {
    let wide = p.hashes_are_128();
    match p.mode() {
        SketchMode::Counted => {
            {
                let (ctr, scratch) = set.counter_and_scratch();
                if wide {
                    enc.for_each_in_seq_128(seq, scratch, |h| {
                        if !p.filtered128(h) {
                            ctr.add128(h)
                        }
                    });
                } else {
                    enc.for_each_in_seq(seq, scratch, |h| {
                        if !p.filtered64(h) {
                            ctr.add(h)
                        }
                    });
                }
            }
            let out = finalize_counted(p, set)?;
            let counts = out
                .idcounts
                .map(|c| c.iter().map(|&x| x as f64).collect())
                .or({
                    if out.kmerveccounts.is_empty() {
                        None
                    } else {
                        Some(out.kmerveccounts)
                    }
                });
            Ok((out.cardinality, out.signatures, out.ids, counts))
        }
        SketchMode::Stream => {
            if let Some(mut opss) = set.opss.take() {
                if wide {
                    enc.for_each_in_seq_128(seq, &mut set.scratch, |h| {
                        if !p.filtered128(h) {
                            opss.update(fold_u128(h))
                        }
                    });
                } else {
                    enc.for_each_in_seq(seq, &mut set.scratch, |h| {
                        if !p.filtered64(h) {
                            opss.update(h)
                        }
                    });
                }
                set.opss = Some(opss);
            } else if let Some(mut fss) = set.fss.take() {
                if wide {
                    enc.for_each_in_seq_128(seq, &mut set.scratch, |h| {
                        if !p.filtered128(h) {
                            fss.update(fold_u128(h))
                        }
                    });
                } else {
                    enc.for_each_in_seq(seq, &mut set.scratch, |h| {
                        if !p.filtered64(h) {
                            fss.update(h)
                        }
                    });
                }
                set.fss = Some(fss);
            } else {
                return Err(SketchError::internal(
                    "both one-perm and full set sketch are absent",
                ));
            }
            let out = finalize_stream(p, set)?;
            Ok((
                out.cardinality,
                Some(out.registers),
                out.ids,
                out.idcounts
                    .map(|c| c.iter().map(|&x| x as f64).collect()),
            ))
        }
        SketchMode::Sequence => Err(SketchError::internal(
            "minimizer sequences have no per-sequence rows",
        )),
    }
}

/// Concatenate per-file sub-results into one flat result.
///
/// With a single file the sub-result passes through, renamed to
/// `<filename>:<seq>`; otherwise rows are packed by prefix sums and renamed
/// to `<seq>:<filename>`, with the filename trimmed at its first space.
pub(crate) fn merge(mut results: Vec<SketchingResult>, paths: &[String]) -> SketchingResult {
    let n = results.len();
    if n == 0 {
        return SketchingResult::default();
    }
    if n == 1 {
        let mut ret = results.pop().unwrap();
        let fname = paths
            .first()
            .map(|s| s.split(' ').next().unwrap_or("").to_string())
            .unwrap_or_default();
        for name in &mut ret.names {
            *name = format!("{fname}:{name}");
        }
        return ret;
    }

    let sizes: Vec<usize> = results.iter().map(|r| r.names.len()).collect();
    let sig_sizes: Vec<usize> = results.iter().map(|r| r.signatures.len()).collect();
    let total_seqs: usize = sizes.iter().sum();
    let total_sigs: usize = sig_sizes.iter().sum();
    let sketchsz = results[0].signatures.len() / results[0].names.len().max(1);

    let mut ret = SketchingResult {
        nperfile: sizes.clone(),
        names: vec![String::new(); total_seqs],
        cardinalities: vec![0.; total_seqs],
        ..SketchingResult::default()
    };
    let any_seqs = results.iter().any(|r| !r.sequences.is_empty());
    if any_seqs {
        ret.sequences = vec![String::new(); total_seqs];
    }
    if total_sigs > 0 {
        ret.signatures = vec![0.; total_sigs];
    }
    let with_kmers = !results[0].kmers.is_empty();
    if with_kmers {
        ret.kmers = vec![0; total_seqs * sketchsz];
    }
    let with_counts = !results[0].kmercounts.is_empty();
    if with_counts {
        ret.kmercounts = vec![0.; total_sigs];
    }

    info!("merging into {} total sequences", total_seqs);
    let zeros = vec![0usize; n];
    let kmer_sizes: Vec<usize> = sizes.iter().map(|&s| s * sketchsz).collect();
    let name_parts = partition(&mut ret.names, &sizes);
    let card_parts = partition(&mut ret.cardinalities, &sizes);
    let seq_parts = partition(&mut ret.sequences, if any_seqs { &sizes } else { &zeros });
    let sig_parts = partition(&mut ret.signatures, if total_sigs > 0 { &sig_sizes } else { &zeros });
    let kmer_parts = partition(&mut ret.kmers, if with_kmers { &kmer_sizes } else { &zeros });
    let count_parts = partition(&mut ret.kmercounts, if with_counts { &sig_sizes } else { &zeros });

    results
        .par_iter()
        .zip(paths.par_iter())
        .zip(name_parts)
        .zip(card_parts)
        .zip(seq_parts)
        .zip(sig_parts)
        .zip(kmer_parts)
        .zip(count_parts)
        .for_each(
            |(((((((src, path), names), cards), seqs), sigs), kmers), counts)| {
                let fname = path.split(' ').next().unwrap_or("");
                for (dst, name) in names.iter_mut().zip(&src.names) {
                    *dst = format!("{name}:{fname}");
                }
                cards.copy_from_slice(&src.cardinalities);
                if !src.sequences.is_empty() {
                    seqs.clone_from_slice(&src.sequences);
                }
                if !src.signatures.is_empty() {
                    sigs.copy_from_slice(&src.signatures);
                }
                if !src.kmers.is_empty() {
                    kmers.copy_from_slice(&src.kmers);
                }
                if !src.kmercounts.is_empty() {
                    counts.copy_from_slice(&src.kmercounts);
                }
            },
        );
    ret
}

fn partition<'a, T>(buf: &'a mut [T], sizes: &[usize]) -> Vec<&'a mut [T]> {
    let mut parts = Vec::with_capacity(sizes.len());
    let mut rest = buf;
    for &s in sizes {
        let (head, tail) = rest.split_at_mut(s);
        parts.push(head);
        rest = tail;
    }
    parts
}
