//! Destination naming and the on-disk artifact cache.
//!
//! Destination names are a pure function of `(path, params)`: distinct
//! configurations never collide, and the same configuration always maps to
//! the same artifact set, which is what makes caching sound.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};
use log::debug;
use memmap2::Mmap;

use crate::cmd::{KmerResult, SimilaritySpace, SketchParams};
use crate::errors::SketchError;
use crate::RegT;

/// Derive the signature destination for one input path line.
pub fn destination_name(path_line: &str, p: &SketchParams) -> String {
    let token = path_line.split(' ').next().unwrap_or("");
    let mut dest = if p.trim_folder_paths() {
        let base = Path::new(token)
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| token.to_string());
        if p.outprefix().is_empty() {
            base
        } else {
            format!("{}/{}", p.outprefix(), base)
        }
    } else {
        token.to_string()
    };
    dest.push('.');
    dest.push_str(&p.k().to_string());
    if p.window() > p.k() {
        dest.push('.');
        dest.push_str(&p.window().to_string());
    }
    if p.count_threshold() > 0. {
        dest.push('.');
        dest.push_str(&p.count_threshold().to_string());
    }
    if !matches!(
        p.sspace(),
        SimilaritySpace::Set | SimilaritySpace::EditDistance
    ) {
        dest.push('.');
        dest.push_str(p.count_type_tag());
    }
    dest.push('.');
    dest.push_str(&p.sspace().to_string());
    dest.push('.');
    dest.push_str(p.rolling_hash_tag());
    dest.push_str(p.suffix());
    dest
}

/// `dest` with its final extension component removed.
pub fn dest_prefix(dest: &str) -> &str {
    match dest.rfind('.') {
        Some(i) => &dest[..i],
        None => dest,
    }
}

pub fn kmer_artifact_name(dest: &str) -> String {
    format!("{}.kmer.u64", dest_prefix(dest))
}

pub fn kmercount_artifact_name(dest: &str) -> String {
    format!("{}.kmercounts.f64", dest_prefix(dest))
}

/// One row reloaded from cached artifacts.
pub struct CachedRow {
    pub cardinality: f64,
    pub signatures: Option<Vec<RegT>>,
    pub kmers: Option<Vec<u64>>,
    pub kmercounts: Option<Vec<f64>>,
}

/// Check the cache-hit predicate and, on a hit, load the row. Existence of
/// every gating file is revalidated on each run; contents are trusted.
/// `path_line` is the original input the artifacts were derived from.
pub fn probe_cache(
    p: &SketchParams,
    path_line: &str,
    dest: &str,
    destkmer: &str,
    destkmercounts: &str,
) -> Result<Option<CachedRow>, SketchError> {
    if !p.cache_sketches() {
        return Ok(None);
    }
    if !Path::new(dest).is_file() {
        return Ok(None);
    }
    if p.save_kmers() && !Path::new(destkmer).is_file() {
        return Ok(None);
    }
    let counts_required =
        p.save_kmercounts() || p.kmer_result() == KmerResult::FullMmerCountdict;
    if counts_required && !Path::new(destkmercounts).is_file() {
        return Ok(None);
    }

    let ss = p.sketchsize();
    let row = match p.kmer_result() {
        KmerResult::OnePerm | KmerResult::FullSetSketch => {
            let mut cardinality = 0.;
            let signatures = if p.build_sig_matrix() {
                let regs = read_f64s(dest, ss)?;
                cardinality = ss as f64 / regs.iter().sum::<f64>();
                Some(regs)
            } else {
                None
            };
            let kmers = if p.save_kmers() || p.build_mmer_matrix() {
                Some(read_u64s(destkmer, ss)?)
            } else {
                None
            };
            let kmercounts = if p.build_count_matrix() {
                Some(read_f64s(destkmercounts, ss)?)
            } else {
                None
            };
            CachedRow {
                cardinality,
                signatures,
                kmers,
                kmercounts,
            }
        }
        KmerResult::FullMmerCountdict => {
            let file = File::open(destkmercounts).map_err(SketchError::io_at(destkmercounts))?;
            let map = unsafe { Mmap::map(&file) }.map_err(SketchError::io_at(destkmercounts))?;
            if map.len() % std::mem::size_of::<f64>() != 0 {
                return Err(SketchError::CacheInvalid {
                    path: destkmercounts.to_string(),
                    message: format!("size {} is not a multiple of 8", map.len()),
                });
            }
            let cardinality = map
                .chunks_exact(8)
                .map(|b| f64::from_le_bytes(b.try_into().unwrap()))
                .sum();
            CachedRow {
                cardinality,
                signatures: None,
                kmers: None,
                kmercounts: None,
            }
        }
        KmerResult::FullMmerSet | KmerResult::FullMmerSequence => {
            // The cardinality proxy divides the original input's size by
            // the key width, not the artifact's.
            let bytes = std::fs::metadata(path_line)
                .map_err(SketchError::io_at(path_line))?
                .len();
            CachedRow {
                cardinality: (bytes / p.key_width() as u64) as f64,
                signatures: None,
                kmers: None,
                kmercounts: None,
            }
        }
    };
    debug!("cache hit, using saved data at {dest}");
    Ok(Some(row))
}

fn read_f64s(path: &str, n: usize) -> Result<Vec<f64>, SketchError> {
    let file = File::open(path).map_err(SketchError::io_at(path))?;
    let mut reader = BufReader::new(file);
    let mut out = vec![0f64; n];
    reader
        .read_f64_into::<LittleEndian>(&mut out)
        .map_err(SketchError::io_at(path))?;
    Ok(out)
}

fn read_u64s(path: &str, n: usize) -> Result<Vec<u64>, SketchError> {
    let file = File::open(path).map_err(SketchError::io_at(path))?;
    let mut reader = BufReader::new(file);
    let mut out = vec![0u64; n];
    reader
        .read_u64_into::<LittleEndian>(&mut out)
        .map_err(SketchError::io_at(path))?;
    Ok(out)
}
