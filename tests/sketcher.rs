use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt};
use tempfile::TempDir;

use fastxsketch::cmd::{KmerFilter, KmerResult, SimilaritySpace, SketchParams};
use fastxsketch::encodings::{Encoder, EncoderScratch};
use fastxsketch::sketcher::fastx2sketch;

fn write_fasta(dir: &Path, name: &str, records: &[(&str, &str)]) -> String {
    let path = dir.join(name);
    let mut f = fs::File::create(&path).unwrap();
    for (id, seq) in records {
        writeln!(f, ">{id}").unwrap();
        writeln!(f, "{seq}").unwrap();
    }
    path.to_str().unwrap().to_string()
}

fn read_u64s(path: &str) -> Vec<u64> {
    let bytes = fs::read(path).unwrap();
    assert_eq!(bytes.len() % 8, 0);
    let mut rdr = std::io::Cursor::new(bytes);
    let mut out = vec![];
    while let Ok(x) = rdr.read_u64::<LittleEndian>() {
        out.push(x);
    }
    out
}

fn read_f64s(path: &str) -> Vec<f64> {
    let bytes = fs::read(path).unwrap();
    assert_eq!(bytes.len() % 8, 0);
    let mut rdr = std::io::Cursor::new(bytes);
    let mut out = vec![];
    while let Ok(x) = rdr.read_f64::<LittleEndian>() {
        out.push(x);
    }
    out
}

/// Every hash the configured encoder emits for one file.
fn all_hashes(p: &SketchParams, path: &str) -> Vec<u64> {
    let enc = Encoder::from_params(p);
    let mut scratch = EncoderScratch::new();
    let mut out = vec![];
    enc.for_each_in_path(path, &mut scratch, |h| out.push(h))
        .unwrap();
    out
}

const SEQ_A: &str = "ACGGTTACGGATTACAGGTTTACGGATTAACGGTATTACGGACGTTTACAGGATCAGGAT";
const SEQ_B: &str = "TTGACCATGGACCATTGACCAGGTGACAGGTTGACCATGGTTTGACCAGTAGACCATGAC";

#[test]
fn full_setsketch_single_file() {
    let tmp = TempDir::new().unwrap();
    let path = write_fasta(tmp.path(), "x.fa", &[("s1", SEQ_A)]);
    let ss = 64;
    let p = SketchParams::builder()
        .k(8)
        .sketchsize(ss)
        .kmer_result(KmerResult::FullSetSketch)
        .build();
    let res = fastx2sketch(&p, &[path.clone()]).unwrap();

    assert_eq!(res.nrows(), 1);
    assert_eq!(res.signatures.len(), ss);
    let dest = &res.destination_files[0];
    assert_eq!(fs::metadata(dest).unwrap().len(), (ss * 8) as u64);

    // The live estimate equals the one recomputed from the register row.
    let sum: f64 = res.signatures.iter().sum();
    assert!((res.cardinalities[0] - ss as f64 / sum).abs() < 1e-9);

    // And it approximates the distinct k-mer count.
    let distinct = all_hashes(&p, &path).into_iter().collect::<HashSet<_>>().len();
    let rel = (res.cardinalities[0] - distinct as f64).abs() / distinct as f64;
    assert!(rel < 0.5, "estimate {} vs {distinct}", res.cardinalities[0]);
}

#[test]
fn signature_matrix_shape() {
    let tmp = TempDir::new().unwrap();
    let ss = 32;
    let paths: Vec<String> = (0..3)
        .map(|i| {
            write_fasta(
                tmp.path(),
                &format!("f{i}.fa"),
                &[("s", if i % 2 == 0 { SEQ_A } else { SEQ_B })],
            )
        })
        .collect();
    let p = SketchParams::builder().k(8).sketchsize(ss).build();
    let res = fastx2sketch(&p, &paths).unwrap();
    assert_eq!(res.signatures.len(), 3 * ss);
    assert_eq!(res.names, paths);
    assert_eq!(res.cardinalities.len(), 3);
    assert_eq!(res.destination_files.len(), 3);
    assert!(res.nperfile.is_empty());
}

#[test]
fn identical_runs_are_byte_identical() {
    let tmp1 = TempDir::new().unwrap();
    let tmp2 = TempDir::new().unwrap();
    let mk = |dir: &Path| write_fasta(dir, "x.fa", &[("s1", SEQ_A), ("s2", SEQ_B)]);
    let p = SketchParams::builder()
        .k(8)
        .sketchsize(16)
        .kmer_result(KmerResult::FullSetSketch)
        .save_kmers(true)
        .save_kmercounts(true)
        .build();
    let r1 = fastx2sketch(&p, &[mk(tmp1.path())]).unwrap();
    let r2 = fastx2sketch(&p, &[mk(tmp2.path())]).unwrap();
    assert_eq!(
        fs::read(&r1.destination_files[0]).unwrap(),
        fs::read(&r2.destination_files[0]).unwrap()
    );
    assert_eq!(r1.signatures, r2.signatures);
    assert_eq!(r1.cardinalities, r2.cardinalities);
}

#[test]
fn cache_round_trip_skips_recompute() {
    let tmp = TempDir::new().unwrap();
    let path = write_fasta(tmp.path(), "x.fa", &[("s1", SEQ_A)]);
    let p = SketchParams::builder()
        .k(8)
        .sketchsize(16)
        .kmer_result(KmerResult::FullSetSketch)
        .save_kmers(true)
        .cache_sketches(true)
        .build();
    let r1 = fastx2sketch(&p, &[path.clone()]).unwrap();

    // With the input gone, only a true cache hit can succeed.
    fs::remove_file(&path).unwrap();
    let r2 = fastx2sketch(&p, &[path.clone()]).unwrap();
    assert_eq!(r1.signatures, r2.signatures);
    assert_eq!(r1.kmers, r2.kmers);
    assert_eq!(r1.cardinalities, r2.cardinalities);
}

#[test]
fn missing_gating_artifact_is_a_cache_miss() {
    let tmp = TempDir::new().unwrap();
    let path = write_fasta(tmp.path(), "x.fa", &[("s1", SEQ_A)]);
    let p = SketchParams::builder()
        .k(8)
        .sketchsize(16)
        .kmer_result(KmerResult::FullSetSketch)
        .save_kmers(true)
        .cache_sketches(true)
        .build();
    let r1 = fastx2sketch(&p, &[path.clone()]).unwrap();

    // Deleting the k-mer artifact invalidates the hit; recomputation needs
    // the input back.
    fs::remove_file(&r1.kmerfiles[0]).unwrap();
    fs::remove_file(&path).unwrap();
    assert!(fastx2sketch(&p, &[path.clone()]).is_err());

    write_fasta(tmp.path(), "x.fa", &[("s1", SEQ_A)]);
    let r2 = fastx2sketch(&p, &[path.clone()]).unwrap();
    assert_eq!(r1.signatures, r2.signatures);
    assert!(Path::new(&r2.kmerfiles[0]).is_file());
}

#[test]
fn full_mmer_set_with_bottom_k_signatures() {
    let tmp = TempDir::new().unwrap();
    let path = write_fasta(tmp.path(), "x.fa", &[("s1", SEQ_A)]);
    let ss = 8;
    let p = SketchParams::builder()
        .k(8)
        .sketchsize(ss)
        .kmer_result(KmerResult::FullMmerSet)
        .save_kmercounts(true)
        .build();
    let res = fastx2sketch(&p, &[path.clone()]).unwrap();

    let mut distinct: Vec<u64> = all_hashes(&p, &path)
        .into_iter()
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    distinct.sort_unstable();

    // The destination holds the full sorted key set.
    let keys = read_u64s(&res.destination_files[0]);
    assert_eq!(keys, distinct);
    assert_eq!(res.cardinalities[0], distinct.len() as f64);

    // The signature row carries the bottom-ss keys, bit-reinterpreted.
    let expected: Vec<u64> = distinct.iter().take(ss).copied().collect();
    let row: Vec<u64> = res.signatures.iter().map(|r| r.to_bits()).collect();
    assert_eq!(row, expected);

    // Counts artifact is one double per admitted key.
    let counts = read_f64s(&res.kmercountfiles[0]);
    assert_eq!(counts.len(), distinct.len());
    assert!(counts.iter().all(|&c| c >= 1.));
}

#[test]
fn kmerset_cache_reload_derives_cardinality_from_input_filesize() {
    let tmp = TempDir::new().unwrap();
    let path = write_fasta(tmp.path(), "x.fa", &[("s1", SEQ_A)]);
    let p = SketchParams::builder()
        .k(8)
        .sketchsize(8)
        .kmer_result(KmerResult::FullMmerSet)
        .cache_sketches(true)
        .build();
    let r1 = fastx2sketch(&p, &[path.clone()]).unwrap();
    let nkeys = fs::metadata(&r1.destination_files[0]).unwrap().len() / 8;
    assert_eq!(r1.cardinalities[0], nkeys as f64);

    // On reload the cardinality becomes the input size over the key width,
    // a coarser proxy than the live key count.
    let input_bytes = fs::metadata(&path).unwrap().len();
    let r2 = fastx2sketch(&p, &[path]).unwrap();
    assert_eq!(r2.cardinalities[0], (input_bytes / 8) as f64);
}

#[test]
fn countdict_cardinality_is_total_weight() {
    let tmp = TempDir::new().unwrap();
    let path = write_fasta(tmp.path(), "x.fa", &[("s1", SEQ_A)]);
    let p = SketchParams::builder()
        .k(8)
        .sketchsize(8)
        .kmer_result(KmerResult::FullMmerCountdict)
        .cache_sketches(true)
        .build();
    let total = all_hashes(&p, &path).len() as f64;
    let r1 = fastx2sketch(&p, &[path.clone()]).unwrap();
    assert_eq!(r1.cardinalities[0], total);

    // Cached reload sums the memory-mapped counts file.
    fs::remove_file(&path).unwrap();
    let r2 = fastx2sketch(&p, &[path.clone()]).unwrap();
    assert_eq!(r2.cardinalities[0], total);
}

#[test]
fn multiset_cardinality_is_total_weight() {
    let tmp = TempDir::new().unwrap();
    let path = write_fasta(tmp.path(), "x.fa", &[("s1", SEQ_A)]);
    let p = SketchParams::builder()
        .k(8)
        .sketchsize(32)
        .sspace(SimilaritySpace::Multiset)
        .build();
    let total = all_hashes(&p, &path).len() as f64;
    let res = fastx2sketch(&p, &[path.clone()]).unwrap();
    assert_eq!(res.cardinalities[0], total);
    // MULTISET implies count saving.
    assert!(!res.kmercountfiles.is_empty());
    assert!(Path::new(&res.kmercountfiles[0]).is_file());
}

#[test]
fn filtered_mmers_never_reach_a_sketch() {
    let tmp = TempDir::new().unwrap();
    let path = write_fasta(tmp.path(), "x.fa", &[("s1", SEQ_A)]);
    let base = SketchParams::builder()
        .k(8)
        .sketchsize(8)
        .kmer_result(KmerResult::FullMmerSet)
        .build();
    let distinct: HashSet<u64> = all_hashes(&base, &path).into_iter().collect();
    let banned = *distinct.iter().min().unwrap();

    let mut filter = KmerFilter::default();
    filter.insert64(banned);
    let p = SketchParams::builder()
        .k(8)
        .sketchsize(8)
        .kmer_result(KmerResult::FullMmerSet)
        .fs(Some(Arc::new(filter)))
        .build();
    let res = fastx2sketch(&p, &[path.clone()]).unwrap();
    let keys = read_u64s(&res.destination_files[0]);
    assert_eq!(keys.len(), distinct.len() - 1);
    assert!(!keys.contains(&banned));
}

#[test]
fn mmer_sequence_with_homopolymer_compression() {
    let tmp = TempDir::new().unwrap();
    // Long homopolymers produce runs of identical minimizers.
    let seq = "AAAAAAAAAACCCCCCCCCCGGGGGGGGGGACGTACGTACGT";
    let path = write_fasta(tmp.path(), "x.fa", &[("s1", seq)]);
    let p = SketchParams::builder()
        .k(4)
        .sketchsize(8)
        .kmer_result(KmerResult::FullMmerSequence)
        .homopolymer_compress_minimizers(true)
        .build();
    let res = fastx2sketch(&p, &[path]).unwrap();
    let written = read_u64s(&res.destination_files[0]);
    assert_eq!(written.len() as f64, res.cardinalities[0]);
    for pair in written.windows(2) {
        assert_ne!(pair[0], pair[1]);
    }
}

#[test]
fn edit_distance_requires_parse_by_seq() {
    let p = SketchParams::builder()
        .sspace(SimilaritySpace::EditDistance)
        .build();
    // Fails during validation, before any path is opened.
    let err = fastx2sketch(&p, &["no-such-file.fa".to_string()]).unwrap_err();
    assert!(matches!(err, fastxsketch::Error::Config { .. }));
}

#[test]
fn empty_path_set_is_rejected() {
    let p = SketchParams::builder().build();
    let err = fastx2sketch(&p, &[]).unwrap_err();
    assert!(matches!(err, fastxsketch::Error::Config { .. }));
}

#[test]
fn by_seq_merge_renames_rows() {
    let tmp = TempDir::new().unwrap();
    let ss = 16;
    let x = write_fasta(tmp.path(), "x.fa", &[("a", SEQ_A), ("b", SEQ_B)]);
    let y = write_fasta(tmp.path(), "y.fa", &[("c", SEQ_A)]);
    let p = SketchParams::builder()
        .k(8)
        .sketchsize(ss)
        .parse_by_seq(true)
        .build();
    let res = fastx2sketch(&p, &[x.clone(), y.clone()]).unwrap();

    assert_eq!(res.nperfile, vec![2, 1]);
    assert_eq!(res.nrows(), 3);
    assert_eq!(
        res.names,
        vec![format!("a:{x}"), format!("b:{x}"), format!("c:{y}")]
    );
    assert_eq!(res.signatures.len(), 3 * ss);
    assert_eq!(res.cardinalities.len(), 3);
    for name in &res.names {
        assert_eq!(name.matches(':').count(), 1);
    }
}

#[test]
fn by_seq_edit_distance_sketches_rows() {
    let tmp = TempDir::new().unwrap();
    let ss = 16;
    let x = write_fasta(tmp.path(), "x.fa", &[("a", SEQ_A), ("b", SEQ_A)]);
    let p = SketchParams::builder()
        .k(6)
        .sketchsize(ss)
        .sspace(SimilaritySpace::EditDistance)
        .parse_by_seq(true)
        .build();
    let res = fastx2sketch(&p, &[x]).unwrap();
    assert_eq!(res.nrows(), 2);
    assert_eq!(res.signatures.len(), 2 * ss);
    // Identical sequences sketch identically.
    assert_eq!(res.signatures[..ss], res.signatures[ss..]);
    assert!(res.signatures.iter().all(|r| r.is_finite()));
    assert_eq!(res.sequences.len(), 2);
}

#[test]
fn oneperm_streaming_with_artifacts() {
    let tmp = TempDir::new().unwrap();
    let ss = 32;
    let path = write_fasta(tmp.path(), "x.fa", &[("s1", SEQ_A), ("s2", SEQ_B)]);
    let p = SketchParams::builder()
        .k(8)
        .sketchsize(ss)
        .save_kmers(true)
        .save_kmercounts(true)
        .build();
    let res = fastx2sketch(&p, &[path]).unwrap();
    assert_eq!(fs::metadata(&res.destination_files[0]).unwrap().len(), (ss * 8) as u64);
    assert_eq!(fs::metadata(&res.kmerfiles[0]).unwrap().len(), (ss * 8) as u64);
    assert_eq!(
        fs::metadata(&res.kmercountfiles[0]).unwrap().len(),
        (ss * 8) as u64
    );
    // Every register was densified to a finite value.
    assert!(res.signatures.iter().all(|r| r.is_finite()));
    assert!(res.cardinalities[0] > 0.);
}

#[test]
fn substreams_concatenate_into_one_row() {
    let tmp = TempDir::new().unwrap();
    let a = write_fasta(tmp.path(), "a.fa", &[("s", SEQ_A)]);
    let b = write_fasta(tmp.path(), "b.fa", &[("s", SEQ_B)]);
    let both = write_fasta(tmp.path(), "ab.fa", &[("s1", SEQ_A), ("s2", SEQ_B)]);

    let p = SketchParams::builder()
        .k(8)
        .sketchsize(8)
        .kmer_result(KmerResult::FullMmerSet)
        .build();
    let joined = fastx2sketch(&p, &[format!("{a} {b}")]).unwrap();
    let merged = fastx2sketch(&p, &[both]).unwrap();
    // One row, fed from both files, with the same k-mer content as the
    // concatenated records.
    assert_eq!(joined.nrows(), 1);
    assert_eq!(joined.cardinalities[0], merged.cardinalities[0]);
}

#[test]
fn window_minimizers_shrink_the_set() {
    let tmp = TempDir::new().unwrap();
    let path = write_fasta(tmp.path(), "x.fa", &[("s1", SEQ_A)]);
    let plain = SketchParams::builder()
        .k(8)
        .sketchsize(8)
        .kmer_result(KmerResult::FullMmerSet)
        .build();
    let windowed = SketchParams::builder()
        .k(8)
        .w(16)
        .sketchsize(8)
        .kmer_result(KmerResult::FullMmerSet)
        .build();
    let r_plain = fastx2sketch(&plain, &[path.clone()]).unwrap();
    let r_win = fastx2sketch(&windowed, &[path]).unwrap();
    assert!(r_win.cardinalities[0] < r_plain.cardinalities[0]);
    // Distinct windows write distinct artifacts.
    assert_ne!(r_plain.destination_files[0], r_win.destination_files[0]);
}
