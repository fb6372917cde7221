use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use byteorder::{LittleEndian, WriteBytesExt};
use clap::{Args, Parser, Subcommand};
use log::{info, warn};

use fastxsketch::cmd::{KmerResult, SimilaritySpace, SketchParams};
use fastxsketch::sketcher::{fastx2sketch, SketchingResult};
use fastxsketch::Error;

#[derive(Parser)]
#[clap(author, version, about = "Sketch the k-mer content of FASTX collections", arg_required_else_help = true)]
struct Cli {
    #[clap(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Sketch the given sequencing files into fixed-size signatures.
    #[clap(display_order = 1)]
    Sketch(SketchArgs),
}

#[derive(Args, Default)]
struct SketchArgs {
    #[clap(help_heading = "INPUT", help = "fasta/fastq files; gzip optional. A quoted, space-separated group is sketched as one row.")]
    files: Vec<String>,

    #[clap(short = 'F', long = "paths-file", help_heading = "INPUT", help = "File with one input path line per row; gzip optional.")]
    paths_file: Option<String>,

    #[clap(short, default_value_t = 16, help_heading = "ALGORITHM", help = "k-mer length.")]
    k: u32,

    #[clap(short, default_value_t = 0, help_heading = "ALGORITHM", help = "Window size; emits one minimizer per window when larger than k.")]
    w: u32,

    #[clap(short = 'S', long, default_value_t = 1024, help_heading = "ALGORITHM", help = "Registers per sketch.")]
    sketchsize: usize,

    #[clap(long, default_value = "set", help_heading = "ALGORITHM", help = "Similarity space: set, multiset, pset, editdistance.")]
    space: String,

    #[clap(long, default_value = "oneperm", help_heading = "ALGORITHM", help = "Result kind within set space: oneperm, setsketch, kmerset, kmercountdict, mmerseq.")]
    result: String,

    #[clap(long, default_value_t = 0., help_heading = "ALGORITHM", help = "Minimum m-mer multiplicity (exclusive).")]
    count_threshold: f64,

    #[clap(long, default_value_t = 0, help_heading = "ALGORITHM", help = "Approximate counter size hint.")]
    cssize: usize,

    #[clap(long, default_value_t = 42, help_heading = "ALGORITHM", help = "Hash seed.")]
    seed: u64,

    #[clap(long, help_heading = "ALGORITHM", help = "Treat input as amino acid sequence.")]
    protein: bool,

    #[clap(long, help_heading = "ALGORITHM", help = "Use 128-bit rolling hashes.")]
    use128: bool,

    #[clap(long, help_heading = "ALGORITHM", help = "Suppress consecutive equal minimizers.")]
    hpc: bool,

    #[clap(long, help_heading = "ALGORITHM", help = "One sketch row per sequence instead of per file.")]
    by_seq: bool,

    #[clap(short, default_value_t = 0, help_heading = "ALGORITHM", help = "Number of threads; 0 for the rayon default.")]
    threads: usize,

    #[clap(long, help_heading = "OUTPUT", help = "Reuse compatible cached artifacts.")]
    cache: bool,

    #[clap(long, help_heading = "OUTPUT", help = "Write per-row m-mer id artifacts.")]
    save_kmers: bool,

    #[clap(long, help_heading = "OUTPUT", help = "Write per-row m-mer count artifacts.")]
    save_kmercounts: bool,

    #[clap(long, help_heading = "OUTPUT", help = "Collect the per-row m-mer id matrix in memory.")]
    build_mmer_matrix: bool,

    #[clap(long, help_heading = "OUTPUT", help = "Collect the per-row m-mer count matrix in memory.")]
    build_count_matrix: bool,

    #[clap(long, help_heading = "OUTPUT", help = "Trim folder components off destination names.")]
    trim_folder_paths: bool,

    #[clap(long, default_value_t = String::new(), help_heading = "OUTPUT", help = "Prefix for trimmed destination names.")]
    outprefix: String,

    #[clap(short, long, help_heading = "OUTPUT", help = "Stacked output file; defaults next to a single input.")]
    output: Option<String>,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    let Mode::Sketch(args) = cli.mode;
    if let Err(e) = run_sketch(args) {
        eprintln!("fastxsketch: {e}");
        std::process::exit(1);
    }
}

fn run_sketch(args: SketchArgs) -> Result<(), Error> {
    let mut paths = args.files.clone();
    if let Some(pf) = &args.paths_file {
        let (reader, _format) = niffler::from_path(pf)?;
        for line in BufReader::new(reader).lines() {
            let line = line.map_err(Error::io_at(pf))?;
            if !line.trim().is_empty() {
                paths.push(line);
            }
        }
    }

    let params = SketchParams::builder()
        .k(args.k)
        .w(args.w)
        .sketchsize(args.sketchsize)
        .sspace(SimilaritySpace::try_from(args.space.as_str())?)
        .kmer_result(KmerResult::try_from(args.result.as_str())?)
        .count_threshold(args.count_threshold)
        .cssize(args.cssize)
        .seed(args.seed)
        .parse_protein(args.protein)
        .use128(args.use128)
        .homopolymer_compress_minimizers(args.hpc)
        .parse_by_seq(args.by_seq)
        .nthreads(args.threads)
        .cache_sketches(args.cache)
        .save_kmers(args.save_kmers)
        .save_kmercounts(args.save_kmercounts)
        .build_mmer_matrix(args.build_mmer_matrix)
        .build_count_matrix(args.build_count_matrix)
        .trim_folder_paths(args.trim_folder_paths)
        .outprefix(args.outprefix.clone())
        .build();

    let result = fastx2sketch(&params, &paths)?;
    info!("{}", result.summary());

    let outfile = match args.output {
        Some(o) => Some(o),
        None if paths.len() == 1 => Some(default_outfile(&paths[0], &params)),
        None => None,
    };
    if let Some(outfile) = outfile {
        info!("writing stacked sketches to {outfile}");
        write_stacked(&outfile, &result)?;
    }
    Ok(())
}

/// Default stacked-output name for a single input.
fn default_outfile(path: &str, p: &SketchParams) -> String {
    let suf = match p.sspace() {
        SimilaritySpace::Set => {
            if p.kmer_result() == KmerResult::OnePerm {
                ".opss"
            } else {
                ".ss"
            }
        }
        SimilaritySpace::Multiset => ".bmh",
        SimilaritySpace::ProbSet => ".pmh",
        SimilaritySpace::EditDistance => ".omh",
    };
    let token = path.split(' ').next().unwrap_or("");
    let mut outfile = format!("{token}{suf}");
    if p.trim_folder_paths() {
        outfile = Path::new(&outfile)
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or(outfile);
        if !p.outprefix().is_empty() {
            outfile = format!("{}/{}", p.outprefix(), outfile);
        }
    }
    outfile
}

/// Write the stacked signature matrix, its names manifest, and best-effort
/// id/count sidecars.
fn write_stacked(outfile: &str, result: &SketchingResult) -> Result<(), Error> {
    if result.signatures.is_empty() {
        return Err(Error::config(
            "can't write stacked sketches if signatures were not generated",
        ));
    }
    let mut w =
        BufWriter::new(File::create(outfile).map_err(Error::io_at(outfile))?);
    for &x in &result.signatures {
        w.write_f64::<LittleEndian>(x).map_err(Error::io_at(outfile))?;
    }
    w.flush().map_err(Error::io_at(outfile))?;

    if !result.names.is_empty() {
        let names_path = format!("{outfile}.names.txt");
        let mut w =
            BufWriter::new(File::create(&names_path).map_err(Error::io_at(&names_path))?);
        for (i, name) in result.names.iter().enumerate() {
            write!(w, "{name}").map_err(Error::io_at(&names_path))?;
            if let Some(card) = result.cardinalities.get(i) {
                write!(w, "\t{card:.12}").map_err(Error::io_at(&names_path))?;
            }
            if let Some(kcf) = result.kmercountfiles.get(i) {
                if !kcf.is_empty() {
                    write!(w, "\t{kcf}").map_err(Error::io_at(&names_path))?;
                }
            }
            writeln!(w).map_err(Error::io_at(&names_path))?;
        }
        w.flush().map_err(Error::io_at(&names_path))?;
    }

    // Sidecars are best-effort: log and continue on failure.
    if !result.kmers.is_empty() {
        let path = format!("{outfile}.kmerhashes.u64");
        if let Err(e) = write_u64_sidecar(&path, &result.kmers) {
            warn!("failed to write k-mer hashes to {path}, failing silently: {e}");
        }
    }
    if !result.kmercounts.is_empty() {
        let path = format!("{outfile}.kmercounts.f64");
        if let Err(e) = write_f64_sidecar(&path, &result.kmercounts) {
            warn!("failed to write k-mer counts to {path}, failing silently: {e}");
        }
    }
    Ok(())
}

fn write_u64_sidecar(path: &str, xs: &[u64]) -> std::io::Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    for &x in xs {
        w.write_u64::<LittleEndian>(x)?;
    }
    w.flush()
}

fn write_f64_sidecar(path: &str, xs: &[f64]) -> std::io::Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    for &x in xs {
        w.write_f64::<LittleEndian>(x)?;
    }
    w.flush()
}
