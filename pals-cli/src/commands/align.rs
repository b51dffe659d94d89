//! Align command implementation - pairwise or self comparison of two FASTA files

use anyhow::{bail, Context, Result};
use clap::Args;
use pals_core::{load_fasta, run, AlignerConfig, Alphabet, Encoding, OutputFormat, PackedSequence, RunSummary};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read};
use std::path::{Path, PathBuf};
use xxhash_rust::xxh64::Xxh64;

use crate::config::Config;

#[derive(Args, Debug, Clone, Default)]
pub struct AlignArgs {
    /// Target sequence file (FASTA, optionally gzipped)
    #[arg(long)]
    pub target: Option<PathBuf>,

    /// Query sequence file (FASTA, optionally gzipped)
    #[arg(long)]
    pub query: Option<PathBuf>,

    /// Compare the target against itself
    #[arg(long = "self")]
    pub self_comparison: bool,

    /// Only compare the same strand
    #[arg(long)]
    pub same: bool,

    /// Output file (default: stdout)
    #[arg(short, long)]
    pub out: Option<PathBuf>,

    /// Output format
    #[arg(long)]
    pub format: Option<OutputFormat>,

    /// Keep the trapezoids found by the filter next to the output
    #[arg(long)]
    pub traps: bool,

    /// Maximum word size
    #[arg(short = 'k', long = "max-k")]
    pub max_k: Option<usize>,

    /// Minimum hit length for the filter
    #[arg(long)]
    pub filtlen: Option<usize>,

    /// Minimum hit identity for the filter
    #[arg(long)]
    pub filtid: Option<f64>,

    /// Minimum hit length for extension (0: same as the filter)
    #[arg(long)]
    pub dplen: Option<usize>,

    /// Minimum hit identity for extension (0: same as the filter)
    #[arg(long)]
    pub dpid: Option<f64>,

    /// Tube offset (0: automatic)
    #[arg(long)]
    pub tubeoffset: Option<usize>,

    /// Directory for temporary files
    #[arg(long)]
    pub tmp: Option<PathBuf>,

    /// Seeds held in memory before spilling to disk
    #[arg(long)]
    pub chunk: Option<usize>,

    /// Spill seeds on a background thread
    #[arg(long)]
    pub tmpcon: bool,

    /// Number of threads; more than one aligns both strands at once
    #[arg(short, long)]
    pub threads: Option<usize>,

    /// Memory ceiling in bytes (0: unlimited)
    #[arg(long)]
    pub mem: Option<usize>,

    /// Accept IUPAC ambiguity codes in the input
    #[arg(long)]
    pub iupac: bool,

    /// Store residues in two bits each
    #[arg(long)]
    pub two_bit: bool,
}

/// Input handling shared by `align` and `matrix`.
#[derive(Debug, Clone, Copy)]
pub struct InputOptions {
    pub alphabet: Alphabet,
    pub encoding: Encoding,
    pub format: OutputFormat,
}

impl InputOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            alphabet: config.run.alphabet,
            encoding: config.run.encoding,
            format: config.run.format,
        }
    }
}

/// File settings with explicit flags applied on top.
pub fn build_config(config: &Config, args: &AlignArgs) -> (AlignerConfig, InputOptions) {
    let mut aligner = config.aligner_config();
    let mut input = InputOptions::from_config(config);

    if let Some(len) = args.filtlen {
        aligner.filter_len = len;
    }
    if let Some(id) = args.filtid {
        aligner.filter_id = id;
    }
    if let Some(len) = args.dplen {
        aligner.dp_len = len;
    }
    if let Some(id) = args.dpid {
        aligner.dp_id = id;
    }
    if let Some(offset) = args.tubeoffset {
        aligner.tube_offset = (offset > 0).then_some(offset);
    }
    if let Some(k) = args.max_k {
        aligner.max_word_size = k;
    }
    if let Some(dir) = &args.tmp {
        aligner.morass.temp_dir = dir.clone();
    }
    if let Some(chunk) = args.chunk {
        aligner.morass.chunk_size = chunk;
    }
    if args.tmpcon {
        aligner.morass.concurrent = true;
    }
    if let Some(threads) = args.threads {
        aligner.threads = threads;
    }
    if let Some(mem) = args.mem {
        aligner.max_memory = (mem > 0).then_some(mem);
    }
    aligner.self_comparison = args.self_comparison;
    aligner.same_strand = args.same;
    if args.traps {
        aligner.traps = Some(traps_stem(args.out.as_deref()));
    }

    if let Some(format) = args.format {
        input.format = format;
    }
    if args.iupac {
        input.alphabet = Alphabet::DnaIupac;
    }
    if args.two_bit {
        input.encoding = Encoding::TwoBit;
    }

    (aligner, input)
}

/// The output path without extension, or `pals` when writing to stdout.
fn traps_stem(out: Option<&Path>) -> PathBuf {
    match out {
        Some(path) => path.with_extension(""),
        None => PathBuf::from("pals"),
    }
}

/// Streaming xxh64 digest and byte count of a file.
pub fn digest(path: &Path) -> io::Result<(u64, u64)> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Xxh64::new(0);
    let mut buf = [0u8; 64 * 1024];
    let mut size = 0u64;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    Ok((hasher.digest(), size))
}

/// Read one input, logging its size, digest and contig table.
pub fn load_input(path: &Path, role: &str, input: &InputOptions) -> Result<PackedSequence> {
    let (hash, size) =
        digest(path).with_context(|| format!("Could not read {} file: {}", role, path.display()))?;
    log::info!("Reading {} {} ({} bytes): {:016x}", role, path.display(), size, hash);
    log::debug!("{:<20}\t{:>10}\tBin Range", "Sequence", "Length");

    let sequence = load_fasta(path, input.alphabet, input.encoding)
        .with_context(|| format!("Failed to load {} sequences from {}", role, path.display()))?;
    if sequence.is_empty() {
        bail!("{}{} sequence is zero length.", role[..1].to_uppercase(), &role[1..]);
    }
    log::info!(
        "Loaded {} contigs, {} residues from {} ({:?})",
        sequence.contigs().len(),
        sequence.residue_count(),
        sequence.name(),
        sequence.alphabet()
    );
    Ok(sequence)
}

/// Align `target` against `query` (or itself when `query` is `None`) and
/// write hits to `out` or stdout.
pub fn align_files(
    config: &AlignerConfig,
    input: &InputOptions,
    target_path: &Path,
    query_path: Option<&Path>,
    out: Option<&Path>,
) -> Result<RunSummary> {
    let target = load_input(target_path, "target", input)?;
    let query = match query_path {
        Some(path) if !config.self_comparison => Some(load_input(path, "query", input)?),
        _ => None,
    };
    let query = query.as_ref().unwrap_or(&target);

    let summary = match out {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Could not open output file: {}", path.display()))?;
            let mut writer = input.format.writer(BufWriter::new(file));
            run(config, &target, query, &mut *writer)
        }
        None => {
            let mut writer = input.format.writer(BufWriter::new(io::stdout()));
            run(config, &target, query, &mut *writer)
        }
    }
    .context("Alignment failed")?;

    Ok(summary)
}

pub fn execute(config: &Config, args: AlignArgs) -> Result<()> {
    let (aligner, input) = build_config(config, &args);

    let target = match &args.target {
        Some(path) => path,
        None => bail!("No target provided."),
    };
    if !args.self_comparison && args.query.is_none() {
        bail!("No query provided in non-self comparison.");
    }
    aligner.validate().context("Invalid alignment settings")?;

    log::info!("Output format: {}", input.format);
    if let Some(out) = &args.out {
        log::info!("Output: {}", out.display());
    }

    let summary = align_files(&aligner, &input, target, args.query.as_deref(), args.out.as_deref())?;
    log::info!("Wrote {} hits ({} bytes)", summary.written(), summary.bytes());
    Ok(())
}
