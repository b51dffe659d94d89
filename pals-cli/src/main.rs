use anyhow::Result;
use clap::{Parser, Subcommand};
use pals_core::ErrorKind;
use std::path::PathBuf;

mod commands;
mod config;
mod logging;

use commands::align::AlignArgs;
use commands::matrix::MatrixArgs;
use config::Config;

#[derive(Parser)]
#[command(name = "pals")]
#[command(about = "PALS - pairwise alignment for repeat discovery")]
#[command(version)]
#[command(long_about = "
PALS finds long, high-identity local alignments between two genomes or
within one genome, on both strands. Seeds are spilled to disk and sorted
externally, so memory stays bounded on large inputs.

Examples:
  pals align --target chr1.fa --self --out chr1.gff
  pals align --target ref.fa --query asm.fa --filtlen 200 --filtid 0.9 -t 2
  pals matrix a.fa b.fa c.fa --workdir /scratch --jobs 4
  pals config > pals.toml
")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path (default: ./pals.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log additional information, including the contig tables
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Also write the log to pals-<time>-<pid>.log
    #[arg(long, global = true)]
    pub log: bool,

    /// Include source file names and lines in the log
    #[arg(long, global = true)]
    pub debug: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Align a query against a target, or a target against itself
    Align(AlignArgs),

    /// Align every file against itself and every other file
    Matrix(MatrixArgs),

    /// Print the default configuration file
    Config {
        /// Write the effective configuration to this file instead
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = logging::setup_logging(cli.verbose, cli.log, cli.debug).and_then(|path| {
        if let Some(path) = path {
            log::debug!("Logging to {}", path.display());
        }
        run(cli)
    });

    if let Err(err) = result {
        match err.chain().find_map(ErrorKind::of) {
            Some(kind) => log::error!("{}: {:#}", kind.label(), err),
            None => log::error!("{:#}", err),
        }
        log::logger().flush();
        // Nothing is logged when the logger itself failed to start.
        if !log::log_enabled!(log::Level::Error) {
            eprintln!("Error: {:#}", err);
        }
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    log::info!("{}", std::env::args().collect::<Vec<_>>().join(" "));
    log::debug!("pals-core {}", pals_core::VERSION);

    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Align(args) => commands::align::execute(&config, args),
        Commands::Matrix(args) => commands::matrix::execute(&config, args),
        Commands::Config { out } => match out {
            Some(path) => config.save_to_file(&path),
            None => {
                print!("{}", Config::example_toml()?);
                Ok(())
            }
        },
    }
}
