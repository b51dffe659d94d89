//! PALS core library
//!
//! Packed sequences, k-mer indexing, external sorting, diagonal filtering and
//! banded extension for pairwise and self genome comparison.

pub mod aligner;
pub mod dp;
pub mod error;
pub mod filter;
pub mod index;
pub mod morass;
pub mod nucleotide;
pub mod pack;
pub mod seed;
pub mod types;
pub mod writer;

// Re-export commonly used types and functions
pub use aligner::{run, AlignError, AlignResult, Aligner, AlignerConfig, RunSummary, StrandResult, StrandStats};
pub use dp::{BandedAligner, DpHit, DpParams};
pub use error::{ErrorKind, PalsError, PalsResult};
pub use filter::{merge_trapezoids, Filter, FilterParams, SeedHit, Trapezoid};
pub use index::KmerIndex;
pub use morass::{Morass, MorassConfig, Record};
pub use pack::{load_fasta, Alphabet, Encoding, PackedSequence, Packer, SeqView};
pub use types::{Contig, LocalInterval, Strand};
pub use writer::{GffWriter, HitWriter, OutputFormat, Pair, PairwiseWriter};

/// Version information for the PALS core library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
