//! K-mer position index
//!
//! Maps every unambiguous k-length word of a packed sequence to the ascending
//! list of positions where it starts. The index is built in one pass and is
//! never mutated afterwards; workers share it through an `Arc`.

use thiserror::Error;

use crate::nucleotide::{Kmer, KmerEncoder};
use crate::pack::SeqView;

/// Smallest word size the index accepts.
pub const MIN_WORD_SIZE: usize = 4;
/// Largest word size that fits the 2-bit encoding in a `u64`.
pub const MAX_WORD_SIZE: usize = 32;
/// Words up to this size use a direct offset table of `4^k + 1` entries.
pub const DIRECT_MAX_K: usize = 12;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Word size {0} outside supported range {MIN_WORD_SIZE}..={MAX_WORD_SIZE}")]
    WordSize(usize),

    #[error("Word size {k} exceeds sequence length {len}")]
    TooShort { k: usize, len: usize },

    #[error("Sequence length {0} exceeds 32-bit addressing")]
    TooLong(usize),
}

pub type IndexResult<T> = Result<T, IndexError>;

#[derive(Debug)]
enum Table {
    /// `offsets[kmer]..offsets[kmer + 1]` indexes `positions`.
    Direct { offsets: Vec<u32> },
    /// Distinct words in ascending order with CSR offsets into `positions`.
    Sorted { kmers: Vec<Kmer>, offsets: Vec<u32> },
}

/// Read-only k-mer to positions map.
#[derive(Debug)]
pub struct KmerIndex {
    k: usize,
    sequence_len: usize,
    table: Table,
    positions: Vec<u32>,
}

impl KmerIndex {
    /// Index every valid k-length window of `view`.
    pub fn new(k: usize, view: &SeqView<'_>) -> IndexResult<Self> {
        if !(MIN_WORD_SIZE..=MAX_WORD_SIZE).contains(&k) {
            return Err(IndexError::WordSize(k));
        }
        let len = view.len();
        if k > len {
            return Err(IndexError::TooShort { k, len });
        }
        if len > u32::MAX as usize {
            return Err(IndexError::TooLong(len));
        }

        let index = if k <= DIRECT_MAX_K {
            Self::build_direct(k, view)
        } else {
            Self::build_sorted(k, view)
        };
        log::debug!(
            "Indexed {} words ({} distinct) with k={}",
            index.len(),
            index.distinct(),
            k
        );
        Ok(index)
    }

    fn for_each_word(k: usize, view: &SeqView<'_>, mut f: impl FnMut(Kmer, u32)) {
        let mut encoder = KmerEncoder::new(k);
        for (i, base) in view.bases().enumerate() {
            if let Some(kmer) = encoder.push(base) {
                f(kmer, (i + 1 - k) as u32);
            }
        }
    }

    /// Counting sort into a dense table; two passes over the sequence.
    fn build_direct(k: usize, view: &SeqView<'_>) -> Self {
        let words = 1usize << (2 * k);
        let mut offsets = vec![0u32; words + 1];
        Self::for_each_word(k, view, |kmer, _| offsets[kmer as usize + 1] += 1);
        for i in 1..offsets.len() {
            offsets[i] += offsets[i - 1];
        }

        let total = offsets[words] as usize;
        let mut positions = vec![0u32; total];
        let mut cursor: Vec<u32> = offsets[..words].to_vec();
        Self::for_each_word(k, view, |kmer, pos| {
            let slot = &mut cursor[kmer as usize];
            positions[*slot as usize] = pos;
            *slot += 1;
        });

        Self {
            k,
            sequence_len: view.len(),
            table: Table::Direct { offsets },
            positions,
        }
    }

    fn build_sorted(k: usize, view: &SeqView<'_>) -> Self {
        let mut pairs: Vec<(Kmer, u32)> = Vec::new();
        Self::for_each_word(k, view, |kmer, pos| pairs.push((kmer, pos)));
        pairs.sort_unstable();

        let mut kmers = Vec::new();
        let mut offsets = Vec::new();
        let mut positions = Vec::with_capacity(pairs.len());
        for (i, &(kmer, pos)) in pairs.iter().enumerate() {
            if i == 0 || pairs[i - 1].0 != kmer {
                kmers.push(kmer);
                offsets.push(i as u32);
            }
            positions.push(pos);
        }
        offsets.push(positions.len() as u32);

        Self {
            k,
            sequence_len: view.len(),
            table: Table::Sorted { kmers, offsets },
            positions,
        }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn sequence_len(&self) -> usize {
        self.sequence_len
    }

    /// Ascending start positions of `kmer`; empty if absent.
    pub fn positions_of(&self, kmer: Kmer) -> &[u32] {
        match &self.table {
            Table::Direct { offsets } => {
                let i = kmer as usize;
                if i + 1 >= offsets.len() {
                    return &[];
                }
                &self.positions[offsets[i] as usize..offsets[i + 1] as usize]
            }
            Table::Sorted { kmers, offsets } => match kmers.binary_search(&kmer) {
                Ok(i) => &self.positions[offsets[i] as usize..offsets[i + 1] as usize],
                Err(_) => &[],
            },
        }
    }

    /// Total number of indexed positions.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Number of words with at least one position.
    pub fn distinct(&self) -> usize {
        match &self.table {
            Table::Direct { offsets } => offsets.windows(2).filter(|w| w[1] > w[0]).count(),
            Table::Sorted { kmers, .. } => kmers.len(),
        }
    }

    /// Mean list length over the words that occur.
    pub fn avg_list_len(&self) -> f64 {
        let distinct = self.distinct();
        if distinct == 0 {
            0.0
        } else {
            self.len() as f64 / distinct as f64
        }
    }

    pub fn memory_bytes(&self) -> usize {
        let table = match &self.table {
            Table::Direct { offsets } => offsets.len() * 4,
            Table::Sorted { kmers, offsets } => kmers.len() * 8 + offsets.len() * 4,
        };
        table + self.positions.len() * 4
    }

    /// Estimated footprint of an index with word size `k` over `len` residues.
    pub fn estimated_bytes(k: usize, len: usize) -> usize {
        let positions = len * 4;
        if k <= DIRECT_MAX_K {
            positions + ((1usize << (2 * k)) + 1) * 4
        } else {
            let distinct = len.min(1usize.checked_shl(2 * k as u32).unwrap_or(usize::MAX));
            positions + distinct * 12
        }
    }

    /// Expected list length for a random sequence of `len` residues.
    pub fn expected_list_len(k: usize, len: usize) -> f64 {
        len as f64 / 4f64.powi(k as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nucleotide::encode_kmer;
    use crate::pack::{Alphabet, Encoding, PackedSequence, Packer};
    use crate::types::Strand;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn packed(seq: &[u8]) -> PackedSequence {
        let mut packer = Packer::new("idx", Alphabet::Dna, Encoding::Byte);
        packer.pack("s", seq).unwrap();
        packer.finalise()
    }

    fn random_seq(len: usize, seed: u64) -> Vec<u8> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..len).map(|_| b"ACGT"[rng.gen_range(0..4)]).collect()
    }

    fn check_completeness(k: usize, seq: &[u8]) {
        let packed = packed(seq);
        let index = KmerIndex::new(k, &packed.view(Strand::Forward)).unwrap();

        let mut expected = 0;
        for (p, window) in seq.windows(k).enumerate() {
            if let Some(kmer) = encode_kmer(window) {
                expected += 1;
                let list = index.positions_of(kmer);
                assert_eq!(
                    list.iter().filter(|&&x| x as usize == p).count(),
                    1,
                    "position {} listed once under its word",
                    p
                );
                assert!(list.windows(2).all(|w| w[0] < w[1]));
            }
        }
        assert_eq!(index.len(), expected);
    }

    #[test]
    fn test_direct_index_completeness() {
        let mut seq = random_seq(2000, 7);
        seq[100] = b'N';
        seq[1500] = b'N';
        check_completeness(6, &seq);
    }

    #[test]
    fn test_sorted_index_completeness() {
        let seq = random_seq(3000, 11);
        check_completeness(16, &seq);
    }

    #[test]
    fn test_window_count_without_ambiguity() {
        let seq = random_seq(500, 3);
        let index = KmerIndex::new(8, &packed(&seq).view(Strand::Forward)).unwrap();
        assert_eq!(index.len(), 500 - 8 + 1);
    }

    #[test]
    fn test_ambiguous_windows_are_skipped() {
        // Only windows clear of the N at position 5 are indexed.
        let index = KmerIndex::new(5, &packed(b"ACGTANCGTA").view(Strand::Forward)).unwrap();
        assert_eq!(index.len(), 1);
        let index = KmerIndex::new(4, &packed(b"ACGTANCGTA").view(Strand::Forward)).unwrap();
        assert_eq!(index.len(), 3);
        assert_eq!(index.positions_of(encode_kmer(b"CGTA").unwrap()), &[1, 6]);
    }

    #[test]
    fn test_parameter_errors() {
        let seq = packed(b"ACGTACGT");
        let view = seq.view(Strand::Forward);
        assert!(matches!(KmerIndex::new(2, &view), Err(IndexError::WordSize(2))));
        assert!(matches!(KmerIndex::new(33, &view), Err(IndexError::WordSize(33))));
        assert!(matches!(
            KmerIndex::new(9, &view),
            Err(IndexError::TooShort { k: 9, len: 8 })
        ));
    }

    #[test]
    fn test_deterministic_build() {
        let seq = random_seq(1000, 5);
        let packed = packed(&seq);
        let a = KmerIndex::new(14, &packed.view(Strand::Forward)).unwrap();
        let b = KmerIndex::new(14, &packed.view(Strand::Forward)).unwrap();
        for window in seq.windows(14) {
            let kmer = encode_kmer(window).unwrap();
            assert_eq!(a.positions_of(kmer), b.positions_of(kmer));
        }
        assert_eq!(a.distinct(), b.distinct());
    }

    #[test]
    fn test_absent_word() {
        let index = KmerIndex::new(4, &packed(b"AAAAAAAA").view(Strand::Forward)).unwrap();
        assert_eq!(index.positions_of(encode_kmer(b"AAAA").unwrap()).len(), 5);
        assert!(index.positions_of(encode_kmer(b"CCCC").unwrap()).is_empty());
        assert_eq!(index.distinct(), 1);
        assert!((index.avg_list_len() - 5.0).abs() < 1e-9);
    }
}
