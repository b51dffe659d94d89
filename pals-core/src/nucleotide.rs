//! Shared nucleotide utilities for packing, indexing and extension

/// A fixed-width 2-bit encoding of a DNA word.
pub type Kmer = u64;

/// Residue used for spacers and for every ambiguous position.
pub const AMBIGUOUS: u8 = b'N';

/// Encode a nucleotide to 2-bit representation
#[inline]
pub fn encode_nucleotide(nucleotide: u8) -> Option<u8> {
    match nucleotide {
        b'A' | b'a' => Some(0),
        b'C' | b'c' => Some(1),
        b'G' | b'g' => Some(2),
        b'T' | b't' => Some(3),
        _ => None,
    }
}

/// Decode a 2-bit code back to an upper-case nucleotide
#[inline]
pub fn decode_nucleotide(code: u8) -> u8 {
    match code & 3 {
        0 => b'A',
        1 => b'C',
        2 => b'G',
        _ => b'T',
    }
}

/// Get complement of a single nucleotide
#[inline]
pub fn complement_nucleotide(nucleotide: u8) -> u8 {
    match nucleotide {
        b'A' => b'T',
        b'T' => b'A',
        b'C' => b'G',
        b'G' => b'C',
        b'a' => b't',
        b't' => b'a',
        b'c' => b'g',
        b'g' => b'c',
        _ => AMBIGUOUS,
    }
}

/// Generate reverse complement of a sequence
pub fn reverse_complement(sequence: &[u8]) -> Vec<u8> {
    sequence
        .iter()
        .rev()
        .map(|&nucleotide| complement_nucleotide(nucleotide))
        .collect()
}

/// Whether two residues count as an identity in an alignment.
/// Ambiguous residues never match, not even each other.
#[inline]
pub fn residues_match(a: u8, b: u8) -> bool {
    a == b && encode_nucleotide(a).is_some()
}

/// Rolling 2-bit encoder over a stream of residues.
///
/// Yields the k-mer ending at the current residue once `k` consecutive
/// unambiguous residues have been seen; an ambiguous residue restarts the run.
pub struct KmerEncoder {
    k: usize,
    kmer: Kmer,
    mask: Kmer,
    valid: usize,
}

impl KmerEncoder {
    pub fn new(k: usize) -> Self {
        debug_assert!(k > 0 && k <= 32);
        let mask = if k == 32 { Kmer::MAX } else { (1 << (2 * k)) - 1 };
        Self {
            k,
            kmer: 0,
            mask,
            valid: 0,
        }
    }

    #[inline]
    pub fn push(&mut self, nucleotide: u8) -> Option<Kmer> {
        match encode_nucleotide(nucleotide) {
            Some(code) => {
                self.kmer = ((self.kmer << 2) | code as Kmer) & self.mask;
                self.valid += 1;
                (self.valid >= self.k).then_some(self.kmer)
            }
            None => {
                self.reset();
                None
            }
        }
    }

    pub fn reset(&mut self) {
        self.kmer = 0;
        self.valid = 0;
    }
}

/// Encode a whole word, failing on any ambiguous residue.
pub fn encode_kmer(word: &[u8]) -> Option<Kmer> {
    if word.is_empty() || word.len() > 32 {
        return None;
    }
    word.iter().try_fold(0 as Kmer, |acc, &b| {
        encode_nucleotide(b).map(|code| (acc << 2) | code as Kmer)
    })
}
