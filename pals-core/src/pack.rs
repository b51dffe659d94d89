//! Packed multi-record sequence store
//!
//! Concatenates FASTA records into one addressable buffer separated by short
//! runs of `N`, keeping per-record contig metadata. The store is built once
//! through a [`Packer`] and is immutable afterwards, so it can be shared
//! between worker threads without locking.

use std::borrow::Cow;
use std::fs::File;
use std::io::BufReader;
use std::ops::Range;
use std::path::Path;

use flate2::read::GzDecoder;
use needletail::{parse_fastx_file, parse_fastx_reader};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::nucleotide::{complement_nucleotide, decode_nucleotide, encode_nucleotide, AMBIGUOUS};
use crate::types::{Contig, GenomicPos, Strand};

/// Number of `N` residues inserted between consecutive records.
pub const SPACER: usize = 16;

#[derive(Debug, Error)]
pub enum PackError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error in {file}: {message}")]
    Parse { file: String, message: String },

    #[error("Record {record}: residue '{residue}' at position {position} is not valid for the {alphabet:?} alphabet")]
    Alphabet {
        record: String,
        residue: char,
        position: usize,
        alphabet: Alphabet,
    },

    #[error("Packed sequence exceeds the addressable length of {0} residues")]
    TooLong(usize),
}

pub type PackResult<T> = Result<T, PackError>;

/// Residue alphabet a store accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Alphabet {
    /// `ACGTN`, any case.
    #[default]
    Dna,
    /// `ACGTN` plus the IUPAC redundancy codes, which are stored as `N`.
    DnaIupac,
}

impl Alphabet {
    pub fn accepts(self, residue: u8) -> bool {
        let upper = residue.to_ascii_uppercase();
        match self {
            Alphabet::Dna => matches!(upper, b'A' | b'C' | b'G' | b'T' | b'N'),
            Alphabet::DnaIupac => matches!(
                upper,
                b'A' | b'C'
                    | b'G'
                    | b'T'
                    | b'N'
                    | b'R'
                    | b'Y'
                    | b'K'
                    | b'M'
                    | b'S'
                    | b'W'
                    | b'B'
                    | b'D'
                    | b'H'
                    | b'V'
            ),
        }
    }
}

/// In-memory representation of residues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// One byte per residue.
    #[default]
    Byte,
    /// Two bits per residue plus an ambiguity bitmap.
    TwoBit,
}

#[derive(Debug, Clone)]
enum Residues {
    Byte(Vec<u8>),
    TwoBit {
        codes: Vec<u8>,
        ambiguous: Vec<u64>,
        len: usize,
    },
}

impl Residues {
    fn new(encoding: Encoding) -> Self {
        match encoding {
            Encoding::Byte => Residues::Byte(Vec::new()),
            Encoding::TwoBit => Residues::TwoBit {
                codes: Vec::new(),
                ambiguous: Vec::new(),
                len: 0,
            },
        }
    }

    fn len(&self) -> usize {
        match self {
            Residues::Byte(bytes) => bytes.len(),
            Residues::TwoBit { len, .. } => *len,
        }
    }

    /// Push an already normalised residue (`ACGT` or `N`).
    fn push(&mut self, residue: u8) {
        match self {
            Residues::Byte(bytes) => bytes.push(residue),
            Residues::TwoBit {
                codes,
                ambiguous,
                len,
            } => {
                let i = *len;
                if i % 4 == 0 {
                    codes.push(0);
                }
                if i % 64 == 0 {
                    ambiguous.push(0);
                }
                match encode_nucleotide(residue) {
                    Some(code) => codes[i / 4] |= code << (2 * (i % 4)),
                    None => ambiguous[i / 64] |= 1 << (i % 64),
                }
                *len += 1;
            }
        }
    }

    #[inline]
    fn get(&self, i: usize) -> u8 {
        match self {
            Residues::Byte(bytes) => bytes[i],
            Residues::TwoBit {
                codes, ambiguous, ..
            } => {
                if ambiguous[i / 64] & (1 << (i % 64)) != 0 {
                    AMBIGUOUS
                } else {
                    decode_nucleotide(codes[i / 4] >> (2 * (i % 4)))
                }
            }
        }
    }

    fn fetch(&self, range: Range<usize>) -> Cow<'_, [u8]> {
        match self {
            Residues::Byte(bytes) => Cow::Borrowed(&bytes[range]),
            Residues::TwoBit { .. } => Cow::Owned(range.map(|i| self.get(i)).collect()),
        }
    }

    fn memory_bytes(&self) -> usize {
        match self {
            Residues::Byte(bytes) => bytes.capacity(),
            Residues::TwoBit {
                codes, ambiguous, ..
            } => codes.capacity() + ambiguous.capacity() * 8,
        }
    }
}

/// Accumulates records into a packed store.
pub struct Packer {
    name: String,
    alphabet: Alphabet,
    residues: Residues,
    contigs: Vec<Contig>,
}

impl Packer {
    pub fn new(name: impl Into<String>, alphabet: Alphabet, encoding: Encoding) -> Self {
        Self {
            name: name.into(),
            alphabet,
            residues: Residues::new(encoding),
            contigs: Vec::new(),
        }
    }

    /// Append a record and return its contig metadata.
    ///
    /// The record is validated in full before anything is appended, so a
    /// rejected record leaves the packer unchanged.
    pub fn pack(&mut self, name: &str, sequence: &[u8]) -> PackResult<Contig> {
        if let Some(position) = sequence.iter().position(|&b| !self.alphabet.accepts(b)) {
            return Err(PackError::Alphabet {
                record: name.to_string(),
                residue: sequence[position] as char,
                position,
                alphabet: self.alphabet,
            });
        }

        let spacer = if self.contigs.is_empty() { 0 } else { SPACER };
        let new_len = self.residues.len() + spacer + sequence.len();
        if new_len > u32::MAX as usize {
            return Err(PackError::TooLong(u32::MAX as usize));
        }

        for _ in 0..spacer {
            self.residues.push(AMBIGUOUS);
        }
        let offset = self.residues.len();
        for &b in sequence {
            let upper = b.to_ascii_uppercase();
            self.residues.push(if encode_nucleotide(upper).is_some() {
                upper
            } else {
                AMBIGUOUS
            });
        }

        let contig = Contig {
            name: name.to_string(),
            offset,
            length: sequence.len(),
        };
        self.contigs.push(contig.clone());
        Ok(contig)
    }

    /// Freeze the store.
    pub fn finalise(self) -> PackedSequence {
        PackedSequence {
            name: self.name,
            alphabet: self.alphabet,
            residues: self.residues,
            contigs: self.contigs,
        }
    }
}

/// Immutable concatenation of records with contig metadata.
#[derive(Debug, Clone)]
pub struct PackedSequence {
    name: String,
    alphabet: Alphabet,
    residues: Residues,
    contigs: Vec<Contig>,
}

impl PackedSequence {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn alphabet(&self) -> Alphabet {
        self.alphabet
    }

    /// Total length including spacers.
    pub fn len(&self) -> usize {
        self.residues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of record lengths, excluding spacers.
    pub fn residue_count(&self) -> usize {
        self.contigs.iter().map(|c| c.length).sum()
    }

    pub fn contigs(&self) -> &[Contig] {
        &self.contigs
    }

    pub fn memory_bytes(&self) -> usize {
        self.residues.memory_bytes()
    }

    #[inline]
    pub fn base(&self, pos: GenomicPos) -> u8 {
        self.residues.get(pos)
    }

    pub fn fetch(&self, range: Range<GenomicPos>) -> Cow<'_, [u8]> {
        self.residues.fetch(range)
    }

    /// Map an absolute position to the contig holding it.
    pub fn contig_at(&self, pos: GenomicPos) -> Option<(usize, &Contig)> {
        let idx = self.contigs.partition_point(|c| c.offset <= pos);
        if idx == 0 {
            return None;
        }
        let contig = &self.contigs[idx - 1];
        contig.contains(pos).then_some((idx - 1, contig))
    }

    pub fn view(&self, strand: Strand) -> SeqView<'_> {
        SeqView { seq: self, strand }
    }
}

/// Strand-aware read-only view of a packed sequence.
///
/// Reverse views present the reverse complement in their own coordinate
/// space (`i` maps to forward position `len - 1 - i`) and never copy the
/// forward buffer as a whole.
#[derive(Debug, Clone, Copy)]
pub struct SeqView<'a> {
    seq: &'a PackedSequence,
    strand: Strand,
}

impl<'a> SeqView<'a> {
    pub fn strand(&self) -> Strand {
        self.strand
    }

    pub fn len(&self) -> usize {
        self.seq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seq.is_empty()
    }

    #[inline]
    pub fn base(&self, i: usize) -> u8 {
        match self.strand {
            Strand::Forward => self.seq.base(i),
            Strand::Reverse => complement_nucleotide(self.seq.base(self.seq.len() - 1 - i)),
        }
    }

    /// Residues of `range` in view coordinates.
    pub fn fetch(&self, range: Range<usize>) -> Cow<'a, [u8]> {
        match self.strand {
            Strand::Forward => self.seq.fetch(range),
            Strand::Reverse => {
                let forward = self.to_forward(range);
                let bytes = self.seq.fetch(forward);
                Cow::Owned(bytes.iter().rev().map(|&b| complement_nucleotide(b)).collect())
            }
        }
    }

    /// Map a half-open range in view coordinates onto the forward strand.
    pub fn to_forward(&self, range: Range<usize>) -> Range<usize> {
        match self.strand {
            Strand::Forward => range,
            Strand::Reverse => {
                let len = self.seq.len();
                len - range.end..len - range.start
            }
        }
    }

    pub fn bases(&self) -> impl Iterator<Item = u8> + 'a {
        let view = *self;
        (0..view.len()).map(move |i| view.base(i))
    }
}

/// Read a FASTA file (optionally gzipped) into a packed store.
pub fn load_fasta<P: AsRef<Path>>(
    path: P,
    alphabet: Alphabet,
    encoding: Encoding,
) -> PackResult<PackedSequence> {
    let path = path.as_ref();
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let parse_err = |e: needletail::errors::ParseError| PackError::Parse {
        file: path.display().to_string(),
        message: e.to_string(),
    };

    let mut reader = if file_name.ends_with(".gz") {
        let decoder = GzDecoder::new(File::open(path)?);
        parse_fastx_reader(BufReader::new(decoder)).map_err(parse_err)?
    } else {
        parse_fastx_file(path).map_err(parse_err)?
    };

    let mut packer = Packer::new(file_name, alphabet, encoding);
    while let Some(record) = reader.next() {
        let record = record.map_err(parse_err)?;
        let header = String::from_utf8_lossy(record.id()).to_string();
        let name = header.split_whitespace().next().unwrap_or("").to_string();
        let contig = packer.pack(&name, &record.seq())?;
        log::debug!(
            "{:<20}\t{:>10}\t{}..{}",
            contig.name,
            contig.length,
            contig.offset,
            contig.end()
        );
    }

    Ok(packer.finalise())
}
