//! Hit records in contig coordinates and their text writers

use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dp::DpHit;
use crate::filter::Trapezoid;
use crate::pack::PackedSequence;
use crate::types::{Contig, LocalInterval, Strand};

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Unknown output format: {0}")]
    Format(String),
}

pub type WriteResult<T> = Result<T, WriteError>;

/// An accepted hit mapped onto contigs. Query coordinates are always on the
/// forward strand of the query; `strand` says which query strand aligned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pair {
    pub query_contig: String,
    pub query: LocalInterval,
    pub target_contig: String,
    pub target: LocalInterval,
    pub score: i64,
    pub matches: u32,
    pub identity: f64,
    pub strand: Strand,
}

/// Contig holding all of `range`, if any.
fn locate<'a>(seq: &'a PackedSequence, range: &Range<usize>) -> Option<(usize, &'a Contig)> {
    if range.start >= range.end {
        return None;
    }
    let (first, contig) = seq.contig_at(range.start)?;
    let (last, _) = seq.contig_at(range.end - 1)?;
    (first == last).then_some((first, contig))
}

impl Pair {
    /// Map a hit from packed coordinates; `None` when either side crosses a
    /// contig boundary.
    pub fn new(target: &PackedSequence, query: &PackedSequence, hit: &DpHit, strand: Strand) -> Option<Self> {
        let query_range = query.view(strand).to_forward(hit.query_range());
        let target_range = hit.target_range();

        let (Some((qi, qc)), Some((ti, tc))) = (locate(query, &query_range), locate(target, &target_range)) else {
            log::debug!(
                "Skipping hit spanning contigs: query {:?} target {:?} ({})",
                query_range,
                target_range,
                strand.label()
            );
            return None;
        };

        Some(Self {
            query_contig: qc.name.clone(),
            query: LocalInterval {
                contig: qi,
                start: query_range.start - qc.offset,
                end: query_range.end - qc.offset,
            },
            target_contig: tc.name.clone(),
            target: LocalInterval {
                contig: ti,
                start: target_range.start - tc.offset,
                end: target_range.end - tc.offset,
            },
            score: hit.score,
            matches: hit.matches,
            identity: hit.identity,
            strand,
        })
    }
}

/// Sink for accepted hits.
pub trait HitWriter {
    /// Write one record, returning the number of bytes written.
    fn write(&mut self, pair: &Pair) -> WriteResult<usize>;

    /// Emit any header not yet written and flush.
    fn finish(&mut self) -> WriteResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Gff,
    Pairwise,
}

impl FromStr for OutputFormat {
    type Err = WriteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gff" => Ok(OutputFormat::Gff),
            "pairwise" => Ok(OutputFormat::Pairwise),
            other => Err(WriteError::Format(other.to_string())),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Gff => write!(f, "gff"),
            OutputFormat::Pairwise => write!(f, "pairwise"),
        }
    }
}

impl OutputFormat {
    pub fn writer<'a, W: Write + Send + 'a>(self, out: W) -> Box<dyn HitWriter + Send + 'a> {
        match self {
            OutputFormat::Gff => Box::new(GffWriter::new(out)),
            OutputFormat::Pairwise => Box::new(PairwiseWriter::new(out)),
        }
    }
}

/// Writes a header on first use and counts bytes.
struct Framed<W: Write> {
    out: W,
    header: &'static str,
    started: bool,
}

impl<W: Write> Framed<W> {
    fn new(out: W, header: &'static str) -> Self {
        Self {
            out,
            header,
            started: false,
        }
    }

    fn start(&mut self) -> io::Result<usize> {
        if self.started {
            return Ok(0);
        }
        self.started = true;
        self.out.write_all(self.header.as_bytes())?;
        Ok(self.header.len())
    }

    fn line(&mut self, line: &str) -> io::Result<usize> {
        let header = self.start()?;
        self.out.write_all(line.as_bytes())?;
        Ok(header + line.len())
    }

    fn finish(&mut self) -> io::Result<()> {
        self.start()?;
        self.out.flush()
    }
}

/// GFF features with a `Target`/`Identity` attribute pair.
pub struct GffWriter<W: Write> {
    inner: Framed<W>,
}

impl<W: Write> GffWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            inner: Framed::new(out, "##gff-version 2\n"),
        }
    }
}

impl<W: Write> HitWriter for GffWriter<W> {
    fn write(&mut self, pair: &Pair) -> WriteResult<usize> {
        let line = format!(
            "{}\tpals\thit\t{}\t{}\t{}\t{}\t.\tTarget {} {} {}; Identity {:.4}\n",
            pair.query_contig,
            pair.query.start + 1,
            pair.query.end,
            pair.matches,
            char::from(pair.strand),
            pair.target_contig,
            pair.target.start + 1,
            pair.target.end,
            pair.identity,
        );
        Ok(self.inner.line(&line)?)
    }

    fn finish(&mut self) -> WriteResult<()> {
        Ok(self.inner.finish()?)
    }
}

/// Tab-delimited rows with 0-based half-open coordinates.
pub struct PairwiseWriter<W: Write> {
    inner: Framed<W>,
}

const PAIRWISE_HEADER: &str = "# pals pairwise hits\n\
#query\tquery_start\tquery_end\ttarget\ttarget_start\ttarget_end\tscore\tmatches\tidentity\tstrand\n";

impl<W: Write> PairwiseWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            inner: Framed::new(out, PAIRWISE_HEADER),
        }
    }
}

impl<W: Write> HitWriter for PairwiseWriter<W> {
    fn write(&mut self, pair: &Pair) -> WriteResult<usize> {
        let line = format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{:.4}\t{}\n",
            pair.query_contig,
            pair.query.start,
            pair.query.end,
            pair.target_contig,
            pair.target.start,
            pair.target.end,
            pair.score,
            pair.matches,
            pair.identity,
            char::from(pair.strand),
        );
        Ok(self.inner.line(&line)?)
    }

    fn finish(&mut self) -> WriteResult<()> {
        Ok(self.inner.finish()?)
    }
}

/// `<stem>.traps.<strand>.tsv`
pub fn traps_path(stem: &Path, strand: Strand) -> PathBuf {
    let mut name = stem.as_os_str().to_owned();
    name.push(format!(".traps.{}.tsv", strand.label()));
    PathBuf::from(name)
}

/// Dump trapezoids as a tab-delimited table.
pub fn write_trapezoids(path: &Path, traps: &[Trapezoid]) -> WriteResult<()> {
    let mut out = BufWriter::new(File::create(path)?);
    writeln!(out, "#diag_lo\tdiag_hi\tq_lo\tq_hi")?;
    for t in traps {
        writeln!(out, "{}\t{}\t{}\t{}", t.diag_lo, t.diag_hi, t.q_lo, t.q_hi)?;
    }
    out.flush()?;
    Ok(())
}
