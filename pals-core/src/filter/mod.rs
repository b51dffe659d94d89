//! Diagonal filter
//!
//! Groups seed hits, sorted by diagonal and then by query offset, into
//! trapezoids: offset-bounded bands of neighbouring diagonals dense enough in
//! shared words to be worth a dynamic-programming extension.
//!
//! Diagonals are bucketed into tubes of `tube_offset` diagonals; consecutive
//! tubes overlap by `max_error` diagonals so an alignment drifting by up to
//! `max_error` indels stays inside at least one tube. Each seed lands in every
//! tube covering its diagonal. A tube is closed as soon as the sorted stream
//! moves past its last diagonal, which keeps the pass single and forward-only.

pub mod merge;

use std::collections::BTreeMap;
use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::morass::Record;

pub use merge::merge_trapezoids;

/// Errors that can occur during filtering
#[derive(Debug, Error)]
pub enum FilterError {
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Seed stream out of order: ({prev_diagonal}, {prev_offset}) before ({diagonal}, {offset})")]
    Unsorted {
        prev_diagonal: i64,
        prev_offset: u32,
        diagonal: i64,
        offset: u32,
    },
}

pub type FilterResult<T> = Result<T, FilterError>;

/// A shared word between target and query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SeedHit {
    /// `target_pos - query_pos`.
    pub diagonal: i64,
    pub query_pos: u32,
    pub target_pos: u32,
    pub len: u32,
}

impl SeedHit {
    pub fn new(query_pos: u32, target_pos: u32, len: u32) -> Self {
        Self {
            diagonal: target_pos as i64 - query_pos as i64,
            query_pos,
            target_pos,
            len,
        }
    }

    pub fn query_end(&self) -> u32 {
        self.query_pos + self.len
    }
}

impl Record for SeedHit {
    const SIZE: usize = 20;
    type Key = (i64, u32);

    fn key(&self) -> Self::Key {
        (self.diagonal, self.query_pos)
    }

    fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_i64::<LittleEndian>(self.diagonal)?;
        writer.write_u32::<LittleEndian>(self.query_pos)?;
        writer.write_u32::<LittleEndian>(self.target_pos)?;
        writer.write_u32::<LittleEndian>(self.len)
    }

    fn read<R: Read>(reader: &mut R) -> io::Result<Self> {
        let hit = SeedHit {
            diagonal: reader.read_i64::<LittleEndian>()?,
            query_pos: reader.read_u32::<LittleEndian>()?,
            target_pos: reader.read_u32::<LittleEndian>()?,
            len: reader.read_u32::<LittleEndian>()?,
        };
        if hit.target_pos as i64 - hit.query_pos as i64 != hit.diagonal {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("seed diagonal {} does not match its offsets", hit.diagonal),
            ));
        }
        Ok(hit)
    }
}

/// A band of diagonals bounded in query offset; the unit of extension work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Trapezoid {
    pub diag_lo: i64,
    pub diag_hi: i64,
    /// First query offset covered by a seed.
    pub q_lo: u32,
    /// One past the last query offset covered by a seed.
    pub q_hi: u32,
}

impl Trapezoid {
    pub fn span(&self) -> u32 {
        self.q_hi - self.q_lo
    }
}

/// Filter parameters, normally derived by the aligner's optimiser.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilterParams {
    pub word_size: usize,
    pub min_hit_len: usize,
    pub min_id: f64,
    pub max_error: usize,
    pub tube_offset: usize,
}

impl FilterParams {
    /// Largest start-to-start distance between seeds of one trapezoid.
    pub fn max_gap(&self) -> u32 {
        ((self.max_error + 1) * self.word_size) as u32
    }

    /// Guaranteed number of shared words in a hit of `min_hit_len` with at
    /// most `max_error` differences.
    pub fn min_match(&self) -> i64 {
        self.min_hit_len as i64 + 1 - ((self.max_error + 1) * self.word_size) as i64
    }

    pub fn validate(&self) -> FilterResult<()> {
        if self.word_size == 0 {
            return Err(FilterError::InvalidParams("word size must be positive".to_string()));
        }
        if self.tube_offset == 0 {
            return Err(FilterError::InvalidParams("tube offset must be positive".to_string()));
        }
        if self.min_hit_len == 0 {
            return Err(FilterError::InvalidParams("minimum hit length must be positive".to_string()));
        }
        if !(self.min_id > 0.0 && self.min_id <= 1.0) {
            return Err(FilterError::InvalidParams(format!(
                "minimum identity {} outside (0, 1]",
                self.min_id
            )));
        }
        Ok(())
    }
}

/// Seeds of a closed tube that lie close together in query offset.
struct Cluster {
    diag_lo: i64,
    diag_hi: i64,
    q_lo: u32,
    cover_end: u32,
    last_start: u32,
    /// Fewest differences that explain the uncovered stretches.
    errors: u64,
}

impl Cluster {
    fn start(seed: &SeedHit) -> Self {
        Self {
            diag_lo: seed.diagonal,
            diag_hi: seed.diagonal,
            q_lo: seed.query_pos,
            cover_end: seed.query_end(),
            last_start: seed.query_pos,
            errors: 0,
        }
    }

    fn add(&mut self, seed: &SeedHit) {
        self.diag_lo = self.diag_lo.min(seed.diagonal);
        self.diag_hi = self.diag_hi.max(seed.diagonal);
        if seed.query_pos > self.cover_end {
            // e differences leave at most e*k - k + 1 residues without a seed.
            let gap = (seed.query_pos - self.cover_end) as u64;
            let k = seed.len as u64;
            self.errors += (gap + k - 1).div_ceil(k);
        }
        self.cover_end = self.cover_end.max(seed.query_end());
        self.last_start = seed.query_pos;
    }

    fn trapezoid(&self) -> Trapezoid {
        Trapezoid {
            diag_lo: self.diag_lo,
            diag_hi: self.diag_hi,
            q_lo: self.q_lo,
            q_hi: self.cover_end,
        }
    }

    fn estimated_identity(&self) -> f64 {
        let span = (self.cover_end - self.q_lo) as f64;
        if span == 0.0 {
            0.0
        } else {
            1.0 - self.errors as f64 / span
        }
    }
}

/// Single-pass tube filter over a sorted seed stream.
pub struct Filter {
    params: FilterParams,
    /// Added to every diagonal so tube numbers are non-negative.
    shift: i64,
}

impl Filter {
    /// `query_len` bounds the most negative diagonal the stream can hold.
    pub fn new(params: FilterParams, query_len: usize) -> FilterResult<Self> {
        params.validate()?;
        Ok(Self {
            params,
            shift: query_len as i64,
        })
    }

    pub fn params(&self) -> &FilterParams {
        &self.params
    }

    fn tube_end(&self, tube: u64) -> u64 {
        let offset = self.params.tube_offset as u64;
        tube * offset + offset + self.params.max_error as u64
    }

    /// Tubes containing shifted diagonal `d`, lowest first.
    fn tubes_for(&self, d: u64) -> std::ops::RangeInclusive<u64> {
        let offset = self.params.tube_offset as u64;
        let width = offset + self.params.max_error as u64;
        let lo = if d > width { (d - width).div_ceil(offset) } else { 0 };
        lo..=d / offset
    }

    /// Consume a stream sorted by `(diagonal, query_pos)` and return the
    /// trapezoids that pass the length and identity thresholds.
    pub fn run<I, E>(&self, seeds: I) -> Result<Vec<Trapezoid>, E>
    where
        I: IntoIterator<Item = Result<SeedHit, E>>,
        E: From<FilterError>,
    {
        let mut open: BTreeMap<u64, Vec<SeedHit>> = BTreeMap::new();
        let mut out = Vec::new();
        let mut prev: Option<SeedHit> = None;
        let mut duplicates = 0usize;

        for seed in seeds {
            let seed = seed?;
            if let Some(p) = prev {
                match (p.diagonal, p.query_pos).cmp(&(seed.diagonal, seed.query_pos)) {
                    std::cmp::Ordering::Equal => {
                        duplicates += 1;
                        continue;
                    }
                    std::cmp::Ordering::Greater => {
                        return Err(FilterError::Unsorted {
                            prev_diagonal: p.diagonal,
                            prev_offset: p.query_pos,
                            diagonal: seed.diagonal,
                            offset: seed.query_pos,
                        }
                        .into());
                    }
                    std::cmp::Ordering::Less => {}
                }
            }
            prev = Some(seed);

            let d = (seed.diagonal + self.shift).max(0) as u64;
            while let Some((&tube, _)) = open.first_key_value() {
                if self.tube_end(tube) >= d {
                    break;
                }
                if let Some(tube_seeds) = open.remove(&tube) {
                    self.close_tube(tube_seeds, &mut out);
                }
            }
            for tube in self.tubes_for(d) {
                open.entry(tube).or_default().push(seed);
            }
        }
        for (_, tube_seeds) in open {
            self.close_tube(tube_seeds, &mut out);
        }

        if duplicates > 0 {
            log::debug!("Dropped {} duplicate seeds", duplicates);
        }
        Ok(out)
    }

    /// Convenience for in-memory seed sets in any order.
    pub fn run_unsorted(&self, seeds: &[SeedHit]) -> FilterResult<Vec<Trapezoid>> {
        let mut sorted = seeds.to_vec();
        sorted.sort_unstable_by_key(|s| (s.diagonal, s.query_pos));
        self.run(sorted.into_iter().map(Ok::<_, FilterError>))
    }

    fn close_tube(&self, mut seeds: Vec<SeedHit>, out: &mut Vec<Trapezoid>) {
        seeds.sort_unstable_by_key(|s| (s.query_pos, s.diagonal));
        let max_gap = self.params.max_gap();
        let mut cluster: Option<Cluster> = None;
        for seed in &seeds {
            match cluster.as_mut() {
                Some(c) if seed.query_pos <= c.last_start + max_gap => c.add(seed),
                _ => {
                    if let Some(done) = cluster.take() {
                        self.emit(done, out);
                    }
                    cluster = Some(Cluster::start(seed));
                }
            }
        }
        if let Some(done) = cluster {
            self.emit(done, out);
        }
    }

    fn emit(&self, cluster: Cluster, out: &mut Vec<Trapezoid>) {
        let trap = cluster.trapezoid();
        let long_enough = trap.span() as usize + self.params.max_error >= self.params.min_hit_len;
        if long_enough && cluster.estimated_identity() >= self.params.min_id {
            out.push(trap);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn params(min_hit_len: usize, min_id: f64) -> FilterParams {
        FilterParams {
            word_size: 8,
            min_hit_len,
            min_id,
            max_error: 4,
            tube_offset: 16,
        }
    }

    /// Seeds for a gap-free match of `len` residues starting at query `q`
    /// on `diagonal`, skipping offsets in `holes`.
    fn diagonal_run(q: u32, diagonal: i64, len: u32, k: u32, holes: &[u32]) -> Vec<SeedHit> {
        (q..q + len - k + 1)
            .filter(|p| !holes.iter().any(|&h| *p <= h && h < *p + k))
            .map(|p| SeedHit::new(p, (p as i64 + diagonal) as u32, k))
            .collect()
    }

    #[test]
    fn test_record_layout() {
        let hit = SeedHit::new(10, 250, 12);
        let mut buf = Vec::new();
        hit.write(&mut buf).unwrap();
        assert_eq!(buf.len(), SeedHit::SIZE);
        assert_eq!(SeedHit::read(&mut buf.as_slice()).unwrap(), hit);
        assert_eq!(hit.diagonal, 240);
    }

    #[test]
    fn test_single_run_is_one_trapezoid() {
        let filter = Filter::new(params(50, 0.9), 1000).unwrap();
        let seeds = diagonal_run(300, 200, 200, 8, &[]);
        let traps = filter.run_unsorted(&seeds).unwrap();
        assert!(!traps.is_empty());
        for t in &traps {
            assert_eq!((t.diag_lo, t.diag_hi), (200, 200));
            assert_eq!((t.q_lo, t.q_hi), (300, 500));
        }
    }

    #[test]
    fn test_short_run_is_rejected() {
        let filter = Filter::new(params(100, 0.9), 1000).unwrap();
        let seeds = diagonal_run(0, 5, 60, 8, &[]);
        assert!(filter.run_unsorted(&seeds).unwrap().is_empty());
    }

    #[test]
    fn test_indel_stays_in_one_band() {
        let filter = Filter::new(params(100, 0.9), 1000).unwrap();
        let mut seeds = diagonal_run(100, 40, 80, 8, &[]);
        seeds.extend(diagonal_run(180, 41, 80, 8, &[]));
        let traps = merge_trapezoids(filter.run_unsorted(&seeds).unwrap());
        assert_eq!(traps.len(), 1);
        assert_eq!((traps[0].diag_lo, traps[0].diag_hi), (40, 41));
        assert_eq!((traps[0].q_lo, traps[0].q_hi), (100, 260));
    }

    #[test]
    fn test_duplicates_are_ignored() {
        let filter = Filter::new(params(50, 0.9), 1000).unwrap();
        let seeds = diagonal_run(0, 10, 100, 8, &[]);
        let mut doubled = seeds.clone();
        doubled.extend(seeds.iter().copied());
        assert_eq!(
            filter.run_unsorted(&seeds).unwrap(),
            filter.run_unsorted(&doubled).unwrap()
        );
    }

    #[test]
    fn test_unsorted_stream_is_an_error() {
        let filter = Filter::new(params(50, 0.9), 1000).unwrap();
        let seeds = vec![SeedHit::new(5, 50, 8), SeedHit::new(5, 40, 8)];
        let result = filter.run(seeds.into_iter().map(Ok::<_, FilterError>));
        assert!(matches!(result, Err(FilterError::Unsorted { .. })));
    }

    #[test]
    fn test_threshold_monotonicity() {
        let mut seeds = diagonal_run(0, 100, 300, 8, &[50, 120, 121, 200]);
        seeds.extend(diagonal_run(500, -30, 90, 8, &[530]));
        seeds.extend(diagonal_run(700, 400, 60, 8, &[]));
        seeds.extend(diagonal_run(900, 12, 140, 8, &[950, 951, 952, 953, 990]));

        let run = |len, id| -> HashSet<Trapezoid> {
            Filter::new(params(len, id), 2000)
                .unwrap()
                .run_unsorted(&seeds)
                .unwrap()
                .into_iter()
                .collect()
        };

        let lengths = [20, 60, 90, 150, 300, 400];
        let ids = [0.5, 0.8, 0.9, 0.95, 0.99];
        for w in lengths.windows(2) {
            for &id in &ids {
                assert!(run(w[1], id).is_subset(&run(w[0], id)), "len {:?} id {}", w, id);
            }
        }
        for w in ids.windows(2) {
            for &len in &lengths {
                assert!(run(len, w[1]).is_subset(&run(len, w[0])), "len {} id {:?}", len, w);
            }
        }
    }

    #[test]
    fn test_tube_membership() {
        let filter = Filter::new(params(50, 0.9), 0).unwrap();
        // offset 16, max_error 4: tube i covers [16i, 16i + 20].
        assert_eq!(filter.tubes_for(0), 0..=0);
        assert_eq!(filter.tubes_for(18), 0..=1);
        assert_eq!(filter.tubes_for(20), 0..=1);
        assert_eq!(filter.tubes_for(21), 1..=1);
        assert_eq!(filter.tube_end(1), 36);
    }

    #[test]
    fn test_invalid_params() {
        let mut p = params(50, 0.9);
        p.tube_offset = 0;
        assert!(Filter::new(p, 10).is_err());
        let mut p = params(50, 0.9);
        p.min_id = 1.5;
        assert!(Filter::new(p, 10).is_err());
    }
}
