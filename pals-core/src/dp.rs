//! Banded local alignment of trapezoids.
//!
//! Each trapezoid is widened by a pad on every side and aligned with a local
//! (floor at zero) recurrence restricted to its diagonal band. Scores are
//! scaled by 1000 and kept integral: a match earns `(1 - id)` and a mismatch
//! or gap costs `id`, so a region scores above zero exactly when its identity
//! exceeds `id`. The alignment is read back from the best-scoring cell, which
//! trims low-identity ends.

use std::ops::Range;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::filter::Trapezoid;
use crate::nucleotide::residues_match;
use crate::pack::SeqView;

const SCALE: f64 = 1000.0;

#[derive(Debug, Error)]
pub enum DpError {
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),
}

pub type DpResult<T> = Result<T, DpError>;

/// Acceptance thresholds for extended hits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DpParams {
    pub min_hit_len: usize,
    pub min_id: f64,
}

impl DpParams {
    pub fn validate(&self) -> DpResult<()> {
        if self.min_hit_len == 0 {
            return Err(DpError::InvalidParams("minimum hit length must be positive".to_string()));
        }
        if !(self.min_id > 0.0 && self.min_id <= 1.0) {
            return Err(DpError::InvalidParams(format!(
                "minimum identity {} outside (0, 1]",
                self.min_id
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scoring {
    pub match_score: i64,
    pub mismatch: i64,
    pub gap: i64,
}

impl Scoring {
    pub fn from_identity(min_id: f64) -> Self {
        let match_score = (((1.0 - min_id) * SCALE).round() as i64).max(1);
        let penalty = (min_id * SCALE).round() as i64;
        Self {
            match_score,
            mismatch: -penalty,
            gap: -penalty,
        }
    }
}

/// A local alignment in view coordinates, half-open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DpHit {
    pub query_start: usize,
    pub query_end: usize,
    pub target_start: usize,
    pub target_end: usize,
    pub score: i64,
    pub matches: u32,
    pub mismatches: u32,
    pub gaps: u32,
    pub identity: f64,
    /// Lowest and highest diagonal visited by the alignment path.
    pub diag_lo: i64,
    pub diag_hi: i64,
}

impl DpHit {
    pub fn query_range(&self) -> Range<usize> {
        self.query_start..self.query_end
    }

    pub fn target_range(&self) -> Range<usize> {
        self.target_start..self.target_end
    }

    /// Length of the longer of the two aligned segments.
    pub fn len(&self) -> usize {
        (self.query_end - self.query_start).max(self.target_end - self.target_start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn coords(&self) -> (usize, usize, usize, usize) {
        (self.target_start, self.query_start, self.target_end, self.query_end)
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Step {
    Stop,
    Diagonal,
    /// Consumes a query residue only.
    Up,
    /// Consumes a target residue only.
    Left,
}

pub struct BandedAligner {
    params: DpParams,
    scoring: Scoring,
    pad: usize,
    min_diagonal: Option<i64>,
}

impl BandedAligner {
    pub fn new(params: DpParams, pad: usize) -> DpResult<Self> {
        params.validate()?;
        Ok(Self {
            params,
            scoring: Scoring::from_identity(params.min_id),
            pad,
            min_diagonal: None,
        })
    }

    /// Forbid diagonals below `min` (self comparison excludes the identity).
    pub fn with_min_diagonal(mut self, min: Option<i64>) -> Self {
        self.min_diagonal = min;
        self
    }

    pub fn params(&self) -> &DpParams {
        &self.params
    }

    /// Align one trapezoid; `None` if nothing passes the thresholds.
    pub fn align(&self, query: &SeqView<'_>, target: &SeqView<'_>, trap: &Trapezoid) -> Option<DpHit> {
        let pad = self.pad as i64;
        let mut dlo = trap.diag_lo - pad;
        let dhi = trap.diag_hi + pad;
        if let Some(min) = self.min_diagonal {
            dlo = dlo.max(min);
        }
        let r0 = (trap.q_lo as i64 - pad).max(0);
        let r1 = (trap.q_hi as i64 + pad).min(query.len() as i64);
        let c0 = (r0 + dlo).max(0);
        let c1 = (r1 + dhi).min(target.len() as i64);
        if dlo > dhi || r0 >= r1 || c0 >= c1 {
            return None;
        }

        let q = query.fetch(r0 as usize..r1 as usize);
        let t = target.fetch(c0 as usize..c1 as usize);
        let width = (dhi - dlo + 1) as usize;
        let rows = (r1 - r0 + 1) as usize;

        let mut trace = vec![Step::Stop; rows * width];
        let mut prev = vec![0i64; width];
        let mut cur = vec![0i64; width];
        let mut best = (0i64, 0usize, 0usize);

        for row in 1..rows {
            let i = r0 + row as i64;
            let qb = q[row - 1];
            for w in 0..width {
                let j = i + dlo + w as i64;
                if j <= c0 || j > c1 {
                    cur[w] = 0;
                    continue;
                }
                let tb = t[(j - 1 - c0) as usize];
                let sub = if residues_match(qb, tb) {
                    self.scoring.match_score
                } else {
                    self.scoring.mismatch
                };

                let mut h = 0;
                let mut step = Step::Stop;
                let diag = prev[w] + sub;
                if diag > h {
                    h = diag;
                    step = Step::Diagonal;
                }
                if w + 1 < width {
                    let up = prev[w + 1] + self.scoring.gap;
                    if up > h {
                        h = up;
                        step = Step::Up;
                    }
                }
                if w > 0 {
                    let left = cur[w - 1] + self.scoring.gap;
                    if left > h {
                        h = left;
                        step = Step::Left;
                    }
                }
                cur[w] = h;
                trace[row * width + w] = step;
                if h > best.0 {
                    best = (h, row, w);
                }
            }
            std::mem::swap(&mut prev, &mut cur);
        }

        let (score, end_row, end_w) = best;
        if score == 0 {
            return None;
        }

        let (mut row, mut w) = (end_row, end_w);
        let (mut matches, mut mismatches, mut gaps) = (0u32, 0u32, 0u32);
        let (mut path_lo, mut path_hi) = (i64::MAX, i64::MIN);
        loop {
            let d = dlo + w as i64;
            path_lo = path_lo.min(d);
            path_hi = path_hi.max(d);
            match trace[row * width + w] {
                Step::Stop => break,
                Step::Diagonal => {
                    let j = r0 + row as i64 + d;
                    if residues_match(q[row - 1], t[(j - 1 - c0) as usize]) {
                        matches += 1;
                    } else {
                        mismatches += 1;
                    }
                    row -= 1;
                }
                Step::Up => {
                    gaps += 1;
                    row -= 1;
                    w += 1;
                }
                Step::Left => {
                    gaps += 1;
                    w -= 1;
                }
            }
        }

        let query_start = (r0 + row as i64) as usize;
        let target_start = (r0 + row as i64 + dlo + w as i64) as usize;
        let query_end = (r0 + end_row as i64) as usize;
        let target_end = (r0 + end_row as i64 + dlo + end_w as i64) as usize;
        let columns = matches + mismatches + gaps;
        let hit = DpHit {
            query_start,
            query_end,
            target_start,
            target_end,
            score,
            matches,
            mismatches,
            gaps,
            identity: matches as f64 / columns as f64,
            diag_lo: path_lo,
            diag_hi: path_hi,
        };

        (hit.len() >= self.params.min_hit_len && hit.identity >= self.params.min_id).then_some(hit)
    }

    /// Align every trapezoid in parallel; duplicates are dropped and hits
    /// come back ordered by target then query start.
    pub fn align_all(&self, query: &SeqView<'_>, target: &SeqView<'_>, traps: &[Trapezoid]) -> Vec<DpHit> {
        let mut hits: Vec<DpHit> = traps
            .par_iter()
            .filter_map(|trap| self.align(query, target, trap))
            .collect();
        hits.sort_by_key(|h| h.coords());
        hits.dedup_by(|a, b| a.coords() == b.coords());
        hits
    }
}
