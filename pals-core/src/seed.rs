//! Seed generation
//!
//! Streams every shared word between a query view and an indexed target as a
//! [`SeedHit`]. When a sequence is compared with itself, only one of each
//! mirrored pair of hits is produced and the trivial main diagonal is dropped.

use std::convert::Infallible;

use crate::filter::SeedHit;
use crate::index::KmerIndex;
use crate::nucleotide::KmerEncoder;
use crate::pack::SeqView;
use crate::types::Strand;

/// How query and target relate, which decides the symmetry rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    /// Distinct query and target; every hit is kept.
    Pairwise,
    /// Forward strand against itself; only hits above the main diagonal.
    SelfForward,
    /// Reverse complement against the forward strand of the same sequence.
    SelfReverse,
}

impl Comparison {
    pub fn new(self_comparison: bool, strand: Strand) -> Self {
        match (self_comparison, strand) {
            (false, _) => Comparison::Pairwise,
            (true, Strand::Forward) => Comparison::SelfForward,
            (true, Strand::Reverse) => Comparison::SelfReverse,
        }
    }

    /// Smallest diagonal an extension may use.
    pub fn min_diagonal(self) -> Option<i64> {
        match self {
            Comparison::SelfForward => Some(1),
            _ => None,
        }
    }
}

pub struct Seeder<'a> {
    index: &'a KmerIndex,
    comparison: Comparison,
}

impl<'a> Seeder<'a> {
    pub fn new(index: &'a KmerIndex, comparison: Comparison) -> Self {
        Self { index, comparison }
    }

    #[inline]
    fn keep(&self, query_pos: usize, target_pos: usize) -> bool {
        match self.comparison {
            Comparison::Pairwise => true,
            Comparison::SelfForward => target_pos > query_pos,
            Comparison::SelfReverse => {
                target_pos + query_pos + self.index.k() <= self.index.sequence_len()
            }
        }
    }

    /// Feed every kept hit to `sink`, returning how many were produced.
    pub fn for_each_hit<E, F>(&self, query: &SeqView<'_>, mut sink: F) -> Result<usize, E>
    where
        F: FnMut(SeedHit) -> Result<(), E>,
    {
        let k = self.index.k();
        let mut encoder = KmerEncoder::new(k);
        let mut produced = 0usize;
        for (i, base) in query.bases().enumerate() {
            let Some(kmer) = encoder.push(base) else {
                continue;
            };
            let query_pos = i + 1 - k;
            for &target_pos in self.index.positions_of(kmer) {
                if self.keep(query_pos, target_pos as usize) {
                    sink(SeedHit::new(query_pos as u32, target_pos, k as u32))?;
                    produced += 1;
                }
            }
        }
        Ok(produced)
    }

    /// Collect all hits in memory; intended for small inputs.
    pub fn collect(&self, query: &SeqView<'_>) -> Vec<SeedHit> {
        let mut hits = Vec::new();
        let pushed = self.for_each_hit::<Infallible, _>(query, |hit| {
            hits.push(hit);
            Ok(())
        });
        match pushed {
            Ok(_) => hits,
            Err(never) => match never {},
        }
    }
}
