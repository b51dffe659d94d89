//! Aligner driver
//!
//! Ties the pipeline together for one target/query pair:
//!
//! 1. `optimise` derives the filter parameters from the requested
//!    sensitivity and the memory ceiling.
//! 2. `build_index` indexes the forward target once; a second aligner can
//!    `share` it.
//! 3. `align` seeds one query strand into the aligner's morass, replays the
//!    sorted seeds through the tube filter, merges the trapezoids and extends
//!    them with the banded DP.
//!
//! [`run`] drives both strands, concurrently when more than one thread is
//! configured, funnels hits through a mutex-guarded writer and removes every
//! temporary file whether or not the run succeeded.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::dp::{BandedAligner, DpError, DpHit, DpParams};
use crate::filter::{merge_trapezoids, Filter, FilterError, FilterParams, SeedHit, Trapezoid};
use crate::index::{IndexError, KmerIndex, MAX_WORD_SIZE, MIN_WORD_SIZE};
use crate::morass::{Morass, MorassConfig, MorassError};
use crate::pack::PackedSequence;
use crate::seed::{Comparison, Seeder};
use crate::types::Strand;
use crate::writer::{traps_path, write_trapezoids, HitWriter, Pair, WriteError};

/// Expected positions per indexed word the optimiser aims for.
pub const TARGET_LIST_LEN: f64 = 1.0;
pub const MIN_TUBE_OFFSET: usize = 16;
pub const MIN_BAND_PAD: usize = 8;

#[derive(Debug, Error)]
pub enum AlignError {
    #[error("{0} sequence is zero length")]
    EmptySequence(&'static str),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("No word size fits the memory ceiling of {limit} bytes (at least {required} required)")]
    Memory { required: usize, limit: usize },

    #[error("Filter parameters have not been optimised")]
    NotOptimised,

    #[error("Index has not been built")]
    NoIndex,

    #[error("Output writer lock poisoned")]
    Poisoned,

    #[error("Worker pool: {0}")]
    Pool(String),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Morass(#[from] MorassError),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error(transparent)]
    Dp(#[from] DpError),

    #[error(transparent)]
    Write(#[from] WriteError),
}

pub type AlignResult<T> = Result<T, AlignError>;

/// Everything a run needs, fixed before any work starts.
#[derive(Debug, Clone)]
pub struct AlignerConfig {
    pub filter_len: usize,
    pub filter_id: f64,
    /// Zero means "same as the filter".
    pub dp_len: usize,
    /// Zero means "same as the filter".
    pub dp_id: f64,
    pub tube_offset: Option<usize>,
    pub max_word_size: usize,
    pub self_comparison: bool,
    pub same_strand: bool,
    pub threads: usize,
    /// Memory ceiling in bytes used by the optimiser.
    pub max_memory: Option<usize>,
    /// Stem for per-strand trapezoid dumps.
    pub traps: Option<PathBuf>,
    pub morass: MorassConfig,
}

impl Default for AlignerConfig {
    fn default() -> Self {
        Self {
            filter_len: 400,
            filter_id: 0.94,
            dp_len: 0,
            dp_id: 0.0,
            tube_offset: None,
            max_word_size: MAX_WORD_SIZE,
            self_comparison: false,
            same_strand: false,
            threads: 1,
            max_memory: None,
            traps: None,
            morass: MorassConfig::default(),
        }
    }
}

impl AlignerConfig {
    pub fn validate(&self) -> AlignResult<()> {
        let identity = |name: &str, id: f64| {
            if id > 0.0 && id < 1.0 {
                Ok(())
            } else {
                Err(AlignError::Config(format!("{} identity {} outside (0, 1)", name, id)))
            }
        };
        identity("filter", self.filter_id)?;
        if self.dp_id != 0.0 {
            identity("dp", self.dp_id)?;
        }
        if self.filter_len == 0 {
            return Err(AlignError::Config("filter length must be positive".to_string()));
        }
        if self.tube_offset == Some(0) {
            return Err(AlignError::Config("tube offset must be positive".to_string()));
        }
        if !(MIN_WORD_SIZE..=MAX_WORD_SIZE).contains(&self.max_word_size) {
            return Err(IndexError::WordSize(self.max_word_size).into());
        }
        if self.threads == 0 {
            return Err(AlignError::Config("at least one thread is required".to_string()));
        }
        if self.morass.chunk_size == 0 {
            return Err(AlignError::Config("chunk size must be positive".to_string()));
        }
        if !self.morass.temp_dir.is_dir() {
            return Err(AlignError::Config(format!(
                "temporary directory {} is not a directory",
                self.morass.temp_dir.display()
            )));
        }
        Ok(())
    }

    pub fn dp_params(&self) -> DpParams {
        DpParams {
            min_hit_len: if self.dp_len == 0 { self.filter_len } else { self.dp_len },
            min_id: if self.dp_id == 0.0 { self.filter_id } else { self.dp_id },
        }
    }

    pub fn strands(&self) -> Vec<Strand> {
        if self.same_strand {
            vec![Strand::Forward]
        } else {
            vec![Strand::Forward, Strand::Reverse]
        }
    }
}

/// Output of one strand pass, in packed coordinates.
#[derive(Debug)]
pub struct StrandResult {
    pub strand: Strand,
    pub seeds: usize,
    pub trapezoids: Vec<Trapezoid>,
    pub hits: Vec<DpHit>,
}

/// Counters reported for one strand pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StrandStats {
    pub seeds: usize,
    pub trapezoids: usize,
    pub hits: usize,
    pub written: usize,
    pub bytes: usize,
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub params: Option<FilterParams>,
    pub forward: Option<StrandStats>,
    pub reverse: Option<StrandStats>,
}

impl RunSummary {
    pub fn written(&self) -> usize {
        self.forward.iter().chain(self.reverse.iter()).map(|s| s.written).sum()
    }

    pub fn bytes(&self) -> usize {
        self.forward.iter().chain(self.reverse.iter()).map(|s| s.bytes).sum()
    }
}

pub struct Aligner<'a> {
    target: &'a PackedSequence,
    query: &'a PackedSequence,
    config: &'a AlignerConfig,
    morass: Morass<SeedHit>,
    params: Option<FilterParams>,
    index: Option<Arc<KmerIndex>>,
}

impl<'a> Aligner<'a> {
    pub fn new(
        target: &'a PackedSequence,
        query: &'a PackedSequence,
        config: &'a AlignerConfig,
        morass: Morass<SeedHit>,
    ) -> AlignResult<Self> {
        if target.is_empty() {
            return Err(AlignError::EmptySequence("target"));
        }
        if query.is_empty() {
            return Err(AlignError::EmptySequence("query"));
        }
        Ok(Self {
            target,
            query,
            config,
            morass,
            params: None,
            index: None,
        })
    }

    pub fn params(&self) -> Option<&FilterParams> {
        self.params.as_ref()
    }

    /// Index footprint for word size `k` plus the packed inputs.
    pub fn mem_required(&self, k: usize) -> usize {
        let mut total = KmerIndex::estimated_bytes(k, self.target.len()) + self.target.memory_bytes();
        if !std::ptr::eq(self.target, self.query) {
            total += self.query.memory_bytes();
        }
        total
    }

    /// Derive filter parameters for hits of at least `min_hit_len` residues
    /// at identity `min_id`, keeping the estimate under `mem` bytes.
    pub fn optimise(&mut self, min_hit_len: usize, min_id: f64, mem: Option<usize>) -> AlignResult<FilterParams> {
        let len = self.target.len();
        // Nudge so exact products such as 100 * 0.1 do not floor one short.
        let max_error = ((min_hit_len as f64) * (1.0 - min_id) + 1e-9).floor() as usize;
        let upper = (min_hit_len / (max_error + 1))
            .min(self.config.max_word_size)
            .min(len);
        if upper < MIN_WORD_SIZE {
            return Err(AlignError::Config(format!(
                "hits of {} residues at identity {} leave no word size of at least {}",
                min_hit_len, min_id, MIN_WORD_SIZE
            )));
        }

        let fits = |k: usize| mem.map_or(true, |limit| self.mem_required(k) <= limit);
        let mut chosen = None;
        let mut largest_fitting = None;
        for k in MIN_WORD_SIZE..=upper {
            if !fits(k) {
                continue;
            }
            if KmerIndex::expected_list_len(k, len) <= TARGET_LIST_LEN {
                chosen = Some(k);
                break;
            }
            largest_fitting = Some(k);
        }
        let word_size = match chosen.or(largest_fitting) {
            Some(k) => k,
            None => {
                let required = (MIN_WORD_SIZE..=upper)
                    .map(|k| self.mem_required(k))
                    .min()
                    .unwrap_or(0);
                return Err(AlignError::Memory {
                    required,
                    limit: mem.unwrap_or(0),
                });
            }
        };

        let params = FilterParams {
            word_size,
            min_hit_len,
            min_id,
            max_error,
            tube_offset: self
                .config
                .tube_offset
                .unwrap_or_else(|| max_error.max(MIN_TUBE_OFFSET)),
        };
        params.validate()?;
        log::info!(
            "Filter: word size {}, max error {}, tube offset {}, min match {}",
            params.word_size,
            params.max_error,
            params.tube_offset,
            params.min_match()
        );
        log::info!("Estimated minimum memory {} bytes", self.mem_required(word_size));
        self.params = Some(params);
        Ok(params)
    }

    pub fn build_index(&mut self) -> AlignResult<()> {
        let params = self.params.ok_or(AlignError::NotOptimised)?;
        let index = KmerIndex::new(params.word_size, &self.target.view(Strand::Forward))?;
        log::info!(
            "Indexed target: {} positions, average list length {:.3}",
            index.len(),
            index.avg_list_len()
        );
        self.index = Some(Arc::new(index));
        Ok(())
    }

    /// Reuse the parameters and index of `other`.
    pub fn share(&mut self, other: &Aligner<'_>) -> AlignResult<()> {
        self.params = Some(other.params.ok_or(AlignError::NotOptimised)?);
        self.index = Some(other.index.clone().ok_or(AlignError::NoIndex)?);
        Ok(())
    }

    pub fn avg_list_len(&self) -> Option<f64> {
        self.index.as_ref().map(|index| index.avg_list_len())
    }

    fn band_pad(params: &FilterParams) -> usize {
        params.max_error.max(MIN_BAND_PAD)
    }

    /// Seed, filter and extend one strand of the query.
    pub fn align(&mut self, strand: Strand) -> AlignResult<StrandResult> {
        let params = self.params.ok_or(AlignError::NotOptimised)?;
        let index = self.index.clone().ok_or(AlignError::NoIndex)?;
        let comparison = Comparison::new(self.config.self_comparison, strand);
        let query = self.query.view(strand);
        let target = self.target.view(Strand::Forward);

        self.morass.clear()?;
        let morass = &mut self.morass;
        let seeds = Seeder::new(&index, comparison).for_each_hit(&query, |hit| morass.push(hit))?;
        log::debug!("{}: {} seeds in {} runs", strand.label(), seeds, self.morass.runs());

        let filter = Filter::new(params, query.len())?;
        let sorted = self.morass.iter()?.map(|r| r.map_err(AlignError::from));
        let trapezoids = merge_trapezoids(filter.run(sorted)?);
        log::debug!("{}: {} trapezoids", strand.label(), trapezoids.len());

        let extender = BandedAligner::new(self.config.dp_params(), Self::band_pad(&params))?
            .with_min_diagonal(comparison.min_diagonal());
        let hits = extender.align_all(&query, &target, &trapezoids);

        Ok(StrandResult {
            strand,
            seeds,
            trapezoids,
            hits,
        })
    }

    /// Align one strand and write its hits under the writer lock.
    pub fn align_and_write<W: HitWriter + Send + ?Sized>(
        &mut self,
        strand: Strand,
        writer: &Mutex<&mut W>,
    ) -> AlignResult<StrandStats> {
        log::info!("Aligning {} strand", strand.label());
        let result = self.align(strand)?;
        if let Some(stem) = &self.config.traps {
            write_trapezoids(&traps_path(stem, strand), &result.trapezoids)?;
        }

        let mut stats = StrandStats {
            seeds: result.seeds,
            trapezoids: result.trapezoids.len(),
            hits: result.hits.len(),
            ..Default::default()
        };
        let pairs: Vec<Pair> = result
            .hits
            .iter()
            .filter_map(|hit| Pair::new(self.target, self.query, hit, strand))
            .collect();

        let mut out = writer.lock().map_err(|_| AlignError::Poisoned)?;
        for pair in &pairs {
            stats.bytes += out.write(pair)?;
            stats.written += 1;
        }
        log::info!(
            "{} strand: {} hits, {} written ({} bytes)",
            strand.label(),
            stats.hits,
            stats.written,
            stats.bytes
        );
        Ok(stats)
    }

    /// Remove the morass files.
    pub fn clean_up(self) -> AlignResult<()> {
        Ok(self.morass.clean_up()?)
    }
}

fn record(summary: &mut RunSummary, strand: Strand, stats: StrandStats) {
    match strand {
        Strand::Forward => summary.forward = Some(stats),
        Strand::Reverse => summary.reverse = Some(stats),
    }
}

/// Run a full comparison of `query` against `target` into `writer`.
///
/// For self comparison pass the same sequence twice.
pub fn run<W: HitWriter + Send + ?Sized>(
    config: &AlignerConfig,
    target: &PackedSequence,
    query: &PackedSequence,
    writer: &mut W,
) -> AlignResult<RunSummary> {
    config.validate()?;
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.threads)
        .build()
        .map_err(|e| AlignError::Pool(e.to_string()))?;

    let mut forward = Aligner::new(target, query, config, Morass::new(config.morass.clone())?)?;
    let params = forward.optimise(config.filter_len, config.filter_id, config.max_memory)?;
    let dp = config.dp_params();
    log::info!("DP: min length {}, min identity {}", dp.min_hit_len, dp.min_id);

    let mut summary = RunSummary {
        params: Some(params),
        ..Default::default()
    };
    let strands = config.strands();
    let out = Mutex::new(writer);

    let outcome = if config.threads > 1 && strands.len() == 2 {
        let built = forward.build_index().and_then(|_| {
            let mut reverse = Aligner::new(target, query, config, Morass::new(config.morass.clone())?)?;
            reverse.share(&forward)?;
            Ok(reverse)
        });
        match built {
            Ok(mut reverse) => {
                let (f, r) = pool.install(|| {
                    rayon::join(
                        || forward.align_and_write(Strand::Forward, &out),
                        || reverse.align_and_write(Strand::Reverse, &out),
                    )
                });
                let cleaned = reverse.clean_up();
                f.and_then(|fs| {
                    let rs = r?;
                    record(&mut summary, Strand::Forward, fs);
                    record(&mut summary, Strand::Reverse, rs);
                    cleaned
                })
            }
            Err(e) => Err(e),
        }
    } else {
        forward.build_index().and_then(|_| {
            for &strand in &strands {
                let stats = pool.install(|| forward.align_and_write(strand, &out))?;
                record(&mut summary, strand, stats);
            }
            Ok(())
        })
    };

    let cleaned = forward.clean_up();
    outcome?;
    cleaned?;

    let writer = out.into_inner().map_err(|_| AlignError::Poisoned)?;
    writer.finish()?;
    log::info!("Finished.");
    Ok(summary)
}
