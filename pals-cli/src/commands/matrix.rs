//! Matrix command implementation - every file against itself and every other file

use anyhow::{bail, Context, Result};
use clap::Args;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use super::align::{align_files, InputOptions};
use crate::config::Config;

#[derive(Args, Debug, Clone)]
pub struct MatrixArgs {
    /// Sequence files to compare
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Directory for outputs and temporary files
    #[arg(long, default_value = ".")]
    pub workdir: PathBuf,

    /// Number of comparisons to run at once
    #[arg(short, long, default_value_t = 6)]
    pub jobs: usize,

    /// Threads given to each comparison
    #[arg(short, long, default_value_t = 2)]
    pub threads: usize,
}

/// One comparison of the matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub target: PathBuf,
    /// `None` for a self comparison.
    pub query: Option<PathBuf>,
    pub out: PathBuf,
}

impl Job {
    fn describe(&self) -> String {
        match &self.query {
            Some(query) => format!("{} x {}", self.target.display(), query.display()),
            None => self.target.display().to_string(),
        }
    }
}

fn stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

/// Self comparisons first, then each unordered pair once.
pub fn plan(files: &[PathBuf], workdir: &Path) -> Vec<Job> {
    let mut jobs: Vec<Job> = files
        .iter()
        .map(|f| Job {
            target: f.clone(),
            query: None,
            out: workdir.join(format!("{}.gff", stem(f))),
        })
        .collect();

    for (i, target) in files.iter().enumerate() {
        for query in &files[i + 1..] {
            jobs.push(Job {
                target: target.clone(),
                query: Some(query.clone()),
                out: workdir.join(format!("{}_{}.gff", stem(target), stem(query))),
            });
        }
    }
    jobs
}

pub fn execute(config: &Config, args: MatrixArgs) -> Result<()> {
    if args.jobs == 0 {
        bail!("At least one job is required");
    }
    if !args.workdir.is_dir() {
        bail!("Working directory {} does not exist", args.workdir.display());
    }

    let jobs = plan(&args.files, &args.workdir);
    let total = jobs.len();
    log::info!("Running {} comparisons, {} at a time", total, args.jobs);

    let input = InputOptions::from_config(config);
    let mut base = config.aligner_config();
    base.threads = args.threads;
    base.morass.temp_dir = args.workdir.clone();

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(args.jobs)
        .build()
        .context("Failed to build job pool")?;

    let done = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);
    pool.install(|| {
        jobs.par_iter().for_each(|job| {
            if job.out.exists() {
                let n = done.fetch_add(1, Ordering::SeqCst) + 1;
                log::info!("file {:?} exists, skipping {}...", job.out, n);
                return;
            }

            let mut aligner = base.clone();
            aligner.self_comparison = job.query.is_none();
            aligner.morass.prefix = format!("{}{}_", aligner.morass.prefix, stem(&job.out));
            match align_files(&aligner, &input, &job.target, job.query.as_deref(), Some(&job.out)) {
                Ok(_) => {
                    let n = done.fetch_add(1, Ordering::SeqCst) + 1;
                    log::info!("done {}, {} of {}", job.describe(), n, total);
                }
                Err(e) => {
                    failed.fetch_add(1, Ordering::SeqCst);
                    log::error!("problem with {}: {:#}", job.describe(), e);
                    // A partial output would be skipped on the next run.
                    if job.out.exists() {
                        if let Err(e) = std::fs::remove_file(&job.out) {
                            log::warn!("could not remove {}: {}", job.out.display(), e);
                        }
                    }
                }
            }
        })
    });

    let failed = failed.into_inner();
    if failed > 0 {
        bail!("{} of {} comparisons failed", failed, total);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_covers_upper_triangle() {
        let files: Vec<PathBuf> = ["x/a.fa", "b.fasta", "c.fa.gz"].iter().map(PathBuf::from).collect();
        let jobs = plan(&files, Path::new("work"));
        assert_eq!(jobs.len(), (3 * 3 + 3) / 2);

        let outs: Vec<PathBuf> = jobs.iter().map(|j| j.out.clone()).collect();
        let expected: Vec<PathBuf> = ["a.gff", "b.gff", "c.fa.gff", "a_b.gff", "a_c.fa.gff", "b_c.fa.gff"]
            .iter()
            .map(|n| Path::new("work").join(n))
            .collect();
        assert_eq!(outs, expected);

        assert!(jobs[..3].iter().all(|j| j.query.is_none()));
        assert_eq!(jobs[3].target, PathBuf::from("x/a.fa"));
        assert_eq!(jobs[3].query, Some(PathBuf::from("b.fasta")));
    }

    #[test]
    fn test_existing_outputs_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        // Neither input exists, so any attempted comparison would fail.
        let files = vec![dir.path().join("a.fa"), dir.path().join("b.fa")];
        for job in plan(&files, dir.path()) {
            std::fs::write(&job.out, "").unwrap();
        }
        let args = MatrixArgs {
            files,
            workdir: dir.path().to_path_buf(),
            jobs: 2,
            threads: 1,
        };
        execute(&Config::default(), args).unwrap();
    }

    #[test]
    fn test_failures_are_counted() {
        let dir = tempfile::tempdir().unwrap();
        let args = MatrixArgs {
            files: vec![dir.path().join("missing.fa")],
            workdir: dir.path().to_path_buf(),
            jobs: 1,
            threads: 1,
        };
        let err = execute(&Config::default(), args).unwrap_err();
        assert_eq!(err.to_string(), "1 of 1 comparisons failed");
    }
}
