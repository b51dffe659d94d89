//! Disk-backed sortable spill store (the "morass")
//!
//! Records are pushed into an in-memory chunk. Each full chunk is sorted and
//! written to its own temporary file as a sorted run. After [`Morass::finalise`]
//! the runs and the sorted in-memory remainder are replayed as one ordered
//! stream by a k-way heap merge. Every call to [`Morass::iter`] starts a new
//! merge pass.
//!
//! Run file layout: `records * Record::SIZE` bytes, little-endian, no header.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;

use tempfile::NamedTempFile;
use thiserror::Error;

/// Records buffered per run cursor during a merge.
pub const READ_AHEAD: usize = 4096;

/// Errors that can occur during morass operations
#[derive(Debug, Error)]
pub enum MorassError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Corrupt run file {path}: {message}")]
    Corrupt { path: String, message: String },

    #[error("Morass is finalised; clear it before pushing more records")]
    Finalised,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Background flush failed: {0}")]
    Flush(String),
}

pub type MorassResult<T> = Result<T, MorassError>;

/// A fixed-layout record that can be spilled to disk and ordered by key.
pub trait Record: Clone + Send + 'static {
    /// Encoded size in bytes.
    const SIZE: usize;

    type Key: Ord;

    fn key(&self) -> Self::Key;

    fn write<W: Write>(&self, writer: &mut W) -> io::Result<()>;

    fn read<R: Read>(reader: &mut R) -> io::Result<Self>;
}

/// Settings for one morass instance.
#[derive(Debug, Clone)]
pub struct MorassConfig {
    pub temp_dir: PathBuf,
    /// File name prefix; callers include the process id to keep runs apart.
    pub prefix: String,
    /// Records held in memory before a run is flushed.
    pub chunk_size: usize,
    /// Sort and write runs on a background thread.
    pub concurrent: bool,
}

impl Default for MorassConfig {
    fn default() -> Self {
        Self {
            temp_dir: std::env::temp_dir(),
            prefix: format!("pals_{}_", std::process::id()),
            chunk_size: 10_000_000,
            concurrent: false,
        }
    }
}

/// A sorted run on disk.
struct Run {
    file: NamedTempFile,
    records: usize,
}

/// External-memory queue of records with a sort-then-replay lifecycle.
pub struct Morass<T: Record> {
    config: MorassConfig,
    chunk: Vec<T>,
    tail: Vec<T>,
    runs: Vec<Run>,
    pending: Option<JoinHandle<MorassResult<Run>>>,
    len: usize,
    finalised: bool,
}

impl<T: Record> Morass<T> {
    pub fn new(config: MorassConfig) -> MorassResult<Self> {
        if config.chunk_size == 0 {
            return Err(MorassError::Config("chunk size must be positive".to_string()));
        }
        if !config.temp_dir.is_dir() {
            return Err(MorassError::Config(format!(
                "temporary directory {} does not exist",
                config.temp_dir.display()
            )));
        }
        Ok(Self {
            config,
            chunk: Vec::new(),
            tail: Vec::new(),
            runs: Vec::new(),
            pending: None,
            len: 0,
            finalised: false,
        })
    }

    pub fn config(&self) -> &MorassConfig {
        &self.config
    }

    pub fn push(&mut self, record: T) -> MorassResult<()> {
        if self.finalised {
            return Err(MorassError::Finalised);
        }
        self.chunk.push(record);
        self.len += 1;
        if self.chunk.len() >= self.config.chunk_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Total records pushed since creation or the last clear.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of runs written to disk so far.
    pub fn runs(&self) -> usize {
        self.runs.len() + usize::from(self.pending.is_some())
    }

    fn flush(&mut self) -> MorassResult<()> {
        let chunk = std::mem::take(&mut self.chunk);
        if chunk.is_empty() {
            return Ok(());
        }
        if self.config.concurrent {
            self.join_pending()?;
            let temp_dir = self.config.temp_dir.clone();
            let prefix = self.config.prefix.clone();
            self.pending = Some(std::thread::spawn(move || {
                write_run(chunk, &temp_dir, &prefix)
            }));
        } else {
            let run = write_run(chunk, &self.config.temp_dir, &self.config.prefix)?;
            self.runs.push(run);
        }
        Ok(())
    }

    fn join_pending(&mut self) -> MorassResult<()> {
        if let Some(handle) = self.pending.take() {
            let run = handle
                .join()
                .map_err(|_| MorassError::Flush("flush thread panicked".to_string()))??;
            self.runs.push(run);
        }
        Ok(())
    }

    /// Stop accepting records and sort the in-memory remainder.
    pub fn finalise(&mut self) -> MorassResult<()> {
        if self.finalised {
            return Ok(());
        }
        self.join_pending()?;
        let mut tail = std::mem::take(&mut self.chunk);
        tail.sort_by(|a, b| a.key().cmp(&b.key()));
        self.tail = tail;
        self.finalised = true;
        log::debug!(
            "Morass finalised: {} records, {} runs on disk",
            self.len,
            self.runs.len()
        );
        Ok(())
    }

    /// Start a merge pass over all records in key order.
    pub fn iter(&mut self) -> MorassResult<Merge<'_, T>> {
        self.finalise()?;
        let mut cursors = Vec::with_capacity(self.runs.len() + 1);
        for run in &self.runs {
            let file = run.file.reopen()?;
            cursors.push(Cursor::Run(RunCursor {
                reader: BufReader::with_capacity(READ_AHEAD * T::SIZE, file),
                remaining: run.records,
                path: run.file.path().display().to_string(),
            }));
        }
        cursors.push(Cursor::Memory(self.tail.iter()));
        Merge::new(cursors)
    }

    /// Drop all records and runs so the instance can be reused.
    pub fn clear(&mut self) -> MorassResult<()> {
        self.join_pending()?;
        for run in self.runs.drain(..) {
            run.file.close()?;
        }
        self.chunk.clear();
        self.tail.clear();
        self.len = 0;
        self.finalised = false;
        Ok(())
    }

    /// Remove every temporary file owned by this instance.
    pub fn clean_up(mut self) -> MorassResult<()> {
        self.clear()
    }
}

impl<T: Record> Drop for Morass<T> {
    fn drop(&mut self) {
        // A finished background flush hands back a run whose file is
        // removed when it is dropped here.
        if let Some(handle) = self.pending.take() {
            let _ = handle.join();
        }
    }
}

fn write_run<T: Record>(mut chunk: Vec<T>, temp_dir: &Path, prefix: &str) -> MorassResult<Run> {
    chunk.sort_by(|a, b| a.key().cmp(&b.key()));
    let mut file = tempfile::Builder::new()
        .prefix(prefix)
        .suffix(".morass")
        .tempfile_in(temp_dir)?;
    {
        let mut writer = BufWriter::new(file.as_file_mut());
        for record in &chunk {
            record.write(&mut writer)?;
        }
        writer.flush()?;
    }
    log::trace!("Wrote run {} ({} records)", file.path().display(), chunk.len());
    Ok(Run {
        file,
        records: chunk.len(),
    })
}

struct RunCursor {
    reader: BufReader<File>,
    remaining: usize,
    path: String,
}

impl RunCursor {
    fn next<T: Record>(&mut self) -> Option<MorassResult<T>> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        Some(T::read(&mut self.reader).map_err(|e| MorassError::Corrupt {
            path: self.path.clone(),
            message: e.to_string(),
        }))
    }
}

enum Cursor<'a, T> {
    Run(RunCursor),
    Memory(std::slice::Iter<'a, T>),
}

impl<'a, T: Record> Cursor<'a, T> {
    fn next(&mut self) -> Option<MorassResult<T>> {
        match self {
            Cursor::Run(run) => run.next(),
            Cursor::Memory(iter) => iter.next().cloned().map(Ok),
        }
    }
}

/// One k-way merge pass. Equal keys come out in run order, so replay is
/// deterministic for a given push sequence and chunk size.
pub struct Merge<'a, T: Record> {
    cursors: Vec<Cursor<'a, T>>,
    heads: Vec<Option<T>>,
    heap: BinaryHeap<Reverse<(T::Key, usize)>>,
    failed: bool,
}

impl<'a, T: Record> Merge<'a, T> {
    fn new(mut cursors: Vec<Cursor<'a, T>>) -> MorassResult<Self> {
        let mut heads = Vec::with_capacity(cursors.len());
        let mut heap = BinaryHeap::with_capacity(cursors.len());
        for (i, cursor) in cursors.iter_mut().enumerate() {
            match cursor.next().transpose()? {
                Some(record) => {
                    heap.push(Reverse((record.key(), i)));
                    heads.push(Some(record));
                }
                None => heads.push(None),
            }
        }
        Ok(Self {
            cursors,
            heads,
            heap,
            failed: false,
        })
    }
}

impl<'a, T: Record> Iterator for Merge<'a, T> {
    type Item = MorassResult<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let Reverse((_, i)) = self.heap.pop()?;
        let record = self.heads[i].take()?;
        match self.cursors[i].next() {
            Some(Ok(next)) => {
                self.heap.push(Reverse((next.key(), i)));
                self.heads[i] = Some(next);
            }
            Some(Err(e)) => {
                self.failed = true;
                return Some(Err(e));
            }
            None => {}
        }
        Some(Ok(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
    use std::fs::OpenOptions;
    use tempfile::TempDir;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Item {
        key: u32,
        tag: u32,
    }

    impl Record for Item {
        const SIZE: usize = 8;
        type Key = u32;

        fn key(&self) -> u32 {
            self.key
        }

        fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
            writer.write_u32::<LittleEndian>(self.key)?;
            writer.write_u32::<LittleEndian>(self.tag)
        }

        fn read<R: Read>(reader: &mut R) -> io::Result<Self> {
            Ok(Item {
                key: reader.read_u32::<LittleEndian>()?,
                tag: reader.read_u32::<LittleEndian>()?,
            })
        }
    }

    fn config(dir: &TempDir, chunk_size: usize, concurrent: bool) -> MorassConfig {
        MorassConfig {
            temp_dir: dir.path().to_path_buf(),
            prefix: "morass_test_".to_string(),
            chunk_size,
            concurrent,
        }
    }

    fn files_in(dir: &TempDir) -> usize {
        std::fs::read_dir(dir.path()).unwrap().count()
    }

    #[test]
    fn test_spill_and_merge() -> MorassResult<()> {
        let dir = TempDir::new()?;
        let mut morass = Morass::new(config(&dir, 3, false))?;
        for (tag, key) in [9u32, 2, 7, 2, 5, 1, 8, 3].into_iter().enumerate() {
            morass.push(Item { key, tag: tag as u32 })?;
        }
        assert_eq!(morass.runs(), 2);
        assert_eq!(files_in(&dir), 2);

        let keys: Vec<u32> = morass.iter()?.map(|r| r.map(|i| i.key)).collect::<MorassResult<_>>()?;
        assert_eq!(keys, vec![1, 2, 2, 3, 5, 7, 8, 9]);

        morass.clean_up()?;
        assert_eq!(files_in(&dir), 0);
        Ok(())
    }

    #[test]
    fn test_rewind_repeats_merge() -> MorassResult<()> {
        let dir = TempDir::new()?;
        let mut morass = Morass::new(config(&dir, 4, true))?;
        for key in (0..20u32).rev() {
            morass.push(Item { key, tag: key * 2 })?;
        }
        let first: Vec<Item> = morass.iter()?.collect::<MorassResult<_>>()?;
        let second: Vec<Item> = morass.iter()?.collect::<MorassResult<_>>()?;
        assert_eq!(first, second);
        assert_eq!(first.len(), 20);
        Ok(())
    }

    #[test]
    fn test_push_after_finalise_fails() -> MorassResult<()> {
        let dir = TempDir::new()?;
        let mut morass = Morass::new(config(&dir, 4, false))?;
        morass.push(Item { key: 1, tag: 0 })?;
        morass.finalise()?;
        assert!(matches!(morass.push(Item { key: 2, tag: 0 }), Err(MorassError::Finalised)));
        morass.clear()?;
        morass.push(Item { key: 2, tag: 0 })?;
        assert_eq!(morass.len(), 1);
        Ok(())
    }

    #[test]
    fn test_drop_removes_files() -> MorassResult<()> {
        let dir = TempDir::new()?;
        {
            let mut morass = Morass::new(config(&dir, 2, true))?;
            for key in 0..9u32 {
                morass.push(Item { key, tag: 0 })?;
            }
        }
        assert_eq!(files_in(&dir), 0);
        Ok(())
    }

    #[test]
    fn test_truncated_run_is_corrupt() -> MorassResult<()> {
        let dir = TempDir::new()?;
        let mut morass = Morass::new(config(&dir, 4, false))?;
        for key in 0..4u32 {
            morass.push(Item { key, tag: 0 })?;
        }
        let path = std::fs::read_dir(dir.path())?.next().unwrap()?.path();
        OpenOptions::new().write(true).open(&path)?.set_len(10)?;

        let results: Vec<MorassResult<Item>> = morass.iter()?.collect();
        assert!(results.iter().any(|r| matches!(r, Err(MorassError::Corrupt { .. }))));
        Ok(())
    }

    fn spill_into_removed_dir(concurrent: bool) -> MorassResult<()> {
        let dir = TempDir::new()?;
        let spill = dir.path().join("spill");
        std::fs::create_dir(&spill)?;
        let mut cfg = config(&dir, 4, concurrent);
        cfg.temp_dir = spill.clone();
        let mut morass = Morass::new(cfg)?;
        std::fs::remove_dir(&spill)?;

        let mut failure = None;
        for key in 0..12u32 {
            if let Err(e) = morass.push(Item { key, tag: 0 }) {
                failure = Some(e);
                break;
            }
        }
        let failure = match failure {
            Some(e) => e,
            None => morass.finalise().unwrap_err(),
        };
        assert!(matches!(failure, MorassError::Io(_)), "{:?}", failure);

        drop(morass);
        assert!(!spill.exists());
        assert_eq!(files_in(&dir), 0);
        Ok(())
    }

    #[test]
    fn test_failed_flush_is_an_error() -> MorassResult<()> {
        spill_into_removed_dir(false)
    }

    #[test]
    fn test_failed_background_flush_is_an_error() -> MorassResult<()> {
        spill_into_removed_dir(true)
    }

    #[test]
    fn test_invalid_config() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            Morass::<Item>::new(config(&dir, 0, false)),
            Err(MorassError::Config(_))
        ));
        let mut missing = config(&dir, 4, false);
        missing.temp_dir = dir.path().join("does-not-exist");
        assert!(Morass::<Item>::new(missing).is_err());
    }
}
