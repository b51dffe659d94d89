mod common;

use common::{config, dir_is_empty, random_seq};
use pals_core::writer::{HitWriter, Pair, WriteError, WriteResult};
use pals_core::{run, AlignError, Alphabet, Encoding, GffWriter, PackedSequence, Packer};

/// Fails on the first record.
struct FullDisk;

impl HitWriter for FullDisk {
    fn write(&mut self, _pair: &Pair) -> WriteResult<usize> {
        Err(WriteError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "no space left on device",
        )))
    }

    fn finish(&mut self) -> WriteResult<()> {
        Ok(())
    }
}

fn inputs() -> (PackedSequence, PackedSequence) {
    let a = random_seq(3000, 7);
    let mut b = random_seq(3000, 8);
    b[1000..1400].copy_from_slice(&a[2000..2400]);
    let pack = |name: &str, seq: &[u8]| {
        let mut packer = Packer::new(name, Alphabet::Dna, Encoding::Byte);
        packer.pack(name, seq).unwrap();
        packer.finalise()
    };
    (pack("a", &a), pack("b", &b))
}

#[test]
fn spilled_runs_removed_after_success() {
    let scratch = tempfile::tempdir().unwrap();
    let (target, query) = inputs();
    for threads in [1, 2] {
        let mut config = config(scratch.path());
        config.threads = threads;
        config.morass.concurrent = threads > 1;
        let mut buf = Vec::new();
        let summary = run(&config, &target, &query, &mut GffWriter::new(&mut buf)).unwrap();
        assert!(summary.forward.unwrap().seeds > config.morass.chunk_size);
        assert!(dir_is_empty(scratch.path()));
    }
}

#[test]
fn spilled_runs_removed_after_writer_failure() {
    let scratch = tempfile::tempdir().unwrap();
    let (target, query) = inputs();
    for threads in [1, 2] {
        let mut config = config(scratch.path());
        config.threads = threads;
        let result = run(&config, &target, &query, &mut FullDisk);
        assert!(matches!(result, Err(AlignError::Write(WriteError::Io(_)))));
        assert!(dir_is_empty(scratch.path()));
    }
}

#[test]
fn spilled_runs_removed_after_dump_failure() {
    let scratch = tempfile::tempdir().unwrap();
    let (target, query) = inputs();
    let mut config = config(scratch.path());
    config.traps = Some(scratch.path().join("missing").join("out"));
    let mut buf = Vec::new();
    let result = run(&config, &target, &query, &mut GffWriter::new(&mut buf));
    assert!(result.is_err());
    assert!(dir_is_empty(scratch.path()));
}

#[test]
fn memory_ceiling_failure_leaves_nothing_behind() {
    let scratch = tempfile::tempdir().unwrap();
    let (target, query) = inputs();
    let mut config = config(scratch.path());
    config.max_memory = Some(1);
    let mut buf = Vec::new();
    let result = run(&config, &target, &query, &mut GffWriter::new(&mut buf));
    assert!(matches!(result, Err(AlignError::Memory { .. })));
    assert!(dir_is_empty(scratch.path()));
}
