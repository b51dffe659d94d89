#![allow(dead_code)]

use std::io::Write;
use std::path::{Path, PathBuf};

use pals_core::{AlignerConfig, MorassConfig};
use rand::{rngs::StdRng, Rng, SeedableRng};

pub fn random_seq(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| b"ACGT"[rng.gen_range(0..4)]).collect()
}

/// Any residue other than `b`.
pub fn differ(b: u8) -> u8 {
    if b == b'A' {
        b'C'
    } else {
        b'A'
    }
}

pub fn write_fasta(dir: &Path, file: &str, records: &[(&str, &[u8])]) -> PathBuf {
    let path = dir.join(file);
    let mut out = std::fs::File::create(&path).unwrap();
    for (name, seq) in records {
        writeln!(out, ">{} synthetic", name).unwrap();
        for line in seq.chunks(60) {
            out.write_all(line).unwrap();
            writeln!(out).unwrap();
        }
    }
    path
}

pub fn config(temp_dir: &Path) -> AlignerConfig {
    AlignerConfig {
        filter_len: 50,
        filter_id: 0.9,
        dp_len: 100,
        dp_id: 0.9,
        morass: MorassConfig {
            temp_dir: temp_dir.to_path_buf(),
            chunk_size: 256,
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn dir_is_empty(dir: &Path) -> bool {
    std::fs::read_dir(dir).unwrap().next().is_none()
}
