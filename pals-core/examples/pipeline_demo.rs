//! PALS pipeline demo
//!
//! Plants a diverged repeat in a random sequence and walks it through each
//! stage: index, seeds, trapezoids and extended hits.

use pals_core::seed::{Comparison, Seeder};
use pals_core::{
    merge_trapezoids, Alphabet, BandedAligner, DpParams, Encoding, Filter, FilterParams, KmerIndex,
    Packer, Strand,
};
use rand::{rngs::StdRng, Rng, SeedableRng};

fn main() {
    println!("PALS Pipeline Demo");
    println!("==================\n");

    let mut rng = StdRng::seed_from_u64(2024);
    let mut sequence: Vec<u8> = (0..20_000).map(|_| b"ACGT"[rng.gen_range(0..4)]).collect();
    let unit: Vec<u8> = sequence[2_000..3_000].to_vec();
    for (i, &b) in unit.iter().enumerate() {
        sequence[12_000 + i] = if rng.gen_bool(0.02) { b"ACGT"[rng.gen_range(0..4)] } else { b };
    }

    let mut packer = Packer::new("demo", Alphabet::Dna, Encoding::TwoBit);
    if let Err(e) = packer.pack("chrDemo", &sequence) {
        eprintln!("❌ {}", e);
        return;
    }
    let genome = packer.finalise();
    let view = genome.view(Strand::Forward);
    println!("Packed {} residues ({} bytes)", genome.len(), genome.memory_bytes());

    let params = FilterParams {
        word_size: 10,
        min_hit_len: 300,
        min_id: 0.9,
        max_error: 30,
        tube_offset: 30,
    };

    let index = match KmerIndex::new(params.word_size, &view) {
        Ok(index) => index,
        Err(e) => {
            eprintln!("❌ {}", e);
            return;
        }
    };
    println!("🧬 Index: {} positions, average list {:.2}", index.len(), index.avg_list_len());

    let seeds = Seeder::new(&index, Comparison::SelfForward).collect(&view);
    println!("🌱 Seeds: {}", seeds.len());

    let traps = match Filter::new(params, view.len()).and_then(|f| f.run_unsorted(&seeds)) {
        Ok(traps) => merge_trapezoids(traps),
        Err(e) => {
            eprintln!("❌ {}", e);
            return;
        }
    };
    println!("📐 Trapezoids: {}", traps.len());
    for t in traps.iter().take(5) {
        println!("   diagonals {}..={} offsets {}..{}", t.diag_lo, t.diag_hi, t.q_lo, t.q_hi);
    }

    let dp = DpParams {
        min_hit_len: params.min_hit_len,
        min_id: params.min_id,
    };
    let extender = match BandedAligner::new(dp, params.max_error) {
        Ok(extender) => extender.with_min_diagonal(Some(1)),
        Err(e) => {
            eprintln!("❌ {}", e);
            return;
        }
    };
    let hits = extender.align_all(&view, &view, &traps);
    println!("🎯 Hits: {}", hits.len());
    for hit in &hits {
        println!(
            "   {}..{} ~ {}..{} identity {:.3} score {}",
            hit.query_start, hit.query_end, hit.target_start, hit.target_end, hit.identity, hit.score
        );
    }
}
