mod common;

use common::dir_is_empty;
use pals_core::{Morass, MorassConfig, SeedHit};
use proptest::prelude::*;

fn morass(dir: &std::path::Path, chunk_size: usize, concurrent: bool) -> Morass<SeedHit> {
    Morass::new(MorassConfig {
        temp_dir: dir.to_path_buf(),
        prefix: "roundtrip_".to_string(),
        chunk_size,
        concurrent,
    })
    .unwrap()
}

fn seed_strategy() -> impl Strategy<Value = SeedHit> {
    (0u32..5000, 0u32..5000, 4u32..33).prop_map(|(q, t, k)| SeedHit::new(q, t, k))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn replay_is_sorted_permutation(
        seeds in prop::collection::vec(seed_strategy(), 0..600),
        chunk_size in 1usize..200,
        concurrent in any::<bool>(),
    ) {
        let dir = tempfile::tempdir().unwrap();
        let mut m = morass(dir.path(), chunk_size, concurrent);
        for s in &seeds {
            m.push(*s).unwrap();
        }
        prop_assert_eq!(m.len(), seeds.len());

        let replayed: Vec<SeedHit> = m.iter().unwrap().collect::<Result<_, _>>().unwrap();
        prop_assert!(replayed.windows(2).all(|w| (w[0].diagonal, w[0].query_pos) <= (w[1].diagonal, w[1].query_pos)));

        let mut expected = seeds.clone();
        expected.sort_by_key(|s| (s.diagonal, s.query_pos, s.target_pos, s.len));
        let mut got = replayed.clone();
        got.sort_by_key(|s| (s.diagonal, s.query_pos, s.target_pos, s.len));
        prop_assert_eq!(got, expected);

        // A second pass replays the same stream.
        let again: Vec<SeedHit> = m.iter().unwrap().collect::<Result<_, _>>().unwrap();
        prop_assert_eq!(again, replayed);

        m.clean_up().unwrap();
        prop_assert!(dir_is_empty(dir.path()));
    }
}

#[test]
fn cleared_morass_is_reusable() {
    let dir = tempfile::tempdir().unwrap();
    let mut m = morass(dir.path(), 10, true);
    for q in (0..100u32).rev() {
        m.push(SeedHit::new(q, q + 7, 8)).unwrap();
    }
    assert!(m.runs() > 0);
    m.clear().unwrap();
    assert!(m.is_empty());
    assert!(dir_is_empty(dir.path()));

    m.push(SeedHit::new(3, 1, 8)).unwrap();
    let replayed: Vec<SeedHit> = m.iter().unwrap().collect::<Result<_, _>>().unwrap();
    assert_eq!(replayed, vec![SeedHit::new(3, 1, 8)]);
}
