//! Bitonic sorter against random and adversarial key sets.
//!
//! Checks that the output is ascending and is a permutation of the input,
//! for lengths that stay inside one block and lengths that need the
//! transpose passes.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sph_kernel::{BitonicSorter, SortEntry, SortPass, SENTINEL_KEY};

fn random_entries(len: usize, key_range: u32, seed: u64) -> Vec<SortEntry> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len as u32)
        .map(|value| SortEntry {
            key: rng.gen_range(0..key_range),
            value,
        })
        .collect()
}

fn assert_sorted_permutation(input: &[SortEntry], output: &[SortEntry]) {
    assert!(
        output.windows(2).all(|w| w[0].key <= w[1].key),
        "output not ascending"
    );
    let mut a = input.to_vec();
    let mut b = output.to_vec();
    a.sort_by_key(|e| (e.key, e.value));
    b.sort_by_key(|e| (e.key, e.value));
    assert_eq!(a, b, "output is not a permutation of the input");
}

#[test]
fn sorts_within_one_block() {
    for len in [1, 2, 4, 64, 256, 512] {
        let input = random_entries(len, 1 << 18, len as u64);
        let mut data = input.clone();
        BitonicSorter::new(len).unwrap().sort(&mut data);
        assert_sorted_permutation(&input, &data);
    }
}

#[test]
fn sorts_across_blocks() {
    for len in [1024, 4096, 32768] {
        let input = random_entries(len, 1 << 18, 7 + len as u64);
        let mut data = input.clone();
        let mut sorter = BitonicSorter::new(len).unwrap();
        assert!(sorter
            .passes()
            .iter()
            .any(|p| matches!(p, SortPass::Transpose { .. })));
        sorter.sort(&mut data);
        assert_sorted_permutation(&input, &data);
    }
}

#[test]
fn small_blocks_exercise_many_transposes() {
    let input = random_entries(1024, 1000, 99);
    let mut data = input.clone();
    BitonicSorter::with_block_size(1024, 32)
        .unwrap()
        .sort(&mut data);
    assert_sorted_permutation(&input, &data);
}

#[test]
fn heavy_duplicates() {
    let input = random_entries(2048, 4, 3);
    let mut data = input.clone();
    BitonicSorter::new(2048).unwrap().sort(&mut data);
    assert_sorted_permutation(&input, &data);
}

#[test]
fn already_sorted_and_reversed() {
    let ascending: Vec<SortEntry> = (0..4096u32)
        .map(|i| SortEntry { key: i, value: i })
        .collect();
    let mut data = ascending.clone();
    BitonicSorter::new(4096).unwrap().sort(&mut data);
    assert_eq!(data, ascending);

    let reversed: Vec<SortEntry> = ascending.iter().rev().copied().collect();
    let mut data = reversed.clone();
    BitonicSorter::new(4096).unwrap().sort(&mut data);
    assert_eq!(data, ascending);
}

#[test]
fn sentinels_end_up_at_the_tail() {
    let mut input = random_entries(1000, 512, 11);
    input.extend((1000..1024u32).map(|value| SortEntry {
        key: SENTINEL_KEY,
        value,
    }));
    let mut data = input.clone();
    BitonicSorter::new(1024).unwrap().sort(&mut data);
    assert_sorted_permutation(&input, &data);
    assert!(data[1000..].iter().all(|e| e.key == SENTINEL_KEY));
    assert!(data[..1000].iter().all(|e| e.key != SENTINEL_KEY));
}

#[test]
fn sorter_is_reusable() {
    let mut sorter = BitonicSorter::new(2048).unwrap();
    for seed in 0..4 {
        let input = random_entries(2048, 1 << 12, seed);
        let mut data = input.clone();
        sorter.sort(&mut data);
        assert_sorted_permutation(&input, &data);
    }
}
