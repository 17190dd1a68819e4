//! Bitonic sort throughput on the CPU, compared with `sort_unstable_by_key`.
//!
//! Run with: cargo bench -p sph-kernel --bench sort_throughput

use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sph_kernel::{BitonicSorter, SortEntry};

fn random_entries(len: usize, rng: &mut StdRng) -> Vec<SortEntry> {
    (0..len as u32)
        .map(|value| SortEntry {
            key: rng.gen_range(0..1 << 18),
            value,
        })
        .collect()
}

fn main() {
    println!("=== Bitonic sort throughput ===\n");
    println!(
        "{:>10} {:>8} {:>14} {:>14} {:>10}",
        "Entries", "Passes", "bitonic (us)", "std (us)", "ratio"
    );

    let mut rng = StdRng::seed_from_u64(42);
    let repeats = 20;

    for shift in [10, 12, 14, 16, 18] {
        let len = 1usize << shift;
        let input = random_entries(len, &mut rng);
        let mut sorter = BitonicSorter::new(len).expect("sorter");

        let mut bitonic_us = 0u128;
        for _ in 0..repeats {
            let mut data = input.clone();
            let start = Instant::now();
            sorter.sort(&mut data);
            bitonic_us += start.elapsed().as_micros();
        }

        let mut std_us = 0u128;
        for _ in 0..repeats {
            let mut data = input.clone();
            let start = Instant::now();
            data.sort_unstable_by_key(|e| e.key);
            std_us += start.elapsed().as_micros();
        }

        let b = bitonic_us as f64 / repeats as f64;
        let s = std_us as f64 / repeats as f64;
        println!(
            "{:>10} {:>8} {:>14.1} {:>14.1} {:>10.2}",
            len,
            sorter.passes().len(),
            b,
            s,
            b / s.max(1.0)
        );
    }
}
