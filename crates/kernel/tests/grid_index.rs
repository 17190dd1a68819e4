//! Hash, sort and grid index stages run by hand over random particles.
//!
//! Verifies that every particle is reachable through its own cell's range
//! and that the 27-cell neighbourhood finds every pair closer than `h`.

use glam::Vec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sph_kernel::hash::{hash_particles, SpatialHasher};
use sph_kernel::{
    BitonicSorter, FluidParams, GridIndexTable, GridSettings, KeyScheme, Particle, SimParams,
    SimulationDomain, SortEntry,
};

struct Indexed {
    hasher: SpatialHasher,
    entries: Vec<SortEntry>,
    table: GridIndexTable,
    params: SimParams,
}

fn random_particles(n: usize, domain: &SimulationDomain, seed: u64) -> Vec<Particle> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            let p = Vec3::new(
                rng.gen_range(domain.min.x..domain.max.x),
                rng.gen_range(domain.min.y..domain.max.y),
                rng.gen_range(domain.min.z..domain.max.z),
            );
            Particle::at_rest(p)
        })
        .collect()
}

fn index(particles: &[Particle], domain: &SimulationDomain, grid: &GridSettings) -> Indexed {
    let fluid = FluidParams::default();
    let params = SimParams::new(&fluid, domain, 0.004);
    let hasher = SpatialHasher::new(&params, grid);
    let len = particles.len().next_power_of_two();

    let mut entries = vec![SortEntry::default(); len];
    hash_particles(&hasher, particles, &mut entries);
    BitonicSorter::new(len).unwrap().sort(&mut entries);
    let mut table = GridIndexTable::new(grid.key_count()).unwrap();
    table.rebuild(&entries);

    Indexed {
        hasher,
        entries,
        table,
        params,
    }
}

fn small_domain() -> SimulationDomain {
    SimulationDomain::new(Vec3::ZERO, Vec3::new(20.0, 15.0, 10.0))
}

#[test]
fn every_particle_is_in_its_cell_range() {
    for scheme in [KeyScheme::Linear, KeyScheme::Morton] {
        let grid = GridSettings {
            key_scheme: scheme,
            ..Default::default()
        };
        let domain = small_domain();
        let particles = random_particles(1000, &domain, 1);
        let ix = index(&particles, &domain, &grid);

        for (i, p) in particles.iter().enumerate() {
            let key = ix.hasher.key_of(p.position);
            let range = ix.table.range(key);
            assert!(
                range.positions().any(|s| ix.entries[s].value == i as u32),
                "particle {i} missing from its cell ({scheme:?})"
            );
            assert!(range.positions().all(|s| ix.entries[s].key == key));
        }
    }
}

#[test]
fn ranges_partition_the_particles() {
    let domain = small_domain();
    let grid = GridSettings::default();
    let particles = random_particles(700, &domain, 2);
    let ix = index(&particles, &domain, &grid);

    let mut covered: Vec<_> = ix
        .table
        .to_vec()
        .into_iter()
        .filter(|r| !r.is_empty())
        .collect();
    covered.sort_by_key(|r| r.start);
    let mut next = 0;
    for r in &covered {
        assert_eq!(r.start, next, "gap or overlap in cell ranges");
        next = r.end;
    }
    assert_eq!(next as usize, particles.len());
}

#[test]
fn neighbourhood_finds_all_close_pairs() {
    let domain = small_domain();
    let grid = GridSettings::default();
    let particles = random_particles(512, &domain, 3);
    let ix = index(&particles, &domain, &grid);
    let scale = ix.params.sim_scale;

    for (i, pi) in particles.iter().enumerate() {
        let mut found = vec![false; particles.len()];
        for key in ix.hasher.neighbor_keys(pi.position) {
            for s in ix.table.range(key).positions() {
                found[ix.entries[s].value as usize] = true;
            }
        }
        for (j, pj) in particles.iter().enumerate() {
            let r2 = ((pi.position - pj.position) * scale).length_squared();
            if r2 < ix.params.h2 {
                assert!(found[j], "pair ({i}, {j}) within h not visited");
            }
        }
    }
}

#[test]
fn particles_outside_the_domain_clamp_to_edge_cells() {
    let domain = small_domain();
    let grid = GridSettings::default();
    let mut particles = random_particles(6, &domain, 4);
    particles.push(Particle::at_rest(Vec3::new(-5.0, 7.0, 5.0)));
    particles.push(Particle::at_rest(Vec3::new(1000.0, 7.0, 5.0)));
    let ix = index(&particles, &domain, &grid);

    for i in [6u32, 7] {
        let key = ix.hasher.key_of(particles[i as usize].position);
        assert!((key as usize) < grid.key_count());
        assert!(ix
            .table
            .range(key)
            .positions()
            .any(|s| ix.entries[s].value == i));
    }
}
