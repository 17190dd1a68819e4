//! Initial particle placement.
//!
//! Grid fill lays particles on a cubic lattice inside the init box, starting
//! one spacing in from its minimum corner and filling the bottom layer first.
//! The lattice spacing is `0.95 * cbrt(mass / rest_density) / scale`; when the
//! box cannot hold the requested count at that spacing, the spacing shrinks
//! until it can. Sphere seeding draws uniformly inside a ball from a seeded
//! RNG, so two runs with the same seed start identically.

use glam::Vec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sph_kernel::{FluidParams, Particle, SimulationDomain};

use crate::config::{ScenarioConfig, Seeding};

/// Fraction of the rest spacing used for the initial lattice.
pub const FILL_SPACING_FACTOR: f32 = 0.95;

const SHRINK_STEP: f32 = 0.99;
const MAX_SHRINK_STEPS: usize = 2000;

/// Particles for `config`'s seeding strategy.
pub fn seed_particles(config: &ScenarioConfig) -> Result<Vec<Particle>, String> {
    match config.seeding {
        Seeding::GridFill => grid_fill(config.particle_count, &config.init_box, &config.fluid),
        Seeding::Sphere {
            center,
            radius,
            seed,
        } => Ok(sphere(config.particle_count, center, radius, seed)),
    }
}

/// Lattice points along one axis of length `extent` at `spacing`, starting
/// one spacing in and stopping at least one spacing short of the far side.
fn slots(extent: f32, spacing: f32) -> usize {
    (extent / spacing - 1.0).floor().max(0.0) as usize
}

fn capacity(extent: Vec3, spacing: f32) -> usize {
    slots(extent.x, spacing)
        .saturating_mul(slots(extent.y, spacing))
        .saturating_mul(slots(extent.z, spacing))
}

/// Lattice spacing that fits `count` particles into `extent`.
pub fn fill_spacing(count: usize, extent: Vec3, fluid: &FluidParams) -> Result<f32, String> {
    let nominal = FILL_SPACING_FACTOR * fluid.rest_spacing();
    let mut spacing = nominal;
    for _ in 0..MAX_SHRINK_STEPS {
        if capacity(extent, spacing) >= count {
            if spacing < nominal {
                tracing::warn!(
                    count,
                    nominal,
                    spacing,
                    "init box too small for the rest spacing, packing particles closer"
                );
            }
            return Ok(spacing);
        }
        spacing *= SHRINK_STEP;
    }
    Err(format!(
        "Init box {:?} cannot hold {} particles",
        extent, count
    ))
}

/// `count` particles on a lattice inside `init_box`, lowest layer first.
pub fn grid_fill(
    count: usize,
    init_box: &SimulationDomain,
    fluid: &FluidParams,
) -> Result<Vec<Particle>, String> {
    let extent = init_box.extent();
    let d = fill_spacing(count, extent, fluid)?;
    let (nx, ny, nz) = (slots(extent.x, d), slots(extent.y, d), slots(extent.z, d));

    let mut particles = Vec::with_capacity(count);
    'fill: for y in 0..ny {
        for z in 0..nz {
            for x in 0..nx {
                if particles.len() == count {
                    break 'fill;
                }
                let offset = Vec3::new((x + 1) as f32, (y + 1) as f32, (z + 1) as f32) * d;
                particles.push(Particle::at_rest(init_box.min + offset));
            }
        }
    }

    tracing::debug!(count, spacing = d, "grid fill seeded");
    Ok(particles)
}

/// `count` particles uniformly distributed inside a ball.
pub fn sphere(count: usize, center: Vec3, radius: f32, seed: u64) -> Vec<Particle> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut particles = Vec::with_capacity(count);
    while particles.len() < count {
        let v = Vec3::new(
            rng.gen_range(-1.0..=1.0),
            rng.gen_range(-1.0..=1.0),
            rng.gen_range(-1.0..=1.0),
        );
        if v.length_squared() <= 1.0 {
            particles.push(Particle::at_rest(center + v * radius));
        }
    }
    particles
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_box(side: f32) -> SimulationDomain {
        SimulationDomain::new(Vec3::ZERO, Vec3::splat(side))
    }

    #[test]
    fn grid_fill_uses_rest_spacing_when_it_fits() {
        let fluid = FluidParams::default();
        let init = SimulationDomain::new(Vec3::new(0.0, 0.0, -10.0), Vec3::new(10.0, 20.0, 10.0));
        let particles = grid_fill(256, &init, &fluid).unwrap();
        assert_eq!(particles.len(), 256);

        let d = FILL_SPACING_FACTOR * fluid.rest_spacing();
        let first = particles[0].position;
        assert!((first - (init.min + Vec3::splat(d))).length() < 1e-4);
        let second = particles[1].position;
        assert!(((second.x - first.x) - d).abs() < 1e-4);
    }

    #[test]
    fn grid_fill_shrinks_to_fit() {
        let fluid = FluidParams::default();
        let init = unit_box(10.0);
        let particles = grid_fill(1024, &init, &fluid).unwrap();
        assert_eq!(particles.len(), 1024);
        assert!(particles.iter().all(|p| init.contains(p.position, 0.0)));

        // No two particles coincide.
        let d = (particles[1].position - particles[0].position).length();
        assert!(d > 0.5 && d < FILL_SPACING_FACTOR * fluid.rest_spacing());
    }

    #[test]
    fn grid_fill_fills_bottom_layer_first() {
        let fluid = FluidParams::default();
        let particles = grid_fill(10, &unit_box(20.0), &fluid).unwrap();
        let y0 = particles[0].position.y;
        assert!(particles.iter().all(|p| (p.position.y - y0).abs() < 1e-5));
    }

    #[test]
    fn grid_fill_rejects_degenerate_box() {
        let fluid = FluidParams::default();
        let flat = SimulationDomain::new(Vec3::ZERO, Vec3::new(10.0, 0.0, 10.0));
        assert!(grid_fill(8, &flat, &fluid).is_err());
    }

    #[test]
    fn sphere_is_seeded_and_bounded() {
        let center = Vec3::new(10.0, 25.0, 0.0);
        let a = sphere(500, center, 5.0, 42);
        let b = sphere(500, center, 5.0, 42);
        let c = sphere(500, center, 5.0, 43);
        assert_eq!(a.len(), 500);
        assert!(a.iter().all(|p| (p.position - center).length() <= 5.0 + 1e-4));
        assert!(a.iter().zip(&b).all(|(p, q)| p.position == q.position));
        assert!(a.iter().zip(&c).any(|(p, q)| p.position != q.position));
    }
}
