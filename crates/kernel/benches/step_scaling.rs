//! CPU tick time versus particle count, with the per-stage breakdown.
//!
//! Run with: cargo bench -p sph-kernel --bench step_scaling

use std::time::Instant;

use glam::Vec3;
use sph_kernel::{
    CpuKernel, FluidParams, GridSettings, Particle, SimulationDomain, SimulationKernel,
    StepTimings,
};

/// `count` particles on a cubic lattice at 0.95 x rest spacing, and a domain
/// with a few cells of room on every side.
fn fluid_cube(count: usize, fluid: &FluidParams) -> (Vec<Particle>, SimulationDomain) {
    let spacing = 0.95 * fluid.rest_spacing();
    let per_axis = (count as f32).cbrt().ceil() as usize;
    let margin = 4.0 * fluid.cell_size();
    let side = per_axis as f32 * spacing + 2.0 * margin;

    let mut particles = Vec::with_capacity(count);
    'fill: for z in 0..per_axis {
        for y in 0..per_axis {
            for x in 0..per_axis {
                if particles.len() == count {
                    break 'fill;
                }
                let p = Vec3::splat(margin) + Vec3::new(x as f32, y as f32, z as f32) * spacing;
                particles.push(Particle::at_rest(p));
            }
        }
    }
    (particles, SimulationDomain::new(Vec3::ZERO, Vec3::splat(side)))
}

fn main() {
    println!("=== CPU step scaling ===\n");
    println!(
        "{:>9} {:>7} {:>9} {:>8} {:>8} {:>8} {:>9} {:>8} {:>8} {:>9}",
        "Particles", "Steps", "ms/step", "hash", "sort", "index", "rearrange", "density", "force",
        "integrate"
    );

    let fluid = FluidParams::default();
    for &(n, steps) in &[(1_024, 200), (4_096, 100), (16_384, 40), (65_536, 10)] {
        let (particles, domain) = fluid_cube(n, &fluid);
        let mut kernel = CpuKernel::new(particles, fluid.clone(), domain, GridSettings::default())
            .expect("kernel");

        // Warm up once so allocation and page faults are excluded.
        kernel.step(0.0).expect("step");

        let mut sum = StepTimings::default();
        let start = Instant::now();
        for _ in 0..steps {
            kernel.step(0.0).expect("step");
            let t = kernel.last_timings();
            sum.hash_us += t.hash_us;
            sum.sort_us += t.sort_us;
            sum.index_us += t.index_us;
            sum.rearrange_us += t.rearrange_us;
            sum.density_us += t.density_us;
            sum.force_us += t.force_us;
            sum.integrate_us += t.integrate_us;
        }
        let ms = start.elapsed().as_secs_f64() * 1000.0 / steps as f64;
        let avg = |us: u64| us as f64 / steps as f64 / 1000.0;
        println!(
            "{:>9} {:>7} {:>9.3} {:>8.3} {:>8.3} {:>8.3} {:>9.3} {:>8.3} {:>8.3} {:>9.3}",
            n,
            steps,
            ms,
            avg(sum.hash_us),
            avg(sum.sort_us),
            avg(sum.index_us),
            avg(sum.rearrange_us),
            avg(sum.density_us),
            avg(sum.force_us),
            avg(sum.integrate_us),
        );
    }
}
