//! Poly6 normalisation and the density of isolated particles.

use glam::Vec3;
use sph_kernel::sph::{poly6, poly6_coef};
use sph_kernel::{
    CpuKernel, FluidParams, GridSettings, Particle, SimulationDomain, SimulationKernel,
};

fn quiet_fluid() -> FluidParams {
    FluidParams {
        gravity: Vec3::ZERO,
        ..Default::default()
    }
}

fn open_domain() -> SimulationDomain {
    SimulationDomain::new(Vec3::ZERO, Vec3::splat(50.0))
}

#[test]
fn poly6_integrates_to_one() {
    let h = 0.01_f32;
    let steps = 40;
    let dx = 2.0 * h / steps as f32;
    let dv = (dx * dx * dx) as f64;

    let mut sum = 0.0_f64;
    for i in 0..=steps {
        for j in 0..=steps {
            for k in 0..=steps {
                let r = Vec3::new(i as f32, j as f32, k as f32) * dx - Vec3::splat(h);
                sum += poly6(r.length_squared(), h) as f64 * dv;
            }
        }
    }
    assert!((sum - 1.0).abs() < 0.02, "integral of Poly6 = {sum}");
}

#[test]
fn isolated_particle_density_is_self_term() {
    let fluid = quiet_fluid();
    let mut kernel = CpuKernel::new(
        vec![Particle::at_rest(Vec3::splat(25.0))],
        fluid.clone(),
        open_domain(),
        GridSettings::default(),
    )
    .unwrap();
    kernel.step(0.0).unwrap();

    let h = fluid.smoothing_radius;
    let expected = fluid.particle_mass * poly6_coef(h) * h.powi(6);
    let density = kernel.particles().unwrap()[0].density;
    assert!(
        ((density - expected) / expected).abs() < 1e-4,
        "density {density}, expected {expected}"
    );
}

#[test]
fn distant_particles_do_not_interact() {
    let fluid = quiet_fluid();
    // 10 world units = 0.04 m, four smoothing radii apart.
    let particles = vec![
        Particle::at_rest(Vec3::new(20.0, 25.0, 25.0)),
        Particle::at_rest(Vec3::new(30.0, 25.0, 25.0)),
    ];
    let mut kernel =
        CpuKernel::new(particles, fluid.clone(), open_domain(), GridSettings::default()).unwrap();
    kernel.step(0.0).unwrap();

    let h = fluid.smoothing_radius;
    let self_density = fluid.particle_mass * poly6_coef(h) * h.powi(6);
    for p in kernel.particles().unwrap() {
        assert!(((p.density - self_density) / self_density).abs() < 1e-4);
        assert_eq!(p.force, Vec3::ZERO);
        assert_eq!(p.velocity, Vec3::ZERO);
    }
}

#[test]
fn lattice_density_is_uniform_in_the_interior() {
    let fluid = quiet_fluid();
    let spacing = fluid.rest_spacing();
    let origin = Vec3::splat(15.0);
    let mut particles = Vec::new();
    for z in 0..8 {
        for y in 0..8 {
            for x in 0..8 {
                particles.push(Particle::at_rest(
                    origin + Vec3::new(x as f32, y as f32, z as f32) * spacing,
                ));
            }
        }
    }
    let mut kernel =
        CpuKernel::new(particles, fluid, open_domain(), GridSettings::default()).unwrap();
    kernel.step(0.0).unwrap();
    let p = kernel.particles().unwrap();

    let at = |x: usize, y: usize, z: usize| p[z * 64 + y * 8 + x].density;
    let centre = at(4, 4, 4);
    assert!(centre > 0.0);
    for (x, y, z) in [(3, 3, 3), (3, 4, 4), (4, 3, 4), (4, 4, 3), (3, 4, 3)] {
        let d = at(x, y, z);
        assert!(((d - centre) / centre).abs() < 1e-3, "interior density {d} vs {centre}");
    }
    // Corners see fewer neighbours.
    assert!(at(0, 0, 0) < centre);
}
