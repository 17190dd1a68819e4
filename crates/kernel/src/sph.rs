//! Smoothing kernels and the three per-particle physics passes.
//!
//! All passes run over the key-sorted particle copy, one rayon task per
//! particle, and write only their own output slot. Distances are measured in
//! simulation metres (`world * scale`).

use std::f32::consts::PI;
use std::sync::atomic::{AtomicU32, Ordering};

use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use rayon::prelude::*;

use crate::boundary::wall_acceleration;
use crate::eos;
use crate::grid::GridIndexTable;
use crate::hash::SpatialHasher;
use crate::params::SimParams;
use crate::particle::Particle;

/// Pairs closer than this (m) exert no gradient force on each other.
pub const MIN_PAIR_DISTANCE: f32 = 1.0e-6;

// ---------------------------------------------------------------------------
// Kernel coefficients
// ---------------------------------------------------------------------------

/// Poly6 normalisation, `315 / (64 pi h^9)`.
pub fn poly6_coef(h: f32) -> f32 {
    315.0 / (64.0 * PI * h.powi(9))
}

/// Spiky kernel gradient coefficient, `-45 / (pi h^6)`.
pub fn spiky_grad_coef(h: f32) -> f32 {
    -45.0 / (PI * h.powi(6))
}

/// Viscosity kernel Laplacian coefficient, `45 / (pi h^6)`.
pub fn viscosity_laplacian_coef(h: f32) -> f32 {
    45.0 / (PI * h.powi(6))
}

/// Poly6 kernel value at squared distance `r2`; zero outside the support.
pub fn poly6(r2: f32, h: f32) -> f32 {
    let h2 = h * h;
    if r2 >= h2 {
        return 0.0;
    }
    let d = h2 - r2;
    poly6_coef(h) * d * d * d
}

/// Output of the density pass for one sorted particle.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct DensitySample {
    /// Summed density.
    pub density: f32,
    /// Pressure from the equation of state.
    pub pressure: f32,
}

/// Visit every sorted particle `j` within `h` of sorted particle `i`,
/// including `i` itself. The closure gets `j`, the displacement
/// `(pos_i - pos_j) * scale` and its squared length.
#[inline]
fn for_each_neighbor<F>(
    params: &SimParams,
    hasher: &SpatialHasher,
    table: &GridIndexTable,
    sorted: &[Particle],
    i: usize,
    mut f: F,
) where
    F: FnMut(usize, Vec3, f32),
{
    let pos = sorted[i].position;
    for key in hasher.neighbor_keys(pos) {
        for j in table.range(key).positions() {
            let d = (pos - sorted[j].position) * params.sim_scale;
            let r2 = d.length_squared();
            if r2 < params.h2 {
                f(j, d, r2);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Density and pressure
// ---------------------------------------------------------------------------

/// `density_i = m * Poly6 * sum_j (h^2 - r^2)^3`, self term included, then
/// pressure from the equation of state.
pub fn compute_density_pressure(
    params: &SimParams,
    hasher: &SpatialHasher,
    table: &GridIndexTable,
    sorted: &[Particle],
    out: &mut [DensitySample],
) {
    out.par_iter_mut().enumerate().for_each(|(i, sample)| {
        let mut sum = 0.0_f32;
        for_each_neighbor(params, hasher, table, sorted, i, |_, _, r2| {
            let d = params.h2 - r2;
            sum += d * d * d;
        });
        let density = params.mass * params.poly6_coef * sum;
        *sample = DensitySample {
            density,
            pressure: eos::pressure(density, params),
        };
    });
}

// ---------------------------------------------------------------------------
// Forces
// ---------------------------------------------------------------------------

/// Acceleration of every sorted particle: pressure gradient (Spiky) and
/// viscosity (Laplacian) summed over neighbours, divided by the particle's
/// density, plus gravity and the wall penalty.
pub fn compute_forces(
    params: &SimParams,
    hasher: &SpatialHasher,
    table: &GridIndexTable,
    sorted: &[Particle],
    density: &[DensitySample],
    out: &mut [Vec3],
) {
    out.par_iter_mut().enumerate().for_each(|(i, accel)| {
        let p_i = density[i].pressure;
        let v_i = sorted[i].velocity;
        let mut f_pressure = Vec3::ZERO;
        let mut f_viscosity = Vec3::ZERO;

        for_each_neighbor(params, hasher, table, sorted, i, |j, d, r2| {
            if j == i {
                return;
            }
            let r = r2.sqrt();
            let rho_j = eos::floor_density(density[j].density);
            let q = params.h - r;

            if r > MIN_PAIR_DISTANCE {
                let shared = (p_i + density[j].pressure) / (2.0 * rho_j);
                f_pressure += -params.mass * shared * params.spiky_grad_coef * q * q * (d / r);
            }
            let dv = (sorted[j].velocity - v_i) / rho_j;
            f_viscosity += params.viscosity * params.mass * dv * params.lap_coef * q;
        });

        let rho_i = eos::floor_density(density[i].density);
        *accel = (f_pressure + f_viscosity) / rho_i
            + params.gravity
            + wall_acceleration(sorted[i].position, v_i, params);
    });
}

// ---------------------------------------------------------------------------
// Integration
// ---------------------------------------------------------------------------

/// Semi-implicit Euler step, scattered back to original particle indices.
///
/// `write[o]` receives the advanced state of the particle whose sorted
/// position is `rank[o]`.
pub fn integrate(
    params: &SimParams,
    sorted: &[Particle],
    density: &[DensitySample],
    accel: &[Vec3],
    rank: &[AtomicU32],
    write: &mut [Particle],
) {
    write.par_iter_mut().enumerate().for_each(|(o, out)| {
        let s = rank[o].load(Ordering::Relaxed) as usize;
        let a = accel[s];
        let velocity = (sorted[s].velocity + a * params.dt).clamp_length_max(params.velocity_limit);
        let position = sorted[s].position + velocity * (params.dt / params.sim_scale);
        *out = Particle::new(position, velocity);
        out.force = a;
        out.density = density[s].density;
        out.pressure = density[s].pressure;
    });
}
