//! Sort-based parallel SPH fluid engine.
//!
//! Every tick runs the same fixed pipeline over a fixed particle set:
//! hash positions to cell keys, bitonic-sort the `(key, index)` pairs, build
//! per-cell ranges, gather particles into sorted order, then the density,
//! force and integration passes. Integration writes the opposite bank of a
//! [`ParticleBuffer`], and the banks swap once the tick is complete.
//!
//! # Modules
//! - [`particle`] -- `Particle` state and the two-bank `ParticleBuffer`.
//! - [`params`] -- configuration surface and the per-tick `SimParams`.
//! - [`hash`] -- cell keys, key packing schemes and the 27-cell neighbourhood.
//! - [`sort`] -- bitonic sorting network with the transpose trick.
//! - [`grid`] -- per-key cell ranges over the sorted entries.
//! - [`rearrange`] -- gather of particle state into sorted order.
//! - [`sph`] -- smoothing kernels and the density / force / integrate passes.
//! - [`eos`] -- linear equation of state.
//! - [`boundary`] -- wall penalty forces.
//! - `gpu` (feature `gpu`) -- the same pipeline as wgpu compute shaders.

#![warn(missing_docs)]

pub mod boundary;
pub mod eos;
pub mod error;
pub mod grid;
pub mod hash;
pub mod params;
pub mod particle;
pub mod rearrange;
pub mod sort;
pub mod sph;

#[cfg(feature = "gpu")]
#[allow(missing_docs)]
pub mod gpu;

use std::sync::atomic::AtomicU32;
use std::time::Instant;

use glam::Vec3;

pub use error::SimError;
pub use grid::{CellRange, GridIndexTable};
pub use hash::{KeyScheme, SpatialHasher};
pub use params::{
    FluidParams, GridSettings, PressurePolicy, SimParams, SimulationDomain, TimeStep,
};
pub use particle::{Particle, ParticleBuffer};
pub use sort::{BitonicSorter, SortEntry, SortPass, SENTINEL_KEY};
pub use sph::DensitySample;

#[cfg(feature = "gpu")]
pub use gpu::{gpu_available, GpuKernel};

use crate::particle::try_alloc;

// ---------------------------------------------------------------------------
// SimulationKernel trait
// ---------------------------------------------------------------------------

/// Aggregate diagnostics for a particle snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FluidMetrics {
    /// Mean density over particles with finite state (kg/m^3).
    pub mean_density: f32,
    /// Largest `|density - rest| / rest` over particles with finite state.
    pub max_density_deviation: f32,
    /// Largest particle speed (m/s).
    pub max_speed: f32,
    /// Total kinetic energy (J).
    pub kinetic_energy: f64,
    /// Particles with at least one non-finite field.
    pub non_finite: usize,
}

impl FluidMetrics {
    /// Compute metrics for `particles` under `fluid`'s mass and rest density.
    pub fn from_particles(particles: &[Particle], fluid: &FluidParams) -> Self {
        let mut metrics = FluidMetrics::default();
        let mut density_sum = 0.0_f64;
        let mut finite = 0usize;

        for p in particles {
            if !p.is_finite() {
                metrics.non_finite += 1;
                continue;
            }
            finite += 1;
            density_sum += p.density as f64;
            let deviation = (p.density - fluid.rest_density).abs() / fluid.rest_density;
            metrics.max_density_deviation = metrics.max_density_deviation.max(deviation);
            let speed2 = p.velocity.length_squared();
            metrics.max_speed = metrics.max_speed.max(speed2.sqrt());
            metrics.kinetic_energy += 0.5 * fluid.particle_mass as f64 * speed2 as f64;
        }
        if finite > 0 {
            metrics.mean_density = (density_sum / finite as f64) as f32;
        }
        metrics
    }
}

/// Wall-clock time spent in each stage of one CPU tick (microseconds).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepTimings {
    /// Cell key computation.
    pub hash_us: u64,
    /// Bitonic sort.
    pub sort_us: u64,
    /// Grid index clear and build.
    pub index_us: u64,
    /// Gather into sorted order.
    pub rearrange_us: u64,
    /// Density and pressure.
    pub density_us: u64,
    /// Force pass.
    pub force_us: u64,
    /// Integration and write-back.
    pub integrate_us: u64,
}

impl StepTimings {
    /// Sum of all stages.
    pub fn total_us(&self) -> u64 {
        self.hash_us
            + self.sort_us
            + self.index_us
            + self.rearrange_us
            + self.density_us
            + self.force_us
            + self.integrate_us
    }
}

/// Interface shared by the CPU and GPU backends.
///
/// A kernel owns its particle banks. Hosts advance it with [`step`], read the
/// most recently completed state through [`particles`], and may move the
/// domain walls between ticks through [`domain_mut`].
///
/// [`step`]: SimulationKernel::step
/// [`particles`]: SimulationKernel::particles
/// [`domain_mut`]: SimulationKernel::domain_mut
pub trait SimulationKernel {
    /// Run one full tick. `frame_time` is the elapsed wall time since the
    /// previous tick and only matters under [`TimeStep::FrameClamped`].
    /// Returns the step length used.
    fn step(&mut self, frame_time: f32) -> Result<f32, SimError>;

    /// State after the most recently completed tick, indexed by particle id.
    fn particles(&mut self) -> Result<&[Particle], SimError>;

    /// Number of particles (fixed at construction).
    fn particle_count(&self) -> usize;

    /// Current domain bounds.
    fn domain(&self) -> &SimulationDomain;

    /// Mutable domain bounds. Callers must keep `min <= max`; the kernel does
    /// not re-validate after construction.
    fn domain_mut(&mut self) -> &mut SimulationDomain;

    /// Fluid constants.
    fn params(&self) -> &FluidParams;

    /// Ticks completed so far.
    fn tick_count(&self) -> u64;

    /// Diagnostics for the current state.
    fn metrics(&mut self) -> Result<FluidMetrics, SimError> {
        let fluid = self.params().clone();
        Ok(FluidMetrics::from_particles(self.particles()?, &fluid))
    }
}

/// Checks shared by every backend before any buffer is allocated.
pub fn validate_setup(
    count: usize,
    fluid: &FluidParams,
    domain: &SimulationDomain,
    grid: &GridSettings,
) -> Result<(), SimError> {
    if count == 0 {
        return Err(SimError::EmptyParticleSet);
    }
    fluid.validate()?;
    domain.validate()?;
    grid.validate()?;

    let cells_needed = (domain.extent().max_element() / fluid.cell_size()).ceil() as u32;
    let cells_available = grid.cells_per_axis();
    if cells_needed > cells_available {
        return Err(SimError::DomainExceedsKeySpace {
            cells_needed,
            cells_available,
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// CpuKernel
// ---------------------------------------------------------------------------

/// Data-parallel CPU backend.
///
/// Each stage is one rayon pass; rayon returns only after every task of the
/// pass has finished, which is the barrier between stages.
pub struct CpuKernel {
    buffer: ParticleBuffer,
    fluid: FluidParams,
    domain: SimulationDomain,
    grid: GridSettings,

    // ---- per-tick scratch, sized once ----
    entries: Vec<SortEntry>,
    sorter: BitonicSorter,
    table: GridIndexTable,
    sorted: Vec<Particle>,
    rank: Vec<AtomicU32>,
    density: Vec<DensitySample>,
    accel: Vec<Vec3>,

    tick: u64,
    timings: StepTimings,
}

impl CpuKernel {
    /// Build a kernel over `particles`.
    ///
    /// Fails on an empty or wrongly sized particle set, invalid constants, an
    /// inverted domain, a domain wider than the key space, or when a buffer
    /// cannot be allocated.
    pub fn new(
        particles: Vec<Particle>,
        fluid: FluidParams,
        domain: SimulationDomain,
        grid: GridSettings,
    ) -> Result<Self, SimError> {
        let n = particles.len();
        validate_setup(n, &fluid, &domain, &grid)?;
        let max_sort = sort::BITONIC_BLOCK_SIZE * sort::BITONIC_BLOCK_SIZE;
        let sort_len = sort::sort_length(n, grid.pad_to_power_of_two, max_sort)?;

        let entries = try_alloc(sort_len, SortEntry::default(), "sort entries")?;
        let sorter = BitonicSorter::new(sort_len)?;
        let table = GridIndexTable::new(grid.key_count())?;
        let sorted = try_alloc(n, Particle::default(), "sorted particles")?;
        let density = try_alloc(n, DensitySample::default(), "density")?;
        let accel = try_alloc(n, Vec3::ZERO, "acceleration")?;
        let mut rank = Vec::new();
        rank.try_reserve_exact(n).map_err(|_| SimError::Allocation {
            buffer: "rank",
            bytes: n * std::mem::size_of::<AtomicU32>(),
        })?;
        rank.extend((0..n as u32).map(AtomicU32::new));
        let buffer = ParticleBuffer::new(particles)?;

        tracing::info!(
            particles = n,
            sort_len,
            cells_per_axis = grid.cells_per_axis(),
            key_scheme = ?grid.key_scheme,
            "CPU kernel ready"
        );

        Ok(Self {
            buffer,
            fluid,
            domain,
            grid,
            entries,
            sorter,
            table,
            sorted,
            rank,
            density,
            accel,
            tick: 0,
            timings: StepTimings::default(),
        })
    }

    /// Stage timings of the last tick.
    pub fn last_timings(&self) -> StepTimings {
        self.timings
    }

    /// Key-sorted entries of the last tick (including any sentinel padding).
    pub fn sorted_entries(&self) -> &[SortEntry] {
        &self.entries
    }

    /// Cell ranges of the last tick.
    pub fn grid_table(&self) -> &GridIndexTable {
        &self.table
    }

    /// Key-space settings.
    pub fn grid_settings(&self) -> &GridSettings {
        &self.grid
    }

    /// Read-only view of the current state, without the `Result` wrapper.
    pub fn read_bank(&self) -> &[Particle] {
        self.buffer.read()
    }
}

fn micros(start: Instant) -> u64 {
    start.elapsed().as_micros() as u64
}

impl SimulationKernel for CpuKernel {
    fn step(&mut self, frame_time: f32) -> Result<f32, SimError> {
        let dt = self.fluid.timestep.resolve(frame_time);
        let params = SimParams::new(&self.fluid, &self.domain, dt);
        let hasher = SpatialHasher::new(&params, &self.grid);
        let (read, write) = self.buffer.split();

        let t = Instant::now();
        hash::hash_particles(&hasher, read, &mut self.entries);
        self.timings.hash_us = micros(t);

        let t = Instant::now();
        self.sorter.sort(&mut self.entries);
        self.timings.sort_us = micros(t);

        let t = Instant::now();
        self.table.rebuild(&self.entries);
        self.timings.index_us = micros(t);

        let t = Instant::now();
        rearrange::rearrange(read, &self.entries, &mut self.sorted, &self.rank);
        self.timings.rearrange_us = micros(t);

        let t = Instant::now();
        sph::compute_density_pressure(
            &params,
            &hasher,
            &self.table,
            &self.sorted,
            &mut self.density,
        );
        self.timings.density_us = micros(t);

        let t = Instant::now();
        sph::compute_forces(
            &params,
            &hasher,
            &self.table,
            &self.sorted,
            &self.density,
            &mut self.accel,
        );
        self.timings.force_us = micros(t);

        let t = Instant::now();
        sph::integrate(&params, &self.sorted, &self.density, &self.accel, &self.rank, write);
        self.timings.integrate_us = micros(t);

        self.buffer.swap();
        self.tick += 1;

        tracing::trace!(tick = self.tick, dt, timings = ?self.timings, "tick complete");
        Ok(dt)
    }

    fn particles(&mut self) -> Result<&[Particle], SimError> {
        Ok(self.buffer.read())
    }

    fn particle_count(&self) -> usize {
        self.buffer.len()
    }

    fn domain(&self) -> &SimulationDomain {
        &self.domain
    }

    fn domain_mut(&mut self) -> &mut SimulationDomain {
        &mut self.domain
    }

    fn params(&self) -> &FluidParams {
        &self.fluid
    }

    fn tick_count(&self) -> u64 {
        self.tick
    }
}
