//! Orchestration Layer
//!
//! This crate turns a scenario description into a running simulation:
//! - JSON scenario configuration
//! - Initial particle seeding
//! - Domain controllers (moving walls)
//! - Simulation runner with lifecycle management and snapshots

#![warn(missing_docs)]

pub mod config;
pub mod runner;
pub mod scene;
pub mod wall;

pub use config::{BackendType, ScenarioConfig, Seeding, WallAnimation};
pub use runner::{RunnerOptions, RunnerState, SimulationRunner, Snapshot};
pub use wall::{DomainController, OscillatingWall};

use sph_kernel::{
    CpuKernel, FluidParams, GridSettings, Particle, SimError, SimulationDomain, SimulationKernel,
};

/// Create a complete simulation from a configuration file
///
/// Loads and validates the configuration, then hands it to
/// [`build_simulation`].
///
/// # Example
/// ```no_run
/// use sph_orchestrator::create_simulation;
///
/// let mut runner = create_simulation("configs/dam_break.json")?;
/// runner.start();
/// runner.join()?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn create_simulation(
    config_path: &str,
) -> Result<SimulationRunner, Box<dyn std::error::Error>> {
    tracing::info!("Creating simulation from config: {}", config_path);
    let config = ScenarioConfig::load(config_path)?;
    tracing::info!("Configuration loaded: {}", config.name);
    build_simulation(&config)
}

/// Seed particles, build the kernel and wrap it in a runner.
pub fn build_simulation(
    config: &ScenarioConfig,
) -> Result<SimulationRunner, Box<dyn std::error::Error>> {
    config.validate()?;

    let particles = scene::seed_particles(config)?;
    tracing::info!(
        "Seeded {} particles ({:?})",
        particles.len(),
        config.seeding
    );

    let kernel = create_kernel(
        config.backend,
        particles,
        config.fluid.clone(),
        config.domain,
        config.grid,
    )?;

    let controller: Option<Box<dyn DomainController>> = config.wall.map(|animation| {
        tracing::info!(
            "Oscillating x-min wall: speed={}, start_time={}s",
            animation.speed,
            animation.start_time
        );
        Box::new(OscillatingWall::from_animation(&animation, config.domain))
            as Box<dyn DomainController>
    });

    let runner = SimulationRunner::new(
        kernel,
        controller,
        RunnerOptions {
            max_ticks: config.max_ticks,
            log_interval: config.log_interval,
        },
    );

    tracing::info!("Simulation ready to start");
    Ok(runner)
}

/// Create a simulation kernel for `backend`.
///
/// `Gpu` falls back to the CPU kernel when the `gpu` feature is disabled,
/// no adapter is available, or GPU initialisation fails. Configuration
/// errors are returned as-is, since the CPU kernel would reject them too.
pub fn create_kernel(
    backend: BackendType,
    particles: Vec<Particle>,
    fluid: FluidParams,
    domain: SimulationDomain,
    grid: GridSettings,
) -> Result<Box<dyn SimulationKernel + Send>, SimError> {
    match backend {
        BackendType::Cpu => {
            tracing::info!("Creating CPU simulation kernel...");
            Ok(Box::new(CpuKernel::new(particles, fluid, domain, grid)?))
        }
        #[cfg(feature = "gpu")]
        BackendType::Gpu => {
            if !sph_kernel::gpu_available() {
                tracing::warn!("No GPU adapter available, falling back to CPU kernel");
                return Ok(Box::new(CpuKernel::new(particles, fluid, domain, grid)?));
            }
            tracing::info!("Creating GPU simulation kernel...");
            match sph_kernel::GpuKernel::new(particles.clone(), fluid.clone(), domain, grid) {
                Ok(gpu) => Ok(Box::new(gpu)),
                Err(SimError::Device(e)) => {
                    tracing::warn!("GPU init failed ({e}), falling back to CPU");
                    Ok(Box::new(CpuKernel::new(particles, fluid, domain, grid)?))
                }
                Err(SimError::TooManyParticles { count, max }) => {
                    tracing::warn!(
                        "{count} sort entries exceed the GPU limit of {max}, falling back to CPU"
                    );
                    Ok(Box::new(CpuKernel::new(particles, fluid, domain, grid)?))
                }
                Err(e) => Err(e),
            }
        }
        #[cfg(not(feature = "gpu"))]
        BackendType::Gpu => {
            tracing::warn!(
                "GPU backend requested but the 'gpu' feature is not enabled, using CPU kernel"
            );
            Ok(Box::new(CpuKernel::new(particles, fluid, domain, grid)?))
        }
    }
}
