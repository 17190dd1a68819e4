//! Reference test framework for SPH fluid simulation validation
//!
//! A reference test loads a scenario file, runs it for a fixed number of
//! ticks on the chosen backend, and validates the final particle state
//! against a set of optional checks.

pub mod scenarios;



use std::path::Path;

use sph_kernel::{FluidMetrics, Particle, SimulationDomain};
use sph_orchestrator::{
    create_kernel, scene, BackendType, DomainController, OscillatingWall, ScenarioConfig,
};

/// Resolve a path relative to the workspace root.
pub fn project_path(relative: &str) -> String {
    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    let root = manifest_dir.parent().unwrap_or(manifest_dir);
    root.join(relative).to_string_lossy().to_string()
}

/// Expected result criteria for a reference test
#[derive(Debug, Clone, Default)]
pub struct ExpectedResult {
    /// Every particle field must be finite
    pub finite: bool,
    /// Particles stay inside the domain swept by the last wall update
    pub containment: Option<ContainmentCheck>,
    /// Mean density within a band around rest density
    pub mean_density: Option<DensityBandCheck>,
    /// Particles have fallen below a height
    pub settling: Option<SettlingCheck>,
}

/// Check that particles remain inside the domain
#[derive(Debug, Clone)]
pub struct ContainmentCheck {
    /// Allowed overshoot past any wall (world units)
    pub tolerance: f32,
}

/// Check the mean density against rest density
#[derive(Debug, Clone)]
pub struct DensityBandCheck {
    /// Relative tolerance (0.0 to 1.0)
    pub tolerance: f32,
}

/// Check that particles have settled near the floor
#[derive(Debug, Clone)]
pub struct SettlingCheck {
    /// Highest allowed particle y (world units)
    pub max_height: f32,
}

/// Result of running a reference test
#[derive(Debug)]
pub struct TestResult {
    /// Test name
    pub name: String,
    /// Whether test passed
    pub passed: bool,
    /// Individual check results
    pub checks: Vec<CheckResult>,
    /// Final fluid metrics
    pub metrics: FluidMetrics,
    /// Number of ticks executed
    pub ticks: u64,
    /// Simulated time (seconds)
    pub sim_time: f64,
}

/// Result of an individual validation check
#[derive(Debug)]
pub struct CheckResult {
    /// Check name
    pub name: String,
    /// Whether check passed
    pub passed: bool,
    /// Detail message
    pub message: Option<String>,
}

impl CheckResult {
    fn new(name: &str, passed: bool, message: String) -> Self {
        Self {
            name: name.to_string(),
            passed,
            message: Some(message),
        }
    }
}

/// A reference test case
pub struct ReferenceTest {
    /// Test name
    pub name: String,
    /// Path to the scenario file
    pub config_path: String,
    /// Ticks to run; falls back to the scenario's `max_ticks`
    pub ticks: Option<u64>,
    /// Expected results to validate
    pub expected: ExpectedResult,
}

impl ReferenceTest {
    /// Run on the backend named in the scenario file.
    pub fn run(&self) -> Result<TestResult, String> {
        let config = ScenarioConfig::load(&self.config_path)?;
        let backend = config.backend;
        self.run_config(&config, backend)
    }

    /// Run on an explicit backend.
    pub fn run_on(&self, backend: BackendType) -> Result<TestResult, String> {
        let config = ScenarioConfig::load(&self.config_path)?;
        self.run_config(&config, backend)
    }

    fn run_config(
        &self,
        config: &ScenarioConfig,
        backend: BackendType,
    ) -> Result<TestResult, String> {
        tracing::info!("Running reference test: {}", self.name);

        let ticks = self
            .ticks
            .or(config.max_ticks)
            .ok_or("Neither the test nor the scenario sets a tick count")?;

        let particles = scene::seed_particles(config)?;
        let mut kernel = create_kernel(
            backend,
            particles,
            config.fluid.clone(),
            config.domain,
            config.grid,
        )
        .map_err(|e| e.to_string())?;
        let mut wall = config
            .wall
            .map(|animation| OscillatingWall::from_animation(&animation, config.domain));

        tracing::info!(
            "Initialized: {} particles, running {} ticks",
            kernel.particle_count(),
            ticks
        );

        // Nominal display-rate frame time for frame-clamped scenarios.
        let frame_time = 1.0 / 60.0;
        let mut sim_time = 0.0_f64;
        let mut previous_domain = *kernel.domain();
        for tick in 0..ticks {
            previous_domain = *kernel.domain();
            if let Some(wall) = wall.as_mut() {
                wall.update(sim_time, kernel.domain_mut());
            }
            let dt = kernel.step(frame_time).map_err(|e| e.to_string())?;
            sim_time += dt as f64;

            if (tick + 1) % (ticks / 10).max(1) == 0 {
                let progress = ((tick + 1) as f32 / ticks as f32) * 100.0;
                tracing::info!("Progress: {:.0}% ({}/{})", progress, tick + 1, ticks);
            }
        }
        tracing::info!("Simulation complete: {} ticks, {:.4}s simulated", ticks, sim_time);

        let domain = *kernel.domain();
        let rest_density = kernel.params().rest_density;
        let metrics = kernel.metrics().map_err(|e| e.to_string())?;
        let particles = kernel.particles().map_err(|e| e.to_string())?;

        let mut checks = Vec::new();
        if self.expected.finite {
            checks.push(validate_finite(&metrics));
        }
        if let Some(ref containment) = self.expected.containment {
            let swept = swept_domain(&previous_domain, &domain);
            checks.push(validate_containment(particles, &swept, containment));
        }
        if let Some(ref band) = self.expected.mean_density {
            checks.push(validate_density_band(&metrics, rest_density, band));
        }
        if let Some(ref settling) = self.expected.settling {
            checks.push(validate_settling(particles, settling));
        }

        Ok(TestResult {
            name: self.name.clone(),
            passed: checks.iter().all(|c| c.passed),
            checks,
            metrics,
            ticks,
            sim_time,
        })
    }
}

fn validate_finite(metrics: &FluidMetrics) -> CheckResult {
    CheckResult::new(
        "Finite State",
        metrics.non_finite == 0,
        format!("{} particles with non-finite fields", metrics.non_finite),
    )
}

/// Smallest box holding both domains.
///
/// Particles pushed by a moving wall trail it by a tick, so containment is
/// judged against the span the wall covered on its last move.
fn swept_domain(before: &SimulationDomain, after: &SimulationDomain) -> SimulationDomain {
    SimulationDomain::new(before.min.min(after.min), before.max.max(after.max))
}

/// Validate that particles remain inside the domain
fn validate_containment(
    particles: &[Particle],
    domain: &SimulationDomain,
    check: &ContainmentCheck,
) -> CheckResult {
    let mut violations = 0;
    let mut max_violation = 0.0_f32;
    for p in particles {
        if !domain.contains(p.position, check.tolerance) {
            violations += 1;
            let below = (domain.min - p.position).max_element();
            let above = (p.position - domain.max).max_element();
            max_violation = max_violation.max(below.max(above));
        }
    }
    CheckResult::new(
        "Containment",
        violations == 0,
        format!(
            "{} particles outside (max overshoot: {:.3}, tolerance: {:.3})",
            violations, max_violation, check.tolerance
        ),
    )
}

fn validate_density_band(
    metrics: &FluidMetrics,
    rest_density: f32,
    check: &DensityBandCheck,
) -> CheckResult {
    let error = (metrics.mean_density - rest_density).abs() / rest_density;
    CheckResult::new(
        "Mean Density",
        error <= check.tolerance,
        format!(
            "Expected: {:.1}, Got: {:.1} (error: {:.1}%, tolerance: {:.1}%)",
            rest_density,
            metrics.mean_density,
            error * 100.0,
            check.tolerance * 100.0
        ),
    )
}

/// Validate that particles have settled near the floor
fn validate_settling(particles: &[Particle], check: &SettlingCheck) -> CheckResult {
    let max_height = particles
        .iter()
        .map(|p| p.position.y)
        .fold(f32::NEG_INFINITY, f32::max);
    let unsettled = particles
        .iter()
        .filter(|p| p.position.y > check.max_height)
        .count();
    CheckResult::new(
        "Settling",
        unsettled == 0,
        format!(
            "{} / {} particles above {:.2} (max height: {:.2})",
            unsettled,
            particles.len(),
            check.max_height,
            max_height
        ),
    )
}

impl TestResult {
    /// Print a summary of the test result
    pub fn print_summary(&self) {
        println!("\n{}", "=".repeat(80));
        println!("Test: {}", self.name);
        println!("{}", "=".repeat(80));
        println!("Status: {}", if self.passed { "PASSED" } else { "FAILED" });
        println!("Ticks: {}", self.ticks);
        println!("Simulated time: {:.4} s", self.sim_time);
        println!("\nMetrics:");
        println!("  Mean density: {:.2}", self.metrics.mean_density);
        println!(
            "  Max density deviation: {:.2}%",
            self.metrics.max_density_deviation * 100.0
        );
        println!("  Max speed: {:.3} m/s", self.metrics.max_speed);
        println!("  Kinetic energy: {:.4e} J", self.metrics.kinetic_energy);
        println!("\nValidation Checks:");
        for check in &self.checks {
            let status = if check.passed { "PASS" } else { "FAIL" };
            print!("  [{}] {}", status, check.name);
            if let Some(ref msg) = check.message {
                print!(" - {}", msg);
            }
            println!();
        }
        println!("{}", "=".repeat(80));
    }
}
