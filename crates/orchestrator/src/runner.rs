//! Simulation runner with lifecycle management
//!
//! `SimulationRunner` owns a kernel on a background thread and issues ticks
//! back to back, each with the measured wall time since the previous one.
//! Other threads observe the run through a shared [`Snapshot`] that is
//! replaced after every completed tick, and may queue new domain bounds
//! that the loop applies between ticks.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use sph_kernel::{FluidMetrics, Particle, SimError, SimulationDomain, SimulationKernel};

use crate::wall::DomainController;

/// Runner state enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    /// Simulation created but not yet started
    Created,
    /// Simulation actively running
    Running,
    /// Tick limit reached or stopped by the host
    Finished,
    /// A tick failed; see [`SimulationRunner::error_message`]
    Error,
}

/// State published after a completed tick.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Particles indexed by id.
    pub particles: Vec<Particle>,
    /// Ticks completed.
    pub tick: u64,
    /// Simulated time (seconds).
    pub sim_time: f64,
    /// Diagnostics for `particles`.
    pub metrics: FluidMetrics,
    /// Domain bounds used by the tick.
    pub domain: SimulationDomain,
}

/// Stopping and logging options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerOptions {
    /// Finish after this many ticks; run until stopped when `None`.
    pub max_ticks: Option<u64>,
    /// Ticks between metric log lines.
    pub log_interval: u64,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            max_ticks: None,
            log_interval: 100,
        }
    }
}

/// Shared state between the runner thread and control interface
struct SharedState {
    state: RunnerState,
    sim_time: f64,
    tick_count: u64,
    error_message: Option<String>,
    snapshot: Option<Arc<Snapshot>>,
    pending_domains: VecDeque<SimulationDomain>,
}

fn lock(shared: &Mutex<SharedState>) -> MutexGuard<'_, SharedState> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle for controlling and querying a running simulation
pub struct SimulationRunner {
    shared: Arc<Mutex<SharedState>>,
    thread_handle: Option<thread::JoinHandle<()>>,
}

impl SimulationRunner {
    /// Move `kernel` onto a background thread. Nothing runs until
    /// [`start`](Self::start).
    ///
    /// `controller`, when present, rewrites the domain before every tick
    /// and after any queued domain update.
    pub fn new(
        mut kernel: Box<dyn SimulationKernel + Send>,
        mut controller: Option<Box<dyn DomainController>>,
        options: RunnerOptions,
    ) -> Self {
        let shared = Arc::new(Mutex::new(SharedState {
            state: RunnerState::Created,
            sim_time: 0.0,
            tick_count: 0,
            error_message: None,
            snapshot: None,
            pending_domains: VecDeque::new(),
        }));

        let shared_clone = Arc::clone(&shared);
        let thread_handle = thread::spawn(move || {
            run_simulation_loop(
                kernel.as_mut(),
                &mut controller,
                &shared_clone,
                options,
            );
        });

        Self {
            shared,
            thread_handle: Some(thread_handle),
        }
    }

    /// Get current runner state
    pub fn state(&self) -> RunnerState {
        lock(&self.shared).state
    }

    /// Simulated time (seconds)
    pub fn sim_time(&self) -> f64 {
        lock(&self.shared).sim_time
    }

    /// Ticks completed
    pub fn tick_count(&self) -> u64 {
        lock(&self.shared).tick_count
    }

    /// Get error message if state is Error
    pub fn error_message(&self) -> Option<String> {
        lock(&self.shared).error_message.clone()
    }

    /// Most recent published state, `None` before the first tick completes.
    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        lock(&self.shared).snapshot.clone()
    }

    /// Start the simulation (transition from Created to Running)
    pub fn start(&self) {
        let mut guard = lock(&self.shared);
        if guard.state == RunnerState::Created {
            guard.state = RunnerState::Running;
        }
    }

    /// Ask the loop to exit after the tick in progress.
    pub fn stop(&self) {
        let mut guard = lock(&self.shared);
        if matches!(guard.state, RunnerState::Created | RunnerState::Running) {
            guard.state = RunnerState::Finished;
        }
    }

    /// Queue new domain bounds, applied before the next tick.
    pub fn queue_domain(&self, domain: SimulationDomain) -> Result<(), SimError> {
        domain.validate()?;
        lock(&self.shared).pending_domains.push_back(domain);
        Ok(())
    }

    /// Wait for the simulation thread to complete
    pub fn join(&mut self) -> Result<(), String> {
        if let Some(handle) = self.thread_handle.take() {
            handle.join().map_err(|_| "Thread panicked".to_string())?;
        }
        Ok(())
    }
}

impl Drop for SimulationRunner {
    fn drop(&mut self) {
        self.stop();
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

fn fail(shared: &Mutex<SharedState>, message: String) {
    tracing::error!("Simulation failed: {}", message);
    let mut guard = lock(shared);
    guard.state = RunnerState::Error;
    guard.error_message = Some(message);
}

/// Main simulation loop executed in background thread
fn run_simulation_loop(
    kernel: &mut dyn SimulationKernel,
    controller: &mut Option<Box<dyn DomainController>>,
    shared: &Mutex<SharedState>,
    options: RunnerOptions,
) {
    // Wait for start signal
    loop {
        match lock(shared).state {
            RunnerState::Created => thread::sleep(Duration::from_millis(10)),
            RunnerState::Running => break,
            _ => return,
        }
    }

    let start_wall_time = Instant::now();
    let mut last_tick = start_wall_time;
    let mut sim_time = 0.0_f64;
    let mut warned_non_finite = false;

    loop {
        let pending: Vec<SimulationDomain> = {
            let mut guard = lock(shared);
            if guard.state != RunnerState::Running {
                break;
            }
            guard.pending_domains.drain(..).collect()
        };
        if let Some(domain) = pending.last() {
            *kernel.domain_mut() = *domain;
        }
        if let Some(controller) = controller.as_mut() {
            controller.update(sim_time, kernel.domain_mut());
        }

        let frame_time = last_tick.elapsed().as_secs_f32();
        last_tick = Instant::now();
        let dt = match kernel.step(frame_time) {
            Ok(dt) => dt,
            Err(e) => {
                fail(shared, e.to_string());
                break;
            }
        };
        sim_time += dt as f64;

        let tick = kernel.tick_count();
        let domain = *kernel.domain();
        let fluid = kernel.params().clone();
        let particles = match kernel.particles() {
            Ok(particles) => particles.to_vec(),
            Err(e) => {
                fail(shared, e.to_string());
                break;
            }
        };
        let metrics = FluidMetrics::from_particles(&particles, &fluid);

        if metrics.non_finite > 0 && !warned_non_finite {
            tracing::warn!(
                tick,
                non_finite = metrics.non_finite,
                "particles with non-finite state"
            );
            warned_non_finite = true;
        }

        if tick % options.log_interval.max(1) == 0 {
            tracing::debug!(
                "Tick {}: sim_time={:.4}s, dt={:.6}s, wall_time={:.2}s, \
                 mean_density={:.2}, max_dev={:.3}, max_speed={:.3}",
                tick,
                sim_time,
                dt,
                start_wall_time.elapsed().as_secs_f64(),
                metrics.mean_density,
                metrics.max_density_deviation,
                metrics.max_speed,
            );
        }

        let finished = options.max_ticks.is_some_and(|max| tick >= max);
        {
            let mut guard = lock(shared);
            guard.sim_time = sim_time;
            guard.tick_count = tick;
            guard.snapshot = Some(Arc::new(Snapshot {
                particles,
                tick,
                sim_time,
                metrics,
                domain,
            }));
            if finished && guard.state == RunnerState::Running {
                guard.state = RunnerState::Finished;
            }
        }
        if finished {
            tracing::info!("Simulation finished: reached max_ticks = {}", tick);
            break;
        }
    }

    tracing::info!(
        "Simulation thread exiting: {} ticks, {:.4}s simulated",
        kernel.tick_count(),
        sim_time
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use sph_kernel::{CpuKernel, FluidParams, GridSettings};

    fn kernel() -> Box<dyn SimulationKernel + Send> {
        let domain = SimulationDomain::new(Vec3::ZERO, Vec3::splat(20.0));
        let particles = (0..64)
            .map(|i| {
                let (x, y, z) = (i % 4, (i / 4) % 4, i / 16);
                let offset = Vec3::new(x as f32, y as f32, z as f32) * 1.7;
                Particle::at_rest(Vec3::new(5.0, 2.0, 5.0) + offset)
            })
            .collect();
        Box::new(
            CpuKernel::new(particles, FluidParams::default(), domain, GridSettings::default())
                .unwrap(),
        )
    }

    fn options(max_ticks: Option<u64>) -> RunnerOptions {
        RunnerOptions {
            max_ticks,
            log_interval: 5,
        }
    }

    fn wait_for_tick(runner: &SimulationRunner, tick: u64) {
        let deadline = Instant::now() + Duration::from_secs(30);
        while runner.tick_count() < tick && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
    }

    struct LowerCeiling;

    impl DomainController for LowerCeiling {
        fn update(&mut self, _sim_time: f64, domain: &mut SimulationDomain) {
            domain.max.y = 15.0;
        }
    }

    #[test]
    fn test_runner_lifecycle() {
        let mut runner = SimulationRunner::new(kernel(), None, options(Some(10)));
        assert_eq!(runner.state(), RunnerState::Created);
        assert!(runner.snapshot().is_none());

        runner.start();
        runner.join().unwrap();

        assert_eq!(runner.state(), RunnerState::Finished);
        assert_eq!(runner.tick_count(), 10);
        assert!((runner.sim_time() - 10.0 * 0.004).abs() < 1e-6);
        let snapshot = runner.snapshot().unwrap();
        assert_eq!(snapshot.tick, 10);
        assert_eq!(snapshot.particles.len(), 64);
        assert_eq!(snapshot.metrics.non_finite, 0);
        assert!(runner.error_message().is_none());
    }

    #[test]
    fn test_runner_stop() {
        let mut runner = SimulationRunner::new(kernel(), None, options(None));
        runner.start();
        wait_for_tick(&runner, 2);
        runner.stop();
        runner.join().unwrap();

        assert_eq!(runner.state(), RunnerState::Finished);
        let stopped_at = runner.tick_count();
        assert!(stopped_at >= 2);
        assert_eq!(runner.snapshot().unwrap().tick, stopped_at);
    }

    #[test]
    fn test_stop_before_start_runs_nothing() {
        let mut runner = SimulationRunner::new(kernel(), None, options(Some(10)));
        runner.stop();
        runner.join().unwrap();
        assert_eq!(runner.tick_count(), 0);
        assert!(runner.snapshot().is_none());
    }

    #[test]
    fn test_queued_domain_is_applied() {
        let mut runner = SimulationRunner::new(kernel(), None, options(Some(3)));
        let inverted = SimulationDomain::new(Vec3::splat(5.0), Vec3::ZERO);
        assert!(runner.queue_domain(inverted).is_err());

        let moved = SimulationDomain::new(Vec3::new(2.0, 0.0, 0.0), Vec3::splat(20.0));
        runner.queue_domain(moved).unwrap();
        runner.start();
        runner.join().unwrap();
        assert_eq!(runner.snapshot().unwrap().domain, moved);
    }

    #[test]
    fn test_controller_runs_before_each_tick() {
        let mut runner =
            SimulationRunner::new(kernel(), Some(Box::new(LowerCeiling)), options(Some(2)));
        runner.start();
        runner.join().unwrap();
        assert_eq!(runner.snapshot().unwrap().domain.max.y, 15.0);
    }
}
