//! Headless scenario runner
//!
//! Usage: `sph-headless <config.json> [max_ticks]`
//!
//! Runs the scenario to its tick limit (the command-line value wins over the
//! config file, and 1000 ticks are used when neither sets one), then prints
//! the final fluid metrics.

use std::process::ExitCode;

use sph_orchestrator::{build_simulation, RunnerState, ScenarioConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_MAX_TICKS: u64 = 1000;

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().collect();
    let Some(config_path) = args.get(1) else {
        eprintln!("Usage: {} <config.json> [max_ticks]", args[0]);
        return ExitCode::FAILURE;
    };

    match run(config_path, args.get(2).map(String::as_str)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(config_path: &str, max_ticks: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = ScenarioConfig::load(config_path)?;
    if let Some(ticks) = max_ticks {
        config.max_ticks = Some(ticks.parse()?);
    }
    config.max_ticks.get_or_insert(DEFAULT_MAX_TICKS);

    tracing::info!(
        "Running '{}': {} particles, {:?} backend, {} ticks",
        config.name,
        config.particle_count,
        config.backend,
        config.max_ticks.unwrap_or_default()
    );

    let started = std::time::Instant::now();
    let mut runner = build_simulation(&config)?;
    runner.start();
    runner.join()?;
    let elapsed = started.elapsed().as_secs_f64();

    if runner.state() == RunnerState::Error {
        return Err(runner
            .error_message()
            .unwrap_or_else(|| "simulation failed".to_string())
            .into());
    }

    let snapshot = runner.snapshot().ok_or("no tick completed")?;
    let m = snapshot.metrics;
    println!("scenario          {}", config.name);
    println!("ticks             {}", snapshot.tick);
    println!("simulated time    {:.4} s", snapshot.sim_time);
    println!(
        "wall time         {:.2} s ({:.1} ticks/s)",
        elapsed,
        snapshot.tick as f64 / elapsed.max(1e-9)
    );
    println!("mean density      {:.3}", m.mean_density);
    println!("max density dev   {:.2} %", m.max_density_deviation * 100.0);
    println!("max speed         {:.4} m/s", m.max_speed);
    println!("kinetic energy    {:.6e} J", m.kinetic_energy);
    println!("non-finite        {}", m.non_finite);
    Ok(())
}
