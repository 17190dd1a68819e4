//! Scenario files through seeding, kernel construction and the runner.

use std::path::Path;

use sph_orchestrator::{build_simulation, scene, RunnerState, ScenarioConfig, Seeding};

fn workspace_config(name: &str) -> String {
    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    manifest_dir
        .join("../../configs")
        .join(name)
        .to_string_lossy()
        .to_string()
}

#[test]
fn shipped_scenarios_seed_inside_their_domain() {
    for name in [
        "dam_break.json",
        "end_to_end_1024.json",
        "sphere_drop.json",
        "moving_wall.json",
        "reference_scene.json",
    ] {
        let config = ScenarioConfig::load(&workspace_config(name)).unwrap();
        let particles = scene::seed_particles(&config).unwrap();
        assert_eq!(particles.len(), config.particle_count, "{name}");
        assert!(
            particles.iter().all(|p| config.domain.contains(p.position, 0.0)),
            "{name}: seeded outside the domain"
        );
        if config.seeding == Seeding::GridFill {
            assert!(
                particles.iter().all(|p| config.init_box.contains(p.position, 0.0)),
                "{name}: seeded outside the init box"
            );
        }
    }
}

#[test]
fn end_to_end_scenario_runs_through_the_runner() {
    let mut config = ScenarioConfig::load(&workspace_config("end_to_end_1024.json")).unwrap();
    config.max_ticks = Some(20);
    let mut runner = build_simulation(&config).unwrap();
    runner.start();
    runner.join().unwrap();

    assert_eq!(runner.state(), RunnerState::Finished);
    let snapshot = runner.snapshot().unwrap();
    assert_eq!(snapshot.tick, 20);
    assert_eq!(snapshot.particles.len(), 1024);
    assert_eq!(snapshot.metrics.non_finite, 0);
    assert!(snapshot
        .particles
        .iter()
        .all(|p| p.position.is_finite() && p.density > 0.0));
}

#[test]
fn identical_sphere_scenarios_evolve_identically() {
    let config = ScenarioConfig::load(&workspace_config("sphere_drop.json")).unwrap();
    let run = || {
        let mut config = config.clone();
        config.max_ticks = Some(10);
        let mut runner = build_simulation(&config).unwrap();
        runner.start();
        runner.join().unwrap();
        runner.snapshot().unwrap()
    };
    let a = run();
    let b = run();
    assert_eq!(a.particles, b.particles);
}
