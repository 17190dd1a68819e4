//! Reference test binary entry point
//!
//! Runs every reference scenario and prints a summary. Pass `--gpu` to run
//! on the GPU backend (falls back to the CPU when unavailable).

use reference_tests::{scenarios, TestResult};
use sph_orchestrator::BackendType;

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .init();

    let backend = if std::env::args().any(|a| a == "--gpu") {
        BackendType::Gpu
    } else {
        BackendType::Cpu
    };

    tracing::info!("SPH Reference Test Suite");
    tracing::info!("========================");

    let tests = scenarios::all_tests();
    tracing::info!("Found {} reference tests, backend {:?}", tests.len(), backend);

    let mut results: Vec<TestResult> = Vec::new();
    let mut passed_count = 0;
    let mut failed_count = 0;

    for test in tests {
        match test.run_on(backend) {
            Ok(result) => {
                if result.passed {
                    passed_count += 1;
                } else {
                    failed_count += 1;
                }
                result.print_summary();
                results.push(result);
            }
            Err(e) => {
                eprintln!("\nERROR running test {}: {}", test.name, e);
                failed_count += 1;
            }
        }
    }

    println!("\n{}", "=".repeat(80));
    println!("OVERALL SUMMARY");
    println!("{}", "=".repeat(80));
    println!("Total tests: {}", results.len());
    println!("Passed: {}", passed_count);
    println!("Failed: {}", failed_count);
    println!("{}", "=".repeat(80));

    if failed_count > 0 {
        std::process::exit(1);
    }
}
