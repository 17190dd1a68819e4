//! The reference scenarios, shared by the test suite and the binary.

use crate::{
    project_path, ContainmentCheck, DensityBandCheck, ExpectedResult, ReferenceTest,
    SettlingCheck,
};

/// 1024 particles packed into a 10^3 box inside a 50^3 domain, 100 ticks.
/// Mean density should come back within 15% of rest density.
pub fn end_to_end_density() -> ReferenceTest {
    ReferenceTest {
        name: "End-to-End Density".to_string(),
        config_path: project_path("configs/end_to_end_1024.json"),
        ticks: Some(100),
        expected: ExpectedResult {
            finite: true,
            containment: None,
            mean_density: Some(DensityBandCheck { tolerance: 0.15 }),
            settling: None,
        },
    }
}

/// The same scenario, checked only for finite state.
pub fn end_to_end_stability() -> ReferenceTest {
    ReferenceTest {
        name: "End-to-End Stability".to_string(),
        config_path: project_path("configs/end_to_end_1024.json"),
        ticks: Some(100),
        expected: ExpectedResult {
            finite: true,
            ..Default::default()
        },
    }
}

/// Fluid column released in the reference container collapses and stays
/// inside the walls.
pub fn dam_break() -> ReferenceTest {
    ReferenceTest {
        name: "Dam Break".to_string(),
        config_path: project_path("configs/dam_break.json"),
        ticks: None,
        expected: ExpectedResult {
            finite: true,
            containment: Some(ContainmentCheck { tolerance: 1.0 }),
            mean_density: None,
            settling: Some(SettlingCheck { max_height: 20.0 }),
        },
    }
}

/// A ball of fluid falls onto the floor.
pub fn sphere_drop() -> ReferenceTest {
    ReferenceTest {
        name: "Sphere Drop".to_string(),
        config_path: project_path("configs/sphere_drop.json"),
        ticks: None,
        expected: ExpectedResult {
            finite: true,
            containment: Some(ContainmentCheck { tolerance: 1.0 }),
            mean_density: None,
            settling: Some(SettlingCheck { max_height: 25.0 }),
        },
    }
}

/// The x-min wall oscillates after 10 s of simulated time.
pub fn moving_wall() -> ReferenceTest {
    ReferenceTest {
        name: "Moving Wall".to_string(),
        config_path: project_path("configs/moving_wall.json"),
        ticks: None,
        expected: ExpectedResult {
            finite: true,
            // The driven wall compresses the fluid against the far walls; the
            // penalty spring then lets the outer layer sink up to ~2.6 units
            // past the wall plane.
            containment: Some(ContainmentCheck { tolerance: 3.0 }),
            mean_density: None,
            settling: None,
        },
    }
}

/// Get all reference tests
pub fn all_tests() -> Vec<ReferenceTest> {
    vec![
        end_to_end_stability(),
        end_to_end_density(),
        dam_break(),
        sphere_drop(),
        moving_wall(),
    ]
}
