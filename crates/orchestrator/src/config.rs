//! Scenario configuration parsing and validation

use glam::Vec3;
use serde::{Deserialize, Serialize};
use sph_kernel::{FluidParams, GridSettings, SimulationDomain};
use std::fs;

/// One simulation scenario, as read from a JSON file.
///
/// Only `name` and `particle_count` are required; everything else has the
/// defaults of the reference scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioConfig {
    /// Human-readable scenario name
    pub name: String,
    /// Number of particles, fixed for the whole run
    pub particle_count: usize,
    /// Initial placement strategy
    #[serde(default)]
    pub seeding: Seeding,
    /// Container bounds (world units)
    #[serde(default)]
    pub domain: SimulationDomain,
    /// Sub-box filled by [`Seeding::GridFill`] (world units)
    #[serde(default = "default_init_box")]
    pub init_box: SimulationDomain,
    /// Fluid constants
    #[serde(default)]
    pub fluid: FluidParams,
    /// Key space of the spatial grid
    #[serde(default)]
    pub grid: GridSettings,
    /// Which backend runs the ticks
    #[serde(default)]
    pub backend: BackendType,
    /// Optional oscillating wall on the x-min side
    #[serde(default)]
    pub wall: Option<WallAnimation>,
    /// Stop after this many ticks
    #[serde(default)]
    pub max_ticks: Option<u64>,
    /// Ticks between metric log lines
    #[serde(default = "default_log_interval")]
    pub log_interval: u64,
}

/// Initial particle placement.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Seeding {
    /// Regular lattice inside `init_box`, bottom layer first
    #[default]
    GridFill,
    /// Uniformly random points inside a sphere
    Sphere {
        /// Sphere centre (world units)
        center: Vec3,
        /// Sphere radius (world units)
        radius: f32,
        /// RNG seed, so runs are reproducible
        #[serde(default)]
        seed: u64,
    },
}

/// Simulation backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendType {
    /// Data-parallel CPU kernel
    #[default]
    Cpu,
    /// wgpu compute kernel; falls back to the CPU when unavailable
    Gpu,
}

/// Oscillating x-min wall.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WallAnimation {
    /// Angular speed of the oscillation (rad/s)
    #[serde(default = "default_wall_speed")]
    pub speed: f32,
    /// Simulated time before the wall starts moving (s)
    #[serde(default = "default_wall_start")]
    pub start_time: f32,
}

// Default values
fn default_init_box() -> SimulationDomain {
    SimulationDomain::new(Vec3::new(0.0, 0.0, -10.0), Vec3::new(10.0, 20.0, 10.0))
}

fn default_log_interval() -> u64 {
    100
}

fn default_wall_speed() -> f32 {
    1.0
}

fn default_wall_start() -> f32 {
    10.0
}

impl Default for WallAnimation {
    fn default() -> Self {
        Self {
            speed: default_wall_speed(),
            start_time: default_wall_start(),
        }
    }
}

impl ScenarioConfig {
    /// A scenario with every optional field at its default.
    pub fn new(name: impl Into<String>, particle_count: usize) -> Self {
        Self {
            name: name.into(),
            particle_count,
            seeding: Seeding::default(),
            domain: SimulationDomain::default(),
            init_box: default_init_box(),
            fluid: FluidParams::default(),
            grid: GridSettings::default(),
            backend: BackendType::default(),
            wall: None,
            max_ticks: None,
            log_interval: default_log_interval(),
        }
    }

    /// Load configuration from a JSON file
    pub fn load(path: &str) -> Result<Self, String> {
        let contents = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {}", path, e))?;

        let config = Self::from_json(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a JSON string (not validated)
    pub fn from_json(json: &str) -> Result<Self, String> {
        serde_json::from_str(json).map_err(|e| format!("Failed to parse config JSON: {}", e))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.particle_count == 0 {
            return Err("particle_count must be at least 1".to_string());
        }

        self.domain
            .validate()
            .map_err(|e| format!("Invalid domain: {}", e))?;
        self.init_box
            .validate()
            .map_err(|e| format!("Invalid init_box: {}", e))?;
        self.fluid
            .validate()
            .map_err(|e| format!("Invalid fluid parameters: {}", e))?;
        self.grid
            .validate()
            .map_err(|e| format!("Invalid grid settings: {}", e))?;

        if let Seeding::Sphere { center, radius, .. } = self.seeding {
            if !(radius.is_finite() && radius > 0.0) {
                return Err("Sphere radius must be positive".to_string());
            }
            if !center.is_finite() {
                return Err("Sphere center must be finite".to_string());
            }
        }

        if let Some(wall) = &self.wall {
            if !wall.speed.is_finite() || !wall.start_time.is_finite() {
                return Err("Wall animation speed and start_time must be finite".to_string());
            }
        }

        if self.max_ticks == Some(0) {
            return Err("max_ticks must be at least 1".to_string());
        }

        if self.log_interval == 0 {
            return Err("log_interval must be at least 1".to_string());
        }

        Ok(())
    }
}
