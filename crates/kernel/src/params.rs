//! Configuration surface and the per-tick parameter block.
//!
//! [`FluidParams`] is what the host configures. [`SimParams`] is derived from
//! it once per tick (together with the current domain and the resolved time
//! step) and handed by reference to every stage, so no stage reads mutable
//! shared configuration.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::error::SimError;
use crate::hash::KeyScheme;
use crate::sph;

/// Rest density used by the reference scene (kg/m^3).
pub const DEFAULT_REST_DENSITY: f32 = 600.0;
/// Particle mass used by the reference scene (kg).
pub const DEFAULT_PARTICLE_MASS: f32 = 0.000_205_43;
/// World units to metres.
pub const DEFAULT_SIMULATION_SCALE: f32 = 0.004;
/// Smoothing radius in metres.
pub const DEFAULT_SMOOTHING_RADIUS: f32 = 0.01;

/// How negative pressures from the equation of state are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PressurePolicy {
    /// Keep negative (attractive) pressure below rest density.
    #[default]
    AllowNegative,
    /// Clamp pressure to zero from below.
    ClampNonNegative,
}

/// How the integration step length is chosen each tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TimeStep {
    /// Always advance by `dt` seconds.
    Fixed {
        /// Step length in seconds.
        dt: f32,
    },
    /// Advance by the elapsed frame time, capped at `max_dt`.
    FrameClamped {
        /// Upper bound on the step length in seconds.
        max_dt: f32,
    },
}

impl Default for TimeStep {
    fn default() -> Self {
        TimeStep::Fixed { dt: 0.004 }
    }
}

impl TimeStep {
    /// Step length for a frame that took `frame_time` seconds.
    pub fn resolve(&self, frame_time: f32) -> f32 {
        match *self {
            TimeStep::Fixed { dt } => dt,
            TimeStep::FrameClamped { max_dt } => {
                if frame_time.is_finite() && frame_time > 0.0 {
                    frame_time.min(max_dt)
                } else {
                    max_dt
                }
            }
        }
    }

    fn upper_bound(&self) -> f32 {
        match *self {
            TimeStep::Fixed { dt } => dt,
            TimeStep::FrameClamped { max_dt } => max_dt,
        }
    }
}

/// Physical constants of the fluid and its container.
///
/// Every field has a default, so a JSON object only needs to name what it
/// overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FluidParams {
    /// Rest density (kg/m^3).
    pub rest_density: f32,
    /// Equation-of-state stiffness.
    pub pressure_stiffness: f32,
    /// Mass of every particle (kg).
    pub particle_mass: f32,
    /// Multiplier from world units to simulation metres.
    pub simulation_scale: f32,
    /// Smoothing radius `h` in simulation metres.
    pub smoothing_radius: f32,
    /// Viscosity coefficient.
    pub viscosity: f32,
    /// Speed clamp in m/s.
    pub velocity_limit: f32,
    /// Particle radius in simulation metres; the wall margin is twice this.
    pub particle_radius: f32,
    /// Wall penalty spring constant.
    pub wall_stiffness: f32,
    /// Wall penalty damping constant.
    pub wall_damping: f32,
    /// Gravitational acceleration (m/s^2).
    pub gravity: Vec3,
    /// Negative pressure handling.
    pub pressure_policy: PressurePolicy,
    /// Step length policy.
    pub timestep: TimeStep,
}

impl Default for FluidParams {
    fn default() -> Self {
        Self {
            rest_density: DEFAULT_REST_DENSITY,
            pressure_stiffness: 3.0,
            particle_mass: DEFAULT_PARTICLE_MASS,
            simulation_scale: DEFAULT_SIMULATION_SCALE,
            smoothing_radius: DEFAULT_SMOOTHING_RADIUS,
            viscosity: 0.2,
            velocity_limit: 200.0,
            particle_radius: 0.004,
            wall_stiffness: 10_000.0,
            wall_damping: 256.0,
            gravity: Vec3::new(0.0, -10.0, 0.0),
            pressure_policy: PressurePolicy::AllowNegative,
            timestep: TimeStep::default(),
        }
    }
}

impl FluidParams {
    /// Reject non-finite or out-of-range constants.
    pub fn validate(&self) -> Result<(), SimError> {
        let positive = [
            ("rest_density", self.rest_density),
            ("particle_mass", self.particle_mass),
            ("simulation_scale", self.simulation_scale),
            ("smoothing_radius", self.smoothing_radius),
            ("velocity_limit", self.velocity_limit),
            ("timestep", self.timestep.upper_bound()),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(SimError::InvalidParameter { name, value });
            }
        }

        let non_negative = [
            ("pressure_stiffness", self.pressure_stiffness),
            ("viscosity", self.viscosity),
            ("particle_radius", self.particle_radius),
            ("wall_stiffness", self.wall_stiffness),
            ("wall_damping", self.wall_damping),
        ];
        for (name, value) in non_negative {
            if !(value.is_finite() && value >= 0.0) {
                return Err(SimError::InvalidParameter { name, value });
            }
        }

        if let Some(&value) = self.gravity.to_array().iter().find(|g| !g.is_finite()) {
            return Err(SimError::InvalidParameter {
                name: "gravity",
                value,
            });
        }
        Ok(())
    }

    /// Grid cell edge length in world units (`h / scale`).
    pub fn cell_size(&self) -> f32 {
        self.smoothing_radius / self.simulation_scale
    }

    /// Rest spacing between particles in world units, `cbrt(m / rho0) / scale`.
    pub fn rest_spacing(&self) -> f32 {
        (self.particle_mass / self.rest_density).cbrt() / self.simulation_scale
    }
}

/// Axis-aligned box bounding the fluid, in world units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimulationDomain {
    /// Minimum corner.
    pub min: Vec3,
    /// Maximum corner.
    pub max: Vec3,
}

impl Default for SimulationDomain {
    fn default() -> Self {
        Self {
            min: Vec3::new(0.0, 0.0, -10.0),
            max: Vec3::new(20.0, 50.0, 10.0),
        }
    }
}

impl SimulationDomain {
    /// Build a domain from its two corners.
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Require `min <= max` on every axis with finite components.
    ///
    /// A flat axis is allowed; particles on it are pinned by both walls.
    pub fn validate(&self) -> Result<(), SimError> {
        for axis in 0..3 {
            let (min, max) = (self.min[axis], self.max[axis]);
            if !(min.is_finite() && max.is_finite() && min <= max) {
                return Err(SimError::InvalidDomain { axis, min, max });
            }
        }
        Ok(())
    }

    /// Edge lengths.
    pub fn extent(&self) -> Vec3 {
        self.max - self.min
    }

    /// Whether `p` lies inside the box grown by `tolerance` on every side.
    pub fn contains(&self, p: Vec3, tolerance: f32) -> bool {
        p.cmpge(self.min - Vec3::splat(tolerance)).all()
            && p.cmple(self.max + Vec3::splat(tolerance)).all()
    }
}

/// Key-space settings, fixed for the life of a simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridSettings {
    /// How cell coordinates are packed into a key.
    pub key_scheme: KeyScheme,
    /// Bits per axis; the table holds `2^(3 * bits)` cells.
    pub bits_per_axis: u32,
    /// Pad the sort array with sentinel keys up to the next power of two.
    pub pad_to_power_of_two: bool,
}

/// Largest supported `bits_per_axis` (16M cells).
pub const MAX_BITS_PER_AXIS: u32 = 8;

impl Default for GridSettings {
    fn default() -> Self {
        Self {
            key_scheme: KeyScheme::Linear,
            bits_per_axis: 6,
            pad_to_power_of_two: false,
        }
    }
}

impl GridSettings {
    /// Require `1 <= bits_per_axis <= MAX_BITS_PER_AXIS`.
    pub fn validate(&self) -> Result<(), SimError> {
        if self.bits_per_axis == 0 || self.bits_per_axis > MAX_BITS_PER_AXIS {
            return Err(SimError::InvalidGridSettings(format!(
                "bits_per_axis must be in 1..={MAX_BITS_PER_AXIS}, got {}",
                self.bits_per_axis
            )));
        }
        Ok(())
    }

    /// Cells per axis.
    pub fn cells_per_axis(&self) -> u32 {
        1 << self.bits_per_axis
    }

    /// Size of the whole key space.
    pub fn key_count(&self) -> usize {
        1usize << (3 * self.bits_per_axis)
    }
}

/// Immutable per-tick parameter block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimParams {
    /// Step length for this tick (s).
    pub dt: f32,
    /// Smoothing radius (m).
    pub h: f32,
    /// `h * h`.
    pub h2: f32,
    /// Poly6 normalisation `315 / (64 pi h^9)`.
    pub poly6_coef: f32,
    /// Spiky gradient coefficient `-45 / (pi h^6)`.
    pub spiky_grad_coef: f32,
    /// Viscosity Laplacian coefficient `45 / (pi h^6)`.
    pub lap_coef: f32,
    /// Particle mass (kg).
    pub mass: f32,
    /// Rest density (kg/m^3).
    pub rest_density: f32,
    /// Equation-of-state stiffness.
    pub stiffness: f32,
    /// Clamp pressure to be non-negative.
    pub clamp_pressure: bool,
    /// Viscosity coefficient.
    pub viscosity: f32,
    /// Speed clamp (m/s).
    pub velocity_limit: f32,
    /// World units to metres.
    pub sim_scale: f32,
    /// Distance (m) from a wall at which the penalty starts.
    pub wall_margin: f32,
    /// Wall spring constant.
    pub wall_stiffness: f32,
    /// Wall damping constant.
    pub wall_damping: f32,
    /// Gravity (m/s^2).
    pub gravity: Vec3,
    /// Domain for this tick.
    pub domain: SimulationDomain,
    /// Cell edge in world units.
    pub cell_size: f32,
}

impl SimParams {
    /// Derive the parameter block for one tick.
    pub fn new(fluid: &FluidParams, domain: &SimulationDomain, dt: f32) -> Self {
        let h = fluid.smoothing_radius;
        Self {
            dt,
            h,
            h2: h * h,
            poly6_coef: sph::poly6_coef(h),
            spiky_grad_coef: sph::spiky_grad_coef(h),
            lap_coef: sph::viscosity_laplacian_coef(h),
            mass: fluid.particle_mass,
            rest_density: fluid.rest_density,
            stiffness: fluid.pressure_stiffness,
            clamp_pressure: fluid.pressure_policy == PressurePolicy::ClampNonNegative,
            viscosity: fluid.viscosity,
            velocity_limit: fluid.velocity_limit,
            sim_scale: fluid.simulation_scale,
            wall_margin: 2.0 * fluid.particle_radius,
            wall_stiffness: fluid.wall_stiffness,
            wall_damping: fluid.wall_damping,
            gravity: fluid.gravity,
            domain: *domain,
            cell_size: fluid.cell_size(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(FluidParams::default().validate().is_ok());
        assert!(SimulationDomain::default().validate().is_ok());
        assert!(GridSettings::default().validate().is_ok());
    }

    #[test]
    fn inverted_domain_is_rejected() {
        let domain = SimulationDomain::new(Vec3::new(0.0, 10.0, 0.0), Vec3::new(5.0, 1.0, 5.0));
        assert_eq!(
            domain.validate(),
            Err(SimError::InvalidDomain {
                axis: 1,
                min: 10.0,
                max: 1.0
            })
        );
    }

    #[test]
    fn flat_domain_is_accepted() {
        let domain = SimulationDomain::new(Vec3::new(0.0, 3.0, 0.0), Vec3::new(5.0, 3.0, 5.0));
        assert!(domain.validate().is_ok());
        assert!(domain.contains(Vec3::new(1.0, 3.0, 1.0), 0.0));

        let nan = SimulationDomain::new(Vec3::ZERO, Vec3::new(5.0, f32::NAN, 5.0));
        assert!(matches!(
            nan.validate(),
            Err(SimError::InvalidDomain { axis: 1, .. })
        ));
    }

    #[test]
    fn non_positive_mass_is_rejected() {
        let params = FluidParams {
            particle_mass: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            params.validate(),
            Err(SimError::InvalidParameter {
                name: "particle_mass",
                ..
            })
        ));
    }

    #[test]
    fn nan_gravity_is_rejected() {
        let params = FluidParams {
            gravity: Vec3::new(0.0, f32::NAN, 0.0),
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn frame_clamped_step_caps_elapsed_time() {
        let step = TimeStep::FrameClamped { max_dt: 0.005 };
        assert_eq!(step.resolve(0.001), 0.001);
        assert_eq!(step.resolve(0.5), 0.005);
        assert_eq!(step.resolve(f32::NAN), 0.005);
        assert_eq!(TimeStep::Fixed { dt: 0.004 }.resolve(1.0), 0.004);
    }

    #[test]
    fn grid_bits_are_bounded() {
        let mut grid = GridSettings::default();
        assert_eq!(grid.key_count(), 1 << 18);
        grid.bits_per_axis = MAX_BITS_PER_AXIS + 1;
        assert!(grid.validate().is_err());
        grid.bits_per_axis = 0;
        assert!(grid.validate().is_err());
    }

    #[test]
    fn fluid_params_parse_with_partial_json() {
        let params: FluidParams = serde_json::from_str(
            r#"{ "viscosity": 0.5, "timestep": { "mode": "frame_clamped", "max_dt": 0.005 } }"#,
        )
        .unwrap();
        assert_eq!(params.viscosity, 0.5);
        assert_eq!(params.rest_density, DEFAULT_REST_DENSITY);
        assert_eq!(params.timestep, TimeStep::FrameClamped { max_dt: 0.005 });
    }

    #[test]
    fn derived_cell_size_matches_scale() {
        let params = FluidParams::default();
        let sim = SimParams::new(&params, &SimulationDomain::default(), 0.004);
        assert!((sim.cell_size - 2.5).abs() < 1e-5);
        assert!((sim.wall_margin - 0.008).abs() < 1e-7);
        assert!(sim.h2 > 0.0);
    }
}
