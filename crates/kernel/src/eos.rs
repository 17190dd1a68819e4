//! Equation of state.
//!
//! Pressure is linear in the density excess over rest density,
//! `p = k * (rho - rho0)`. Below rest density this is negative (attractive)
//! unless the deployment clamps it.

use crate::params::SimParams;

/// Smallest density ever used as a divisor (kg/m^3).
pub const MIN_DENSITY: f32 = 1.0e-6;

/// `stiffness * (density - rest_density)`.
pub fn linear_eos(density: f32, rest_density: f32, stiffness: f32) -> f32 {
    stiffness * (density - rest_density)
}

/// Pressure for `density` under the tick's pressure policy.
#[inline]
pub fn pressure(density: f32, params: &SimParams) -> f32 {
    let p = linear_eos(density, params.rest_density, params.stiffness);
    if params.clamp_pressure {
        p.max(0.0)
    } else {
        p
    }
}

/// Density made safe to divide by. NaN also maps to [`MIN_DENSITY`].
#[inline]
pub fn floor_density(density: f32) -> f32 {
    density.max(MIN_DENSITY)
}
