//! Domain controllers that move the container walls between ticks.

use sph_kernel::SimulationDomain;

use crate::config::WallAnimation;

/// Updates the domain bounds before each tick.
pub trait DomainController: Send {
    /// Write the bounds for simulated time `sim_time` (seconds) into `domain`.
    fn update(&mut self, sim_time: f64, domain: &mut SimulationDomain);
}

/// Oscillates the x-min wall inside the first half of the base extent.
///
/// Until `start_time` the wall sits at its base position. Afterwards
/// `min.x = base.min.x + L/4 + L/4 * sin(speed * t)`, where `L` is the base
/// extent along x, so the wall never crosses `base.min.x + L/2` and never
/// inverts the domain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OscillatingWall {
    base: SimulationDomain,
    speed: f32,
    start_time: f32,
}

impl OscillatingWall {
    /// A wall oscillating around `base` with the given angular speed.
    pub fn new(base: SimulationDomain, speed: f32, start_time: f32) -> Self {
        Self {
            base,
            speed,
            start_time,
        }
    }

    /// Build from scenario configuration.
    pub fn from_animation(animation: &WallAnimation, base: SimulationDomain) -> Self {
        Self::new(base, animation.speed, animation.start_time)
    }

    /// x-min wall position at simulated time `t`.
    pub fn min_x(&self, t: f64) -> f32 {
        if t <= self.start_time as f64 {
            return self.base.min.x;
        }
        let quarter = self.base.extent().x / 4.0;
        let phase = (self.speed as f64 * t).sin() as f32;
        self.base.min.x + quarter + quarter * phase
    }
}

impl DomainController for OscillatingWall {
    fn update(&mut self, sim_time: f64, domain: &mut SimulationDomain) {
        domain.min.x = self.min_x(sim_time);
    }
}
