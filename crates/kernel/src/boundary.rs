//! Penalty forces keeping particles inside the domain box.
//!
//! Each of the six walls acts as a damped spring once a particle comes within
//! `wall_margin` (twice the particle radius, in metres) of it.

use glam::Vec3;

use crate::params::SimParams;

/// Penetration below this depth (m) is ignored.
pub const WALL_EPSILON: f32 = 1.0e-5;

/// Wall acceleration on a particle at `position` moving with `velocity`.
///
/// For every wall with inward normal `n` and penetration depth
/// `d = margin - distance * scale > WALL_EPSILON`, adds
/// `(wall_stiffness * d - wall_damping * n.v) * n`.
pub fn wall_acceleration(position: Vec3, velocity: Vec3, params: &SimParams) -> Vec3 {
    let domain = &params.domain;
    let mut accel = Vec3::ZERO;
    for (axis, normal) in Vec3::AXES.iter().enumerate() {
        let to_min = (position[axis] - domain.min[axis]) * params.sim_scale;
        accel += spring(params.wall_margin - to_min, *normal, velocity, params);

        let to_max = (domain.max[axis] - position[axis]) * params.sim_scale;
        accel += spring(params.wall_margin - to_max, -*normal, velocity, params);
    }
    accel
}

#[inline]
fn spring(depth: f32, normal: Vec3, velocity: Vec3, params: &SimParams) -> Vec3 {
    if depth > WALL_EPSILON {
        (params.wall_stiffness * depth - params.wall_damping * normal.dot(velocity)) * normal
    } else {
        Vec3::ZERO
    }
}
