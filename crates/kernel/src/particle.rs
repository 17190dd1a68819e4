//! Particle state and the two-bank (ping-pong) particle buffer.

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use crate::error::SimError;

/// State of one particle.
///
/// The layout matches a WGSL struct of three `vec3<f32>` members each followed
/// by a scalar, so the same bytes can be uploaded to a storage buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct Particle {
    /// Position in world units.
    pub position: Vec3,
    /// Density from the last density pass (kg/m^3).
    pub density: f32,
    /// Velocity (m/s).
    pub velocity: Vec3,
    /// Pressure from the last density pass.
    pub pressure: f32,
    /// Acceleration from the last force pass (m/s^2).
    pub force: Vec3,
    _pad: f32,
}

impl Particle {
    /// A particle at rest at `position`.
    pub fn at_rest(position: Vec3) -> Self {
        Self::new(position, Vec3::ZERO)
    }

    /// A particle with an initial velocity.
    pub fn new(position: Vec3, velocity: Vec3) -> Self {
        Self {
            position,
            velocity,
            ..Self::zeroed()
        }
    }

    /// Whether every field is finite.
    pub fn is_finite(&self) -> bool {
        self.position.is_finite()
            && self.velocity.is_finite()
            && self.force.is_finite()
            && self.density.is_finite()
            && self.pressure.is_finite()
    }
}

/// Allocate `len` copies of `fill`, reporting failure instead of aborting.
pub(crate) fn try_alloc<T: Clone>(
    len: usize,
    fill: T,
    buffer: &'static str,
) -> Result<Vec<T>, SimError> {
    let mut v = Vec::new();
    v.try_reserve_exact(len).map_err(|_| SimError::Allocation {
        buffer,
        bytes: len.saturating_mul(std::mem::size_of::<T>()),
    })?;
    v.resize(len, fill);
    Ok(v)
}

/// Two banks of particle state with a read/write indirection.
///
/// Each tick reads one bank and writes the other; [`swap`](Self::swap) flips
/// the roles once the tick has fully completed. Particle `i` lives at index
/// `i` in both banks.
#[derive(Debug, Clone)]
pub struct ParticleBuffer {
    banks: [Vec<Particle>; 2],
    read: usize,
}

impl ParticleBuffer {
    /// Take ownership of the initial state and allocate the second bank.
    pub fn new(initial: Vec<Particle>) -> Result<Self, SimError> {
        if initial.is_empty() {
            return Err(SimError::EmptyParticleSet);
        }
        let write = try_alloc(initial.len(), Particle::zeroed(), "particle write bank")?;
        Ok(Self {
            banks: [initial, write],
            read: 0,
        })
    }

    /// Number of particles.
    pub fn len(&self) -> usize {
        self.banks[0].len()
    }

    /// Always false; construction rejects empty sets.
    pub fn is_empty(&self) -> bool {
        self.banks[0].is_empty()
    }

    /// State after the most recently completed tick.
    pub fn read(&self) -> &[Particle] {
        &self.banks[self.read]
    }

    /// Index of the bank currently being read.
    pub fn read_index(&self) -> usize {
        self.read
    }

    /// Borrow the read bank immutably and the write bank mutably.
    pub fn split(&mut self) -> (&[Particle], &mut [Particle]) {
        let (first, second) = self.banks.split_at_mut(1);
        if self.read == 0 {
            (&first[0], &mut second[0])
        } else {
            (&second[0], &mut first[0])
        }
    }

    /// Make the write bank the new read bank.
    pub fn swap(&mut self) {
        self.read ^= 1;
    }
}
