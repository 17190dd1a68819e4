//! Error type shared by every backend.
//!
//! Everything except [`SimError::Device`] is a configuration or resource
//! problem detected at construction, before the first tick runs.

use std::fmt;

/// Failure raised while building or running a simulation.
#[derive(Debug, Clone, PartialEq)]
pub enum SimError {
    /// The bitonic sorter needs a power-of-two entry count and padding is off.
    NonPowerOfTwo {
        /// Requested particle count.
        count: usize,
    },
    /// The (possibly padded) sort length exceeds what the sorter can handle.
    TooManyParticles {
        /// Entries that would have to be sorted.
        count: usize,
        /// Largest supported sort length for the backend.
        max: usize,
    },
    /// A simulation needs at least one particle.
    EmptyParticleSet,
    /// Domain minimum is above the maximum, or not finite, on some axis.
    InvalidDomain {
        /// Offending axis (0 = x, 1 = y, 2 = z).
        axis: usize,
        /// Minimum corner component.
        min: f32,
        /// Maximum corner component.
        max: f32,
    },
    /// The initial domain does not fit inside the addressable key space.
    DomainExceedsKeySpace {
        /// Cells the domain needs along its widest axis.
        cells_needed: u32,
        /// Cells the key packing can address per axis.
        cells_available: u32,
    },
    /// A physical constant is out of range or non-finite.
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// Rejected value.
        value: f32,
    },
    /// Key-space settings are unusable.
    InvalidGridSettings(String),
    /// Allocating a buffer failed.
    Allocation {
        /// Which buffer.
        buffer: &'static str,
        /// Requested size in bytes.
        bytes: usize,
    },
    /// Adapter, device or readback failure in the GPU backend.
    Device(String),
}

impl fmt::Display for SimError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimError::NonPowerOfTwo { count } => write!(
                f,
                "particle count {count} is not a power of two (enable padding to accept it)"
            ),
            SimError::TooManyParticles { count, max } => {
                write!(f, "sort length {count} exceeds the supported maximum of {max}")
            }
            SimError::EmptyParticleSet => write!(f, "simulation needs at least one particle"),
            SimError::InvalidDomain { axis, min, max } => write!(
                f,
                "domain min must not exceed max on axis {}: min={min}, max={max}",
                ["x", "y", "z"][*axis]
            ),
            SimError::DomainExceedsKeySpace {
                cells_needed,
                cells_available,
            } => write!(
                f,
                "domain spans {cells_needed} cells on an axis \
                 but the key packing addresses only {cells_available}"
            ),
            SimError::InvalidParameter { name, value } => {
                write!(f, "invalid value for {name}: {value}")
            }
            SimError::InvalidGridSettings(msg) => write!(f, "invalid grid settings: {msg}"),
            SimError::Allocation { buffer, bytes } => {
                write!(f, "failed to allocate {bytes} bytes for {buffer}")
            }
            SimError::Device(msg) => write!(f, "GPU device error: {msg}"),
        }
    }
}

impl std::error::Error for SimError {}
