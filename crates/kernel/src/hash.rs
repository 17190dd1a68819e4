//! Spatial hashing of particle positions into cell keys.
//!
//! Positions are quantised into cubes of edge `h / scale` measured from the
//! domain minimum. Each axis has `2^bits` addressable cells; coordinates
//! outside that range are clamped to the boundary cell, so every position
//! (including NaN) maps to a valid key. The packing of the three cell
//! coordinates into a key is a [`KeyScheme`], and the 3x3x3 neighbourhood
//! is walked through [`NeighborKeys`], which only knows about offsets.

use glam::{IVec3, UVec3, Vec3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::params::{GridSettings, SimParams};
use crate::particle::Particle;
use crate::sort::{SortEntry, SENTINEL_KEY};

/// Packing of integer cell coordinates into a single key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyScheme {
    /// `x | y << bits | z << 2*bits`.
    #[default]
    Linear,
    /// Bit-interleaved Z-order code.
    Morton,
}

impl KeyScheme {
    /// Pack an in-range cell. Each component must be below `1 << bits`.
    #[inline]
    pub fn pack(self, cell: UVec3, bits: u32) -> u32 {
        match self {
            KeyScheme::Linear => cell.x | (cell.y << bits) | (cell.z << (2 * bits)),
            KeyScheme::Morton => {
                expand_bits(cell.x) | (expand_bits(cell.y) << 1) | (expand_bits(cell.z) << 2)
            }
        }
    }

    /// WGSL selector value used by the GPU shaders.
    pub fn shader_id(self) -> u32 {
        match self {
            KeyScheme::Linear => 0,
            KeyScheme::Morton => 1,
        }
    }
}

/// Spread the low 10 bits of `v` so there are two zero bits between each.
#[inline]
fn expand_bits(v: u32) -> u32 {
    let mut x = v & 0x0000_03FF;
    x = (x | (x << 16)) & 0x0300_00FF;
    x = (x | (x << 8)) & 0x0300_F00F;
    x = (x | (x << 4)) & 0x030C_30C3;
    x = (x | (x << 2)) & 0x0924_9249;
    x
}

/// The 27 cell offsets of a 3x3x3 neighbourhood, x fastest.
pub const NEIGHBOR_OFFSETS: [IVec3; 27] = {
    let mut offsets = [IVec3::ZERO; 27];
    let mut i = 0;
    while i < 27 {
        offsets[i] = IVec3::new(
            (i % 3) as i32 - 1,
            ((i / 3) % 3) as i32 - 1,
            (i / 9) as i32 - 1,
        );
        i += 1;
    }
    offsets
};

/// Maps positions to cell keys for one tick.
#[derive(Debug, Clone, Copy)]
pub struct SpatialHasher {
    origin: Vec3,
    inv_cell_size: f32,
    bits: u32,
    scheme: KeyScheme,
}

impl SpatialHasher {
    /// Hasher anchored at the current domain minimum.
    pub fn new(params: &SimParams, grid: &GridSettings) -> Self {
        Self::with_origin(params.domain.min, params.cell_size, grid)
    }

    /// Hasher with an explicit origin and cell size in world units.
    pub fn with_origin(origin: Vec3, cell_size: f32, grid: &GridSettings) -> Self {
        Self {
            origin,
            inv_cell_size: 1.0 / cell_size,
            bits: grid.bits_per_axis,
            scheme: grid.key_scheme,
        }
    }

    /// Cells per axis.
    #[inline]
    pub fn cells_per_axis(&self) -> i32 {
        1 << self.bits
    }

    /// Cell containing `pos`, clamped into the addressable range.
    #[inline]
    pub fn cell_of(&self, pos: Vec3) -> IVec3 {
        let scaled = ((pos - self.origin) * self.inv_cell_size).floor();
        // `as` saturates and maps NaN to 0.
        let cell = IVec3::new(scaled.x as i32, scaled.y as i32, scaled.z as i32);
        cell.clamp(IVec3::ZERO, IVec3::splat(self.cells_per_axis() - 1))
    }

    /// Key of an in-range cell.
    #[inline]
    pub fn key(&self, cell: IVec3) -> u32 {
        self.scheme.pack(cell.as_uvec3(), self.bits)
    }

    /// Key of the cell containing `pos`.
    #[inline]
    pub fn key_of(&self, pos: Vec3) -> u32 {
        self.key(self.cell_of(pos))
    }

    /// Keys of the up-to-27 cells around the cell containing `pos`.
    #[inline]
    pub fn neighbor_keys(&self, pos: Vec3) -> NeighborKeys {
        NeighborKeys {
            hasher: *self,
            center: self.cell_of(pos),
            next: 0,
        }
    }
}

/// Iterator over the keys of a cell's 3x3x3 neighbourhood.
///
/// Offsets that leave the addressable range are skipped. Distinct in-range
/// cells always pack to distinct keys, so no key is yielded twice.
#[derive(Debug, Clone)]
pub struct NeighborKeys {
    hasher: SpatialHasher,
    center: IVec3,
    next: usize,
}

impl Iterator for NeighborKeys {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        let limit = self.hasher.cells_per_axis();
        while self.next < NEIGHBOR_OFFSETS.len() {
            let cell = self.center + NEIGHBOR_OFFSETS[self.next];
            self.next += 1;
            if cell.cmpge(IVec3::ZERO).all() && cell.cmplt(IVec3::splat(limit)).all() {
                return Some(self.hasher.key(cell));
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(NEIGHBOR_OFFSETS.len() - self.next))
    }
}

/// Fill `entries` with `(key, index)` for every particle.
///
/// Slots past the particle count are padding and receive [`SENTINEL_KEY`].
pub fn hash_particles(hasher: &SpatialHasher, particles: &[Particle], entries: &mut [SortEntry]) {
    let n = particles.len();
    entries.par_iter_mut().enumerate().for_each(|(i, entry)| {
        *entry = if i < n {
            SortEntry {
                key: hasher.key_of(particles[i].position),
                value: i as u32,
            }
        } else {
            SortEntry {
                key: SENTINEL_KEY,
                value: i as u32,
            }
        };
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn hasher(scheme: KeyScheme) -> SpatialHasher {
        let grid = GridSettings {
            key_scheme: scheme,
            bits_per_axis: 4,
            pad_to_power_of_two: false,
        };
        SpatialHasher::with_origin(Vec3::ZERO, 1.0, &grid)
    }

    #[test]
    fn offsets_cover_neighbourhood_once() {
        let unique: HashSet<_> = NEIGHBOR_OFFSETS.iter().map(|o| o.to_array()).collect();
        assert_eq!(unique.len(), 27);
        assert!(NEIGHBOR_OFFSETS.iter().all(|o| o.abs().max_element() <= 1));
        assert_eq!(NEIGHBOR_OFFSETS[13], IVec3::ZERO);
    }

    #[test]
    fn out_of_range_positions_clamp_to_edge() {
        let h = hasher(KeyScheme::Linear);
        assert_eq!(h.cell_of(Vec3::splat(-50.0)), IVec3::ZERO);
        assert_eq!(h.cell_of(Vec3::splat(1.0e9)), IVec3::splat(15));
        assert_eq!(h.cell_of(Vec3::new(f32::NAN, 2.5, f32::INFINITY)), IVec3::new(0, 2, 15));
    }

    #[test]
    fn linear_and_morton_are_bijective() {
        for scheme in [KeyScheme::Linear, KeyScheme::Morton] {
            let h = hasher(scheme);
            let mut keys = HashSet::new();
            for z in 0..16 {
                for y in 0..16 {
                    for x in 0..16 {
                        let key = h.key(IVec3::new(x, y, z));
                        assert!(key < 4096, "{scheme:?} key {key} out of range");
                        keys.insert(key);
                    }
                }
            }
            assert_eq!(keys.len(), 4096, "{scheme:?} packing collided");
        }
    }

    #[test]
    fn morton_interleaves_axes() {
        assert_eq!(KeyScheme::Morton.pack(UVec3::new(1, 0, 0), 4), 0b001);
        assert_eq!(KeyScheme::Morton.pack(UVec3::new(0, 1, 0), 4), 0b010);
        assert_eq!(KeyScheme::Morton.pack(UVec3::new(0, 0, 1), 4), 0b100);
        assert_eq!(KeyScheme::Morton.pack(UVec3::new(3, 0, 0), 4), 0b1001);
    }

    #[test]
    fn interior_cell_has_27_neighbours() {
        let h = hasher(KeyScheme::Linear);
        let keys: Vec<u32> = h.neighbor_keys(Vec3::splat(5.5)).collect();
        assert_eq!(keys.len(), 27);
        assert!(keys.contains(&h.key_of(Vec3::splat(5.5))));
    }

    #[test]
    fn corner_cell_skips_missing_neighbours() {
        let h = hasher(KeyScheme::Morton);
        let keys: Vec<u32> = h.neighbor_keys(Vec3::splat(0.5)).collect();
        assert_eq!(keys.len(), 8);
        let unique: HashSet<_> = keys.iter().collect();
        assert_eq!(unique.len(), 8);
    }

    #[test]
    fn padding_slots_get_sentinels() {
        let h = hasher(KeyScheme::Linear);
        let particles = vec![Particle::at_rest(Vec3::new(1.5, 0.5, 0.5)); 3];
        let mut entries = vec![SortEntry::default(); 4];
        hash_particles(&h, &particles, &mut entries);
        assert_eq!(entries[0], SortEntry { key: 1, value: 0 });
        assert_eq!(entries[2].value, 2);
        assert_eq!(entries[3], SortEntry { key: SENTINEL_KEY, value: 3 });
    }
}
