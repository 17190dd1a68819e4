//! Bitonic sort of `(key, value)` entries.
//!
//! The network is executed as a sequence of [`SortPass`]es over blocks of
//! `block` entries. Merges with stride below the block size run inside one
//! block. Wider merges treat the array as a `block x (len / block)` matrix,
//! transpose it so the far-apart elements become block-local, merge, then
//! transpose back and finish the merge. The same plan drives the CPU sorter
//! here and the GPU compute dispatches.

use bytemuck::{Pod, Zeroable};
use rayon::prelude::*;

use crate::error::SimError;
use crate::particle::try_alloc;

/// Block size of the CPU sorter.
pub const BITONIC_BLOCK_SIZE: usize = 512;

/// Key of padding entries; sorts after every real cell key.
pub const SENTINEL_KEY: u32 = u32::MAX;

/// One `(cell key, particle index)` pair.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct SortEntry {
    /// Cell key.
    pub key: u32,
    /// Original particle index.
    pub value: u32,
}

/// One step of the sorting network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortPass {
    /// In-block bitonic merge. Compare-exchange strides run from `level / 2`
    /// down to 1; a pair is sorted descending when `level_mask & global_index`
    /// is non-zero.
    Merge {
        /// Size of the bitonic sequences merged in this pass.
        level: u32,
        /// Direction selector.
        level_mask: u32,
    },
    /// Matrix transpose: element `(x, y)` at `y * width + x` moves to
    /// `x * height + y`.
    Transpose {
        /// Row length of the source matrix.
        width: u32,
        /// Row count of the source matrix.
        height: u32,
    },
}

/// Entry count the sorter must handle for `count` particles.
///
/// Without padding the count itself must be a power of two; with padding it
/// is rounded up. Either way the result may not exceed `max`.
pub fn sort_length(count: usize, pad_to_power_of_two: bool, max: usize) -> Result<usize, SimError> {
    if count == 0 {
        return Err(SimError::EmptyParticleSet);
    }
    let len = if pad_to_power_of_two {
        count.next_power_of_two()
    } else if count.is_power_of_two() {
        count
    } else {
        return Err(SimError::NonPowerOfTwo { count });
    };
    if len > max {
        return Err(SimError::TooManyParticles { count: len, max });
    }
    Ok(len)
}

/// Passes sorting `len` entries (a power of two, at most `block^2`) ascending.
pub fn plan_passes(len: usize, block: usize) -> Vec<SortPass> {
    debug_assert!(len.is_power_of_two() && block.is_power_of_two());
    debug_assert!(len <= block * block);

    let block = block.min(len);
    let mut passes = Vec::new();

    let mut level = 2;
    while level <= block {
        passes.push(SortPass::Merge {
            level: level as u32,
            level_mask: level as u32,
        });
        level *= 2;
    }

    let width = block as u32;
    let height = (len / block) as u32;
    let mut level = block * 2;
    while level <= len {
        passes.push(SortPass::Transpose { width, height });
        passes.push(SortPass::Merge {
            level: (level / block) as u32,
            level_mask: ((level & !len) / block) as u32,
        });
        passes.push(SortPass::Transpose {
            width: height,
            height: width,
        });
        passes.push(SortPass::Merge {
            level: block as u32,
            level_mask: level as u32,
        });
        level *= 2;
    }
    passes
}

/// CPU bitonic sorter for a fixed entry count.
///
/// Each block of a merge pass is handled by one rayon task, mirroring a
/// workgroup. The scratch array receives transposed data.
#[derive(Debug)]
pub struct BitonicSorter {
    len: usize,
    block: usize,
    passes: Vec<SortPass>,
    scratch: Vec<SortEntry>,
}

impl BitonicSorter {
    /// Sorter for `len` entries with the default block size.
    pub fn new(len: usize) -> Result<Self, SimError> {
        Self::with_block_size(len, BITONIC_BLOCK_SIZE)
    }

    /// Sorter for `len` entries with an explicit (power-of-two) block size.
    pub fn with_block_size(len: usize, block: usize) -> Result<Self, SimError> {
        if !block.is_power_of_two() || block < 2 {
            return Err(SimError::InvalidGridSettings(format!(
                "sort block size {block} must be a power of two of at least 2"
            )));
        }
        if !len.is_power_of_two() {
            return Err(SimError::NonPowerOfTwo { count: len });
        }
        let max = block * block;
        if len > max {
            return Err(SimError::TooManyParticles { count: len, max });
        }
        Ok(Self {
            len,
            block: block.min(len),
            passes: plan_passes(len, block),
            scratch: try_alloc(len, SortEntry::default(), "sort scratch")?,
        })
    }

    /// Number of entries this sorter was built for.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false; a sorter holds at least one entry.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The pass plan.
    pub fn passes(&self) -> &[SortPass] {
        &self.passes
    }

    /// Sort `entries` by key, ascending. Order among equal keys is unspecified.
    ///
    /// # Panics
    /// If `entries.len()` differs from the length the sorter was built for.
    pub fn sort(&mut self, entries: &mut [SortEntry]) {
        assert_eq!(entries.len(), self.len, "sorter built for a different length");

        let mut in_scratch = false;
        for pass in &self.passes {
            match *pass {
                SortPass::Merge { level, level_mask } => {
                    let data = if in_scratch {
                        &mut self.scratch[..]
                    } else {
                        &mut *entries
                    };
                    merge_blocks(data, self.block, level as usize, level_mask as usize);
                }
                SortPass::Transpose { width, height } => {
                    if in_scratch {
                        transpose(&self.scratch, entries, width as usize, height as usize);
                    } else {
                        transpose(entries, &mut self.scratch, width as usize, height as usize);
                    }
                    in_scratch = !in_scratch;
                }
            }
        }
        debug_assert!(!in_scratch);
    }
}

fn merge_blocks(data: &mut [SortEntry], block: usize, level: usize, level_mask: usize) {
    data.par_chunks_mut(block)
        .enumerate()
        .for_each(|(block_index, chunk)| {
            let base = block_index * block;
            let mut stride = level >> 1;
            while stride > 0 {
                for low in 0..chunk.len() {
                    if low & stride != 0 {
                        continue;
                    }
                    let high = low | stride;
                    let descending = level_mask & (base + low) != 0;
                    if (chunk[low].key <= chunk[high].key) == descending {
                        chunk.swap(low, high);
                    }
                }
                stride >>= 1;
            }
        });
}

fn transpose(src: &[SortEntry], dst: &mut [SortEntry], width: usize, height: usize) {
    dst.par_iter_mut().enumerate().for_each(|(d, out)| {
        let (x, y) = (d / height, d % height);
        *out = src[y * width + x];
    });
}
