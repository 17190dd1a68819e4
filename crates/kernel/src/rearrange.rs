//! Gather of particle state into key-sorted order.

use std::sync::atomic::{AtomicU32, Ordering};

use rayon::prelude::*;

use crate::particle::Particle;
use crate::sort::SortEntry;

/// Copy `source[entries[i].value]` into `sorted[i]` for every particle, and
/// record `rank[entries[i].value] = i` so results can be scattered back to
/// original indices.
///
/// `entries` must be key-sorted with any sentinel padding at the tail; only
/// the first `sorted.len()` entries are read.
pub fn rearrange(
    source: &[Particle],
    entries: &[SortEntry],
    sorted: &mut [Particle],
    rank: &[AtomicU32],
) {
    let n = sorted.len();
    debug_assert_eq!(source.len(), n);
    debug_assert_eq!(rank.len(), n);

    sorted
        .par_iter_mut()
        .zip(entries[..n].par_iter())
        .enumerate()
        .for_each(|(i, (dst, entry))| {
            let original = entry.value as usize;
            *dst = source[original];
            rank[original].store(i as u32, Ordering::Relaxed);
        });
}
