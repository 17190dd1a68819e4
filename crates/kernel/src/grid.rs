//! Per-cell ranges into the key-sorted entry array.
//!
//! The table covers the whole key space and is rebuilt every tick: a parallel
//! clear, then one task per sorted position that compares its key with the
//! previous one and, at a boundary, writes the start of its own range and the
//! end of the previous key's range. Each slot is written by at most one
//! position, so relaxed atomic stores are enough; rayon's join at the end of
//! the pass publishes them.

use std::sync::atomic::{AtomicU32, Ordering};

use bytemuck::{Pod, Zeroable};
use rayon::prelude::*;

use crate::error::SimError;
use crate::sort::{SortEntry, SENTINEL_KEY};

/// Half-open range `[start, end)` of sorted positions sharing one key.
/// An empty cell is `start == end`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct CellRange {
    /// First sorted position.
    pub start: u32,
    /// One past the last sorted position.
    pub end: u32,
}

impl CellRange {
    /// Positions covered by the range.
    pub fn positions(&self) -> std::ops::Range<usize> {
        self.start as usize..self.end as usize
    }

    /// Whether no particle falls into the cell.
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

/// Lookup from cell key to its [`CellRange`].
#[derive(Debug)]
pub struct GridIndexTable {
    starts: Vec<AtomicU32>,
    ends: Vec<AtomicU32>,
}

impl GridIndexTable {
    /// Table for `key_count` keys, all empty.
    pub fn new(key_count: usize) -> Result<Self, SimError> {
        Ok(Self {
            starts: alloc_atomic(key_count, "grid index starts")?,
            ends: alloc_atomic(key_count, "grid index ends")?,
        })
    }

    /// Number of addressable keys.
    pub fn key_count(&self) -> usize {
        self.starts.len()
    }

    /// Reset every cell to empty.
    pub fn clear(&mut self) {
        self.starts
            .par_iter_mut()
            .zip(self.ends.par_iter_mut())
            .for_each(|(s, e)| {
                *s.get_mut() = 0;
                *e.get_mut() = 0;
            });
    }

    /// Record the range of every key present in the key-sorted `entries`.
    ///
    /// Entries with [`SENTINEL_KEY`] terminate the previous range and are
    /// otherwise ignored. The table must have been cleared since the last build.
    pub fn build(&self, entries: &[SortEntry]) {
        let len = entries.len();
        (0..len).into_par_iter().for_each(|i| {
            let key = entries[i].key;
            let prev = if i == 0 { None } else { Some(entries[i - 1].key) };

            if prev != Some(key) {
                if let Some(prev) = prev.filter(|&k| k != SENTINEL_KEY) {
                    self.ends[prev as usize].store(i as u32, Ordering::Relaxed);
                }
                if key != SENTINEL_KEY {
                    self.starts[key as usize].store(i as u32, Ordering::Relaxed);
                }
            }
            if i == len - 1 && key != SENTINEL_KEY {
                self.ends[key as usize].store(len as u32, Ordering::Relaxed);
            }
        });
    }

    /// Clear, then build from `entries`.
    pub fn rebuild(&mut self, entries: &[SortEntry]) {
        self.clear();
        self.build(entries);
    }

    /// Range for `key`; empty for keys outside the table.
    #[inline]
    pub fn range(&self, key: u32) -> CellRange {
        let k = key as usize;
        if k >= self.starts.len() {
            return CellRange::default();
        }
        CellRange {
            start: self.starts[k].load(Ordering::Relaxed),
            end: self.ends[k].load(Ordering::Relaxed),
        }
    }

    /// Copy of the whole table, for inspection and parity checks.
    pub fn to_vec(&self) -> Vec<CellRange> {
        (0..self.key_count() as u32).map(|k| self.range(k)).collect()
    }
}

fn alloc_atomic(len: usize, buffer: &'static str) -> Result<Vec<AtomicU32>, SimError> {
    let mut v = Vec::new();
    v.try_reserve_exact(len).map_err(|_| SimError::Allocation {
        buffer,
        bytes: len.saturating_mul(std::mem::size_of::<AtomicU32>()),
    })?;
    v.extend((0..len).map(|_| AtomicU32::new(0)));
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sorted(keys: &[u32]) -> Vec<SortEntry> {
        keys.iter()
            .enumerate()
            .map(|(i, &key)| SortEntry {
                key,
                value: i as u32,
            })
            .collect()
    }

    #[test]
    fn empty_table() {
        let table = GridIndexTable::new(8).unwrap();
        assert!((0..8).all(|k| table.range(k).is_empty()));
        assert!(table.range(100).is_empty());
    }

    #[test]
    fn ranges_follow_key_boundaries() {
        let mut table = GridIndexTable::new(8).unwrap();
        table.rebuild(&sorted(&[1, 1, 3, 5, 5, 5, 7, 7]));
        assert_eq!(table.range(1), CellRange { start: 0, end: 2 });
        assert_eq!(table.range(3), CellRange { start: 2, end: 3 });
        assert_eq!(table.range(5), CellRange { start: 3, end: 6 });
        assert_eq!(table.range(7), CellRange { start: 6, end: 8 });
        assert!(table.range(0).is_empty());
        assert!(table.range(6).is_empty());
    }

    #[test]
    fn sentinels_close_the_last_range() {
        let mut table = GridIndexTable::new(4).unwrap();
        table.rebuild(&sorted(&[2, 2, 2, SENTINEL_KEY]));
        assert_eq!(table.range(2), CellRange { start: 0, end: 3 });
    }

    #[test]
    fn rebuild_forgets_previous_tick() {
        let mut table = GridIndexTable::new(4).unwrap();
        table.rebuild(&sorted(&[0, 1, 2, 3]));
        table.rebuild(&sorted(&[3, 3, 3, 3]));
        assert!(table.range(0).is_empty());
        assert_eq!(table.range(3), CellRange { start: 0, end: 4 });
    }
}
