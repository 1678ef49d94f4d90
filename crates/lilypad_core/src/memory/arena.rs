//! # Arena Pool Manager
//!
//! Grows the heap by mapping new regions and registering them with the TLSF
//! pool. Arenas are never released individually: they live until the heap
//! is torn down and are then released together.

// SAFETY: arenas hand their mapped memory to the pool; the region is owned
// by the `Arena` and outlives every block carved from it.
#![allow(unsafe_code)]

use super::pages::{MappedRegion, PageSource};
use super::pool::{Tlsf, ALIGN_SIZE, POOL_OVERHEAD};
use crate::error::{MemoryError, MemoryResult};

/// A mapped region registered with the pool.
#[derive(Debug)]
pub struct Arena {
    region: MappedRegion,
    capacity: usize,
}

impl Arena {
    /// Usable pool bytes in this arena (mapping minus pool overhead).
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes actually mapped for this arena.
    #[inline]
    #[must_use]
    pub fn mapped_len(&self) -> usize {
        self.region.len()
    }
}

/// Arena capacity for a request of `size` user bytes whose pool block needs
/// `block_request` bytes: `max(grow_increment, size * 2, block_request)`.
///
/// Returns `None` on arithmetic overflow.
#[must_use]
pub fn arena_capacity(grow_increment: usize, size: usize, block_request: usize) -> Option<usize> {
    let doubled = size.checked_mul(2)?;
    let capacity = grow_increment.max(doubled).max(block_request);
    capacity.checked_add(ALIGN_SIZE - 1).map(|c| c & !(ALIGN_SIZE - 1))
}

/// All arenas of one heap, oldest first.
#[derive(Debug, Default)]
pub(crate) struct ArenaList {
    arenas: Vec<Arena>,
}

impl ArenaList {
    pub(crate) const fn new() -> Self {
        Self { arenas: Vec::new() }
    }

    /// Number of arenas created so far.
    pub(crate) fn count(&self) -> usize {
        self.arenas.len()
    }

    /// Total bytes mapped for arenas.
    pub(crate) fn mapped_bytes(&self) -> usize {
        self.arenas.iter().map(Arena::mapped_len).sum()
    }

    /// Capacity of every arena, oldest first.
    pub(crate) fn capacities(&self) -> Vec<usize> {
        self.arenas.iter().map(Arena::capacity).collect()
    }

    /// Maps one arena large enough for `size` user bytes aligned to `align`
    /// (`tracked` bytes including the ledger record) and adds it to `pool`.
    ///
    /// Returns the new arena's capacity.
    pub(crate) fn grow(
        &mut self,
        pool: &mut Tlsf,
        pages: &dyn PageSource,
        grow_increment: usize,
        size: usize,
        tracked: usize,
        align: usize,
    ) -> MemoryResult<usize> {
        let block_request = Tlsf::pool_size_for(tracked, align)
            .ok_or(MemoryError::OutOfMemory { requested: tracked })?;
        let capacity = arena_capacity(grow_increment, size, block_request)
            .ok_or(MemoryError::OutOfMemory { requested: tracked })?;
        let mapped = capacity
            .checked_add(POOL_OVERHEAD)
            .ok_or(MemoryError::OutOfMemory { requested: capacity })?;

        let mut region = pages.map(mapped)?;
        // SAFETY: the region is freshly mapped, exclusively owned by the
        // arena pushed below, and stays mapped until `release_all`.
        let added = unsafe { pool.add_pool(region.as_mut_ptr(), region.len()) };
        if !added {
            tracing::error!(mapped, "arena rejected by pool");
            return Err(MemoryError::OutOfMemory { requested: mapped });
        }

        self.arenas.push(Arena { region, capacity });
        tracing::debug!(
            capacity,
            request = size,
            arenas = self.arenas.len(),
            "heap grew by one arena"
        );
        Ok(capacity)
    }

    /// Unmaps every arena. The pool must not be used afterwards.
    pub(crate) fn release_all(&mut self) -> usize {
        let released = self.arenas.len();
        self.arenas.clear();
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::pages::{AnonymousPages, BudgetedPages};

    #[test]
    fn test_arena_capacity_policy() {
        assert_eq!(arena_capacity(4096, 32, 128), Some(4096));
        assert_eq!(arena_capacity(4096, 10_000, 10_200), Some(20_000));
        assert_eq!(arena_capacity(4096, 3000, 6200), Some(6208));
        assert_eq!(arena_capacity(4096, usize::MAX, 0), None);
    }

    #[test]
    fn test_grow_registers_usable_pool() {
        let mut pool = Box::new(Tlsf::new());
        let mut arenas = ArenaList::new();

        let capacity = arenas
            .grow(&mut pool, &AnonymousPages, 4096, 100, 200, 8)
            .unwrap();
        assert_eq!(capacity, 4096);
        assert_eq!(arenas.count(), 1);
        assert!(arenas.mapped_bytes() >= 4096 + POOL_OVERHEAD);
        assert!(pool.alloc(200, 8).is_some());
        assert!(pool.check());

        assert_eq!(arenas.release_all(), 1);
        assert_eq!(arenas.count(), 0);
    }

    #[test]
    fn test_grow_reports_mapping_failure() {
        let mut pool = Box::new(Tlsf::new());
        let mut arenas = ArenaList::new();
        let pages = BudgetedPages::new(1024);

        let err = arenas
            .grow(&mut pool, &pages, 4096, 16, 112, 8)
            .unwrap_err();
        assert!(matches!(err, MemoryError::OutOfMemory { .. }));
        assert_eq!(arenas.count(), 0);
    }
}
