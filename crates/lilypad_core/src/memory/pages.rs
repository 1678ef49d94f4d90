//! # Page Source
//!
//! The memory-mapping collaborator behind the diagnostic heap. Every byte the
//! heap hands out (its own control block and every arena) comes from a
//! [`MappedRegion`] produced by a [`PageSource`]. Releasing a region is
//! dropping it.

use std::sync::atomic::{AtomicUsize, Ordering};

use memmap2::MmapMut;

use crate::error::{MemoryError, MemoryResult};

/// A read/write anonymous mapping.
///
/// The mapping is page aligned and zero filled. It is unmapped on drop.
pub struct MappedRegion {
    map: MmapMut,
}

impl MappedRegion {
    /// Maps `len` bytes of anonymous read/write memory.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::OutOfMemory`] if the mapping fails.
    pub fn anonymous(len: usize) -> MemoryResult<Self> {
        MmapMut::map_anon(len)
            .map(|map| Self { map })
            .map_err(|err| {
                tracing::error!(requested = len, %err, "anonymous mapping failed");
                MemoryError::OutOfMemory { requested: len }
            })
    }

    /// Returns the mapped length in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns `true` if the region has no bytes.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Returns the base address of the region.
    #[inline]
    #[must_use]
    pub fn as_ptr(&self) -> *const u8 {
        self.map.as_ptr()
    }

    /// Returns the mutable base address of the region.
    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.map.as_mut_ptr()
    }

    /// Returns `true` if `addr` lies inside the region.
    #[inline]
    #[must_use]
    pub fn contains(&self, addr: usize) -> bool {
        let base = self.as_ptr() as usize;
        addr >= base && addr < base + self.len()
    }
}

impl std::fmt::Debug for MappedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedRegion")
            .field("base", &self.as_ptr())
            .field("len", &self.len())
            .finish()
    }
}

/// Reserves and commits read/write memory for the heap.
///
/// Implementations must hand out regions that stay valid until dropped.
pub trait PageSource: Send {
    /// Maps a region of at least `len` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::OutOfMemory`] when the request cannot be met.
    fn map(&self, len: usize) -> MemoryResult<MappedRegion>;
}

/// Page source backed by anonymous OS mappings.
#[derive(Clone, Copy, Debug, Default)]
pub struct AnonymousPages;

impl PageSource for AnonymousPages {
    fn map(&self, len: usize) -> MemoryResult<MappedRegion> {
        MappedRegion::anonymous(len)
    }
}

/// Page source with a cumulative byte budget.
///
/// Once the total of all successful mappings would exceed the budget, further
/// requests fail with [`MemoryError::OutOfMemory`]. Released regions are not
/// credited back.
#[derive(Debug)]
pub struct BudgetedPages<S = AnonymousPages> {
    inner: S,
    budget: usize,
    used: AtomicUsize,
}

impl BudgetedPages<AnonymousPages> {
    /// Creates an anonymous page source limited to `budget` bytes in total.
    #[must_use]
    pub fn new(budget: usize) -> Self {
        Self::wrap(AnonymousPages, budget)
    }
}

impl<S: PageSource> BudgetedPages<S> {
    /// Wraps another source with a byte budget.
    #[must_use]
    pub fn wrap(inner: S, budget: usize) -> Self {
        Self {
            inner,
            budget,
            used: AtomicUsize::new(0),
        }
    }

    /// Returns the number of bytes mapped so far.
    #[must_use]
    pub fn used(&self) -> usize {
        self.used.load(Ordering::Relaxed)
    }
}

impl<S: PageSource> PageSource for BudgetedPages<S> {
    fn map(&self, len: usize) -> MemoryResult<MappedRegion> {
        let reserved = self
            .used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(len).filter(|total| *total <= self.budget)
            });
        if reserved.is_err() {
            tracing::error!(requested = len, budget = self.budget, "page budget exhausted");
            return Err(MemoryError::OutOfMemory { requested: len });
        }
        self.inner.map(len).map_err(|err| {
            self.used.fetch_sub(len, Ordering::AcqRel);
            err
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anonymous_region_is_zeroed() {
        let mut region = AnonymousPages.map(4096).unwrap();
        assert_eq!(region.len(), 4096);
        let base = region.as_mut_ptr();
        assert!(region.contains(base as usize));
        assert!(!region.contains(base as usize + 4096));
        assert_eq!(base as usize % 16, 0);
    }

    #[test]
    fn test_budget_rejects_overflow() {
        let pages = BudgetedPages::new(8192);
        let _a = pages.map(4096).unwrap();
        let _b = pages.map(4096).unwrap();
        assert_eq!(
            pages.map(1).unwrap_err(),
            MemoryError::OutOfMemory { requested: 1 }
        );
        assert_eq!(pages.used(), 8192);
    }
}
