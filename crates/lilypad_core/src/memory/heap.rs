//! # Diagnostic Heap
//!
//! TLSF pool that grows by whole arenas and shadows every allocation with an
//! in-band backtrace record. Records still linked when the heap is torn down
//! are reported as leaks.
//!
//! ## Locking
//!
//! `alloc` and `free` hold one mutex for the pool operation and the ledger
//! update. The call stack is captured before the lock is taken.

// SAFETY: the TLSF control block lives in a mapping owned by `HeapState`;
// every pool and ledger access goes through the state mutex.
#![allow(unsafe_code)]

use std::fmt;
use std::ptr::{self, NonNull};

use parking_lot::Mutex;

use super::arena::ArenaList;
use super::ledger::{tracked_size, Ledger, LedgerEntry, RECORD_SIZE};
use super::pages::{AnonymousPages, MappedRegion, PageSource};
use super::pool::Tlsf;
use super::stack::{describe_frame, NativeTracer, StackTracer, MAX_TRACE_FRAMES};
use crate::config::HeapConfig;
use crate::error::{MemoryError, MemoryResult};

/// Point-in-time heap counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Arenas mapped so far.
    pub arena_count: usize,
    /// Bytes mapped for arenas.
    pub mapped_bytes: usize,
    /// Outstanding allocations.
    pub live_allocations: usize,
    /// Requested bytes of outstanding allocations.
    pub live_bytes: usize,
}

/// One captured frame of a leaked allocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedFrame {
    /// Instruction pointer.
    pub ip: usize,
    /// Symbol name, if debug info was available.
    pub symbol: Option<String>,
}

impl fmt::Display for ResolvedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.symbol {
            Some(name) => f.write_str(name),
            None => write!(f, "{:#x}", self.ip),
        }
    }
}

/// An allocation still outstanding at teardown.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeakRecord {
    /// Address that was handed out.
    pub address: usize,
    /// Requested size in bytes.
    pub size: usize,
    /// Tracking bytes spent on the record.
    pub overhead: usize,
    /// Allocation call stack, innermost first.
    pub frames: Vec<ResolvedFrame>,
}

/// Every leak found when a heap was destroyed, newest allocation first.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LeakReport {
    leaks: Vec<LeakRecord>,
}

impl LeakReport {
    /// Number of leaked allocations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.leaks.len()
    }

    /// Returns `true` if nothing leaked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.leaks.is_empty()
    }

    /// Sum of leaked request sizes.
    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.leaks.iter().map(|leak| leak.size).sum()
    }

    /// Iterates over the leaks.
    pub fn iter(&self) -> std::slice::Iter<'_, LeakRecord> {
        self.leaks.iter()
    }
}

impl<'a> IntoIterator for &'a LeakReport {
    type Item = &'a LeakRecord;
    type IntoIter = std::slice::Iter<'a, LeakRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

struct HeapState {
    /// Mapping holding the TLSF control block. `None` once torn down.
    control: Option<MappedRegion>,
    pool: NonNull<Tlsf>,
    arenas: ArenaList,
    ledger: Ledger,
    pages: Box<dyn PageSource>,
}

// SAFETY: the raw pointers inside point into mappings owned by this state,
// and the state is only reachable through the heap mutex.
unsafe impl Send for HeapState {}

impl HeapState {
    fn pool(&mut self) -> &mut Tlsf {
        debug_assert!(self.control.is_some(), "heap used after teardown");
        // SAFETY: `pool` points into `control`, which is mapped until
        // teardown, and `&mut self` proves exclusive access.
        unsafe { self.pool.as_mut() }
    }
}

/// Growable pool allocator with per-allocation leak tracking.
///
/// Shared between threads through `Arc`; every method takes `&self` except
/// [`DiagnosticHeap::destroy`].
pub struct DiagnosticHeap {
    state: Mutex<HeapState>,
    tracer: Box<dyn StackTracer>,
    grow_increment: usize,
    trace_depth: usize,
}

impl DiagnosticHeap {
    /// Creates a heap backed by anonymous mappings and the native unwinder.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidConfig`] for an invalid configuration
    /// and [`MemoryError::OutOfMemory`] if the control block cannot be mapped.
    pub fn new(config: &HeapConfig) -> MemoryResult<Self> {
        Self::with_collaborators(config, Box::new(AnonymousPages), Box::new(NativeTracer::default()))
    }

    /// Creates a heap with default settings and the given grow increment.
    ///
    /// # Errors
    ///
    /// As [`DiagnosticHeap::new`].
    pub fn create(grow_increment: usize) -> MemoryResult<Self> {
        Self::new(&HeapConfig::with_grow_increment(grow_increment))
    }

    /// Creates a heap with explicit page source and stack tracer.
    ///
    /// # Errors
    ///
    /// As [`DiagnosticHeap::new`].
    pub fn with_collaborators(
        config: &HeapConfig,
        pages: Box<dyn PageSource>,
        tracer: Box<dyn StackTracer>,
    ) -> MemoryResult<Self> {
        config
            .validate()
            .map_err(|err| MemoryError::InvalidConfig(err.to_string()))?;

        let mut control = pages.map(std::mem::size_of::<Tlsf>()).map_err(|err| {
            tracing::error!(%err, "cannot map heap control block");
            err
        })?;
        let raw = control.as_mut_ptr().cast::<Tlsf>();
        debug_assert_eq!(raw as usize % std::mem::align_of::<Tlsf>(), 0);
        // SAFETY: the mapping is page aligned, at least `size_of::<Tlsf>()`
        // bytes long and exclusively owned by the state built below.
        let pool = unsafe {
            ptr::write(raw, Tlsf::new());
            NonNull::new_unchecked(raw)
        };

        tracing::debug!(
            grow_increment = config.grow_increment,
            trace_depth = config.trace_depth,
            "diagnostic heap created"
        );
        Ok(Self {
            state: Mutex::new(HeapState {
                control: Some(control),
                pool,
                arenas: ArenaList::new(),
                ledger: Ledger::new(),
                pages,
            }),
            tracer,
            grow_increment: config.grow_increment,
            trace_depth: config.trace_depth.min(MAX_TRACE_FRAMES),
        })
    }

    /// Allocates at least `size` bytes aligned to `alignment`.
    ///
    /// When the pool has no fitting block, one new arena is mapped and the
    /// allocation is retried once. Returns `None` when that fails too.
    ///
    /// # Panics
    ///
    /// Panics if `alignment` is not a power of two.
    #[inline(never)]
    pub fn alloc(&self, size: usize, alignment: usize) -> Option<NonNull<u8>> {
        assert!(
            alignment.is_power_of_two(),
            "alignment must be a power of two, got {alignment}"
        );
        let mut frames = [0usize; MAX_TRACE_FRAMES];
        let depth = self.tracer.capture(&mut frames[..self.trace_depth]);

        let Some(tracked) = tracked_size(size) else {
            tracing::error!(size, alignment, "allocation size overflows");
            return None;
        };

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let block = match state.pool().alloc(tracked, alignment) {
            Some(block) => block,
            None => {
                // SAFETY: see `HeapState::pool`; the borrow is disjoint from
                // `arenas` and `pages`.
                let pool = unsafe { state.pool.as_mut() };
                let grown = state.arenas.grow(
                    pool,
                    state.pages.as_ref(),
                    self.grow_increment,
                    size,
                    tracked,
                    alignment,
                );
                let retried = grown.ok().and_then(|_| state.pool().alloc(tracked, alignment));
                let Some(block) = retried else {
                    drop(guard);
                    tracing::error!(size, alignment, "diagnostic heap out of memory");
                    return None;
                };
                block
            }
        };

        // SAFETY: the block was just allocated with room for the record and
        // stays allocated until `free` unlinks it.
        unsafe { state.ledger.push(block, size, &frames[..depth]) };
        tracing::trace!(size, alignment, address = ?block, "alloc");
        Some(block)
    }

    /// Releases a block returned by [`DiagnosticHeap::alloc`].
    ///
    /// # Panics
    ///
    /// Panics if `address` is not an outstanding allocation of this heap
    /// (foreign pointer or double free). The pool is not touched.
    pub fn free(&self, address: NonNull<u8>) {
        let mut guard = self.state.lock();
        let Some(size) = guard.ledger.remove(address.as_ptr()) else {
            drop(guard);
            tracing::error!(address = ?address, "free of an address not owned by the heap");
            panic!("{address:p} is not an outstanding allocation");
        };
        // SAFETY: the ledger only holds blocks allocated from this pool.
        unsafe { guard.pool().free(address) };
        tracing::trace!(size, address = ?address, "free");
    }

    /// Tears the heap down and returns every outstanding allocation.
    ///
    /// Each leak is also logged at warn level.
    #[must_use]
    pub fn destroy(mut self) -> LeakReport {
        self.teardown()
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> HeapStats {
        let state = self.state.lock();
        HeapStats {
            arena_count: state.arenas.count(),
            mapped_bytes: state.arenas.mapped_bytes(),
            live_allocations: state.ledger.len(),
            live_bytes: state.ledger.live_bytes(),
        }
    }

    /// Number of outstanding allocations.
    #[must_use]
    pub fn live_allocations(&self) -> usize {
        self.state.lock().ledger.len()
    }

    /// Snapshot of every outstanding allocation, newest first.
    #[must_use]
    pub fn outstanding(&self) -> Vec<LedgerEntry> {
        self.state.lock().ledger.entries()
    }

    /// Capacity of each arena, oldest first.
    #[must_use]
    pub fn arena_capacities(&self) -> Vec<usize> {
        self.state.lock().arenas.capacities()
    }

    /// Minimum arena size.
    #[inline]
    #[must_use]
    pub const fn grow_increment(&self) -> usize {
        self.grow_increment
    }

    /// Verifies the pool's free-list invariants.
    #[must_use]
    pub fn check_integrity(&self) -> bool {
        self.state.lock().pool().check()
    }

    fn teardown(&mut self) -> LeakReport {
        let state = self.state.get_mut();
        if state.control.is_none() {
            return LeakReport::default();
        }

        let tracer = self.tracer.as_ref();
        let leaks: Vec<LeakRecord> = state
            .ledger
            .entries()
            .into_iter()
            .map(|entry| LeakRecord {
                address: entry.address,
                size: entry.size,
                overhead: RECORD_SIZE,
                frames: entry
                    .frames
                    .iter()
                    .map(|&ip| ResolvedFrame {
                        ip,
                        symbol: tracer.resolve(ip),
                    })
                    .collect(),
            })
            .collect();

        for leak in &leaks {
            let stack = leak
                .frames
                .iter()
                .map(|frame| describe_frame(tracer, frame.ip))
                .collect::<Vec<_>>()
                .join(" <- ");
            tracing::warn!(
                size = leak.size,
                overhead = leak.overhead,
                address = format_args!("{:#x}", leak.address),
                stack = %stack,
                "leaked allocation"
            );
        }

        state.ledger.clear();
        *state.pool() = Tlsf::new();
        let arenas = state.arenas.release_all();
        state.control = None;
        tracing::debug!(arenas, leaks = leaks.len(), "diagnostic heap destroyed");
        LeakReport { leaks }
    }
}

impl Drop for DiagnosticHeap {
    fn drop(&mut self) {
        let _ = self.teardown();
    }
}

impl fmt::Debug for DiagnosticHeap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiagnosticHeap")
            .field("grow_increment", &self.grow_increment)
            .field("trace_depth", &self.trace_depth)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
