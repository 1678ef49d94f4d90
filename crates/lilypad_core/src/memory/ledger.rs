//! # Backtrace Ledger
//!
//! Intrusive singly linked list of outstanding allocations. Each record is
//! written in-band, right after the user bytes of the block it describes:
//!
//! ```text
//! [ pool header | user bytes (size) | pad | BacktraceRecord ]
//!               ^ address                 ^ record_offset(size)
//! ```
//!
//! New records are pushed at the head. Removal is a linear scan by address,
//! which is fine for the allocation counts this heap targets.

// SAFETY: records live inside pool blocks owned by the heap; a record is
// reachable from the list exactly while its block is allocated.
#![allow(unsafe_code)]

use std::ptr::{self, NonNull};

use super::stack::MAX_TRACE_FRAMES;

/// Size of the in-band record appended to every allocation.
pub const RECORD_SIZE: usize = std::mem::size_of::<BacktraceRecord>();
const RECORD_ALIGN: usize = std::mem::align_of::<BacktraceRecord>();

/// In-band allocation record.
#[repr(C)]
pub(crate) struct BacktraceRecord {
    address: *mut u8,
    next: *mut BacktraceRecord,
    size: usize,
    frame_count: usize,
    frames: [usize; MAX_TRACE_FRAMES],
}

/// Byte offset of the record for a block with `size` user bytes.
///
/// Returns `None` on arithmetic overflow.
#[inline]
#[must_use]
pub fn record_offset(size: usize) -> Option<usize> {
    Some(size.checked_add(RECORD_ALIGN - 1)? & !(RECORD_ALIGN - 1))
}

/// Total bytes to request from the pool for `size` user bytes.
#[inline]
#[must_use]
pub fn tracked_size(size: usize) -> Option<usize> {
    record_offset(size)?.checked_add(RECORD_SIZE)
}

/// Snapshot of an outstanding allocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerEntry {
    /// Address handed to the caller.
    pub address: usize,
    /// Requested size in bytes.
    pub size: usize,
    /// Captured instruction pointers, innermost first.
    pub frames: Vec<usize>,
}

/// The list of outstanding allocations.
pub(crate) struct Ledger {
    head: *mut BacktraceRecord,
    len: usize,
    live_bytes: usize,
}

impl Ledger {
    pub(crate) const fn new() -> Self {
        Self {
            head: ptr::null_mut(),
            len: 0,
            live_bytes: 0,
        }
    }

    /// Number of outstanding allocations.
    pub(crate) const fn len(&self) -> usize {
        self.len
    }

    /// Sum of requested sizes of outstanding allocations.
    pub(crate) const fn live_bytes(&self) -> usize {
        self.live_bytes
    }

    /// Writes a record for `address` at its in-band slot and links it in.
    ///
    /// # Safety
    ///
    /// `address` must be a fresh block of at least `tracked_size(size)` bytes
    /// that stays allocated until [`Ledger::remove`] returns its record.
    pub(crate) unsafe fn push(&mut self, address: NonNull<u8>, size: usize, frames: &[usize]) {
        let offset = (size + RECORD_ALIGN - 1) & !(RECORD_ALIGN - 1);
        let record = address.as_ptr().add(offset).cast::<BacktraceRecord>();
        let frame_count = frames.len().min(MAX_TRACE_FRAMES);
        let mut stored = [0usize; MAX_TRACE_FRAMES];
        stored[..frame_count].copy_from_slice(&frames[..frame_count]);
        ptr::write(
            record,
            BacktraceRecord {
                address: address.as_ptr(),
                next: self.head,
                size,
                frame_count,
                frames: stored,
            },
        );
        self.head = record;
        self.len += 1;
        self.live_bytes += size;
    }

    /// Unlinks the record for `address` and returns its size, or `None` if
    /// the address is not outstanding.
    pub(crate) fn remove(&mut self, address: *mut u8) -> Option<usize> {
        let mut link: *mut *mut BacktraceRecord = &mut self.head;
        // SAFETY: every record on the list lives in an allocated block.
        unsafe {
            while !(*link).is_null() {
                let record = *link;
                if (*record).address == address {
                    *link = (*record).next;
                    let size = (*record).size;
                    self.len -= 1;
                    self.live_bytes -= size;
                    return Some(size);
                }
                link = ptr::addr_of_mut!((*record).next);
            }
        }
        None
    }

    /// Copies out every outstanding record, newest first.
    pub(crate) fn entries(&self) -> Vec<LedgerEntry> {
        let mut out = Vec::with_capacity(self.len);
        let mut record = self.head;
        // SAFETY: see `remove`.
        unsafe {
            while !record.is_null() {
                let r = &*record;
                out.push(LedgerEntry {
                    address: r.address as usize,
                    size: r.size,
                    frames: r.frames[..r.frame_count].to_vec(),
                });
                record = r.next;
            }
        }
        out
    }

    /// Forgets every record without touching the blocks.
    pub(crate) fn clear(&mut self) {
        self.head = ptr::null_mut();
        self.len = 0;
        self.live_bytes = 0;
    }
}
