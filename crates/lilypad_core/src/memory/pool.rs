//! # Pool Allocator
//!
//! Two-level segregated-fit (TLSF) allocator over caller-provided regions.
//!
//! ```text
//! fl_bitmap:  which first-level (power of two) classes have free blocks
//! sl_bitmap:  per first level, which of the 32 subdivisions have free blocks
//! heads:      free-list head per (fl, sl) class
//! ```
//!
//! Every block carries a 16-byte header (`prev_phys`, `size | flags`) in
//! front of its payload. Free blocks keep their list links at the start of
//! the payload. Each pool ends with a zero-sized used sentinel block, so a
//! physical walk always terminates and free blocks never coalesce across
//! pool boundaries.
//!
//! Allocation, free and coalescing are O(1).

// SAFETY: This module manipulates block headers stored inside the pools it
// manages. Every raw access is confined to memory registered via `add_pool`.
#![allow(unsafe_code)]

use std::ptr::{self, NonNull};

/// Alignment of every block payload.
pub const ALIGN_SIZE: usize = 1 << ALIGN_SIZE_LOG2;
const ALIGN_SIZE_LOG2: u32 = 4;

const SL_INDEX_COUNT_LOG2: u32 = 5;
const SL_INDEX_COUNT: usize = 1 << SL_INDEX_COUNT_LOG2;

/// Blocks must be strictly smaller than `1 << FL_INDEX_MAX` bytes.
const FL_INDEX_MAX: u32 = 36;
const FL_INDEX_SHIFT: u32 = SL_INDEX_COUNT_LOG2 + ALIGN_SIZE_LOG2;
const FL_INDEX_COUNT: usize = (FL_INDEX_MAX - FL_INDEX_SHIFT + 1) as usize;
const SMALL_BLOCK_SIZE: usize = 1 << FL_INDEX_SHIFT;

/// Size of the header in front of every payload.
pub const HEADER_SIZE: usize = ALIGN_SIZE;
/// Smallest payload a block may have (room for the free-list links).
const MIN_PAYLOAD: usize = ALIGN_SIZE;
/// Largest payload a single block may have.
pub const BLOCK_SIZE_MAX: usize = (1 << FL_INDEX_MAX) - ALIGN_SIZE;

/// Bytes of every pool consumed by the first block header and the sentinel.
pub const POOL_OVERHEAD: usize = 2 * HEADER_SIZE;

const BLOCK_FREE: usize = 1;
const PREV_FREE: usize = 2;
const SIZE_MASK: usize = !(ALIGN_SIZE - 1);

const _: () = assert!(std::mem::size_of::<Block>() <= HEADER_SIZE + MIN_PAYLOAD);
const _: () = assert!(FL_INDEX_COUNT <= u32::BITS as usize);

/// Block header. `next_free`/`prev_free` are only meaningful while the block
/// is free; on 64-bit targets they overlay the first payload bytes.
#[repr(C)]
struct Block {
    prev_phys: *mut Block,
    size: usize,
    next_free: *mut Block,
    prev_free: *mut Block,
}

#[inline]
const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

#[inline]
const fn align_down(value: usize, align: usize) -> usize {
    value & !(align - 1)
}

#[inline]
fn fls(value: usize) -> u32 {
    debug_assert!(value != 0);
    usize::BITS - 1 - value.leading_zeros()
}

/// Maps a block size to its (first level, second level) class.
#[inline]
fn mapping_insert(size: usize) -> (usize, usize) {
    if size < SMALL_BLOCK_SIZE {
        (0, size / (SMALL_BLOCK_SIZE / SL_INDEX_COUNT))
    } else {
        let fl = fls(size);
        let sl = (size >> (fl - SL_INDEX_COUNT_LOG2)) ^ (1 << SL_INDEX_COUNT_LOG2);
        ((fl - (FL_INDEX_SHIFT - 1)) as usize, sl)
    }
}

/// Rounds a request up to the next class boundary so that any block found
/// in the resulting class is large enough.
#[inline]
fn round_for_search(size: usize) -> usize {
    if size >= SMALL_BLOCK_SIZE {
        let round = (1 << (fls(size) - SL_INDEX_COUNT_LOG2)) - 1;
        size + round
    } else {
        size
    }
}

/// Normalises a payload request: aligned, at least `MIN_PAYLOAD`.
#[inline]
fn adjust_request_size(size: usize, align: usize) -> Option<usize> {
    let aligned = size.checked_add(align - 1)? & !(align - 1);
    (aligned < BLOCK_SIZE_MAX).then(|| aligned.max(MIN_PAYLOAD))
}

// ----------------------------------------------------------------------------
// Raw block accessors
// ----------------------------------------------------------------------------

#[inline]
unsafe fn block_size(block: *const Block) -> usize {
    (*block).size & SIZE_MASK
}

#[inline]
unsafe fn set_block_size(block: *mut Block, size: usize) {
    (*block).size = size | ((*block).size & !SIZE_MASK);
}

#[inline]
unsafe fn is_free(block: *const Block) -> bool {
    (*block).size & BLOCK_FREE != 0
}

#[inline]
unsafe fn is_prev_free(block: *const Block) -> bool {
    (*block).size & PREV_FREE != 0
}

#[inline]
unsafe fn set_flag(block: *mut Block, flag: usize, on: bool) {
    if on {
        (*block).size |= flag;
    } else {
        (*block).size &= !flag;
    }
}

#[inline]
unsafe fn payload(block: *mut Block) -> *mut u8 {
    block.cast::<u8>().add(HEADER_SIZE)
}

#[inline]
unsafe fn from_payload(ptr: *mut u8) -> *mut Block {
    ptr.sub(HEADER_SIZE).cast::<Block>()
}

#[inline]
unsafe fn next_phys(block: *mut Block) -> *mut Block {
    payload(block).add(block_size(block)).cast::<Block>()
}

/// Marks `block` free and tells its physical successor.
#[inline]
unsafe fn mark_as_free(block: *mut Block) {
    let next = next_phys(block);
    (*next).prev_phys = block;
    set_flag(next, PREV_FREE, true);
    set_flag(block, BLOCK_FREE, true);
}

/// Marks `block` used and tells its physical successor.
#[inline]
unsafe fn mark_as_used(block: *mut Block) {
    let next = next_phys(block);
    set_flag(next, PREV_FREE, false);
    set_flag(block, BLOCK_FREE, false);
}

/// Splits `block` so that it keeps `size` payload bytes; returns the free
/// remainder. The remainder is flagged free but not inserted anywhere.
#[inline]
unsafe fn split(block: *mut Block, size: usize) -> *mut Block {
    debug_assert!(size % ALIGN_SIZE == 0 && size >= MIN_PAYLOAD);
    debug_assert!(block_size(block) >= size + HEADER_SIZE + MIN_PAYLOAD);

    let remaining = payload(block).add(size).cast::<Block>();
    let remain_size = block_size(block) - (size + HEADER_SIZE);
    (*remaining).size = remain_size;
    (*remaining).prev_phys = block;
    set_block_size(block, size);
    mark_as_free(remaining);
    remaining
}

#[inline]
unsafe fn can_split(block: *const Block, size: usize) -> bool {
    block_size(block) >= size + HEADER_SIZE + MIN_PAYLOAD
}

/// Folds `block` into its physical predecessor `prev`.
#[inline]
unsafe fn absorb(prev: *mut Block, block: *mut Block) -> *mut Block {
    (*prev).size += block_size(block) + HEADER_SIZE;
    (*next_phys(prev)).prev_phys = prev;
    prev
}

/// TLSF control structure.
///
/// The all-zero bit pattern is a valid empty allocator, so the structure can
/// live in freshly mapped memory.
pub struct Tlsf {
    fl_bitmap: u32,
    sl_bitmap: [u32; FL_INDEX_COUNT],
    heads: [[*mut Block; SL_INDEX_COUNT]; FL_INDEX_COUNT],
}

impl Default for Tlsf {
    fn default() -> Self {
        Self::new()
    }
}

impl Tlsf {
    /// Creates an allocator with no pools.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            fl_bitmap: 0,
            sl_bitmap: [0; FL_INDEX_COUNT],
            heads: [[ptr::null_mut(); SL_INDEX_COUNT]; FL_INDEX_COUNT],
        }
    }

    /// Returns the smallest pool payload that is guaranteed to satisfy an
    /// allocation of `size` bytes aligned to `align` once added empty.
    #[must_use]
    pub fn pool_size_for(size: usize, align: usize) -> Option<usize> {
        let needed = Self::block_request(size, align)?;
        let rounded = align_up(round_for_search(needed), ALIGN_SIZE);
        (rounded < BLOCK_SIZE_MAX).then_some(rounded)
    }

    /// Returns the payload size of the block search performed for a request.
    fn block_request(size: usize, align: usize) -> Option<usize> {
        let adjust = adjust_request_size(size, ALIGN_SIZE)?;
        if align <= ALIGN_SIZE {
            return Some(adjust);
        }
        let gap_minimum = HEADER_SIZE + MIN_PAYLOAD;
        adjust_request_size(adjust.checked_add(align)?.checked_add(gap_minimum)?, align)
    }

    /// Registers a region as a new pool.
    ///
    /// Returns `false` if the region is too small or too large to form a
    /// pool.
    ///
    /// # Safety
    ///
    /// `mem..mem + bytes` must be valid for reads and writes, must not
    /// overlap another pool, and must stay valid and untouched by anything
    /// but this allocator for as long as the allocator is used.
    pub unsafe fn add_pool(&mut self, mem: *mut u8, bytes: usize) -> bool {
        let start = align_up(mem as usize, ALIGN_SIZE);
        let offset = start - mem as usize;
        let Some(usable) = bytes.checked_sub(offset + POOL_OVERHEAD) else {
            return false;
        };
        let pool_bytes = align_down(usable, ALIGN_SIZE);
        if !(MIN_PAYLOAD..BLOCK_SIZE_MAX).contains(&pool_bytes) {
            return false;
        }

        let block = mem.add(offset).cast::<Block>();
        (*block).prev_phys = ptr::null_mut();
        (*block).size = pool_bytes | BLOCK_FREE;
        self.block_insert(block);

        let sentinel = next_phys(block);
        (*sentinel).prev_phys = block;
        (*sentinel).size = PREV_FREE;
        true
    }

    /// Allocates `size` bytes aligned to `align`.
    ///
    /// Returns `None` if no free block is large enough.
    ///
    /// # Panics
    ///
    /// Panics if `align` is not a power of two.
    pub fn alloc(&mut self, size: usize, align: usize) -> Option<NonNull<u8>> {
        assert!(align.is_power_of_two(), "alignment must be a power of two");
        let adjust = adjust_request_size(size, ALIGN_SIZE)?;
        let request = Self::block_request(size, align)?;

        // SAFETY: every block reachable from the free lists lives in a pool
        // registered through `add_pool`.
        unsafe {
            let mut block = self.locate_free(request)?;
            if align > ALIGN_SIZE {
                let base = payload(block) as usize;
                let gap_minimum = HEADER_SIZE + MIN_PAYLOAD;
                let mut aligned = align_up(base, align);
                let mut gap = aligned - base;
                if gap != 0 && gap < gap_minimum {
                    let offset = (gap_minimum - gap).max(align);
                    aligned = align_up(aligned + offset, align);
                    gap = aligned - base;
                }
                if gap != 0 {
                    block = self.trim_free_leading(block, gap);
                }
            }
            Some(self.prepare_used(block, adjust))
        }
    }

    /// Returns a block to the allocator, coalescing with free neighbours.
    ///
    /// # Safety
    ///
    /// `ptr` must come from [`Tlsf::alloc`] on this allocator and must not
    /// have been freed already.
    pub unsafe fn free(&mut self, ptr: NonNull<u8>) {
        let mut block = from_payload(ptr.as_ptr());
        debug_assert!(!is_free(block), "block already marked as free");
        mark_as_free(block);
        block = self.merge_prev(block);
        block = self.merge_next(block);
        self.block_insert(block);
    }

    /// Returns the usable payload size of an allocated block.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live allocation from this allocator.
    #[must_use]
    pub unsafe fn usable_size(ptr: NonNull<u8>) -> usize {
        block_size(from_payload(ptr.as_ptr()))
    }

    /// Verifies that the bitmaps agree with the free lists and that every
    /// listed block is free, correctly classed and not adjacent to another
    /// free block.
    #[must_use]
    pub fn check(&self) -> bool {
        for fl in 0..FL_INDEX_COUNT {
            let fl_set = self.fl_bitmap & (1 << fl) != 0;
            if fl_set != (self.sl_bitmap[fl] != 0) {
                return false;
            }
            for sl in 0..SL_INDEX_COUNT {
                let sl_set = self.sl_bitmap[fl] & (1 << sl) != 0;
                let mut block = self.heads[fl][sl];
                if sl_set == block.is_null() {
                    return false;
                }
                // SAFETY: listed blocks live in registered pools.
                unsafe {
                    let mut prev: *mut Block = ptr::null_mut();
                    while !block.is_null() {
                        if !is_free(block)
                            || is_prev_free(block)
                            || is_free(next_phys(block))
                            || !is_prev_free(next_phys(block))
                            || mapping_insert(block_size(block)) != (fl, sl)
                            || (*block).prev_free != prev
                        {
                            return false;
                        }
                        prev = block;
                        block = (*block).next_free;
                    }
                }
            }
        }
        true
    }

    /// Walks every physical block of a pool and returns `(used, free)`
    /// payload byte totals, or `None` if the block chain is inconsistent.
    ///
    /// # Safety
    ///
    /// `mem` must be the address previously passed to [`Tlsf::add_pool`].
    #[must_use]
    pub unsafe fn walk_pool(&self, mem: *mut u8) -> Option<(usize, usize)> {
        let mut block = mem.add(align_up(mem as usize, ALIGN_SIZE) - mem as usize).cast::<Block>();
        let mut prev: *mut Block = ptr::null_mut();
        let mut prev_was_free = false;
        let (mut used, mut free) = (0, 0);
        while block_size(block) != 0 {
            if (*block).prev_phys != prev || is_prev_free(block) != prev_was_free {
                return None;
            }
            if is_free(block) {
                if prev_was_free {
                    return None;
                }
                free += block_size(block);
            } else {
                used += block_size(block);
            }
            prev_was_free = is_free(block);
            prev = block;
            block = next_phys(block);
        }
        ((*block).prev_phys == prev && is_prev_free(block) == prev_was_free).then_some((used, free))
    }

    // ------------------------------------------------------------------------
    // Free-list management
    // ------------------------------------------------------------------------

    unsafe fn insert_free_block(&mut self, block: *mut Block, fl: usize, sl: usize) {
        let current = self.heads[fl][sl];
        (*block).next_free = current;
        (*block).prev_free = ptr::null_mut();
        if !current.is_null() {
            (*current).prev_free = block;
        }
        self.heads[fl][sl] = block;
        self.fl_bitmap |= 1 << fl;
        self.sl_bitmap[fl] |= 1 << sl;
    }

    unsafe fn remove_free_block(&mut self, block: *mut Block, fl: usize, sl: usize) {
        let prev = (*block).prev_free;
        let next = (*block).next_free;
        if !next.is_null() {
            (*next).prev_free = prev;
        }
        if !prev.is_null() {
            (*prev).next_free = next;
        }
        if self.heads[fl][sl] == block {
            self.heads[fl][sl] = next;
            if next.is_null() {
                self.sl_bitmap[fl] &= !(1 << sl);
                if self.sl_bitmap[fl] == 0 {
                    self.fl_bitmap &= !(1 << fl);
                }
            }
        }
    }

    unsafe fn block_insert(&mut self, block: *mut Block) {
        let (fl, sl) = mapping_insert(block_size(block));
        self.insert_free_block(block, fl, sl);
    }

    unsafe fn block_remove(&mut self, block: *mut Block) {
        let (fl, sl) = mapping_insert(block_size(block));
        self.remove_free_block(block, fl, sl);
    }

    fn search_suitable_block(&self, fl: usize, sl: usize) -> Option<(usize, usize)> {
        let mut fl = fl;
        let mut sl_map = self.sl_bitmap[fl] & (u32::MAX << sl);
        if sl_map == 0 {
            let fl_map = self.fl_bitmap & u32::MAX.checked_shl(fl as u32 + 1).unwrap_or(0);
            if fl_map == 0 {
                return None;
            }
            fl = fl_map.trailing_zeros() as usize;
            sl_map = self.sl_bitmap[fl];
        }
        Some((fl, sl_map.trailing_zeros() as usize))
    }

    unsafe fn locate_free(&mut self, size: usize) -> Option<*mut Block> {
        let (fl, sl) = mapping_insert(round_for_search(size));
        if fl >= FL_INDEX_COUNT {
            return None;
        }
        let (fl, sl) = self.search_suitable_block(fl, sl)?;
        let block = self.heads[fl][sl];
        debug_assert!(block_size(block) >= size);
        self.remove_free_block(block, fl, sl);
        Some(block)
    }

    unsafe fn merge_prev(&mut self, block: *mut Block) -> *mut Block {
        if is_prev_free(block) {
            let prev = (*block).prev_phys;
            self.block_remove(prev);
            absorb(prev, block)
        } else {
            block
        }
    }

    unsafe fn merge_next(&mut self, block: *mut Block) -> *mut Block {
        let next = next_phys(block);
        if is_free(next) {
            self.block_remove(next);
            absorb(block, next)
        } else {
            block
        }
    }

    /// Gives the trailing part of a free block back to the lists.
    unsafe fn trim_free(&mut self, block: *mut Block, size: usize) {
        if can_split(block, size) {
            let remaining = split(block, size);
            self.block_insert(remaining);
        }
    }

    /// Gives the leading `gap` bytes of a free block back to the lists and
    /// returns the aligned remainder.
    unsafe fn trim_free_leading(&mut self, block: *mut Block, gap: usize) -> *mut Block {
        let keep = gap - HEADER_SIZE;
        if !can_split(block, keep) {
            return block;
        }
        let remaining = split(block, keep);
        set_flag(remaining, PREV_FREE, true);
        self.block_insert(block);
        remaining
    }

    unsafe fn prepare_used(&mut self, block: *mut Block, size: usize) -> NonNull<u8> {
        self.trim_free(block, size);
        mark_as_used(block);
        NonNull::new_unchecked(payload(block))
    }
}

impl std::fmt::Debug for Tlsf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tlsf")
            .field("fl_bitmap", &format_args!("{:#034b}", self.fl_bitmap))
            .finish_non_exhaustive()
    }
}
