//! # Memory Management
//!
//! The diagnostic heap and the pieces it is built from:
//!
//! - [`pages`]: OS page mappings behind the [`PageSource`] trait
//! - [`pool`]: TLSF allocator over registered regions
//! - [`arena`]: heap growth by whole arenas
//! - [`ledger`]: in-band backtrace records for leak detection
//! - [`stack`]: call-stack capture and symbolication
//! - [`heap`]: [`DiagnosticHeap`], the public allocator

pub mod arena;
pub mod heap;
pub mod ledger;
pub mod pages;
pub mod pool;
pub mod stack;

pub use arena::{arena_capacity, Arena};
pub use heap::{DiagnosticHeap, HeapStats, LeakRecord, LeakReport, ResolvedFrame};
pub use ledger::{record_offset, tracked_size, LedgerEntry, RECORD_SIZE};
pub use pages::{AnonymousPages, BudgetedPages, MappedRegion, PageSource};
pub use pool::{Tlsf, POOL_OVERHEAD};
pub use stack::{describe_frame, NativeTracer, NullTracer, StackTracer, MAX_TRACE_FRAMES};
