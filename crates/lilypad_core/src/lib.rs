//! # LILYPAD Core
//!
//! Runtime foundations for a small real-time simulation:
//! - A diagnostic heap: TLSF pools grown by arenas, with a backtrace record
//!   behind every allocation and a leak report at teardown
//! - A bitmask-typed Entity Component System whose component blocks live
//!   in that heap
//! - A Chrome-trace duration profiler
//!
//! ## Architecture Rules
//!
//! 1. **Every component block comes from the diagnostic heap** - leaks are
//!    reported with the call stack that allocated them
//! 2. **Stale handles fail safely** - entity IDs carry a generation
//! 3. **No hidden globals** - registries, heaps and recorders are values
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use lilypad_core::{DiagnosticHeap, Position, Velocity, World};
//!
//! let heap = Arc::new(DiagnosticHeap::create(64 * 1024).unwrap());
//! let mut world = World::new(Arc::clone(&heap), 256);
//! let pos = world.register_type::<Position>().unwrap();
//! let vel = world.register_type::<Velocity>().unwrap();
//!
//! let mover = world.add(pos.mask() | vel).unwrap();
//! world.component_mut::<Velocity>(mover, vel).unwrap().unwrap().x = 1.0;
//!
//! for entity in world.query(pos.mask() | vel).collect::<Vec<_>>() {
//!     let v = *world.component::<Velocity>(entity, vel).unwrap().unwrap();
//!     world.component_mut::<Position>(entity, pos).unwrap().unwrap().x += v.x;
//! }
//! drop(world);
//! assert_eq!(heap.live_allocations(), 0);
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod ecs;
pub mod error;
pub mod memory;
pub mod profile;

pub use config::{EcsConfig, HeapConfig, LilypadConfig};
pub use ecs::{
    Component, ComponentId, ComponentMask, ComponentRegistry, ComponentType, EntityId, Position,
    Query, Velocity, World,
};
pub use error::{ConfigError, EcsError, EcsResult, MemoryError, MemoryResult, TraceError};
pub use memory::{DiagnosticHeap, HeapStats, LeakRecord, LeakReport};
pub use profile::{DurationGuard, TraceRecorder};
