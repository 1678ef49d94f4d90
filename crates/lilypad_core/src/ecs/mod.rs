//! # Entity Component System
//!
//! Bitmask-typed components stored in per-entity blocks from the
//! [`DiagnosticHeap`](crate::memory::DiagnosticHeap).
//!
//! ## Design
//!
//! - Component types are registered at runtime, one mask bit each
//! - Every entity slot owns one block per present component
//! - Entity IDs are slot indices with generation counters
//! - Queries walk slots in order and borrow the world

mod component;
mod entity;
mod query;
mod world;

pub use component::{
    Component, ComponentId, ComponentMask, ComponentRegistry, ComponentType, Position, Velocity,
    MAX_COMPONENT_NAME_LEN, MAX_COMPONENT_TYPES,
};
pub use entity::EntityId;
pub use query::Query;
pub use world::World;
