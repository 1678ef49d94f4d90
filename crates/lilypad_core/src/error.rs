//! # Error Types
//!
//! All recoverable failures surfaced by the heap, the ECS, the profiler and
//! the configuration loader. Contract violations (double free, missing
//! required component) are not represented here: they panic.

use thiserror::Error;

use crate::ecs::EntityId;

/// Errors produced by the diagnostic heap and its collaborators.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// A mapping request could not be satisfied.
    #[error("out of memory: failed to map {requested} bytes")]
    OutOfMemory {
        /// Number of bytes that were requested from the page source.
        requested: usize,
    },

    /// The heap was configured with unusable parameters.
    #[error("invalid heap configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for heap operations.
pub type MemoryResult<T> = Result<T, MemoryError>;

/// Errors produced by the component registry and the entity store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EcsError {
    /// A fixed-size table is full.
    #[error("capacity exceeded: table holds at most {capacity} entries")]
    CapacityExceeded {
        /// Capacity of the table that overflowed.
        capacity: usize,
    },

    /// A component type with this name is already registered.
    #[error("component type already registered: {0}")]
    DuplicateName(String),

    /// The component name is empty or too long.
    #[error("invalid component name: {0:?}")]
    InvalidName(String),

    /// The component layout cannot be allocated.
    #[error("invalid component layout: size {size}, alignment {alignment}")]
    InvalidLayout {
        /// Element size in bytes.
        size: usize,
        /// Requested alignment in bytes.
        alignment: usize,
    },

    /// A mask referenced a bit with no registered component type.
    #[error("no component type registered for bit {0}")]
    UnknownComponent(u8),

    /// The handle's generation no longer matches its slot.
    #[error("stale entity handle: {0:?}")]
    StaleEntity(EntityId),

    /// A component block could not be allocated.
    #[error("out of memory allocating component {component} ({size} bytes)")]
    OutOfMemory {
        /// Name of the component type being allocated.
        component: String,
        /// Element size in bytes.
        size: usize,
    },

    /// A typed view did not match the registered component layout.
    #[error("component {component} is {expected} bytes, typed view is {actual} bytes")]
    LayoutMismatch {
        /// Name of the component type.
        component: String,
        /// Registered element size.
        expected: usize,
        /// Size of the requested Rust type.
        actual: usize,
    },
}

/// Result type for ECS operations.
pub type EcsResult<T> = Result<T, EcsError>;

/// Errors produced by the duration profiler.
#[derive(Error, Debug)]
pub enum TraceError {
    /// `capture_stop` was called without an active capture.
    #[error("no trace capture in progress")]
    NotCapturing,

    /// Writing the trace file failed.
    #[error("failed to write trace file: {0}")]
    Io(#[from] std::io::Error),

    /// Encoding the trace events failed.
    #[error("failed to encode trace events: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors produced while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid TOML for this schema.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
