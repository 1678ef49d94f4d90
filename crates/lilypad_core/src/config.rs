//! # Configuration
//!
//! Engine settings loaded once at startup from TOML.
//!
//! ```toml
//! [heap]
//! grow_increment = 2097152
//! trace_depth = 4
//!
//! [ecs]
//! max_entities = 512
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::memory::MAX_TRACE_FRAMES;

/// Top-level configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LilypadConfig {
    /// Diagnostic heap settings.
    pub heap: HeapConfig,
    /// Entity store settings.
    pub ecs: EcsConfig,
}

/// Diagnostic heap settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HeapConfig {
    /// Minimum size of every arena mapped when the pool runs dry.
    pub grow_increment: usize,
    /// Frames captured per allocation (at most `MAX_TRACE_FRAMES`).
    pub trace_depth: usize,
}

impl HeapConfig {
    /// Default arena size: 2 MiB.
    pub const DEFAULT_GROW_INCREMENT: usize = 2 * 1024 * 1024;
    /// Default captured stack depth.
    pub const DEFAULT_TRACE_DEPTH: usize = 4;

    /// Creates a configuration with the given grow increment.
    #[must_use]
    pub const fn with_grow_increment(grow_increment: usize) -> Self {
        Self {
            grow_increment,
            trace_depth: Self::DEFAULT_TRACE_DEPTH,
        }
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a zero grow increment or a trace
    /// depth beyond `MAX_TRACE_FRAMES`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.grow_increment == 0 {
            return Err(ConfigError::Invalid("heap.grow_increment must be > 0".into()));
        }
        if self.trace_depth > MAX_TRACE_FRAMES {
            return Err(ConfigError::Invalid(format!(
                "heap.trace_depth must be <= {MAX_TRACE_FRAMES}, got {}",
                self.trace_depth
            )));
        }
        Ok(())
    }
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self::with_grow_increment(Self::DEFAULT_GROW_INCREMENT)
    }
}

/// Entity store settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EcsConfig {
    /// Number of entity slots.
    pub max_entities: usize,
}

impl EcsConfig {
    /// Default slot count.
    pub const DEFAULT_MAX_ENTITIES: usize = 512;

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for zero entities or more than
    /// `u32::MAX`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_entities == 0 || self.max_entities > u32::MAX as usize {
            return Err(ConfigError::Invalid(format!(
                "ecs.max_entities must be in 1..={}, got {}",
                u32::MAX,
                self.max_entities
            )));
        }
        Ok(())
    }
}

impl Default for EcsConfig {
    fn default() -> Self {
        Self {
            max_entities: Self::DEFAULT_MAX_ENTITIES,
        }
    }
}

impl LilypadConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed input and
    /// [`ConfigError::Invalid`] for out-of-range values.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, otherwise as
    /// [`LilypadConfig::from_toml_str`].
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Validates every section.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError::Invalid`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.heap.validate()?;
        self.ecs.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LilypadConfig::from_toml_str("").unwrap();
        assert_eq!(config.heap.grow_increment, 2 * 1024 * 1024);
        assert_eq!(config.heap.trace_depth, 4);
        assert_eq!(config.ecs.max_entities, 512);
    }

    #[test]
    fn test_partial_override() {
        let config = LilypadConfig::from_toml_str(
            "[heap]\ngrow_increment = 4096\n\n[ecs]\nmax_entities = 64\n",
        )
        .unwrap();
        assert_eq!(config.heap.grow_increment, 4096);
        assert_eq!(config.heap.trace_depth, 4);
        assert_eq!(config.ecs.max_entities, 64);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            LilypadConfig::from_toml_str("[heap]\ngrow_increment = 0\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            LilypadConfig::from_toml_str("[heap]\ntrace_depth = 99\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            LilypadConfig::from_toml_str("[heap]\nbogus = 1\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lilypad.toml");
        std::fs::write(&path, "[ecs]\nmax_entities = 8\n").unwrap();
        let config = LilypadConfig::from_toml_file(&path).unwrap();
        assert_eq!(config.ecs.max_entities, 8);
        assert!(LilypadConfig::from_toml_file(dir.path().join("missing.toml")).is_err());
    }
}
