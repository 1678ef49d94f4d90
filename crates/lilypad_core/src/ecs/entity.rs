//! # Entity Management
//!
//! Entities are lightweight identifiers consisting of:
//! - An index into the slot table
//! - A generation counter for safe reuse

use std::fmt;
use std::ptr::NonNull;

use super::component::{ComponentId, ComponentMask, MAX_COMPONENT_TYPES};

/// Unique identifier for an entity.
///
/// The ID is split into two parts:
/// - Lower 32 bits: Index into the slot table
/// - Upper 32 bits: Generation counter for detecting stale references
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct EntityId(u64);

impl EntityId {
    /// Null/invalid entity ID.
    pub const NULL: Self = Self(u64::MAX);

    /// Creates a new entity ID from index and generation.
    #[inline]
    #[must_use]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self(((generation as u64) << 32) | (index as u64))
    }

    /// Returns the index portion of the entity ID.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0 as u32
    }

    /// Returns the generation portion of the entity ID.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Checks if this entity ID is null/invalid.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == u64::MAX
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::NULL
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            f.write_str("entity(null)")
        } else {
            write!(f, "entity({}v{})", self.index(), self.generation())
        }
    }
}

/// One entity slot: `Free -> Live -> Free`.
///
/// The generation only advances on `Live -> Free`, so a handle issued for a
/// previous occupant never matches again.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Slot {
    pub(crate) generation: u32,
    pub(crate) alive: bool,
    pub(crate) mask: ComponentMask,
    pub(crate) blocks: [Option<NonNull<u8>>; MAX_COMPONENT_TYPES],
}

impl Slot {
    pub(crate) const fn vacant() -> Self {
        Self {
            generation: 0,
            alive: false,
            mask: ComponentMask::EMPTY,
            blocks: [None; MAX_COMPONENT_TYPES],
        }
    }

    /// Returns `true` if `id` names the current occupant.
    #[inline]
    pub(crate) const fn holds(&self, id: EntityId) -> bool {
        self.alive && self.generation == id.generation()
    }

    #[inline]
    pub(crate) fn block(&self, ty: ComponentId) -> Option<NonNull<u8>> {
        self.blocks[ty.index()]
    }

    /// Empties the slot and returns the blocks it owned.
    pub(crate) fn vacate(&mut self) -> impl Iterator<Item = NonNull<u8>> {
        let blocks = std::mem::replace(&mut self.blocks, [None; MAX_COMPONENT_TYPES]);
        self.alive = false;
        self.mask = ComponentMask::EMPTY;
        self.generation = self.generation.wrapping_add(1);
        blocks.into_iter().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_id_roundtrip() {
        let id = EntityId::new(12345, 67890);
        assert_eq!(id.index(), 12345);
        assert_eq!(id.generation(), 67890);
        assert_eq!(id.to_string(), "entity(12345v67890)");
        assert!(EntityId::default().is_null());
    }

    #[test]
    fn test_vacate_bumps_generation() {
        let mut slot = Slot::vacant();
        slot.alive = true;
        slot.mask = ComponentMask::from_bits(0b1);
        slot.blocks[0] = Some(NonNull::dangling());
        let current = EntityId::new(0, 0);
        assert!(slot.holds(current));

        assert_eq!(slot.vacate().count(), 1);
        assert!(!slot.holds(current));
        assert_eq!(slot.generation, 1);
        assert!(slot.mask.is_empty());
        assert!(slot.blocks.iter().all(Option::is_none));
    }
}
