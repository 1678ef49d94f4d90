//! # ECS World
//!
//! The central container for all entities and components. The slot table is
//! sized once at creation; every component block is allocated from the
//! world's [`DiagnosticHeap`] when an entity is added and returned to it when
//! the entity is removed.

// SAFETY: component blocks are raw heap allocations owned by their slot.
// Typed views are created only for blocks of the registered size.
#![allow(unsafe_code)]

use std::cell::RefCell;
use std::ptr::{self, NonNull};
use std::sync::Arc;

use bytemuck::Pod;

use super::component::{
    Component, ComponentId, ComponentMask, ComponentRegistry, ComponentType, MAX_COMPONENT_TYPES,
};
use super::entity::{EntityId, Slot};
use super::query::Query;
use crate::config::EcsConfig;
use crate::error::{ConfigError, EcsError, EcsResult};
use crate::memory::DiagnosticHeap;

/// The ECS World.
///
/// # Capacity
///
/// The world has a fixed number of entity slots set at creation. Slots are
/// reused once their entity is removed, with a bumped generation.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use lilypad_core::ecs::{Position, World};
/// use lilypad_core::memory::DiagnosticHeap;
///
/// let heap = Arc::new(DiagnosticHeap::create(64 * 1024).unwrap());
/// let mut world = World::new(heap, 128);
/// let pos = world.register_type::<Position>().unwrap();
///
/// let entity = world.add(pos.mask()).unwrap();
/// world.component_mut::<Position>(entity, pos).unwrap().unwrap().x = 1.0;
/// assert_eq!(world.query(pos.mask()).count(), 1);
/// ```
pub struct World {
    heap: Arc<DiagnosticHeap>,
    registry: ComponentRegistry,
    slots: Box<[Slot]>,
    /// Free slot indices, lowest index on top.
    free_indices: Vec<u32>,
    alive_count: usize,
    pending_removals: RefCell<Vec<EntityId>>,
}

// SAFETY: the block pointers are exclusively owned by their slots and the
// heap they came from is `Sync`.
unsafe impl Send for World {}

impl World {
    /// Creates a world with `capacity` entity slots.
    ///
    /// # Panics
    ///
    /// Panics if capacity is zero or exceeds `u32::MAX`.
    #[must_use]
    pub fn new(heap: Arc<DiagnosticHeap>, capacity: usize) -> Self {
        assert!(capacity > 0, "Capacity must be greater than zero");
        assert!(
            capacity <= u32::MAX as usize,
            "Capacity cannot exceed u32::MAX"
        );

        let slots = vec![Slot::vacant(); capacity].into_boxed_slice();
        #[allow(clippy::cast_possible_truncation)]
        let free_indices: Vec<u32> = (0..capacity as u32).rev().collect();

        Self {
            heap,
            registry: ComponentRegistry::new(),
            slots,
            free_indices,
            alive_count: 0,
            pending_removals: RefCell::new(Vec::new()),
        }
    }

    /// Creates a world sized by configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `max_entities` is out of range.
    pub fn with_config(
        heap: Arc<DiagnosticHeap>,
        config: &EcsConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::new(heap, config.max_entities))
    }

    /// Returns the number of entity slots.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Returns the number of currently alive entities.
    #[inline]
    #[must_use]
    pub const fn alive_count(&self) -> usize {
        self.alive_count
    }

    /// Heap backing the component blocks.
    #[inline]
    #[must_use]
    pub fn heap(&self) -> &Arc<DiagnosticHeap> {
        &self.heap
    }

    /// Registered component types.
    #[inline]
    #[must_use]
    pub const fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    /// Registers a component type. See [`ComponentRegistry::register`].
    ///
    /// # Errors
    ///
    /// As [`ComponentRegistry::register`].
    pub fn register(&mut self, name: &str, size: usize, alignment: usize) -> EcsResult<ComponentId> {
        self.registry.register(name, size, alignment)
    }

    /// Registers a typed component. See [`ComponentRegistry::register_type`].
    ///
    /// # Errors
    ///
    /// As [`ComponentRegistry::register`].
    pub fn register_type<T: Component>(&mut self) -> EcsResult<ComponentId> {
        self.registry.register_type::<T>()
    }

    /// Creates an entity with one zeroed block per component in `mask`.
    ///
    /// Either every block is allocated or none is: on failure the blocks
    /// obtained so far are returned to the heap.
    ///
    /// # Errors
    ///
    /// - [`EcsError::UnknownComponent`] if a bit has no registered type
    /// - [`EcsError::CapacityExceeded`] if every slot is taken
    /// - [`EcsError::OutOfMemory`] if a block cannot be allocated
    pub fn add(&mut self, mask: ComponentMask) -> EcsResult<EntityId> {
        if let Some(unknown) = mask.iter().find(|id| self.registry.get(*id).is_none()) {
            tracing::error!(bit = unknown.bit(), "add with unregistered component");
            return Err(EcsError::UnknownComponent(unknown.bit()));
        }
        let Some(&index) = self.free_indices.last() else {
            tracing::error!(capacity = self.capacity(), "entity capacity exceeded");
            return Err(EcsError::CapacityExceeded {
                capacity: self.capacity(),
            });
        };

        let mut blocks = [None; MAX_COMPONENT_TYPES];
        for ty in self.registry.iter().filter(|ty| mask.contains(ty.id())) {
            let Some(block) = self.heap.alloc(ty.size(), ty.alignment()) else {
                for block in blocks.iter().flatten() {
                    self.heap.free(*block);
                }
                tracing::error!(component = ty.name(), size = ty.size(), "component allocation failed");
                return Err(EcsError::OutOfMemory {
                    component: ty.name().to_owned(),
                    size: ty.size(),
                });
            };
            // SAFETY: the block holds at least `ty.size()` writable bytes.
            unsafe { ptr::write_bytes(block.as_ptr(), 0, ty.size()) };
            blocks[ty.id().index()] = Some(block);
        }

        self.free_indices.pop();
        let slot = &mut self.slots[index as usize];
        slot.alive = true;
        slot.mask = mask;
        slot.blocks = blocks;
        self.alive_count += 1;

        let id = EntityId::new(index, slot.generation);
        tracing::trace!(entity = %id, mask = mask.bits(), "entity added");
        Ok(id)
    }

    /// Destroys an entity and returns its blocks to the heap.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::StaleEntity`] if the handle is not live.
    pub fn remove(&mut self, id: EntityId) -> EcsResult<()> {
        let index = self.live_index(id)?;
        for block in self.slots[index].vacate() {
            self.heap.free(block);
        }
        self.free_indices.push(id.index());
        self.alive_count -= 1;
        tracing::trace!(entity = %id, "entity removed");
        Ok(())
    }

    /// Queues a removal to be applied by the next [`World::update`].
    ///
    /// Usable while queries borrow the world.
    pub fn defer_remove(&self, id: EntityId) {
        self.pending_removals.borrow_mut().push(id);
    }

    /// Applies queued removals and returns how many entities were removed.
    ///
    /// Handles that went stale in the meantime (including duplicates) are
    /// skipped.
    pub fn update(&mut self) -> usize {
        let pending = std::mem::take(self.pending_removals.get_mut());
        let removed = pending
            .into_iter()
            .filter(|id| self.remove(*id).is_ok())
            .count();
        if removed > 0 {
            tracing::debug!(removed, alive = self.alive_count, "deferred removals applied");
        }
        removed
    }

    /// Checks if an entity is alive.
    #[inline]
    #[must_use]
    pub fn is_alive(&self, id: EntityId) -> bool {
        self.live_index(id).is_ok()
    }

    /// Presence mask of a live entity.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::StaleEntity`] if the handle is not live.
    pub fn mask_of(&self, id: EntityId) -> EcsResult<ComponentMask> {
        Ok(self.slots[self.live_index(id)?].mask)
    }

    /// Raw block of component `ty` on entity `id`.
    ///
    /// Returns `Ok(None)` if the entity lacks the component and `required`
    /// is `false`.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::StaleEntity`] if the handle is not live.
    ///
    /// # Panics
    ///
    /// Panics if `required` is set and the entity lacks the component.
    pub fn get_component(
        &self,
        id: EntityId,
        ty: ComponentId,
        required: bool,
    ) -> EcsResult<Option<NonNull<u8>>> {
        let slot = &self.slots[self.live_index(id)?];
        match slot.block(ty) {
            Some(block) => Ok(Some(block)),
            None if required => {
                tracing::error!(entity = %id, bit = ty.bit(), "required component missing");
                panic!("{id} has no component with bit {}", ty.bit());
            }
            None => Ok(None),
        }
    }

    /// Typed view of component `ty` on entity `id`.
    ///
    /// # Errors
    ///
    /// - [`EcsError::StaleEntity`] if the handle is not live
    /// - [`EcsError::UnknownComponent`] if `ty` is not registered
    /// - [`EcsError::LayoutMismatch`] if `T` does not fit the registered layout
    pub fn component<T: Pod>(&self, id: EntityId, ty: ComponentId) -> EcsResult<Option<&T>> {
        let layout = self.typed_layout::<T>(ty)?;
        let Some(block) = self.get_component(id, ty, false)? else {
            return Ok(None);
        };
        // SAFETY: the block holds `layout.size()` initialised bytes and is
        // borrowed for as long as `&self`.
        let bytes = unsafe { std::slice::from_raw_parts(block.as_ptr(), layout.size()) };
        bytemuck::try_from_bytes(bytes)
            .map(Some)
            .map_err(|_| mismatch::<T>(layout))
    }

    /// Mutable typed view of component `ty` on entity `id`.
    ///
    /// # Errors
    ///
    /// As [`World::component`].
    pub fn component_mut<T: Pod>(&mut self, id: EntityId, ty: ComponentId) -> EcsResult<Option<&mut T>> {
        let size = self.typed_layout::<T>(ty)?.size();
        let Some(block) = self.get_component(id, ty, false)? else {
            return Ok(None);
        };
        // SAFETY: as in `component`; `&mut self` makes the view unique.
        let bytes = unsafe { std::slice::from_raw_parts_mut(block.as_ptr(), size) };
        match bytemuck::try_from_bytes_mut(bytes) {
            Ok(value) => Ok(Some(value)),
            Err(_) => Err(mismatch::<T>(self.typed_layout::<T>(ty)?)),
        }
    }

    /// Starts a query over entities holding every component in `mask`.
    #[must_use]
    pub fn query(&self, mask: ComponentMask) -> Query<'_> {
        Query::new(self, mask)
    }

    /// Iterates over every live entity in slot order.
    pub fn entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.query(ComponentMask::EMPTY)
    }

    /// Handle of the live occupant of `index`, if any.
    pub(crate) fn live_at(&self, index: usize, mask: ComponentMask) -> Option<EntityId> {
        let slot = &self.slots[index];
        #[allow(clippy::cast_possible_truncation)]
        (slot.alive && slot.mask.contains_all(mask)).then(|| EntityId::new(index as u32, slot.generation))
    }

    pub(crate) fn block_at(&self, index: usize, ty: ComponentId) -> Option<NonNull<u8>> {
        self.slots[index].block(ty)
    }

    fn live_index(&self, id: EntityId) -> EcsResult<usize> {
        let index = id.index() as usize;
        match self.slots.get(index) {
            Some(slot) if !id.is_null() && slot.holds(id) => Ok(index),
            _ => Err(EcsError::StaleEntity(id)),
        }
    }

    fn typed_layout<T: Pod>(&self, ty: ComponentId) -> EcsResult<&ComponentType> {
        let layout = self
            .registry
            .get(ty)
            .ok_or(EcsError::UnknownComponent(ty.bit()))?;
        if std::mem::size_of::<T>() != layout.size() || std::mem::align_of::<T>() > layout.alignment() {
            return Err(mismatch::<T>(layout));
        }
        Ok(layout)
    }
}

fn mismatch<T>(layout: &ComponentType) -> EcsError {
    EcsError::LayoutMismatch {
        component: layout.name().to_owned(),
        expected: layout.size(),
        actual: std::mem::size_of::<T>(),
    }
}

impl Drop for World {
    fn drop(&mut self) {
        let mut released = 0usize;
        for slot in self.slots.iter_mut().filter(|slot| slot.alive) {
            for block in slot.vacate() {
                self.heap.free(block);
                released += 1;
            }
        }
        if released > 0 {
            tracing::debug!(
                entities = self.alive_count,
                blocks = released,
                "world dropped with live entities"
            );
        }
    }
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("capacity", &self.capacity())
            .field("alive_count", &self.alive_count)
            .field("component_types", &self.registry.len())
            .finish_non_exhaustive()
    }
}
