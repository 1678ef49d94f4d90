//! # Queries
//!
//! Cursor over live entities whose presence mask contains a requested mask,
//! in increasing slot order. A query borrows its world, so entities cannot
//! be added or removed while it is alive; use [`World::defer_remove`] for
//! removals discovered during iteration.

use std::ptr::NonNull;

use bytemuck::Pod;

use super::component::{ComponentId, ComponentMask};
use super::entity::EntityId;
use super::world::World;
use crate::error::EcsResult;

/// Query cursor.
#[derive(Clone, Debug)]
pub struct Query<'w> {
    world: &'w World,
    mask: ComponentMask,
    cursor: usize,
    current: Option<EntityId>,
}

impl<'w> Query<'w> {
    pub(crate) fn new(world: &'w World, mask: ComponentMask) -> Self {
        let mut query = Self {
            world,
            mask,
            cursor: 0,
            current: None,
        };
        query.seek();
        query
    }

    /// Moves the cursor forward to the next matching slot, starting at the
    /// current one.
    fn seek(&mut self) {
        let slots = self.world.capacity();
        while self.cursor < slots {
            if let Some(id) = self.world.live_at(self.cursor, self.mask) {
                self.current = Some(id);
                return;
            }
            self.cursor += 1;
        }
        self.current = None;
    }

    /// Requested mask.
    #[inline]
    #[must_use]
    pub const fn mask(&self) -> ComponentMask {
        self.mask
    }

    /// Returns `true` while the cursor rests on a matching entity.
    #[inline]
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.current.is_some()
    }

    /// Moves to the next matching entity. No-op once exhausted.
    pub fn advance(&mut self) {
        if self.current.is_some() {
            self.cursor += 1;
            self.seek();
        }
    }

    /// Entity under the cursor.
    ///
    /// # Panics
    ///
    /// Panics if the query is exhausted.
    #[must_use]
    pub fn entity(&self) -> EntityId {
        match self.current {
            Some(id) => id,
            None => panic!("query exhausted"),
        }
    }

    /// Raw block of component `ty` for the entity under the cursor.
    ///
    /// `ty` must be part of the query mask.
    ///
    /// # Panics
    ///
    /// Panics if the query is exhausted or the entity lacks `ty`.
    #[must_use]
    pub fn component(&self, ty: ComponentId) -> NonNull<u8> {
        debug_assert!(self.mask.contains(ty), "component outside the query mask");
        let entity = self.entity();
        match self.world.block_at(self.cursor, ty) {
            Some(block) => block,
            None => panic!("{entity} has no component with bit {}", ty.bit()),
        }
    }

    /// Typed view of component `ty` for the entity under the cursor.
    ///
    /// # Errors
    ///
    /// As [`World::component`].
    ///
    /// # Panics
    ///
    /// Panics if the query is exhausted or the entity lacks `ty`.
    pub fn get<T: Pod>(&self, ty: ComponentId) -> EcsResult<&'w T> {
        let entity = self.entity();
        match self.world.component::<T>(entity, ty)? {
            Some(value) => Ok(value),
            None => panic!("{entity} has no component with bit {}", ty.bit()),
        }
    }
}

impl Iterator for Query<'_> {
    type Item = EntityId;

    fn next(&mut self) -> Option<EntityId> {
        let current = self.current?;
        self.advance();
        Some(current)
    }
}

impl std::iter::FusedIterator for Query<'_> {}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::ecs::component::{Position, Velocity};
    use crate::memory::DiagnosticHeap;

    fn world() -> World {
        World::new(Arc::new(DiagnosticHeap::create(64 * 1024).unwrap()), 64)
    }

    #[test]
    fn test_query_matches_superset_masks() {
        let mut world = world();
        let pos = world.register_type::<Position>().unwrap();
        let vel = world.register_type::<Velocity>().unwrap();

        let a = world.add(pos.mask()).unwrap();
        let b = world.add(pos.mask() | vel).unwrap();
        let c = world.add(vel.mask()).unwrap();

        assert_eq!(world.query(pos.mask()).collect::<Vec<_>>(), vec![a, b]);
        assert_eq!(world.query(vel.mask()).collect::<Vec<_>>(), vec![b, c]);
        assert_eq!(world.query(pos.mask() | vel).collect::<Vec<_>>(), vec![b]);
        assert_eq!(world.query(ComponentMask::EMPTY).count(), 3);
    }

    #[test]
    fn test_cursor_protocol() {
        let mut world = world();
        let pos = world.register_type::<Position>().unwrap();
        let id = world.add(pos.mask()).unwrap();
        world
            .component_mut::<Position>(id, pos)
            .unwrap()
            .unwrap()
            .x = 4.0;

        let mut query = world.query(pos.mask());
        assert!(query.is_valid());
        assert_eq!(query.entity(), id);
        assert_eq!(
            query.component(pos),
            world.get_component(id, pos, true).unwrap().unwrap()
        );
        assert!((query.get::<Position>(pos).unwrap().x - 4.0).abs() < f32::EPSILON);

        query.advance();
        assert!(!query.is_valid());
        query.advance();
        assert!(!query.is_valid());
        assert_eq!(query.next(), None);
    }

    #[test]
    fn test_empty_world_query_is_invalid() {
        let mut world = world();
        let pos = world.register_type::<Position>().unwrap();
        assert!(!world.query(pos.mask()).is_valid());
    }

    #[test]
    fn test_concurrent_cursors() {
        let mut world = world();
        let pos = world.register_type::<Position>().unwrap();
        for _ in 0..4 {
            world.add(pos.mask()).unwrap();
        }
        let outer = world.query(pos.mask());
        let pairs: usize = outer.map(|_| world.query(pos.mask()).count()).sum();
        assert_eq!(pairs, 16);
    }
}
