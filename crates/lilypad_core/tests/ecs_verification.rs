//! # ECS Verification
//!
//! End-to-end checks of the entity store on top of the diagnostic heap:
//!
//! 1. **Components**: blocks are distinct, sized and aligned
//! 2. **Identity**: handles survive slot reuse safely
//! 3. **Queries**: every match exactly once, never a non-match
//!
//! Run with: cargo test --test ecs_verification -- --nocapture

use std::collections::HashSet;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use lilypad_core::ecs::MAX_COMPONENT_TYPES;
use lilypad_core::memory::{AnonymousPages, NullTracer};
use lilypad_core::{
    Component, ComponentMask, ConfigError, DiagnosticHeap, EcsConfig, EcsError, EntityId,
    HeapConfig, LilypadConfig, Position, Velocity, World,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
struct Health {
    current: u32,
}

impl Component for Health {
    const NAME: &'static str = "health";
}

fn heap() -> Arc<DiagnosticHeap> {
    Arc::new(
        DiagnosticHeap::with_collaborators(
            &HeapConfig::with_grow_increment(32 * 1024),
            Box::new(AnonymousPages),
            Box::new(NullTracer),
        )
        .unwrap(),
    )
}

// ============================================================================
// COMPONENTS
// ============================================================================

#[test]
fn verify_two_component_scenario() {
    let heap = heap();
    let mut world = World::new(Arc::clone(&heap), 16);
    let small = world.register("small", 4, 4).unwrap();
    let wide = world.register("wide", 16, 16).unwrap();

    let id = world.add(small.mask() | wide).unwrap();
    let a = world.get_component(id, small, true).unwrap().unwrap().as_ptr() as usize;
    let b = world.get_component(id, wide, true).unwrap().unwrap().as_ptr() as usize;

    assert_ne!(a, b);
    assert!(a + 4 <= b || b + 16 <= a, "blocks overlap");
    assert_eq!(a % 4, 0);
    assert_eq!(b % 16, 0);

    world.remove(id).unwrap();
    assert_eq!(world.query(small.mask()).count(), 0);
    assert_eq!(world.query(wide.mask()).count(), 0);
    assert_eq!(heap.live_allocations(), 0);
}

#[test]
fn verify_typed_components_round_trip() {
    let mut world = World::new(heap(), 8);
    let pos = world.register_type::<Position>().unwrap();
    let health = world.register_type::<Health>().unwrap();
    assert_eq!(world.registry().id_of::<Health>(), Some(health));

    let id = world.add(pos.mask() | health).unwrap();
    *world.component_mut::<Health>(id, health).unwrap().unwrap() = Health { current: 75 };
    world.component_mut::<Position>(id, pos).unwrap().unwrap().z = -3.0;

    assert_eq!(world.component::<Health>(id, health).unwrap().unwrap().current, 75);
    assert_eq!(
        *world.component::<Position>(id, pos).unwrap().unwrap(),
        Position::new(0.0, 0.0, -3.0)
    );
}

#[test]
fn verify_registry_limits() {
    let mut world = World::new(heap(), 4);
    for i in 0..MAX_COMPONENT_TYPES {
        world.register(&format!("c{i}"), 1, 1).unwrap();
    }
    assert!(matches!(
        world.register("one_too_many", 1, 1),
        Err(EcsError::CapacityExceeded { .. })
    ));
    let all = world.registry().all();
    assert_eq!(all.len(), 64);
    let id = world.add(all).unwrap();
    assert_eq!(world.mask_of(id).unwrap(), all);
}

// ============================================================================
// IDENTITY
// ============================================================================

#[test]
fn verify_reuse_safety() {
    let mut world = World::new(heap(), 1);
    let tag = world.register("tag", 8, 8).unwrap();

    let mut previous: Option<EntityId> = None;
    for _ in 0..10 {
        let id = world.add(tag.mask()).unwrap();
        if let Some(old) = previous {
            assert_eq!(id.index(), old.index());
            assert!(id.generation() > old.generation());
            assert!(!world.is_alive(old));
            assert_eq!(world.get_component(old, tag, false), Err(EcsError::StaleEntity(old)));
            assert_eq!(world.remove(old), Err(EcsError::StaleEntity(old)));
        }
        world.remove(id).unwrap();
        previous = Some(id);
    }
}

#[test]
fn verify_world_from_config() {
    let config = LilypadConfig::from_toml_str("[ecs]\nmax_entities = 3\n").unwrap();
    let heap = Arc::new(DiagnosticHeap::new(&config.heap).unwrap());
    let mut world = World::with_config(Arc::clone(&heap), &config.ecs).unwrap();
    assert_eq!(world.capacity(), 3);
    for _ in 0..3 {
        world.add(ComponentMask::EMPTY).unwrap();
    }
    assert_eq!(
        world.add(ComponentMask::EMPTY),
        Err(EcsError::CapacityExceeded { capacity: 3 })
    );

    let empty = EcsConfig { max_entities: 0 };
    assert!(matches!(
        World::with_config(heap, &empty),
        Err(ConfigError::Invalid(_))
    ));
}

// ============================================================================
// QUERIES
// ============================================================================

#[test]
fn verify_query_completeness_and_exclusion() {
    let mut world = World::new(heap(), 256);
    let pos = world.register_type::<Position>().unwrap();
    let vel = world.register_type::<Velocity>().unwrap();
    let health = world.register_type::<Health>().unwrap();
    let masks = [
        pos.mask(),
        pos.mask() | vel,
        vel.mask() | health,
        pos.mask() | vel | health,
        ComponentMask::EMPTY,
    ];

    let mut spawned = Vec::new();
    for i in 0..200 {
        let mask = masks[i % masks.len()];
        spawned.push((world.add(mask).unwrap(), mask));
    }
    for (id, _) in spawned.iter().step_by(7) {
        world.remove(*id).unwrap();
    }
    let live: Vec<_> = spawned
        .iter()
        .filter(|(id, _)| world.is_alive(*id))
        .copied()
        .collect();

    for query_mask in [pos.mask(), vel.mask(), pos.mask() | vel, health.mask(), ComponentMask::EMPTY] {
        let visited: Vec<EntityId> = world.query(query_mask).collect();
        let unique: HashSet<EntityId> = visited.iter().copied().collect();
        assert_eq!(unique.len(), visited.len(), "entity visited twice");

        let expected: HashSet<EntityId> = live
            .iter()
            .filter(|(_, mask)| mask.contains_all(query_mask))
            .map(|(id, _)| *id)
            .collect();
        assert_eq!(unique, expected);
        assert!(visited.windows(2).all(|w| w[0].index() < w[1].index()));
    }
}

#[test]
fn verify_system_style_update() {
    let mut world = World::new(heap(), 64);
    let pos = world.register_type::<Position>().unwrap();
    let vel = world.register_type::<Velocity>().unwrap();
    let health = world.register_type::<Health>().unwrap();

    for i in 0..10u8 {
        let id = world.add(pos.mask() | vel | health).unwrap();
        *world.component_mut::<Velocity>(id, vel).unwrap().unwrap() =
            Velocity::new(f32::from(i), 0.0, 0.0);
        world.component_mut::<Health>(id, health).unwrap().unwrap().current = u32::from(i);
    }

    let movers: Vec<EntityId> = world.query(pos.mask() | vel).collect();
    for id in movers {
        let v = *world.component::<Velocity>(id, vel).unwrap().unwrap();
        world.component_mut::<Position>(id, pos).unwrap().unwrap().x += v.x;
    }

    let mut query = world.query(health.mask());
    while query.is_valid() {
        if query.get::<Health>(health).unwrap().current < 5 {
            world.defer_remove(query.entity());
        }
        query.advance();
    }
    assert_eq!(world.update(), 5);

    let total_x: f32 = world
        .query(pos.mask())
        .map(|id| world.component::<Position>(id, pos).unwrap().unwrap().x)
        .sum();
    assert!((total_x - (5.0 + 6.0 + 7.0 + 8.0 + 9.0)).abs() < f32::EPSILON);
}

#[test]
fn verify_world_drop_releases_everything() {
    let heap = heap();
    {
        let mut world = World::new(Arc::clone(&heap), 100);
        let pos = world.register_type::<Position>().unwrap();
        let vel = world.register_type::<Velocity>().unwrap();
        for _ in 0..100 {
            world.add(pos.mask() | vel).unwrap();
        }
        assert_eq!(heap.live_allocations(), 200);
    }
    let heap = Arc::try_unwrap(heap).unwrap();
    assert!(heap.destroy().is_empty());
}
