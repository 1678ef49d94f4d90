//! # Component Types
//!
//! Components are plain byte blocks described at runtime by a
//! [`ComponentType`]: name, element size and alignment. Each registered type
//! owns one bit of the 64-bit [`ComponentMask`].

use std::fmt;

use bytemuck::{Pod, Zeroable};

use crate::error::{EcsError, EcsResult};

/// Maximum number of component types (one per mask bit).
pub const MAX_COMPONENT_TYPES: usize = 64;

/// Maximum component name length in bytes.
pub const MAX_COMPONENT_NAME_LEN: usize = 32;

/// Bit index of a registered component type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct ComponentId(u8);

impl ComponentId {
    /// Creates an id from a bit index, or `None` if out of range.
    #[inline]
    #[must_use]
    pub const fn new(bit: u8) -> Option<Self> {
        if (bit as usize) < MAX_COMPONENT_TYPES {
            Some(Self(bit))
        } else {
            None
        }
    }

    /// Bit index (0-63).
    #[inline]
    #[must_use]
    pub const fn bit(self) -> u8 {
        self.0
    }

    /// Bit index as a table index.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Mask with only this component set.
    #[inline]
    #[must_use]
    pub const fn mask(self) -> ComponentMask {
        ComponentMask(1 << self.0)
    }
}

/// Set of component types, one bit per [`ComponentId`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ComponentMask(u64);

impl ComponentMask {
    /// The empty set.
    pub const EMPTY: Self = Self(0);

    /// Creates a mask from raw bits.
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// Raw bits.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Returns this mask with `id` added.
    #[inline]
    #[must_use]
    pub const fn with(self, id: ComponentId) -> Self {
        Self(self.0 | (1 << id.0))
    }

    /// Returns this mask with `id` removed.
    #[inline]
    #[must_use]
    pub const fn without(self, id: ComponentId) -> Self {
        Self(self.0 & !(1 << id.0))
    }

    /// Checks membership of a single component.
    #[inline]
    #[must_use]
    pub const fn contains(self, id: ComponentId) -> bool {
        self.0 & (1 << id.0) != 0
    }

    /// Checks that every component of `other` is present.
    #[inline]
    #[must_use]
    pub const fn contains_all(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns `true` if no bit is set.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Number of components in the set.
    #[inline]
    #[must_use]
    pub const fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Iterates over the set in increasing bit order.
    pub fn iter(self) -> impl Iterator<Item = ComponentId> {
        let mut bits = self.0;
        std::iter::from_fn(move || {
            if bits == 0 {
                return None;
            }
            let bit = bits.trailing_zeros() as u8;
            bits &= bits - 1;
            Some(ComponentId(bit))
        })
    }

    /// Builds a mask from component ids.
    #[must_use]
    pub fn from_ids(ids: &[ComponentId]) -> Self {
        ids.iter().fold(Self::EMPTY, |mask, id| mask.with(*id))
    }
}

impl FromIterator<ComponentId> for ComponentMask {
    fn from_iter<I: IntoIterator<Item = ComponentId>>(iter: I) -> Self {
        iter.into_iter().fold(Self::EMPTY, Self::with)
    }
}

impl std::ops::BitOr for ComponentMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOr<ComponentId> for ComponentMask {
    type Output = Self;

    fn bitor(self, rhs: ComponentId) -> Self {
        self.with(rhs)
    }
}

impl From<ComponentId> for ComponentMask {
    fn from(id: ComponentId) -> Self {
        id.mask()
    }
}

/// Runtime description of a component type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComponentType {
    name: String,
    size: usize,
    alignment: usize,
    id: ComponentId,
}

impl ComponentType {
    /// Unique name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Element size in bytes.
    #[inline]
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Element alignment in bytes.
    #[inline]
    #[must_use]
    pub const fn alignment(&self) -> usize {
        self.alignment
    }

    /// Mask bit of this type.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> ComponentId {
        self.id
    }
}

impl fmt::Display for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.id.0)
    }
}

/// Statically typed component.
///
/// # Example
///
/// ```rust
/// use bytemuck::{Pod, Zeroable};
/// use lilypad_core::ecs::Component;
///
/// #[derive(Clone, Copy, Pod, Zeroable)]
/// #[repr(C)]
/// struct Health {
///     current: u32,
///     max: u32,
/// }
///
/// impl Component for Health {
///     const NAME: &'static str = "health";
/// }
/// ```
pub trait Component: Pod + Send + Sync + 'static {
    /// Registry name of this component type.
    const NAME: &'static str;
}

/// World-space position.
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Position {
    /// X coordinate.
    pub x: f32,
    /// Y coordinate.
    pub y: f32,
    /// Z coordinate.
    pub z: f32,
    /// Padding to 16 bytes.
    pub _padding: f32,
}

impl Component for Position {
    const NAME: &'static str = "position";
}

impl Position {
    /// Creates a new position.
    #[inline]
    #[must_use]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self {
            x,
            y,
            z,
            _padding: 0.0,
        }
    }
}

/// Movement in world units per second.
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Velocity {
    /// X velocity.
    pub x: f32,
    /// Y velocity.
    pub y: f32,
    /// Z velocity.
    pub z: f32,
    /// Padding to 16 bytes.
    pub _padding: f32,
}

impl Component for Velocity {
    const NAME: &'static str = "velocity";
}

impl Velocity {
    /// Creates a new velocity.
    #[inline]
    #[must_use]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self {
            x,
            y,
            z,
            _padding: 0.0,
        }
    }
}

/// Registered component types of one world, in bit order.
#[derive(Clone, Debug, Default)]
pub struct ComponentRegistry {
    types: Vec<ComponentType>,
}

impl ComponentRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub const fn new() -> Self {
        Self { types: Vec::new() }
    }

    /// Registers a component type and assigns it the next free bit.
    ///
    /// # Errors
    ///
    /// - [`EcsError::CapacityExceeded`] when 64 types are registered
    /// - [`EcsError::InvalidName`] for an empty or overlong name
    /// - [`EcsError::DuplicateName`] if the name is taken
    /// - [`EcsError::InvalidLayout`] if `alignment` is not a power of two
    pub fn register(&mut self, name: &str, size: usize, alignment: usize) -> EcsResult<ComponentId> {
        if self.types.len() == MAX_COMPONENT_TYPES {
            tracing::error!(name, "component registry full");
            return Err(EcsError::CapacityExceeded {
                capacity: MAX_COMPONENT_TYPES,
            });
        }
        if name.is_empty() || name.len() > MAX_COMPONENT_NAME_LEN {
            return Err(EcsError::InvalidName(name.to_owned()));
        }
        if self.find(name).is_some() {
            return Err(EcsError::DuplicateName(name.to_owned()));
        }
        if !alignment.is_power_of_two() {
            return Err(EcsError::InvalidLayout { size, alignment });
        }

        #[allow(clippy::cast_possible_truncation)]
        let id = ComponentId(self.types.len() as u8);
        self.types.push(ComponentType {
            name: name.to_owned(),
            size,
            alignment,
            id,
        });
        tracing::debug!(name, size, alignment, bit = id.0, "component type registered");
        Ok(id)
    }

    /// Registers `T` under [`Component::NAME`] with its Rust layout.
    ///
    /// # Errors
    ///
    /// As [`ComponentRegistry::register`].
    pub fn register_type<T: Component>(&mut self) -> EcsResult<ComponentId> {
        self.register(T::NAME, std::mem::size_of::<T>(), std::mem::align_of::<T>())
    }

    /// Looks up a type by id.
    #[inline]
    #[must_use]
    pub fn get(&self, id: ComponentId) -> Option<&ComponentType> {
        self.types.get(id.index())
    }

    /// Looks up a type id by name.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<ComponentId> {
        self.types.iter().find(|ty| ty.name == name).map(|ty| ty.id)
    }

    /// Looks up the id `T` was registered under.
    #[must_use]
    pub fn id_of<T: Component>(&self) -> Option<ComponentId> {
        self.find(T::NAME)
    }

    /// Number of registered types.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Returns `true` if nothing is registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Mask of every registered type.
    #[must_use]
    pub fn all(&self) -> ComponentMask {
        self.types.iter().map(ComponentType::id).collect()
    }

    /// Iterates over registered types in bit order.
    pub fn iter(&self) -> std::slice::Iter<'_, ComponentType> {
        self.types.iter()
    }
}
