//! Entity identifier.

use crate::types::ClassId;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a persistent entity.
///
/// An entity ID pairs the entity's class with a 128-bit UUID key. IDs are:
/// - Globally unique across scopes and the backing store
/// - Immutable once assigned
/// - Never reused
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId {
    class: ClassId,
    key: Uuid,
}

impl EntityId {
    /// Creates a new random entity ID for the given class.
    #[must_use]
    pub fn new(class: ClassId) -> Self {
        Self {
            class,
            key: Uuid::new_v4(),
        }
    }

    /// Creates an entity ID from an existing UUID key.
    #[must_use]
    pub const fn from_uuid(class: ClassId, key: Uuid) -> Self {
        Self { class, key }
    }

    /// Creates an entity ID from raw key bytes.
    #[must_use]
    pub const fn from_bytes(class: ClassId, bytes: [u8; 16]) -> Self {
        Self {
            class,
            key: Uuid::from_bytes(bytes),
        }
    }

    /// Creates a deterministic entity ID derived from a name.
    ///
    /// The same class and name always yield the same ID, which makes
    /// fixtures and scenario scripts reproducible.
    #[must_use]
    pub fn named(class: ClassId, name: &str) -> Self {
        let qualified = format!("{}/{}", class.as_u32(), name);
        Self {
            class,
            key: Uuid::new_v5(&Uuid::NAMESPACE_OID, qualified.as_bytes()),
        }
    }

    /// Returns the class of the entity.
    #[inline]
    #[must_use]
    pub const fn class(&self) -> ClassId {
        self.class
    }

    /// Returns the UUID key.
    #[inline]
    #[must_use]
    pub const fn key(&self) -> Uuid {
        self.key
    }

    /// Returns the raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.key.as_bytes()
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({}:{})", self.class.as_u32(), self.key)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.class.as_u32(), self.key)
    }
}
