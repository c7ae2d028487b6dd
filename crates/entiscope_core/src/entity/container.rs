//! Entity containers: the in-memory record of one entity in one scope.

use crate::entity::{EntityId, PropertyValue};
use crate::error::{CoreError, CoreResult};
use crate::persistence::PersistedObject;
use crate::types::Version;
use std::collections::BTreeMap;

/// State of an entity within a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityState {
    /// The scope knows the identity but holds no container for it.
    NotLoadedYet,
    /// Every property equals its original value.
    Unchanged,
    /// At least one property differs from its original value.
    Changed,
    /// Created in this scope and not yet committed.
    New,
    /// Marked for deletion in this scope.
    Deleted,
    /// Gone from this scope (committed deletion or discarded new object).
    Invalid,
}

impl EntityState {
    /// Returns `true` for states that must be pushed on commit.
    #[must_use]
    pub fn is_pending(self) -> bool {
        matches!(self, Self::Changed | Self::New | Self::Deleted)
    }
}

#[derive(Debug, Clone, PartialEq)]
struct PropertySlot {
    original: PropertyValue,
    current: PropertyValue,
}

impl PropertySlot {
    fn unchanged(value: PropertyValue) -> Self {
        Self {
            original: value.clone(),
            current: value,
        }
    }

    fn differs(&self) -> bool {
        self.original != self.current
    }
}

/// A mutable record of one entity's property values and version stamp.
///
/// A container is owned by exactly one scope's data manager. Ancestor
/// scopes may hold their own independent container for the same identity.
///
/// # Invariants
///
/// - `Changed` holds iff at least one property's current value differs
///   from its original value (for containers that are not `New`/`Deleted`)
/// - `Unchanged` holds iff every current value equals its original value
#[derive(Debug, Clone)]
pub struct DataContainer {
    id: EntityId,
    version: Version,
    properties: BTreeMap<String, PropertySlot>,
    state: EntityState,
}

impl DataContainer {
    /// Creates a container for an object loaded from the backing store.
    #[must_use]
    pub fn loaded(
        id: EntityId,
        version: Version,
        properties: BTreeMap<String, PropertyValue>,
    ) -> Self {
        Self {
            id,
            version,
            properties: properties
                .into_iter()
                .map(|(name, value)| (name, PropertySlot::unchanged(value)))
                .collect(),
            state: EntityState::Unchanged,
        }
    }

    /// Creates a container for a newly created object.
    #[must_use]
    pub fn new_object(id: EntityId, properties: BTreeMap<String, PropertyValue>) -> Self {
        let mut container = Self::loaded(id, Version::UNSAVED, properties);
        container.state = EntityState::New;
        container
    }

    /// Creates a container from a persisted record.
    #[must_use]
    pub fn from_persisted(object: PersistedObject) -> Self {
        Self::loaded(object.id, object.version, object.properties)
    }

    /// Creates an independent copy for a descendant scope.
    ///
    /// The copy's original values are this container's current values, so
    /// the descendant starts `Unchanged` relative to this scope.
    #[must_use]
    pub fn copy_for_child(&self) -> Self {
        Self::loaded(self.id, self.version, self.current_values())
    }

    /// Returns the entity ID.
    #[must_use]
    pub fn id(&self) -> EntityId {
        self.id
    }

    /// Returns the version stamp the container is based on.
    #[must_use]
    pub fn version(&self) -> Version {
        self.version
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> EntityState {
        self.state
    }

    /// Returns `true` if the object was created in this scope.
    #[must_use]
    pub fn is_new(&self) -> bool {
        self.state == EntityState::New
    }

    /// Returns `true` if the object is marked for deletion.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.state == EntityState::Deleted
    }

    /// Returns the current value of a property.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name).map(|slot| &slot.current)
    }

    /// Returns the original value of a property.
    #[must_use]
    pub fn original_value(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name).map(|slot| &slot.original)
    }

    /// Returns the property names in sorted order.
    pub fn property_names(&self) -> impl Iterator<Item = &str> {
        self.properties.keys().map(String::as_str)
    }

    /// Returns a snapshot of all current values.
    #[must_use]
    pub fn current_values(&self) -> BTreeMap<String, PropertyValue> {
        self.properties
            .iter()
            .map(|(name, slot)| (name.clone(), slot.current.clone()))
            .collect()
    }

    /// Returns `true` if any property differs from its original value.
    #[must_use]
    pub fn has_changed_properties(&self) -> bool {
        self.properties.values().any(PropertySlot::differs)
    }

    /// Sets the current value of a property and recomputes the state.
    ///
    /// Returns `true` if the value actually changed.
    pub(crate) fn set_value(&mut self, name: &str, value: PropertyValue) -> CoreResult<bool> {
        let slot = self
            .properties
            .get_mut(name)
            .ok_or_else(|| CoreError::UnknownProperty {
                class: self.id.class(),
                property: name.to_string(),
            })?;
        if slot.current == value {
            return Ok(false);
        }
        slot.current = value;
        self.refresh_state();
        Ok(true)
    }

    /// Replaces all current values with those of a committing descendant.
    pub(crate) fn accept_values(&mut self, values: BTreeMap<String, PropertyValue>) {
        for (name, value) in values {
            match self.properties.get_mut(&name) {
                Some(slot) => slot.current = value,
                None => {
                    self.properties.insert(
                        name,
                        PropertySlot {
                            original: PropertyValue::Null,
                            current: value,
                        },
                    );
                }
            }
        }
        self.refresh_state();
    }

    pub(crate) fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    pub(crate) fn mark_deleted(&mut self) {
        self.state = EntityState::Deleted;
    }

    /// Makes the current values the new originals.
    pub(crate) fn commit_state(&mut self) {
        for slot in self.properties.values_mut() {
            slot.original = slot.current.clone();
        }
        self.state = EntityState::Unchanged;
    }

    /// Restores the original values.
    pub(crate) fn rollback_state(&mut self) {
        for slot in self.properties.values_mut() {
            slot.current = slot.original.clone();
        }
        self.state = EntityState::Unchanged;
    }

    fn refresh_state(&mut self) {
        match self.state {
            EntityState::New | EntityState::Deleted | EntityState::Invalid => {}
            _ => {
                self.state = if self.has_changed_properties() {
                    EntityState::Changed
                } else {
                    EntityState::Unchanged
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ClassId;

    fn container() -> DataContainer {
        let mut props = BTreeMap::new();
        props.insert("name".to_string(), PropertyValue::from("Alice"));
        props.insert("age".to_string(), PropertyValue::from(30_i64));
        DataContainer::loaded(
            EntityId::named(ClassId::new(1), "alice"),
            Version::new(4),
            props,
        )
    }

    #[test]
    fn loaded_is_unchanged() {
        let c = container();
        assert_eq!(c.state(), EntityState::Unchanged);
        assert_eq!(c.version(), Version::new(4));
    }

    #[test]
    fn set_value_marks_changed_and_back() {
        let mut c = container();
        assert!(c.set_value("name", "Alicia".into()).unwrap());
        assert_eq!(c.state(), EntityState::Changed);
        assert_eq!(c.original_value("name"), Some(&PropertyValue::from("Alice")));

        assert!(c.set_value("name", "Alice".into()).unwrap());
        assert_eq!(c.state(), EntityState::Unchanged);
    }

    #[test]
    fn set_same_value_is_noop() {
        let mut c = container();
        assert!(!c.set_value("age", 30_i64.into()).unwrap());
        assert_eq!(c.state(), EntityState::Unchanged);
    }

    #[test]
    fn unknown_property_rejected() {
        let mut c = container();
        let err = c.set_value("email", "x".into()).unwrap_err();
        assert!(matches!(err, CoreError::UnknownProperty { .. }));
    }

    #[test]
    fn new_stays_new_when_changed() {
        let mut c = DataContainer::new_object(
            EntityId::new(ClassId::new(1)),
            BTreeMap::from([("name".to_string(), PropertyValue::Null)]),
        );
        c.set_value("name", "Bob".into()).unwrap();
        assert_eq!(c.state(), EntityState::New);
        c.commit_state();
        assert_eq!(c.state(), EntityState::Unchanged);
        assert_eq!(c.original_value("name"), Some(&PropertyValue::from("Bob")));
    }

    #[test]
    fn rollback_restores_originals() {
        let mut c = container();
        c.set_value("age", 31_i64.into()).unwrap();
        c.mark_deleted();
        c.rollback_state();
        assert_eq!(c.state(), EntityState::Unchanged);
        assert_eq!(c.value("age"), Some(&PropertyValue::from(30_i64)));
    }

    #[test]
    fn child_copy_uses_current_values() {
        let mut c = container();
        c.set_value("age", 40_i64.into()).unwrap();
        let child = c.copy_for_child();
        assert_eq!(child.state(), EntityState::Unchanged);
        assert_eq!(child.original_value("age"), Some(&PropertyValue::from(40_i64)));
        assert_eq!(child.version(), c.version());
    }

    #[test]
    fn accept_values_recomputes_state() {
        let mut parent = container();
        let mut values = parent.current_values();
        values.insert("age".to_string(), 50_i64.into());
        parent.accept_values(values);
        assert_eq!(parent.state(), EntityState::Changed);
        assert_eq!(parent.value("age"), Some(&PropertyValue::from(50_i64)));
    }
}
