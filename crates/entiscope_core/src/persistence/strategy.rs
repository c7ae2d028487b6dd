//! Persistence strategy trait and change set types.

use crate::entity::{EntityId, PropertyValue};
use crate::error::CoreResult;
use crate::relation::RelationEndPointId;
use crate::schema::Cardinality;
use crate::types::Version;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// An object as stored by the backing store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedObject {
    /// The object identity.
    pub id: EntityId,
    /// Version stamp of the stored record.
    pub version: Version,
    /// Property values.
    pub properties: BTreeMap<String, PropertyValue>,
}

/// Related data of one end point, as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationData {
    /// A single related object, or none.
    One(Option<EntityId>),
    /// An ordered collection of related objects.
    Many(Vec<EntityId>),
}

impl RelationData {
    /// Empty data for the given cardinality.
    #[must_use]
    pub fn empty(cardinality: Cardinality) -> Self {
        match cardinality {
            Cardinality::One => Self::One(None),
            Cardinality::Many => Self::Many(Vec::new()),
        }
    }
}

/// What happened to an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// Created; must not exist in the store yet.
    New,
    /// Property values changed.
    Changed,
    /// Deleted.
    Deleted,
}

/// A change to one object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectChange {
    /// The object identity.
    pub id: EntityId,
    /// Kind of change.
    pub kind: ChangeKind,
    /// Version the change is based on ([`Version::UNSAVED`] for new objects).
    pub expected_version: Version,
    /// Current property values (empty for deletions).
    pub properties: BTreeMap<String, PropertyValue>,
}

/// How an end point's stored data is updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationUpdate {
    /// Replace the stored data.
    Replace(RelationData),
    /// Append to a stored collection that was never loaded.
    Append(Vec<EntityId>),
}

/// A change to one end point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationChange {
    /// The end point.
    pub end_point: RelationEndPointId,
    /// The update.
    pub update: RelationUpdate,
}

/// Everything a root scope pushes to the store in one commit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    /// Object changes.
    pub objects: Vec<ObjectChange>,
    /// End point changes.
    pub relations: Vec<RelationChange>,
}

impl ChangeSet {
    /// Returns `true` if there is nothing to push.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty() && self.relations.is_empty()
    }
}

/// The store's answer to a successful commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitReceipt {
    /// New version stamps of created and changed objects.
    pub versions: HashMap<EntityId, Version>,
}

/// The pluggable backing store of a root scope.
///
/// Implementations must be thread-safe: a store may be shared between
/// independent managers on different threads.
///
/// # Contract
///
/// - `load` returns `Ok(None)` for an identity the store does not know
/// - `load_relation` returns empty data for an end point never stored
/// - `commit` is all-or-nothing: on error, nothing was applied
/// - `commit` fails with `ConcurrencyConflict` when a changed or deleted
///   object's stored version differs from `expected_version`
pub trait PersistenceStrategy: Send + Sync {
    /// Loads one object.
    fn load(&self, id: EntityId) -> CoreResult<Option<PersistedObject>>;

    /// Loads the related data of one end point.
    fn load_relation(
        &self,
        end_point: &RelationEndPointId,
        cardinality: Cardinality,
    ) -> CoreResult<RelationData>;

    /// Applies a change set atomically.
    fn commit(&self, changes: &ChangeSet) -> CoreResult<CommitReceipt>;
}

impl<T: PersistenceStrategy + ?Sized> PersistenceStrategy for Arc<T> {
    fn load(&self, id: EntityId) -> CoreResult<Option<PersistedObject>> {
        (**self).load(id)
    }

    fn load_relation(
        &self,
        end_point: &RelationEndPointId,
        cardinality: Cardinality,
    ) -> CoreResult<RelationData> {
        (**self).load_relation(end_point, cardinality)
    }

    fn commit(&self, changes: &ChangeSet) -> CoreResult<CommitReceipt> {
        (**self).commit(changes)
    }
}
