//! In-memory persistence strategy for tests and tooling.

use crate::entity::{EntityId, PropertyValue};
use crate::error::{CoreError, CoreResult};
use crate::persistence::strategy::{
    ChangeKind, ChangeSet, CommitReceipt, PersistedObject, PersistenceStrategy, RelationData,
    RelationUpdate,
};
use crate::relation::RelationEndPointId;
use crate::schema::Cardinality;
use crate::types::Version;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

/// A persistence strategy backed by in-memory maps.
///
/// Suitable for unit and integration tests. Call counters let tests assert
/// how often the engine reached the store (e.g. that a completed end
/// point is never loaded twice).
///
/// # Thread Safety
///
/// The store is thread-safe and can be shared across managers via `Arc`.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    objects: RwLock<HashMap<EntityId, PersistedObject>>,
    relations: RwLock<HashMap<RelationEndPointId, RelationData>>,
    loads: AtomicU64,
    relation_loads: AtomicU64,
    commits: AtomicU64,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an object at version 1, replacing any existing record.
    pub fn insert(
        &self,
        id: EntityId,
        properties: impl IntoIterator<Item = (String, PropertyValue)>,
    ) {
        self.objects.write().insert(
            id,
            PersistedObject {
                id,
                version: Version::new(1),
                properties: properties.into_iter().collect(),
            },
        );
    }

    /// Seeds the related data of one end point.
    pub fn seed_relation(&self, end_point: RelationEndPointId, data: RelationData) {
        self.relations.write().insert(end_point, data);
    }

    /// Returns a copy of a stored object.
    #[must_use]
    pub fn get(&self, id: EntityId) -> Option<PersistedObject> {
        self.objects.read().get(&id).cloned()
    }

    /// Returns a copy of an end point's stored data.
    #[must_use]
    pub fn relation(&self, end_point: &RelationEndPointId) -> Option<RelationData> {
        self.relations.read().get(end_point).cloned()
    }

    /// Returns the number of stored objects.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.objects.read().len()
    }

    /// Simulates a concurrent writer by bumping an object's version.
    pub fn bump_version(&self, id: EntityId) -> Option<Version> {
        let mut objects = self.objects.write();
        let object = objects.get_mut(&id)?;
        object.version = object.version.next();
        Some(object.version)
    }

    /// Number of object loads served.
    #[must_use]
    pub fn load_count(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }

    /// Number of relation loads served.
    #[must_use]
    pub fn relation_load_count(&self) -> u64 {
        self.relation_loads.load(Ordering::Relaxed)
    }

    /// Number of successful commits.
    #[must_use]
    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }

    fn validate(
        objects: &HashMap<EntityId, PersistedObject>,
        changes: &ChangeSet,
    ) -> CoreResult<()> {
        for change in &changes.objects {
            let stored = objects.get(&change.id).map(|o| o.version);
            match change.kind {
                ChangeKind::New => {
                    if stored.is_some() {
                        return Err(CoreError::DuplicateEntity { id: change.id });
                    }
                }
                ChangeKind::Changed | ChangeKind::Deleted => {
                    if stored != Some(change.expected_version) {
                        return Err(CoreError::ConcurrencyConflict {
                            id: change.id,
                            expected: change.expected_version,
                            actual: stored,
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

impl PersistenceStrategy for InMemoryStore {
    fn load(&self, id: EntityId) -> CoreResult<Option<PersistedObject>> {
        self.loads.fetch_add(1, Ordering::Relaxed);
        Ok(self.objects.read().get(&id).cloned())
    }

    fn load_relation(
        &self,
        end_point: &RelationEndPointId,
        cardinality: Cardinality,
    ) -> CoreResult<RelationData> {
        self.relation_loads.fetch_add(1, Ordering::Relaxed);
        let data = self
            .relations
            .read()
            .get(end_point)
            .cloned()
            .unwrap_or_else(|| RelationData::empty(cardinality));
        match (&data, cardinality) {
            (RelationData::One(_), Cardinality::One) | (RelationData::Many(_), Cardinality::Many) => {
                Ok(data)
            }
            _ => Err(CoreError::persistence(format!(
                "stored data for {end_point} does not match cardinality {cardinality:?}"
            ))),
        }
    }

    fn commit(&self, changes: &ChangeSet) -> CoreResult<CommitReceipt> {
        let mut objects = self.objects.write();
        let mut relations = self.relations.write();
        Self::validate(&objects, changes)?;

        let mut receipt = CommitReceipt::default();
        for change in &changes.objects {
            match change.kind {
                ChangeKind::New | ChangeKind::Changed => {
                    let version = change.expected_version.next();
                    objects.insert(
                        change.id,
                        PersistedObject {
                            id: change.id,
                            version,
                            properties: change.properties.clone(),
                        },
                    );
                    receipt.versions.insert(change.id, version);
                }
                ChangeKind::Deleted => {
                    objects.remove(&change.id);
                    relations.retain(|end_point, _| end_point.object != change.id);
                }
            }
        }

        for change in &changes.relations {
            match &change.update {
                RelationUpdate::Replace(data) => {
                    relations.insert(change.end_point.clone(), data.clone());
                }
                RelationUpdate::Append(ids) => {
                    let entry = relations
                        .entry(change.end_point.clone())
                        .or_insert_with(|| RelationData::Many(Vec::new()));
                    if let RelationData::Many(items) = entry {
                        for id in ids {
                            if !items.contains(id) {
                                items.push(*id);
                            }
                        }
                    }
                }
            }
        }

        self.commits.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            objects = changes.objects.len(),
            relations = changes.relations.len(),
            "in-memory store applied change set"
        );
        Ok(receipt)
    }
}
