//! The data manager of one scope.

use crate::collection::ReadableCollection;
use crate::entity::{DataContainer, EntityId, EntityState, PropertyValue};
use crate::error::{CoreError, CoreResult};
use crate::persistence::{
    ChangeKind, ChangeSet, CommitReceipt, ObjectChange, RelationChange, RelationUpdate,
};
use crate::relation::{EndPointData, RelationEndPoint, RelationEndPointId};
use crate::schema::{Cardinality, Schema};
use crate::types::Version;
use std::collections::{BTreeMap, BTreeSet};

/// Result of marking an object deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The object was already deleted.
    NoOp,
    /// A new object was dropped outright and is now invalid.
    Removed,
    /// The object is marked deleted until commit.
    Marked,
}

/// An object change handed from a committing sub-scope to its parent.
#[derive(Debug, Clone)]
pub(crate) struct PromotedObject {
    pub id: EntityId,
    pub state: EntityState,
    pub values: BTreeMap<String, PropertyValue>,
}

/// An end point change handed from a committing sub-scope to its parent.
#[derive(Debug, Clone)]
pub(crate) struct PromotedEndPoint {
    pub id: RelationEndPointId,
    pub cardinality: Cardinality,
    pub data: Option<EndPointData>,
    pub pending: Vec<EntityId>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Promotion {
    pub objects: Vec<PromotedObject>,
    pub end_points: Vec<PromotedEndPoint>,
}

/// Tracks the containers and end points known in one scope.
///
/// The data manager is purely a registry: it never fires events and never
/// talks to the persistence strategy. Objects that left the scope (a
/// committed deletion or a dropped new object) are remembered as invalid.
#[derive(Debug, Clone, Default)]
pub struct DataManager {
    containers: BTreeMap<EntityId, DataContainer>,
    end_points: BTreeMap<RelationEndPointId, RelationEndPoint>,
    invalid: BTreeSet<EntityId>,
}

impl DataManager {
    /// Creates an empty data manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the container for `id`.
    #[must_use]
    pub fn get(&self, id: EntityId) -> Option<&DataContainer> {
        self.containers.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: EntityId) -> Option<&mut DataContainer> {
        self.containers.get_mut(&id)
    }

    /// Returns `true` if a container for `id` is registered.
    #[must_use]
    pub fn contains(&self, id: EntityId) -> bool {
        self.containers.contains_key(&id)
    }

    /// Returns `true` if `id` left this scope.
    #[must_use]
    pub fn is_invalid(&self, id: EntityId) -> bool {
        self.invalid.contains(&id)
    }

    /// Returns the number of registered containers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.containers.len()
    }

    /// Returns `true` if no container is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }

    /// Iterates over the registered containers in identity order.
    pub fn containers(&self) -> impl Iterator<Item = &DataContainer> {
        self.containers.values()
    }

    /// Registers a container.
    pub(crate) fn register(&mut self, container: DataContainer) -> CoreResult<()> {
        let id = container.id();
        if self.containers.contains_key(&id) {
            return Err(CoreError::DuplicateEntity { id });
        }
        self.containers.insert(id, container);
        Ok(())
    }

    fn forget(&mut self, id: EntityId) {
        self.containers.remove(&id);
        self.end_points.retain(|ep, _| ep.object != id);
        self.invalid.insert(id);
    }

    /// Marks a registered object deleted.
    pub(crate) fn mark_deleted(&mut self, id: EntityId) -> CoreResult<DeleteOutcome> {
        let container = self
            .containers
            .get_mut(&id)
            .ok_or(CoreError::ObjectNotFound { id })?;
        match container.state() {
            EntityState::Deleted => Ok(DeleteOutcome::NoOp),
            EntityState::New => {
                self.forget(id);
                Ok(DeleteOutcome::Removed)
            }
            _ => {
                container.mark_deleted();
                Ok(DeleteOutcome::Marked)
            }
        }
    }

    /// Returns an end point.
    #[must_use]
    pub fn end_point(&self, id: &RelationEndPointId) -> Option<&RelationEndPoint> {
        self.end_points.get(id)
    }

    pub(crate) fn end_point_mut(&mut self, id: &RelationEndPointId) -> Option<&mut RelationEndPoint> {
        self.end_points.get_mut(id)
    }

    /// Returns an end point, registering it as incomplete if unknown.
    pub(crate) fn get_end_point(
        &mut self,
        id: &RelationEndPointId,
        cardinality: Cardinality,
    ) -> &mut RelationEndPoint {
        self.end_points
            .entry(id.clone())
            .or_insert_with(|| RelationEndPoint::new_incomplete(id.clone(), cardinality))
    }

    pub(crate) fn insert_end_point(&mut self, end_point: RelationEndPoint) {
        self.end_points.insert(end_point.id().clone(), end_point);
    }

    /// Iterates over the end points of one relation.
    pub fn end_points_for_relation<'a>(
        &'a self,
        relation: &'a str,
    ) -> impl Iterator<Item = &'a RelationEndPoint> + 'a {
        self.end_points
            .values()
            .filter(move |ep| ep.id().relation == relation)
    }

    /// Returns containers with pending changes.
    #[must_use]
    pub fn changed_containers(&self) -> Vec<&DataContainer> {
        self.containers
            .values()
            .filter(|c| c.state().is_pending())
            .collect()
    }

    /// Returns end points whose data differs from their original data.
    #[must_use]
    pub fn changed_end_points(&self) -> Vec<&RelationEndPoint> {
        self.end_points.values().filter(|ep| ep.has_changed()).collect()
    }

    /// Returns `true` if anything would be pushed on commit.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.containers.values().any(|c| c.state().is_pending())
            || self.end_points.values().any(RelationEndPoint::has_changed)
    }

    /// Returns `true` if any end point owned by `id` changed.
    #[must_use]
    pub fn has_changed_end_points(&self, id: EntityId) -> bool {
        self.end_points
            .values()
            .any(|ep| ep.id().object == id && ep.has_changed())
    }

    /// Identities whose container or end points changed, in identity order.
    #[must_use]
    pub fn changed_objects(&self) -> Vec<EntityId> {
        let mut ids: BTreeSet<EntityId> = self
            .changed_containers()
            .into_iter()
            .map(DataContainer::id)
            .collect();
        ids.extend(self.changed_end_points().into_iter().map(|ep| ep.id().object));
        ids.into_iter().collect()
    }

    /// Builds the change set a root scope pushes to the store.
    ///
    /// End points owned by deleted objects are left out.
    pub(crate) fn change_set(&self) -> ChangeSet {
        let mut changes = ChangeSet::default();
        for container in self.changed_containers() {
            let kind = match container.state() {
                EntityState::New => ChangeKind::New,
                EntityState::Deleted => ChangeKind::Deleted,
                _ => ChangeKind::Changed,
            };
            changes.objects.push(ObjectChange {
                id: container.id(),
                kind,
                expected_version: if kind == ChangeKind::New {
                    Version::UNSAVED
                } else {
                    container.version()
                },
                properties: if kind == ChangeKind::Deleted {
                    BTreeMap::new()
                } else {
                    container.current_values()
                },
            });
        }
        for end_point in self.changed_end_points() {
            let owner_deleted = self
                .containers
                .get(&end_point.id().object)
                .is_some_and(DataContainer::is_deleted);
            if owner_deleted {
                continue;
            }
            let update = match end_point.current_data() {
                Some(data) => RelationUpdate::Replace(data),
                None => RelationUpdate::Append(end_point.pending().to_vec()),
            };
            changes.relations.push(RelationChange {
                end_point: end_point.id().clone(),
                update,
            });
        }
        changes
    }

    /// Stamps the versions assigned by the store.
    pub(crate) fn apply_receipt(&mut self, receipt: &CommitReceipt) {
        for (id, version) in &receipt.versions {
            if let Some(container) = self.containers.get_mut(id) {
                container.set_version(*version);
            }
        }
    }

    /// Collects everything a committing sub-scope hands to its parent.
    ///
    /// Every end point of a new object is included so that the parent knows
    /// it as complete.
    pub(crate) fn collect_promotion(&self) -> Promotion {
        let objects = self
            .changed_containers()
            .into_iter()
            .map(|c| PromotedObject {
                id: c.id(),
                state: c.state(),
                values: c.current_values(),
            })
            .collect();
        let end_points = self
            .end_points
            .values()
            .filter(|ep| {
                ep.has_changed()
                    || self
                        .containers
                        .get(&ep.id().object)
                        .is_some_and(DataContainer::is_new)
            })
            .map(|ep| PromotedEndPoint {
                id: ep.id().clone(),
                cardinality: ep.cardinality(),
                data: ep.data().ok().cloned(),
                pending: ep.pending().to_vec(),
            })
            .collect();
        Promotion {
            objects,
            end_points,
        }
    }

    /// Applies a child's promoted changes to this (parent) data manager.
    ///
    /// Complete collections here whose inverse single-valued end point was
    /// promoted are brought in line with the new partner, so a child that
    /// left an opposite collection incomplete cannot leave this scope with
    /// a stale one.
    pub(crate) fn absorb(&mut self, promotion: Promotion, schema: &Schema) -> CoreResult<()> {
        let previous: Vec<(RelationEndPointId, Option<Option<EntityId>>)> = promotion
            .end_points
            .iter()
            .filter(|promoted| promoted.cardinality == Cardinality::One)
            .map(|promoted| {
                let old = self
                    .end_points
                    .get(&promoted.id)
                    .and_then(|ep| ep.related_object().ok());
                (promoted.id.clone(), old)
            })
            .collect();

        for object in promotion.objects {
            match object.state {
                EntityState::New => {
                    self.register(DataContainer::new_object(object.id, object.values))?;
                }
                EntityState::Deleted => {
                    if self.containers.contains_key(&object.id) {
                        self.mark_deleted(object.id)?;
                    }
                }
                _ => {
                    let container = self.containers.get_mut(&object.id).ok_or_else(|| {
                        CoreError::invalid_state(format!(
                            "promoted object {} is not registered in the parent scope",
                            object.id
                        ))
                    })?;
                    container.accept_values(object.values);
                }
            }
        }

        for promoted in promotion.end_points {
            if self.invalid.contains(&promoted.id.object) {
                continue;
            }
            let end_point = self.get_end_point(&promoted.id, promoted.cardinality);
            match promoted.data {
                Some(data) => {
                    if !end_point.is_complete() {
                        end_point.complete_with(EndPointData::empty(promoted.cardinality), data);
                    } else {
                        end_point.replace_current(data);
                    }
                }
                None => {
                    for id in promoted.pending {
                        match end_point.link_raw(id) {
                            Ok(()) | Err(CoreError::DuplicateRelatedObject { .. }) => {}
                            Err(err) => return Err(err),
                        }
                    }
                }
            }
        }

        for (id, old) in previous {
            self.reconcile_inverse(schema, &id, old)?;
        }
        Ok(())
    }

    /// Moves `end_point.object` between the complete inverse collections of
    /// its previous and current partner.
    fn reconcile_inverse(
        &mut self,
        schema: &Schema,
        end_point: &RelationEndPointId,
        old: Option<Option<EntityId>>,
    ) -> CoreResult<()> {
        let definition = schema.relation(&end_point.relation)?;
        let Some(inverse) = schema
            .inverse_of(definition)
            .filter(|inverse| inverse.cardinality() == Cardinality::Many)
        else {
            return Ok(());
        };
        let owner = end_point.object;
        let current = if self.is_invalid(owner) {
            Some(None)
        } else {
            self.end_points
                .get(end_point)
                .and_then(|ep| ep.related_object().ok())
        };
        let Some(current) = current else {
            return Ok(());
        };
        if old == Some(current) {
            return Ok(());
        }

        if let Some(Some(previous)) = old {
            let id = RelationEndPointId::new(previous, inverse.name());
            if let Some(ep) = self.end_points.get_mut(&id).filter(|ep| ep.is_complete()) {
                ep.unlink_raw(owner)?;
            }
        }
        if let Some(next) = current {
            let id = RelationEndPointId::new(next, inverse.name());
            if let Some(ep) = self.end_points.get_mut(&id).filter(|ep| ep.is_complete()) {
                if !ep.collection()?.contains(owner) {
                    ep.link_raw(owner)?;
                }
            }
        }
        Ok(())
    }

    /// Accepts the current state: deleted objects become invalid, all
    /// other containers and end points take their current data as original.
    pub(crate) fn commit_local(&mut self) {
        let deleted: Vec<EntityId> = self
            .containers
            .values()
            .filter(|c| c.is_deleted())
            .map(DataContainer::id)
            .collect();
        for id in deleted {
            self.forget(id);
        }
        for container in self.containers.values_mut() {
            container.commit_state();
        }
        for end_point in self.end_points.values_mut() {
            end_point.commit_state();
        }
    }

    /// Reverts to the original state: new objects become invalid, all other
    /// containers and end points restore their original data.
    pub(crate) fn rollback_local(&mut self) {
        let created: Vec<EntityId> = self
            .containers
            .values()
            .filter(|c| c.is_new())
            .map(DataContainer::id)
            .collect();
        for id in created {
            self.forget(id);
        }
        for container in self.containers.values_mut() {
            container.rollback_state();
        }
        for end_point in self.end_points.values_mut() {
            end_point.rollback_state();
        }
    }
}
