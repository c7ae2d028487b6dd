//! Relation navigation, bidirectional maintenance and lazy completion.

use crate::collection::{
    CollectionChange, CollectionData, CollectionObserver, IndexedCollection, ObservableCollection,
    ReadOnlyCollection, ReadableCollection,
};
use crate::entity::{DataContainer, EntityId};
use crate::error::{CoreError, CoreResult};
use crate::listener::{ListenerBus, RelationModification, ScopeEvent};
use crate::relation::{Completeness, EndPointData, RelationEndPoint, RelationEndPointId};
use crate::schema::{Cardinality, RelationDefinition};
use crate::scope::manager::ScopeManager;
use crate::types::{ScopeId, Version};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

#[derive(Debug, Clone, Copy)]
enum EditAction {
    Set(Option<EntityId>),
    Link(EntityId),
    Unlink(EntityId),
}

/// One planned modification of one end point.
#[derive(Debug, Clone)]
struct Edit {
    end_point: RelationEndPointId,
    cardinality: Cardinality,
    action: EditAction,
    modification: RelationModification,
}

impl Edit {
    fn set(end_point: RelationEndPointId, old: Option<EntityId>, new: Option<EntityId>) -> Self {
        Self {
            end_point,
            cardinality: Cardinality::One,
            action: EditAction::Set(new),
            modification: RelationModification::Set { old, new },
        }
    }

    fn link(end_point: RelationEndPointId, item: EntityId, index: Option<usize>) -> Self {
        Self {
            end_point,
            cardinality: Cardinality::Many,
            action: EditAction::Link(item),
            modification: RelationModification::Collection(CollectionChange::insert(item, index)),
        }
    }

    fn unlink(end_point: RelationEndPointId, item: EntityId, index: Option<usize>) -> Self {
        Self {
            end_point,
            cardinality: Cardinality::Many,
            action: EditAction::Unlink(item),
            modification: RelationModification::Collection(CollectionChange::remove(item, index)),
        }
    }
}

/// Forwards collection notifications to a scope's listeners.
///
/// A failing "changed" notification is held back in `failed` so that the
/// opposite end points are still updated before the error is returned.
struct RelationObserver<'a> {
    scope: ScopeId,
    end_point: &'a RelationEndPointId,
    bus: &'a mut ListenerBus,
    failed: Option<CoreError>,
}

impl CollectionObserver for RelationObserver<'_> {
    fn changing(&mut self, change: &CollectionChange) -> CoreResult<()> {
        self.bus.dispatch(
            self.scope,
            &ScopeEvent::RelationChanging {
                end_point: self.end_point,
                modification: RelationModification::Collection(*change),
            },
        )
    }

    fn changed(&mut self, change: &CollectionChange) -> CoreResult<()> {
        let dispatched = self.bus.dispatch(
            self.scope,
            &ScopeEvent::RelationChanged {
                end_point: self.end_point,
                modification: RelationModification::Collection(*change),
            },
        );
        if let Err(err) = dispatched {
            self.failed.get_or_insert(err);
        }
        Ok(())
    }
}

fn check_target(definition: &RelationDefinition, target: EntityId) -> CoreResult<()> {
    if target.class() != definition.target() {
        return Err(CoreError::relation_mismatch(
            definition.name(),
            format!("{target} is not an instance of {}", definition.target()),
        ));
    }
    Ok(())
}

impl ScopeManager {
    // ========================================================================
    // Navigation
    // ========================================================================

    fn relation_of(
        &self,
        owner: EntityId,
        relation: &str,
        cardinality: Option<Cardinality>,
    ) -> CoreResult<RelationDefinition> {
        let definition = self.schema.relation(relation)?;
        if definition.owner() != owner.class() {
            return Err(CoreError::relation_mismatch(
                relation,
                format!("{owner} does not own this relation"),
            ));
        }
        if let Some(expected) = cardinality {
            if definition.cardinality() != expected {
                let message = match expected {
                    Cardinality::One => "collection relation used as a single-valued one",
                    Cardinality::Many => "single-valued relation used as a collection",
                };
                return Err(CoreError::relation_mismatch(relation, message));
            }
        }
        Ok(definition.clone())
    }

    fn end_point_ref(&self, scope: ScopeId, end_point: &RelationEndPointId) -> CoreResult<&RelationEndPoint> {
        self.scope(scope)?
            .data
            .end_point(end_point)
            .ok_or_else(|| CoreError::invalid_state(format!("end point {end_point} is not registered")))
    }

    /// Returns how much of an end point is known in `scope`, without loading.
    pub fn end_point_state(
        &self,
        scope: ScopeId,
        owner: EntityId,
        relation: &str,
    ) -> CoreResult<Completeness> {
        self.relation_of(owner, relation, None)?;
        Ok(self
            .scope(scope)?
            .data
            .end_point(&RelationEndPointId::new(owner, relation))
            .map_or(Completeness::Unknown, RelationEndPoint::completeness))
    }

    /// Loads an end point's related data if it is not complete yet.
    ///
    /// Calling this on a complete end point does nothing; in particular the
    /// persistence strategy is asked at most once per end point and scope.
    pub fn ensure_complete(&mut self, scope: ScopeId, owner: EntityId, relation: &str) -> CoreResult<()> {
        self.relation_of(owner, relation, None)?;
        self.ensure_alive(scope, owner, "ensure_complete")?;
        self.complete_end_point(scope, &RelationEndPointId::new(owner, relation))
    }

    /// Returns the related object of a single-valued relation, loading on
    /// demand.
    pub fn related_object(
        &mut self,
        scope: ScopeId,
        owner: EntityId,
        relation: &str,
    ) -> CoreResult<Option<EntityId>> {
        self.relation_of(owner, relation, Some(Cardinality::One))?;
        self.ensure_alive(scope, owner, "related_object")?;
        let end_point = RelationEndPointId::new(owner, relation);
        self.complete_end_point(scope, &end_point)?;
        self.end_point_ref(scope, &end_point)?.related_object()
    }

    /// Returns a read-only view of a collection relation, loading on demand.
    pub fn related_objects(
        &mut self,
        scope: ScopeId,
        owner: EntityId,
        relation: &str,
    ) -> CoreResult<ReadOnlyCollection<&IndexedCollection>> {
        self.relation_of(owner, relation, Some(Cardinality::Many))?;
        self.ensure_alive(scope, owner, "related_objects")?;
        let end_point = RelationEndPointId::new(owner, relation);
        self.complete_end_point(scope, &end_point)?;
        let items = self.end_point_ref(scope, &end_point)?.collection()?;
        Ok(ReadOnlyCollection::new(items))
    }

    /// Returns the IDs of a collection relation, loading on demand.
    pub fn related_ids(
        &mut self,
        scope: ScopeId,
        owner: EntityId,
        relation: &str,
    ) -> CoreResult<Vec<EntityId>> {
        Ok(self.related_objects(scope, owner, relation)?.to_vec())
    }

    // ========================================================================
    // Completion
    // ========================================================================

    pub(crate) fn complete_end_point(
        &mut self,
        scope: ScopeId,
        end_point: &RelationEndPointId,
    ) -> CoreResult<()> {
        let definition = self.schema.relation(&end_point.relation)?.clone();
        let started = self
            .scope_mut(scope)?
            .data
            .get_end_point(end_point, definition.cardinality())
            .begin_load()?;
        if !started {
            return Ok(());
        }

        let loaded = match self.fetch_end_point_data(scope, end_point, &definition) {
            Ok(loaded) => loaded,
            Err(err) => {
                if let Some(ep) = self.scope_mut(scope)?.data.end_point_mut(end_point) {
                    ep.abort_load();
                }
                return Err(err);
            }
        };
        let current = self.merge_local_knowledge(scope, end_point, &definition, &loaded)?;
        if let Some(ep) = self.scope_mut(scope)?.data.end_point_mut(end_point) {
            ep.complete_with(loaded, current);
        }
        trace!(scope = %scope, end_point = %end_point, "completed end point");
        Ok(())
    }

    /// Reads the parent's current data (completing it first), or asks the
    /// persistence strategy at the root.
    fn fetch_end_point_data(
        &mut self,
        scope: ScopeId,
        end_point: &RelationEndPointId,
        definition: &RelationDefinition,
    ) -> CoreResult<EndPointData> {
        let parent = self.scope(scope)?.parent;
        match parent {
            Some(parent) => {
                self.complete_end_point(parent, end_point)?;
                Ok(self.end_point_ref(parent, end_point)?.data()?.clone())
            }
            None => {
                trace!(scope = %scope, end_point = %end_point, "loading relation from persistence");
                let data = self
                    .persistence
                    .load_relation(end_point, definition.cardinality())?;
                Ok(EndPointData::from_relation_data(data))
            }
        }
    }

    /// Merges loaded collection data with what `scope` already knows:
    /// objects gone from the scope and objects whose complete inverse end
    /// point points elsewhere are dropped; pending appends follow the
    /// loaded items; objects whose inverse end point points to the owner
    /// are appended last.
    fn merge_local_knowledge(
        &self,
        scope: ScopeId,
        end_point: &RelationEndPointId,
        definition: &RelationDefinition,
        loaded: &EndPointData,
    ) -> CoreResult<EndPointData> {
        let items = match loaded {
            EndPointData::One(_) => return Ok(loaded.clone()),
            EndPointData::Many(items) => items,
        };
        let data = &self.scope(scope)?.data;
        let owner = end_point.object;
        let inverse = self
            .schema
            .inverse_of(definition)
            .filter(|inverse| inverse.cardinality() == Cardinality::One);

        let gone = |id: EntityId| {
            data.is_invalid(id) || data.get(id).is_some_and(DataContainer::is_deleted)
        };
        let points_elsewhere = |id: EntityId| {
            inverse.is_some_and(|inverse| {
                data.end_point(&RelationEndPointId::new(id, inverse.name()))
                    .and_then(|ep| ep.related_object().ok())
                    .is_some_and(|related| related != Some(owner))
            })
        };

        let mut merged =
            IndexedCollection::from_ids(items.iter().filter(|id| !gone(*id) && !points_elsewhere(*id)));
        let pending = data
            .end_point(end_point)
            .map(|ep| ep.pending().to_vec())
            .unwrap_or_default();
        let pointing_here: Vec<EntityId> = inverse
            .map(|inverse| {
                data.end_points_for_relation(inverse.name())
                    .filter(|ep| ep.related_object().ok() == Some(Some(owner)))
                    .map(|ep| ep.id().object)
                    .filter(|id| !gone(*id))
                    .collect()
            })
            .unwrap_or_default();

        for id in pending.into_iter().chain(pointing_here) {
            if !merged.contains(id) {
                merged.push(id)?;
            }
        }
        Ok(EndPointData::Many(merged))
    }

    // ========================================================================
    // Edit planning
    // ========================================================================

    fn inverse_of(&self, definition: &RelationDefinition) -> Option<RelationDefinition> {
        self.schema.inverse_of(definition).cloned()
    }

    /// Whether an opposite collection end point is completed before it is
    /// edited: always when configured, otherwise only if `scope` or one of
    /// its ancestors already knows it as complete.
    fn completes_opposite(&self, scope: ScopeId, end_point: &RelationEndPointId) -> CoreResult<bool> {
        if self.config.complete_opposite_end_points {
            return Ok(true);
        }
        for scope_id in self.ancestry(scope)? {
            let known = self
                .scope(scope_id)?
                .data
                .end_point(end_point)
                .is_some_and(RelationEndPoint::is_complete);
            if known {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Plans removing `item` from `partner`'s end point.
    fn plan_unlink(
        &mut self,
        scope: ScopeId,
        partner: EntityId,
        partner_relation: &RelationDefinition,
        item: EntityId,
    ) -> CoreResult<Option<Edit>> {
        let end_point = RelationEndPointId::new(partner, partner_relation.name());
        match partner_relation.cardinality() {
            Cardinality::One => {
                self.complete_end_point(scope, &end_point)?;
                let current = self.end_point_ref(scope, &end_point)?.related_object()?;
                Ok((current == Some(item)).then(|| Edit::set(end_point, Some(item), None)))
            }
            Cardinality::Many => {
                if self.completes_opposite(scope, &end_point)? {
                    self.complete_end_point(scope, &end_point)?;
                }
                let ep = self
                    .scope_mut(scope)?
                    .data
                    .get_end_point(&end_point, Cardinality::Many);
                if ep.is_complete() {
                    let index = ep.collection()?.index_of(item);
                    Ok(index.map(|index| Edit::unlink(end_point.clone(), item, Some(index))))
                } else {
                    let pending = ep.pending().contains(&item);
                    Ok(pending.then(|| Edit::unlink(end_point.clone(), item, None)))
                }
            }
        }
    }

    /// Plans adding `item` to `partner`'s end point. For a single-valued end
    /// point the displaced object loses its back reference to `partner`.
    fn plan_link(
        &mut self,
        scope: ScopeId,
        partner: EntityId,
        partner_relation: &RelationDefinition,
        item: EntityId,
        item_relation: &RelationDefinition,
    ) -> CoreResult<Vec<Edit>> {
        let end_point = RelationEndPointId::new(partner, partner_relation.name());
        match partner_relation.cardinality() {
            Cardinality::One => {
                self.complete_end_point(scope, &end_point)?;
                let current = self.end_point_ref(scope, &end_point)?.related_object()?;
                if current == Some(item) {
                    return Ok(Vec::new());
                }
                let mut edits = vec![Edit::set(end_point, current, Some(item))];
                if let Some(displaced) = current {
                    edits.extend(self.plan_unlink(scope, displaced, item_relation, partner)?);
                }
                Ok(edits)
            }
            Cardinality::Many => {
                if self.completes_opposite(scope, &end_point)? {
                    self.complete_end_point(scope, &end_point)?;
                }
                let ep = self
                    .scope_mut(scope)?
                    .data
                    .get_end_point(&end_point, Cardinality::Many);
                if ep.is_complete() {
                    let items = ep.collection()?;
                    if items.contains(item) {
                        return Ok(Vec::new());
                    }
                    Ok(vec![Edit::link(end_point.clone(), item, Some(items.len()))])
                } else if ep.pending().contains(&item) {
                    Ok(Vec::new())
                } else {
                    Ok(vec![Edit::link(end_point.clone(), item, None)])
                }
            }
        }
    }

    // ========================================================================
    // Edit execution
    // ========================================================================

    fn fire_relation_events(&mut self, scope: ScopeId, edits: &[Edit], before: bool) -> CoreResult<()> {
        for edit in edits {
            let event = if before {
                ScopeEvent::RelationChanging {
                    end_point: &edit.end_point,
                    modification: edit.modification,
                }
            } else {
                ScopeEvent::RelationChanged {
                    end_point: &edit.end_point,
                    modification: edit.modification,
                }
            };
            self.dispatch(scope, &event)?;
        }
        Ok(())
    }

    fn apply_actions(&mut self, scope: ScopeId, edits: &[Edit]) -> CoreResult<()> {
        let data = &mut self.scope_mut(scope)?.data;
        for edit in edits {
            let ep = data.get_end_point(&edit.end_point, edit.cardinality);
            match edit.action {
                EditAction::Set(related) => {
                    ep.set_related_raw(related)?;
                }
                EditAction::Link(item) => ep.link_raw(item)?,
                EditAction::Unlink(item) => {
                    ep.unlink_raw(item)?;
                }
            }
        }
        Ok(())
    }

    /// Fires every "changing" event, applies all edits, then fires every
    /// "changed" event.
    fn apply_edits(&mut self, scope: ScopeId, edits: &[Edit]) -> CoreResult<()> {
        self.fire_relation_events(scope, edits, true)?;
        self.apply_actions(scope, edits)?;
        self.fire_relation_events(scope, edits, false)
    }

    /// Runs a mutation of a complete collection end point through the
    /// observable decorator, bracketed by the opposite end points' edits.
    ///
    /// Once the primary collection has changed, the opposite edits are
    /// applied even if a "changed" listener fails; the first such error is
    /// returned after every "changed" event has fired.
    fn run_collection_change<R>(
        &mut self,
        scope: ScopeId,
        end_point: &RelationEndPointId,
        opposite: &[Edit],
        operation: &'static str,
        change: impl FnOnce(&mut dyn CollectionData) -> CoreResult<R>,
    ) -> CoreResult<R> {
        self.fire_relation_events(scope, opposite, true)?;
        let (result, failed) = {
            let (data, bus) = self.scope_mut(scope)?.split_mut();
            let items = data
                .end_point_mut(end_point)
                .ok_or_else(|| {
                    CoreError::invalid_state(format!("end point {end_point} is not registered"))
                })?
                .collection_mut(operation)?;
            let observer = RelationObserver {
                scope,
                end_point,
                bus,
                failed: None,
            };
            let mut observable = ObservableCollection::new(items, observer)?;
            let result = change(&mut observable)?;
            let (_, observer) = observable.into_parts();
            (result, observer.failed)
        };
        self.apply_actions(scope, opposite)?;
        let fired = self.fire_opposite_changed(scope, opposite);
        match failed {
            Some(err) => Err(err),
            None => fired.map(|()| result),
        }
    }

    /// Fires every "changed" event for already applied edits, returning the
    /// first listener error.
    fn fire_opposite_changed(&mut self, scope: ScopeId, edits: &[Edit]) -> CoreResult<()> {
        let mut first = None;
        for edit in edits {
            let event = ScopeEvent::RelationChanged {
                end_point: &edit.end_point,
                modification: edit.modification,
            };
            if let Err(err) = self.dispatch(scope, &event) {
                first.get_or_insert(err);
            }
        }
        first.map_or(Ok(()), Err)
    }

    // ========================================================================
    // Relation mutations
    // ========================================================================

    /// Sets the related object of a single-valued relation.
    ///
    /// For a bidirectional relation the previous partner loses its back
    /// reference and the new partner gains one.
    pub fn set_related(
        &mut self,
        scope: ScopeId,
        owner: EntityId,
        relation: &str,
        target: Option<EntityId>,
    ) -> CoreResult<()> {
        self.ensure_writeable(scope, "set_related")?;
        let definition = self.relation_of(owner, relation, Some(Cardinality::One))?;
        self.ensure_alive(scope, owner, "set_related")?;
        if let Some(target) = target {
            check_target(&definition, target)?;
            self.ensure_alive(scope, target, "set_related")?;
        }

        let end_point = RelationEndPointId::new(owner, relation);
        self.complete_end_point(scope, &end_point)?;
        let old = self.end_point_ref(scope, &end_point)?.related_object()?;
        if old == target {
            return Ok(());
        }

        let mut edits = vec![Edit::set(end_point, old, target)];
        if let Some(inverse) = self.inverse_of(&definition) {
            if let Some(old) = old {
                edits.extend(self.plan_unlink(scope, old, &inverse, owner)?);
            }
            if let Some(target) = target {
                edits.extend(self.plan_link(scope, target, &inverse, owner, &definition)?);
            }
        }
        self.apply_edits(scope, &edits)
    }

    fn collection_end_point(
        &mut self,
        scope: ScopeId,
        owner: EntityId,
        relation: &str,
        operation: &'static str,
    ) -> CoreResult<(RelationDefinition, RelationEndPointId)> {
        self.ensure_writeable(scope, operation)?;
        let definition = self.relation_of(owner, relation, Some(Cardinality::Many))?;
        self.ensure_alive(scope, owner, operation)?;
        Ok((definition, RelationEndPointId::new(owner, relation)))
    }

    fn require_complete(
        &mut self,
        scope: ScopeId,
        end_point: &RelationEndPointId,
        operation: &'static str,
    ) -> CoreResult<&IndexedCollection> {
        let ep = self
            .scope_mut(scope)?
            .data
            .get_end_point(end_point, Cardinality::Many);
        if !ep.is_complete() {
            return Err(CoreError::IncompleteEndPointViolation {
                end_point: end_point.clone(),
                operation,
            });
        }
        ep.collection()
    }

    /// Inserts `item` into a collection relation at `index`.
    ///
    /// # Errors
    ///
    /// `IncompleteEndPointViolation` if the collection is not loaded,
    /// `DuplicateRelatedObject` if it already contains `item`.
    pub fn insert_related(
        &mut self,
        scope: ScopeId,
        owner: EntityId,
        relation: &str,
        index: usize,
        item: EntityId,
    ) -> CoreResult<()> {
        let (definition, end_point) =
            self.collection_end_point(scope, owner, relation, "insert_related")?;
        check_target(&definition, item)?;
        self.ensure_alive(scope, item, "insert_related")?;
        let items = self.require_complete(scope, &end_point, "insert_related")?;
        if items.contains(item) {
            return Err(CoreError::DuplicateRelatedObject { end_point, id: item });
        }
        if index > items.len() {
            return Err(CoreError::IndexOutOfRange {
                index,
                len: items.len(),
            });
        }

        let opposite = match self.inverse_of(&definition) {
            Some(inverse) => self.plan_link(scope, item, &inverse, owner, &definition)?,
            None => Vec::new(),
        };
        self.run_collection_change(scope, &end_point, &opposite, "insert_related", |items| {
            items.insert(index, item)
        })
    }

    /// Appends `item` to a collection relation.
    ///
    /// An object that was never persisted may be appended to a collection
    /// that is not loaded yet; it is kept as a pending append and merged in
    /// when the collection completes.
    pub fn add_related(
        &mut self,
        scope: ScopeId,
        owner: EntityId,
        relation: &str,
        item: EntityId,
    ) -> CoreResult<()> {
        let (definition, end_point) =
            self.collection_end_point(scope, owner, relation, "add_related")?;
        check_target(&definition, item)?;
        self.ensure_alive(scope, item, "add_related")?;

        let ep = self
            .scope_mut(scope)?
            .data
            .get_end_point(&end_point, Cardinality::Many);
        if ep.is_complete() {
            let len = ep.collection()?.len();
            return self.insert_related(scope, owner, relation, len, item);
        }
        if ep.pending().contains(&item) {
            return Err(CoreError::DuplicateRelatedObject { end_point, id: item });
        }
        let unsaved = self
            .scope(scope)?
            .data
            .get(item)
            .is_some_and(|c| c.version() == Version::UNSAVED);
        if !unsaved {
            return Err(CoreError::IncompleteEndPointViolation {
                end_point,
                operation: "add_related",
            });
        }

        let mut edits = vec![Edit::link(end_point, item, None)];
        if let Some(inverse) = self.inverse_of(&definition) {
            edits.extend(self.plan_link(scope, item, &inverse, owner, &definition)?);
        }
        self.apply_edits(scope, &edits)
    }

    /// Removes `item` from a collection relation. Returns `false` if it was
    /// not related.
    pub fn remove_related(
        &mut self,
        scope: ScopeId,
        owner: EntityId,
        relation: &str,
        item: EntityId,
    ) -> CoreResult<bool> {
        let (definition, end_point) =
            self.collection_end_point(scope, owner, relation, "remove_related")?;
        let inverse = self.inverse_of(&definition);

        let ep = self
            .scope_mut(scope)?
            .data
            .get_end_point(&end_point, Cardinality::Many);
        if !ep.is_complete() {
            if !ep.pending().contains(&item) {
                return Err(CoreError::IncompleteEndPointViolation {
                    end_point,
                    operation: "remove_related",
                });
            }
            let mut edits = vec![Edit::unlink(end_point, item, None)];
            if let Some(inverse) = inverse {
                edits.extend(self.plan_unlink(scope, item, &inverse, owner)?);
            }
            self.apply_edits(scope, &edits)?;
            return Ok(true);
        }
        if !ep.collection()?.contains(item) {
            return Ok(false);
        }

        let opposite = match inverse {
            Some(inverse) => self.plan_unlink(scope, item, &inverse, owner)?.into_iter().collect(),
            None => Vec::new(),
        };
        self.run_collection_change(scope, &end_point, &opposite, "remove_related", |items| {
            items.remove(item)
        })
    }

    /// Replaces the object at `index` of a collection relation.
    ///
    /// Replacing an object with itself is a no-op without events.
    pub fn replace_related(
        &mut self,
        scope: ScopeId,
        owner: EntityId,
        relation: &str,
        index: usize,
        item: EntityId,
    ) -> CoreResult<()> {
        let (definition, end_point) =
            self.collection_end_point(scope, owner, relation, "replace_related")?;
        check_target(&definition, item)?;
        self.ensure_alive(scope, item, "replace_related")?;
        let items = self.require_complete(scope, &end_point, "replace_related")?;
        let old = items.get(index).ok_or(CoreError::IndexOutOfRange {
            index,
            len: items.len(),
        })?;
        if old == item {
            return Ok(());
        }
        if items.contains(item) {
            return Err(CoreError::DuplicateRelatedObject { end_point, id: item });
        }

        let mut opposite = Vec::new();
        if let Some(inverse) = self.inverse_of(&definition) {
            opposite.extend(self.plan_unlink(scope, old, &inverse, owner)?);
            opposite.extend(self.plan_link(scope, item, &inverse, owner, &definition)?);
        }
        self.run_collection_change(scope, &end_point, &opposite, "replace_related", |items| {
            items.replace(index, item)
        })
    }

    /// Removes every object from a collection relation, last object first.
    pub fn clear_related(&mut self, scope: ScopeId, owner: EntityId, relation: &str) -> CoreResult<()> {
        let (definition, end_point) =
            self.collection_end_point(scope, owner, relation, "clear_related")?;
        let items = self.require_complete(scope, &end_point, "clear_related")?.to_vec();

        let mut opposite = Vec::new();
        if let Some(inverse) = self.inverse_of(&definition) {
            for item in items.into_iter().rev() {
                opposite.extend(self.plan_unlink(scope, item, &inverse, owner)?);
            }
        }
        self.run_collection_change(scope, &end_point, &opposite, "clear_related", |items| {
            items.clear()
        })
    }

    /// Reorders a collection relation.
    pub fn sort_related(
        &mut self,
        scope: ScopeId,
        owner: EntityId,
        relation: &str,
        mut compare: impl FnMut(&EntityId, &EntityId) -> Ordering,
    ) -> CoreResult<()> {
        let (_, end_point) = self.collection_end_point(scope, owner, relation, "sort_related")?;
        self.require_complete(scope, &end_point, "sort_related")?;
        self.run_collection_change(scope, &end_point, &[], "sort_related", |items| {
            items.sort_by(&mut compare)
        })
    }

    /// Reorders a collection relation by a property of the related objects.
    pub fn sort_related_by_property(
        &mut self,
        scope: ScopeId,
        owner: EntityId,
        relation: &str,
        property: &str,
    ) -> CoreResult<()> {
        self.ensure_writeable(scope, "sort_related")?;
        let mut keys = HashMap::new();
        for id in self.related_ids(scope, owner, relation)? {
            let value = self.property(scope, id, property)?;
            keys.insert(id, value);
        }
        self.sort_related(scope, owner, relation, |a, b| match (keys.get(a), keys.get(b)) {
            (Some(a), Some(b)) => a.total_cmp(b),
            _ => Ordering::Equal,
        })
    }

    // ========================================================================
    // Deletion
    // ========================================================================

    /// Deletes an object.
    ///
    /// Fires `ObjectDeleting` (vetoable), removes the object from every
    /// relation it takes part in (both sides of bidirectional relations),
    /// marks it deleted and fires `ObjectDeleted`. A new object is dropped
    /// outright and becomes invalid. Deleting a deleted object is a no-op.
    pub fn delete_object(&mut self, scope: ScopeId, id: EntityId) -> CoreResult<()> {
        self.ensure_writeable(scope, "delete_object")?;
        self.ensure_loaded(scope, id)?;
        let already_deleted = self
            .scope(scope)?
            .data
            .get(id)
            .is_some_and(DataContainer::is_deleted);
        if already_deleted {
            return Ok(());
        }
        self.dispatch(scope, &ScopeEvent::ObjectDeleting { id })?;

        let schema = Arc::clone(&self.schema);
        let mut edits = Vec::new();
        for definition in schema.relations_of(id.class()) {
            let end_point = RelationEndPointId::new(id, definition.name());
            self.complete_end_point(scope, &end_point)?;
            let inverse = schema.inverse_of(definition);
            match self.end_point_ref(scope, &end_point)?.data()?.clone() {
                EndPointData::One(None) => {}
                EndPointData::One(Some(partner)) => {
                    edits.push(Edit::set(end_point, Some(partner), None));
                    if let Some(inverse) = inverse {
                        edits.extend(self.plan_unlink(scope, partner, inverse, id)?);
                    }
                }
                EndPointData::Many(items) => {
                    let items = items.to_vec();
                    for (index, partner) in items.into_iter().enumerate().rev() {
                        edits.push(Edit::unlink(end_point.clone(), partner, Some(index)));
                        if let Some(inverse) = inverse {
                            edits.extend(self.plan_unlink(scope, partner, inverse, id)?);
                        }
                    }
                }
            }
        }

        self.apply_edits(scope, &edits)?;
        self.scope_mut(scope)?.data.mark_deleted(id)?;
        trace!(scope = %scope, entity = %id, "deleted object");
        self.dispatch(scope, &ScopeEvent::ObjectDeleted { id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::CollectionOperation;
    use crate::config::EngineConfig;
    use crate::entity::{EntityState, PropertyValue};
    use crate::listener::{EventKind, FnListener};
    use crate::scope::fixtures::*;

    fn orders_of(manager: &mut ScopeManager, scope: ScopeId, customer: EntityId) -> Vec<EntityId> {
        manager.related_ids(scope, customer, "Customer.orders").unwrap()
    }

    #[test]
    fn setting_one_side_updates_the_other() {
        let Fixture { mut manager, .. } = fixture();
        let root = manager.create_root();
        let ada = manager.new_object(root, CUSTOMER).unwrap();
        let first = manager.new_object(root, ORDER).unwrap();
        let second = manager.new_object(root, ORDER).unwrap();

        manager.set_related(root, first, "Order.customer", Some(ada)).unwrap();
        manager.set_related(root, second, "Order.customer", Some(ada)).unwrap();
        assert_eq!(orders_of(&mut manager, root, ada), vec![first, second]);

        manager.set_related(root, first, "Order.customer", None).unwrap();
        assert_eq!(orders_of(&mut manager, root, ada), vec![second]);
        assert_eq!(manager.related_object(root, first, "Order.customer").unwrap(), None);
    }

    #[test]
    fn moving_between_collections() {
        let Fixture { mut manager, .. } = fixture();
        let root = manager.create_root();
        let ada = manager.new_object(root, CUSTOMER).unwrap();
        let bob = manager.new_object(root, CUSTOMER).unwrap();
        let order = manager.new_object(root, ORDER).unwrap();

        manager.add_related(root, ada, "Customer.orders", order).unwrap();
        manager.add_related(root, bob, "Customer.orders", order).unwrap();

        assert!(orders_of(&mut manager, root, ada).is_empty());
        assert_eq!(orders_of(&mut manager, root, bob), vec![order]);
        assert_eq!(
            manager.related_object(root, order, "Order.customer").unwrap(),
            Some(bob)
        );
    }

    #[test]
    fn one_to_one_displaces_previous_partner() {
        let Fixture { mut manager, .. } = fixture();
        let root = manager.create_root();
        let ada = manager.new_object(root, CUSTOMER).unwrap();
        let bob = manager.new_object(root, CUSTOMER).unwrap();
        let home = manager.new_object(root, ADDRESS).unwrap();

        manager.set_related(root, ada, "Customer.address", Some(home)).unwrap();
        manager.set_related(root, bob, "Customer.address", Some(home)).unwrap();

        assert_eq!(manager.related_object(root, ada, "Customer.address").unwrap(), None);
        assert_eq!(
            manager.related_object(root, home, "Address.customer").unwrap(),
            Some(bob)
        );
    }

    #[test]
    fn completion_loads_once_per_end_point() {
        let Fixture {
            mut manager, store, ..
        } = fixture();
        let ada = seed_customer(&store, "ada");
        let orders = [seed_order(&store, 1), seed_order(&store, 2)];
        seed_orders(&store, ada, &orders);

        let root = manager.create_root();
        let sub = manager.create_sub_scope(root).unwrap();
        assert_eq!(
            manager.end_point_state(sub, ada, "Customer.orders").unwrap(),
            Completeness::Unknown
        );

        assert_eq!(orders_of(&mut manager, sub, ada), orders.to_vec());
        assert_eq!(orders_of(&mut manager, sub, ada), orders.to_vec());
        manager.ensure_complete(sub, ada, "Customer.orders").unwrap();
        assert_eq!(store.relation_load_count(), 1);
        assert_eq!(
            manager.end_point_state(root, ada, "Customer.orders").unwrap(),
            Completeness::Complete
        );
    }

    #[test]
    fn pending_append_merges_on_completion() {
        let Fixture {
            mut manager, store, ..
        } = fixture_with(EngineConfig::new().complete_opposite_end_points(false));
        let ada = seed_customer(&store, "ada");
        let stored = seed_order(&store, 1);
        seed_orders(&store, ada, &[stored]);

        let root = manager.create_root();
        let fresh = manager.new_object(root, ORDER).unwrap();
        manager.set_related(root, fresh, "Order.customer", Some(ada)).unwrap();
        assert_eq!(
            manager.end_point_state(root, ada, "Customer.orders").unwrap(),
            Completeness::Unknown
        );
        assert_eq!(store.relation_load_count(), 0);

        assert_eq!(orders_of(&mut manager, root, ada), vec![stored, fresh]);
    }

    #[test]
    fn completion_drops_objects_pointing_elsewhere() {
        let Fixture {
            mut manager, store, ..
        } = fixture_with(EngineConfig::new().complete_opposite_end_points(false));
        let ada = seed_customer(&store, "ada");
        let kept = seed_order(&store, 1);
        let moved = seed_order(&store, 2);
        seed_orders(&store, ada, &[kept, moved]);

        let root = manager.create_root();
        manager.set_related(root, moved, "Order.customer", None).unwrap();
        assert_eq!(orders_of(&mut manager, root, ada), vec![kept]);
    }

    #[test]
    fn incomplete_collection_accepts_only_unsaved_appends() {
        let Fixture {
            mut manager, store, ..
        } = fixture();
        let ada = seed_customer(&store, "ada");
        let stored = seed_order(&store, 1);
        let root = manager.create_root();

        let err = manager
            .add_related(root, ada, "Customer.orders", stored)
            .unwrap_err();
        assert!(matches!(err, CoreError::IncompleteEndPointViolation { .. }));
        assert!(matches!(
            manager.insert_related(root, ada, "Customer.orders", 0, stored),
            Err(CoreError::IncompleteEndPointViolation { .. })
        ));

        let fresh = manager.new_object(root, ORDER).unwrap();
        manager.add_related(root, ada, "Customer.orders", fresh).unwrap();
        assert_eq!(
            manager.end_point_state(root, ada, "Customer.orders").unwrap(),
            Completeness::Unknown
        );
        assert_eq!(
            manager.related_object(root, fresh, "Order.customer").unwrap(),
            Some(ada)
        );
        assert!(manager.remove_related(root, ada, "Customer.orders", fresh).unwrap());
        assert_eq!(manager.related_object(root, fresh, "Order.customer").unwrap(), None);
    }

    #[test]
    fn collection_mutations_fire_opposite_events_around_primary() {
        let Fixture { mut manager, log, .. } = fixture();
        let root = manager.create_root();
        let ada = manager.new_object(root, CUSTOMER).unwrap();
        let order = manager.new_object(root, ORDER).unwrap();
        log.clear();

        manager.add_related(root, ada, "Customer.orders", order).unwrap();
        let events: Vec<_> = log
            .snapshot()
            .into_iter()
            .map(|r| (r.kind, r.end_point.map(|ep| ep.relation)))
            .collect();
        assert_eq!(
            events,
            vec![
                (EventKind::RelationChanging, Some("Order.customer".to_string())),
                (EventKind::RelationChanging, Some("Customer.orders".to_string())),
                (EventKind::RelationChanged, Some("Customer.orders".to_string())),
                (EventKind::RelationChanged, Some("Order.customer".to_string())),
            ]
        );
        let record = &log.snapshot()[1];
        match record.modification {
            Some(RelationModification::Collection(change)) => {
                assert_eq!(change.operation, CollectionOperation::Insert);
                assert_eq!(change.item, Some(order));
                assert_eq!(change.index, Some(0));
            }
            other => panic!("unexpected modification {other:?}"),
        }
    }

    #[test]
    fn veto_leaves_both_sides_untouched() {
        let Fixture { mut manager, .. } = fixture();
        let root = manager.create_root();
        let ada = manager.new_object(root, CUSTOMER).unwrap();
        let order = manager.new_object(root, ORDER).unwrap();
        manager
            .add_listener(
                root,
                Box::new(FnListener::new("guard", |_, event: &ScopeEvent<'_>| {
                    match event {
                        ScopeEvent::RelationChanging { end_point, .. }
                            if end_point.relation == "Customer.orders" =>
                        {
                            Err(CoreError::veto("orders are frozen"))
                        }
                        _ => Ok(()),
                    }
                })),
            )
            .unwrap();

        assert!(manager.set_related(root, order, "Order.customer", Some(ada)).is_err());
        assert!(manager.add_related(root, ada, "Customer.orders", order).is_err());
        assert_eq!(manager.related_object(root, order, "Order.customer").unwrap(), None);
        assert!(orders_of(&mut manager, root, ada).is_empty());
    }

    #[test]
    fn failing_changed_listener_keeps_both_sides_in_step() {
        let Fixture { mut manager, log, .. } = fixture();
        let root = manager.create_root();
        let ada = manager.new_object(root, CUSTOMER).unwrap();
        let order = manager.new_object(root, ORDER).unwrap();
        manager
            .add_listener(
                root,
                Box::new(FnListener::new("late", |_, event: &ScopeEvent<'_>| {
                    match event {
                        ScopeEvent::RelationChanged { end_point, .. }
                            if end_point.relation == "Customer.orders" =>
                        {
                            Err(CoreError::veto("too late"))
                        }
                        _ => Ok(()),
                    }
                })),
            )
            .unwrap();
        log.clear();

        let err = manager
            .add_related(root, ada, "Customer.orders", order)
            .unwrap_err();
        assert!(matches!(err, CoreError::Vetoed { .. }));
        assert_eq!(orders_of(&mut manager, root, ada), vec![order]);
        assert_eq!(
            manager.related_object(root, order, "Order.customer").unwrap(),
            Some(ada)
        );
        let changed: Vec<_> = log
            .snapshot()
            .into_iter()
            .filter(|r| r.kind == EventKind::RelationChanged)
            .filter_map(|r| r.end_point)
            .map(|ep| ep.relation)
            .collect();
        assert_eq!(changed, vec!["Customer.orders", "Order.customer"]);
    }

    #[test]
    fn insert_replace_and_clear() {
        let Fixture { mut manager, .. } = fixture();
        let root = manager.create_root();
        let ada = manager.new_object(root, CUSTOMER).unwrap();
        let a = manager.new_object(root, ORDER).unwrap();
        let b = manager.new_object(root, ORDER).unwrap();
        let c = manager.new_object(root, ORDER).unwrap();

        manager.insert_related(root, ada, "Customer.orders", 0, a).unwrap();
        manager.insert_related(root, ada, "Customer.orders", 0, b).unwrap();
        assert_eq!(orders_of(&mut manager, root, ada), vec![b, a]);
        assert!(matches!(
            manager.insert_related(root, ada, "Customer.orders", 0, a),
            Err(CoreError::DuplicateRelatedObject { .. })
        ));
        assert!(matches!(
            manager.insert_related(root, ada, "Customer.orders", 5, c),
            Err(CoreError::IndexOutOfRange { index: 5, len: 2 })
        ));

        manager.replace_related(root, ada, "Customer.orders", 0, c).unwrap();
        assert_eq!(orders_of(&mut manager, root, ada), vec![c, a]);
        assert_eq!(manager.related_object(root, b, "Order.customer").unwrap(), None);
        assert_eq!(manager.related_object(root, c, "Order.customer").unwrap(), Some(ada));

        manager.clear_related(root, ada, "Customer.orders").unwrap();
        assert!(orders_of(&mut manager, root, ada).is_empty());
        for order in [a, b, c] {
            assert_eq!(manager.related_object(root, order, "Order.customer").unwrap(), None);
        }
    }

    #[test]
    fn sort_by_property() {
        let Fixture { mut manager, log, .. } = fixture();
        let root = manager.create_root();
        let order = manager.new_object(root, ORDER).unwrap();
        let mut items = Vec::new();
        for product in ["pear", "apple", "fig"] {
            let item = manager.new_object(root, ITEM).unwrap();
            manager.set_property(root, item, "product", product).unwrap();
            manager.add_related(root, order, "Order.items", item).unwrap();
            items.push(item);
        }
        log.clear();

        manager
            .sort_related_by_property(root, order, "Order.items", "product")
            .unwrap();
        assert_eq!(
            manager.related_ids(root, order, "Order.items").unwrap(),
            vec![items[1], items[2], items[0]]
        );
        assert_eq!(
            log.kinds(),
            vec![EventKind::RelationChanging, EventKind::RelationChanged]
        );
    }

    #[test]
    fn relation_type_checks() {
        let Fixture { mut manager, .. } = fixture();
        let root = manager.create_root();
        let ada = manager.new_object(root, CUSTOMER).unwrap();
        let order = manager.new_object(root, ORDER).unwrap();

        assert!(matches!(
            manager.related_object(root, ada, "Customer.orders"),
            Err(CoreError::RelationMismatch { .. })
        ));
        assert!(matches!(
            manager.set_related(root, order, "Order.customer", Some(order)),
            Err(CoreError::RelationMismatch { .. })
        ));
        assert!(matches!(
            manager.related_ids(root, order, "Customer.orders"),
            Err(CoreError::RelationMismatch { .. })
        ));
        assert!(matches!(
            manager.related_ids(root, ada, "Customer.invoices"),
            Err(CoreError::UnknownRelation { .. })
        ));
    }

    #[test]
    fn deleting_unlinks_partners() {
        let Fixture {
            mut manager, store, ..
        } = fixture();
        let ada = seed_customer(&store, "ada");
        let orders = [seed_order(&store, 1), seed_order(&store, 2)];
        seed_orders(&store, ada, &orders);
        let root = manager.create_root();

        manager.delete_object(root, orders[0]).unwrap();
        assert_eq!(orders_of(&mut manager, root, ada), vec![orders[1]]);
        assert_eq!(manager.object_state(root, orders[0]).unwrap(), EntityState::Deleted);
        assert!(matches!(
            manager.related_object(root, orders[0], "Order.customer"),
            Err(CoreError::ObjectDeleted { .. })
        ));

        manager.delete_object(root, ada).unwrap();
        assert_eq!(
            manager.related_object(root, orders[1], "Order.customer").unwrap(),
            None
        );

        manager.commit(root).unwrap();
        assert!(store.get(ada).is_none());
        assert_eq!(manager.object_state(root, ada).unwrap(), EntityState::Invalid);
    }

    #[test]
    fn deleting_new_object_invalidates_it() {
        let Fixture { mut manager, log, .. } = fixture();
        let root = manager.create_root();
        let ada = manager.new_object(root, CUSTOMER).unwrap();
        let order = manager.new_object(root, ORDER).unwrap();
        manager.set_related(root, order, "Order.customer", Some(ada)).unwrap();
        log.clear();

        manager.delete_object(root, order).unwrap();
        assert!(orders_of(&mut manager, root, ada).is_empty());
        assert_eq!(manager.object_state(root, order).unwrap(), EntityState::Invalid);
        let kinds = log.kinds();
        assert_eq!(kinds.first(), Some(&EventKind::ObjectDeleting));
        assert_eq!(kinds.last(), Some(&EventKind::ObjectDeleted));
    }

    #[test]
    fn sub_scope_relation_changes_reach_parent_on_commit() {
        let Fixture {
            mut manager, store, ..
        } = fixture();
        let ada = seed_customer(&store, "ada");
        let root = manager.create_root();
        let sub = manager.create_sub_scope(root).unwrap();

        let order = manager.new_object(sub, ORDER).unwrap();
        manager.set_property(sub, order, "number", 7_i64).unwrap();
        manager.set_related(sub, order, "Order.customer", Some(ada)).unwrap();
        assert!(orders_of(&mut manager, root, ada).is_empty());

        manager.commit(sub).unwrap();
        manager.discard(sub).unwrap();
        assert_eq!(orders_of(&mut manager, root, ada), vec![order]);
        assert_eq!(manager.property(root, order, "number").unwrap(), PropertyValue::Int(7));

        manager.commit(root).unwrap();
        assert_eq!(
            store.relation(&RelationEndPointId::new(order, "Order.customer")),
            Some(crate::persistence::RelationData::One(Some(ada)))
        );
    }
}
