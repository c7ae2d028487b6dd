//! Lazily loaded relation end point state.

use crate::collection::{CollectionData, IndexedCollection, ReadableCollection};
use crate::entity::EntityId;
use crate::error::{CoreError, CoreResult};
use crate::persistence::RelationData;
use crate::relation::RelationEndPointId;
use crate::schema::Cardinality;

/// Whether an end point's related data is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completeness {
    /// Not loaded yet.
    Unknown,
    /// A load is in progress.
    Loading,
    /// Fully loaded.
    Complete,
}

/// The related data of a complete end point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndPointData {
    /// A single related object, or none.
    One(Option<EntityId>),
    /// An ordered collection of related objects.
    Many(IndexedCollection),
}

impl EndPointData {
    /// Empty data for the given cardinality.
    #[must_use]
    pub fn empty(cardinality: Cardinality) -> Self {
        match cardinality {
            Cardinality::One => Self::One(None),
            Cardinality::Many => Self::Many(IndexedCollection::new()),
        }
    }

    /// Converts persisted relation data.
    #[must_use]
    pub fn from_relation_data(data: RelationData) -> Self {
        match data {
            RelationData::One(id) => Self::One(id),
            RelationData::Many(ids) => Self::Many(IndexedCollection::from_ids(ids)),
        }
    }

    /// Converts to persisted relation data.
    #[must_use]
    pub fn to_relation_data(&self) -> RelationData {
        match self {
            Self::One(id) => RelationData::One(*id),
            Self::Many(items) => RelationData::Many(items.to_vec()),
        }
    }

    /// Returns `true` if `id` is a related object.
    #[must_use]
    pub fn contains(&self, id: EntityId) -> bool {
        match self {
            Self::One(related) => *related == Some(id),
            Self::Many(items) => items.contains(id),
        }
    }
}

#[derive(Debug, Clone)]
enum EndPointState {
    Unknown { pending: Vec<EntityId> },
    Loading { pending: Vec<EntityId> },
    Complete {
        original: EndPointData,
        current: EndPointData,
    },
}

/// One side of a relation on one object, within one scope.
///
/// An incomplete collection end point may collect *pending* appends: new
/// objects added without loading the collection. They are merged in front
/// of the local additions when the end point completes.
#[derive(Debug, Clone)]
pub struct RelationEndPoint {
    id: RelationEndPointId,
    cardinality: Cardinality,
    state: EndPointState,
}

impl RelationEndPoint {
    /// Creates an end point whose data has not been loaded.
    #[must_use]
    pub fn new_incomplete(id: RelationEndPointId, cardinality: Cardinality) -> Self {
        Self {
            id,
            cardinality,
            state: EndPointState::Unknown {
                pending: Vec::new(),
            },
        }
    }

    /// Creates a complete, empty end point (for new objects).
    #[must_use]
    pub fn new_complete(id: RelationEndPointId, cardinality: Cardinality) -> Self {
        Self::with_data(id, EndPointData::empty(cardinality))
    }

    /// Creates a complete end point holding `data` as its original state.
    #[must_use]
    pub fn with_data(id: RelationEndPointId, data: EndPointData) -> Self {
        let cardinality = match data {
            EndPointData::One(_) => Cardinality::One,
            EndPointData::Many(_) => Cardinality::Many,
        };
        Self {
            id,
            cardinality,
            state: EndPointState::Complete {
                original: data.clone(),
                current: data,
            },
        }
    }

    /// Returns the end point ID.
    #[must_use]
    pub fn id(&self) -> &RelationEndPointId {
        &self.id
    }

    /// Returns the cardinality.
    #[must_use]
    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    /// Returns the load state.
    #[must_use]
    pub fn completeness(&self) -> Completeness {
        match self.state {
            EndPointState::Unknown { .. } => Completeness::Unknown,
            EndPointState::Loading { .. } => Completeness::Loading,
            EndPointState::Complete { .. } => Completeness::Complete,
        }
    }

    /// Returns `true` once the related data is known.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        matches!(self.state, EndPointState::Complete { .. })
    }

    /// Moves an unknown end point to loading.
    ///
    /// Returns `false` if the end point is already complete.
    pub(crate) fn begin_load(&mut self) -> CoreResult<bool> {
        match &mut self.state {
            EndPointState::Complete { .. } => Ok(false),
            EndPointState::Loading { .. } => Err(CoreError::invalid_state(format!(
                "end point {} is already loading",
                self.id
            ))),
            EndPointState::Unknown { pending } => {
                let pending = std::mem::take(pending);
                self.state = EndPointState::Loading { pending };
                Ok(true)
            }
        }
    }

    /// Returns a loading end point to unknown after a failed load.
    pub(crate) fn abort_load(&mut self) {
        if let EndPointState::Loading { pending } = &mut self.state {
            let pending = std::mem::take(pending);
            self.state = EndPointState::Unknown { pending };
        }
    }

    /// Completes the end point. Pending appends must already be merged
    /// into `current`.
    pub(crate) fn complete_with(&mut self, original: EndPointData, current: EndPointData) {
        self.state = EndPointState::Complete { original, current };
    }

    /// Replaces the current data of a complete end point, keeping its
    /// original data.
    pub(crate) fn replace_current(&mut self, data: EndPointData) {
        if let EndPointState::Complete { current, .. } = &mut self.state {
            *current = data;
        }
    }

    /// Returns the pending appends of an incomplete end point.
    #[must_use]
    pub fn pending(&self) -> &[EntityId] {
        match &self.state {
            EndPointState::Unknown { pending } | EndPointState::Loading { pending } => {
                pending.as_slice()
            }
            EndPointState::Complete { .. } => &[],
        }
    }

    pub(crate) fn append_pending(&mut self, id: EntityId) -> CoreResult<()> {
        match &mut self.state {
            EndPointState::Unknown { pending } | EndPointState::Loading { pending } => {
                if pending.contains(&id) {
                    return Err(CoreError::DuplicateRelatedObject {
                        end_point: self.id.clone(),
                        id,
                    });
                }
                pending.push(id);
                Ok(())
            }
            EndPointState::Complete { .. } => Err(CoreError::invalid_state(format!(
                "end point {} is complete; pending appends apply only before loading",
                self.id
            ))),
        }
    }

    pub(crate) fn remove_pending(&mut self, id: EntityId) -> bool {
        match &mut self.state {
            EndPointState::Unknown { pending } | EndPointState::Loading { pending } => {
                let before = pending.len();
                pending.retain(|p| *p != id);
                pending.len() != before
            }
            EndPointState::Complete { .. } => false,
        }
    }

    fn incomplete(&self, operation: &'static str) -> CoreError {
        CoreError::IncompleteEndPointViolation {
            end_point: self.id.clone(),
            operation,
        }
    }

    fn current(&self, operation: &'static str) -> CoreResult<&EndPointData> {
        match &self.state {
            EndPointState::Complete { current, .. } => Ok(current),
            _ => Err(self.incomplete(operation)),
        }
    }

    fn current_mut(&mut self, operation: &'static str) -> CoreResult<&mut EndPointData> {
        if !self.is_complete() {
            return Err(self.incomplete(operation));
        }
        match &mut self.state {
            EndPointState::Complete { current, .. } => Ok(current),
            _ => Err(CoreError::invalid_state("end point lost completeness")),
        }
    }

    /// Returns the current data of a complete end point.
    pub fn data(&self) -> CoreResult<&EndPointData> {
        self.current("read")
    }

    /// Returns the related object of a complete single-valued end point.
    pub fn related_object(&self) -> CoreResult<Option<EntityId>> {
        match self.current("read related object")? {
            EndPointData::One(related) => Ok(*related),
            EndPointData::Many(_) => Err(CoreError::relation_mismatch(
                self.id.relation.clone(),
                "collection end point has no single related object",
            )),
        }
    }

    /// Returns the collection of a complete collection end point.
    pub fn collection(&self) -> CoreResult<&IndexedCollection> {
        match self.current("read related objects")? {
            EndPointData::Many(items) => Ok(items),
            EndPointData::One(_) => Err(self.not_a_collection()),
        }
    }

    pub(crate) fn collection_mut(
        &mut self,
        operation: &'static str,
    ) -> CoreResult<&mut IndexedCollection> {
        let relation = self.id.relation.clone();
        match self.current_mut(operation)? {
            EndPointData::Many(items) => Ok(items),
            EndPointData::One(_) => Err(CoreError::relation_mismatch(
                relation,
                "single-valued end point has no collection",
            )),
        }
    }

    fn not_a_collection(&self) -> CoreError {
        CoreError::relation_mismatch(
            self.id.relation.clone(),
            "single-valued end point has no collection",
        )
    }

    /// Sets the related object of a single-valued end point, returning the
    /// previous one. No events are fired.
    pub(crate) fn set_related_raw(
        &mut self,
        related: Option<EntityId>,
    ) -> CoreResult<Option<EntityId>> {
        let relation = self.id.relation.clone();
        match self.current_mut("set related object")? {
            EndPointData::One(slot) => Ok(std::mem::replace(slot, related)),
            EndPointData::Many(_) => Err(CoreError::relation_mismatch(
                relation,
                "collection end point has no single related object",
            )),
        }
    }

    /// Adds `id` to a collection end point without events; pending if the
    /// end point is incomplete.
    pub(crate) fn link_raw(&mut self, id: EntityId) -> CoreResult<()> {
        if self.is_complete() {
            let pushed = self.collection_mut("add related object")?.push(id);
            match pushed {
                Err(CoreError::DuplicateItem { id }) => Err(CoreError::DuplicateRelatedObject {
                    end_point: self.id.clone(),
                    id,
                }),
                other => other,
            }
        } else {
            self.append_pending(id)
        }
    }

    /// Removes `id` from a collection end point without events.
    pub(crate) fn unlink_raw(&mut self, id: EntityId) -> CoreResult<bool> {
        if self.is_complete() {
            self.collection_mut("remove related object")?.remove(id)
        } else {
            Ok(self.remove_pending(id))
        }
    }

    /// Returns `true` if the end point differs from its original state or
    /// carries pending appends.
    #[must_use]
    pub fn has_changed(&self) -> bool {
        match &self.state {
            EndPointState::Complete { original, current } => original != current,
            EndPointState::Unknown { pending } | EndPointState::Loading { pending } => {
                !pending.is_empty()
            }
        }
    }

    /// Returns the current data as persisted relation data, if complete.
    #[must_use]
    pub fn current_data(&self) -> Option<RelationData> {
        match &self.state {
            EndPointState::Complete { current, .. } => Some(current.to_relation_data()),
            _ => None,
        }
    }

    /// Makes the current data the new original and forgets pending appends.
    pub(crate) fn commit_state(&mut self) {
        match &mut self.state {
            EndPointState::Complete { original, current } => *original = current.clone(),
            EndPointState::Unknown { pending } | EndPointState::Loading { pending } => {
                pending.clear()
            }
        }
    }

    /// Restores the original data and forgets pending appends.
    pub(crate) fn rollback_state(&mut self) {
        match &mut self.state {
            EndPointState::Complete { original, current } => *current = original.clone(),
            EndPointState::Unknown { pending } | EndPointState::Loading { pending } => {
                pending.clear()
            }
        }
    }
}
