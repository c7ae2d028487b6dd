//! Read-only collection decorator.

use crate::collection::data::{CollectionData, DecoratorKind, ReadableCollection};
use crate::entity::EntityId;
use crate::error::{CoreError, CoreResult};
use std::cmp::Ordering;

/// Exposes collection data for reading and rejects every mutation.
///
/// This is the outermost layer of a decorator chain; the read operations
/// pass straight through to the wrapped data.
#[derive(Debug, Clone)]
pub struct ReadOnlyCollection<C> {
    inner: C,
}

impl<C: ReadableCollection> ReadOnlyCollection<C> {
    /// Wraps `inner`.
    pub fn new(inner: C) -> Self {
        Self { inner }
    }

    /// Returns the wrapped data.
    pub fn inner(&self) -> &C {
        &self.inner
    }
}

impl<C: ReadableCollection> ReadableCollection for ReadOnlyCollection<C> {
    fn len(&self) -> usize {
        self.inner.len()
    }

    fn get(&self, index: usize) -> Option<EntityId> {
        self.inner.get(index)
    }

    fn index_of(&self, id: EntityId) -> Option<usize> {
        self.inner.index_of(id)
    }

    fn to_vec(&self) -> Vec<EntityId> {
        self.inner.to_vec()
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn decorators(&self) -> Vec<DecoratorKind> {
        let mut kinds = vec![DecoratorKind::ReadOnly];
        kinds.extend(self.inner.decorators());
        kinds
    }
}

impl<C: ReadableCollection> CollectionData for ReadOnlyCollection<C> {
    fn insert(&mut self, _index: usize, _id: EntityId) -> CoreResult<()> {
        Err(CoreError::not_supported("insert into a read-only collection"))
    }

    fn remove(&mut self, _id: EntityId) -> CoreResult<bool> {
        Err(CoreError::not_supported("remove from a read-only collection"))
    }

    fn remove_at(&mut self, _index: usize) -> CoreResult<EntityId> {
        Err(CoreError::not_supported("remove from a read-only collection"))
    }

    fn replace(&mut self, _index: usize, _id: EntityId) -> CoreResult<()> {
        Err(CoreError::not_supported("replace in a read-only collection"))
    }

    fn clear(&mut self) -> CoreResult<()> {
        Err(CoreError::not_supported("clear a read-only collection"))
    }

    fn sort_by(
        &mut self,
        _compare: &mut dyn FnMut(&EntityId, &EntityId) -> Ordering,
    ) -> CoreResult<()> {
        Err(CoreError::not_supported("sort a read-only collection"))
    }
}

impl<C: ReadableCollection> IntoIterator for &ReadOnlyCollection<C> {
    type Item = EntityId;
    type IntoIter = std::vec::IntoIter<EntityId>;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.to_vec().into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::data::IndexedCollection;
    use crate::types::ClassId;

    #[test]
    fn reads_pass_through() {
        let a = EntityId::named(ClassId::new(1), "a");
        let b = EntityId::named(ClassId::new(1), "b");
        let data = IndexedCollection::from_ids([a, b]);
        let view = ReadOnlyCollection::new(&data);
        assert_eq!(view.len(), 2);
        assert_eq!(view.get(1), Some(b));
        assert_eq!(view.index_of(a), Some(0));
        assert!(view.is_read_only());
        assert_eq!((&view).into_iter().collect::<Vec<_>>(), vec![a, b]);
    }

    #[test]
    fn every_mutation_rejected() {
        let a = EntityId::named(ClassId::new(1), "a");
        let data = IndexedCollection::from_ids([a]);
        let mut view = ReadOnlyCollection::new(data.clone());

        assert!(matches!(view.push(a), Err(CoreError::NotSupported { .. })));
        assert!(view.remove(a).is_err());
        assert!(view.remove_at(0).is_err());
        assert!(view.replace(0, a).is_err());
        assert!(view.clear().is_err());
        assert!(view.sort_by(&mut |x, y| x.cmp(y)).is_err());
        assert_eq!(view.inner(), &data);
    }

    #[test]
    fn lists_read_only_outermost() {
        let data = IndexedCollection::new();
        let view = ReadOnlyCollection::new(ReadOnlyCollection::new(&data));
        assert_eq!(
            view.decorators(),
            vec![DecoratorKind::ReadOnly, DecoratorKind::ReadOnly]
        );
    }
}
