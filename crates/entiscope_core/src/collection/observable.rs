//! Observable collection decorator.

use crate::collection::data::{
    CollectionChange, CollectionData, DecoratorKind, ReadableCollection,
};
use crate::entity::EntityId;
use crate::error::{CoreError, CoreResult};
use std::cmp::Ordering;

/// Receives notifications around collection mutations.
///
/// Returning an error from [`changing`](Self::changing) vetoes the
/// mutation before any state changes.
pub trait CollectionObserver {
    /// Called before the mutation is applied.
    fn changing(&mut self, change: &CollectionChange) -> CoreResult<()>;

    /// Called after the mutation was applied.
    fn changed(&mut self, change: &CollectionChange) -> CoreResult<()>;
}

/// Wraps collection data and notifies an observer around every mutation.
///
/// - `replace` with an unchanged value is a no-op and fires nothing
/// - `clear` fires one notification per removed element, last element
///   first; every "changing" fires before anything is removed
/// - `sort` fires a single pair without an affected item
#[derive(Debug)]
pub struct ObservableCollection<C, O> {
    inner: C,
    observer: O,
}

impl<C: CollectionData, O: CollectionObserver> ObservableCollection<C, O> {
    /// Wraps `inner`.
    ///
    /// # Errors
    ///
    /// Fails with `NotSupported` if `inner` is read-only: read-only must be
    /// the outermost layer of a chain.
    pub fn new(inner: C, observer: O) -> CoreResult<Self> {
        if inner.is_read_only() {
            return Err(CoreError::not_supported(
                "observable decorator over a read-only collection",
            ));
        }
        Ok(Self { inner, observer })
    }

    /// Returns the observer.
    pub fn observer(&self) -> &O {
        &self.observer
    }

    /// Unwraps the decorator.
    pub fn into_parts(self) -> (C, O) {
        (self.inner, self.observer)
    }
}

impl<C: CollectionData, O> ReadableCollection for ObservableCollection<C, O> {
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

    fn decorators(&self) -> Vec<DecoratorKind> {
        let mut kinds = vec![DecoratorKind::Observable];
        kinds.extend(self.inner.decorators());
        kinds
    }
}

impl<C: CollectionData, O: CollectionObserver> CollectionData for ObservableCollection<C, O> {
    fn insert(&mut self, index: usize, id: EntityId) -> CoreResult<()> {
        if index > self.inner.len() {
            return Err(CoreError::IndexOutOfRange {
                index,
                len: self.inner.len(),
            });
        }
        if self.inner.contains(id) {
            return Err(CoreError::DuplicateItem { id });
        }
        let change = CollectionChange::insert(id, Some(index));
        self.observer.changing(&change)?;
        self.inner.insert(index, id)?;
        self.observer.changed(&change)
    }

    fn remove(&mut self, id: EntityId) -> CoreResult<bool> {
        match self.inner.index_of(id) {
            Some(index) => {
                self.remove_at(index)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn remove_at(&mut self, index: usize) -> CoreResult<EntityId> {
        let id = self.inner.get(index).ok_or(CoreError::IndexOutOfRange {
            index,
            len: self.inner.len(),
        })?;
        let change = CollectionChange::remove(id, Some(index));
        self.observer.changing(&change)?;
        self.inner.remove_at(index)?;
        self.observer.changed(&change)?;
        Ok(id)
    }

    fn replace(&mut self, index: usize, id: EntityId) -> CoreResult<()> {
        let old = self.inner.get(index).ok_or(CoreError::IndexOutOfRange {
            index,
            len: self.inner.len(),
        })?;
        if old == id {
            return Ok(());
        }
        if self.inner.contains(id) {
            return Err(CoreError::DuplicateItem { id });
        }
        let change = CollectionChange::replace(old, id, index);
        self.observer.changing(&change)?;
        self.inner.replace(index, id)?;
        self.observer.changed(&change)
    }

    fn clear(&mut self) -> CoreResult<()> {
        let changes: Vec<CollectionChange> = self
            .inner
            .to_vec()
            .into_iter()
            .enumerate()
            .rev()
            .map(|(index, id)| CollectionChange::remove(id, Some(index)))
            .collect();
        for change in &changes {
            self.observer.changing(change)?;
        }
        self.inner.clear()?;
        for change in &changes {
            self.observer.changed(change)?;
        }
        Ok(())
    }

    fn sort_by(
        &mut self,
        compare: &mut dyn FnMut(&EntityId, &EntityId) -> Ordering,
    ) -> CoreResult<()> {
        let change = CollectionChange::sort();
        self.observer.changing(&change)?;
        self.inner.sort_by(compare)?;
        self.observer.changed(&change)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::data::{CollectionOperation, IndexedCollection};
    use crate::collection::read_only::ReadOnlyCollection;
    use crate::types::ClassId;

    #[derive(Default)]
    struct Log {
        entries: Vec<(&'static str, CollectionChange)>,
        veto_on: Option<EntityId>,
    }

    impl CollectionObserver for Log {
        fn changing(&mut self, change: &CollectionChange) -> CoreResult<()> {
            if self.veto_on.is_some() && change.item == self.veto_on {
                return Err(CoreError::veto("vetoed by test"));
            }
            self.entries.push(("changing", *change));
            Ok(())
        }

        fn changed(&mut self, change: &CollectionChange) -> CoreResult<()> {
            self.entries.push(("changed", *change));
            Ok(())
        }
    }

    fn ids(n: usize) -> Vec<EntityId> {
        (0..n)
            .map(|i| EntityId::named(ClassId::new(1), &format!("o{i}")))
            .collect()
    }

    #[test]
    fn insert_fires_pair() {
        let ids = ids(1);
        let mut c = ObservableCollection::new(IndexedCollection::new(), Log::default()).unwrap();
        c.push(ids[0]).unwrap();
        let log = &c.observer().entries;
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].0, "changing");
        assert_eq!(log[0].1.operation, CollectionOperation::Insert);
        assert_eq!(log[0].1.index, Some(0));
        assert_eq!(log[1].0, "changed");
    }

    #[test]
    fn clear_fires_per_element_in_removal_order() {
        let ids = ids(3);
        let mut c =
            ObservableCollection::new(IndexedCollection::from_ids(ids.clone()), Log::default())
                .unwrap();
        c.clear().unwrap();
        assert!(c.is_empty());

        let log = &c.observer().entries;
        assert_eq!(log.len(), 6);
        let changing: Vec<_> = log
            .iter()
            .filter(|(phase, _)| *phase == "changing")
            .map(|(_, ch)| (ch.item.unwrap(), ch.index.unwrap()))
            .collect();
        assert_eq!(changing, vec![(ids[2], 2), (ids[1], 1), (ids[0], 0)]);
        assert!(log
            .iter()
            .all(|(_, ch)| ch.operation == CollectionOperation::Remove));
    }

    #[test]
    fn clear_veto_leaves_collection_intact() {
        let ids = ids(3);
        let log = Log {
            veto_on: Some(ids[0]),
            ..Log::default()
        };
        let mut c =
            ObservableCollection::new(IndexedCollection::from_ids(ids.clone()), log).unwrap();
        assert!(matches!(c.clear(), Err(CoreError::Vetoed { .. })));
        assert_eq!(c.to_vec(), ids);
    }

    #[test]
    fn noop_replace_fires_nothing() {
        let ids = ids(2);
        let mut c =
            ObservableCollection::new(IndexedCollection::from_ids(ids.clone()), Log::default())
                .unwrap();
        c.replace(1, ids[1]).unwrap();
        assert!(c.observer().entries.is_empty());
        assert_eq!(c.to_vec(), ids);
    }

    #[test]
    fn replace_reports_both_items() {
        let ids = ids(3);
        let mut c = ObservableCollection::new(
            IndexedCollection::from_ids(ids[..2].to_vec()),
            Log::default(),
        )
        .unwrap();
        c.replace(0, ids[2]).unwrap();
        let change = c.observer().entries[0].1;
        assert_eq!(change.item, Some(ids[2]));
        assert_eq!(change.replaced, Some(ids[0]));
        assert_eq!(change.index, Some(0));
    }

    #[test]
    fn sort_fires_single_pair_without_item() {
        let ids = ids(4);
        let mut c =
            ObservableCollection::new(IndexedCollection::from_ids(ids), Log::default()).unwrap();
        c.sort_by(&mut |a, b| b.cmp(a)).unwrap();
        let log = &c.observer().entries;
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].1, CollectionChange::sort());
    }

    #[test]
    fn veto_prevents_insert() {
        let ids = ids(1);
        let log = Log {
            veto_on: Some(ids[0]),
            ..Log::default()
        };
        let mut c = ObservableCollection::new(IndexedCollection::new(), log).unwrap();
        assert!(c.push(ids[0]).is_err());
        assert!(c.is_empty());
    }

    #[test]
    fn remove_missing_fires_nothing() {
        let ids = ids(2);
        let mut c = ObservableCollection::new(
            IndexedCollection::from_ids([ids[0]]),
            Log::default(),
        )
        .unwrap();
        assert!(!c.remove(ids[1]).unwrap());
        assert!(c.observer().entries.is_empty());
    }

    #[test]
    fn cannot_observe_read_only() {
        let data = IndexedCollection::new();
        let read_only = ReadOnlyCollection::new(&data);
        struct Sink;
        impl CollectionObserver for Sink {
            fn changing(&mut self, _: &CollectionChange) -> CoreResult<()> {
                Ok(())
            }
            fn changed(&mut self, _: &CollectionChange) -> CoreResult<()> {
                Ok(())
            }
        }
        let result = ObservableCollection::new(read_only, Sink);
        assert!(matches!(result, Err(CoreError::NotSupported { .. })));
    }

    #[test]
    fn wraps_borrowed_data() {
        let ids = ids(2);
        let mut data = IndexedCollection::from_ids([ids[0]]);
        {
            let mut c = ObservableCollection::new(&mut data, Log::default()).unwrap();
            c.push(ids[1]).unwrap();
            assert_eq!(c.decorators(), vec![DecoratorKind::Observable]);
        }
        assert_eq!(data.to_vec(), ids);
    }
}
