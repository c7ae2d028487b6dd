//! The collection contract and its indexed core implementation.

use crate::entity::EntityId;
use crate::error::{CoreError, CoreResult};
use std::cmp::Ordering;
use std::collections::HashMap;

/// A behavior layered around collection data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoratorKind {
    /// Fires changing/changed notifications around every mutation.
    Observable,
    /// Rejects every mutation.
    ReadOnly,
}

/// Kind of mutation applied to a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionOperation {
    /// An item was inserted.
    Insert,
    /// An item was removed (also used per element by `clear`).
    Remove,
    /// The item at a position was replaced.
    Replace,
    /// The collection was reordered.
    Sort,
}

/// Describes one collection mutation, as seen by observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionChange {
    /// Kind of mutation.
    pub operation: CollectionOperation,
    /// The affected item (the new item for a replace), `None` for a sort.
    pub item: Option<EntityId>,
    /// The item being replaced, only set for a replace.
    pub replaced: Option<EntityId>,
    /// The affected position, `None` when not positional.
    pub index: Option<usize>,
}

impl CollectionChange {
    /// An insertion of `item` at `index`.
    #[must_use]
    pub fn insert(item: EntityId, index: Option<usize>) -> Self {
        Self {
            operation: CollectionOperation::Insert,
            item: Some(item),
            replaced: None,
            index,
        }
    }

    /// A removal of `item` from `index`.
    #[must_use]
    pub fn remove(item: EntityId, index: Option<usize>) -> Self {
        Self {
            operation: CollectionOperation::Remove,
            item: Some(item),
            replaced: None,
            index,
        }
    }

    /// A replacement of `old` by `new` at `index`.
    #[must_use]
    pub fn replace(old: EntityId, new: EntityId, index: usize) -> Self {
        Self {
            operation: CollectionOperation::Replace,
            item: Some(new),
            replaced: Some(old),
            index: Some(index),
        }
    }

    /// A reordering of the whole collection.
    #[must_use]
    pub fn sort() -> Self {
        Self {
            operation: CollectionOperation::Sort,
            item: None,
            replaced: None,
            index: None,
        }
    }
}

/// Read surface shared by every collection layer.
pub trait ReadableCollection {
    /// Returns the number of items.
    fn len(&self) -> usize;

    /// Returns `true` if the collection holds no items.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the item at `index`.
    fn get(&self, index: usize) -> Option<EntityId>;

    /// Returns the position of `id`.
    fn index_of(&self, id: EntityId) -> Option<usize>;

    /// Returns `true` if the collection holds `id`.
    fn contains(&self, id: EntityId) -> bool {
        self.index_of(id).is_some()
    }

    /// Returns the items in order.
    fn to_vec(&self) -> Vec<EntityId>;

    /// Returns `true` if mutations are rejected.
    fn is_read_only(&self) -> bool {
        false
    }

    /// Returns the decorators applied to this collection, outermost first.
    fn decorators(&self) -> Vec<DecoratorKind> {
        Vec::new()
    }
}

/// Mutation surface of a collection layer.
///
/// Every decorator implements the same contract as the data it wraps, so
/// chains compose transparently.
pub trait CollectionData: ReadableCollection {
    /// Inserts `id` at `index`.
    ///
    /// # Errors
    ///
    /// Fails if `id` is already present or `index > len`.
    fn insert(&mut self, index: usize, id: EntityId) -> CoreResult<()>;

    /// Removes `id`. Returns `false` if it was not present.
    fn remove(&mut self, id: EntityId) -> CoreResult<bool>;

    /// Removes and returns the item at `index`.
    fn remove_at(&mut self, index: usize) -> CoreResult<EntityId>;

    /// Replaces the item at `index` with `id`.
    fn replace(&mut self, index: usize, id: EntityId) -> CoreResult<()>;

    /// Removes every item.
    fn clear(&mut self) -> CoreResult<()>;

    /// Reorders the items.
    fn sort_by(&mut self, compare: &mut dyn FnMut(&EntityId, &EntityId) -> Ordering)
        -> CoreResult<()>;

    /// Appends `id`.
    fn push(&mut self, id: EntityId) -> CoreResult<()> {
        let len = self.len();
        self.insert(len, id)
    }
}

/// An ordered, duplicate-free sequence of entity IDs with O(1) lookup by ID.
///
/// # Invariants
///
/// - No duplicate IDs
/// - `index[items[i]] == i` for every position `i`
#[derive(Debug, Clone, Default)]
pub struct IndexedCollection {
    items: Vec<EntityId>,
    index: HashMap<EntityId, usize>,
}

impl IndexedCollection {
    /// Creates an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a collection from IDs, silently skipping duplicates.
    #[must_use]
    pub fn from_ids(ids: impl IntoIterator<Item = EntityId>) -> Self {
        let mut collection = Self::new();
        for id in ids {
            if !collection.index.contains_key(&id) {
                collection.index.insert(id, collection.items.len());
                collection.items.push(id);
            }
        }
        collection
    }

    /// Iterates over the items in order.
    pub fn iter(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.items.iter().copied()
    }

    /// Returns the items as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[EntityId] {
        &self.items
    }

    fn reindex_from(&mut self, start: usize) {
        for (offset, id) in self.items[start..].iter().enumerate() {
            self.index.insert(*id, start + offset);
        }
    }
}

impl PartialEq for IndexedCollection {
    fn eq(&self, other: &Self) -> bool {
        self.items == other.items
    }
}

impl Eq for IndexedCollection {}

impl ReadableCollection for IndexedCollection {
    fn len(&self) -> usize {
        self.items.len()
    }

    fn get(&self, index: usize) -> Option<EntityId> {
        self.items.get(index).copied()
    }

    fn index_of(&self, id: EntityId) -> Option<usize> {
        self.index.get(&id).copied()
    }

    fn to_vec(&self) -> Vec<EntityId> {
        self.items.clone()
    }
}

impl CollectionData for IndexedCollection {
    fn insert(&mut self, index: usize, id: EntityId) -> CoreResult<()> {
        if index > self.items.len() {
            return Err(CoreError::IndexOutOfRange {
                index,
                len: self.items.len(),
            });
        }
        if self.index.contains_key(&id) {
            return Err(CoreError::DuplicateItem { id });
        }
        self.items.insert(index, id);
        self.reindex_from(index);
        Ok(())
    }

    fn remove(&mut self, id: EntityId) -> CoreResult<bool> {
        match self.index.get(&id).copied() {
            Some(index) => {
                self.remove_at(index)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn remove_at(&mut self, index: usize) -> CoreResult<EntityId> {
        if index >= self.items.len() {
            return Err(CoreError::IndexOutOfRange {
                index,
                len: self.items.len(),
            });
        }
        let id = self.items.remove(index);
        self.index.remove(&id);
        self.reindex_from(index);
        Ok(id)
    }

    fn replace(&mut self, index: usize, id: EntityId) -> CoreResult<()> {
        let old = self.get(index).ok_or(CoreError::IndexOutOfRange {
            index,
            len: self.items.len(),
        })?;
        if old == id {
            return Ok(());
        }
        if self.index.contains_key(&id) {
            return Err(CoreError::DuplicateItem { id });
        }
        self.index.remove(&old);
        self.index.insert(id, index);
        self.items[index] = id;
        Ok(())
    }

    fn clear(&mut self) -> CoreResult<()> {
        self.items.clear();
        self.index.clear();
        Ok(())
    }

    fn sort_by(
        &mut self,
        compare: &mut dyn FnMut(&EntityId, &EntityId) -> Ordering,
    ) -> CoreResult<()> {
        self.items.sort_by(|a, b| compare(a, b));
        self.reindex_from(0);
        Ok(())
    }
}

impl<C: ReadableCollection + ?Sized> ReadableCollection for &C {
    fn len(&self) -> usize {
        (**self).len()
    }

    fn get(&self, index: usize) -> Option<EntityId> {
        (**self).get(index)
    }

    fn index_of(&self, id: EntityId) -> Option<usize> {
        (**self).index_of(id)
    }

    fn to_vec(&self) -> Vec<EntityId> {
        (**self).to_vec()
    }

    fn is_read_only(&self) -> bool {
        (**self).is_read_only()
    }

    fn decorators(&self) -> Vec<DecoratorKind> {
        (**self).decorators()
    }
}

impl<C: ReadableCollection + ?Sized> ReadableCollection for &mut C {
    fn len(&self) -> usize {
        (**self).len()
    }

    fn get(&self, index: usize) -> Option<EntityId> {
        (**self).get(index)
    }

    fn index_of(&self, id: EntityId) -> Option<usize> {
        (**self).index_of(id)
    }

    fn to_vec(&self) -> Vec<EntityId> {
        (**self).to_vec()
    }

    fn is_read_only(&self) -> bool {
        (**self).is_read_only()
    }

    fn decorators(&self) -> Vec<DecoratorKind> {
        (**self).decorators()
    }
}

impl<C: CollectionData + ?Sized> CollectionData for &mut C {
    fn insert(&mut self, index: usize, id: EntityId) -> CoreResult<()> {
        (**self).insert(index, id)
    }

    fn remove(&mut self, id: EntityId) -> CoreResult<bool> {
        (**self).remove(id)
    }

    fn remove_at(&mut self, index: usize) -> CoreResult<EntityId> {
        (**self).remove_at(index)
    }

    fn replace(&mut self, index: usize, id: EntityId) -> CoreResult<()> {
        (**self).replace(index, id)
    }

    fn clear(&mut self) -> CoreResult<()> {
        (**self).clear()
    }

    fn sort_by(
        &mut self,
        compare: &mut dyn FnMut(&EntityId, &EntityId) -> Ordering,
    ) -> CoreResult<()> {
        (**self).sort_by(compare)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ClassId;

    fn ids(n: usize) -> Vec<EntityId> {
        (0..n)
            .map(|i| EntityId::named(ClassId::new(1), &format!("item{i}")))
            .collect()
    }

    fn assert_consistent(c: &IndexedCollection) {
        for (i, id) in c.iter().enumerate() {
            assert_eq!(c.index_of(id), Some(i));
        }
        assert_eq!(c.index.len(), c.len());
    }

    #[test]
    fn insert_and_lookup() {
        let ids = ids(3);
        let mut c = IndexedCollection::new();
        c.push(ids[0]).unwrap();
        c.push(ids[2]).unwrap();
        c.insert(1, ids[1]).unwrap();
        assert_eq!(c.to_vec(), ids);
        assert_consistent(&c);
    }

    #[test]
    fn duplicate_insert_rejected() {
        let ids = ids(1);
        let mut c = IndexedCollection::from_ids(ids.clone());
        assert!(matches!(
            c.push(ids[0]),
            Err(CoreError::DuplicateItem { .. })
        ));
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn insert_out_of_range_rejected() {
        let mut c = IndexedCollection::new();
        assert!(matches!(
            c.insert(1, ids(1)[0]),
            Err(CoreError::IndexOutOfRange { index: 1, len: 0 })
        ));
    }

    #[test]
    fn remove_reindexes() {
        let ids = ids(4);
        let mut c = IndexedCollection::from_ids(ids.clone());
        assert!(c.remove(ids[1]).unwrap());
        assert!(!c.remove(ids[1]).unwrap());
        assert_eq!(c.to_vec(), vec![ids[0], ids[2], ids[3]]);
        assert_consistent(&c);
    }

    #[test]
    fn replace_updates_index() {
        let ids = ids(3);
        let mut c = IndexedCollection::from_ids(ids[..2].to_vec());
        c.replace(0, ids[2]).unwrap();
        assert_eq!(c.to_vec(), vec![ids[2], ids[1]]);
        assert!(!c.contains(ids[0]));
        assert_consistent(&c);
        assert!(matches!(
            c.replace(0, ids[1]),
            Err(CoreError::DuplicateItem { .. })
        ));
    }

    #[test]
    fn sort_reindexes() {
        let mut ids = ids(5);
        let mut c = IndexedCollection::from_ids(ids.clone());
        c.sort_by(&mut |a, b| b.cmp(a)).unwrap();
        ids.sort_by(|a, b| b.cmp(a));
        assert_eq!(c.to_vec(), ids);
        assert_consistent(&c);
    }

    #[test]
    fn from_ids_skips_duplicates() {
        let ids = ids(2);
        let c = IndexedCollection::from_ids([ids[0], ids[1], ids[0]]);
        assert_eq!(c.len(), 2);
    }

    mod model {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Op {
            Insert(usize, usize),
            Remove(usize),
            RemoveAt(usize),
            Replace(usize, usize),
            Sort,
        }

        fn op() -> impl Strategy<Value = Op> {
            prop_oneof![
                (0..8usize, 0..6usize).prop_map(|(i, id)| Op::Insert(i, id)),
                (0..6usize).prop_map(Op::Remove),
                (0..8usize).prop_map(Op::RemoveAt),
                (0..8usize, 0..6usize).prop_map(|(i, id)| Op::Replace(i, id)),
                Just(Op::Sort),
            ]
        }

        proptest! {
            #[test]
            fn index_agrees_with_positions(ops in prop::collection::vec(op(), 0..40)) {
                let pool = ids(6);
                let mut c = IndexedCollection::new();
                let mut model: Vec<EntityId> = Vec::new();
                for op in ops {
                    match op {
                        Op::Insert(i, id) => {
                            let id = pool[id];
                            let ok = c.insert(i, id).is_ok();
                            prop_assert_eq!(ok, i <= model.len() && !model.contains(&id));
                            if ok {
                                model.insert(i, id);
                            }
                        }
                        Op::Remove(id) => {
                            let id = pool[id];
                            prop_assert_eq!(c.remove(id).unwrap(), model.contains(&id));
                            model.retain(|x| *x != id);
                        }
                        Op::RemoveAt(i) => {
                            let ok = c.remove_at(i).is_ok();
                            prop_assert_eq!(ok, i < model.len());
                            if ok {
                                model.remove(i);
                            }
                        }
                        Op::Replace(i, id) => {
                            let id = pool[id];
                            let _ = c.replace(i, id);
                            if i < model.len() && (model[i] == id || !model.contains(&id)) {
                                model[i] = id;
                            }
                        }
                        Op::Sort => {
                            c.sort_by(&mut |a, b| a.cmp(b)).unwrap();
                            model.sort();
                        }
                    }
                    prop_assert_eq!(c.to_vec(), model.clone());
                    assert_consistent(&c);
                }
            }
        }
    }
}
