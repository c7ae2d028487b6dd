//! Persistence strategy: the boundary between scopes and a backing store.
//!
//! The root scope loads objects and relation data through a
//! [`PersistenceStrategy`] and pushes its changes back as one
//! [`ChangeSet`] on commit. Sub-scopes never talk to the store directly.

mod memory;
mod strategy;

pub use memory::InMemoryStore;
pub use strategy::{
    ChangeKind, ChangeSet, CommitReceipt, ObjectChange, PersistedObject, PersistenceStrategy,
    RelationChange, RelationData, RelationUpdate,
};
