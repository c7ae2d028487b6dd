//! Collection data and its decorator chain.
//!
//! Relation collections are an ordered, duplicate-free sequence of entity
//! IDs ([`IndexedCollection`]) wrapped by decorators that each implement
//! the same [`CollectionData`] contract:
//!
//! - [`ObservableCollection`] notifies an observer around every mutation
//! - [`ReadOnlyCollection`] rejects every mutation
//!
//! Read-only is always the outermost layer.

mod data;
mod observable;
mod read_only;

pub use data::{
    CollectionChange, CollectionData, CollectionOperation, DecoratorKind, IndexedCollection,
    ReadableCollection,
};
pub use observable::{CollectionObserver, ObservableCollection};
pub use read_only::ReadOnlyCollection;
