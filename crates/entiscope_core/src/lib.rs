//! # Entiscope Core
//!
//! A hierarchical unit-of-work engine.
//!
//! This crate provides:
//! - Nested transaction scopes with read-only propagation to parents
//! - Per-scope entity caches with property change tracking
//! - Lazily completed relation end points with bidirectional maintenance
//! - Collection decorators (observable, read-only)
//! - Vetoable listener events per scope
//! - A persistence strategy boundary with an in-memory implementation
//!
//! ## Example
//!
//! ```rust
//! use entiscope_core::{
//!     ClassId, InMemoryStore, PropertyValue, RelationSide, Schema, ScopeManager,
//! };
//! use std::sync::Arc;
//!
//! let customer = ClassId::new(1);
//! let order = ClassId::new(2);
//! let schema = Schema::builder()
//!     .class(customer, "Customer", [("name", PropertyValue::Null)])
//!     .class(order, "Order", [("number", PropertyValue::Null)])
//!     .bidirectional(
//!         RelationSide::one("Order.customer", order),
//!         RelationSide::many("Customer.orders", customer),
//!     )
//!     .build()
//!     .unwrap();
//!
//! let mut manager = ScopeManager::new(Arc::new(schema), Arc::new(InMemoryStore::new()));
//! let root = manager.create_root();
//! let ada = manager.new_object(root, customer).unwrap();
//! let first = manager.new_object(root, order).unwrap();
//!
//! manager.set_related(root, first, "Order.customer", Some(ada)).unwrap();
//! assert_eq!(manager.related_ids(root, ada, "Customer.orders").unwrap(), vec![first]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod collection;
pub mod config;
pub mod data;
pub mod entity;
pub mod error;
pub mod listener;
pub mod persistence;
pub mod relation;
pub mod schema;
pub mod scope;
pub mod types;

pub use collection::{
    CollectionChange, CollectionData, CollectionOperation, IndexedCollection, ReadOnlyCollection,
    ReadableCollection,
};
pub use config::EngineConfig;
pub use data::{DataManager, DeleteOutcome};
pub use entity::{DataContainer, EntityId, EntityState, PropertyValue};
pub use error::{CoreError, CoreResult};
pub use listener::{
    EventKind, EventLog, EventRecord, EventRecorder, FnListener, ListenerFactory,
    RelationModification, ScopeEvent, ScopeListener,
};
pub use persistence::{InMemoryStore, PersistenceStrategy, RelationData};
pub use relation::{Completeness, RelationEndPointId};
pub use schema::{Cardinality, RelationSide, Schema};
pub use scope::{ScopeGuard, ScopeManager};
pub use types::{ClassId, ScopeId, Version};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
