//! Scope listeners.
//!
//! Every scope owns a [`ListenerBus`]. The engine dispatches a
//! [`ScopeEvent`] to the bus before and after each state change:
//!
//! - "changing" events (`PropertyValueChanging`, `RelationChanging`,
//!   `ObjectDeleting`, `TransactionCommitting`, `TransactionRollingBack`)
//!   fire before anything is modified; a listener vetoes the operation by
//!   returning an error, which propagates unchanged to the caller
//! - "changed" events fire after the modification
//!
//! [`ListenerFactory`] implementations are consulted whenever a scope is
//! created, so cross-cutting listeners (such as the [`EventRecorder`])
//! attach to every scope of a manager automatically.

use crate::collection::CollectionChange;
use crate::entity::{EntityId, PropertyValue};
use crate::error::CoreResult;
use crate::relation::RelationEndPointId;
use crate::types::ScopeId;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

/// How a relation end point is modified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationModification {
    /// The related object of a single-valued end point is replaced.
    Set {
        /// Previously related object.
        old: Option<EntityId>,
        /// Newly related object.
        new: Option<EntityId>,
    },
    /// A collection end point is mutated.
    Collection(CollectionChange),
}

/// A notification dispatched to the listeners of one scope.
#[derive(Debug, Clone, Copy)]
pub enum ScopeEvent<'a> {
    /// An object was registered in the scope by a load.
    ObjectLoaded {
        /// The loaded object.
        id: EntityId,
    },
    /// A new object was created in the scope.
    ObjectCreated {
        /// The created object.
        id: EntityId,
    },
    /// A property is about to change.
    PropertyValueChanging {
        /// The object.
        id: EntityId,
        /// The property name.
        property: &'a str,
        /// The current value.
        old: &'a PropertyValue,
        /// The value about to be set.
        new: &'a PropertyValue,
    },
    /// A property has changed.
    PropertyValueChanged {
        /// The object.
        id: EntityId,
        /// The property name.
        property: &'a str,
        /// The previous value.
        old: &'a PropertyValue,
        /// The value now set.
        new: &'a PropertyValue,
    },
    /// A relation end point is about to change.
    RelationChanging {
        /// The end point.
        end_point: &'a RelationEndPointId,
        /// The pending modification.
        modification: RelationModification,
    },
    /// A relation end point has changed.
    RelationChanged {
        /// The end point.
        end_point: &'a RelationEndPointId,
        /// The applied modification.
        modification: RelationModification,
    },
    /// An object is about to be deleted.
    ObjectDeleting {
        /// The object.
        id: EntityId,
    },
    /// An object has been deleted.
    ObjectDeleted {
        /// The object.
        id: EntityId,
    },
    /// The scope is about to commit.
    TransactionCommitting {
        /// Objects with pending changes.
        objects: &'a [EntityId],
    },
    /// The scope has committed.
    TransactionCommitted {
        /// Objects whose changes were committed.
        objects: &'a [EntityId],
    },
    /// The scope is about to roll back.
    TransactionRollingBack,
    /// The scope has rolled back.
    TransactionRolledBack,
    /// A sub-scope was created under this scope.
    SubTransactionCreated {
        /// The new child scope.
        child: ScopeId,
    },
    /// The scope is being discarded.
    TransactionDiscard,
}

/// Discriminant of a [`ScopeEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum EventKind {
    ObjectLoaded,
    ObjectCreated,
    PropertyValueChanging,
    PropertyValueChanged,
    RelationChanging,
    RelationChanged,
    ObjectDeleting,
    ObjectDeleted,
    TransactionCommitting,
    TransactionCommitted,
    TransactionRollingBack,
    TransactionRolledBack,
    SubTransactionCreated,
    TransactionDiscard,
}

impl EventKind {
    /// Returns the snake_case name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ObjectLoaded => "object_loaded",
            Self::ObjectCreated => "object_created",
            Self::PropertyValueChanging => "property_value_changing",
            Self::PropertyValueChanged => "property_value_changed",
            Self::RelationChanging => "relation_changing",
            Self::RelationChanged => "relation_changed",
            Self::ObjectDeleting => "object_deleting",
            Self::ObjectDeleted => "object_deleted",
            Self::TransactionCommitting => "transaction_committing",
            Self::TransactionCommitted => "transaction_committed",
            Self::TransactionRollingBack => "transaction_rolling_back",
            Self::TransactionRolledBack => "transaction_rolled_back",
            Self::SubTransactionCreated => "sub_transaction_created",
            Self::TransactionDiscard => "transaction_discard",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ScopeEvent<'_> {
    /// Returns the event kind.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::ObjectLoaded { .. } => EventKind::ObjectLoaded,
            Self::ObjectCreated { .. } => EventKind::ObjectCreated,
            Self::PropertyValueChanging { .. } => EventKind::PropertyValueChanging,
            Self::PropertyValueChanged { .. } => EventKind::PropertyValueChanged,
            Self::RelationChanging { .. } => EventKind::RelationChanging,
            Self::RelationChanged { .. } => EventKind::RelationChanged,
            Self::ObjectDeleting { .. } => EventKind::ObjectDeleting,
            Self::ObjectDeleted { .. } => EventKind::ObjectDeleted,
            Self::TransactionCommitting { .. } => EventKind::TransactionCommitting,
            Self::TransactionCommitted { .. } => EventKind::TransactionCommitted,
            Self::TransactionRollingBack => EventKind::TransactionRollingBack,
            Self::TransactionRolledBack => EventKind::TransactionRolledBack,
            Self::SubTransactionCreated { .. } => EventKind::SubTransactionCreated,
            Self::TransactionDiscard => EventKind::TransactionDiscard,
        }
    }

    /// Returns the object the event is about, if any.
    #[must_use]
    pub fn object(&self) -> Option<EntityId> {
        match self {
            Self::ObjectLoaded { id }
            | Self::ObjectCreated { id }
            | Self::PropertyValueChanging { id, .. }
            | Self::PropertyValueChanged { id, .. }
            | Self::ObjectDeleting { id }
            | Self::ObjectDeleted { id } => Some(*id),
            Self::RelationChanging { end_point, .. } | Self::RelationChanged { end_point, .. } => {
                Some(end_point.object)
            }
            _ => None,
        }
    }

    /// Returns `true` for events a listener can veto: those fired before a
    /// modification, plus `SubTransactionCreated`, whose veto removes the
    /// new sub-scope again.
    #[must_use]
    pub fn is_pre_event(&self) -> bool {
        matches!(
            self,
            Self::SubTransactionCreated { .. }
                | Self::PropertyValueChanging { .. }
                | Self::RelationChanging { .. }
                | Self::ObjectDeleting { .. }
                | Self::TransactionCommitting { .. }
                | Self::TransactionRollingBack
                | Self::TransactionDiscard
        )
    }
}

/// Observes the events of one scope.
pub trait ScopeListener: Send {
    /// Returns a name, unique within a scope's bus.
    fn name(&self) -> &str;

    /// Handles one event. An error vetoes a pending change.
    fn on_event(&mut self, scope: ScopeId, event: &ScopeEvent<'_>) -> CoreResult<()>;
}

/// Creates the listeners attached to each new scope.
pub trait ListenerFactory: Send + Sync {
    /// Creates listeners for `scope`, whose parent is `parent` (`None` for a
    /// root scope).
    fn create_listeners(&self, scope: ScopeId, parent: Option<ScopeId>)
        -> Vec<Box<dyn ScopeListener>>;
}

/// The ordered listeners of one scope.
#[derive(Default)]
pub struct ListenerBus {
    listeners: Vec<Box<dyn ScopeListener>>,
}

impl fmt::Debug for ListenerBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerBus")
            .field("listeners", &self.names())
            .finish()
    }
}

impl ListenerBus {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a listener. Listeners are notified in insertion order.
    pub fn add(&mut self, listener: Box<dyn ScopeListener>) {
        self.listeners.push(listener);
    }

    /// Removes the listener with the given name.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|l| l.name() != name);
        self.listeners.len() != before
    }

    /// Returns the listener names in notification order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.listeners.iter().map(|l| l.name().to_string()).collect()
    }

    /// Returns the number of listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Returns `true` if no listener is attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Notifies every listener; the first error stops the dispatch.
    pub fn dispatch(&mut self, scope: ScopeId, event: &ScopeEvent<'_>) -> CoreResult<()> {
        for listener in &mut self.listeners {
            if let Err(err) = listener.on_event(scope, event) {
                tracing::debug!(
                    %scope,
                    listener = listener.name(),
                    event = %event.kind(),
                    error = %err,
                    "listener rejected event"
                );
                return Err(err);
            }
        }
        Ok(())
    }
}

/// A listener backed by a closure.
pub struct FnListener<F> {
    name: String,
    handler: F,
}

impl<F> FnListener<F>
where
    F: FnMut(ScopeId, &ScopeEvent<'_>) -> CoreResult<()> + Send,
{
    /// Creates a named closure listener.
    pub fn new(name: impl Into<String>, handler: F) -> Self {
        Self {
            name: name.into(),
            handler,
        }
    }
}

impl<F> fmt::Debug for FnListener<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnListener").field("name", &self.name).finish()
    }
}

impl<F> ScopeListener for FnListener<F>
where
    F: FnMut(ScopeId, &ScopeEvent<'_>) -> CoreResult<()> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn on_event(&mut self, scope: ScopeId, event: &ScopeEvent<'_>) -> CoreResult<()> {
        (self.handler)(scope, event)
    }
}

/// An owned summary of one dispatched event.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    /// Scope the event was dispatched in.
    pub scope: ScopeId,
    /// Event kind.
    pub kind: EventKind,
    /// Object the event is about.
    pub object: Option<EntityId>,
    /// End point, for relation events.
    pub end_point: Option<RelationEndPointId>,
    /// Property name, for property events.
    pub property: Option<String>,
    /// New value, for property events.
    pub value: Option<PropertyValue>,
    /// Modification, for relation events.
    pub modification: Option<RelationModification>,
    /// Child scope, for sub-scope creation.
    pub child: Option<ScopeId>,
}

impl EventRecord {
    fn from_event(scope: ScopeId, event: &ScopeEvent<'_>) -> Self {
        let mut record = Self {
            scope,
            kind: event.kind(),
            object: event.object(),
            end_point: None,
            property: None,
            value: None,
            modification: None,
            child: None,
        };
        match event {
            ScopeEvent::PropertyValueChanging { property, new, .. }
            | ScopeEvent::PropertyValueChanged { property, new, .. } => {
                record.property = Some((*property).to_string());
                record.value = Some((*new).clone());
            }
            ScopeEvent::RelationChanging {
                end_point,
                modification,
            }
            | ScopeEvent::RelationChanged {
                end_point,
                modification,
            } => {
                record.end_point = Some((*end_point).clone());
                record.modification = Some(*modification);
            }
            ScopeEvent::SubTransactionCreated { child } => record.child = Some(*child),
            _ => {}
        }
        record
    }
}

#[derive(Debug)]
struct History {
    records: RwLock<VecDeque<EventRecord>>,
    capacity: usize,
}

/// Records every event of every scope it is attached to.
///
/// The recorder is both a listener and a listener factory: registered as a
/// factory on a manager, each new scope gets a handle sharing the same
/// bounded history. Oldest records are dropped beyond the capacity.
#[derive(Debug, Clone)]
pub struct EventRecorder {
    history: Arc<History>,
}

impl Default for EventRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRecorder {
    /// Listener name used on every bus.
    pub const NAME: &'static str = "event-recorder";

    /// Creates a recorder keeping up to 1024 records.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Creates a recorder with the given history capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            history: Arc::new(History {
                records: RwLock::new(VecDeque::new()),
                capacity,
            }),
        }
    }

    /// Returns a read handle on the recorded history.
    #[must_use]
    pub fn log(&self) -> EventLog {
        EventLog {
            history: Arc::clone(&self.history),
        }
    }
}

impl ScopeListener for EventRecorder {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn on_event(&mut self, scope: ScopeId, event: &ScopeEvent<'_>) -> CoreResult<()> {
        let mut records = self.history.records.write();
        records.push_back(EventRecord::from_event(scope, event));
        while records.len() > self.history.capacity {
            records.pop_front();
        }
        Ok(())
    }
}

impl ListenerFactory for EventRecorder {
    fn create_listeners(
        &self,
        _scope: ScopeId,
        _parent: Option<ScopeId>,
    ) -> Vec<Box<dyn ScopeListener>> {
        vec![Box::new(self.clone())]
    }
}

/// Read handle on an [`EventRecorder`]'s history.
#[derive(Debug, Clone)]
pub struct EventLog {
    history: Arc<History>,
}

impl EventLog {
    /// Returns a copy of all records, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<EventRecord> {
        self.history.records.read().iter().cloned().collect()
    }

    /// Returns the kinds of all records, oldest first.
    #[must_use]
    pub fn kinds(&self) -> Vec<EventKind> {
        self.history.records.read().iter().map(|r| r.kind).collect()
    }

    /// Returns the records of one scope.
    #[must_use]
    pub fn for_scope(&self, scope: ScopeId) -> Vec<EventRecord> {
        self.history
            .records
            .read()
            .iter()
            .filter(|r| r.scope == scope)
            .cloned()
            .collect()
    }

    /// Returns the number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.history.records.read().len()
    }

    /// Returns `true` if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.history.records.read().is_empty()
    }

    /// Forgets all records.
    pub fn clear(&self) {
        self.history.records.write().clear();
    }
}
