//! The scope manager: owner of every scope in one tree.

use crate::config::EngineConfig;
use crate::data::DataManager;
use crate::entity::{DataContainer, EntityId, EntityState, PropertyValue};
use crate::error::{CoreError, CoreResult};
use crate::listener::{ListenerBus, ListenerFactory, ScopeEvent, ScopeListener};
use crate::persistence::PersistenceStrategy;
use crate::relation::{RelationEndPoint, RelationEndPointId};
use crate::schema::Schema;
use crate::scope::context::{self, ScopeGuard};
use crate::scope::node::Scope;
use crate::types::{ClassId, ScopeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Owns a tree of nested transaction scopes.
///
/// Scopes live in an arena keyed by [`ScopeId`]; every operation names the
/// scope it applies to. A scope is read-only for as long as it hosts an
/// open sub-scope. Each scope owns an independent [`DataManager`]: a
/// sub-scope works on its own copies of its ancestors' containers and hands
/// its changes one level up on commit. Only the root scope talks to the
/// [`PersistenceStrategy`].
///
/// # Example
///
/// ```rust
/// use entiscope_core::{ClassId, InMemoryStore, PropertyValue, Schema, ScopeManager};
/// use std::sync::Arc;
///
/// let class = ClassId::new(1);
/// let schema = Schema::builder()
///     .class(class, "Customer", [("name", PropertyValue::Null)])
///     .build()
///     .unwrap();
/// let mut manager = ScopeManager::new(Arc::new(schema), Arc::new(InMemoryStore::new()));
///
/// let root = manager.create_root();
/// let sub = manager.create_sub_scope(root).unwrap();
/// let id = manager.new_object(sub, class).unwrap();
/// manager.set_property(sub, id, "name", "Ada").unwrap();
/// assert!(manager.new_object(root, class).is_err());
///
/// manager.commit(sub).unwrap();
/// manager.discard(sub).unwrap();
/// assert_eq!(manager.property(root, id, "name").unwrap(), PropertyValue::from("Ada"));
/// ```
pub struct ScopeManager {
    pub(crate) config: EngineConfig,
    pub(crate) schema: Arc<Schema>,
    pub(crate) persistence: Box<dyn PersistenceStrategy>,
    pub(crate) scopes: HashMap<ScopeId, Scope>,
    factories: Vec<Box<dyn ListenerFactory>>,
}

impl fmt::Debug for ScopeManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeManager")
            .field("config", &self.config)
            .field("scopes", &self.scopes.len())
            .field("factories", &self.factories.len())
            .finish_non_exhaustive()
    }
}

impl ScopeManager {
    /// Creates a manager with the default configuration.
    pub fn new(schema: Arc<Schema>, persistence: impl PersistenceStrategy + 'static) -> Self {
        Self::with_config(schema, persistence, EngineConfig::default())
    }

    /// Creates a manager with a custom configuration.
    pub fn with_config(
        schema: Arc<Schema>,
        persistence: impl PersistenceStrategy + 'static,
        config: EngineConfig,
    ) -> Self {
        Self {
            config,
            schema,
            persistence: Box::new(persistence),
            scopes: HashMap::new(),
            factories: Vec::new(),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the schema.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Registers a factory consulted for every scope created afterwards.
    pub fn add_listener_factory(&mut self, factory: impl ListenerFactory + 'static) {
        self.factories.push(Box::new(factory));
    }

    // ========================================================================
    // Tree lifecycle
    // ========================================================================

    fn make_bus(&self, scope: ScopeId, parent: Option<ScopeId>) -> ListenerBus {
        let mut bus = ListenerBus::new();
        for factory in &self.factories {
            for listener in factory.create_listeners(scope, parent) {
                bus.add(listener);
            }
        }
        bus
    }

    /// Creates a new writeable root scope.
    pub fn create_root(&mut self) -> ScopeId {
        let id = ScopeId::next();
        let bus = self.make_bus(id, None);
        self.scopes.insert(id, Scope::new(id, None, 0, bus));
        debug!(scope = %id, "created root scope");
        id
    }

    /// Creates a sub-scope of `parent`, which becomes read-only until the
    /// sub-scope is discarded.
    ///
    /// # Errors
    ///
    /// `InvalidState` if `parent` was discarded, already hosts an open
    /// sub-scope, or the configured maximum depth would be exceeded.
    pub fn create_sub_scope(&mut self, parent: ScopeId) -> CoreResult<ScopeId> {
        let node = self.scope(parent)?;
        if let Some(child) = node.child {
            return Err(CoreError::invalid_state(format!(
                "{parent} already hosts open sub-scope {child}"
            )));
        }
        let depth = node.depth + 1;
        if depth > self.config.max_scope_depth {
            return Err(CoreError::invalid_state(format!(
                "sub-scope of {parent} would exceed the maximum depth of {}",
                self.config.max_scope_depth
            )));
        }

        let id = ScopeId::next();
        let bus = self.make_bus(id, Some(parent));
        self.scopes.insert(id, Scope::new(id, Some(parent), depth, bus));
        self.scope_mut(parent)?.child = Some(id);

        if let Err(err) = self.dispatch(parent, &ScopeEvent::SubTransactionCreated { child: id }) {
            self.scopes.remove(&id);
            self.scope_mut(parent)?.child = None;
            return Err(err);
        }
        debug!(scope = %id, parent = %parent, depth, "created sub-scope");
        Ok(id)
    }

    /// Discards a scope and everything it holds, restoring the parent's
    /// write access.
    ///
    /// # Errors
    ///
    /// `InvalidState` if the scope was already discarded, still hosts an
    /// open sub-scope, or is entered on the current thread.
    pub fn discard(&mut self, scope: ScopeId) -> CoreResult<()> {
        let node = self.scope(scope)?;
        if let Some(child) = node.child {
            return Err(CoreError::invalid_state(format!(
                "{scope} still hosts open sub-scope {child}"
            )));
        }
        if context::is_entered(scope) {
            return Err(CoreError::invalid_state(format!(
                "{scope} is entered on the current thread"
            )));
        }
        let parent = node.parent;

        self.dispatch(scope, &ScopeEvent::TransactionDiscard)?;
        self.scopes.remove(&scope);
        if let Some(parent) = parent {
            if let Some(node) = self.scopes.get_mut(&parent) {
                node.child = None;
            }
        }
        debug!(scope = %scope, "discarded scope");
        Ok(())
    }

    /// Makes `scope` the current scope of this thread until the returned
    /// guard is dropped. Entering is re-entrant.
    pub fn enter_scope(&self, scope: ScopeId) -> CoreResult<ScopeGuard> {
        self.scope(scope)?;
        let depth = context::push(scope);
        trace!(scope = %scope, depth, "entered scope");
        Ok(ScopeGuard::new(scope, depth))
    }

    /// Exits `scope`, which must be the current scope of this thread.
    pub fn exit_scope(&self, scope: ScopeId) -> CoreResult<()> {
        context::pop(scope)?;
        trace!(scope = %scope, "exited scope");
        Ok(())
    }

    /// Returns the current scope of this thread, if it belongs to this
    /// manager.
    #[must_use]
    pub fn current_scope(&self) -> Option<ScopeId> {
        context::current_scope().filter(|id| self.scopes.contains_key(id))
    }

    /// Fails with `ReadOnlyViolation` if `scope` hosts an open sub-scope.
    pub fn ensure_writeable(&self, scope: ScopeId, operation: &'static str) -> CoreResult<()> {
        if self.scope(scope)?.is_read_only() {
            return Err(CoreError::ReadOnlyViolation { scope, operation });
        }
        Ok(())
    }

    // ========================================================================
    // Tree queries
    // ========================================================================

    pub(crate) fn scope(&self, scope: ScopeId) -> CoreResult<&Scope> {
        self.scopes
            .get(&scope)
            .ok_or_else(|| CoreError::invalid_state(format!("{scope} is unknown or discarded")))
    }

    pub(crate) fn scope_mut(&mut self, scope: ScopeId) -> CoreResult<&mut Scope> {
        self.scopes
            .get_mut(&scope)
            .ok_or_else(|| CoreError::invalid_state(format!("{scope} is unknown or discarded")))
    }

    /// Returns the parent of a scope.
    pub fn parent(&self, scope: ScopeId) -> CoreResult<Option<ScopeId>> {
        Ok(self.scope(scope)?.parent)
    }

    /// Returns the open sub-scope of a scope.
    pub fn child(&self, scope: ScopeId) -> CoreResult<Option<ScopeId>> {
        Ok(self.scope(scope)?.child)
    }

    /// Returns the root of the tree containing `scope`.
    pub fn root_of(&self, scope: ScopeId) -> CoreResult<ScopeId> {
        let mut current = self.scope(scope)?;
        while let Some(parent) = current.parent {
            current = self.scope(parent)?;
        }
        Ok(current.id)
    }

    /// Returns the nesting depth (0 for a root).
    pub fn depth(&self, scope: ScopeId) -> CoreResult<usize> {
        Ok(self.scope(scope)?.depth)
    }

    /// Returns `true` while `scope` hosts an open sub-scope.
    pub fn is_read_only(&self, scope: ScopeId) -> CoreResult<bool> {
        Ok(self.scope(scope)?.is_read_only())
    }

    /// Returns the number of live scopes.
    #[must_use]
    pub fn scope_count(&self) -> usize {
        self.scopes.len()
    }

    /// Returns `true` if `scope` is live.
    #[must_use]
    pub fn contains_scope(&self, scope: ScopeId) -> bool {
        self.scopes.contains_key(&scope)
    }

    /// Returns the scope followed by its ancestors, innermost first.
    pub(crate) fn ancestry(&self, scope: ScopeId) -> CoreResult<Vec<ScopeId>> {
        let mut chain = vec![scope];
        let mut current = self.scope(scope)?;
        while let Some(parent) = current.parent {
            chain.push(parent);
            current = self.scope(parent)?;
        }
        Ok(chain)
    }

    /// Returns the data manager of a scope.
    pub fn data_manager(&self, scope: ScopeId) -> CoreResult<&DataManager> {
        Ok(&self.scope(scope)?.data)
    }

    // ========================================================================
    // Listeners
    // ========================================================================

    /// Appends a listener to a scope's bus.
    pub fn add_listener(&mut self, scope: ScopeId, listener: Box<dyn ScopeListener>) -> CoreResult<()> {
        self.scope_mut(scope)?.listeners.add(listener);
        Ok(())
    }

    /// Removes a listener by name.
    pub fn remove_listener(&mut self, scope: ScopeId, name: &str) -> CoreResult<bool> {
        Ok(self.scope_mut(scope)?.listeners.remove(name))
    }

    /// Returns the listener names of a scope in notification order.
    pub fn listener_names(&self, scope: ScopeId) -> CoreResult<Vec<String>> {
        Ok(self.scope(scope)?.listeners.names())
    }

    pub(crate) fn dispatch(&mut self, scope: ScopeId, event: &ScopeEvent<'_>) -> CoreResult<()> {
        self.scope_mut(scope)?.listeners.dispatch(scope, event)
    }

    // ========================================================================
    // Loading
    // ========================================================================

    /// Returns the container of `id` in `scope`, loading it on demand.
    ///
    /// The nearest ancestor holding the object provides its current values;
    /// if none does, the object is loaded through the persistence strategy
    /// into the root and copied down to `scope`. Loading is allowed in
    /// read-only scopes.
    ///
    /// # Errors
    ///
    /// `ObjectNotFound` if the store does not know `id`; `ObjectInvalid` if
    /// `id` was deleted in an ancestor or left this scope.
    pub fn get_or_load(&mut self, scope: ScopeId, id: EntityId) -> CoreResult<&DataContainer> {
        self.ensure_loaded(scope, id)?;
        self.scope(scope)?
            .data
            .get(id)
            .ok_or(CoreError::ObjectNotFound { id })
    }

    pub(crate) fn ensure_loaded(&mut self, scope: ScopeId, id: EntityId) -> CoreResult<()> {
        let chain = self.ancestry(scope)?;
        let mut holder = None;
        for (level, scope_id) in chain.iter().enumerate() {
            let data = &self.scope(*scope_id)?.data;
            if data.is_invalid(id) {
                return Err(CoreError::ObjectInvalid { id });
            }
            if let Some(container) = data.get(id) {
                if level == 0 {
                    return Ok(());
                }
                if container.is_deleted() {
                    return Err(CoreError::ObjectInvalid { id });
                }
                holder = Some(level);
                break;
            }
        }

        let start = match holder {
            Some(level) => level,
            None => {
                let root = *chain.last().unwrap_or(&scope);
                trace!(scope = %root, entity = %id, "loading object from persistence");
                let persisted = self
                    .persistence
                    .load(id)?
                    .ok_or(CoreError::ObjectNotFound { id })?;
                self.scope_mut(root)?
                    .data
                    .register(DataContainer::from_persisted(persisted))?;
                self.dispatch(root, &ScopeEvent::ObjectLoaded { id })?;
                chain.len() - 1
            }
        };

        for level in (0..start).rev() {
            let source = chain[level + 1];
            let target = chain[level];
            let copy = self
                .scope(source)?
                .data
                .get(id)
                .map(DataContainer::copy_for_child)
                .ok_or(CoreError::ObjectNotFound { id })?;
            trace!(scope = %target, entity = %id, "copied object from parent scope");
            self.scope_mut(target)?.data.register(copy)?;
            self.dispatch(target, &ScopeEvent::ObjectLoaded { id })?;
        }
        Ok(())
    }

    /// Loads `id` and fails if it is marked deleted in `scope`.
    pub(crate) fn ensure_alive(
        &mut self,
        scope: ScopeId,
        id: EntityId,
        operation: &'static str,
    ) -> CoreResult<()> {
        self.ensure_loaded(scope, id)?;
        let deleted = self
            .scope(scope)?
            .data
            .get(id)
            .is_some_and(DataContainer::is_deleted);
        if deleted {
            return Err(CoreError::ObjectDeleted { id, operation });
        }
        Ok(())
    }

    // ========================================================================
    // Properties
    // ========================================================================

    /// Returns the current value of a property, loading the object on demand.
    pub fn property(&mut self, scope: ScopeId, id: EntityId, name: &str) -> CoreResult<PropertyValue> {
        self.ensure_alive(scope, id, "property")?;
        self.scope(scope)?
            .data
            .get(id)
            .and_then(|c| c.value(name))
            .cloned()
            .ok_or_else(|| CoreError::UnknownProperty {
                class: id.class(),
                property: name.to_string(),
            })
    }

    /// Sets a property.
    ///
    /// Fires `PropertyValueChanging` (vetoable) and `PropertyValueChanged`.
    /// Setting the current value again is a no-op without events.
    pub fn set_property(
        &mut self,
        scope: ScopeId,
        id: EntityId,
        name: &str,
        value: impl Into<PropertyValue>,
    ) -> CoreResult<()> {
        self.ensure_writeable(scope, "set_property")?;
        self.ensure_alive(scope, id, "set_property")?;
        self.schema.check_property(id.class(), name)?;
        let value = value.into();

        let old = self
            .scope(scope)?
            .data
            .get(id)
            .and_then(|c| c.value(name))
            .cloned()
            .ok_or_else(|| CoreError::UnknownProperty {
                class: id.class(),
                property: name.to_string(),
            })?;
        if old == value {
            return Ok(());
        }

        self.dispatch(
            scope,
            &ScopeEvent::PropertyValueChanging {
                id,
                property: name,
                old: &old,
                new: &value,
            },
        )?;
        self.scope_mut(scope)?
            .data
            .get_mut(id)
            .ok_or(CoreError::ObjectNotFound { id })?
            .set_value(name, value.clone())?;
        self.dispatch(
            scope,
            &ScopeEvent::PropertyValueChanged {
                id,
                property: name,
                old: &old,
                new: &value,
            },
        )
    }

    // ========================================================================
    // Object lifecycle
    // ========================================================================

    /// Creates a new object of `class` with the class's default values.
    pub fn new_object(&mut self, scope: ScopeId, class: ClassId) -> CoreResult<EntityId> {
        let id = EntityId::new(class);
        self.new_object_with_id(scope, id)?;
        Ok(id)
    }

    /// Creates a new object with a caller-chosen identity.
    ///
    /// Every relation end point of the new object is complete and empty.
    ///
    /// # Errors
    ///
    /// `DuplicateEntity` if `id` is known in this scope or an ancestor.
    pub fn new_object_with_id(&mut self, scope: ScopeId, id: EntityId) -> CoreResult<()> {
        self.ensure_writeable(scope, "new_object")?;
        let schema = Arc::clone(&self.schema);
        let class = schema.class(id.class())?;
        for scope_id in self.ancestry(scope)? {
            if self.scope(scope_id)?.data.contains(id) {
                return Err(CoreError::DuplicateEntity { id });
            }
        }

        let data = &mut self.scope_mut(scope)?.data;
        data.register(DataContainer::new_object(id, class.defaults().clone()))?;
        for relation in schema.relations_of(id.class()) {
            data.insert_end_point(RelationEndPoint::new_complete(
                RelationEndPointId::new(id, relation.name()),
                relation.cardinality(),
            ));
        }
        trace!(scope = %scope, entity = %id, "created object");
        self.dispatch(scope, &ScopeEvent::ObjectCreated { id })
    }

    // ========================================================================
    // State
    // ========================================================================

    /// Returns the state of an object as seen from `scope`.
    ///
    /// An `Unchanged` container with a changed relation end point reports
    /// `Changed`. No loading is triggered.
    pub fn object_state(&self, scope: ScopeId, id: EntityId) -> CoreResult<EntityState> {
        let data = &self.scope(scope)?.data;
        if let Some(container) = data.get(id) {
            let state = container.state();
            if state == EntityState::Unchanged && data.has_changed_end_points(id) {
                return Ok(EntityState::Changed);
            }
            return Ok(state);
        }
        for scope_id in self.ancestry(scope)? {
            if self.scope(scope_id)?.data.is_invalid(id) {
                return Ok(EntityState::Invalid);
            }
        }
        Ok(EntityState::NotLoadedYet)
    }

    /// Returns `true` if `scope` holds uncommitted changes.
    pub fn has_changes(&self, scope: ScopeId) -> CoreResult<bool> {
        Ok(self.scope(scope)?.data.has_changes())
    }

    /// Returns the objects with uncommitted changes in `scope`.
    pub fn changed_objects(&self, scope: ScopeId) -> CoreResult<Vec<EntityId>> {
        Ok(self.scope(scope)?.data.changed_objects())
    }

    // ========================================================================
    // Commit and rollback
    // ========================================================================

    /// Commits `scope`.
    ///
    /// A sub-scope hands its changes to its parent; the root pushes them
    /// to the persistence strategy. Either way the scope's own state then
    /// becomes `Unchanged`. The scope stays open.
    ///
    /// # Errors
    ///
    /// `ReadOnlyViolation` while a sub-scope is open; a listener veto from
    /// `TransactionCommitting`; `ConcurrencyConflict` if the store rejects
    /// the change set, in which case no state changes.
    pub fn commit(&mut self, scope: ScopeId) -> CoreResult<()> {
        self.ensure_writeable(scope, "commit")?;
        let objects = self.scope(scope)?.data.changed_objects();
        self.dispatch(scope, &ScopeEvent::TransactionCommitting { objects: &objects })?;

        let parent = self.scope(scope)?.parent;
        match parent {
            None => {
                let changes = self.scope(scope)?.data.change_set();
                if !changes.is_empty() {
                    let receipt = match self.persistence.commit(&changes) {
                        Ok(receipt) => receipt,
                        Err(err) => {
                            if let CoreError::ConcurrencyConflict { id, .. } = &err {
                                warn!(scope = %scope, entity = %id, "commit rejected by concurrency conflict");
                            }
                            return Err(err);
                        }
                    };
                    self.scope_mut(scope)?.data.apply_receipt(&receipt);
                }
            }
            Some(parent) => {
                let promotion = self.scope(scope)?.data.collect_promotion();
                let mut staged = self.scope(parent)?.data.clone();
                staged.absorb(promotion, &self.schema)?;
                self.scope_mut(parent)?.data = staged;
            }
        }

        self.scope_mut(scope)?.data.commit_local();
        debug!(scope = %scope, objects = objects.len(), "committed scope");
        self.dispatch(scope, &ScopeEvent::TransactionCommitted { objects: &objects })
    }

    /// Reverts every uncommitted change in `scope`.
    ///
    /// New objects become invalid; deleted objects are restored.
    pub fn rollback(&mut self, scope: ScopeId) -> CoreResult<()> {
        self.ensure_writeable(scope, "rollback")?;
        self.dispatch(scope, &ScopeEvent::TransactionRollingBack)?;
        self.scope_mut(scope)?.data.rollback_local();
        debug!(scope = %scope, "rolled back scope");
        self.dispatch(scope, &ScopeEvent::TransactionRolledBack)
    }
}
