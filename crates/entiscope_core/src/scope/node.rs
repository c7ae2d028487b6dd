//! A node of the scope tree.

use crate::data::DataManager;
use crate::listener::ListenerBus;
use crate::types::ScopeId;

/// One scope: its position in the tree, its data and its listeners.
#[derive(Debug)]
pub(crate) struct Scope {
    pub id: ScopeId,
    pub parent: Option<ScopeId>,
    pub child: Option<ScopeId>,
    pub depth: usize,
    pub data: DataManager,
    pub listeners: ListenerBus,
}

impl Scope {
    pub fn new(id: ScopeId, parent: Option<ScopeId>, depth: usize, listeners: ListenerBus) -> Self {
        Self {
            id,
            parent,
            child: None,
            depth,
            data: DataManager::new(),
            listeners,
        }
    }

    /// A scope is read-only while it hosts an open sub-scope.
    pub fn is_read_only(&self) -> bool {
        self.child.is_some()
    }

    pub fn split_mut(&mut self) -> (&mut DataManager, &mut ListenerBus) {
        (&mut self.data, &mut self.listeners)
    }
}
