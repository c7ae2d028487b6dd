//! Thread-local "current scope" stack.

use crate::error::{CoreError, CoreResult};
use crate::types::ScopeId;
use std::cell::RefCell;
use std::marker::PhantomData;

thread_local! {
    static SCOPE_STACK: RefCell<Vec<ScopeId>> = const { RefCell::new(Vec::new()) };
}

/// Returns the innermost scope entered on this thread.
#[must_use]
pub fn current_scope() -> Option<ScopeId> {
    SCOPE_STACK.with(|stack| stack.borrow().last().copied())
}

/// Returns `true` if `scope` is anywhere on this thread's stack.
#[must_use]
pub fn is_entered(scope: ScopeId) -> bool {
    SCOPE_STACK.with(|stack| stack.borrow().contains(&scope))
}

pub(crate) fn push(scope: ScopeId) -> usize {
    SCOPE_STACK.with(|stack| {
        let mut stack = stack.borrow_mut();
        stack.push(scope);
        stack.len()
    })
}

pub(crate) fn pop(scope: ScopeId) -> CoreResult<()> {
    SCOPE_STACK.with(|stack| {
        let mut stack = stack.borrow_mut();
        match stack.last() {
            Some(top) if *top == scope => {
                stack.pop();
                Ok(())
            }
            Some(top) => Err(CoreError::invalid_state(format!(
                "cannot exit {scope}: {top} is the current scope"
            ))),
            None => Err(CoreError::invalid_state(format!(
                "cannot exit {scope}: no scope is entered on this thread"
            ))),
        }
    })
}

/// Keeps a scope entered on the current thread until dropped.
///
/// The guard is tied to the thread that created it.
#[derive(Debug)]
#[must_use = "the scope is exited as soon as the guard is dropped"]
pub struct ScopeGuard {
    scope: ScopeId,
    depth: usize,
    _not_send: PhantomData<*const ()>,
}

impl ScopeGuard {
    pub(crate) fn new(scope: ScopeId, depth: usize) -> Self {
        Self {
            scope,
            depth,
            _not_send: PhantomData,
        }
    }

    /// Returns the guarded scope.
    #[must_use]
    pub fn scope(&self) -> ScopeId {
        self.scope
    }

    /// Exits the scope now, reporting an unbalanced stack.
    pub fn exit(self) -> CoreResult<()> {
        let result = pop(self.scope);
        std::mem::forget(self);
        result
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        SCOPE_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            if stack.len() == self.depth && stack.last() == Some(&self.scope) {
                stack.pop();
            }
        });
    }
}
