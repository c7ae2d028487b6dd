//! The scope tree: nested transactions over shared, lazily loaded data.

mod context;
mod manager;
mod node;
mod relations;

pub use context::{current_scope, is_entered, ScopeGuard};
pub use manager::ScopeManager;

#[cfg(test)]
pub(crate) mod fixtures;
