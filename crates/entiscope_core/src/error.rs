//! Error types for entiscope core.

use crate::entity::EntityId;
use crate::relation::RelationEndPointId;
use crate::types::{ClassId, ScopeId, Version};
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in entiscope core operations.
///
/// Every variant is raised synchronously at the point of violation and
/// carries the context (scope, operation, identity, end point) needed to
/// reproduce it. Listener vetoes travel through the same type.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    /// A mutating operation was attempted on a scope that has an open child.
    #[error("scope {scope} is read-only while a sub-scope is open; `{operation}` rejected")]
    ReadOnlyViolation {
        /// The read-only scope.
        scope: ScopeId,
        /// The rejected operation.
        operation: &'static str,
    },

    /// A relation whose data has not been loaded was mutated.
    #[error("relation end point {end_point} is incomplete; `{operation}` requires it to be loaded")]
    IncompleteEndPointViolation {
        /// The incomplete end point.
        end_point: RelationEndPointId,
        /// The rejected operation.
        operation: &'static str,
    },

    /// The persistence strategy could not resolve the identity.
    #[error("object not found: {id}")]
    ObjectNotFound {
        /// The identity that was requested.
        id: EntityId,
    },

    /// The backing store's version stamp no longer matches.
    #[error("concurrency conflict on {id}: expected {expected}, found {}", display_version(.actual))]
    ConcurrencyConflict {
        /// The conflicting object.
        id: EntityId,
        /// Version the committing scope based its change on.
        expected: Version,
        /// Version currently in the store, `None` if the object is gone.
        actual: Option<Version>,
    },

    /// Structural misuse of the engine (double discard, unbalanced exit, ...).
    #[error("invalid state: {message}")]
    InvalidState {
        /// Description of the misuse.
        message: String,
    },

    /// Mutation through a read-only collection.
    #[error("operation not supported: {operation}")]
    NotSupported {
        /// The rejected operation.
        operation: &'static str,
    },

    /// An object with this identity is already registered.
    #[error("object already registered: {id}")]
    DuplicateEntity {
        /// The duplicated identity.
        id: EntityId,
    },

    /// A collection end point already contains the object.
    #[error("{id} is already contained in {end_point}")]
    DuplicateRelatedObject {
        /// The collection end point.
        end_point: RelationEndPointId,
        /// The duplicated identity.
        id: EntityId,
    },

    /// A collection already contains the item.
    #[error("collection already contains {id}")]
    DuplicateItem {
        /// The duplicated identity.
        id: EntityId,
    },

    /// Operation on an object that is marked deleted in this scope.
    #[error("object {id} is deleted; `{operation}` rejected")]
    ObjectDeleted {
        /// The deleted object.
        id: EntityId,
        /// The rejected operation.
        operation: &'static str,
    },

    /// The object no longer exists in this scope (committed deletion or
    /// discarded new object).
    #[error("object {id} is invalid in this scope")]
    ObjectInvalid {
        /// The invalid object.
        id: EntityId,
    },

    /// Positional access outside the collection.
    #[error("index {index} out of range for collection of length {len}")]
    IndexOutOfRange {
        /// The requested index.
        index: usize,
        /// The collection length.
        len: usize,
    },

    /// Class is not part of the schema.
    #[error("unknown class: {class}")]
    UnknownClass {
        /// The unknown class.
        class: ClassId,
    },

    /// Property is not declared by the class.
    #[error("class {class} has no property `{property}`")]
    UnknownProperty {
        /// The class searched.
        class: ClassId,
        /// The missing property.
        property: String,
    },

    /// Relation is not part of the schema.
    #[error("unknown relation: {relation}")]
    UnknownRelation {
        /// The unknown relation name.
        relation: String,
    },

    /// Relation used with the wrong cardinality or class.
    #[error("relation `{relation}`: {message}")]
    RelationMismatch {
        /// The relation name.
        relation: String,
        /// Description of the mismatch.
        message: String,
    },

    /// Schema definition is inconsistent.
    #[error("invalid schema: {message}")]
    InvalidSchema {
        /// Description of the inconsistency.
        message: String,
    },

    /// A listener rejected a pending change.
    #[error("vetoed: {reason}")]
    Vetoed {
        /// Reason given by the listener.
        reason: String,
    },

    /// The persistence strategy failed for a reason other than a conflict.
    #[error("persistence error: {message}")]
    Persistence {
        /// Description of the failure.
        message: String,
    },
}

fn display_version(version: &Option<Version>) -> String {
    match version {
        Some(v) => v.to_string(),
        None => "no object".to_string(),
    }
}

impl CoreError {
    /// Creates an invalid state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Creates a not-supported error.
    pub fn not_supported(operation: &'static str) -> Self {
        Self::NotSupported { operation }
    }

    /// Creates a listener veto.
    pub fn veto(reason: impl Into<String>) -> Self {
        Self::Vetoed {
            reason: reason.into(),
        }
    }

    /// Creates a relation mismatch error.
    pub fn relation_mismatch(relation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RelationMismatch {
            relation: relation.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid schema error.
    pub fn invalid_schema(message: impl Into<String>) -> Self {
        Self::InvalidSchema {
            message: message.into(),
        }
    }

    /// Creates a persistence error.
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence {
            message: message.into(),
        }
    }

    /// Returns `true` if the caller may reload and retry the unit of work.
    ///
    /// Only concurrency conflicts are recoverable; everything else is a
    /// programming error or a veto that retrying would not fix.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }

    /// Returns a stable snake_case name for the error kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ReadOnlyViolation { .. } => "read_only_violation",
            Self::IncompleteEndPointViolation { .. } => "incomplete_end_point_violation",
            Self::ObjectNotFound { .. } => "object_not_found",
            Self::ConcurrencyConflict { .. } => "concurrency_conflict",
            Self::InvalidState { .. } => "invalid_state",
            Self::NotSupported { .. } => "not_supported",
            Self::DuplicateEntity { .. } => "duplicate_entity",
            Self::DuplicateRelatedObject { .. } => "duplicate_related_object",
            Self::DuplicateItem { .. } => "duplicate_item",
            Self::ObjectDeleted { .. } => "object_deleted",
            Self::ObjectInvalid { .. } => "object_invalid",
            Self::IndexOutOfRange { .. } => "index_out_of_range",
            Self::UnknownClass { .. } => "unknown_class",
            Self::UnknownProperty { .. } => "unknown_property",
            Self::UnknownRelation { .. } => "unknown_relation",
            Self::RelationMismatch { .. } => "relation_mismatch",
            Self::InvalidSchema { .. } => "invalid_schema",
            Self::Vetoed { .. } => "vetoed",
            Self::Persistence { .. } => "persistence",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_conflicts_are_recoverable() {
        let id = EntityId::named(ClassId::new(1), "a");
        let conflict = CoreError::ConcurrencyConflict {
            id,
            expected: Version::new(1),
            actual: Some(Version::new(2)),
        };
        assert!(conflict.is_recoverable());
        assert!(!CoreError::invalid_state("x").is_recoverable());
        assert!(!CoreError::veto("no").is_recoverable());
    }

    #[test]
    fn read_only_message_names_operation() {
        let err = CoreError::ReadOnlyViolation {
            scope: ScopeId::from_raw(7),
            operation: "set_property",
        };
        let text = err.to_string();
        assert!(text.contains("scope:7"));
        assert!(text.contains("set_property"));
        assert_eq!(err.kind(), "read_only_violation");
    }

    #[test]
    fn conflict_message_handles_missing_object() {
        let err = CoreError::ConcurrencyConflict {
            id: EntityId::named(ClassId::new(1), "gone"),
            expected: Version::new(3),
            actual: None,
        };
        assert!(err.to_string().contains("no object"));
    }
}
