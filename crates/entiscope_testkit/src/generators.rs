//! Property-based test generators using proptest.
//!
//! Operations refer to objects by position in a pool and to collection
//! slots by raw index; harnesses map both onto valid values, so every
//! generated sequence is executable.

use crate::fixtures::{ADDRESS, CUSTOMER, ORDER, ORDER_ITEM};
use entiscope_core::{ClassId, EntityId, PropertyValue};
use proptest::prelude::*;

/// Strategy for one of the sample schema's classes.
pub fn class_id_strategy() -> impl Strategy<Value = ClassId> {
    prop_oneof![Just(CUSTOMER), Just(ORDER), Just(ORDER_ITEM), Just(ADDRESS)]
}

/// Strategy for deterministic entity IDs of the sample classes.
pub fn entity_id_strategy() -> impl Strategy<Value = EntityId> {
    (
        class_id_strategy(),
        prop::string::string_regex("[a-z][a-z0-9]{0,11}").expect("Invalid regex"),
    )
        .prop_map(|(class, name)| EntityId::named(class, &name))
}

/// Strategy for property values. Floats are always finite.
pub fn property_value_strategy() -> impl Strategy<Value = PropertyValue> {
    prop_oneof![
        1 => Just(PropertyValue::Null),
        1 => any::<bool>().prop_map(PropertyValue::Bool),
        3 => any::<i64>().prop_map(PropertyValue::Int),
        1 => (-1.0e9..1.0e9f64).prop_map(PropertyValue::Float),
        3 => prop::string::string_regex("[a-zA-Z ]{0,16}")
            .expect("Invalid regex")
            .prop_map(PropertyValue::Text),
    ]
}

/// An operation on one relation collection.
#[derive(Debug, Clone)]
pub enum CollectionOp {
    /// Insert a pool object at a slot.
    Insert {
        /// Raw slot, reduced modulo `len + 1`.
        index: usize,
        /// Pool position.
        item: usize,
    },
    /// Append a pool object.
    Add {
        /// Pool position.
        item: usize,
    },
    /// Remove a pool object.
    Remove {
        /// Pool position.
        item: usize,
    },
    /// Replace the object at a slot with a pool object.
    Replace {
        /// Raw slot, reduced modulo `len`.
        index: usize,
        /// Pool position.
        item: usize,
    },
    /// Remove everything.
    Clear,
    /// Reorder by identity.
    Sort {
        /// Largest identity first.
        descending: bool,
    },
}

/// Strategy for collection operations over a pool of `pool` objects.
pub fn collection_op_strategy(pool: usize) -> impl Strategy<Value = CollectionOp> {
    let item = 0..pool.max(1);
    prop_oneof![
        3 => (any::<usize>(), item.clone())
            .prop_map(|(index, item)| CollectionOp::Insert { index, item }),
        3 => item.clone().prop_map(|item| CollectionOp::Add { item }),
        2 => item.clone().prop_map(|item| CollectionOp::Remove { item }),
        2 => (any::<usize>(), item)
            .prop_map(|(index, item)| CollectionOp::Replace { index, item }),
        1 => Just(CollectionOp::Clear),
        1 => any::<bool>().prop_map(|descending| CollectionOp::Sort { descending }),
    ]
}

/// Strategy for a sequence of collection operations.
pub fn collection_ops_strategy(
    pool: usize,
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<CollectionOp>> {
    prop::collection::vec(collection_op_strategy(pool), min_ops..max_ops)
}

/// An operation on a stack of nested scopes.
#[derive(Debug, Clone)]
pub enum ScopeOp {
    /// Set a property of a pool object in the innermost scope.
    Set {
        /// Pool position.
        object: usize,
        /// New value.
        value: i64,
    },
    /// Open a sub-scope of the innermost scope.
    Open,
    /// Commit the innermost scope.
    Commit,
    /// Roll the innermost scope back.
    Rollback,
    /// Discard the innermost scope unless it is the root.
    Discard,
}

/// Strategy for scope operations over a pool of `objects` objects.
pub fn scope_op_strategy(objects: usize) -> impl Strategy<Value = ScopeOp> {
    prop_oneof![
        4 => (0..objects.max(1), -100i64..100)
            .prop_map(|(object, value)| ScopeOp::Set { object, value }),
        2 => Just(ScopeOp::Open),
        2 => Just(ScopeOp::Commit),
        1 => Just(ScopeOp::Rollback),
        2 => Just(ScopeOp::Discard),
    ]
}

/// Strategy for a sequence of scope operations.
pub fn scope_ops_strategy(
    objects: usize,
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<ScopeOp>> {
    prop::collection::vec(scope_op_strategy(objects), min_ops..max_ops)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn entity_ids_are_deterministic(id in entity_id_strategy()) {
            prop_assert!(id.class().as_u32() >= 1 && id.class().as_u32() <= 4);
        }

        #[test]
        fn floats_are_finite(value in property_value_strategy()) {
            if let PropertyValue::Float(f) = value {
                prop_assert!(f.is_finite());
            }
        }

        #[test]
        fn collection_ops_stay_in_pool(ops in collection_ops_strategy(4, 1, 20)) {
            for op in ops {
                let item = match op {
                    CollectionOp::Insert { item, .. }
                    | CollectionOp::Add { item }
                    | CollectionOp::Remove { item }
                    | CollectionOp::Replace { item, .. } => item,
                    CollectionOp::Clear | CollectionOp::Sort { .. } => 0,
                };
                prop_assert!(item < 4);
            }
        }
    }
}
