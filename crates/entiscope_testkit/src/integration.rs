//! Model-checked integration harnesses.
//!
//! Each harness drives a [`TestEngine`] and a plain model side by side and
//! asserts that both agree after every operation.

use crate::fixtures::{relations, TestEngine, CUSTOMER, ORDER};
use crate::generators::{CollectionOp, ScopeOp};
use entiscope_core::{CoreError, EntityId, PropertyValue, ScopeId};

/// Drives `Customer.orders` of one customer against a `Vec` model.
pub struct CollectionHarness {
    /// The engine under test.
    pub engine: TestEngine,
    scope: ScopeId,
    customer: EntityId,
    pool: Vec<EntityId>,
    expected: Vec<EntityId>,
}

impl CollectionHarness {
    /// Creates a root scope holding one new customer and `pool` new orders.
    pub fn new(pool: usize) -> Self {
        let mut engine = TestEngine::new();
        let scope = engine.create_root();
        let customer = engine
            .new_object(scope, CUSTOMER)
            .expect("Failed to create customer");
        let pool = (0..pool.max(1))
            .map(|_| engine.new_object(scope, ORDER).expect("Failed to create order"))
            .collect();
        Self {
            engine,
            scope,
            customer,
            pool,
            expected: Vec::new(),
        }
    }

    /// Returns the scope the harness works in.
    pub fn scope(&self) -> ScopeId {
        self.scope
    }

    /// Returns the customer owning the collection.
    pub fn customer(&self) -> EntityId {
        self.customer
    }

    /// Returns the model's view of the collection.
    pub fn expected(&self) -> &[EntityId] {
        &self.expected
    }

    /// Applies `op` to engine and model.
    ///
    /// # Panics
    ///
    /// Panics if the engine's outcome differs from the model's.
    pub fn apply(&mut self, op: &CollectionOp) {
        let relation = relations::CUSTOMER_ORDERS;
        let (scope, customer) = (self.scope, self.customer);
        match *op {
            CollectionOp::Insert { index, item } => {
                let item = self.pool[item % self.pool.len()];
                let index = index % (self.expected.len() + 1);
                let result = self
                    .engine
                    .insert_related(scope, customer, relation, index, item);
                if self.expected.contains(&item) {
                    assert!(
                        matches!(result, Err(CoreError::DuplicateRelatedObject { .. })),
                        "duplicate insert of {item} returned {result:?}"
                    );
                } else {
                    result.expect("Failed to insert");
                    self.expected.insert(index, item);
                }
            }
            CollectionOp::Add { item } => {
                let item = self.pool[item % self.pool.len()];
                let result = self.engine.add_related(scope, customer, relation, item);
                if self.expected.contains(&item) {
                    assert!(
                        matches!(result, Err(CoreError::DuplicateRelatedObject { .. })),
                        "duplicate add of {item} returned {result:?}"
                    );
                } else {
                    result.expect("Failed to add");
                    self.expected.push(item);
                }
            }
            CollectionOp::Remove { item } => {
                let item = self.pool[item % self.pool.len()];
                let removed = self
                    .engine
                    .remove_related(scope, customer, relation, item)
                    .expect("Failed to remove");
                assert_eq!(removed, self.expected.contains(&item));
                self.expected.retain(|id| *id != item);
            }
            CollectionOp::Replace { index, item } => {
                let item = self.pool[item % self.pool.len()];
                if self.expected.is_empty() {
                    let result = self
                        .engine
                        .replace_related(scope, customer, relation, 0, item);
                    assert!(
                        matches!(result, Err(CoreError::IndexOutOfRange { .. })),
                        "replace in empty collection returned {result:?}"
                    );
                    return;
                }
                let index = index % self.expected.len();
                let result = self
                    .engine
                    .replace_related(scope, customer, relation, index, item);
                if self.expected[index] == item {
                    result.expect("Failed to replace with itself");
                } else if self.expected.contains(&item) {
                    assert!(
                        matches!(result, Err(CoreError::DuplicateRelatedObject { .. })),
                        "duplicate replace of {item} returned {result:?}"
                    );
                } else {
                    result.expect("Failed to replace");
                    self.expected[index] = item;
                }
            }
            CollectionOp::Clear => {
                self.engine
                    .clear_related(scope, customer, relation)
                    .expect("Failed to clear");
                self.expected.clear();
            }
            CollectionOp::Sort { descending } => {
                self.engine
                    .sort_related(scope, customer, relation, |a, b| {
                        if descending {
                            b.cmp(a)
                        } else {
                            a.cmp(b)
                        }
                    })
                    .expect("Failed to sort");
                self.expected.sort();
                if descending {
                    self.expected.reverse();
                }
            }
        }
    }

    /// Asserts that the collection and every back reference match the model.
    pub fn verify(&mut self) {
        let (scope, customer) = (self.scope, self.customer);
        let actual = self
            .engine
            .related_ids(scope, customer, relations::CUSTOMER_ORDERS)
            .expect("Failed to read collection");
        assert_eq!(actual, self.expected, "collection differs from model");

        for order in self.pool.clone() {
            let back = self
                .engine
                .related_object(scope, order, relations::ORDER_CUSTOMER)
                .expect("Failed to read back reference");
            let expected = self.expected.contains(&order).then_some(customer);
            assert_eq!(back, expected, "back reference of {order} differs from model");
        }
    }
}

struct Level {
    scope: ScopeId,
    current: Vec<i64>,
    baseline: Vec<i64>,
}

/// Drives a stack of nested scopes editing `Order.number` against a
/// per-level model of current and last-accepted values.
pub struct ScopeHarness {
    /// The engine under test.
    pub engine: TestEngine,
    pool: Vec<EntityId>,
    levels: Vec<Level>,
    stored: Vec<i64>,
    max_depth: usize,
}

impl ScopeHarness {
    /// Seeds `objects` orders numbered from 0 and opens a root scope.
    pub fn new(objects: usize) -> Self {
        let mut engine = TestEngine::new();
        let stored: Vec<i64> = (0..objects.max(1) as i64).collect();
        let pool = stored.iter().map(|n| engine.seed_order(*n)).collect();
        let root = engine.create_root();
        let max_depth = engine.config().max_scope_depth.min(8);
        Self {
            engine,
            pool,
            levels: vec![Level {
                scope: root,
                current: stored.clone(),
                baseline: stored.clone(),
            }],
            stored,
            max_depth,
        }
    }

    /// Returns the innermost scope.
    pub fn innermost(&self) -> ScopeId {
        self.top().scope
    }

    /// Returns the number of open scopes, the root included.
    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    fn top(&self) -> &Level {
        &self.levels[self.levels.len() - 1]
    }

    fn top_mut(&mut self) -> &mut Level {
        let last = self.levels.len() - 1;
        &mut self.levels[last]
    }

    /// Applies `op` to engine and model.
    ///
    /// # Panics
    ///
    /// Panics if the engine rejects an operation the model allows.
    pub fn apply(&mut self, op: &ScopeOp) {
        let scope = self.innermost();
        match *op {
            ScopeOp::Set { object, value } => {
                let index = object % self.pool.len();
                self.engine
                    .set_property(scope, self.pool[index], "number", value)
                    .expect("Failed to set property");
                self.top_mut().current[index] = value;
            }
            ScopeOp::Open => {
                if self.levels.len() > self.max_depth {
                    return;
                }
                let child = self
                    .engine
                    .create_sub_scope(scope)
                    .expect("Failed to open sub-scope");
                let current = self.top().current.clone();
                self.levels.push(Level {
                    scope: child,
                    baseline: current.clone(),
                    current,
                });
            }
            ScopeOp::Commit => {
                self.engine.commit(scope).expect("Failed to commit");
                let current = self.top().current.clone();
                self.top_mut().baseline = current.clone();
                match self.levels.len() {
                    1 => self.stored = current,
                    len => self.levels[len - 2].current = current,
                }
            }
            ScopeOp::Rollback => {
                self.engine.rollback(scope).expect("Failed to roll back");
                let baseline = self.top().baseline.clone();
                self.top_mut().current = baseline;
            }
            ScopeOp::Discard => {
                if self.levels.len() == 1 {
                    return;
                }
                self.engine.discard(scope).expect("Failed to discard");
                self.levels.pop();
            }
        }
    }

    /// Asserts every level's view and the store against the model.
    pub fn verify(&mut self) {
        for level in 0..self.levels.len() {
            let scope = self.levels[level].scope;
            for (index, id) in self.pool.clone().into_iter().enumerate() {
                let actual = self
                    .engine
                    .property(scope, id, "number")
                    .expect("Failed to read property");
                assert_eq!(
                    actual,
                    PropertyValue::Int(self.levels[level].current[index]),
                    "level {level} disagrees on {id}"
                );
            }
        }
        for (index, id) in self.pool.iter().enumerate() {
            let stored = self.engine.store.get(*id).expect("seeded object vanished");
            assert_eq!(
                stored.properties.get("number"),
                Some(&PropertyValue::Int(self.stored[index])),
                "store disagrees on {id}"
            );
        }
    }
}
