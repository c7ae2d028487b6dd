//! Stress tests for entiscope.
//!
//! These runs exercise deep nesting, relation churn and several scope
//! trees committing to one shared store from different threads.

use crate::fixtures::{order_schema, relations, TestEngine, CUSTOMER, ORDER};
use entiscope_core::{
    CoreError, CoreResult, EntityId, InMemoryStore, PropertyValue, ScopeManager,
};
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Counts gathered by one stress run.
#[derive(Debug, Clone, Default)]
pub struct StressOutcome {
    /// Runs whose commits all went through.
    pub committed: usize,
    /// Runs that failed for any reason.
    pub failed: usize,
    /// Failed runs rejected by the store with a concurrency conflict.
    pub conflicts: usize,
    /// Wall-clock time of the whole run.
    pub elapsed: Duration,
}

impl StressOutcome {
    /// Returns the number of attempted runs.
    pub fn attempts(&self) -> usize {
        self.committed + self.failed
    }

    /// Returns committed runs per second, or 0 for an instant run.
    pub fn commits_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.committed as f64 / secs
        } else {
            0.0
        }
    }

    fn record(&mut self, result: CoreResult<()>) {
        match result {
            Ok(()) => self.committed += 1,
            Err(err) => {
                if matches!(err, CoreError::ConcurrencyConflict { .. }) {
                    self.conflicts += 1;
                }
                self.failed += 1;
            }
        }
    }
}

impl fmt::Display for StressOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} runs: {} committed, {} failed ({} conflicts), {:.2} commits/sec",
            self.attempts(),
            self.committed,
            self.failed,
            self.conflicts,
            self.commits_per_second()
        )
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of operations to perform.
    pub operations: usize,
    /// Number of concurrent threads (for concurrent tests).
    pub threads: usize,
    /// Nesting depth below the root.
    pub depth: usize,
    /// Number of distinct objects.
    pub object_count: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 1_000,
            threads: 4,
            depth: 4,
            object_count: 32,
        }
    }
}

/// Opens `depth` nested scopes, edits one order in the innermost, and
/// commits and discards every level back to the root, once per operation.
pub fn stress_nested_commits(engine: &mut TestEngine, config: &StressConfig) -> StressOutcome {
    let ids: Vec<_> = (0..config.object_count.max(1) as i64)
        .map(|n| engine.seed_order(n))
        .collect();
    let root = engine.create_root();

    let start = Instant::now();
    let mut outcome = StressOutcome::default();
    for i in 0..config.operations {
        let id = ids[i % ids.len()];
        let result = (|| -> CoreResult<()> {
            let mut chain = vec![root];
            for _ in 0..config.depth {
                let parent = chain[chain.len() - 1];
                chain.push(engine.create_sub_scope(parent)?);
            }
            let innermost = chain[chain.len() - 1];
            engine.set_property(innermost, id, "number", 1_000 + i as i64)?;
            while let Some(scope) = chain.pop() {
                engine.commit(scope)?;
                if scope != root {
                    engine.discard(scope)?;
                }
            }
            Ok(())
        })();
        outcome.record(result);
    }
    outcome.elapsed = start.elapsed();
    outcome
}

/// Moves orders between two customers inside short-lived sub-scopes; every
/// pass over the orders hands all of them to the other customer.
pub fn stress_relation_churn(engine: &mut TestEngine, config: &StressConfig) -> StressOutcome {
    let root = engine.create_root();
    let setup = (|| -> CoreResult<_> {
        let customers = [
            engine.new_object(root, CUSTOMER)?,
            engine.new_object(root, CUSTOMER)?,
        ];
        let orders = (0..config.object_count.max(1))
            .map(|_| engine.new_object(root, ORDER))
            .collect::<CoreResult<Vec<_>>>()?;
        Ok((customers, orders))
    })();
    let Ok((customers, orders)) = setup else {
        return StressOutcome {
            failed: config.operations,
            ..StressOutcome::default()
        };
    };

    let start = Instant::now();
    let mut outcome = StressOutcome::default();
    for i in 0..config.operations {
        let order = orders[i % orders.len()];
        let customer = customers[(i / orders.len()) % 2];
        let result = (|| -> CoreResult<()> {
            let sub = engine.create_sub_scope(root)?;
            engine.add_related(sub, customer, relations::CUSTOMER_ORDERS, order)?;
            engine.commit(sub)?;
            engine.discard(sub)
        })();
        outcome.record(result);
    }
    outcome.elapsed = start.elapsed();
    outcome
}

/// Identity of the customer renamed by [`stress_concurrent_writers`].
pub fn shared_customer() -> EntityId {
    EntityId::named(CUSTOMER, "shared")
}

/// Runs one scope tree per thread, all renaming the same customer in a
/// shared store. Commits that lose the race fail with a concurrency
/// conflict.
pub fn stress_concurrent_writers(store: &Arc<InMemoryStore>, config: &StressConfig) -> StressOutcome {
    let schema = Arc::new(order_schema());
    let customer = shared_customer();
    store.insert(customer, [("name".to_string(), PropertyValue::from("shared"))]);

    let per_thread = config.operations / config.threads.max(1);
    let start = Instant::now();
    let handles: Vec<_> = (0..config.threads.max(1))
        .map(|t| {
            let store = Arc::clone(store);
            let schema = Arc::clone(&schema);
            thread::spawn(move || {
                let mut manager = ScopeManager::new(schema, store);
                let mut outcome = StressOutcome::default();
                for i in 0..per_thread {
                    let root = manager.create_root();
                    let result = manager
                        .set_property(root, customer, "name", format!("t{t}-{i}"))
                        .and_then(|()| manager.commit(root));
                    outcome.record(result);
                    let _ = manager.discard(root);
                }
                outcome
            })
        })
        .collect();

    let mut total = StressOutcome::default();
    for handle in handles {
        let outcome = handle.join().expect("writer thread panicked");
        total.committed += outcome.committed;
        total.failed += outcome.failed;
        total.conflicts += outcome.conflicts;
    }
    total.elapsed = start.elapsed();
    total
}
