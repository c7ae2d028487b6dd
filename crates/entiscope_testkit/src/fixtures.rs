//! Test fixtures and engine helpers.
//!
//! Provides a sample order-management schema and a [`TestEngine`] that
//! bundles a scope manager, the in-memory store behind it and the event
//! log of every scope it creates.

use entiscope_core::persistence::PersistedObject;
use entiscope_core::{
    ClassId, EngineConfig, EntityId, EventLog, InMemoryStore, PropertyValue, RelationData,
    RelationEndPointId, RelationSide, Schema, ScopeManager,
};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;

/// `Customer { name }`
pub const CUSTOMER: ClassId = ClassId::new(1);
/// `Order { number }`
pub const ORDER: ClassId = ClassId::new(2);
/// `OrderItem { product }`
pub const ORDER_ITEM: ClassId = ClassId::new(3);
/// `Address { street }`
pub const ADDRESS: ClassId = ClassId::new(4);

/// Relation names of the sample schema.
pub mod relations {
    /// Order -> Customer (one)
    pub const ORDER_CUSTOMER: &str = "Order.customer";
    /// Customer -> Orders (many)
    pub const CUSTOMER_ORDERS: &str = "Customer.orders";
    /// Order -> OrderItems (many)
    pub const ORDER_ITEMS: &str = "Order.items";
    /// OrderItem -> Order (one)
    pub const ITEM_ORDER: &str = "OrderItem.order";
    /// Customer -> Address (one)
    pub const CUSTOMER_ADDRESS: &str = "Customer.address";
    /// Address -> Customer (one)
    pub const ADDRESS_CUSTOMER: &str = "Address.customer";
}

/// Builds the sample schema.
///
/// Three bidirectional relations: one-to-many `Order.customer` /
/// `Customer.orders`, one-to-many `Order.items` / `OrderItem.order`, and
/// one-to-one `Customer.address` / `Address.customer`.
pub fn order_schema() -> Schema {
    Schema::builder()
        .class(CUSTOMER, "Customer", [("name", PropertyValue::Null)])
        .class(ORDER, "Order", [("number", PropertyValue::Int(0))])
        .class(ORDER_ITEM, "OrderItem", [("product", PropertyValue::Null)])
        .class(ADDRESS, "Address", [("street", PropertyValue::Null)])
        .bidirectional(
            RelationSide::one(relations::ORDER_CUSTOMER, ORDER),
            RelationSide::many(relations::CUSTOMER_ORDERS, CUSTOMER),
        )
        .bidirectional(
            RelationSide::many(relations::ORDER_ITEMS, ORDER),
            RelationSide::one(relations::ITEM_ORDER, ORDER_ITEM),
        )
        .bidirectional(
            RelationSide::one(relations::CUSTOMER_ADDRESS, CUSTOMER),
            RelationSide::one(relations::ADDRESS_CUSTOMER, ADDRESS),
        )
        .build()
        .expect("sample schema is valid")
}

/// Store contents described in JSON.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeedData {
    /// Persisted objects.
    #[serde(default)]
    pub objects: Vec<PersistedObject>,
    /// Persisted relation data.
    #[serde(default)]
    pub relations: Vec<SeedRelation>,
}

/// One persisted end point.
#[derive(Debug, Clone, Deserialize)]
pub struct SeedRelation {
    /// The end point.
    pub end_point: RelationEndPointId,
    /// Its related data.
    pub data: RelationData,
}

/// A scope manager over a seeded in-memory store, with an event log.
pub struct TestEngine {
    /// The manager under test.
    pub manager: ScopeManager,
    /// The store behind the manager.
    pub store: Arc<InMemoryStore>,
    /// Events of every scope created through the manager.
    pub log: EventLog,
}

impl Default for TestEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TestEngine {
    /// Creates an engine over an empty store with the default configuration.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Creates an engine with a custom configuration.
    pub fn with_config(config: EngineConfig) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let recorder = config.recorder();
        let log = recorder.log();
        let mut manager =
            ScopeManager::with_config(Arc::new(order_schema()), Arc::clone(&store), config);
        manager.add_listener_factory(recorder);
        Self {
            manager,
            store,
            log,
        }
    }

    /// Seeds a customer; the identity is derived from the name.
    pub fn seed_customer(&self, name: &str) -> EntityId {
        let id = EntityId::named(CUSTOMER, name);
        self.store
            .insert(id, [("name".to_string(), PropertyValue::from(name))]);
        id
    }

    /// Seeds an order; the identity is derived from the number.
    pub fn seed_order(&self, number: i64) -> EntityId {
        let id = EntityId::named(ORDER, &number.to_string());
        self.store
            .insert(id, [("number".to_string(), PropertyValue::from(number))]);
        id
    }

    /// Seeds an order item; the identity is derived from the product.
    pub fn seed_item(&self, product: &str) -> EntityId {
        let id = EntityId::named(ORDER_ITEM, product);
        self.store
            .insert(id, [("product".to_string(), PropertyValue::from(product))]);
        id
    }

    /// Seeds an address; the identity is derived from the street.
    pub fn seed_address(&self, street: &str) -> EntityId {
        let id = EntityId::named(ADDRESS, street);
        self.store
            .insert(id, [("street".to_string(), PropertyValue::from(street))]);
        id
    }

    /// Seeds both sides of `Customer.orders`.
    pub fn seed_orders(&self, customer: EntityId, orders: &[EntityId]) {
        self.seed_one_to_many(
            customer,
            relations::CUSTOMER_ORDERS,
            relations::ORDER_CUSTOMER,
            orders,
        );
    }

    /// Seeds both sides of `Order.items`.
    pub fn seed_items(&self, order: EntityId, items: &[EntityId]) {
        self.seed_one_to_many(order, relations::ORDER_ITEMS, relations::ITEM_ORDER, items);
    }

    fn seed_one_to_many(&self, owner: EntityId, many: &str, one: &str, related: &[EntityId]) {
        self.store.seed_relation(
            RelationEndPointId::new(owner, many),
            RelationData::Many(related.to_vec()),
        );
        for id in related {
            self.store.seed_relation(
                RelationEndPointId::new(*id, one),
                RelationData::One(Some(owner)),
            );
        }
    }

    /// Seeds the store from parsed seed data.
    pub fn seed(&self, data: SeedData) {
        for object in data.objects {
            self.store.insert(object.id, object.properties);
        }
        for relation in data.relations {
            self.store.seed_relation(relation.end_point, relation.data);
        }
    }

    /// Seeds the store from a JSON seed file.
    pub fn seed_from_path(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        let text = std::fs::read_to_string(path)?;
        let data: SeedData = serde_json::from_str(&text)?;
        self.seed(data);
        Ok(())
    }
}

impl std::ops::Deref for TestEngine {
    type Target = ScopeManager;

    fn deref(&self) -> &Self::Target {
        &self.manager
    }
}

impl std::ops::DerefMut for TestEngine {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.manager
    }
}

/// Runs a test with a fresh engine.
///
/// # Example
///
/// ```rust
/// use entiscope_testkit::{with_engine, CUSTOMER};
///
/// with_engine(|engine| {
///     let root = engine.create_root();
///     let id = engine.new_object(root, CUSTOMER).unwrap();
///     assert!(engine.has_changes(root).unwrap());
///     # let _ = id;
/// });
/// ```
pub fn with_engine<F, R>(f: F) -> R
where
    F: FnOnce(&mut TestEngine) -> R,
{
    let mut engine = TestEngine::new();
    f(&mut engine)
}
