//! Shared fixtures for scope tests.

use crate::config::EngineConfig;
use crate::entity::{EntityId, PropertyValue};
use crate::listener::EventLog;
use crate::persistence::{InMemoryStore, RelationData};
use crate::relation::RelationEndPointId;
use crate::schema::{RelationSide, Schema};
use crate::scope::ScopeManager;
use crate::types::ClassId;
use std::sync::Arc;

pub(crate) const CUSTOMER: ClassId = ClassId::new(1);
pub(crate) const ORDER: ClassId = ClassId::new(2);
pub(crate) const ITEM: ClassId = ClassId::new(3);
pub(crate) const ADDRESS: ClassId = ClassId::new(4);

pub(crate) fn schema() -> Schema {
    Schema::builder()
        .class(CUSTOMER, "Customer", [("name", PropertyValue::Null)])
        .class(ORDER, "Order", [("number", PropertyValue::Int(0))])
        .class(ITEM, "OrderItem", [("product", PropertyValue::Null)])
        .class(ADDRESS, "Address", [("street", PropertyValue::Null)])
        .bidirectional(
            RelationSide::one("Order.customer", ORDER),
            RelationSide::many("Customer.orders", CUSTOMER),
        )
        .bidirectional(
            RelationSide::many("Order.items", ORDER),
            RelationSide::one("OrderItem.order", ITEM),
        )
        .bidirectional(
            RelationSide::one("Customer.address", CUSTOMER),
            RelationSide::one("Address.customer", ADDRESS),
        )
        .build()
        .unwrap()
}

pub(crate) struct Fixture {
    pub manager: ScopeManager,
    pub store: Arc<InMemoryStore>,
    pub log: EventLog,
}

pub(crate) fn fixture() -> Fixture {
    fixture_with(EngineConfig::default())
}

pub(crate) fn fixture_with(config: EngineConfig) -> Fixture {
    let store = Arc::new(InMemoryStore::new());
    let recorder = config.recorder();
    let log = recorder.log();
    let mut manager = ScopeManager::with_config(Arc::new(schema()), Arc::clone(&store), config);
    manager.add_listener_factory(recorder);
    Fixture {
        manager,
        store,
        log,
    }
}

pub(crate) fn seed_customer(store: &InMemoryStore, name: &str) -> EntityId {
    let id = EntityId::named(CUSTOMER, name);
    store.insert(id, [("name".to_string(), PropertyValue::from(name))]);
    id
}

pub(crate) fn seed_order(store: &InMemoryStore, number: i64) -> EntityId {
    let id = EntityId::named(ORDER, &number.to_string());
    store.insert(id, [("number".to_string(), PropertyValue::from(number))]);
    id
}

/// Seeds both sides of `customer.orders`.
pub(crate) fn seed_orders(store: &InMemoryStore, customer: EntityId, orders: &[EntityId]) {
    store.seed_relation(
        RelationEndPointId::new(customer, "Customer.orders"),
        RelationData::Many(orders.to_vec()),
    );
    for order in orders {
        store.seed_relation(
            RelationEndPointId::new(*order, "Order.customer"),
            RelationData::One(Some(customer)),
        );
    }
}
