//! Relation behaviour across scopes and the store.

use entiscope_core::{
    CollectionChange, Completeness, EngineConfig, EventRecord, RelationData, RelationEndPointId,
    RelationModification,
};
use entiscope_testkit::prelude::*;

fn relation_events(records: &[EventRecord], kind: EventKind) -> Vec<(RelationEndPointId, RelationModification)> {
    records
        .iter()
        .filter(|r| r.kind == kind)
        .filter_map(|r| Some((r.end_point.clone()?, r.modification?)))
        .collect()
}

#[test]
fn completion_is_idempotent_per_scope() {
    let mut engine = TestEngine::new();
    let ada = engine.seed_customer("ada");
    let orders: Vec<_> = (1..=3).map(|n| engine.seed_order(n)).collect();
    engine.seed_orders(ada, &orders);
    let root = engine.create_root();

    assert_eq!(
        engine.end_point_state(root, ada, relations::CUSTOMER_ORDERS).unwrap(),
        Completeness::Unknown
    );
    engine.ensure_complete(root, ada, relations::CUSTOMER_ORDERS).unwrap();
    engine.ensure_complete(root, ada, relations::CUSTOMER_ORDERS).unwrap();
    assert_eq!(engine.related_ids(root, ada, relations::CUSTOMER_ORDERS).unwrap(), orders);
    assert_eq!(engine.store.relation_load_count(), 1);
    assert_eq!(
        engine.end_point_state(root, ada, relations::CUSTOMER_ORDERS).unwrap(),
        Completeness::Complete
    );
}

#[test]
fn sub_scope_completes_from_parent_without_store() {
    let mut engine = TestEngine::new();
    let ada = engine.seed_customer("ada");
    let order = engine.seed_order(1);
    engine.seed_orders(ada, &[order]);
    let root = engine.create_root();
    engine.ensure_complete(root, ada, relations::CUSTOMER_ORDERS).unwrap();
    let loads = engine.store.relation_load_count();

    let sub = engine.create_sub_scope(root).unwrap();
    assert_eq!(engine.related_ids(sub, ada, relations::CUSTOMER_ORDERS).unwrap(), vec![order]);
    assert_eq!(engine.store.relation_load_count(), loads);
}

#[test]
fn moving_an_order_updates_three_end_points() {
    let mut engine = TestEngine::new();
    let (ada, bob) = (engine.seed_customer("ada"), engine.seed_customer("bob"));
    let order = engine.seed_order(1);
    engine.seed_orders(ada, &[order]);
    engine.seed_orders(bob, &[]);
    let root = engine.create_root();
    engine.ensure_complete(root, ada, relations::CUSTOMER_ORDERS).unwrap();
    engine.ensure_complete(root, bob, relations::CUSTOMER_ORDERS).unwrap();

    engine
        .set_related(root, order, relations::ORDER_CUSTOMER, Some(bob))
        .unwrap();

    assert!(engine.related_ids(root, ada, relations::CUSTOMER_ORDERS).unwrap().is_empty());
    assert_eq!(engine.related_ids(root, bob, relations::CUSTOMER_ORDERS).unwrap(), vec![order]);
    let mut changed = engine.changed_objects(root).unwrap();
    changed.sort();
    let mut expected = vec![ada, bob, order];
    expected.sort();
    assert_eq!(changed, expected);
}

#[test]
fn clear_unlinks_every_order_last_first() {
    let mut engine = TestEngine::new();
    let ada = engine.seed_customer("ada");
    let orders: Vec<_> = (1..=3).map(|n| engine.seed_order(n)).collect();
    engine.seed_orders(ada, &orders);
    let root = engine.create_root();
    engine.ensure_complete(root, ada, relations::CUSTOMER_ORDERS).unwrap();
    engine.log.clear();

    engine.clear_related(root, ada, relations::CUSTOMER_ORDERS).unwrap();

    let changing = relation_events(&engine.log.snapshot(), EventKind::RelationChanging);
    let collection: Vec<_> = changing
        .iter()
        .filter(|(ep, _)| ep.object == ada)
        .map(|(_, m)| *m)
        .collect();
    assert_eq!(
        collection,
        vec![
            RelationModification::Collection(CollectionChange::remove(orders[2], Some(2))),
            RelationModification::Collection(CollectionChange::remove(orders[1], Some(1))),
            RelationModification::Collection(CollectionChange::remove(orders[0], Some(0))),
        ]
    );
    let back: Vec<_> = changing
        .iter()
        .filter(|(ep, _)| ep.object != ada)
        .map(|(ep, _)| ep.object)
        .collect();
    assert_eq!(back, vec![orders[2], orders[1], orders[0]]);

    for order in orders {
        assert_eq!(
            engine.related_object(root, order, relations::ORDER_CUSTOMER).unwrap(),
            None
        );
    }
}

#[test]
fn replacing_with_same_object_fires_nothing() {
    let mut engine = TestEngine::new();
    let ada = engine.seed_customer("ada");
    let order = engine.seed_order(1);
    engine.seed_orders(ada, &[order]);
    let root = engine.create_root();
    engine.ensure_complete(root, ada, relations::CUSTOMER_ORDERS).unwrap();
    engine.log.clear();

    engine
        .replace_related(root, ada, relations::CUSTOMER_ORDERS, 0, order)
        .unwrap();
    assert!(engine.log.is_empty());
    assert!(!engine.has_changes(root).unwrap());
}

#[test]
fn incomplete_collection_rejects_positional_edits() {
    let mut engine = TestEngine::new();
    let ada = engine.seed_customer("ada");
    let order = engine.seed_order(1);
    let root = engine.create_root();

    let err = engine
        .insert_related(root, ada, relations::CUSTOMER_ORDERS, 0, order)
        .unwrap_err();
    assert!(matches!(err, CoreError::IncompleteEndPointViolation { .. }));
    let err = engine
        .add_related(root, ada, relations::CUSTOMER_ORDERS, order)
        .unwrap_err();
    assert!(matches!(err, CoreError::IncompleteEndPointViolation { .. }));
    assert_eq!(
        engine.end_point_state(root, ada, relations::CUSTOMER_ORDERS).unwrap(),
        Completeness::Unknown
    );
}

#[test]
fn pending_append_survives_commit_to_store() {
    let mut engine = TestEngine::new();
    let ada = engine.seed_customer("ada");
    let old = engine.seed_order(1);
    engine.seed_orders(ada, &[old]);
    let root = engine.create_root();

    let fresh = engine.new_object(root, ORDER).unwrap();
    engine.add_related(root, ada, relations::CUSTOMER_ORDERS, fresh).unwrap();
    assert_eq!(
        engine.end_point_state(root, ada, relations::CUSTOMER_ORDERS).unwrap(),
        Completeness::Unknown
    );
    assert_eq!(
        engine.related_object(root, fresh, relations::ORDER_CUSTOMER).unwrap(),
        Some(ada)
    );

    assert_eq!(
        engine.related_ids(root, ada, relations::CUSTOMER_ORDERS).unwrap(),
        vec![old, fresh]
    );
    engine.commit(root).unwrap();
    assert!(engine.store.get(fresh).is_some());
}

#[test]
fn opposite_collections_stay_lazy_when_configured() {
    let config = EngineConfig::new().complete_opposite_end_points(false);
    let mut engine = TestEngine::with_config(config);
    let ada = engine.seed_customer("ada");
    let old = engine.seed_order(1);
    engine.seed_orders(ada, &[old]);
    let order = engine.seed_order(2);
    let root = engine.create_root();

    engine
        .set_related(root, order, relations::ORDER_CUSTOMER, Some(ada))
        .unwrap();
    assert_eq!(
        engine.end_point_state(root, ada, relations::CUSTOMER_ORDERS).unwrap(),
        Completeness::Unknown
    );
    assert_eq!(
        engine.related_ids(root, ada, relations::CUSTOMER_ORDERS).unwrap(),
        vec![old, order]
    );
}

fn lazy_engine_with_one_order() -> (TestEngine, EntityId, EntityId) {
    let config = EngineConfig::new().complete_opposite_end_points(false);
    let mut engine = TestEngine::with_config(config);
    let ada = engine.seed_customer("ada");
    let order = engine.seed_order(1);
    engine.seed_orders(ada, &[order]);
    (engine, ada, order)
}

#[test]
fn lazy_sub_scope_delete_leaves_no_dangling_order() {
    let (mut engine, ada, order) = lazy_engine_with_one_order();
    let root = engine.create_root();
    assert_eq!(
        engine.related_ids(root, ada, relations::CUSTOMER_ORDERS).unwrap(),
        vec![order]
    );

    let sub = engine.create_sub_scope(root).unwrap();
    engine.delete_object(sub, order).unwrap();
    engine.commit(sub).unwrap();
    engine.discard(sub).unwrap();
    assert!(engine
        .related_ids(root, ada, relations::CUSTOMER_ORDERS)
        .unwrap()
        .is_empty());

    engine.commit(root).unwrap();
    assert_eq!(
        engine
            .store
            .relation(&RelationEndPointId::new(ada, relations::CUSTOMER_ORDERS)),
        Some(RelationData::Many(Vec::new()))
    );
}

#[test]
fn lazy_sub_scope_unlink_reaches_parent_collection() {
    let (mut engine, ada, order) = lazy_engine_with_one_order();
    let root = engine.create_root();
    engine.ensure_complete(root, ada, relations::CUSTOMER_ORDERS).unwrap();

    let sub = engine.create_sub_scope(root).unwrap();
    engine
        .set_related(sub, order, relations::ORDER_CUSTOMER, None)
        .unwrap();
    engine.commit(sub).unwrap();
    engine.discard(sub).unwrap();

    assert_eq!(
        engine.related_object(root, order, relations::ORDER_CUSTOMER).unwrap(),
        None
    );
    assert!(engine
        .related_ids(root, ada, relations::CUSTOMER_ORDERS)
        .unwrap()
        .is_empty());
}

#[test]
fn parent_completed_after_child_edit_is_reconciled_on_commit() {
    let (mut engine, ada, order) = lazy_engine_with_one_order();
    let bob = engine.seed_customer("bob");
    let root = engine.create_root();
    engine.ensure_complete(root, bob, relations::CUSTOMER_ORDERS).unwrap();

    let sub = engine.create_sub_scope(root).unwrap();
    engine
        .set_related(sub, order, relations::ORDER_CUSTOMER, Some(bob))
        .unwrap();
    assert_eq!(
        engine.end_point_state(sub, ada, relations::CUSTOMER_ORDERS).unwrap(),
        Completeness::Unknown
    );
    assert_eq!(
        engine.related_ids(root, ada, relations::CUSTOMER_ORDERS).unwrap(),
        vec![order]
    );

    engine.commit(sub).unwrap();
    engine.discard(sub).unwrap();
    assert!(engine
        .related_ids(root, ada, relations::CUSTOMER_ORDERS)
        .unwrap()
        .is_empty());
    assert_eq!(
        engine.related_ids(root, bob, relations::CUSTOMER_ORDERS).unwrap(),
        vec![order]
    );
}

#[test]
fn opposite_collections_complete_eagerly_by_default() {
    let mut engine = TestEngine::new();
    let ada = engine.seed_customer("ada");
    let order = engine.seed_order(2);
    let root = engine.create_root();

    engine
        .set_related(root, order, relations::ORDER_CUSTOMER, Some(ada))
        .unwrap();
    assert_eq!(
        engine.end_point_state(root, ada, relations::CUSTOMER_ORDERS).unwrap(),
        Completeness::Complete
    );
    assert_eq!(engine.related_ids(root, ada, relations::CUSTOMER_ORDERS).unwrap(), vec![order]);
}

#[test]
fn deleting_an_order_detaches_items_and_customer() {
    let mut engine = TestEngine::new();
    let ada = engine.seed_customer("ada");
    let order = engine.seed_order(1);
    let items = [engine.seed_item("tea"), engine.seed_item("cake")];
    engine.seed_orders(ada, &[order]);
    engine.seed_items(order, &items);
    let root = engine.create_root();

    engine.delete_object(root, order).unwrap();
    assert!(engine.related_ids(root, ada, relations::CUSTOMER_ORDERS).unwrap().is_empty());
    for item in items {
        assert_eq!(engine.related_object(root, item, relations::ITEM_ORDER).unwrap(), None);
    }

    engine.commit(root).unwrap();
    assert!(engine.store.get(order).is_none());
    assert_eq!(
        engine.store.relation(&RelationEndPointId::new(items[0], relations::ITEM_ORDER)),
        Some(entiscope_core::RelationData::One(None))
    );
}

#[test]
fn one_to_one_moves_through_sub_scope() {
    let mut engine = TestEngine::new();
    let (ada, bob) = (engine.seed_customer("ada"), engine.seed_customer("bob"));
    let home = engine.seed_address("1 Main St");
    let root = engine.create_root();
    engine
        .set_related(root, ada, relations::CUSTOMER_ADDRESS, Some(home))
        .unwrap();

    let sub = engine.create_sub_scope(root).unwrap();
    engine
        .set_related(sub, bob, relations::CUSTOMER_ADDRESS, Some(home))
        .unwrap();
    assert_eq!(engine.related_object(sub, ada, relations::CUSTOMER_ADDRESS).unwrap(), None);
    engine.commit(sub).unwrap();
    engine.discard(sub).unwrap();

    assert_eq!(engine.related_object(root, ada, relations::CUSTOMER_ADDRESS).unwrap(), None);
    assert_eq!(
        engine.related_object(root, home, relations::ADDRESS_CUSTOMER).unwrap(),
        Some(bob)
    );
}

#[test]
fn event_kinds_serialize_in_snake_case() {
    let json = serde_json::to_string(&EventKind::SubTransactionCreated).unwrap();
    assert_eq!(json, "\"sub_transaction_created\"");
    assert_eq!(EventKind::RelationChanging.as_str(), "relation_changing");
}
