use serde_json::json;

use super::*;
use crate::test_helpers::{item_record, seat, table, test_store};

// =============================================================
// Ids and kinds
// =============================================================

#[test]
fn negative_ids_are_provisional() {
    assert!(EntityId(-1).is_provisional());
    assert!(!EntityId(42).is_provisional());
    assert_eq!(EntityId::parse("-7"), Some(EntityId(-7)));
    assert_eq!(EntityId::parse("seven"), None);
}

#[test]
fn kinds_map_to_collections() {
    assert_eq!(EntityKind::Item.collection(), "items");
    assert_eq!(EntityKind::Seat.collection(), "seats");
    assert_eq!(EntityKind::Guest.collection(), "guests");
    assert_eq!(EntityKind::Guest.to_string(), "guest");
}

// =============================================================
// Item shape
// =============================================================

#[test]
fn item_serializes_flat_with_kind_tag() {
    let mut item = table(10.0, 20.0);
    item.id = EntityId(3);
    let value = serde_json::to_value(&item).unwrap();
    assert_eq!(value["x"], json!(10.0));
    assert_eq!(value["kind"], json!("table"));
    assert_eq!(value["shape"], json!("round"));
    assert_eq!(value["id"], json!(3));
}

#[test]
fn text_item_defaults_font_size() {
    let body: ItemBody = serde_json::from_value(json!({"kind": "text", "text": "Welcome"})).unwrap();
    assert_eq!(body, ItemBody::Text { text: "Welcome".into(), font_size: 14.0 });
    assert_eq!(body.seat_capacity(), 0);
}

// =============================================================
// Wire conversion
// =============================================================

#[test]
fn from_wire_renames_updated_at() {
    let item: Item = from_wire(&item_record(7, 100.0, 5_000)).unwrap();
    assert_eq!(item.id, EntityId(7));
    assert_eq!(item.geometry.x, 100.0);
    assert_eq!(item.last_update, 5_000);
    assert_eq!(item.body.seat_capacity(), 8);
}

#[test]
fn from_wire_rejects_records_that_do_not_fit() {
    let err = from_wire::<Item>(&json!({"id": 1, "x": "left"})).unwrap_err();
    assert!(matches!(err, SyncError::Shape { kind: EntityKind::Item, .. }));
}

#[test]
fn to_wire_strips_local_fields() {
    let (store, _) = test_store(0);
    let mut item = table(1.0, 2.0);
    item.id = EntityId(-1);
    item.last_update = 99;

    let fields = to_wire(&item, &store).unwrap();
    assert!(!fields.contains_key("id"));
    assert!(!fields.contains_key(LAST_UPDATE));
    assert_eq!(fields["y"], json!(2.0));
}

#[test]
fn seat_refs_translate_to_confirmed_ids() {
    let (mut store, _) = test_store(0);
    let table_id = store.add(table(0.0, 0.0));
    store.confirm::<Item>(table_id, EntityId(42));

    let fields = to_wire(&seat(table_id, 0), &store).unwrap();
    assert_eq!(fields["table_id"], json!(42));
    assert_eq!(fields["guest_id"], Value::Null);
}

#[test]
fn unconfirmed_seat_ref_is_a_missing_mapping() {
    let (mut store, _) = test_store(0);
    let table_id = store.add(table(0.0, 0.0));

    let err = to_wire(&seat(table_id, 0), &store).unwrap_err();
    assert!(matches!(err, SyncError::MissingMapping { kind: EntityKind::Item, id } if id == table_id));
}

#[test]
fn partial_to_wire_translates_guest_ref_and_renders_absent_as_null() {
    let (mut store, _) = test_store(0);
    let guest_id = store.add(Guest::draft("Ada"));
    store.confirm::<Guest>(guest_id, EntityId(11));

    let mut partial = Delta::new();
    partial.insert("guest_id", crate::diff::Change::Set(json!(guest_id.0)));
    partial.insert("seat_index", crate::diff::Change::Absent);

    let fields = partial_to_wire::<Seat>(&partial, &store).unwrap();
    assert_eq!(fields["guest_id"], json!(11));
    assert_eq!(fields["seat_index"], Value::Null);
}

#[test]
fn record_accessors_tolerate_missing_fields() {
    assert_eq!(record_id(&json!({"id": 5})), Some(EntityId(5)));
    assert_eq!(record_id(&json!({"name": "x"})), None);
    assert_eq!(record_updated_at(&json!({"updated_at": 12})), 12);
    assert_eq!(record_updated_at(&json!({})), 0);
}
