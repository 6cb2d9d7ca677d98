use crate::engine::SqliteHistoryStore;
use crate::memory::MemoryHistoryStore;
use crate::HistoryStore;
use chrono::{Duration, Utc};
use driftwatch_common::snapshot::Snapshot;
use driftwatch_common::types::{HistoryRecord, RuleState, SeriesPoint, Signature};
use serde_json::json;
use tempfile::TempDir;

fn setup() -> (TempDir, SqliteHistoryStore) {
    let dir = TempDir::new().unwrap();
    let store = SqliteHistoryStore::new(dir.path()).unwrap();
    (dir, store)
}

fn make_record(entity_id: &str, price: f64) -> HistoryRecord {
    let snapshot = Snapshot::from_json(
        json!({
            "price": price,
            "in_stock": true,
            "title": "Laptop X1",
            "sections": {"Specs": "16GB", "Shipping": "2 days"}
        }),
        Utc::now(),
    )
    .unwrap();
    let mut record = HistoryRecord::first(entity_id, snapshot);
    record.push_point(
        "price",
        SeriesPoint {
            value: price,
            captured_at: Utc::now() - Duration::minutes(5),
        },
        100,
    );
    record.rule_states.insert(
        "price-move".to_string(),
        RuleState {
            satisfied: Some(true),
            last_signature: Some(Signature::Numeric(vec![100.0, price])),
            last_fired_at: Some(Utc::now()),
            fire_count: 2,
        },
    );
    record
}

#[test]
fn load_missing_entity_returns_none() {
    let (_dir, store) = setup();
    assert!(store.load("nonexistent").unwrap().is_none());
}

#[test]
fn save_and_load_round_trip() {
    let (_dir, store) = setup();
    let record = make_record("laptop-x1", 320.0);
    store.save(&record).unwrap();

    let loaded = store.load("laptop-x1").unwrap().unwrap();
    assert_eq!(loaded.snapshot_hash, record.snapshot_hash);
    assert_eq!(loaded.snapshot.content_hash(), record.snapshot.content_hash());
    assert_eq!(loaded.rule_states, record.rule_states);
    assert_eq!(loaded.series("price").map(|s| s.len()), Some(1));
    assert_eq!(
        loaded.first_seen_at.timestamp_millis(),
        record.first_seen_at.timestamp_millis()
    );
}

#[test]
fn save_replaces_existing_record() {
    let (_dir, store) = setup();
    store.save(&make_record("laptop-x1", 320.0)).unwrap();
    store.save(&make_record("laptop-x1", 299.0)).unwrap();

    let loaded = store.load("laptop-x1").unwrap().unwrap();
    assert_eq!(loaded.snapshot.number("price"), Some(299.0));
    assert_eq!(store.entity_ids().unwrap(), vec!["laptop-x1"]);
}

#[test]
fn history_survives_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let store = SqliteHistoryStore::new(dir.path()).unwrap();
        store.save(&make_record("laptop-x1", 320.0)).unwrap();
    }

    let reopened = SqliteHistoryStore::new(dir.path()).unwrap();
    let loaded = reopened.load("laptop-x1").unwrap().unwrap();
    assert_eq!(loaded.snapshot.number("price"), Some(320.0));
    assert_eq!(loaded.rule_states["price-move"].fire_count, 2);
}

#[test]
fn remove_deletes_only_target() {
    let (_dir, store) = setup();
    store.save(&make_record("a", 1.0)).unwrap();
    store.save(&make_record("b", 2.0)).unwrap();

    assert!(store.remove("a").unwrap());
    assert!(!store.remove("a").unwrap());
    assert!(store.load("a").unwrap().is_none());
    assert_eq!(store.entity_ids().unwrap(), vec!["b"]);
}

#[test]
fn series_cap_is_preserved_through_storage() {
    let (_dir, store) = setup();
    let mut record = make_record("laptop-x1", 100.0);
    for i in 0..10 {
        record.push_point(
            "price",
            SeriesPoint {
                value: 100.0 - i as f64,
                captured_at: Utc::now(),
            },
            4,
        );
    }
    store.save(&record).unwrap();

    let loaded = store.load("laptop-x1").unwrap().unwrap();
    let values: Vec<f64> = loaded.series("price").unwrap().iter().map(|p| p.value).collect();
    assert_eq!(values, vec![94.0, 93.0, 92.0, 91.0]);
}

#[test]
fn memory_store_behaves_like_sqlite() {
    let store = MemoryHistoryStore::new();
    assert!(store.load("laptop-x1").unwrap().is_none());
    store.save(&make_record("laptop-x1", 320.0)).unwrap();
    store.save(&make_record("desk", 80.0)).unwrap();
    assert_eq!(store.entity_ids().unwrap(), vec!["desk", "laptop-x1"]);
    assert!(store.remove("desk").unwrap());
    assert_eq!(
        store.load("laptop-x1").unwrap().unwrap().snapshot.number("price"),
        Some(320.0)
    );
}
