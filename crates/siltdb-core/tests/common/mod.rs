// Shared by several integration-test binaries; not every binary uses every
// helper.
#![allow(dead_code)]

use siltdb_core::{
    clock::ManualClock,
    direction::Direction,
    engine::Engine,
    model::{Attribute, AttributeKind, Record, RecordModel},
    store::{MemoryStore, Store},
};
use std::sync::Arc;

pub const KIND: &str = "submission";

pub struct Harness {
    pub engine: Engine,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub model: RecordModel,
}

/// Engine over a fresh in-memory store with a controllable clock. The
/// slow-query policy is warmed with one throwaway execution so tests that
/// count fetch calls or inject faults see only their own traffic.
pub fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::starting_at(1_000_000));
    let engine = Engine::with_clock(store.clone(), clock.clone());
    let model = submission_model();

    let _ = engine
        .query(&model, "warmup")
        .sort("age", Direction::Asc)
        .unwrap()
        .execute(None, 1)
        .unwrap();

    Harness {
        engine,
        store,
        clock,
        model,
    }
}

pub fn submission_model() -> RecordModel {
    RecordModel::new(
        KIND,
        vec![
            Attribute::new("age", AttributeKind::Int),
            Attribute::new("name", AttributeKind::Text),
            Attribute::new("city", AttributeKind::Text),
            Attribute::new(
                "score",
                AttributeKind::Decimal {
                    scale: 2,
                    precision: 10,
                },
            ),
            Attribute::new("note", AttributeKind::LongText),
        ],
    )
}

/// The canonical age fixture: [5, 10, 15, 15, 20] with keys in tie-break
/// order.
pub fn seed_ages(harness: &Harness) {
    for (key, age) in [
        ("uuid:a", 5i64),
        ("uuid:b", 10),
        ("uuid:c", 15),
        ("uuid:d", 15),
        ("uuid:e", 20),
    ] {
        harness
            .store
            .put(KIND, Record::new(key).with("age", age))
            .unwrap();
    }
}

pub fn keys_of(records: &[Record]) -> Vec<&str> {
    records.iter().map(|r| r.key().as_str()).collect()
}
