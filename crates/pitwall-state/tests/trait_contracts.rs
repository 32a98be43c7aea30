//! Contract tests for RecordStore.
//!
//! Every backend must pass the same checks; they run against the in-memory
//! fake and an in-memory SurrealDB.

use std::sync::Arc;

use pitwall_state::fakes::MemoryRecordStore;
use pitwall_state::{ExtractedDataRecord, RecordStore, SurrealRecordStore};
use serde_json::json;

async fn backends() -> Vec<(&'static str, Arc<dyn RecordStore>)> {
    vec![
        ("memory", Arc::new(MemoryRecordStore::new())),
        (
            "surreal",
            Arc::new(SurrealRecordStore::in_memory().await.unwrap()),
        ),
    ]
}

#[tokio::test]
async fn persist_is_idempotent_per_key() {
    for (name, store) in backends().await {
        let first = ExtractedDataRecord::new("img.jpg", "current_lap", json!({"lap_number": 41}));
        let second = ExtractedDataRecord::new("img.jpg", "current_lap", json!({"lap_number": 42}));
        store.persist(&first).await.unwrap();
        store.persist(&second).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 1, "{name}: duplicate row");
        let got = store.get("img.jpg", "current_lap").await.unwrap().unwrap();
        assert_eq!(got.value, json!({"lap_number": 42}), "{name}: last write wins");
    }
}

#[tokio::test]
async fn distinct_datatypes_are_distinct_rows() {
    for (name, store) in backends().await {
        store
            .persist(&ExtractedDataRecord::new(
                "img.jpg",
                "current_lap",
                json!({"lap_number": 3}),
            ))
            .await
            .unwrap();
        store
            .persist(&ExtractedDataRecord::new(
                "img.jpg",
                "tire_info",
                json!({"tire_info": [{"driver": "VER", "compound": "SOFT", "age": 4}]}),
            ))
            .await
            .unwrap();
        store
            .persist(&ExtractedDataRecord::new(
                "other.jpg",
                "current_lap",
                json!({"lap_number": 4}),
            ))
            .await
            .unwrap();

        let for_image = store.list_for_image("img.jpg").await.unwrap();
        let datatypes: Vec<&str> = for_image.iter().map(|r| r.datatype.as_str()).collect();
        assert_eq!(datatypes, vec!["current_lap", "tire_info"], "{name}");
        assert_eq!(store.count().await.unwrap(), 3, "{name}");
    }
}

#[tokio::test]
async fn get_missing_returns_none() {
    for (name, store) in backends().await {
        assert!(
            store.get("nope.jpg", "current_lap").await.unwrap().is_none(),
            "{name}"
        );
    }
}

#[tokio::test]
async fn list_recent_is_newest_first_and_limited() {
    for (name, store) in backends().await {
        for lap in 1..=3 {
            let mut record = ExtractedDataRecord::new(
                format!("frame_{lap}.jpg"),
                "current_lap",
                json!({"lap_number": lap}),
            );
            record.captured_at = chrono::DateTime::from_timestamp(1_700_000_000 + lap, 0).unwrap();
            store.persist(&record).await.unwrap();
        }

        let recent = store.list_recent(2).await.unwrap();
        let ids: Vec<&str> = recent.iter().map(|r| r.image_id.as_str()).collect();
        assert_eq!(ids, vec!["frame_3.jpg", "frame_2.jpg"], "{name}");
    }
}
