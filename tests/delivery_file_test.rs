use anyhow::Result;
use geo_ingest::delivery::QueueEvent;
use geo_ingest::generator::generate_delivery;
use geo_ingest::storage::InMemoryEventStore;
use geo_ingest::{DeliveryError, IngestConfig, Orchestrator, RawDelivery};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fs;
use std::sync::Arc;
use tempfile::tempdir;

#[tokio::test]
async fn generated_delivery_file_is_fully_persisted() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("delivery.json");

    let event = generate_delivery(StdRng::seed_from_u64(1), 1203);
    fs::write(&path, serde_json::to_vec(&event)?)?;

    let document = fs::read(&path)?;
    let delivery = RawDelivery::from_queue_event(&document)?;

    let store = InMemoryEventStore::new();
    let settings = IngestConfig::default().settings()?;
    let outcome = Orchestrator::new(Arc::new(store.clone()), settings)
        .with_queue("http://localhost:4566/000000000000/my-queue")
        .ingest(delivery)
        .await?;

    assert_eq!(outcome.persisted, 1203);
    assert_eq!(outcome.rejected, 0);
    assert_eq!(store.committed_batches(), vec![500, 500, 203]);
    Ok(())
}

#[tokio::test]
async fn queue_event_with_inline_and_bad_bodies() -> Result<()> {
    let document = r#"{
        "Records": [
            {"messageId": "1", "body": "{\"region\": \"Prague\", \"origin_coord\": \"POINT (14.4973794438195 50.00136875782316)\", \"destination_coord\": \"POINT (14.43109483523328 50.04052930943246)\", \"datetime\": \"2018-05-28 09:03:40\", \"datasource\": \"funny_car\"}"},
            {"messageId": "2", "body": {"region": "Turin", "origin_coord": "POINT (7.672837913286881 44.9957109242058)", "destination_coord": "POINT (7.720368637535126 45.06782385393849)", "datetime": "2018-05-21 02:54:04", "datasource": "baba_car"}},
            {"messageId": "3", "body": "{\"region\": \"Prague\"}"},
            {"messageId": "4"}
        ]
    }"#;

    let store = InMemoryEventStore::new();
    let settings = IngestConfig::default().settings()?;
    let outcome = Orchestrator::new(Arc::new(store.clone()), settings)
        .ingest(RawDelivery::from_queue_event(document.as_bytes())?)
        .await?;

    assert_eq!(outcome.decoded, 2);
    assert_eq!(outcome.persisted, 2);
    assert_eq!(outcome.rejected, 2);
    let positions: Vec<usize> = outcome.rejections.iter().map(|r| r.position).collect();
    assert_eq!(positions, vec![2, 3]);
    assert!(outcome.rejections[0].reason.contains("origin_coord"));

    let serialized = serde_json::to_value(&outcome)?;
    assert_eq!(serialized["stage"]["state"], "completed");
    assert_eq!(serialized["persisted"], 2);
    Ok(())
}

#[test]
fn unreadable_document_is_a_delivery_error() {
    let err = RawDelivery::from_queue_event(b"{\"Records\": 5}").unwrap_err();
    assert!(matches!(err, DeliveryError::MalformedDelivery(_)));
}

#[test]
fn empty_queue_event_round_trips() -> Result<()> {
    let document = serde_json::to_vec(&QueueEvent::default())?;
    assert!(RawDelivery::from_queue_event(&document)?.is_empty());
    Ok(())
}
