use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use super::decoder::decode;
use super::partition::{batch_count, partition};
use super::validator::validate;
use crate::config::IngestSettings;
use crate::delivery::RawDelivery;
use crate::error::{DeliveryError, RecordError, WriteError};
use crate::metrics;
use crate::storage::EventStore;
use crate::types::{ValidatedRecord, WriteBatch};

/// Where a delivery is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DeliveryStage {
    Received,
    Decoding,
    Partitioning,
    /// One-based batch number out of the batches formed.
    Writing { batch: usize, of: usize },
    Completed,
    Failed,
}

/// A record kept out of every batch, by position in the delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordRejection {
    pub position: usize,
    pub reason: String,
}

/// A batch that was rolled back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchFailure {
    pub batch_index: usize,
    pub error: String,
}

/// What happened to one delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestionOutcome {
    pub stage: DeliveryStage,
    pub decoded: usize,
    pub rejected: usize,
    pub persisted: usize,
    pub batches: usize,
    pub batch_failures: Vec<BatchFailure>,
    pub rejections: Vec<RecordRejection>,
}

impl Default for IngestionOutcome {
    fn default() -> Self {
        Self {
            stage: DeliveryStage::Received,
            decoded: 0,
            rejected: 0,
            persisted: 0,
            batches: 0,
            batch_failures: Vec::new(),
            rejections: Vec::new(),
        }
    }
}

impl IngestionOutcome {
    /// Every batch committed. Rejected records do not count against it.
    pub fn all_batches_committed(&self) -> bool {
        self.batch_failures.is_empty()
    }

    fn reject(&mut self, position: usize, error: RecordError) {
        warn!(position, reason = %error, "rejected record");
        self.rejected += 1;
        self.rejections.push(RecordRejection {
            position,
            reason: error.to_string(),
        });
    }

    fn fail_batch(&mut self, batch: &WriteBatch, error: &WriteError) {
        warn!(batch = batch.index(), rows = batch.len(), error = %error, "batch rolled back");
        for record in batch.records() {
            debug!(batch = batch.index(), record_key = %record.record_key(), "record not persisted");
        }
        self.batch_failures.push(BatchFailure {
            batch_index: batch.index(),
            error: error.to_string(),
        });
    }

    fn enter(&mut self, stage: DeliveryStage) {
        debug!(from = ?self.stage, to = ?stage, "delivery stage");
        self.stage = stage;
    }
}

/// Drives one delivery through decode, validate, partition and write.
///
/// Batches go out one at a time over a single session, each bounded by the
/// configured timeout. A failed batch is recorded and the next one is
/// attempted; nothing is retried here.
pub struct Orchestrator {
    store: Arc<dyn EventStore>,
    settings: IngestSettings,
    queue: Option<String>,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn EventStore>, settings: IngestSettings) -> Self {
        Self {
            store,
            settings,
            queue: None,
        }
    }

    /// Name the queue deliveries come from, for the delivery span.
    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn settings(&self) -> IngestSettings {
        self.settings
    }

    #[instrument(
        skip(self, delivery),
        fields(delivery_id = %delivery.id(), records = delivery.len(), queue = self.queue.as_deref().unwrap_or("-"))
    )]
    pub async fn ingest(&self, delivery: RawDelivery) -> Result<IngestionOutcome, DeliveryError> {
        let mut outcome = IngestionOutcome::default();
        info!("📥 Received delivery with {} records", delivery.len());

        outcome.enter(DeliveryStage::Decoding);
        let accepted = Self::decode_all(&delivery, &mut outcome);
        drop(delivery);

        outcome.enter(DeliveryStage::Partitioning);
        let expected = batch_count(accepted.len(), self.settings.batch_size);
        outcome.batches = expected;
        if expected == 0 {
            outcome.enter(DeliveryStage::Completed);
            info!(rejected = outcome.rejected, "✅ Nothing to write");
            metrics::record_outcome(&outcome);
            return Ok(outcome);
        }

        let mut writer = match timeout(self.settings.timeout, self.store.acquire()).await {
            Ok(Ok(writer)) => writer,
            Ok(Err(e)) => return Err(Self::fail(outcome, e)),
            Err(_) => return Err(Self::fail(outcome, WriteError::Timeout(self.settings.timeout))),
        };

        for batch in partition(accepted, self.settings.batch_size) {
            outcome.enter(DeliveryStage::Writing {
                batch: batch.index() + 1,
                of: expected,
            });
            let started = Instant::now();
            let written = timeout(self.settings.timeout, writer.write_batch(&batch))
                .await
                .unwrap_or_else(|_| Err(WriteError::Timeout(self.settings.timeout)));
            match written {
                Ok(rows) => {
                    metrics::record_batch_write(started.elapsed(), true);
                    debug!(batch = batch.index(), rows, "batch committed");
                    outcome.persisted += rows as usize;
                }
                Err(e) => {
                    metrics::record_batch_write(started.elapsed(), false);
                    outcome.fail_batch(&batch, &e);
                }
            }
        }
        drop(writer);

        outcome.enter(DeliveryStage::Completed);
        if outcome.all_batches_committed() {
            info!(
                "✅ Persisted {} records in {} batches ({} rejected)",
                outcome.persisted, outcome.batches, outcome.rejected
            );
        } else {
            warn!(
                "⚠️ Persisted {} records, {} of {} batches rolled back ({} rejected)",
                outcome.persisted,
                outcome.batch_failures.len(),
                outcome.batches,
                outcome.rejected
            );
        }
        metrics::record_outcome(&outcome);
        Ok(outcome)
    }

    /// Decode and validate every payload on its own; failures are counted, not raised.
    fn decode_all(delivery: &RawDelivery, outcome: &mut IngestionOutcome) -> Vec<ValidatedRecord> {
        let mut accepted = Vec::with_capacity(delivery.len());
        for (position, payload) in delivery.payloads().enumerate() {
            let decoded = match decode(payload) {
                Ok(decoded) => decoded,
                Err(e) => {
                    outcome.reject(position, e.into());
                    continue;
                }
            };
            outcome.decoded += 1;
            match validate(decoded) {
                Ok(record) => accepted.push(record),
                Err(e) => outcome.reject(position, e.into()),
            }
        }
        debug!(
            decoded = outcome.decoded,
            accepted = accepted.len(),
            rejected = outcome.rejected,
            "decoding finished"
        );
        accepted
    }

    fn fail(mut outcome: IngestionOutcome, error: WriteError) -> DeliveryError {
        outcome.enter(DeliveryStage::Failed);
        warn!(
            error = %error,
            decoded = outcome.decoded,
            rejected = outcome.rejected,
            "❌ Could not open a storage session, delivery left for redelivery"
        );
        metrics::record_outcome(&outcome);
        DeliveryError::StoreUnavailable {
            error,
            outcome: Box::new(outcome),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{BatchWriter, InMemoryEventStore};
    use async_trait::async_trait;
    use serde_json::json;
    use std::num::NonZeroUsize;
    use std::time::Duration;

    fn payload(region: &str) -> Vec<u8> {
        json!({
            "region": region,
            "origin_coord": "POINT (14.4 50.1)",
            "destination_coord": "POINT (14.5 50.0)",
            "datetime": "2018-05-28T09:03:40",
            "datasource": "cheap_mobile"
        })
        .to_string()
        .into_bytes()
    }

    fn orchestrator(store: InMemoryEventStore, batch_size: usize) -> Orchestrator {
        Orchestrator::new(
            Arc::new(store),
            IngestSettings {
                batch_size: NonZeroUsize::new(batch_size).unwrap(),
                timeout: Duration::from_secs(5),
            },
        )
    }

    #[tokio::test]
    async fn rejected_record_is_reported_with_its_position() {
        let store = InMemoryEventStore::new();
        let payloads = vec![payload("A"), payload("B"), payload(""), payload("D"), payload("E")];

        let outcome = orchestrator(store.clone(), 500)
            .ingest(RawDelivery::new(payloads))
            .await
            .unwrap();

        assert_eq!(outcome.decoded, 5);
        assert_eq!(outcome.rejected, 1);
        assert_eq!(outcome.persisted, 4);
        assert_eq!(outcome.rejections[0].position, 2);
        assert!(outcome.rejections[0].reason.contains("'region': must not be empty"));
        assert_eq!(store.rows().len(), 4);
    }

    #[tokio::test]
    async fn fully_rejected_delivery_never_opens_a_session() {
        let store = InMemoryEventStore::unavailable();
        let outcome = orchestrator(store.clone(), 10)
            .ingest(RawDelivery::new(vec![b"garbage".to_vec(), payload("")]))
            .await
            .unwrap();

        assert_eq!(outcome.stage, DeliveryStage::Completed);
        assert_eq!(outcome.decoded, 1);
        assert_eq!(outcome.rejected, 2);
        assert_eq!(outcome.batches, 0);
        assert_eq!(store.sessions(), 0);
    }

    #[tokio::test]
    async fn unavailable_store_fails_the_delivery() {
        let err = orchestrator(InMemoryEventStore::unavailable(), 10)
            .ingest(RawDelivery::new(vec![payload("A")]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DeliveryError::StoreUnavailable {
                error: WriteError::Connection(_),
                ..
            }
        ));
    }

    /// Hands out sessions only after `delay`.
    struct SlowStore {
        delay: Duration,
    }

    #[async_trait]
    impl EventStore for SlowStore {
        async fn acquire(&self) -> Result<Box<dyn BatchWriter>, WriteError> {
            tokio::time::sleep(self.delay).await;
            InMemoryEventStore::new().acquire().await
        }
    }

    fn with_timeout(store: Arc<dyn EventStore>, batch_size: usize, millis: u64) -> Orchestrator {
        Orchestrator::new(
            store,
            IngestSettings {
                batch_size: NonZeroUsize::new(batch_size).unwrap(),
                timeout: Duration::from_millis(millis),
            },
        )
    }

    #[tokio::test]
    async fn slow_session_acquisition_times_out() {
        let store = Arc::new(SlowStore {
            delay: Duration::from_secs(10),
        });
        let err = with_timeout(store, 10, 50)
            .ingest(RawDelivery::new(vec![b"garbage".to_vec(), payload("A")]))
            .await
            .unwrap_err();

        match err {
            DeliveryError::StoreUnavailable { error, outcome } => {
                assert_eq!(error, WriteError::Timeout(Duration::from_millis(50)));
                assert_eq!(outcome.stage, DeliveryStage::Failed);
                assert_eq!(outcome.decoded, 1);
                assert_eq!(outcome.rejected, 1);
                assert_eq!(outcome.rejections[0].position, 0);
                assert_eq!(outcome.persisted, 0);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn slow_batch_is_rolled_back_and_the_next_one_written() {
        let store = InMemoryEventStore::new().with_slow_region("Slow", Duration::from_secs(10));
        let payloads = vec![payload("A"), payload("Slow"), payload("C"), payload("D")];

        let outcome = with_timeout(Arc::new(store.clone()), 2, 50)
            .ingest(RawDelivery::new(payloads))
            .await
            .unwrap();

        assert_eq!(outcome.stage, DeliveryStage::Completed);
        assert_eq!(outcome.persisted, 2);
        assert_eq!(outcome.batch_failures.len(), 1);
        assert_eq!(outcome.batch_failures[0].batch_index, 0);
        assert!(outcome.batch_failures[0].error.contains("timed out after 50ms"));
        assert_eq!(store.committed_batches(), vec![2]);
        assert!(store.rows().iter().all(|r| r.region() == "C" || r.region() == "D"));
    }

    #[tokio::test]
    async fn one_session_serves_every_batch() {
        let store = InMemoryEventStore::new();
        let payloads = (0..7).map(|i| payload(&format!("r{i}"))).collect();
        let outcome = orchestrator(store.clone(), 3)
            .ingest(RawDelivery::new(payloads))
            .await
            .unwrap();
        assert_eq!(outcome.batches, 3);
        assert_eq!(store.sessions(), 1);
        assert_eq!(store.committed_batches(), vec![3, 3, 1]);
    }
}
