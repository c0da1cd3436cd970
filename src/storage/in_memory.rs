use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

use super::{BatchWriter, EventStore};
use crate::error::WriteError;
use crate::types::{ValidatedRecord, WriteBatch};

/// Check-constraint violation code, as PostgreSQL reports it.
const CHECK_VIOLATION: &str = "23514";

#[derive(Default)]
struct State {
    rows: Vec<ValidatedRecord>,
    committed_batches: Vec<usize>,
    forbidden_regions: HashSet<String>,
    slow_regions: HashMap<String, Duration>,
    unavailable: bool,
    sessions: usize,
}

/// In-memory store for dry runs and tests.
///
/// A batch holding a forbidden region fails like a check constraint and
/// leaves no rows behind.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject, as a constraint violation, every batch containing `region`.
    pub fn with_forbidden_region(self, region: &str) -> Self {
        self.lock().forbidden_regions.insert(region.to_string());
        self
    }

    /// Stall for `delay` before committing any batch containing `region`.
    pub fn with_slow_region(self, region: &str, delay: Duration) -> Self {
        self.lock().slow_regions.insert(region.to_string(), delay);
        self
    }

    /// Fail every session acquisition.
    pub fn unavailable() -> Self {
        let store = Self::new();
        store.lock().unavailable = true;
        store
    }

    pub fn rows(&self) -> Vec<ValidatedRecord> {
        self.lock().rows.clone()
    }

    /// Sizes of the committed batches, in commit order.
    pub fn committed_batches(&self) -> Vec<usize> {
        self.lock().committed_batches.clone()
    }

    /// How many sessions were handed out.
    pub fn sessions(&self) -> usize {
        self.lock().sessions
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn acquire(&self) -> Result<Box<dyn BatchWriter>, WriteError> {
        let mut state = self.lock();
        if state.unavailable {
            return Err(WriteError::Connection(
                "in-memory store is unavailable".to_string(),
            ));
        }
        state.sessions += 1;
        Ok(Box::new(InMemoryBatchWriter {
            state: Arc::clone(&self.state),
        }))
    }
}

struct InMemoryBatchWriter {
    state: Arc<Mutex<State>>,
}

#[async_trait]
impl BatchWriter for InMemoryBatchWriter {
    async fn write_batch(&mut self, batch: &WriteBatch) -> Result<u64, WriteError> {
        let delay = {
            let state = self.lock()?;
            if let Some(record) = batch
                .records()
                .iter()
                .find(|r| state.forbidden_regions.contains(r.region()))
            {
                return Err(WriteError::Constraint {
                    code: CHECK_VIOLATION.to_string(),
                    message: format!("region '{}' is not allowed", record.region()),
                });
            }
            batch
                .records()
                .iter()
                .find_map(|r| state.slow_regions.get(r.region()).copied())
        };

        // Nothing is kept if the caller gives up while this sleeps.
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock()?;
        state.rows.extend(batch.records().iter().cloned());
        state.committed_batches.push(batch.len());
        debug!(batch = batch.index(), rows = batch.len(), "committed batch in memory");
        Ok(batch.len() as u64)
    }
}

impl InMemoryBatchWriter {
    fn lock(&self) -> Result<MutexGuard<'_, State>, WriteError> {
        self.state
            .lock()
            .map_err(|_| WriteError::Connection("in-memory store lock poisoned".to_string()))
    }
}
