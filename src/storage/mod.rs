// Persistence seam: where committed batches go

pub mod in_memory;
pub mod postgres;

use async_trait::async_trait;

use crate::error::WriteError;
use crate::types::WriteBatch;

pub use in_memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;

/// One storage session, held for the length of a delivery.
#[async_trait]
pub trait BatchWriter: Send {
    /// Persist every record of `batch` in one transaction, or none of them.
    ///
    /// Returns the number of rows inserted. On error the transaction has been
    /// rolled back. Implementations bound their own blocking calls with the
    /// configured timeout.
    async fn write_batch(&mut self, batch: &WriteBatch) -> Result<u64, WriteError>;
}

/// Hands out sessions. Dropping a session releases its connection.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn acquire(&self) -> Result<Box<dyn BatchWriter>, WriteError>;
}
