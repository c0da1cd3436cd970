pub mod config;
pub mod constants;
pub mod delivery;
pub mod error;
pub mod generator;
pub mod idempotency;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod storage;
pub mod types;

pub use config::{IngestConfig, IngestSettings};
pub use delivery::RawDelivery;
pub use error::{DecodeError, DeliveryError, IngestError, Result, ValidationError, WriteError};
pub use pipeline::{IngestionOutcome, Orchestrator};
