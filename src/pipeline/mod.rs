// Ingestion pipeline: decode, validate, partition, write

pub mod decoder;
pub mod orchestrator;
pub mod partition;
pub mod validator;

pub use decoder::decode;
pub use orchestrator::{BatchFailure, DeliveryStage, IngestionOutcome, Orchestrator, RecordRejection};
pub use partition::{batch_count, partition};
pub use validator::validate;
