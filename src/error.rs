use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::pipeline::IngestionOutcome;

/// Crate-level error for configuration, I/O and process plumbing.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {message}")]
    Database { message: String },

    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}

pub type Result<T> = std::result::Result<T, IngestError>;

/// A raw payload could not be turned into a [`crate::types::DecodedRecord`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("malformed payload: {0}")]
    MalformedEncoding(String),

    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("field '{field}' must be a string, found {found}")]
    WrongType {
        field: &'static str,
        found: &'static str,
    },
}

/// Which rule a field broke.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationRule {
    Empty,
    TooLong { len: usize, max: usize },
    /// PostgreSQL `text` cannot store U+0000.
    NulCharacter,
    InvalidGeometry(String),
    InvalidTimestamp(String),
}

impl fmt::Display for ValidationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationRule::Empty => write!(f, "must not be empty"),
            ValidationRule::TooLong { len, max } => {
                write!(f, "is {len} characters long, at most {max} allowed")
            }
            ValidationRule::NulCharacter => write!(f, "must not contain NUL characters"),
            ValidationRule::InvalidGeometry(raw) => {
                write!(f, "'{raw}' is not a valid POINT geometry")
            }
            ValidationRule::InvalidTimestamp(raw) => {
                write!(f, "'{raw}' is not an ISO-8601 timestamp")
            }
        }
    }
}

/// A decoded record broke a field constraint.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid '{field}': {rule}")]
pub struct ValidationError {
    pub field: &'static str,
    pub rule: ValidationRule,
}

impl ValidationError {
    pub fn new(field: &'static str, rule: ValidationRule) -> Self {
        Self { field, rule }
    }
}

/// Why a single record was kept out of every batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Storage-layer failure for one batch. The batch is rolled back before this is returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WriteError {
    #[error("constraint violation ({code}): {message}")]
    Constraint { code: String, message: String },

    #[error("connection failure: {0}")]
    Connection(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("statement failed: {0}")]
    Statement(String),
}

/// The delivery as a whole could not be processed.
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("malformed delivery, no records could be read: {0}")]
    MalformedDelivery(String),

    /// Carries what decoding and validation found before the session was refused.
    #[error("storage unavailable: {error}")]
    StoreUnavailable {
        error: WriteError,
        outcome: Box<IngestionOutcome>,
    },
}
