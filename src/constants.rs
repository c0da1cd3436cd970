/// Wire and storage constants shared across the pipeline.
/// Field names on the wire follow the producer's payload; the long names are
/// accepted as aliases so records written by newer producers still decode.

// Wire field names (canonical, as emitted by the producer)
pub const FIELD_REGION: &str = "region";
pub const FIELD_ORIGIN: &str = "origin_coord";
pub const FIELD_DESTINATION: &str = "destination_coord";
pub const FIELD_EVENT_TIME: &str = "datetime";
pub const FIELD_DATA_SOURCE: &str = "datasource";

// Accepted aliases, in the same order as the canonical names above
pub const ALIAS_ORIGIN: &str = "origin_coordinate";
pub const ALIAS_DESTINATION: &str = "destination_coordinate";
pub const ALIAS_EVENT_TIME: &str = "event_time";
pub const ALIAS_DATA_SOURCE: &str = "data_source";

// Storage
pub const EVENTS_TABLE: &str = "events";
pub const EVENTS_COLUMNS: [&str; 5] = [
    "region",
    "origin_coordinate",
    "destination_coordinate",
    "event_time",
    "data_source",
];
pub const GEOMETRY_SRID: i32 = 4326;

/// Maximum length, in characters, of the free-text columns.
pub const MAX_TEXT_LEN: usize = 255;

pub const DEFAULT_BATCH_SIZE: usize = 500;

/// PostgreSQL caps a statement at 65535 bind parameters and every row binds five.
pub const MAX_BATCH_SIZE: usize = 65_535 / EVENTS_COLUMNS.len();

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_POOL_SIZE: usize = 4;

/// Name every log line and metric of this crate is filed under.
pub const SERVICE_NAME: &str = "geo_ingest";
