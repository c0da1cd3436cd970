use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::idempotency::compute_record_key;

/// One queue record after decoding. Every field is still untrusted text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedRecord {
    pub region: String,
    pub origin_coordinate: String,
    pub destination_coordinate: String,
    pub event_time: String,
    pub data_source: String,
}

/// A two-dimensional point in SRID 4326 (x = longitude, y = latitude).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub x: f64,
    pub y: f64,
}

impl GeoPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Well-known text, as handed to `ST_GeomFromText`.
    pub fn to_wkt(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "POINT({} {})", self.x, self.y)
    }
}

/// A record that passed every field constraint. Only the validator builds these.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidatedRecord {
    region: String,
    origin: GeoPoint,
    destination: GeoPoint,
    event_time: NaiveDateTime,
    data_source: String,
}

impl ValidatedRecord {
    pub(crate) fn new(
        region: String,
        origin: GeoPoint,
        destination: GeoPoint,
        event_time: NaiveDateTime,
        data_source: String,
    ) -> Self {
        Self {
            region,
            origin,
            destination,
            event_time,
            data_source,
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn origin(&self) -> GeoPoint {
        self.origin
    }

    pub fn destination(&self) -> GeoPoint {
        self.destination
    }

    /// Event time in UTC, without offset, as stored in the `timestamp` column.
    pub fn event_time(&self) -> NaiveDateTime {
        self.event_time
    }

    pub fn data_source(&self) -> &str {
        &self.data_source
    }

    /// Content-derived key; equal records from a redelivery share it.
    pub fn record_key(&self) -> String {
        compute_record_key(self)
    }
}

/// Records committed together in one transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteBatch {
    index: usize,
    records: Vec<ValidatedRecord>,
}

impl WriteBatch {
    pub(crate) fn new(index: usize, records: Vec<ValidatedRecord>) -> Self {
        Self { index, records }
    }

    /// Zero-based position of this batch within its delivery.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn records(&self) -> &[ValidatedRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
