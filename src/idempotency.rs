use sha2::{Digest, Sha256};

use crate::types::ValidatedRecord;

/// SHA-256 over the canonical field values of a record, hex encoded.
///
/// Nothing is deduplicated with it; redeliveries are still inserted again.
/// The key lets operators find the rows a redelivery duplicated.
pub fn compute_record_key(record: &ValidatedRecord) -> String {
    let mut s = String::new();
    s.push_str(record.region());
    s.push('|');
    s.push_str(&record.origin().to_wkt());
    s.push('|');
    s.push_str(&record.destination().to_wkt());
    s.push('|');
    s.push_str(&record.event_time().format("%Y-%m-%dT%H:%M:%S%.f").to_string());
    s.push('|');
    s.push_str(record.data_source());

    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    let out = hasher.finalize();
    hex::encode(out)
}
