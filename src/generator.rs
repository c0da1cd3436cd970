//! Synthetic deliveries for load testing and local seeding.
//!
//! Payloads look like the producer's: a city-like region, two random points
//! anywhere on the globe, a naive timestamp from the current decade and a
//! one-word data source.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::{json, Value};

use crate::constants::*;
use crate::delivery::QueueEvent;

const REGIONS: [&str; 12] = [
    "Prague", "Turin", "Hamburg", "Lisbon", "Seattle", "Osaka", "Nairobi", "Lima", "Oslo",
    "Porto Alegre", "Adelaide", "Montreal",
];

const DATA_SOURCES: [&str; 8] = [
    "funny_car",
    "baba_car",
    "cheap_mobile",
    "bad_diesel_vehicles",
    "pt_search_app",
    "metro",
    "taxi",
    "bicycle",
];

pub struct PayloadGenerator<R> {
    rng: R,
    decade_start: NaiveDateTime,
    now: NaiveDateTime,
}

impl<R: Rng> PayloadGenerator<R> {
    pub fn new(rng: R) -> Self {
        let now = Utc::now().naive_utc();
        let decade = now.year() - now.year().rem_euclid(10);
        let decade_start = NaiveDate::from_ymd_opt(decade, 1, 1)
            .and_then(|day| day.and_hms_opt(0, 0, 0))
            .unwrap_or(now);
        Self {
            rng,
            decade_start,
            now,
        }
    }

    pub fn payload(&mut self) -> Value {
        let region = REGIONS.choose(&mut self.rng).copied().unwrap_or("Prague");
        let data_source = DATA_SOURCES.choose(&mut self.rng).copied().unwrap_or("metro");
        let origin = self.point();
        let destination = self.point();
        let event_time = self.event_time();

        json!({
            FIELD_REGION: region,
            FIELD_ORIGIN: origin,
            FIELD_DESTINATION: destination,
            FIELD_EVENT_TIME: event_time.format("%Y-%m-%dT%H:%M:%S").to_string(),
            FIELD_DATA_SOURCE: data_source,
        })
    }

    fn point(&mut self) -> String {
        let longitude: f64 = self.rng.gen_range(-180.0..=180.0);
        let latitude: f64 = self.rng.gen_range(-90.0..=90.0);
        format!("POINT ({longitude} {latitude})")
    }

    fn event_time(&mut self) -> NaiveDateTime {
        let span = (self.now - self.decade_start).num_seconds().max(0);
        self.decade_start + Duration::seconds(self.rng.gen_range(0..=span))
    }
}

/// A queue event document holding `count` synthetic records.
pub fn generate_delivery<R: Rng>(rng: R, count: usize) -> QueueEvent {
    let mut generator = PayloadGenerator::new(rng);
    let payloads: Vec<Value> = (0..count).map(|_| generator.payload()).collect();
    QueueEvent::from_payloads(&payloads)
}
