//! Synthetic reading generator used to exercise the aggregator without
//! hardware feeds.

use chrono::{DateTime, Utc};
use rand::{seq::SliceRandom, Rng};

use crate::models::RawReading;

// ---

/// Random reading for one of `sensor_ids`, or `None` if the list is empty.
pub fn generate_reading<R: Rng + ?Sized>(
    rng: &mut R,
    sensor_ids: &[String],
    now: DateTime<Utc>,
) -> Option<RawReading> {
    // ---
    let sensor_id = sensor_ids.choose(rng)?.clone();

    Some(RawReading {
        sensor_id,
        timestamp: now,
        temperature: Some(round_to(rng.gen_range(15.0..25.0), 8)),
        pressure: Some(round_to(rng.gen_range(980.0..1020.0), 7)),
        humidity: Some(round_to(rng.gen_range(40.0..60.0), 8)),
        vcc: Some(rng.gen_range(4000..=4300)),
    })
}

fn round_to(value: f64, digits: i32) -> f64 {
    let factor = 10f64.powi(digits);
    (value * factor).round() / factor
}
