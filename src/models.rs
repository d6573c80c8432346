//! Data models for the sensor pipeline.

use std::collections::HashSet;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

// ---

/// Cache key for the most recent vendor payload of a sensor.
pub fn sensor_key(sensor_id: &str) -> String {
    format!("sensor:{sensor_id}")
}

/// Cache key for the generated summary of a sensor.
pub fn summary_key(sensor_id: &str) -> String {
    format!("summary:{sensor_id}")
}

/// The configured allow-list of monitored sensors.
///
/// Order is preserved for fan-out and listing; lookups go through a set.
#[derive(Debug, Clone, Default)]
pub struct SensorList {
    // ---
    ids: Vec<String>,
    index: HashSet<String>,
}

impl SensorList {
    // ---
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        // ---
        let mut list = SensorList::default();
        for id in ids {
            let id = id.into();
            if list.index.insert(id.clone()) {
                list.ids.push(id);
            }
        }
        list
    }

    pub fn contains(&self, sensor_id: &str) -> bool {
        self.index.contains(sensor_id)
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// One reading as stored in `sensor_readings`. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct RawReading {
    // ---
    pub sensor_id: String,
    pub timestamp: DateTime<Utc>,
    pub temperature: Option<f64>,
    pub pressure: Option<f64>,
    pub humidity: Option<f64>,
    pub vcc: Option<i32>,
}

impl RawReading {
    // ---
    /// ISO-8601 `(year, week)` the reading belongs to.
    ///
    /// Near a year boundary this may be week 52/53 of the previous year or
    /// week 1 of the next one.
    pub fn iso_week(&self) -> (i32, i32) {
        let week = self.timestamp.iso_week();
        (week.year(), week.week() as i32)
    }
}

/// Running weekly aggregate, unique per `(sensor_id, year, week_number)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct WeeklyAverage {
    // ---
    pub sensor_id: String,
    pub year: i32,
    pub week_number: i32,
    pub avg_temperature: Option<f64>,
    pub avg_pressure: Option<f64>,
    pub avg_humidity: Option<f64>,
    pub avg_vcc: Option<f64>,
    pub datapoints: i32,
    pub calculation_timestamp: DateTime<Utc>,
}

impl WeeklyAverage {
    // ---
    /// First row for a week: the reading's own values with one datapoint.
    pub fn seed(reading: &RawReading, now: DateTime<Utc>) -> Self {
        // ---
        let (year, week_number) = reading.iso_week();
        WeeklyAverage {
            sensor_id: reading.sensor_id.clone(),
            year,
            week_number,
            avg_temperature: reading.temperature,
            avg_pressure: reading.pressure,
            avg_humidity: reading.humidity,
            avg_vcc: reading.vcc.map(f64::from),
            datapoints: 1,
            calculation_timestamp: now,
        }
    }

    /// Fold one more reading into this aggregate.
    ///
    /// `datapoints` always increments. A null field leaves its average as is,
    /// so a field's effective sample size can be lower than `datapoints`.
    pub fn fold(&mut self, reading: &RawReading, now: DateTime<Utc>) {
        // ---
        let n = self.datapoints;
        self.avg_temperature = incremental_mean(self.avg_temperature, n, reading.temperature);
        self.avg_pressure = incremental_mean(self.avg_pressure, n, reading.pressure);
        self.avg_humidity = incremental_mean(self.avg_humidity, n, reading.humidity);
        self.avg_vcc = incremental_mean(self.avg_vcc, n, reading.vcc.map(f64::from));
        self.datapoints = n + 1;
        self.calculation_timestamp = now;
    }
}

/// `(avg * n + value) / (n + 1)`, skipping nulls.
pub fn incremental_mean(current: Option<f64>, datapoints: i32, value: Option<f64>) -> Option<f64> {
    // ---
    match (current, value) {
        (_, None) => current,
        (None, Some(v)) => Some(v),
        (Some(_), Some(v)) if datapoints <= 0 => Some(v),
        (Some(avg), Some(v)) => {
            let n = f64::from(datapoints);
            Some((avg * n + v) / (n + 1.0))
        }
    }
}

/// Generated summary cached at `summary:{sensor_id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryEntry {
    // ---
    pub sensor_id: String,
    pub summary: String,
    pub generated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::TimeZone;

    fn create_test_reading(ts: DateTime<Utc>, temperature: Option<f64>) -> RawReading {
        // ---
        RawReading {
            sensor_id: "w00".to_string(),
            timestamp: ts,
            temperature,
            pressure: Some(1000.0),
            humidity: Some(50.0),
            vcc: Some(4100),
        }
    }

    fn week10() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 5, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_cache_keys() {
        // ---
        assert_eq!(sensor_key("usda-air-w00"), "sensor:usda-air-w00");
        assert_eq!(summary_key("usda-air-w00"), "summary:usda-air-w00");
    }

    #[test]
    fn test_iso_week_mid_year() {
        // ---
        let reading = create_test_reading(week10(), Some(1.0));
        assert_eq!(reading.iso_week(), (2025, 10));
    }

    #[test]
    fn test_iso_week_year_boundaries() {
        // ---
        // 2024-12-30 is a Monday that starts ISO week 1 of 2025
        let monday = Utc.with_ymd_and_hms(2024, 12, 30, 0, 0, 0).unwrap();
        let reading = create_test_reading(monday, None);
        assert_eq!(reading.iso_week(), (2025, 1));

        // 2021-01-03 is a Sunday still in week 53 of 2020
        let sunday = Utc.with_ymd_and_hms(2021, 1, 3, 23, 59, 59).unwrap();
        let reading = create_test_reading(sunday, None);
        assert_eq!(reading.iso_week(), (2020, 53));
    }

    #[test]
    fn test_fold_three_readings() {
        // ---
        let now = week10();
        let mut avg = WeeklyAverage::seed(&create_test_reading(now, Some(10.0)), now);
        avg.fold(&create_test_reading(now, Some(20.0)), now);
        avg.fold(&create_test_reading(now, Some(30.0)), now);

        assert_eq!(avg.avg_temperature, Some(20.0));
        assert_eq!(avg.datapoints, 3);
        assert_eq!((avg.year, avg.week_number), (2025, 10));
        assert_eq!(avg.avg_vcc, Some(4100.0));
    }

    #[test]
    fn test_fold_null_temperature_keeps_average() {
        // ---
        let now = week10();
        let mut avg = WeeklyAverage::seed(&create_test_reading(now, Some(12.5)), now);

        let mut reading = create_test_reading(now, None);
        reading.pressure = Some(1010.0);
        avg.fold(&reading, now);

        assert_eq!(avg.avg_temperature, Some(12.5));
        assert_eq!(avg.avg_pressure, Some(1005.0));
        assert_eq!(avg.datapoints, 2);
    }

    #[test]
    fn test_fold_first_valid_value_after_nulls() {
        // ---
        let now = week10();
        let mut avg = WeeklyAverage::seed(&create_test_reading(now, None), now);
        assert_eq!(avg.avg_temperature, None);

        avg.fold(&create_test_reading(now, Some(18.0)), now);
        assert_eq!(avg.avg_temperature, Some(18.0));
        assert_eq!(avg.datapoints, 2);
    }

    #[test]
    fn test_incremental_mean_matches_arithmetic_mean() {
        // ---
        let values = [21.3, 19.8, 22.05, 18.4, 20.0, 23.7];
        let mut avg = None;
        for (i, v) in values.iter().enumerate() {
            avg = incremental_mean(avg, i as i32, Some(*v));
        }
        let expected: f64 = values.iter().sum::<f64>() / values.len() as f64;
        assert!((avg.unwrap() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_sensor_list_dedupes_and_keeps_order() {
        // ---
        let list = SensorList::new(["s2", "s1", "s2"]);
        assert_eq!(list.ids(), ["s2".to_string(), "s1".to_string()]);
        assert!(list.contains("s1"));
        assert!(!list.contains("s3"));
        assert_eq!(list.len(), 2);
    }
}
