//! Read API tests driven through the router with `oneshot`.

mod common;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use tower::util::ServiceExt;

use common::{reading_at, MemorySensorStore};
use sensorflow_cache::{
    cache::{set_json, CacheStore},
    error::CacheError,
    routes, AppState, MemoryCache, SensorList, SensorStore, SummaryEntry,
};

const TTL: Duration = Duration::from_secs(1500);

struct Harness {
    app: Router,
    cache: Arc<MemoryCache>,
    store: Arc<MemorySensorStore>,
}

fn harness() -> Harness {
    // ---
    let cache = Arc::new(MemoryCache::new());
    let store = Arc::new(MemorySensorStore::new());
    let sensors = Arc::new(SensorList::new(["usda-air-w00", "usda-air-w05"]));
    let app = routes::router(AppState::new(store.clone(), cache.clone(), sensors));
    Harness { app, cache, store }
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    // ---
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

#[tokio::test]
async fn cached_sensor_is_returned() {
    // ---
    let h = harness();
    let payload = json!([{"sensorID": "usda-air-w00", "t": 20}]);
    set_json(h.cache.as_ref(), "sensor:usda-air-w00", &payload, TTL)
        .await
        .unwrap();

    let (status, body) = get(&h.app, "/sensors/usda-air-w00").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sensor_id"], "usda-air-w00");
    assert_eq!(body["data"][0]["t"], 20);
}

#[tokio::test]
async fn unknown_sensor_is_client_error() {
    // ---
    let h = harness();
    // even with data cached under the key, an unlisted ID is rejected
    h.cache.set("sensor:rogue", "{}".into(), TTL).await.unwrap();

    let (status, body) = get(&h.app, "/sensors/rogue").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Sensor ID invalid.");
}

#[tokio::test]
async fn cache_miss_is_service_unavailable() {
    // ---
    let h = harness();
    let (status, body) = get(&h.app, "/sensors/usda-air-w05").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "Sensor data unavailable.");
}

#[tokio::test(start_paused = true)]
async fn expired_entry_is_service_unavailable() {
    // ---
    let h = harness();
    set_json(h.cache.as_ref(), "sensor:usda-air-w00", &json!({"t": 1}), TTL)
        .await
        .unwrap();

    tokio::time::advance(TTL + Duration::from_secs(1)).await;
    let (status, _) = get(&h.app, "/sensors/usda-air-w00").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn weekly_averages_ordered_by_week() {
    // ---
    let h = harness();
    let week11 = Utc.with_ymd_and_hms(2025, 3, 12, 8, 0, 0).unwrap();
    let week10 = Utc.with_ymd_and_hms(2025, 3, 5, 8, 0, 0).unwrap();
    let week1_2026 = Utc.with_ymd_and_hms(2025, 12, 29, 8, 0, 0).unwrap();

    for (ts, t) in [(week11, 5.0), (week10, 10.0), (week10, 20.0), (week1_2026, 1.0)] {
        h.store
            .record_reading(&reading_at("usda-air-w00", ts, Some(t)))
            .await
            .unwrap();
    }

    let (status, body) = get(&h.app, "/sensors/get_average/usda-air-w00").await;
    assert_eq!(status, StatusCode::OK);

    let rows = body.as_array().unwrap();
    let keys: Vec<(i64, i64)> = rows
        .iter()
        .map(|r| (r["year"].as_i64().unwrap(), r["week_number"].as_i64().unwrap()))
        .collect();
    assert_eq!(keys, vec![(2025, 10), (2025, 11), (2026, 1)]);
    assert_eq!(rows[0]["avg_temperature"], 15.0);
    assert_eq!(rows[0]["datapoints"], 2);
}

#[tokio::test]
async fn weekly_averages_missing_is_not_found() {
    // ---
    let h = harness();
    let (status, body) = get(&h.app, "/sensors/get_average/usda-air-w05").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());

    let (status, _) = get(&h.app, "/sensors/get_average/rogue").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn listing_skips_sensors_without_data() {
    // ---
    let h = harness();
    set_json(h.cache.as_ref(), "sensor:usda-air-w05", &json!({"t": 3}), TTL)
        .await
        .unwrap();

    let (status, body) = get(&h.app, "/sensors").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"usda-air-w05": {"t": 3}}));
}

#[tokio::test]
async fn summary_endpoint() {
    // ---
    let h = harness();
    let (status, _) = get(&h.app, "/sensors/summary/usda-air-w00").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let entry = SummaryEntry {
        sensor_id: "usda-air-w00".into(),
        summary: "Stable and mild.".into(),
        generated_at: Utc::now(),
    };
    set_json(h.cache.as_ref(), "summary:usda-air-w00", &entry, TTL)
        .await
        .unwrap();

    let (status, body) = get(&h.app, "/sensors/summary/usda-air-w00").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["summary"], "Stable and mild.");
    assert_eq!(body["sensor_id"], "usda-air-w00");
}

#[tokio::test]
async fn health_reports_sensor_count() {
    // ---
    let h = harness();
    let (status, body) = get(&h.app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok", "sensors": 2}));
}

/// Cache whose backend refuses every connection.
struct UnreachableCache;

fn refused() -> CacheError {
    CacheError::from(redis::RedisError::from((
        redis::ErrorKind::IoError,
        "connection refused",
    )))
}

#[async_trait]
impl CacheStore for UnreachableCache {
    async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> Result<(), CacheError> {
        Err(refused())
    }

    async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
        Err(refused())
    }

    async fn set_if_absent(
        &self,
        _key: &str,
        _value: String,
        _ttl: Duration,
    ) -> Result<bool, CacheError> {
        Err(refused())
    }
}

#[tokio::test]
async fn cache_outage_is_service_unavailable() {
    // ---
    let sensors = Arc::new(SensorList::new(["s1"]));
    let state = AppState::new(
        Arc::new(MemorySensorStore::new()),
        Arc::new(UnreachableCache),
        sensors,
    );
    let app = routes::router(state);

    let (status, body) = get(&app, "/sensors/s1").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "Sensor data unavailable.");

    let (status, _) = get(&app, "/sensors/summary/s1").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    // unknown IDs are still rejected before the cache is consulted
    let (status, _) = get(&app, "/sensors/rogue").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // the listing degrades to empty rather than failing
    let (status, body) = get(&app, "/sensors").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({}));
}
