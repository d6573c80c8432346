//! Sensor summaries produced by an external text-generation service.
//!
//! A summary is built from a window of recent readings and cached at
//! `summary:{sensor_id}` for two days. Generating summaries once at startup is
//! an explicit [`SummaryInit`] check made by `main` before it spawns the job;
//! the guard is either per deployment (shared cache key) or per process.

use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::{
    aggregator::SensorStore,
    cache::{self, CacheStore},
    config::InitScope,
    error::SummaryError,
    models::{summary_key, RawReading, SummaryEntry},
};

// ---

/// Cache key guarding deployment-wide startup generation.
pub const INIT_GUARD_KEY: &str = "summary:init";

const SYSTEM_PROMPT: &str =
    "You summarize environmental sensor data for farmers in a short paragraph.";

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, sensor_id: &str, readings: &[RawReading])
        -> Result<String, SummaryError>;
}

/// OpenAI-compatible chat completion provider.
pub struct OpenAiSummarizer {
    // ---
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAiSummarizer {
    pub fn new(api_key: &str, model: &str, base_url: &str) -> Self {
        // ---
        OpenAiSummarizer {
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn parse_response(json: &Value) -> Result<String, SummaryError> {
        json.pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| SummaryError::Parse("Missing choices[0].message.content".to_string()))
    }
}

#[async_trait]
impl Summarizer for OpenAiSummarizer {
    async fn summarize(
        &self,
        sensor_id: &str,
        readings: &[RawReading],
    ) -> Result<String, SummaryError> {
        // ---
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": build_prompt(sensor_id, readings)}
            ],
            "temperature": 0.2
        });

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let json: Value = resp.json().await?;
        Self::parse_response(&json)
    }
}

/// Prompt listing readings oldest first, one per line.
pub fn build_prompt(sensor_id: &str, readings: &[RawReading]) -> String {
    // ---
    let mut prompt = format!(
        "Summarize the recent conditions reported by sensor {sensor_id}. \
         Readings (timestamp, temperature C, pressure hPa, humidity %, vcc mV):\n"
    );
    let fmt = |v: Option<f64>| v.map(|v| format!("{v:.2}")).unwrap_or_else(|| "n/a".into());

    for r in readings.iter().rev() {
        prompt.push_str(&format!(
            "{}, {}, {}, {}, {}\n",
            r.timestamp.to_rfc3339(),
            fmt(r.temperature),
            fmt(r.pressure),
            fmt(r.humidity),
            r.vcc.map(|v| v.to_string()).unwrap_or_else(|| "n/a".into()),
        ));
    }
    prompt
}

/// Build and cache a summary for one sensor.
pub async fn generate_summary(
    store: &dyn SensorStore,
    cache: &dyn CacheStore,
    summarizer: &dyn Summarizer,
    sensor_id: &str,
    window: u32,
    ttl: Duration,
) -> Result<SummaryEntry, SummaryError> {
    // ---
    let readings = store.recent_readings(sensor_id, window).await?;
    if readings.is_empty() {
        return Err(SummaryError::NoReadings(sensor_id.to_string()));
    }

    let summary = summarizer.summarize(sensor_id, &readings).await?;
    let entry = SummaryEntry {
        sensor_id: sensor_id.to_string(),
        summary,
        generated_at: Utc::now(),
    };
    cache::set_json(cache, &summary_key(sensor_id), &entry, ttl).await?;
    info!("Summary for {} cached", sensor_id);
    Ok(entry)
}

/// Summarize every sensor, logging failures per sensor. Returns how many succeeded.
pub async fn generate_all(
    store: &dyn SensorStore,
    cache: &dyn CacheStore,
    summarizer: &dyn Summarizer,
    sensor_ids: &[String],
    window: u32,
    ttl: Duration,
) -> usize {
    // ---
    let mut generated = 0;
    for sensor_id in sensor_ids {
        match generate_summary(store, cache, summarizer, sensor_id, window, ttl).await {
            Ok(_) => generated += 1,
            Err(e) => warn!("Summary for {} not generated: {}", sensor_id, e),
        }
    }
    generated
}

/// Idempotent startup-once check for summary generation.
pub struct SummaryInit {
    scope: InitScope,
    claimed: AtomicBool,
}

impl SummaryInit {
    pub fn new(scope: InitScope) -> Self {
        SummaryInit {
            scope,
            claimed: AtomicBool::new(false),
        }
    }

    /// Returns `true` exactly once per scope; later calls return `false`.
    ///
    /// In deployment scope the claim expires with `ttl`, after which the next
    /// starting process regenerates.
    pub async fn try_claim(&self, cache: &dyn CacheStore, ttl: Duration) -> bool {
        // ---
        if self.claimed.swap(true, Ordering::SeqCst) {
            return false;
        }

        match self.scope {
            InitScope::Process => true,
            InitScope::Deployment => {
                match cache
                    .set_if_absent(INIT_GUARD_KEY, Utc::now().to_rfc3339(), ttl)
                    .await
                {
                    Ok(claimed) => claimed,
                    Err(e) => {
                        warn!("Summary init guard unavailable, skipping startup run: {}", e);
                        false
                    }
                }
            }
        }
    }
}
