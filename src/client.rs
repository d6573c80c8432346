//! External sensor vendor client.
//!
//! One GET per sensor against the vendor's query endpoint. The body is parsed
//! as JSON and handed back untouched; the pipeline never interprets vendor
//! payloads. Single attempt, no retries.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use tracing::debug;

use crate::error::FetchError;

// ---

/// Path of the vendor query script, relative to the configured base URL.
pub const SENSOR_QUERY_PATH: &str = "querySensorInDB_working_reverse.php";

#[async_trait]
pub trait SensorSource: Send + Sync {
    /// Fetch the raw payload for one sensor.
    async fn fetch(&self, sensor_id: &str) -> Result<Value, FetchError>;
}

/// Vendor client backed by `reqwest`.
///
/// Certificate validation is disabled: the vendor endpoint serves a chain
/// that does not validate.
#[derive(Clone)]
pub struct HttpSensorClient {
    // ---
    client: reqwest::Client,
    base_url: String,
}

impl HttpSensorClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, FetchError> {
        // ---
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .build()?;

        Ok(HttpSensorClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Endpoint URL without the query string.
    pub fn endpoint(&self) -> String {
        format!("{}/{}", self.base_url, SENSOR_QUERY_PATH)
    }
}

#[async_trait]
impl SensorSource for HttpSensorClient {
    async fn fetch(&self, sensor_id: &str) -> Result<Value, FetchError> {
        // ---
        let url = self.endpoint();
        debug!("Fetching {} from {}", sensor_id, url);

        let response = self
            .client
            .get(&url)
            .query(&[("sensorID", sensor_id)])
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| FetchError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        // ---
        let client = HttpSensorClient::new(
            "https://esmc.uiowa.edu/esmc_services/data_base/",
            Duration::from_secs(10),
        )
        .unwrap();

        assert_eq!(
            client.endpoint(),
            "https://esmc.uiowa.edu/esmc_services/data_base/querySensorInDB_working_reverse.php"
        );
    }
}
