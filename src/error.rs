//! Error types for the sensor cache pipeline.
//!
//! Each concern gets its own `thiserror` enum so failures can be classified
//! where they are handled: fetch failures stay inside one sensor's task, store
//! failures roll back a transaction, and `ApiError` is the only type that ever
//! reaches an HTTP client.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// ---

/// Failure of a single vendor fetch. Always recovered per sensor.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid JSON body: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        // ---
        if e.is_timeout() {
            FetchError::Timeout
        } else if e.is_decode() {
            FetchError::Decode(e.to_string())
        } else {
            FetchError::Network(e.to_string())
        }
    }
}

/// Cache backend failure.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("cached value is not valid JSON: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Relational store failure. Any of these aborts the surrounding transaction.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store error: {0}")]
    Internal(String),
}

/// Failure while producing a sensor summary.
#[derive(Error, Debug)]
pub enum SummaryError {
    #[error("no readings recorded for {0}")]
    NoReadings(String),

    #[error("summary provider unavailable: {0}")]
    Provider(String),

    #[error("unexpected provider response: {0}")]
    Parse(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl From<reqwest::Error> for SummaryError {
    fn from(e: reqwest::Error) -> Self {
        SummaryError::Provider(e.to_string())
    }
}

/// Errors surfaced by the Read API.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Sensor ID invalid.")]
    InvalidSensor,

    #[error("Sensor data unavailable.")]
    Unavailable,

    #[error("No weekly averages recorded yet.")]
    NoHistory,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

/// A cache backend that cannot be reached means the data is temporarily
/// unavailable. A value that no longer decodes is an internal fault.
impl From<CacheError> for ApiError {
    fn from(e: CacheError) -> Self {
        // ---
        match e {
            CacheError::Redis(e) => {
                tracing::warn!("Cache backend unavailable: {}", e);
                ApiError::Unavailable
            }
            CacheError::Serde(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // ---
        let status = match self {
            ApiError::InvalidSensor => StatusCode::BAD_REQUEST,
            ApiError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::NoHistory => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if let ApiError::Internal(ref detail) = self {
            tracing::error!("Internal error serving request: {}", detail);
        }

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
