use crate::models::{Fetched, SourceTag};
use crate::refresh::FreshnessWindow;
use axum::{
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

pub const CACHE_SOURCE_HEADER: &str = "x-cache-source";

#[derive(Serialize)]
pub struct MetricResponse {
    pub data: Value,
    pub source: SourceTag,
    pub computed_at: DateTime<Utc>,
    pub ttl_seconds: u64,
    /// Set for degraded responses so clients can flag the value as possibly delayed.
    pub delayed: bool,
}

impl From<Fetched> for MetricResponse {
    fn from(fetched: Fetched) -> Self {
        Self {
            delayed: fetched.source.is_degraded(),
            data: fetched.value,
            source: fetched.source,
            computed_at: fetched.computed_at,
            ttl_seconds: fetched.ttl_seconds,
        }
    }
}

/// Cache-Control for a served value: cacheable until the end of its fresh window,
/// never for degraded values.
pub fn cache_control(source: SourceTag, window: &FreshnessWindow, now: DateTime<Utc>) -> String {
    if source.is_degraded() {
        return "no-store".to_string();
    }
    let remaining = (window.fresh_until - now).num_seconds().max(0);
    format!("public, max-age={}", remaining)
}

pub fn metric_response(fetched: Fetched, window: FreshnessWindow, now: DateTime<Utc>) -> Response {
    let source = fetched.source;
    let json = match serde_json::to_string(&MetricResponse::from(fetched)) {
        Ok(json) => json,
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    headers.insert(
        CACHE_SOURCE_HEADER,
        HeaderValue::from_static(source.as_str()),
    );
    if let Ok(value) = HeaderValue::from_str(&cache_control(source, &window, now)) {
        headers.insert(header::CACHE_CONTROL, value);
    }

    (StatusCode::OK, headers, json).into_response()
}
