use crate::{
    api::{error::ApiError, response::metric_response},
    cache::MetricKey,
    refresh::GetOptions,
    state::AppState,
    validation::{validate_metric, validate_period, validate_subject},
};
use axum::{
    extract::{Path, Query, State},
    http::Method,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

// GET /metrics/{metric}/{subject} query parameters
#[derive(Debug, Deserialize)]
pub struct MetricQuery {
    #[serde(default)]
    pub period: Option<String>,
    /// Recompute even when a fresh value is cached.
    #[serde(default)]
    pub refresh: bool,
}

pub fn create_router(app_state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET]);

    Router::new()
        .route("/metrics/{metric}/{subject}", get(get_metric))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

// GET /metrics/{metric}/{subject} handler
async fn get_metric(
    State(state): State<Arc<AppState>>,
    Path((metric, subject)): Path<(String, String)>,
    Query(params): Query<MetricQuery>,
) -> Result<Response, ApiError> {
    validate_metric(&metric)?;
    validate_subject(&subject)?;
    let period = params.period.unwrap_or_default();
    validate_period(&period)?;

    let engine = state
        .engine(&metric)
        .ok_or_else(|| ApiError::NotFound(format!("Unknown metric: {}", metric)))?;

    let key = MetricKey::with_period(&subject, &metric, &period);
    if params.refresh {
        info!(%key, "forced refresh requested");
    }

    let options = GetOptions {
        force_refresh: params.refresh,
        ..Default::default()
    };
    let fetched = state.coordinator.get(&key, engine, options).await?;

    let window = state
        .coordinator
        .freshness_window(fetched.computed_at, fetched.ttl_seconds);
    Ok(metric_response(fetched, window, state.coordinator.now()))
}

// GET /health handler
async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let gate = state.coordinator.gate();
    Json(json!({
        "status": "ok",
        "metrics": state.metric_names(),
        "refreshes_in_flight": state.coordinator.refreshes_in_flight(),
        "gate": {
            "in_flight": gate.in_flight(),
            "capacity": gate.capacity(),
        },
    }))
}
