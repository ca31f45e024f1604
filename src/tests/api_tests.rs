//! HTTP surface, driven through the router with `tower::ServiceExt::oneshot`.

#[cfg(test)]
mod tests {
    use crate::{
        api::{create_router, CACHE_SOURCE_HEADER},
        cache::MetricKey,
        clock::ManualClock,
        config::{Config, CoordinatorConfig},
        db::{MemoryStore, MetricStore},
        refresh::RefreshCoordinator,
        state::AppState,
        tests::support::{entry_aged, t0, ScriptedEngine},
        upstream::ComputeError,
    };
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
        Router,
    };
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    struct TestApp {
        router: Router,
        store: Arc<MemoryStore>,
        engine: Arc<ScriptedEngine>,
    }

    fn app_with(engine: ScriptedEngine) -> TestApp {
        let store = Arc::new(MemoryStore::new());
        let coordinator = RefreshCoordinator::with_clock(
            CoordinatorConfig::default(),
            store.clone(),
            Arc::new(ManualClock::new(t0())),
        )
        .unwrap();
        let engine = Arc::new(engine);
        let state = AppState::new(Config::from_env(), coordinator)
            .with_engine("insider-sentiment", engine.clone());

        TestApp {
            router: create_router(Arc::new(state)),
            store,
            engine,
        }
    }

    async fn send(router: &Router, uri: &str) -> (StatusCode, axum::http::HeaderMap, Value) {
        let response = router
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, headers, body)
    }

    #[tokio::test]
    async fn test_get_metric_computes_then_serves_from_memory() {
        let app = app_with(ScriptedEngine::new(Duration::ZERO));

        let (status, headers, body) = send(&app.router, "/metrics/insider-sentiment/AAPL").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[CACHE_SOURCE_HEADER], "compute-fresh");
        assert_eq!(headers[header::CACHE_CONTROL], "public, max-age=675");
        assert_eq!(body["data"], json!({"subject": "AAPL", "call": 1}));
        assert_eq!(body["source"], "compute-fresh");
        assert_eq!(body["ttl_seconds"], 900);
        assert_eq!(body["delayed"], false);

        let (status, headers, _) = send(&app.router, "/metrics/insider-sentiment/AAPL").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[CACHE_SOURCE_HEADER], "memory");
        assert_eq!(app.engine.calls(), 1);
    }

    #[tokio::test]
    async fn test_refresh_query_forces_recompute() {
        let app = app_with(ScriptedEngine::new(Duration::ZERO));

        send(&app.router, "/metrics/insider-sentiment/AAPL").await;
        let (status, headers, body) =
            send(&app.router, "/metrics/insider-sentiment/AAPL?refresh=true").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[CACHE_SOURCE_HEADER], "compute-fresh");
        assert_eq!(body["data"]["call"], 2);
    }

    #[tokio::test]
    async fn test_period_is_part_of_the_key() {
        let app = app_with(ScriptedEngine::new(Duration::ZERO));

        send(&app.router, "/metrics/insider-sentiment/AAPL?period=2024Q1").await;
        let (_, headers, _) =
            send(&app.router, "/metrics/insider-sentiment/AAPL?period=2024Q2").await;
        assert_eq!(headers[CACHE_SOURCE_HEADER], "compute-fresh");
        assert!(app
            .store
            .stored(&MetricKey::with_period("AAPL", "insider-sentiment", "2024Q1"))
            .is_some());
    }

    #[tokio::test]
    async fn test_degraded_response_is_flagged_delayed() {
        let app = app_with(
            ScriptedEngine::new(Duration::ZERO).failing(|| ComputeError::Parse("bad".into())),
        );
        let key = MetricKey::new("MSFT", "insider-sentiment");
        app.store
            .upsert(&key, &entry_aged(json!({"score": 4}), 7200, 3600))
            .await
            .unwrap();

        let (status, headers, body) = send(&app.router, "/metrics/insider-sentiment/MSFT").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[CACHE_SOURCE_HEADER], "store-expired-fallback");
        assert_eq!(headers[header::CACHE_CONTROL], "no-store");
        assert_eq!(body["delayed"], true);
        assert_eq!(body["data"], json!({"score": 4}));
    }

    #[tokio::test]
    async fn test_no_data_is_unavailable_with_retry_after() {
        let app = app_with(
            ScriptedEngine::new(Duration::ZERO).failing(|| ComputeError::Parse("bad".into())),
        );

        let (status, headers, body) = send(&app.router, "/metrics/insider-sentiment/GOOG").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(headers[header::RETRY_AFTER], "30");
        assert!(body["error"]
            .as_str()
            .is_some_and(|msg| msg.contains("GOOG:insider-sentiment")));
    }

    #[tokio::test]
    async fn test_request_validation() {
        let app = app_with(ScriptedEngine::new(Duration::ZERO));

        let (status, _, _) = send(&app.router, "/metrics/unknown-metric/AAPL").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _, body) = send(&app.router, "/metrics/insider-sentiment/AA%20PL").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().is_some_and(|msg| msg.contains("subject")));

        let (status, _, _) = send(&app.router, "/metrics/Insider/AAPL").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _, _) =
            send(&app.router, "/metrics/insider-sentiment/AAPL?period=2024%20Q1").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(app.engine.calls(), 0);
    }

    #[tokio::test]
    async fn test_health_reports_gate_state() {
        let app = app_with(ScriptedEngine::new(Duration::ZERO));

        let (status, _, body) = send(&app.router, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["metrics"], json!(["insider-sentiment"]));
        assert_eq!(body["gate"]["capacity"], 2);
        assert_eq!(body["gate"]["in_flight"], 0);
    }
}
