//! Integration tests for the executor API endpoints

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use executor_lib::{
    compute::SimulatedCompute,
    health::{components, HealthRegistry},
    observability::ExecutorMetrics,
    ComponentStatus, InstanceStatus, MigrationConfig, MigrationStatus, SafeMigrationOrchestrator,
    StaticForecastProvider,
};
use safe_executor::api::{create_router, status_code_for, AppState};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const ZONE: &str = "us-central1-a";

async fn setup_test_app() -> (Router, Arc<AppState>, Arc<SimulatedCompute>) {
    let health_registry = HealthRegistry::new();
    health_registry.register(components::ORCHESTRATOR).await;
    health_registry.register(components::COMPUTE).await;
    health_registry.register(components::FORECAST).await;

    let compute = Arc::new(
        SimulatedCompute::new()
            .with_transition_delay(Duration::from_secs(2))
            .with_instance("web-1", ZONE, "e2-standard-4", InstanceStatus::Running)
            .with_instance("batch-1", ZONE, "n2-standard-8", InstanceStatus::Running),
    );
    let forecasts = Arc::new(
        StaticForecastProvider::new()
            .with_series("web-1", vec![10.0; 7], vec![20.0; 7])
            .with_series("batch-1", vec![75.0; 7], vec![60.0; 7])
            .with_series("ghost", vec![5.0; 7], vec![5.0; 7]),
    );
    let config = MigrationConfig {
        poll_interval_secs: 1,
        poll_timeout_secs: 30,
        ..MigrationConfig::default()
    };
    let orchestrator = Arc::new(SafeMigrationOrchestrator::with_compute(
        config,
        compute.clone(),
        forecasts,
    ));

    let state = Arc::new(AppState::new(
        health_registry,
        ExecutorMetrics::new(),
        orchestrator,
    ));
    let router = create_router(state.clone());

    (router, state, compute)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_healthz_returns_ok_when_healthy() {
    let (app, _state, _) = setup_test_app().await;

    let response = app.oneshot(get("/healthz")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let health = body_json(response).await;
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["components"]["compute"]["status"], "healthy");
}

#[tokio::test]
async fn test_healthz_returns_ok_when_degraded() {
    let (app, state, _) = setup_test_app().await;

    state
        .health_registry
        .set_degraded(components::COMPUTE, "critical failure on web-1")
        .await;

    let response = app.oneshot(get("/healthz")).await.unwrap();

    // Degraded still returns 200 (operational)
    assert_eq!(response.status(), StatusCode::OK);
    let health = body_json(response).await;
    assert_eq!(health["status"], "degraded");
}

#[tokio::test]
async fn test_healthz_returns_503_when_unhealthy() {
    let (app, state, _) = setup_test_app().await;

    state
        .health_registry
        .set_unhealthy(components::COMPUTE, "credentials rejected")
        .await;

    let response = app.oneshot(get("/healthz")).await.unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let health = body_json(response).await;
    assert_eq!(health["status"], "unhealthy");
}

#[tokio::test]
async fn test_readyz_returns_503_when_not_ready() {
    let (app, _state, _) = setup_test_app().await;

    let response = app.oneshot(get("/readyz")).await.unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let readiness = body_json(response).await;
    assert_eq!(readiness["ready"], false);
}

#[tokio::test]
async fn test_readyz_returns_ok_when_ready() {
    let (app, state, _) = setup_test_app().await;
    state.health_registry.set_ready(true);

    let response = app.oneshot(get("/readyz")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let readiness = body_json(response).await;
    assert_eq!(readiness["ready"], true);
}

#[tokio::test]
async fn test_metrics_endpoint_exposes_executor_metrics() {
    let (app, _state, _) = setup_test_app().await;

    let response = app.oneshot(get("/metrics")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.starts_with("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("safe_executor_status_polls_total"));
}

#[tokio::test(start_paused = true)]
async fn test_migration_success() {
    let (app, _state, compute) = setup_test_app().await;

    let response = app
        .oneshot(post_json(
            "/api/v1/migrations",
            json!({"instance_id": "web-1", "current_type": "e2-standard-4", "target_type": "e2-small"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let result = body_json(response).await;
    assert_eq!(result["status"], "SUCCESS");
    assert_eq!(result["avg_cpu"], 10.0);
    assert_eq!(result["avg_mem"], 20.0);
    assert_eq!(result["strategy"], "in_place");
    assert_eq!(
        compute.instance("web-1").await.unwrap().machine_type,
        "e2-small"
    );
}

#[tokio::test(start_paused = true)]
async fn test_snapshot_migration_reports_new_instance() {
    let (app, _state, compute) = setup_test_app().await;

    let response = app
        .oneshot(post_json(
            "/api/v1/migrations",
            json!({"instance_id": "web-1", "target_type": "e2-small", "strategy": "snapshot"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let result = body_json(response).await;
    assert_eq!(result["status"], "SUCCESS");
    let new_id = result["new_instance_id"].as_str().unwrap();
    assert!(compute.instance(new_id).await.is_some());
    assert!(compute.instance("web-1").await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_migration_completes_after_client_disconnects() {
    let (app, state, compute) = setup_test_app().await;
    state
        .health_registry
        .set_degraded(components::FORECAST, "stale forecast")
        .await;

    // Client gives up while the instance is still stopping
    let response = tokio::time::timeout(
        Duration::from_millis(1500),
        app.oneshot(post_json(
            "/api/v1/migrations",
            json!({"instance_id": "web-1", "target_type": "e2-small"}),
        )),
    )
    .await;
    assert!(response.is_err());
    assert_eq!(state.orchestrator.active_migrations(), vec!["web-1"]);

    for _ in 0..120 {
        let health = state.health_registry.health().await;
        if health.components[components::FORECAST].status == ComponentStatus::Healthy {
            break;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    assert!(state.orchestrator.active_migrations().is_empty());
    let instance = compute.instance("web-1").await.unwrap();
    assert_eq!(instance.status, InstanceStatus::Running);
    assert_eq!(instance.machine_type, "e2-small");
    let health = state.health_registry.health().await;
    assert_eq!(
        health.components[components::FORECAST].status,
        ComponentStatus::Healthy
    );
}

#[tokio::test]
async fn test_unsafe_migration_is_ok_without_changes() {
    let (app, _state, compute) = setup_test_app().await;

    let response = app
        .oneshot(post_json(
            "/api/v1/migrations",
            json!({"instance_id": "batch-1", "target_type": "n2-standard-2"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let result = body_json(response).await;
    assert_eq!(result["status"], "UNSAFE");
    assert_eq!(result["avg_cpu"], 75.0);
    assert!(compute.calls().await.is_empty());
}

#[tokio::test]
async fn test_failed_migration_is_bad_gateway() {
    let (app, _state, _) = setup_test_app().await;

    let response = app
        .oneshot(post_json(
            "/api/v1/migrations",
            json!({"instance_id": "ghost", "target_type": "e2-small"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let result = body_json(response).await;
    assert_eq!(result["status"], "FAILED");
    assert_eq!(result["failed_step"], "resolve_zone");
    assert!(result["error"].as_str().unwrap().contains("ghost"));
}

#[tokio::test]
async fn test_missing_forecast_degrades_forecast_component() {
    let (app, state, _) = setup_test_app().await;

    let response = app
        .oneshot(post_json(
            "/api/v1/migrations",
            json!({"instance_id": "unknown-vm", "target_type": "e2-small"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let result = body_json(response).await;
    assert_eq!(result["failed_step"], "forecast");

    let health = state.health_registry.health().await;
    assert_eq!(
        health.components[components::FORECAST].status,
        ComponentStatus::Degraded
    );
}

#[tokio::test]
async fn test_malformed_migration_request_is_400() {
    let (app, _state, _) = setup_test_app().await;

    let response = app
        .clone()
        .oneshot(post_json("/api/v1/migrations", json!({"instance_id": "web-1"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["code"], "invalid_request");

    let response = app
        .oneshot(post_json(
            "/api/v1/migrations",
            json!({"instance_id": "web-1", "target_type": "e2-small", "target_zone": "us-east1-b"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["code"], "invalid_input");
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_migration_is_conflict() {
    let (app, state, _) = setup_test_app().await;

    let request = json!({"instance_id": "web-1", "target_type": "e2-small"});
    let first = tokio::spawn(
        app.clone()
            .oneshot(post_json("/api/v1/migrations", request.clone())),
    );
    while state.orchestrator.active_migrations().is_empty() {
        tokio::task::yield_now().await;
    }

    let response = app
        .clone()
        .oneshot(get("/api/v1/migrations/active"))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["instances"], json!(["web-1"]));

    let second = app
        .oneshot(post_json("/api/v1/migrations", request))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(second).await["code"], "migration_in_progress");

    let first = first.await.unwrap().unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert!(state.orchestrator.active_migrations().is_empty());
}

#[tokio::test]
async fn test_evaluate_endpoint() {
    let (app, _state, _) = setup_test_app().await;

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/v1/safety/evaluate",
            json!({"cpu": [10, 10, 10, 10, 10, 10, 10], "memory": [20, 20, 20, 20, 20, 20, 20]}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let verdict = body_json(response).await;
    assert_eq!(verdict["safe"], true);
    assert_eq!(verdict["avg_cpu"], 10.0);
    assert_eq!(verdict["avg_mem"], 20.0);

    let response = app
        .oneshot(post_json(
            "/api/v1/safety/evaluate",
            json!({"cpu": [10, 10, 10], "memory": [20, 20, 20, 20, 20, 20, 20]}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[test]
fn test_status_codes_per_outcome() {
    assert_eq!(status_code_for(MigrationStatus::Success), StatusCode::OK);
    assert_eq!(status_code_for(MigrationStatus::Unsafe), StatusCode::OK);
    assert_eq!(status_code_for(MigrationStatus::Failed), StatusCode::BAD_GATEWAY);
    assert_eq!(
        status_code_for(MigrationStatus::CriticalFailure),
        StatusCode::INTERNAL_SERVER_ERROR
    );
}
