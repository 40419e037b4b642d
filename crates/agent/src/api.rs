//! HTTP API for migrations, health checks and Prometheus metrics

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use executor_lib::{
    health::{ComponentStatus, HealthRegistry},
    observability::ExecutorMetrics,
    ExecutorError, MigrationStatus, MigrationStrategy, Recommendation, SafeMigrationOrchestrator,
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: ExecutorMetrics,
    pub orchestrator: Arc<SafeMigrationOrchestrator>,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        metrics: ExecutorMetrics,
        orchestrator: Arc<SafeMigrationOrchestrator>,
    ) -> Self {
        Self {
            health_registry,
            metrics,
            orchestrator,
        }
    }
}

/// Body of `POST /api/v1/migrations`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationRequest {
    pub instance_id: String,
    #[serde(default)]
    pub current_type: Option<String>,
    pub target_type: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub target_zone: Option<String>,
    #[serde(default)]
    pub strategy: Option<MigrationStrategy>,
}

/// Body of `POST /api/v1/safety/evaluate`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluateRequest {
    pub cpu: Vec<f64>,
    pub memory: Vec<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ActiveMigrations {
    pub instances: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
}

fn error_response(status: StatusCode, code: &str, error: impl ToString) -> Response {
    (
        status,
        Json(ErrorBody {
            error: error.to_string(),
            code: code.to_string(),
        }),
    )
        .into_response()
}

fn rejected(err: ExecutorError) -> Response {
    let status = match &err {
        ExecutorError::MigrationInProgress(_) => StatusCode::CONFLICT,
        ExecutorError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, err.kind(), &err)
}

/// HTTP status reported for each terminal migration status
pub fn status_code_for(status: MigrationStatus) -> StatusCode {
    match status {
        MigrationStatus::Success | MigrationStatus::Unsafe => StatusCode::OK,
        MigrationStatus::Failed => StatusCode::BAD_GATEWAY,
        MigrationStatus::CriticalFailure => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "metrics_encoding", e);
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Run one migration to completion
async fn create_migration(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<MigrationRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            return error_response(StatusCode::BAD_REQUEST, "invalid_request", rejection.body_text())
        }
    };

    info!(
        event = "migration_requested",
        instance_id = %request.instance_id,
        target_type = %request.target_type,
        "Migration request received"
    );

    let mut plan = state.orchestrator.plan(Recommendation {
        instance_id: request.instance_id,
        current_type: request.current_type,
        target_type: request.target_type,
        region: request.region,
    });
    if let Some(strategy) = request.strategy {
        plan = plan.with_strategy(strategy);
    }
    if let Some(zone) = request.target_zone {
        plan = plan.with_target_zone(zone);
    }

    // Detached so a dropped connection cannot cancel a migration midway
    let task_state = state.clone();
    let migration = tokio::spawn(async move {
        let result = task_state.orchestrator.execute(plan).await;
        if let Ok(result) = &result {
            task_state.health_registry.record_result(result).await;
        }
        result
    });

    match migration.await {
        Ok(Ok(result)) => (status_code_for(result.status), Json(result)).into_response(),
        Ok(Err(err)) => {
            warn!(error = %err, code = err.kind(), "Migration request rejected");
            rejected(err)
        }
        Err(err) => {
            error!(error = %err, "Migration task aborted");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal", err)
        }
    }
}

async fn active_migrations(State(state): State<Arc<AppState>>) -> Json<ActiveMigrations> {
    Json(ActiveMigrations {
        instances: state.orchestrator.active_migrations(),
    })
}

/// Evaluate a forecast without migrating anything
async fn evaluate_safety(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<EvaluateRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            return error_response(StatusCode::BAD_REQUEST, "invalid_request", rejection.body_text())
        }
    };

    match state
        .orchestrator
        .evaluator()
        .evaluate(&request.cpu, &request.memory)
    {
        Ok(verdict) => {
            state.metrics.inc_safety_verdict(verdict.safe);
            (StatusCode::OK, Json(verdict)).into_response()
        }
        Err(err) => rejected(err),
    }
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/v1/migrations", post(create_migration))
        .route("/api/v1/migrations/active", get(active_migrations))
        .route("/api/v1/safety/evaluate", post(evaluate_safety))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
