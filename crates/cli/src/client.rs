//! API client for communicating with the safe executor service

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use url::Url;

/// Errors reported by the executor API
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("API error ({status}): {message}")]
    Api {
        status: StatusCode,
        code: Option<String>,
        message: String,
    },

    #[error("unexpected response ({status}): {body}")]
    UnexpectedBody { status: StatusCode, body: String },
}

/// API client for the safe executor
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        // Long enough for a migration to run to completion
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(3600))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    /// Submit a migration and wait for its terminal result.
    ///
    /// FAILED and CRITICAL_FAILURE results arrive with 5xx codes but still
    /// carry a result body, so they are returned as `Ok`.
    pub async fn migrate(&self, request: &MigrationRequest) -> Result<MigrationResult> {
        let url = self.url("api/v1/migrations")?;
        let response = self
            .client
            .post(url)
            .json(request)
            .send()
            .await
            .context("Failed to send request")?;

        let status = response.status();
        let body = response.text().await.context("Failed to read response")?;
        if let Ok(result) = serde_json::from_str::<MigrationResult>(&body) {
            return Ok(result);
        }
        Err(api_error(status, body).into())
    }

    pub async fn evaluate(&self, request: &EvaluateRequest) -> Result<SafetyVerdict> {
        self.post("api/v1/safety/evaluate", request).await
    }

    pub async fn active(&self) -> Result<ActiveMigrations> {
        self.get("api/v1/migrations/active").await
    }

    /// Fetch service health; an unhealthy service answers 503 with a body
    pub async fn health(&self) -> Result<HealthResponse> {
        let url = self.url("healthz")?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        let status = response.status();
        if status.is_success() || status == StatusCode::SERVICE_UNAVAILABLE {
            return response.json().await.context("Failed to parse response");
        }
        let body = response.text().await.unwrap_or_default();
        Err(api_error(status, body).into())
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).context("Invalid path")
    }

    /// Make a GET request
    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .client
            .get(self.url(path)?)
            .send()
            .await
            .context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(api_error(status, body).into());
        }

        response.json().await.context("Failed to parse response")
    }

    /// Make a POST request with JSON body
    async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let response = self
            .client
            .post(self.url(path)?)
            .json(body)
            .send()
            .await
            .context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(api_error(status, body).into());
        }

        response.json().await.context("Failed to parse response")
    }
}

fn api_error(status: StatusCode, body: String) -> ClientError {
    match serde_json::from_str::<ErrorResponse>(&body) {
        Ok(error) => ClientError::Api {
            status,
            code: error.code,
            message: error.error,
        },
        Err(_) => ClientError::UnexpectedBody { status, body },
    }
}

// API request and response types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationRequest {
    pub instance_id: String,
    pub target_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_zone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationResult {
    pub instance_id: String,
    pub strategy: String,
    pub target_machine_type: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safe: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_cpu: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_mem: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_instance_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_known_state: Option<LastKnownState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleanup: Option<Cleanup>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub message: String,
    pub finished_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastKnownState {
    pub instance_id: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cleanup {
    pub outcome: String,
    pub instance_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluateRequest {
    pub cpu: Vec<f64>,
    pub memory: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyVerdict {
    pub safe: bool,
    pub avg_cpu: f64,
    pub avg_mem: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveMigrations {
    pub instances: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub components: BTreeMap<String, ComponentHealth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}
