//! Utilization forecast collaborators
//!
//! The orchestrator asks a [`ForecastProvider`] for a seven-day cpu and
//! memory forecast. Missing or malformed data comes back as a
//! [`ForecastError`] value so the caller can classify the failure.

use crate::error::ExecutorError;
use crate::models::{UtilizationForecast, FORECAST_HORIZON_DAYS};
use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Why a forecast could not be produced
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ForecastError {
    #[error("no forecast data for {0}")]
    NoData(String),

    #[error("malformed forecast: {0}")]
    Malformed(String),

    #[error("forecast service unavailable: {0}")]
    Unavailable(String),
}

impl From<ForecastError> for ExecutorError {
    fn from(err: ForecastError) -> Self {
        ExecutorError::Forecast(err.to_string())
    }
}

/// Source of per-instance utilization forecasts
#[async_trait]
pub trait ForecastProvider: Send + Sync {
    async fn get_forecast(&self, instance_id: &str) -> Result<UtilizationForecast, ForecastError>;
}

/// Wire shape of a forecast response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastPayload {
    pub cpu: Vec<f64>,
    pub memory: Vec<f64>,
}

impl ForecastPayload {
    fn into_forecast(self, instance_id: &str) -> Result<UtilizationForecast, ForecastError> {
        if self.cpu.is_empty() && self.memory.is_empty() {
            return Err(ForecastError::NoData(instance_id.to_string()));
        }
        UtilizationForecast::from_series(instance_id, &self.cpu, &self.memory)
            .map_err(|e| ForecastError::Malformed(e.to_string()))
    }
}

/// Forecast service client
pub struct HttpForecastProvider {
    client: Client,
    base_url: Url,
}

impl HttpForecastProvider {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, ForecastError> {
        let base_url = Url::parse(endpoint)
            .map_err(|e| ForecastError::Unavailable(format!("invalid forecast endpoint: {}", e)))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ForecastError::Unavailable(e.to_string()))?;
        Ok(Self { client, base_url })
    }
}

#[async_trait]
impl ForecastProvider for HttpForecastProvider {
    async fn get_forecast(&self, instance_id: &str) -> Result<UtilizationForecast, ForecastError> {
        let url = self
            .base_url
            .join(&format!("api/v1/forecast/{}", instance_id))
            .map_err(|e| ForecastError::Unavailable(e.to_string()))?;

        debug!(instance_id = %instance_id, url = %url, "Requesting forecast");
        let response = self
            .client
            .get(url)
            .query(&[("horizon_days", FORECAST_HORIZON_DAYS.to_string())])
            .send()
            .await
            .map_err(|e| ForecastError::Unavailable(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => return Err(ForecastError::NoData(instance_id.to_string())),
            status if !status.is_success() => {
                let body = response.text().await.unwrap_or_default();
                return Err(ForecastError::Unavailable(format!("{}: {}", status, body)));
            }
            _ => {}
        }

        let payload: ForecastPayload = response
            .json()
            .await
            .map_err(|e| ForecastError::Malformed(e.to_string()))?;
        payload.into_forecast(instance_id)
    }
}

/// In-memory forecasts keyed by instance id
#[derive(Debug, Default)]
pub struct StaticForecastProvider {
    series: DashMap<String, ForecastPayload>,
}

impl StaticForecastProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_series(self, instance_id: &str, cpu: Vec<f64>, memory: Vec<f64>) -> Self {
        self.insert(instance_id, cpu, memory);
        self
    }

    pub fn insert(&self, instance_id: &str, cpu: Vec<f64>, memory: Vec<f64>) {
        self.series
            .insert(instance_id.to_string(), ForecastPayload { cpu, memory });
    }
}

#[async_trait]
impl ForecastProvider for StaticForecastProvider {
    async fn get_forecast(&self, instance_id: &str) -> Result<UtilizationForecast, ForecastError> {
        let payload = self
            .series
            .get(instance_id)
            .map(|p| p.value().clone())
            .ok_or_else(|| ForecastError::NoData(instance_id.to_string()))?;
        payload.into_forecast(instance_id)
    }
}
