//! Migration safety evaluation
//!
//! Decides whether downsizing an instance is safe from its weekly
//! utilization forecast. The thresholds match the underutilization
//! criteria used by the recommendation engine, so a forecast is only
//! comparable when it covers exactly the fixed horizon.

use crate::config::{MigrationConfig, DEFAULT_CPU_THRESHOLD, DEFAULT_MEM_THRESHOLD};
use crate::error::{ExecutorError, ExecutorResult};
use crate::models::{SafetyVerdict, UtilizationForecast, FORECAST_HORIZON_DAYS};

/// Pure threshold evaluator
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SafetyEvaluator {
    cpu_threshold: f64,
    mem_threshold: f64,
}

impl Default for SafetyEvaluator {
    fn default() -> Self {
        Self::new(DEFAULT_CPU_THRESHOLD, DEFAULT_MEM_THRESHOLD)
    }
}

impl SafetyEvaluator {
    pub fn new(cpu_threshold: f64, mem_threshold: f64) -> Self {
        Self {
            cpu_threshold,
            mem_threshold,
        }
    }

    pub fn from_config(config: &MigrationConfig) -> Self {
        Self::new(config.cpu_threshold, config.mem_threshold)
    }

    /// Average both series and compare against the thresholds.
    ///
    /// Safe iff avg_cpu < cpu_threshold and avg_mem < mem_threshold.
    pub fn evaluate(&self, cpu_series: &[f64], mem_series: &[f64]) -> ExecutorResult<SafetyVerdict> {
        let avg_cpu = horizon_mean("cpu", cpu_series)?;
        let avg_mem = horizon_mean("memory", mem_series)?;

        Ok(SafetyVerdict {
            safe: avg_cpu < self.cpu_threshold && avg_mem < self.mem_threshold,
            avg_cpu,
            avg_mem,
        })
    }

    pub fn is_safe(&self, cpu_series: &[f64], mem_series: &[f64]) -> ExecutorResult<bool> {
        self.evaluate(cpu_series, mem_series).map(|v| v.safe)
    }

    pub fn evaluate_forecast(&self, forecast: &UtilizationForecast) -> ExecutorResult<SafetyVerdict> {
        self.evaluate(&forecast.cpu_series(), &forecast.memory_series())
    }
}

fn horizon_mean(name: &str, series: &[f64]) -> ExecutorResult<f64> {
    if series.len() != FORECAST_HORIZON_DAYS {
        return Err(ExecutorError::InvalidInput(format!(
            "{} forecast must cover {} days, got {}",
            name,
            FORECAST_HORIZON_DAYS,
            series.len()
        )));
    }
    Ok(series.iter().sum::<f64>() / FORECAST_HORIZON_DAYS as f64)
}
