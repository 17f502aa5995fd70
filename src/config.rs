//! Report pipeline configuration.
//!
//! Stored as a JSON object on disk; every field is optional:
//! ```json
//! {
//!   "output_dir": "reports",
//!   "tariff": { "kind": "flat", "rate": 0.23 },
//!   "trend_interval": "week",
//!   "forecast": { "method": "holt", "days_ahead": 14 }
//! }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::analyzers::anomaly::AnomalyConfig;
use crate::analyzers::forecast::ForecastConfig;
use crate::analyzers::recommend::RecommendationConfig;
use crate::analyzers::tariff::TariffSchedule;
use crate::analyzers::types::TrendInterval;
use crate::error::ReportError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Directory rendered reports are written to.
    pub output_dir: PathBuf,
    /// SQLite file backing the job store.
    pub database_path: PathBuf,
    pub tariff: TariffSchedule,
    pub currency: String,
    pub trend_interval: TrendInterval,
    pub anomaly: AnomalyConfig,
    pub forecast: ForecastConfig,
    pub recommendations: RecommendationConfig,
    pub max_concurrent_jobs: usize,
    /// Jobs stuck in `generating` longer than this are failed by recovery.
    pub stale_job_timeout_secs: u64,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("reports"),
            database_path: PathBuf::from("data/report_jobs.db"),
            tariff: TariffSchedule::default(),
            currency: "AED".to_string(),
            trend_interval: TrendInterval::Day,
            anomaly: AnomalyConfig::default(),
            forecast: ForecastConfig::default(),
            recommendations: RecommendationConfig::default(),
            max_concurrent_jobs: 4,
            stale_job_timeout_secs: 3600,
        }
    }
}

impl ReportConfig {
    /// Loads the config from a JSON file at `path`.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read report config '{path}'"))?;
        let config: ReportConfig = serde_json::from_str(&content)
            .with_context(|| format!("invalid report config '{path}'"))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults (or the file named by `REPORT_CONFIG`) with environment overrides:
    /// `REPORTS_DIR`, `REPORT_DB_PATH`, `REPORT_MAX_CONCURRENT_JOBS`.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var("REPORT_CONFIG") {
            Ok(path) => Self::load(&path)?,
            Err(_) => Self::default(),
        };

        if let Ok(dir) = std::env::var("REPORTS_DIR") {
            config.output_dir = PathBuf::from(dir);
        }
        if let Ok(db) = std::env::var("REPORT_DB_PATH") {
            config.database_path = PathBuf::from(db);
        }
        if let Ok(n) = std::env::var("REPORT_MAX_CONCURRENT_JOBS") {
            config.max_concurrent_jobs = n.parse().with_context(|| {
                format!("REPORT_MAX_CONCURRENT_JOBS must be a number, got '{n}'")
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> std::result::Result<(), ReportError> {
        self.tariff.validate()?;

        if self.max_concurrent_jobs == 0 {
            return Err(ReportError::invalid("max_concurrent_jobs must be at least 1"));
        }
        if self.forecast.days_ahead == 0 || self.forecast.window == 0 {
            return Err(ReportError::invalid("forecast days_ahead and window must be at least 1"));
        }
        let unit = |v: f64| v > 0.0 && v <= 1.0;
        if !unit(self.forecast.alpha) || !unit(self.forecast.beta) {
            return Err(ReportError::invalid("forecast alpha and beta must be in (0, 1]"));
        }
        if self.anomaly.sigma_multiplier <= 0.0 || self.anomaly.high_multiplier < 1.0 {
            return Err(ReportError::invalid(
                "anomaly sigma_multiplier must be > 0 and high_multiplier >= 1",
            ));
        }
        Ok(())
    }
}
