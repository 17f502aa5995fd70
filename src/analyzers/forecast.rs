//! Near-term daily consumption forecast.
//!
//! The trailing moving average is the baseline and the degrade-to path: if
//! the Holt model is selected but produces unusable output, the forecast
//! silently falls back to it and records why.

use crate::analyzers::tariff::TariffSchedule;
use crate::analyzers::types::{
    AnalysisStatus, ForecastMethod, ForecastPoint, ForecastResult, PointKind,
};
use crate::analyzers::utility::mean;
use crate::records::UsageRecord;
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    pub min_records: usize,
    pub min_days: usize,
    pub days_ahead: u32,
    /// Trailing days averaged by the moving-average model.
    pub window: usize,
    pub method: ForecastMethod,
    /// Holt level smoothing factor.
    pub alpha: f64,
    /// Holt trend smoothing factor.
    pub beta: f64,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            min_records: 14,
            min_days: 7,
            days_ahead: 7,
            window: 7,
            method: ForecastMethod::MovingAverage,
            alpha: 0.5,
            beta: 0.3,
        }
    }
}

/// Sums records per calendar day, ascending. Days without records are absent.
pub fn daily_totals(records: &[UsageRecord]) -> Vec<(NaiveDate, f64)> {
    let mut days: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    for r in records {
        *days.entry(r.date()).or_default() += r.energy_consumed;
    }
    days.into_iter().collect()
}

pub fn forecast_usage(
    records: &[UsageRecord],
    tariff: &TariffSchedule,
    config: &ForecastConfig,
) -> ForecastResult {
    if records.len() < config.min_records {
        return ForecastResult::insufficient(format!(
            "Forecasting needs at least {} usage records, got {}",
            config.min_records,
            records.len()
        ));
    }

    let series = daily_totals(records);
    if series.len() < config.min_days {
        return ForecastResult::insufficient(format!(
            "Forecasting needs at least {} days of data, got {}",
            config.min_days,
            series.len()
        ));
    }

    let values: Vec<f64> = series.iter().map(|(_, v)| *v).collect();
    let horizon = config.days_ahead as usize;

    let (estimates, method, status) = match config.method {
        ForecastMethod::MovingAverage => (
            moving_average(&values, config.window, horizon),
            ForecastMethod::MovingAverage,
            AnalysisStatus::Computed,
        ),
        ForecastMethod::Holt => match holt_forecast(&values, config.alpha, config.beta, horizon) {
            Ok(estimates) => (estimates, ForecastMethod::Holt, AnalysisStatus::Computed),
            Err(reason) => {
                warn!(%reason, "Holt forecast unusable, using moving average");
                (
                    moving_average(&values, config.window, horizon),
                    ForecastMethod::MovingAverage,
                    AnalysisStatus::Fallback { reason },
                )
            }
        },
    };

    let mut points: Vec<ForecastPoint> = series
        .iter()
        .map(|(date, value)| ForecastPoint {
            date: *date,
            value: *value,
            kind: PointKind::Historical,
        })
        .collect();

    let Some(&(last, _)) = series.last() else {
        return ForecastResult::insufficient("Forecasting needs at least one day of data");
    };
    points.extend(estimates.iter().enumerate().map(|(i, value)| ForecastPoint {
        date: last + Duration::days(i as i64 + 1),
        value: *value,
        kind: PointKind::Forecast,
    }));

    let total_energy: f64 = estimates.iter().sum();
    debug!(days = series.len(), %method, total_energy, "Forecast computed");

    ForecastResult {
        points,
        total_energy,
        total_cost: tariff.cost(total_energy),
        method: Some(method),
        status,
    }
}

/// Flat continuation of the mean of the trailing `window` values.
fn moving_average(values: &[f64], window: usize, horizon: usize) -> Vec<f64> {
    let start = values.len().saturating_sub(window.max(1));
    let estimate = mean(&values[start..]);
    vec![estimate; horizon]
}

/// Double exponential smoothing. Errors when the fit is not usable as a
/// consumption estimate.
fn holt_forecast(
    values: &[f64],
    alpha: f64,
    beta: f64,
    horizon: usize,
) -> Result<Vec<f64>, String> {
    if values.len() < 2 {
        return Err("Holt model needs at least two observations".to_string());
    }
    if !(alpha > 0.0 && alpha <= 1.0 && beta > 0.0 && beta <= 1.0) {
        return Err(format!("smoothing factors out of range (alpha={alpha}, beta={beta})"));
    }

    let mut level = values[0];
    let mut trend = values[1] - values[0];
    for y in &values[1..] {
        let prev_level = level;
        level = alpha * y + (1.0 - alpha) * (level + trend);
        trend = beta * (level - prev_level) + (1.0 - beta) * trend;
    }

    let estimates: Vec<f64> = (1..=horizon).map(|h| level + h as f64 * trend).collect();
    if estimates.iter().any(|v| !v.is_finite()) {
        return Err("Holt model produced non-finite values".to_string());
    }
    if estimates.iter().any(|v| *v < 0.0) {
        return Err("Holt model projected negative consumption".to_string());
    }
    Ok(estimates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    fn day(offset: i64) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 2, 1)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap()
            + Duration::days(offset)
    }

    fn series(values: &[f64]) -> Vec<UsageRecord> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| UsageRecord::new(day(i as i64), "d1", *v))
            .collect()
    }

    #[test]
    fn test_floor_on_records() {
        let result = forecast_usage(
            &series(&[1.0; 13]),
            &TariffSchedule::flat(0.23),
            &ForecastConfig::default(),
        );
        assert!(result.is_empty());
        assert!(result.points.is_empty());
        assert!(!result.message().unwrap().is_empty());
    }

    #[test]
    fn test_floor_on_days() {
        // twenty records over five days
        let records: Vec<_> = (0..20)
            .map(|i| UsageRecord::new(day(i % 5), "d1", 1.0))
            .collect();
        let result =
            forecast_usage(&records, &TariffSchedule::flat(0.23), &ForecastConfig::default());
        assert!(result.is_empty());
        assert!(result.message().unwrap().contains("days"));
    }

    #[test]
    fn test_moving_average_flat_continuation() {
        let mut values = vec![100.0; 7];
        values.extend([1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
        let result = forecast_usage(
            &series(&values),
            &TariffSchedule::flat(0.5),
            &ForecastConfig::default(),
        );

        let forecast: Vec<_> = result.forecast_points().collect();
        assert_eq!(forecast.len(), 7);
        assert!(forecast.iter().all(|p| (p.value - 4.0).abs() < 1e-9));
        assert_eq!(forecast[0].date, day(14).date());
        assert_eq!(forecast[6].date, day(20).date());
        assert!((result.total_energy - 28.0).abs() < 1e-9);
        assert!((result.total_cost - 14.0).abs() < 1e-9);
        assert_eq!(result.method, Some(ForecastMethod::MovingAverage));
        assert_eq!(result.points.iter().filter(|p| p.kind == PointKind::Historical).count(), 14);
    }

    #[test]
    fn test_holt_follows_trend() {
        let values: Vec<f64> = (1..=14).map(f64::from).collect();
        let config = ForecastConfig {
            method: ForecastMethod::Holt,
            ..ForecastConfig::default()
        };
        let result = forecast_usage(&series(&values), &TariffSchedule::flat(0.23), &config);

        assert_eq!(result.status, AnalysisStatus::Computed);
        assert_eq!(result.method, Some(ForecastMethod::Holt));
        let first = result.forecast_points().next().unwrap().value;
        assert!((first - 15.0).abs() < 1e-6);
    }

    #[test]
    fn test_holt_falls_back_on_negative_projection() {
        let values: Vec<f64> = (0..14).map(|i| 70.0 - 5.0 * f64::from(i)).collect();
        let config = ForecastConfig {
            method: ForecastMethod::Holt,
            days_ahead: 30,
            ..ForecastConfig::default()
        };
        let result = forecast_usage(&series(&values), &TariffSchedule::flat(0.23), &config);

        assert!(matches!(result.status, AnalysisStatus::Fallback { .. }));
        assert_eq!(result.method, Some(ForecastMethod::MovingAverage));
        assert_eq!(result.forecast_points().count(), 30);
    }
}
