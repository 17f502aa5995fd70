use crate::analyzers::aggregate::aggregate_usage;
use crate::analyzers::anomaly::detect_anomalies;
use crate::analyzers::forecast::forecast_usage;
use crate::analyzers::recommend::generate_recommendations;
use crate::analyzers::types::{AggregationResult, AnomalyResult, ForecastResult};
use crate::config::ReportConfig;
use crate::records::UsageRecord;
use serde::Serialize;
use tracing::info;

/// Everything the renderer needs from the analytics stage.
#[derive(Debug, Clone, Serialize)]
pub struct UsageAnalysis {
    pub aggregation: AggregationResult,
    pub anomalies: AnomalyResult,
    pub forecast: ForecastResult,
    pub recommendations: Vec<String>,
}

/// Runs aggregation, anomaly detection, forecasting and recommendations, in
/// that order, over timestamp-sorted records.
#[tracing::instrument(skip_all, fields(records = records.len()))]
pub fn analyze_usage(records: &[UsageRecord], config: &ReportConfig) -> UsageAnalysis {
    let aggregation = aggregate_usage(records, &config.tariff, config.trend_interval);
    let anomalies = detect_anomalies(records, &config.anomaly);
    let forecast = forecast_usage(records, &config.tariff, &config.forecast);
    let recommendations = generate_recommendations(
        &aggregation,
        Some(&anomalies),
        Some(&forecast),
        &config.recommendations,
        &config.currency,
    );

    info!(
        total_energy = aggregation.total_energy,
        total_cost = aggregation.total_cost,
        anomalies = anomalies.anomalies.len(),
        anomaly_status = anomalies.message().unwrap_or("computed"),
        forecast_status = forecast.message().unwrap_or("computed"),
        recommendations = recommendations.len(),
        "Usage analysis complete"
    );

    UsageAnalysis {
        aggregation,
        anomalies,
        forecast,
        recommendations,
    }
}
