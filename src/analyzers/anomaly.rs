//! Statistical outlier detection on per-device daily totals.
//!
//! A day is anomalous when its total exceeds `mean + k * stddev` of that
//! device's daily totals. Devices with fewer than three days, or with no
//! variation at all, are never flagged.

use crate::analyzers::types::{
    AnalysisStatus, Anomaly, AnomalyResult, DailyObservation, Severity,
};
use crate::analyzers::utility::{mean, sample_stddev};
use crate::records::UsageRecord;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

const MIN_POINTS_PER_DEVICE: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    pub min_records: usize,
    pub min_days: usize,
    pub sigma_multiplier: f64,
    pub high_multiplier: f64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            min_records: 10,
            min_days: 3,
            sigma_multiplier: 3.0,
            high_multiplier: 1.5,
        }
    }
}

/// `high` when the observation clears the threshold by the configured multiple.
pub fn classify_severity(observed: f64, threshold: f64, high_multiplier: f64) -> Severity {
    if observed > high_multiplier * threshold {
        Severity::High
    } else {
        Severity::Medium
    }
}

pub fn detect_anomalies(records: &[UsageRecord], config: &AnomalyConfig) -> AnomalyResult {
    if records.len() < config.min_records {
        return AnomalyResult::insufficient(format!(
            "Anomaly detection needs at least {} usage records, got {}",
            config.min_records,
            records.len()
        ));
    }

    // (device, date) -> daily total; BTreeMap keeps dates ascending per device
    let mut daily: BTreeMap<&str, BTreeMap<NaiveDate, f64>> = BTreeMap::new();
    let mut days: BTreeSet<NaiveDate> = BTreeSet::new();
    for r in records {
        *daily
            .entry(r.device_id.as_str())
            .or_default()
            .entry(r.date())
            .or_default() += r.energy_consumed;
        days.insert(r.date());
    }

    if days.len() < config.min_days {
        return AnomalyResult::insufficient(format!(
            "Anomaly detection needs at least {} days of data, got {}",
            config.min_days,
            days.len()
        ));
    }

    let mut anomalies = Vec::new();
    let mut observations = Vec::new();

    for (device, series) in &daily {
        let values: Vec<f64> = series.values().copied().collect();
        let threshold = if values.len() >= MIN_POINTS_PER_DEVICE {
            let mu = mean(&values);
            let sigma = sample_stddev(&values, mu);
            // constant usage is not anomalous
            (sigma > 0.0).then(|| mu + config.sigma_multiplier * sigma)
        } else {
            None
        };

        for (date, energy) in series {
            let exceeded = threshold.filter(|t| energy > t);
            if let Some(t) = exceeded {
                anomalies.push(Anomaly {
                    date: *date,
                    device_id: device.to_string(),
                    observed: *energy,
                    threshold: t,
                    severity: classify_severity(*energy, t, config.high_multiplier),
                });
            }
            observations.push(DailyObservation {
                date: *date,
                device_id: device.to_string(),
                energy: *energy,
                is_anomaly: exceeded.is_some(),
            });
        }
    }

    anomalies.sort_by(|a, b| {
        severity_rank(b.severity)
            .cmp(&severity_rank(a.severity))
            .then(b.date.cmp(&a.date))
            .then_with(|| a.device_id.cmp(&b.device_id))
    });
    observations.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.device_id.cmp(&b.device_id)));

    debug!(
        devices = daily.len(),
        days = days.len(),
        anomalies = anomalies.len(),
        "Anomaly detection finished"
    );

    AnomalyResult {
        anomalies,
        observations,
        status: AnalysisStatus::Computed,
    }
}

fn severity_rank(s: Severity) -> u8 {
    match s {
        Severity::Medium => 0,
        Severity::High => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDateTime};

    fn day(offset: i64) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
            + Duration::days(offset)
    }

    fn daily_series(device: &str, values: &[f64]) -> Vec<UsageRecord> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| UsageRecord::new(day(i as i64), device, *v))
            .collect()
    }

    #[test]
    fn test_floor_below_min_records() {
        let records = daily_series("d1", &[1.0; 9]);
        let result = detect_anomalies(&records, &AnomalyConfig::default());
        assert!(result.is_empty());
        assert!(!result.message().unwrap().is_empty());
    }

    #[test]
    fn test_runs_at_ten_records() {
        let records = daily_series("d1", &[1.0, 2.0, 1.5, 1.2, 1.1, 1.3, 1.4, 1.0, 1.2, 9.0]);
        let result = detect_anomalies(&records, &AnomalyConfig::default());
        assert_eq!(result.status, AnalysisStatus::Computed);
        assert_eq!(result.observations.len(), 10);
    }

    #[test]
    fn test_requires_three_days() {
        // twelve records spread over two days
        let records: Vec<_> = (0..12)
            .map(|i| UsageRecord::new(day(i % 2), "d1", 1.0))
            .collect();
        let result = detect_anomalies(&records, &AnomalyConfig::default());
        assert!(matches!(result.status, AnalysisStatus::InsufficientData { .. }));
    }

    #[test]
    fn test_constant_series_has_no_anomalies() {
        let records = daily_series("d1", &[5.0; 30]);
        let result = detect_anomalies(&records, &AnomalyConfig::default());
        assert_eq!(result.status, AnalysisStatus::Computed);
        assert!(result.is_empty());
    }

    #[test]
    fn test_single_spike_is_high() {
        let mut values = vec![5.0; 30];
        values[20] = 200.0;
        let records = daily_series("d1", &values);
        let result = detect_anomalies(&records, &AnomalyConfig::default());

        assert_eq!(result.anomalies.len(), 1);
        let a = &result.anomalies[0];
        assert_eq!(a.date, day(20).date());
        assert_eq!(a.severity, Severity::High);
        assert!(a.observed > a.threshold);
        assert_eq!(result.observations.iter().filter(|o| o.is_anomaly).count(), 1);
    }

    #[test]
    fn test_ordering_high_first_then_latest() {
        let mut a = vec![5.0; 30];
        a[3] = 200.0;
        let mut b = vec![5.0; 30];
        b[25] = 200.0;
        let mut records = daily_series("a", &a);
        records.extend(daily_series("b", &b));
        records.sort_by_key(|r| r.timestamp);

        let result = detect_anomalies(&records, &AnomalyConfig::default());
        let dates: Vec<_> = result.anomalies.iter().map(|x| x.date).collect();
        assert_eq!(dates, vec![day(25).date(), day(3).date()]);
    }

    #[test]
    fn test_mixed_severities_order_high_before_later_medium() {
        let wobble: Vec<f64> = (0..30).map(|i| if i % 2 == 0 { 4.0 } else { 6.0 }).collect();
        let mut early_high = vec![5.0; 30];
        early_high[3] = 200.0;
        let mut late_medium = wobble.clone();
        late_medium[25] = 12.0;
        let mut mid_medium = wobble;
        mid_medium[10] = 12.0;

        let mut records = daily_series("heater", &early_high);
        records.extend(daily_series("kettle", &late_medium));
        records.extend(daily_series("dryer", &mid_medium));
        records.sort_by_key(|r| r.timestamp);

        let result = detect_anomalies(&records, &AnomalyConfig::default());
        let order: Vec<_> = result
            .anomalies
            .iter()
            .map(|a| (a.device_id.as_str(), a.date, a.severity))
            .collect();
        assert_eq!(
            order,
            vec![
                ("heater", day(3).date(), Severity::High),
                ("kettle", day(25).date(), Severity::Medium),
                ("dryer", day(10).date(), Severity::Medium),
            ]
        );
    }

    #[test]
    fn test_classify_severity() {
        assert_eq!(classify_severity(16.0, 10.0, 1.5), Severity::High);
        assert_eq!(classify_severity(15.0, 10.0, 1.5), Severity::Medium);
        assert_eq!(classify_severity(11.0, 10.0, 1.5), Severity::Medium);
    }
}
