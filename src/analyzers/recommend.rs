use crate::analyzers::types::{AggregationResult, AnomalyResult, ForecastResult, Severity};
use serde::{Deserialize, Serialize};

/// Tips every report carries, in display order.
pub const BASELINE_TIPS: [&str; 5] = [
    "Replace incandescent bulbs with LED lighting to cut lighting energy by up to 75%.",
    "Unplug idle electronics or use smart power strips to eliminate standby power draw.",
    "Schedule your thermostat to relax heating and cooling while the home is empty or asleep.",
    "Open blinds and use natural light during the day instead of artificial lighting.",
    "Check insulation and seal drafts around doors and windows to reduce cooling losses.",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommendationConfig {
    /// Share of total energy a device must exceed before it gets a dedicated tip.
    pub min_device_share_percent: f64,
}

impl Default for RecommendationConfig {
    fn default() -> Self {
        Self { min_device_share_percent: 5.0 }
    }
}

/// Builds the ordered tip list: baseline tips, then data-driven additions.
pub fn generate_recommendations(
    aggregation: &AggregationResult,
    anomalies: Option<&AnomalyResult>,
    forecast: Option<&ForecastResult>,
    config: &RecommendationConfig,
    currency: &str,
) -> Vec<String> {
    let mut tips: Vec<String> = BASELINE_TIPS.iter().map(|s| s.to_string()).collect();

    if let Some(top) = aggregation
        .top_device()
        .filter(|d| d.percentage > config.min_device_share_percent)
    {
        tips.push(format!(
            "{} is your top energy consumer at {:.1}% of total usage ({:.2} kWh). \
             Consider an energy-efficient replacement or tighter usage schedule.",
            top.label, top.percentage, top.energy
        ));
    }

    if aggregation.total_energy > 0.0 {
        if let Some(peak) = aggregation.peak_hours(1).first().filter(|h| h.energy > 0.0) {
            tips.push(format!(
                "Your peak usage hour is {:02}:00. Shifting heavy appliances such as washers \
                 and dishwashers away from this hour can lower demand and cost.",
                peak.hour
            ));
        }
    }

    if let Some(result) = anomalies.filter(|a| !a.is_empty()) {
        let latest_high = result
            .anomalies
            .iter()
            .find(|a| a.severity == Severity::High)
            .map(|a| format!(" The most significant spike was on {}.", a.date));
        tips.push(format!(
            "{} unusual consumption day(s) were detected.{} Check for appliances left running \
             or faulty equipment.",
            result.anomalies.len(),
            latest_high.unwrap_or_default()
        ));
    }

    if let Some(result) = forecast.filter(|f| !f.is_empty()) {
        let days = result.forecast_points().count();
        tips.push(format!(
            "At your recent pace you will use about {:.1} kWh ({:.2} {}) over the next {} days.",
            result.total_energy, result.total_cost, currency, days
        ));
    }

    tips
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::aggregate::aggregate_usage;
    use crate::analyzers::tariff::TariffSchedule;
    use crate::analyzers::types::TrendInterval;
    use crate::records::UsageRecord;
    use chrono::NaiveDate;

    fn aggregation(records: &[UsageRecord]) -> AggregationResult {
        aggregate_usage(records, &TariffSchedule::flat(0.23), TrendInterval::Day)
    }

    #[test]
    fn test_baseline_only_without_data() {
        let tips = generate_recommendations(
            &aggregation(&[]),
            None,
            None,
            &RecommendationConfig::default(),
            "AED",
        );
        assert_eq!(tips.len(), BASELINE_TIPS.len());
        assert!(tips[0].contains("LED"));
        assert!(tips[4].contains("insulation"));
    }

    #[test]
    fn test_personalized_tips_in_order() {
        let at = |h| {
            NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(h, 0, 0)
                .unwrap()
        };
        let records = vec![
            UsageRecord::new(at(19), "heater", 9.0),
            UsageRecord::new(at(8), "lamp", 1.0),
        ];
        let tips = generate_recommendations(
            &aggregation(&records),
            None,
            None,
            &RecommendationConfig::default(),
            "AED",
        );

        assert_eq!(tips.len(), 7);
        assert!(tips[5].starts_with("Device 1 is your top energy consumer at 90.0%"));
        assert!(tips[6].contains("19:00"));
    }

    #[test]
    fn test_device_tip_respects_materiality_floor() {
        let at = |h| NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(h, 0, 0).unwrap();
        let records = vec![UsageRecord::new(at(3), "a", 2.0)];
        let config = RecommendationConfig { min_device_share_percent: 100.0 };
        let tips = generate_recommendations(&aggregation(&records), None, None, &config, "AED");

        assert_eq!(tips.len(), 6);
        assert!(tips[5].contains("03:00"));
    }
}
