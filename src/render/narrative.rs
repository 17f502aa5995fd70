//! Plain-language summaries printed beside each PDF chart.

use crate::analyzers::types::{
    AggregationResult, AnalysisStatus, AnomalyResult, ForecastResult, Severity, TrendInterval,
};
use crate::render::num;

/// Relative change between the first and last bucket below which usage is
/// described as stable.
const STABLE_BAND: f64 = 0.05;

fn unit(interval: TrendInterval) -> &'static str {
    match interval {
        TrendInterval::Hour => "hour",
        TrendInterval::Day => "day",
        TrendInterval::Week => "week",
        TrendInterval::Month => "month",
    }
}

pub fn trend(agg: &AggregationResult) -> String {
    let unit = unit(agg.interval);
    let (Some(first), Some(last)) = (agg.trend.first(), agg.trend.last()) else {
        return "No consumption was recorded in this period.".to_string();
    };
    if agg.trend.len() < 2 {
        return format!(
            "All {} kWh fell within a single {unit} ({}), so there is no trend to describe.",
            num(agg.total_energy),
            first.label
        );
    }

    let direction = if last.energy > first.energy * (1.0 + STABLE_BAND) {
        "rose"
    } else if last.energy < first.energy * (1.0 - STABLE_BAND) {
        "fell"
    } else {
        "stayed broadly stable"
    };
    let mut text = format!(
        "Across {} {unit}s, usage {direction} from {} kWh ({}) to {} kWh ({}), \
         averaging {} kWh per {unit}.",
        agg.trend.len(),
        num(first.energy),
        first.label,
        num(last.energy),
        last.label,
        num(agg.average_per_bucket())
    );

    let largest = agg
        .trend
        .iter()
        .filter_map(|p| p.pct_change.map(|pct| (p, pct)))
        .max_by(|a, b| a.1.abs().total_cmp(&b.1.abs()));
    if let Some((point, pct)) = largest {
        text.push_str(&format!(
            " The largest change from one {unit} to the next was {pct:+.1}% in {}.",
            point.label
        ));
    }
    text
}

pub fn hourly(agg: &AggregationResult) -> String {
    let peaks: Vec<_> = agg
        .peak_hours(3)
        .into_iter()
        .filter(|h| h.energy > 0.0)
        .collect();
    if peaks.is_empty() || agg.total_energy <= 0.0 {
        return "No consumption was recorded at any hour of the day.".to_string();
    }

    let share = |energy: f64| energy / agg.total_energy * 100.0;
    let listed: Vec<String> = peaks
        .iter()
        .map(|h| format!("{:02}:00 ({:.1}%)", h.hour, share(h.energy)))
        .collect();
    let combined: f64 = peaks.iter().map(|h| share(h.energy)).sum();
    format!(
        "The busiest hours were {}, together {combined:.1}% of all consumption.",
        listed.join(", ")
    )
}

pub fn anomalies(result: &AnomalyResult, label: impl Fn(&str) -> String) -> String {
    let Some(worst) = result
        .anomalies
        .iter()
        .max_by(|a, b| (a.observed / a.threshold).total_cmp(&(b.observed / b.threshold)))
    else {
        return "No unusual daily consumption was detected.".to_string();
    };

    let high = result
        .anomalies
        .iter()
        .filter(|a| a.severity == Severity::High)
        .count();
    let days = result.anomalies.len();
    format!(
        "{days} unusual device-day{} stood out against typical usage ({high} high severity). \
         The largest was {} on {}: {} kWh against a threshold of {} kWh.",
        if days == 1 { "" } else { "s" },
        label(&worst.device_id),
        worst.date,
        num(worst.observed),
        num(worst.threshold)
    )
}

pub fn forecast(result: &ForecastResult, currency: &str) -> String {
    let days = result.forecast_points().count();
    if days == 0 {
        return result
            .message()
            .unwrap_or("No forecast was produced.")
            .to_string();
    }

    let method = result
        .method
        .map_or_else(|| "default".to_string(), |m| m.to_string());
    let mut text = format!(
        "Using the {method} method, the next {days} days are projected at {} kWh \
         ({} {currency}), about {} kWh per day.",
        num(result.total_energy),
        num(result.total_cost),
        num(result.total_energy / days as f64)
    );
    if let AnalysisStatus::Fallback { reason } = &result.status {
        text.push_str(&format!(" {reason}"));
    }
    text
}
