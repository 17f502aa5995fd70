//! Sectioned CSV export.
//!
//! Each section starts with a single-field `# <Name>` row followed by its own
//! header row. Sections with nothing to show (no anomalies, no forecast) are
//! omitted.

use csv::{Writer, WriterBuilder};
use std::fs::File;
use std::path::Path;
use tracing::debug;

use crate::error::Result;
use crate::render::ReportContent;

fn section(writer: &mut Writer<File>, name: &str, header: &[&str]) -> Result<()> {
    writer.write_record([format!("# {name}")])?;
    writer.write_record(header)?;
    Ok(())
}

fn fixed(value: f64) -> String {
    format!("{value:.4}")
}

pub fn write_csv(content: &ReportContent, path: &Path) -> Result<()> {
    debug!(path = %path.display(), "Writing CSV report");

    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;

    let agg = &content.analysis.aggregation;

    section(&mut writer, "Summary", &["metric", "value"])?;
    let peak_hours = agg
        .peak_hours(3)
        .iter()
        .filter(|h| h.energy > 0.0)
        .map(|h| format!("{:02}:00", h.hour))
        .collect::<Vec<_>>()
        .join(" ");
    let summary = [
        ("title", content.title.clone()),
        ("user", content.prepared_for()),
        ("period", content.period_label()),
        ("generated_at", content.generated_at.to_rfc3339()),
        ("record_count", agg.record_count.to_string()),
        ("total_energy_kwh", fixed(agg.total_energy)),
        ("total_cost", fixed(agg.total_cost)),
        ("currency", content.currency.clone()),
        ("trend_interval", format!("{:?}", agg.interval).to_lowercase()),
        ("average_per_bucket_kwh", fixed(agg.average_per_bucket())),
        ("peak_hours", peak_hours),
    ];
    for (metric, value) in summary {
        writer.write_record([metric, value.as_str()])?;
    }

    section(&mut writer, "Trend", &["bucket", "energy_kwh", "pct_change"])?;
    for point in &agg.trend {
        let change = point.pct_change.map(fixed).unwrap_or_default();
        writer.write_record([point.label.clone(), fixed(point.energy), change])?;
    }

    section(
        &mut writer,
        "Devices",
        &["device_id", "label", "energy_kwh", "percentage", "cost"],
    )?;
    for entry in &agg.devices {
        writer.write_record([
            entry.key.clone(),
            entry.label.clone(),
            fixed(entry.energy),
            fixed(entry.percentage),
            fixed(entry.cost),
        ])?;
    }

    if !agg.locations.is_empty() {
        section(&mut writer, "Locations", &["location", "energy_kwh", "percentage", "cost"])?;
        for entry in &agg.locations {
            writer.write_record([
                entry.key.clone(),
                fixed(entry.energy),
                fixed(entry.percentage),
                fixed(entry.cost),
            ])?;
        }
    }

    section(&mut writer, "Hourly", &["hour", "energy_kwh"])?;
    for slot in &agg.hourly {
        writer.write_record([slot.hour.to_string(), fixed(slot.energy)])?;
    }

    let anomalies = &content.analysis.anomalies;
    if !anomalies.is_empty() {
        section(
            &mut writer,
            "Anomalies",
            &["date", "device_id", "label", "observed_kwh", "threshold_kwh", "severity"],
        )?;
        for anomaly in &anomalies.anomalies {
            writer.write_record([
                anomaly.date.to_string(),
                anomaly.device_id.clone(),
                content.device_label(&anomaly.device_id).to_string(),
                fixed(anomaly.observed),
                fixed(anomaly.threshold),
                anomaly.severity.to_string(),
            ])?;
        }
    }

    let forecast = &content.analysis.forecast;
    if !forecast.is_empty() {
        section(&mut writer, "Forecast", &["date", "value_kwh", "kind"])?;
        for point in &forecast.points {
            let kind = format!("{:?}", point.kind).to_lowercase();
            writer.write_record([point.date.to_string(), fixed(point.value), kind])?;
        }
        writer.write_record(["total_forecast_kwh".to_string(), fixed(forecast.total_energy)])?;
        writer.write_record(["total_forecast_cost".to_string(), fixed(forecast.total_cost)])?;
    }

    section(&mut writer, "Recommendations", &["rank", "recommendation"])?;
    for (idx, tip) in content.analysis.recommendations.iter().enumerate() {
        writer.write_record([(idx + 1).to_string(), tip.clone()])?;
    }

    section(
        &mut writer,
        "Records",
        &["timestamp", "device_id", "energy_consumed", "location"],
    )?;
    for record in &content.records {
        writer.serialize(record)?;
    }

    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::test_support::sample_content;

    fn sections(text: &str) -> Vec<String> {
        text.lines()
            .filter(|l| l.starts_with("# "))
            .map(|l| l.trim_start_matches("# ").to_string())
            .collect()
    }

    #[test]
    fn test_all_sections_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.csv");
        write_csv(&sample_content(), &path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            sections(&text),
            vec![
                "Summary",
                "Trend",
                "Devices",
                "Locations",
                "Hourly",
                "Anomalies",
                "Forecast",
                "Recommendations",
                "Records"
            ]
        );
        assert!(text.contains("total_energy_kwh,357.0000"));
        assert!(text.contains("2024-03-18,ac-01,Device 1,95.0000"));
    }

    #[test]
    fn test_records_follow_their_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.csv");
        let content = sample_content();
        write_csv(&content, &path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let rows: Vec<&str> = text
            .lines()
            .skip_while(|l| *l != "# Records")
            .skip(2)
            .collect();
        assert_eq!(rows.len(), content.records.len());
        assert_eq!(rows[0], "2024-03-01T19:00:00,ac-01,6.0,Living Room");
    }

    #[test]
    fn test_optional_sections_omitted() {
        let mut content = sample_content();
        content.analysis.anomalies.anomalies.clear();
        content.analysis.forecast.points.clear();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.csv");
        write_csv(&content, &path).unwrap();

        let found = sections(&std::fs::read_to_string(&path).unwrap());
        assert!(!found.contains(&"Anomalies".to_string()));
        assert!(!found.contains(&"Forecast".to_string()));
    }
}
