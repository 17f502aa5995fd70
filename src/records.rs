//! Usage records and their normalization at the ingestion boundary.
//!
//! Collaborators hand over loosely shaped rows ([`RawUsageRecord`]); everything
//! downstream of [`normalize`] works on validated, timestamp-sorted
//! [`UsageRecord`] values and never re-checks nulls.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ReportError, Result};

pub const UNKNOWN_LOCATION: &str = "Unknown";

/// A usage row as received from a collaborator. Every field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawUsageRecord {
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default, alias = "device")]
    pub device_id: Option<String>,
    #[serde(default, alias = "energy", alias = "kwh")]
    pub energy_consumed: Option<f64>,
    #[serde(default)]
    pub location: Option<String>,
}

/// One validated energy observation for a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub timestamp: NaiveDateTime,
    pub device_id: String,
    pub energy_consumed: f64,
    pub location: String,
}

impl UsageRecord {
    pub fn new(timestamp: NaiveDateTime, device_id: &str, energy_consumed: f64) -> Self {
        Self {
            timestamp,
            device_id: device_id.to_string(),
            energy_consumed: sanitize_energy(Some(energy_consumed)),
            location: UNKNOWN_LOCATION.to_string(),
        }
    }

    pub fn with_location(mut self, location: &str) -> Self {
        self.location = location.to_string();
        self
    }

    pub fn date(&self) -> NaiveDate {
        self.timestamp.date()
    }
}

/// Parses the timestamp spellings seen in exported usage data.
///
/// RFC 3339 values keep their wall-clock time; the offset is dropped.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_local());
    }

    const FORMATS: &[&str] = &[
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ];
    for fmt in FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt);
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

fn sanitize_energy(value: Option<f64>) -> f64 {
    match value {
        Some(v) if v.is_finite() && v > 0.0 => v,
        Some(v) if v.is_finite() && v < 0.0 => {
            warn!(energy_consumed = v, "Negative energy reading clamped to zero");
            0.0
        }
        _ => 0.0,
    }
}

impl TryFrom<RawUsageRecord> for UsageRecord {
    type Error = ReportError;

    fn try_from(raw: RawUsageRecord) -> Result<Self> {
        let ts_raw = raw
            .timestamp
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ReportError::invalid("usage record is missing a timestamp"))?;
        let timestamp = parse_timestamp(ts_raw)
            .ok_or_else(|| ReportError::invalid(format!("unparseable timestamp '{ts_raw}'")))?;

        let device_id = raw
            .device_id
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ReportError::invalid("usage record is missing a device id"))?;

        let location = raw
            .location
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| UNKNOWN_LOCATION.to_string());

        Ok(UsageRecord {
            timestamp,
            device_id,
            energy_consumed: sanitize_energy(raw.energy_consumed),
            location,
        })
    }
}

/// Validates raw rows and returns them sorted ascending by timestamp.
///
/// The sort is stable, so rows sharing a timestamp keep their input order.
pub fn normalize(raw: Vec<RawUsageRecord>) -> Result<Vec<UsageRecord>> {
    let total = raw.len();
    let mut records = raw
        .into_iter()
        .enumerate()
        .map(|(idx, r)| {
            UsageRecord::try_from(r).map_err(|e| match e {
                ReportError::InvalidInput(msg) => {
                    ReportError::InvalidInput(format!("record {idx}: {msg}"))
                }
                other => other,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    records.sort_by_key(|r| r.timestamp);
    debug!(records = total, "Usage records normalized");
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(ts: Option<&str>, device: Option<&str>, energy: Option<f64>) -> RawUsageRecord {
        RawUsageRecord {
            timestamp: ts.map(str::to_string),
            device_id: device.map(str::to_string),
            energy_consumed: energy,
            location: None,
        }
    }

    #[test]
    fn test_null_energy_becomes_zero() {
        let records = normalize(vec![raw(Some("2024-03-01T10:00:00"), Some("d1"), None)]).unwrap();
        assert_eq!(records[0].energy_consumed, 0.0);
        assert_eq!(records[0].location, UNKNOWN_LOCATION);
    }

    #[test]
    fn test_negative_and_nan_energy_clamped() {
        let records = normalize(vec![
            raw(Some("2024-03-01 10:00:00"), Some("d1"), Some(-4.0)),
            raw(Some("2024-03-01 11:00:00"), Some("d1"), Some(f64::NAN)),
        ])
        .unwrap();
        assert!(records.iter().all(|r| r.energy_consumed == 0.0));
    }

    #[test]
    fn test_missing_timestamp_is_invalid_input() {
        let err = normalize(vec![
            raw(Some("2024-03-01"), Some("d1"), Some(1.0)),
            raw(None, Some("d1"), Some(1.0)),
        ])
        .unwrap_err();
        match err {
            ReportError::InvalidInput(msg) => assert!(msg.starts_with("record 1")),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_sorted_and_stable() {
        let records = normalize(vec![
            raw(Some("2024-03-02T00:00:00"), Some("late"), Some(1.0)),
            raw(Some("2024-03-01T00:00:00"), Some("first"), Some(1.0)),
            raw(Some("2024-03-01T00:00:00"), Some("second"), Some(1.0)),
        ])
        .unwrap();
        let ids: Vec<_> = records.iter().map(|r| r.device_id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second", "late"]);
    }

    #[test]
    fn test_rfc3339_keeps_wall_clock() {
        let ts = parse_timestamp("2024-03-01T22:15:00+04:00").unwrap();
        assert_eq!(ts.format("%H:%M").to_string(), "22:15");
    }

    #[test]
    fn test_field_aliases() {
        let parsed: RawUsageRecord =
            serde_json::from_str(r#"{"timestamp":"2024-01-01","device":"x","kwh":2.5}"#).unwrap();
        assert_eq!(parsed.device_id.as_deref(), Some("x"));
        assert_eq!(parsed.energy_consumed, Some(2.5));
    }
}
