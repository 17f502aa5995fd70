//! Data types produced by the analytics pipeline.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

/// Calendar interval used to bucket the consumption trend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendInterval {
    Hour,
    #[default]
    Day,
    Week,
    Month,
}

impl TrendInterval {
    /// Start of the bucket containing `ts`. Weeks start on Monday.
    pub fn bucket_start(self, ts: NaiveDateTime) -> NaiveDateTime {
        let midnight = |d: NaiveDate| d.and_hms_opt(0, 0, 0).unwrap_or(ts);
        match self {
            TrendInterval::Hour => ts
                .with_minute(0)
                .and_then(|t| t.with_second(0))
                .and_then(|t| t.with_nanosecond(0))
                .unwrap_or(ts),
            TrendInterval::Day => midnight(ts.date()),
            TrendInterval::Week => {
                let offset = ts.date().weekday().num_days_from_monday();
                midnight(ts.date() - Duration::days(i64::from(offset)))
            }
            TrendInterval::Month => midnight(ts.date().with_day(1).unwrap_or(ts.date())),
        }
    }

    pub fn label(self, bucket: NaiveDateTime) -> String {
        let fmt = match self {
            TrendInterval::Hour => "%Y-%m-%d %H:00",
            TrendInterval::Day => "%Y-%m-%d",
            TrendInterval::Week => "%G-W%V",
            TrendInterval::Month => "%Y-%m",
        };
        bucket.format(fmt).to_string()
    }
}

impl std::str::FromStr for TrendInterval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hour" | "hourly" => Ok(TrendInterval::Hour),
            "day" | "daily" => Ok(TrendInterval::Day),
            "week" | "weekly" => Ok(TrendInterval::Week),
            "month" | "monthly" => Ok(TrendInterval::Month),
            other => Err(format!("unknown trend interval '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendPoint {
    pub bucket: NaiveDateTime,
    pub label: String,
    pub energy: f64,
    /// `None` for the first bucket or when the previous bucket was zero.
    pub pct_change: Option<f64>,
}

/// One row of a device or location breakdown.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakdownEntry {
    pub key: String,
    pub label: String,
    pub energy: f64,
    pub percentage: f64,
    pub cost: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HourlyUsage {
    pub hour: u32,
    pub energy: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregationResult {
    pub record_count: usize,
    pub total_energy: f64,
    pub total_cost: f64,
    pub interval: TrendInterval,
    pub trend: Vec<TrendPoint>,
    pub devices: Vec<BreakdownEntry>,
    pub locations: Vec<BreakdownEntry>,
    /// Always 24 slots, indexed by hour of day.
    pub hourly: Vec<HourlyUsage>,
    pub first_timestamp: Option<NaiveDateTime>,
    pub last_timestamp: Option<NaiveDateTime>,
}

impl AggregationResult {
    /// Hours ranked by consumption, highest first; ties go to the earlier hour.
    pub fn peak_hours(&self, n: usize) -> Vec<HourlyUsage> {
        let mut ranked = self.hourly.clone();
        ranked.sort_by(|a, b| b.energy.total_cmp(&a.energy).then(a.hour.cmp(&b.hour)));
        ranked.truncate(n);
        ranked
    }

    pub fn top_device(&self) -> Option<&BreakdownEntry> {
        self.devices.first()
    }

    /// Average energy per trend bucket.
    pub fn average_per_bucket(&self) -> f64 {
        if self.trend.is_empty() {
            0.0
        } else {
            self.total_energy / self.trend.len() as f64
        }
    }
}

/// How an optional analysis step finished.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AnalysisStatus {
    Computed,
    /// Not enough input to run the analysis at all.
    InsufficientData { reason: String },
    /// The preferred model failed and a simpler one produced the result.
    Fallback { reason: String },
}

impl AnalysisStatus {
    pub fn message(&self) -> Option<&str> {
        match self {
            AnalysisStatus::Computed => None,
            AnalysisStatus::InsufficientData { reason } | AnalysisStatus::Fallback { reason } => {
                Some(reason)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Medium,
    High,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Anomaly {
    pub date: NaiveDate,
    pub device_id: String,
    pub observed: f64,
    pub threshold: f64,
    pub severity: Severity,
}

/// Daily total for one device, as seen by the detector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyObservation {
    pub date: NaiveDate,
    pub device_id: String,
    pub energy: f64,
    pub is_anomaly: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyResult {
    pub anomalies: Vec<Anomaly>,
    pub observations: Vec<DailyObservation>,
    pub status: AnalysisStatus,
}

impl AnomalyResult {
    pub fn insufficient(reason: impl Into<String>) -> Self {
        Self {
            anomalies: Vec::new(),
            observations: Vec::new(),
            status: AnalysisStatus::InsufficientData { reason: reason.into() },
        }
    }

    pub fn is_empty(&self) -> bool {
        self.anomalies.is_empty()
    }

    pub fn message(&self) -> Option<&str> {
        self.status.message()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointKind {
    Historical,
    Forecast,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastPoint {
    pub date: NaiveDate,
    pub value: f64,
    pub kind: PointKind,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastMethod {
    #[default]
    MovingAverage,
    /// Double exponential smoothing (level + trend).
    Holt,
}

impl std::fmt::Display for ForecastMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ForecastMethod::MovingAverage => write!(f, "moving average"),
            ForecastMethod::Holt => write!(f, "Holt linear trend"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastResult {
    pub points: Vec<ForecastPoint>,
    /// Energy over forecast points only.
    pub total_energy: f64,
    /// Cost of `total_energy` under the configured tariff.
    pub total_cost: f64,
    pub method: Option<ForecastMethod>,
    pub status: AnalysisStatus,
}

impl ForecastResult {
    pub fn insufficient(reason: impl Into<String>) -> Self {
        Self {
            points: Vec::new(),
            total_energy: 0.0,
            total_cost: 0.0,
            method: None,
            status: AnalysisStatus::InsufficientData { reason: reason.into() },
        }
    }

    pub fn forecast_points(&self) -> impl Iterator<Item = &ForecastPoint> {
        self.points.iter().filter(|p| p.kind == PointKind::Forecast)
    }

    /// True when no forecast point was produced.
    pub fn is_empty(&self) -> bool {
        self.forecast_points().next().is_none()
    }

    pub fn message(&self) -> Option<&str> {
        self.status.message()
    }
}
