//! Report rendering.
//!
//! One [`Renderer`] serves both artifact kinds:
//! - `pdf`: a paginated visual report with embedded charts.
//! - `csv`: a single plain-text file of `# Section` blocks carrying every
//!   number the PDF shows plus the normalized records.

pub mod charts;
pub mod csv;
pub mod narrative;
pub mod pdf;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{error, info};

use crate::analyzers::UsageAnalysis;
use crate::error::{ReportError, Result};
use crate::records::UsageRecord;
use crate::services::usage_api::UserProfile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    Pdf,
    Csv,
}

impl ReportFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            ReportFormat::Pdf => "pdf",
            ReportFormat::Csv => "csv",
        }
    }

    pub fn extension(self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportFormat {
    type Err = ReportError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pdf" => Ok(ReportFormat::Pdf),
            "csv" => Ok(ReportFormat::Csv),
            other => Err(ReportError::invalid(format!(
                "unsupported report format '{other}' (expected pdf or csv)"
            ))),
        }
    }
}

/// Everything that ends up in a rendered report.
#[derive(Debug, Clone)]
pub struct ReportContent {
    pub title: String,
    pub user_id: String,
    pub user: Option<UserProfile>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub generated_at: DateTime<Utc>,
    pub currency: String,
    pub analysis: UsageAnalysis,
    pub records: Vec<UsageRecord>,
}

impl ReportContent {
    /// Requested range, falling back to the span of the data.
    pub fn period_label(&self) -> String {
        let agg = &self.analysis.aggregation;
        let start = self
            .start_date
            .or_else(|| agg.first_timestamp.map(|t| t.date()))
            .map_or_else(|| "-".to_string(), |d| d.to_string());
        let end = self
            .end_date
            .or_else(|| agg.last_timestamp.map(|t| t.date()))
            .map_or_else(|| "-".to_string(), |d| d.to_string());
        format!("{start} to {end}")
    }

    pub fn prepared_for(&self) -> String {
        match &self.user {
            Some(UserProfile {
                display_name: Some(name),
                email: Some(email),
            }) => format!("{name} <{email}>"),
            Some(UserProfile {
                display_name: Some(name),
                ..
            }) => name.clone(),
            Some(UserProfile {
                email: Some(email), ..
            }) => email.clone(),
            _ => self.user_id.clone(),
        }
    }

    /// Display label for a raw device id, as assigned by the aggregation.
    pub fn device_label<'a>(&'a self, device_id: &'a str) -> &'a str {
        self.analysis
            .aggregation
            .devices
            .iter()
            .find(|d| d.key == device_id)
            .map_or(device_id, |d| d.label.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Renderer {
    output_dir: PathBuf,
}

impl Renderer {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Writes the report and returns its path.
    ///
    /// Any failure is reported as [`ReportError::Render`] and the partial file
    /// is removed.
    #[tracing::instrument(skip(self, content), fields(title = %content.title, %format))]
    pub fn render(&self, content: &ReportContent, format: ReportFormat) -> Result<PathBuf> {
        fs::create_dir_all(&self.output_dir)
            .map_err(|e| ReportError::Render(format!("cannot create output directory: {e}")))?;

        let path = self
            .output_dir
            .join(artifact_file_name(&content.title, format, content.generated_at));

        let outcome = match format {
            ReportFormat::Pdf => pdf::write_pdf(content, &path),
            ReportFormat::Csv => csv::write_csv(content, &path),
        };

        if let Err(e) = outcome {
            let _ = fs::remove_file(&path);
            error!(error = %e, path = %path.display(), "Report rendering failed");
            return Err(match e {
                ReportError::Render(_) => e,
                other => ReportError::Render(other.to_string()),
            });
        }

        info!(path = %path.display(), "Report rendered");
        Ok(path)
    }
}

/// `<slug>_<timestamp>_<random>.<ext>`, unique per call.
pub fn artifact_file_name(title: &str, format: ReportFormat, at: DateTime<Utc>) -> String {
    let mut slug: String = title
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    while slug.contains("__") {
        slug = slug.replace("__", "_");
    }
    let slug = slug.trim_matches('_');
    let slug = if slug.is_empty() { "energy_report" } else { slug };
    let slug: String = slug.chars().take(40).collect();

    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{}_{}_{}.{}",
        slug,
        at.format("%Y%m%d_%H%M%S"),
        &suffix[..8],
        format.extension()
    )
}

/// Formats a kWh or currency figure for display.
pub(crate) fn num(value: f64) -> String {
    format!("{value:.2}")
}
