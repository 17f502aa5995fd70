use chrono::{DateTime, NaiveDate, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{ReportError, Result};
use crate::render::ReportFormat;

pub const DEFAULT_TITLE: &str = "Energy Usage Report";

/// Lifecycle of a report job.
///
/// `pending -> generating -> completed | failed`; terminal states never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Generating,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Generating => "generating",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = ReportError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "generating" => Ok(JobStatus::Generating),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(ReportError::invalid(format!("unknown job status '{other}'"))),
        }
    }
}

/// A report job as persisted by the job store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportJob {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub format: ReportFormat,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    /// `None` means every device the user owns.
    pub device_ids: Option<Vec<String>>,
    pub status: JobStatus,
    pub file_path: Option<PathBuf>,
    pub error_message: Option<String>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub completed: Option<DateTime<Utc>>,
}

impl ReportJob {
    /// A fresh `pending` job for a validated request.
    pub fn pending(id: String, request: ValidRequest) -> Self {
        // Stored timestamps keep microseconds.
        let now = Utc::now().trunc_subsecs(6);
        Self {
            id,
            user_id: request.user_id,
            title: request.title,
            format: request.format,
            start_date: request.start_date,
            end_date: request.end_date,
            device_ids: request.device_ids,
            status: JobStatus::Pending,
            file_path: None,
            error_message: None,
            created: now,
            updated: now,
            completed: None,
        }
    }
}

/// A report request as submitted by a caller. Nothing is trusted yet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportRequest {
    /// Caller-chosen job id; a UUID is generated when absent.
    #[serde(default)]
    pub job_id: Option<String>,
    pub user_id: String,
    #[serde(default)]
    pub title: String,
    pub format: String,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub device_ids: Option<Vec<String>>,
}

/// A request that passed [`ReportRequest::validate`].
#[derive(Debug, Clone, PartialEq)]
pub struct ValidRequest {
    pub user_id: String,
    pub title: String,
    pub format: ReportFormat,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub device_ids: Option<Vec<String>>,
}

impl ReportRequest {
    pub fn new(user_id: &str, title: &str, format: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            title: title.to_string(),
            format: format.to_string(),
            ..Self::default()
        }
    }

    pub fn with_range(mut self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        self.start_date = start;
        self.end_date = end;
        self
    }

    pub fn with_devices(mut self, device_ids: Vec<String>) -> Self {
        self.device_ids = Some(device_ids);
        self
    }

    pub fn validate(&self) -> Result<ValidRequest> {
        let user_id = self.user_id.trim();
        if user_id.is_empty() {
            return Err(ReportError::invalid("user_id must not be empty"));
        }

        let format: ReportFormat = self.format.parse()?;

        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if end < start {
                return Err(ReportError::invalid(format!(
                    "end_date {end} is before start_date {start}"
                )));
            }
        }

        let device_ids = match &self.device_ids {
            Some(ids) => {
                let ids: Vec<String> = ids
                    .iter()
                    .map(|id| id.trim())
                    .filter(|id| !id.is_empty())
                    .map(str::to_string)
                    .collect();
                if ids.is_empty() {
                    return Err(ReportError::invalid(
                        "device_ids must name at least one device when given",
                    ));
                }
                Some(ids)
            }
            None => None,
        };

        let title = match self.title.trim() {
            "" => DEFAULT_TITLE.to_string(),
            t => t.to_string(),
        };

        Ok(ValidRequest {
            user_id: user_id.to_string(),
            title,
            format,
            start_date: self.start_date,
            end_date: self.end_date,
            device_ids,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_status_round_trip_and_terminal() {
        for status in [
            JobStatus::Pending,
            JobStatus::Generating,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Generating.is_terminal());
        assert!("done".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_validate_rejects_reversed_range() {
        let request = ReportRequest::new("u1", "t", "pdf")
            .with_range(Some(date("2024-02-01")), Some(date("2024-01-01")));
        assert!(matches!(request.validate(), Err(ReportError::InvalidInput(_))));
    }

    #[test]
    fn test_validate_rejects_bad_format_and_user() {
        assert!(ReportRequest::new("u1", "t", "docx").validate().is_err());
        assert!(ReportRequest::new("  ", "t", "csv").validate().is_err());
        assert!(
            ReportRequest::new("u1", "t", "csv")
                .with_devices(vec![" ".to_string()])
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_validate_normalizes() {
        let valid = ReportRequest::new(" u1 ", "", "PDF")
            .with_range(Some(date("2024-01-01")), Some(date("2024-01-01")))
            .validate()
            .unwrap();
        assert_eq!(valid.user_id, "u1");
        assert_eq!(valid.title, DEFAULT_TITLE);
        assert_eq!(valid.format, ReportFormat::Pdf);
        assert!(valid.device_ids.is_none());
    }

    #[test]
    fn test_pending_job() {
        let valid = ReportRequest::new("u1", "March", "csv").validate().unwrap();
        let job = ReportJob::pending("job-1".to_string(), valid);
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.file_path.is_none() && job.completed.is_none());
        assert_eq!(job.created, job.updated);
    }
}
