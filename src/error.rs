//! Error taxonomy shared by the analytics pipeline and the job controller.

use thiserror::Error;

use crate::jobs::JobStatus;

pub type Result<T> = std::result::Result<T, ReportError>;

/// Message recorded on a job whose selection matched no usage records.
pub const NO_DATA_MESSAGE: &str = "No energy data found for the specified criteria";

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("No energy data found for the specified criteria")]
    NoData,
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("report rendering failed: {0}")]
    Render(String),
    /// A transition was attempted from a state that does not allow it.
    #[error("job {job_id} is {current}, cannot move to {requested}")]
    Concurrency {
        job_id: String,
        current: JobStatus,
        requested: JobStatus,
    },
    #[error("report job {0} not found")]
    NotFound(String),
    #[error("job store error: {0}")]
    Store(#[from] rusqlite::Error),
    #[error("usage source error: {0}")]
    Source(#[from] anyhow::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

impl ReportError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        ReportError::InvalidInput(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_data_message_matches_constant() {
        assert_eq!(ReportError::NoData.to_string(), NO_DATA_MESSAGE);
    }

    #[test]
    fn concurrency_message_names_states() {
        let err = ReportError::Concurrency {
            job_id: "abc".to_string(),
            current: JobStatus::Completed,
            requested: JobStatus::Generating,
        };
        assert_eq!(err.to_string(), "job abc is completed, cannot move to generating");
    }
}
