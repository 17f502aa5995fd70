//! Report jobs: their lifecycle, persistence and execution.

pub mod controller;
pub mod store;
pub mod types;

pub use controller::{ReportService, STALE_JOB_MESSAGE};
pub use store::{JobStore, SqliteJobStore};
pub use types::{JobStatus, ReportJob, ReportRequest};
