pub mod analyzers;
pub mod config;
pub mod error;
pub mod fetch;
pub mod infra;
pub mod jobs;
pub mod records;
pub mod render;
pub mod services;

pub use error::{ReportError, Result};
