//! Concrete collaborators: local exports, the smart-home HTTP API and S3.

pub mod artifacts;
pub mod file_source;
pub mod smarthome;
