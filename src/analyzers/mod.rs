//! Energy-usage analytics.
//!
//! This module aggregates normalized usage records into totals, trends and
//! breakdowns, flags unusual daily consumption, projects the coming days and
//! turns the results into energy-saving tips.

pub mod aggregate;
pub mod analyzer;
pub mod anomaly;
pub mod forecast;
pub mod recommend;
pub mod tariff;
pub mod types;
pub mod utility;

pub use analyzer::{UsageAnalysis, analyze_usage};
