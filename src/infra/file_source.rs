//! Usage data from a local export file.
//!
//! JSON files hold either a bare array of usage rows or an object:
//! ```json
//! {
//!   "records": [{"timestamp": "2024-03-01T19:00:00", "device_id": "ac-01", "energy_consumed": 2.5}],
//!   "devices": {"user-1": ["ac-01"]},
//!   "users": {"user-1": {"email": "sam@example.com", "display_name": "Sam"}}
//! }
//! ```
//! CSV files carry one usage row per line with a header row.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use tracing::info;

use crate::records::{RawUsageRecord, parse_timestamp};
use crate::services::usage_api::{UsageSource, UserDirectory, UserProfile};

#[derive(Debug, Default, Deserialize)]
struct UsageExport {
    records: Vec<RawUsageRecord>,
    #[serde(default)]
    devices: HashMap<String, Vec<String>>,
    #[serde(default)]
    users: HashMap<String, UserProfile>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum UsageFile {
    Rows(Vec<RawUsageRecord>),
    Export(UsageExport),
}

/// In-memory [`UsageSource`] and [`UserDirectory`] over an export file.
///
/// Without an ownership map every user owns every device in the file.
#[derive(Debug, Default)]
pub struct FileUsageSource {
    records: Vec<RawUsageRecord>,
    ownership: HashMap<String, Vec<String>>,
    profiles: HashMap<String, UserProfile>,
}

impl FileUsageSource {
    pub fn load(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);

        let source = match extension.as_deref() {
            Some("json") => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                match serde_json::from_str(&content)
                    .with_context(|| format!("invalid usage export {}", path.display()))?
                {
                    UsageFile::Rows(records) => Self::from_records(records),
                    UsageFile::Export(export) => Self {
                        records: export.records,
                        ownership: export.devices,
                        profiles: export.users,
                    },
                }
            }
            Some("csv") => {
                let mut reader = csv::Reader::from_path(path)
                    .with_context(|| format!("failed to open {}", path.display()))?;
                let records = reader
                    .deserialize()
                    .collect::<std::result::Result<Vec<RawUsageRecord>, _>>()
                    .with_context(|| format!("invalid usage row in {}", path.display()))?;
                Self::from_records(records)
            }
            _ => bail!("unsupported usage file {}, expected .json or .csv", path.display()),
        };

        info!(
            path = %path.display(),
            records = source.records.len(),
            users = source.ownership.len(),
            "Usage export loaded"
        );
        Ok(source)
    }

    pub fn from_records(records: Vec<RawUsageRecord>) -> Self {
        Self {
            records,
            ..Self::default()
        }
    }

    pub fn with_ownership(mut self, user_id: &str, device_ids: Vec<String>) -> Self {
        self.ownership.insert(user_id.to_string(), device_ids);
        self
    }

    pub fn with_profile(mut self, user_id: &str, profile: UserProfile) -> Self {
        self.profiles.insert(user_id.to_string(), profile);
        self
    }
}

#[async_trait]
impl UsageSource for FileUsageSource {
    async fn owned_devices(&self, user_id: &str) -> Result<Vec<String>> {
        if !self.ownership.is_empty() {
            return Ok(self.ownership.get(user_id).cloned().unwrap_or_default());
        }
        let devices: BTreeSet<&str> = self
            .records
            .iter()
            .filter_map(|r| r.device_id.as_deref())
            .collect();
        Ok(devices.into_iter().map(str::to_string).collect())
    }

    async fn fetch_usage(
        &self,
        device_ids: &[String],
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<RawUsageRecord>> {
        let wanted: HashSet<&str> = device_ids.iter().map(String::as_str).collect();

        Ok(self
            .records
            .iter()
            .filter(|r| r.device_id.as_deref().is_some_and(|d| wanted.contains(d)))
            .filter(|r| {
                // Unparseable timestamps pass through so normalization can report them.
                match r.timestamp.as_deref().and_then(parse_timestamp) {
                    Some(ts) => {
                        start.is_none_or(|s| ts.date() >= s) && end.is_none_or(|e| ts.date() <= e)
                    }
                    None => true,
                }
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl UserDirectory for FileUsageSource {
    async fn user_profile(&self, user_id: &str) -> Result<Option<UserProfile>> {
        Ok(self.profiles.get(user_id).cloned())
    }
}
