//! Traits for the collaborators the report pipeline reads from.

use anyhow::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::records::RawUsageRecord;

/// Contact details used to personalize a report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, alias = "name")]
    pub display_name: Option<String>,
}

/// Looks up users for personalization.
#[async_trait::async_trait]
pub trait UserDirectory: Send + Sync {
    /// `Ok(None)` when the user is unknown.
    async fn user_profile(&self, user_id: &str) -> Result<Option<UserProfile>>;
}

/// Provides device ownership and raw usage rows.
#[async_trait::async_trait]
pub trait UsageSource: Send + Sync {
    /// Ids of every device the user owns.
    async fn owned_devices(&self, user_id: &str) -> Result<Vec<String>>;

    /// Usage rows for `device_ids` whose timestamps fall within the inclusive
    /// date range. Open ends are unbounded.
    async fn fetch_usage(
        &self,
        device_ids: &[String],
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<RawUsageRecord>>;
}
