use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::fetch::auth::ApiKey;
use crate::fetch::{BasicClient, HttpClient, fetch_json};
use crate::records::RawUsageRecord;
use crate::services::usage_api::{UsageSource, UserDirectory, UserProfile};

#[derive(Deserialize)]
struct DeviceDto {
    #[serde(alias = "device_id")]
    id: String,
}

/// Client for the smart-home platform's REST API.
///
/// - `GET /api/users/{id}`
/// - `GET /api/devices?user_id=`
/// - `GET /api/energy?device_id=&start_date=&end_date=`
pub struct SmartHomeClient {
    base_url: Url,
    http: Box<dyn HttpClient>,
}

impl SmartHomeClient {
    pub fn new(base_url: &str, http: Box<dyn HttpClient>) -> Result<Self> {
        let base_url =
            Url::parse(base_url).with_context(|| format!("invalid API url '{base_url}'"))?;
        if base_url.cannot_be_a_base() {
            return Err(anyhow!("API url '{base_url}' cannot be used as a base"));
        }
        Ok(Self { base_url, http })
    }

    /// Bearer auth when `SMARTHOME_API_TOKEN` is set.
    pub fn from_env(base_url: &str) -> Result<Self> {
        let basic = BasicClient::with_timeouts(Duration::from_secs(30), Duration::from_secs(10))?;
        let http: Box<dyn HttpClient> = match std::env::var("SMARTHOME_API_TOKEN") {
            Ok(token) => Box::new(ApiKey::bearer(basic, &token)?),
            Err(_) => Box::new(basic),
        };
        Self::new(base_url, http)
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("API url cannot be a base"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

#[async_trait]
impl UserDirectory for SmartHomeClient {
    async fn user_profile(&self, user_id: &str) -> Result<Option<UserProfile>> {
        let url = self.endpoint(&["api", "users", user_id])?;
        let req = reqwest::Request::new(reqwest::Method::GET, url.clone());
        let resp = self
            .http
            .execute(req)
            .await
            .with_context(|| format!("request to {url} failed"))?;

        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(
                resp.json()
                    .await
                    .with_context(|| format!("failed to decode user from {url}"))?,
            )),
            status => {
                let body = resp.text().await.unwrap_or_default();
                Err(anyhow!("{url} returned status {status}: {body}"))
            }
        }
    }
}

#[async_trait]
impl UsageSource for SmartHomeClient {
    async fn owned_devices(&self, user_id: &str) -> Result<Vec<String>> {
        let mut url = self.endpoint(&["api", "devices"])?;
        url.query_pairs_mut().append_pair("user_id", user_id);

        let devices: Vec<DeviceDto> = fetch_json(self.http.as_ref(), url).await?;
        debug!(user_id, devices = devices.len(), "Devices listed");
        Ok(devices.into_iter().map(|d| d.id).collect())
    }

    async fn fetch_usage(
        &self,
        device_ids: &[String],
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<RawUsageRecord>> {
        let mut rows = Vec::new();
        for device_id in device_ids {
            let mut url = self.endpoint(&["api", "energy"])?;
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("device_id", device_id);
                if let Some(start) = start {
                    query.append_pair("start_date", &start.to_string());
                }
                if let Some(end) = end {
                    query.append_pair("end_date", &end.to_string());
                }
            }

            let mut batch: Vec<RawUsageRecord> = fetch_json(self.http.as_ref(), url).await?;
            for row in &mut batch {
                row.device_id.get_or_insert_with(|| device_id.clone());
            }
            debug!(device_id = %device_id, rows = batch.len(), "Usage rows fetched");
            rows.extend(batch);
        }
        Ok(rows)
    }
}
