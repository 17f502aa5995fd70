mod basic;
mod client;
pub mod auth;

pub use basic::BasicClient;
pub use client::HttpClient;

use anyhow::{Context, Result, bail};
use serde::de::DeserializeOwned;
use tracing::debug;

/// GETs `url` and decodes the JSON body. Non-2xx responses are errors that
/// carry the status and body.
pub async fn fetch_json<C, T>(client: &C, url: reqwest::Url) -> Result<T>
where
    C: HttpClient + ?Sized,
    T: DeserializeOwned,
{
    debug!(%url, "GET");
    let req = reqwest::Request::new(reqwest::Method::GET, url.clone());

    let resp = client
        .execute(req)
        .await
        .with_context(|| format!("request to {url} failed"))?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        bail!("{url} returned status {status}: {body}");
    }

    resp.json()
        .await
        .with_context(|| format!("failed to decode response from {url}"))
}
