//! HTTP access to the flight-state data source.

mod basic;
mod client;

pub use basic::BasicClient;
pub use client::HttpClient;

use anyhow::{Context, Result};
use serde_json::Value;

use crate::error::PipelineError;

/// A response body exactly as received, plus its parsed form.
#[derive(Debug)]
pub struct JsonPayload {
    pub bytes: Vec<u8>,
    pub value: Value,
}

/// GETs `url` and requires a success status and a JSON body.
pub async fn fetch_json<C: HttpClient>(client: &C, url: &str) -> Result<JsonPayload> {
    let req = reqwest::Request::new(
        reqwest::Method::GET,
        url.parse().with_context(|| format!("invalid data source URL '{url}'"))?,
    );

    let resp = client
        .execute(req)
        .await
        .with_context(|| format!("request to {url} failed"))?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(PipelineError::HttpStatus {
            status: status.as_u16(),
            body,
        }
        .into());
    }

    let bytes = resp.bytes().await?.to_vec();
    let value = serde_json::from_slice(&bytes).context("data source returned invalid JSON")?;

    Ok(JsonPayload { bytes, value })
}
