//! Bronze tier: snapshot the data source verbatim.

use anyhow::Result;
use std::path::PathBuf;
use tracing::info;

use crate::artifacts::write_atomic;
use crate::config::PipelineConfig;
use crate::context::{BRONZE_FILE, Handoff, RunContext};
use crate::fetch::{HttpClient, fetch_json};
use crate::stages::StageOutcome;

pub fn bronze_path(config: &PipelineConfig, ctx: &RunContext) -> PathBuf {
    config
        .bronze_dir()
        .join(format!("flights_bronze_{}.json", ctx.ds_nodash()))
}

/// Fetches current state vectors and stores the response body unchanged.
///
/// Any fetch or write failure is returned to the caller; no artifact is
/// published in that case.
#[tracing::instrument(skip_all, fields(date = %ctx.logical_date))]
pub async fn run_ingest<C: HttpClient>(
    client: &C,
    config: &PipelineConfig,
    ctx: &RunContext,
    handoff: &mut Handoff,
) -> Result<StageOutcome> {
    info!(url = %config.api_url, "Fetching state vectors");
    let payload = fetch_json(client, &config.api_url).await?;

    let state_count = payload.value["states"].as_array().map(Vec::len);
    info!(bytes = payload.bytes.len(), states = ?state_count, "State vectors received");

    let path = bronze_path(config, ctx);
    write_atomic(&path, &payload.bytes)?;
    handoff.push(BRONZE_FILE, &path)?;

    info!(path = %path.display(), "Bronze artifact saved");
    Ok(StageOutcome::Produced(path))
}
