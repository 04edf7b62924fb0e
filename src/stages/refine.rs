//! Silver tier: project raw state vectors onto the four retained columns.

use anyhow::{Context, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::artifacts::write_csv;
use crate::config::PipelineConfig;
use crate::context::{BRONZE_FILE, Handoff, RunContext, SILVER_FILE};
use crate::error::PipelineError;
use crate::schema::{RefinedRecord, SILVER_COLUMNS, StateVectorV1, json_kind};
use crate::stages::{InputSource, StageOutcome, resolve_input};

pub fn silver_path(config: &PipelineConfig, ctx: &RunContext) -> PathBuf {
    config
        .silver_dir()
        .join(format!("flights_silver_{}.csv", ctx.ds_nodash()))
}

/// Reads the bronze artifact and writes the silver one.
///
/// A missing input is not an error: the stage logs it and produces nothing.
/// A payload without states still yields a header-only artifact.
#[tracing::instrument(skip_all, fields(date = %ctx.logical_date))]
pub fn run_refine(
    config: &PipelineConfig,
    ctx: &RunContext,
    source: InputSource,
    handoff: &mut Handoff,
) -> Result<StageOutcome> {
    let Some(bronze) = resolve_input(source, handoff, BRONZE_FILE, &config.bronze_dir(), "json")?
    else {
        warn!("Bronze file path not found, nothing to refine");
        handoff.retract(SILVER_FILE)?;
        return Ok(StageOutcome::Skipped("no bronze artifact".to_string()));
    };

    let records = refine_file(&bronze)?;
    if records.is_empty() {
        warn!(bronze = %bronze.display(), "Payload has no states, writing empty silver artifact");
    }

    let path = silver_path(config, ctx);
    write_csv(&path, &SILVER_COLUMNS, &records)?;
    handoff.push(SILVER_FILE, &path)?;

    info!(path = %path.display(), rows = records.len(), "Silver artifact saved");
    Ok(StageOutcome::Produced(path))
}

/// Parses one bronze artifact into refined rows.
pub fn refine_file(path: &Path) -> Result<Vec<RefinedRecord>> {
    let content =
        std::fs::read(path).with_context(|| format!("reading bronze {}", path.display()))?;
    let raw: Value = serde_json::from_slice(&content)
        .with_context(|| format!("parsing bronze {}", path.display()))?;

    Ok(extract_states(raw)?)
}

/// Decodes the `states` array of a raw payload.
///
/// An empty payload, a missing `states` field and `"states": null` all mean
/// "no flights" and produce no rows.
pub fn extract_states(raw: Value) -> Result<Vec<RefinedRecord>, PipelineError> {
    let states = match raw {
        Value::Object(mut map) => map.remove("states").unwrap_or(Value::Null),
        _ => Value::Null,
    };

    let items = match states {
        Value::Array(items) => items,
        Value::Null => return Ok(Vec::new()),
        other => {
            return Err(PipelineError::SchemaMismatch {
                index: 0,
                expected: "array of states".to_string(),
                actual: json_kind(&other).to_string(),
            });
        }
    };

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| StateVectorV1::from_value(index, item).map(RefinedRecord::from))
        .collect()
}
