//! Gold tier: per-country KPIs over the silver rows.

use anyhow::Result;
use chrono::Utc;
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::artifacts::{read_csv, unused_path, write_csv};
use crate::config::PipelineConfig;
use crate::context::{GOLD_FILE, Handoff, SILVER_FILE};
use crate::schema::{AggregatedRecord, GOLD_COLUMNS, RefinedRecord, SILVER_COLUMNS};
use crate::stages::{InputSource, StageOutcome, resolve_input};

/// Aggregates the silver artifact into a new, uniquely named gold artifact.
///
/// A missing or zero-row silver artifact is a no-op: nothing is written, and
/// any gold value left in the channel by an earlier run is withdrawn.
#[tracing::instrument(skip_all)]
pub fn run_aggregate(
    config: &PipelineConfig,
    source: InputSource,
    handoff: &mut Handoff,
) -> Result<StageOutcome> {
    let Some(silver) = resolve_input(source, handoff, SILVER_FILE, &config.silver_dir(), "csv")?
    else {
        warn!(dir = %config.silver_dir().display(), "No silver artifact to aggregate");
        handoff.retract(GOLD_FILE)?;
        return Ok(StageOutcome::Skipped("no silver artifact".to_string()));
    };

    info!(silver = %silver.display(), "Processing silver artifact");
    let rows: Vec<RefinedRecord> = read_csv(&silver, &SILVER_COLUMNS)?;
    if rows.is_empty() {
        warn!(silver = %silver.display(), "Silver artifact has no rows, skipping aggregation");
        handoff.retract(GOLD_FILE)?;
        return Ok(StageOutcome::Skipped("silver artifact has no rows".to_string()));
    }

    let kpis = aggregate(&rows);

    let stamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
    let path = unused_path(&config.gold_dir(), &format!("flight_kpis_{stamp}"), "csv");
    write_csv(&path, &GOLD_COLUMNS, &kpis)?;
    handoff.push(GOLD_FILE, &path)?;

    info!(path = %path.display(), countries = kpis.len(), flights = rows.len(), "Gold artifact saved");
    Ok(StageOutcome::Produced(path))
}

/// Groups rows by origin country, ordered by country name.
pub fn aggregate(rows: &[RefinedRecord]) -> Vec<AggregatedRecord> {
    #[derive(Default)]
    struct Acc {
        count: u64,
        on_ground: u64,
        velocities: Vec<f64>,
    }

    let mut groups: BTreeMap<&str, Acc> = BTreeMap::new();

    for row in rows {
        let acc = groups.entry(row.origin_country.as_str()).or_default();
        acc.count += 1;
        if row.on_ground {
            acc.on_ground += 1;
        }
        if let Some(v) = row.velocity {
            acc.velocities.push(v);
        }
    }

    groups
        .into_iter()
        .map(|(country, acc)| AggregatedRecord {
            origin_country: country.to_string(),
            total_flights: acc.count,
            avg_velocity: mean(&acc.velocities),
            on_ground: acc.on_ground,
        })
        .collect()
}

/// Arithmetic mean, or `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}
