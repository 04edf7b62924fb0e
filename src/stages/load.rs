//! Warehouse load: append the run's gold KPIs to `FLIGHT_KPIS`.
//!
//! Unlike the upstream stages, a missing input here fails the run. Each step is
//! written to a debug log scoped to this invocation; on error the log receives
//! the message and cause chain before the error is returned.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::artifacts::{read_csv, require_latest_artifact};
use crate::config::{DATABASE_NAME, PipelineConfig, SCHEMA_NAME, WAREHOUSE_NAME};
use crate::context::{GOLD_FILE, Handoff, RunContext};
use crate::error::PipelineError;
use crate::runlog::RunLog;
use crate::schema::{AggregatedRecord, GOLD_COLUMNS};
use crate::stages::{InputSource, StageOutcome};
use crate::warehouse::{
    ConnectParams, ConnectionProfile, ConnectionStore, Connector, SqlValue, WarehouseConnection,
    normalize_account,
};

pub const CREATE_TABLE_SQL: &str = "
CREATE TABLE IF NOT EXISTS FLIGHT_KPIS (
    WINDOW_START TIMESTAMP,
    ORIGIN_COUNTRY STRING,
    TOTAL_FLIGHTS INTEGER,
    AVG_VELOCITY FLOAT,
    ON_GROUND BOOLEAN,
    LOAD_TIME TIMESTAMP DEFAULT CURRENT_TIMESTAMP
)";

pub const INSERT_SQL: &str = "
INSERT INTO FLIGHT_KPIS
(WINDOW_START, ORIGIN_COUNTRY, TOTAL_FLIGHTS, AVG_VELOCITY, ON_GROUND)
VALUES (?, ?, ?, ?, ?)";

pub fn debug_log_path(config: &PipelineConfig, ctx: &RunContext) -> PathBuf {
    config
        .logs_dir()
        .join(format!("load_debug_{}.log", ctx.ds_nodash()))
}

/// Loads the gold artifact into the warehouse reached through `connector`.
#[tracing::instrument(skip_all, fields(date = %ctx.logical_date))]
pub fn run_load<K: Connector>(
    connector: &K,
    connections: &ConnectionStore,
    config: &PipelineConfig,
    ctx: &RunContext,
    source: InputSource,
    handoff: &Handoff,
) -> Result<StageOutcome> {
    let mut log = RunLog::create(&debug_log_path(config, ctx))?;
    log.step("Load stage started");

    let result = load_steps(&mut log, connector, connections, config, ctx, source, handoff);

    match result {
        Ok(rows) => {
            log.close()?;
            Ok(StageOutcome::Loaded { rows })
        }
        Err(e) => {
            log.failure(&e);
            if let Err(close_err) = log.close() {
                warn!(error = %format!("{close_err:#}"), "Closing debug log failed");
            }
            Err(e)
        }
    }
}

fn load_steps<K: Connector>(
    log: &mut RunLog,
    connector: &K,
    connections: &ConnectionStore,
    config: &PipelineConfig,
    ctx: &RunContext,
    source: InputSource,
    handoff: &Handoff,
) -> Result<usize> {
    let gold = match source {
        InputSource::Discover => require_latest_artifact(&config.gold_dir(), "csv")?,
        InputSource::Handoff => handoff
            .pull(GOLD_FILE)
            .map(Path::to_path_buf)
            .ok_or_else(|| PipelineError::MissingInput {
                key: GOLD_FILE.to_string(),
            })?,
    };
    log.step(&format!("Found file: {}", gold.display()));

    let rows: Vec<AggregatedRecord> = read_csv(&gold, &GOLD_COLUMNS)?;
    log.step(&format!("Read {} aggregated rows", rows.len()));

    let profile = connections.resolve(&config.conn_id)?;
    log.step(&format!("Resolved connection profile '{}'", config.conn_id));
    let params = connect_params(log, &profile)?;
    let mut conn = connector
        .connect(&params)
        .context("opening warehouse connection")?;
    log.step("Connection successful");

    log.step("Creating table");
    conn.execute(CREATE_TABLE_SQL, &[])
        .context("ensuring FLIGHT_KPIS exists")?;

    log.step("Inserting data");
    let window_start = ctx.window_start_sql();
    for row in &rows {
        conn.execute(INSERT_SQL, &insert_params(&window_start, row)?)
            .with_context(|| format!("inserting KPIs for {}", row.origin_country))?;
    }
    log.step(&format!("Inserted {} rows", rows.len()));

    conn.close()?;
    Ok(rows.len())
}

fn connect_params(log: &mut RunLog, profile: &ConnectionProfile) -> Result<ConnectParams> {
    let raw = profile
        .raw_account()
        .context("connection profile has no account or host")?;
    log.step(&format!("Raw account from profile: {raw}"));

    let account = normalize_account(raw);
    log.step(&format!("Normalized account: {account}"));

    Ok(ConnectParams {
        account,
        user: profile.login.clone(),
        password: profile.password.clone(),
        warehouse: WAREHOUSE_NAME.to_string(),
        database: DATABASE_NAME.to_string(),
        schema: SCHEMA_NAME.to_string(),
        extra: profile.extra.clone(),
    })
}

/// Binds one gold row; `ON_GROUND` records whether any aircraft was on the ground.
fn insert_params(window_start: &str, row: &AggregatedRecord) -> Result<Vec<SqlValue>> {
    let total = i64::try_from(row.total_flights)
        .with_context(|| format!("flight count out of range for {}", row.origin_country))?;
    Ok(vec![
        SqlValue::Text(window_start.to_string()),
        SqlValue::Text(row.origin_country.clone()),
        SqlValue::Integer(total),
        SqlValue::from(row.avg_velocity),
        SqlValue::Bool(row.on_ground > 0),
    ])
}
