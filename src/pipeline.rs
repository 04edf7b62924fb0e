//! Sequential runner: the four stages in order, once per logical date.
//!
//! A stage is retried with a fixed delay; once its retries are used up the run
//! stops and later stages are not invoked. Stages never retry on their own.

use anyhow::{Context, Result};
use std::fmt;
use tracing::{error, info, warn};

use crate::config::PipelineConfig;
use crate::context::{Handoff, RunContext};
use crate::fetch::HttpClient;
use crate::stages::aggregate::run_aggregate;
use crate::stages::ingest::run_ingest;
use crate::stages::load::run_load;
use crate::stages::refine::run_refine;
use crate::stages::{InputSource, StageOutcome};
use crate::warehouse::{ConnectionStore, Connector};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Ingest,
    Refine,
    Aggregate,
    Load,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Ingest, Stage::Refine, Stage::Aggregate, Stage::Load];

    pub fn task_id(self) -> &'static str {
        match self {
            Stage::Ingest => "ingest_bronze",
            Stage::Refine => "transform_silver",
            Stage::Aggregate => "aggregate_gold",
            Stage::Load => "load_warehouse",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.task_id())
    }
}

pub struct Pipeline<C, K> {
    pub config: PipelineConfig,
    pub client: C,
    pub connector: K,
    pub connections: ConnectionStore,
}

impl<C: HttpClient, K: Connector> Pipeline<C, K> {
    /// Runs one stage once, reading and publishing through `handoff`.
    pub async fn run_stage(
        &self,
        stage: Stage,
        ctx: &RunContext,
        source: InputSource,
        handoff: &mut Handoff,
    ) -> Result<StageOutcome> {
        match stage {
            Stage::Ingest => run_ingest(&self.client, &self.config, ctx, handoff).await,
            Stage::Refine => run_refine(&self.config, ctx, source, handoff),
            Stage::Aggregate => run_aggregate(&self.config, source, handoff),
            Stage::Load => run_load(
                &self.connector,
                &self.connections,
                &self.config,
                ctx,
                source,
                handoff,
            ),
        }
    }

    /// Handoff channel for a standalone invocation of `stage`.
    ///
    /// Ingestion begins the run, so it starts from an empty channel; later
    /// stages reopen whatever the run has published so far.
    pub fn stage_handoff(&self, stage: Stage, ctx: &RunContext) -> Result<Handoff> {
        let path = Handoff::path_for(&self.config, ctx);
        match stage {
            Stage::Ingest => Handoff::fresh(&path),
            _ => Handoff::open(&path),
        }
    }

    /// Runs every stage for `ctx` with a fresh persisted handoff channel.
    #[tracing::instrument(skip(self), fields(date = %ctx.logical_date))]
    pub async fn run(&self, ctx: &RunContext) -> Result<Vec<(Stage, StageOutcome)>> {
        let mut handoff = self.stage_handoff(Stage::Ingest, ctx)?;
        let mut outcomes = Vec::with_capacity(Stage::ALL.len());

        for stage in Stage::ALL {
            let outcome = self
                .run_with_retries(stage, ctx, &mut handoff)
                .await
                .with_context(|| format!("task {stage} failed"))?;
            info!(%stage, ?outcome, "Task finished");
            outcomes.push((stage, outcome));
        }

        info!("Run complete");
        Ok(outcomes)
    }

    async fn run_with_retries(
        &self,
        stage: Stage,
        ctx: &RunContext,
        handoff: &mut Handoff,
    ) -> Result<StageOutcome> {
        let policy = self.config.retry;
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self
                .run_stage(stage, ctx, InputSource::Handoff, handoff)
                .await
            {
                Ok(outcome) => return Ok(outcome),
                Err(e) if attempt <= policy.retries => {
                    warn!(
                        %stage,
                        attempt,
                        delay_secs = policy.delay.as_secs(),
                        error = %format!("{e:#}"),
                        "Task failed, retrying"
                    );
                    tokio::time::sleep(policy.delay).await;
                }
                Err(e) => {
                    error!(%stage, attempt, error = %format!("{e:#}"), "Task failed");
                    return Err(e);
                }
            }
        }
    }
}
