//! Run-scoped state handed to every stage: the scheduling context and the
//! key/value channel stages use to pass artifact paths downstream.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::artifacts::write_atomic;
use crate::config::PipelineConfig;

pub const BRONZE_FILE: &str = "bronze_file";
pub const SILVER_FILE: &str = "silver_file";
pub const GOLD_FILE: &str = "gold_file";

/// Handoff keys in stage order. Publishing or retracting one key invalidates
/// every key after it.
const STAGE_KEYS: [&str; 3] = [BRONZE_FILE, SILVER_FILE, GOLD_FILE];

/// Scheduling context for one run of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunContext {
    /// Names the bronze and silver artifacts.
    pub logical_date: NaiveDate,
    /// Stamped on every warehouse row of the run.
    pub window_start: DateTime<Utc>,
}

impl RunContext {
    /// Daily interval starting at midnight UTC of `logical_date`.
    pub fn for_date(logical_date: NaiveDate) -> Self {
        Self {
            logical_date,
            window_start: logical_date.and_time(NaiveTime::MIN).and_utc(),
        }
    }

    /// The daily interval that closed most recently.
    pub fn previous_day() -> Self {
        let today = Utc::now().date_naive();
        Self::for_date(today.pred_opt().unwrap_or(today))
    }

    pub fn ds_nodash(&self) -> String {
        self.logical_date.format("%Y%m%d").to_string()
    }

    /// Window start in the `YYYY-MM-DD HH:MM:SS` form bound into SQL.
    pub fn window_start_sql(&self) -> String {
        self.window_start.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

/// Key/value channel owned by the runner, not by the stages.
///
/// A stage pushes the path of the artifact it produced; the next stage pulls
/// it. When backed by a file every push is persisted, so stages invoked as
/// separate processes for the same run see each other's values.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Handoff {
    #[serde(skip)]
    backing: Option<PathBuf>,
    entries: BTreeMap<String, PathBuf>,
}

impl Handoff {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Path of the persisted channel for `ctx`.
    pub fn path_for(config: &PipelineConfig, ctx: &RunContext) -> PathBuf {
        config.runs_dir().join(ctx.ds_nodash()).join("handoff.json")
    }

    /// Opens the persisted channel at `path`, starting empty if it does not exist yet.
    pub fn open(path: &Path) -> Result<Self> {
        let entries = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading handoff {}", path.display()))?;
            let stored: Handoff = serde_json::from_str(&content)
                .with_context(|| format!("parsing handoff {}", path.display()))?;
            stored.entries
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            backing: Some(path.to_path_buf()),
            entries,
        })
    }

    /// Starts a new, empty persisted channel at `path`, discarding earlier values.
    pub fn fresh(path: &Path) -> Result<Self> {
        let handoff = Self {
            backing: Some(path.to_path_buf()),
            entries: BTreeMap::new(),
        };
        handoff.persist()?;
        Ok(handoff)
    }

    /// Publishes `value` under `key` and drops any downstream values.
    pub fn push(&mut self, key: &str, value: &Path) -> Result<()> {
        debug!(key, value = %value.display(), "Publishing handoff value");
        self.drop_downstream(key);
        self.entries.insert(key.to_string(), value.to_path_buf());
        self.persist()
    }

    /// Withdraws `key` and every downstream value, for a stage that produced nothing.
    pub fn retract(&mut self, key: &str) -> Result<()> {
        debug!(key, "Retracting handoff value");
        self.entries.remove(key);
        self.drop_downstream(key);
        self.persist()
    }

    pub fn pull(&self, key: &str) -> Option<&Path> {
        self.entries.get(key).map(PathBuf::as_path)
    }

    fn drop_downstream(&mut self, key: &str) {
        if let Some(pos) = STAGE_KEYS.iter().position(|k| *k == key) {
            for later in &STAGE_KEYS[pos + 1..] {
                self.entries.remove(*later);
            }
        }
    }

    fn persist(&self) -> Result<()> {
        if let Some(path) = &self.backing {
            let body = serde_json::to_vec_pretty(self)?;
            write_atomic(path, &body)?;
        }
        Ok(())
    }
}
