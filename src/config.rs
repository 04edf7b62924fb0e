//! Pipeline configuration: where artifacts live and where results go.

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://opensky-network.org/api/states/all";
pub const DEFAULT_CONN_ID: &str = "snowflake_default";

pub const WAREHOUSE_NAME: &str = "COMPUTE_WH";
pub const DATABASE_NAME: &str = "SKYFLY_DB";
pub const SCHEMA_NAME: &str = "PUBLIC";

/// Fixed per-stage retry policy applied by the sequential runner.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 1,
            delay: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub data_dir: PathBuf,
    pub api_url: String,
    pub connections_file: PathBuf,
    pub conn_id: String,
    pub retry: RetryPolicy,
}

impl PipelineConfig {
    /// Configuration rooted at `data_dir` with every other setting defaulted.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            api_url: DEFAULT_API_URL.to_string(),
            connections_file: PathBuf::from("connections.json"),
            conn_id: DEFAULT_CONN_ID.to_string(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn bronze_dir(&self) -> PathBuf {
        self.data_dir.join("bronze")
    }

    pub fn silver_dir(&self) -> PathBuf {
        self.data_dir.join("silver")
    }

    pub fn gold_dir(&self) -> PathBuf {
        self.data_dir.join("gold")
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.data_dir.join("runs")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    /// SQLite file used when the connection profile names no path.
    pub fn default_warehouse_path(&self) -> PathBuf {
        self.data_dir.join("warehouse.db")
    }
}
