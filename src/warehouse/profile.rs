use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

use crate::error::PipelineError;

/// A named set of connection settings managed outside the pipeline.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectionProfile {
    #[serde(default)]
    pub conn_type: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub login: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub extra: Map<String, Value>,
}

impl ConnectionProfile {
    /// Account identifier as configured: `extra.account`, falling back to `host`.
    pub fn raw_account(&self) -> Option<&str> {
        self.extra
            .get("account")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .or(self.host.as_deref())
    }
}

/// Profiles keyed by connection id.
///
/// Stored as a JSON object on disk:
/// ```json
/// {
///   "snowflake_default": {
///     "conn_type": "snowflake",
///     "login": "loader",
///     "password": "...",
///     "extra": { "account": "xy12345.eu-west-1" }
///   }
/// }
/// ```
/// A profile can also be supplied as JSON in `FLIGHT_CONN_<ID>` (id upper-cased),
/// which takes precedence over the file.
#[derive(Debug, Default)]
pub struct ConnectionStore {
    profiles: HashMap<String, ConnectionProfile>,
}

impl ConnectionStore {
    /// Loads profiles from `path`; a missing file gives an empty store.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "No connections file");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading connections file {}", path.display()))?;
        let profiles = serde_json::from_str(&content)
            .with_context(|| format!("parsing connections file {}", path.display()))?;
        Ok(Self { profiles })
    }

    pub fn from_profiles(profiles: HashMap<String, ConnectionProfile>) -> Self {
        Self { profiles }
    }

    pub fn resolve(&self, conn_id: &str) -> Result<ConnectionProfile> {
        self.resolve_with(conn_id, |name| std::env::var(name).ok())
    }

    /// Resolves `conn_id`, consulting `env` before the stored profiles.
    pub fn resolve_with(
        &self,
        conn_id: &str,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<ConnectionProfile> {
        let var = format!("FLIGHT_CONN_{}", conn_id.to_uppercase());
        if let Some(json) = env(&var) {
            debug!(conn_id, var, "Connection profile taken from environment");
            return serde_json::from_str(&json)
                .with_context(|| format!("parsing connection profile in {var}"));
        }

        self.profiles
            .get(conn_id)
            .cloned()
            .ok_or_else(|| PipelineError::MissingConnection(conn_id.to_string()).into())
    }
}

/// Reduces an account value to the bare identifier the driver expects.
///
/// Accepts both the bare form (`xy12345.eu-west-1`) and the full URL form
/// (`https://xy12345.eu-west-1.snowflakecomputing.com/`).
pub fn normalize_account(raw: &str) -> String {
    let mut account = raw.trim();
    for scheme in ["https://", "http://"] {
        if let Some(rest) = account.strip_prefix(scheme) {
            account = rest;
        }
    }
    account = account.trim_end_matches('/');
    if let Some(rest) = account.strip_suffix(".snowflakecomputing.com") {
        account = rest;
    }
    account.to_string()
}
