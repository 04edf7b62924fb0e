//! The four pipeline stages, bronze to warehouse.
//!
//! Each stage reads the artifact published by the stage before it through the
//! [`Handoff`] channel and publishes its own. Directory discovery is only used
//! when a stage is run by hand with [`InputSource::Discover`].

pub mod aggregate;
pub mod ingest;
pub mod load;
pub mod refine;

use anyhow::Result;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::artifacts::latest_artifact;
use crate::context::Handoff;

/// How a stage locates its input artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputSource {
    /// The path published by the upstream stage of this run.
    #[default]
    Handoff,
    /// The most recently modified artifact in the upstream tier directory.
    Discover,
}

/// What a stage invocation did.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    /// Wrote and published an artifact.
    Produced(PathBuf),
    /// Had nothing to work on; the run continues.
    Skipped(String),
    /// Inserted rows into the warehouse.
    Loaded { rows: usize },
}

pub(crate) fn resolve_input(
    source: InputSource,
    handoff: &Handoff,
    key: &str,
    dir: &Path,
    extension: &str,
) -> Result<Option<PathBuf>> {
    let found = match source {
        InputSource::Handoff => handoff.pull(key).map(Path::to_path_buf),
        InputSource::Discover => latest_artifact(dir, extension)?,
    };
    debug!(?source, key, found = ?found, "Resolved stage input");
    Ok(found)
}
