//! On-disk artifacts shared between stages.
//!
//! Every artifact is written under a temp name and renamed into place, so a
//! failed write never leaves a partial file under its final name.

use anyhow::{Context, Result, bail};
use csv::WriterBuilder;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

use crate::error::PipelineError;

/// Writes `bytes` to `path`, creating parent directories as needed.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating directory {}", parent.display()))?;
    }

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("artifact path has no file name: {}", path.display()))?;
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));

    fs::write(&tmp, bytes).with_context(|| format!("writing {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("moving artifact to {}", path.display()))?;

    debug!(path = %path.display(), bytes = bytes.len(), "Artifact written");
    Ok(())
}

/// Writes `rows` as CSV with an explicit header row.
///
/// The header is written even when `rows` is empty, so a zero-row artifact
/// still carries its schema.
pub fn write_csv<T: Serialize>(path: &Path, headers: &[&str], rows: &[T]) -> Result<()> {
    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());

    writer.write_record(headers)?;
    for row in rows {
        writer.serialize(row)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("flushing CSV buffer: {}", e.error()))?;
    write_atomic(path, &bytes)
}

/// Reads a CSV artifact, rejecting it unless its header matches `headers` exactly.
pub fn read_csv<T: DeserializeOwned>(path: &Path, headers: &[&str]) -> Result<Vec<T>> {
    let mut rdr =
        csv::Reader::from_path(path).with_context(|| format!("opening {}", path.display()))?;

    let found: Vec<&str> = rdr.headers()?.iter().collect();
    if found != headers {
        bail!(
            "unexpected columns in {}: expected {:?}, found {:?}",
            path.display(),
            headers,
            found
        );
    }

    let mut rows = Vec::new();
    for result in rdr.deserialize() {
        let record: T = result.with_context(|| format!("decoding row of {}", path.display()))?;
        rows.push(record);
    }

    Ok(rows)
}

/// Returns the most recently modified file in `dir` with the given extension.
///
/// Selection is by modification time only; file names play no part except to
/// break exact ties. A missing directory yields `None`.
pub fn latest_artifact(dir: &Path, extension: &str) -> Result<Option<PathBuf>> {
    if !dir.exists() {
        return Ok(None);
    }

    let mut best: Option<(SystemTime, PathBuf)> = None;

    for entry in fs::read_dir(dir).with_context(|| format!("listing {}", dir.display()))? {
        let entry = entry?;
        let path = entry.path();

        if !entry.file_type()?.is_file() {
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some(extension) {
            continue;
        }

        let modified = entry.metadata()?.modified()?;
        let candidate = (modified, path);
        if best.as_ref().is_none_or(|b| candidate > *b) {
            best = Some(candidate);
        }
    }

    Ok(best.map(|(_, path)| path))
}

/// Like [`latest_artifact`], but absence is an error.
pub fn require_latest_artifact(dir: &Path, extension: &str) -> Result<PathBuf> {
    latest_artifact(dir, extension)?.ok_or_else(|| {
        PipelineError::MissingArtifact {
            dir: dir.to_path_buf(),
            extension: extension.to_string(),
        }
        .into()
    })
}

/// `dir/stem.ext`, or `dir/stem_N.ext` with the first free `N` if that name is taken.
pub fn unused_path(dir: &Path, stem: &str, extension: &str) -> PathBuf {
    let first = dir.join(format!("{stem}.{extension}"));
    if !first.exists() {
        return first;
    }

    (1..)
        .map(|n| dir.join(format!("{stem}_{n}.{extension}")))
        .find(|p| !p.exists())
        .unwrap_or(first)
}
