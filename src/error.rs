//! Error conditions that callers match on.
//!
//! Plumbing failures (I/O, CSV, SQL) travel as [`anyhow::Error`] with context;
//! the variants here mark the cases where a stage's contract was violated.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// A raw state tuple does not match the versioned record layout.
    #[error("schema mismatch in state #{index}: expected {expected}, got {actual}")]
    SchemaMismatch {
        index: usize,
        expected: String,
        actual: String,
    },

    /// The upstream stage did not publish the handoff key this stage reads.
    #[error("no value published for handoff key '{key}'")]
    MissingInput { key: String },

    /// Directory discovery found nothing to read.
    #[error("no '.{extension}' artifact found in {}", dir.display())]
    MissingArtifact { dir: PathBuf, extension: String },

    /// No connection profile exists under the requested id.
    #[error("connection profile '{0}' not found")]
    MissingConnection(String),

    /// The data source answered with a non-success status.
    #[error("data source returned status {status}: {body}")]
    HttpStatus { status: u16, body: String },
}
