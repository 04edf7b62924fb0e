//! Plain-text debug log owned by a single stage invocation.
//!
//! Every line goes to `tracing` as well as to the file. The file is truncated
//! when the log is created and flushed when it is closed or dropped.

use anyhow::{Context, Result};
use chrono::Utc;
use std::backtrace::BacktraceStatus;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

pub struct RunLog {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl RunLog {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating directory {}", parent.display()))?;
        }
        let file =
            File::create(path).with_context(|| format!("creating run log {}", path.display()))?;

        let mut log = Self {
            path: path.to_path_buf(),
            writer: Some(BufWriter::new(file)),
        };
        log.write_line(&format!("--- ATTEMPT AT {} ---", Utc::now().to_rfc3339()));
        Ok(log)
    }

    pub fn step(&mut self, msg: &str) {
        info!("{msg}");
        self.write_line(msg);
    }

    /// Records `err` with its cause chain and backtrace.
    ///
    /// `anyhow` only captures a backtrace when `RUST_BACKTRACE` or
    /// `RUST_LIB_BACKTRACE` is set; otherwise the log says so explicitly.
    pub fn failure(&mut self, err: &anyhow::Error) {
        error!(error = %format!("{err:#}"), "Load stage failed");
        self.write_line("");
        self.write_line("ERROR:");
        self.write_line(&err.to_string());
        for cause in err.chain().skip(1) {
            self.write_line(&format!("Caused by: {cause}"));
        }

        self.write_line("Backtrace:");
        let backtrace = err.backtrace();
        if backtrace.status() == BacktraceStatus::Captured {
            self.write_line(&backtrace.to_string());
        } else {
            self.write_line("<not captured; set RUST_LIB_BACKTRACE=1 to record it>");
        }
    }

    pub fn close(mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer
                .flush()
                .with_context(|| format!("flushing run log {}", self.path.display()))?;
        }
        Ok(())
    }

    fn write_line(&mut self, line: &str) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        if let Err(e) = writeln!(writer, "{line}") {
            warn!(path = %self.path.display(), error = %e, "Run log write failed");
        }
    }
}

impl Drop for RunLog {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.as_mut() {
            let _ = writer.flush();
        }
    }
}
