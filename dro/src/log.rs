//! Append-only CSV log of successful samples.
//!
//! Columns are `timestamp,x,y,z,a,elapsed_ms`, one row per sample, with a
//! local ISO-8601 timestamp. The header is only written when the file is new
//! or empty, so a session can append to an existing log.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local};
use tracing::debug;

use crate::error::DroResult;
use crate::frame::Sample;

pub const CSV_HEADER: &str = "timestamp,x,y,z,a,elapsed_ms";

/// Default log file name for a session started at `now`.
pub fn default_file_name(now: DateTime<Local>) -> String {
    format!("position_log_{}.csv", now.format("%Y%m%d_%H%M%S"))
}

/// Open CSV position log.
#[derive(Debug)]
pub struct PositionLog {
    path: PathBuf,
    writer: BufWriter<File>,
    rows: u64,
}

impl PositionLog {
    /// Open `path` for appending, writing the header if the file is empty.
    pub fn open(path: impl AsRef<Path>) -> DroResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let is_empty = file.metadata()?.len() == 0;

        let mut writer = BufWriter::new(file);
        if is_empty {
            writeln!(writer, "{CSV_HEADER}")?;
        }
        debug!("Logging positions to {}", path.display());

        Ok(Self {
            path,
            writer,
            rows: 0,
        })
    }

    /// Open a log with the default timestamped name inside `dir`.
    pub fn create_in(dir: impl AsRef<Path>) -> DroResult<Self> {
        Self::open(dir.as_ref().join(default_file_name(Local::now())))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows appended by this handle.
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Append one sample stamped with the current local time.
    pub fn append(&mut self, sample: &Sample, elapsed: Duration) -> DroResult<()> {
        self.append_at(Local::now(), sample, elapsed)
    }

    pub fn append_at(
        &mut self,
        timestamp: DateTime<Local>,
        sample: &Sample,
        elapsed: Duration,
    ) -> DroResult<()> {
        writeln!(
            self.writer,
            "{},{},{},{},{},{:.3}",
            timestamp.to_rfc3339(),
            sample.x,
            sample.y,
            sample.z,
            sample.a,
            elapsed.as_secs_f64() * 1000.0
        )?;
        self.rows += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> DroResult<()> {
        self.writer.flush()?;
        Ok(())
    }
}

impl Drop for PositionLog {
    fn drop(&mut self) {
        if let Err(e) = self.writer.flush() {
            tracing::warn!("Failed to flush {}: {}", self.path.display(), e);
        }
    }
}
