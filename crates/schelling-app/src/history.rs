use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use schelling_core::{StepPersistence, StepSummary};
use thiserror::Error;
use tracing::warn;

/// History sink error wrapper.
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("history encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Writes each forwarded step summary as one JSON object per line.
#[derive(Debug)]
pub struct JsonLinesHistory {
    path: PathBuf,
    writer: BufWriter<File>,
    written: usize,
}

impl JsonLinesHistory {
    /// Create (or truncate) the history file at `path`.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, HistoryError> {
        let path = path.as_ref().to_path_buf();
        let writer = BufWriter::new(File::create(&path)?);
        Ok(Self {
            path,
            writer,
            written: 0,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lines written so far.
    #[must_use]
    pub const fn written(&self) -> usize {
        self.written
    }

    pub fn append(&mut self, summary: &StepSummary) -> Result<(), HistoryError> {
        serde_json::to_writer(&mut self.writer, summary)?;
        self.writer.write_all(b"\n")?;
        self.written += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), HistoryError> {
        self.writer.flush()?;
        Ok(())
    }
}

impl StepPersistence for JsonLinesHistory {
    fn on_step(&mut self, summary: &StepSummary) {
        if let Err(err) = self.append(summary) {
            warn!(
                step = summary.step.0,
                path = %self.path.display(),
                %err,
                "failed to append step history"
            );
        }
    }
}

impl Drop for JsonLinesHistory {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            warn!(path = %self.path.display(), %err, "failed to flush step history");
        }
    }
}
