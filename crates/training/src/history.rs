//! Epoch history, one JSON line per epoch under the run's log dir.

use anyhow::Context;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize)]
pub struct HeadLoss {
    pub head: String,
    pub val_loss: f64,
}

/// One epoch's summary.
#[derive(Debug, Clone, Serialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub learning_rate: f64,
    pub train_loss: f64,
    pub val_loss: f64,
    pub head_losses: Vec<HeadLoss>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plaque_recall: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plaque_accuracy: Option<f64>,
    pub epoch_ms: u64,
}

/// Appends epoch records to `history.jsonl`.
#[derive(Debug)]
pub struct HistoryWriter {
    path: PathBuf,
}

impl HistoryWriter {
    pub fn new(log_dir: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(log_dir)
            .with_context(|| format!("creating log dir {}", log_dir.display()))?;
        Ok(Self {
            path: log_dir.join("history.jsonl"),
        })
    }

    pub fn append(&self, metrics: &EpochMetrics) -> anyhow::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening {}", self.path.display()))?;
        let line = serde_json::to_string(metrics)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
