// ============================================================
// Layer 6 — Metrics Logger
// ============================================================
// Records the trainer's log history to a CSV file.
//
// Two kinds of rows are written:
//   - step logs, every `logging_steps` optimiser updates:
//       mean training loss since the previous log + current lr
//   - eval logs, once per epoch: mean loss on the eval split
//
// Output file: model_outputs/metrics.csv
//
// Example CSV output:
//   step,epoch,loss,learning_rate,eval_loss
//   10,0.27,2.481200,0.0000972973,
//   20,0.54,2.103400,0.0000945946,
//   37,1.00,,,1.987600
//
// The same entries are kept in trainer_state.json inside each
// checkpoint directory.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

const HEADER: &str = "step,epoch,loss,learning_rate,eval_loss";

/// One entry of the log history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Optimiser updates applied so far
    pub step: usize,

    /// Fractional epoch, e.g. 1.5 = halfway through epoch 2
    pub epoch: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub loss: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub learning_rate: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub eval_loss: Option<f64>,
}

impl LogEntry {
    pub fn train(step: usize, epoch: f64, loss: f64, learning_rate: f64) -> Self {
        Self { step, epoch, loss: Some(loss), learning_rate: Some(learning_rate), eval_loss: None }
    }

    pub fn eval(step: usize, epoch: f64, eval_loss: f64) -> Self {
        Self { step, epoch, loss: None, learning_rate: None, eval_loss: Some(eval_loss) }
    }

    fn csv_row(&self) -> String {
        let opt = |v: Option<f64>, digits: usize| v.map(|x| format!("{x:.digits$}")).unwrap_or_default();
        format!(
            "{},{:.2},{},{},{}",
            self.step,
            self.epoch,
            opt(self.loss, 6),
            opt(self.learning_rate, 10),
            opt(self.eval_loss, 6),
        )
    }
}

/// Appends log entries to a CSV file.
pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// Start a fresh metrics.csv in `dir`, replacing any previous run
    pub fn create(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)
            .with_context(|| format!("Cannot create '{}'", dir.display()))?;

        let csv_path = dir.join("metrics.csv");
        let mut f = fs::File::create(&csv_path)
            .with_context(|| format!("Cannot create '{}'", csv_path.display()))?;
        writeln!(f, "{HEADER}")?;
        tracing::debug!("Created metrics CSV: '{}'", csv_path.display());

        Ok(Self { csv_path })
    }

    pub fn log(&self, entry: &LogEntry) -> Result<()> {
        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)
            .with_context(|| format!("Cannot open '{}'", self.csv_path.display()))?;
        writeln!(f, "{}", entry.csv_row())?;
        Ok(())
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}
