// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Turns a question/answer CSV file into a tokenised, shuffled
// dataset and, later, into padded tensor batches.
//
//   train_data.csv
//       │
//       ▼
//   CsvLoader         → reads rows, keeps `question` + `answer`
//       │
//       ▼
//   PromptFormatter   → wraps each row in the instruction prompt
//       │
//       ▼
//   HfTextEncoder     → token ids, truncated, never padded
//       │
//       ▼
//   LmDataset         → shuffled once, implements Burn's Dataset
//       │
//       ▼
//   CausalLmCollator  → pads per batch, builds labels
//
// Autodata runs the first four steps end to end.

use std::path::PathBuf;

/// Reads question/answer rows from a CSV file
pub mod loader;

/// Renders a QaRecord into the instruction prompt
pub mod formatter;

/// Adapts a HuggingFace tokenizer to the TextEncoder trait
pub mod tokenize;

/// Implements Burn's Dataset trait for tokenised examples
pub mod dataset;

/// Loader → formatter → tokenizer → shuffle, in one call
pub mod autodata;

/// Implements Burn's Batcher trait for causal LM batches
pub mod collator;

/// Errors raised while building a dataset.
#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    /// The source file has no column with the required name
    #[error("required column '{column}' not found in '{}'", path.display())]
    MissingColumn { column: String, path: PathBuf },
}
