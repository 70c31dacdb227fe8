// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Entry point for all user interaction, parsed with `clap`.
// All business logic is delegated to Layer 2 (application).
//
// There is a single command. Every flag defaults to the
// production setting, so running the binary with no arguments
// fine-tunes the base model and pushes the adapter:
//
//   $ lawbot-trainer
//   $ lawbot-trainer --num-train-epochs 1 --no-push
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::TrainArgs;

use crate::application::train_use_case::{RunReport, TrainUseCase};

/// LoRA fine-tuning of a GPT-NeoX model on legal Q&A pairs.
#[derive(Parser, Debug)]
#[command(
    name = "lawbot-trainer",
    version,
    about = "Fine-tune a GPT-NeoX model with LoRA on question/answer CSVs, then push the adapter to the Hugging Face Hub."
)]
pub struct Cli {
    #[command(flatten)]
    pub train: TrainArgs,
}

impl Cli {
    /// Convert the arguments into a TrainConfig and hand off to Layer 2.
    pub fn run(self) -> Result<()> {
        tracing::info!(
            "Fine-tuning '{}' on '{}'",
            self.train.model_id,
            self.train.data_dir
        );

        let report = TrainUseCase::new(self.train.into()).execute()?;

        println!("{}", completion_line(&report));
        Ok(())
    }
}

/// The single line printed when a run finishes
fn completion_line(report: &RunReport) -> String {
    match &report.published {
        Some(result) => result.to_string(),
        None => format!(
            "Training complete. {} steps, last checkpoint: {}",
            report.summary.global_step,
            report
                .summary
                .checkpoints
                .last()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "none".to_string())
        ),
    }
}
