// ============================================================
// Layer 1 — CLI Arguments
// ============================================================
// Every flag of the single `lawbot-trainer` command.
//
// clap's derive macros generate:
//   - help text (--help)
//   - error messages for malformed values
//   - type conversion (string → usize, f64, etc.)
//
// Reference: Rust Book §12 (Building a CLI Program)

use clap::Args;

use crate::application::train_use_case::{TrainConfig, BASE_MODEL_ID, PUSH_MODEL_ID};
use crate::infra::publisher::DEFAULT_ENDPOINT;

/// All arguments of the training run
#[derive(Args, Debug)]
pub struct TrainArgs {
    /// Base model: a Hub repository id or a local directory
    #[arg(long, default_value = BASE_MODEL_ID)]
    pub model_id: String,

    /// Hub revision (branch, tag or commit) of the base model
    #[arg(long)]
    pub revision: Option<String>,

    /// Hub repository that receives the trained adapter
    #[arg(long, default_value = PUSH_MODEL_ID)]
    pub push_model_id: String,

    /// Skip the push; the adapter stays in the output directory
    #[arg(long)]
    pub no_push: bool,

    /// Base URL of the Hub the adapter is pushed to
    #[arg(long, default_value = DEFAULT_ENDPOINT)]
    pub hub_endpoint: String,

    /// Read HUGGINGFACE_WRITE_TOKEN from this file instead of searching for `.env`
    #[arg(long)]
    pub env_file: Option<String>,

    /// Directory with train_data.csv and eval_data.csv
    #[arg(long, default_value = "data")]
    pub data_dir: String,

    /// Checkpoints, metrics and train_config.json go here
    #[arg(long, default_value = "./model_outputs")]
    pub output_dir: String,

    /// Prompts longer than this many tokens are truncated
    #[arg(long, default_value_t = 1024)]
    pub max_length: usize,

    #[arg(long, default_value_t = 16)]
    pub per_device_train_batch_size: usize,

    #[arg(long, default_value_t = 1)]
    pub gradient_accumulation_steps: usize,

    #[arg(long, default_value_t = 6)]
    pub num_train_epochs: usize,

    /// Peak learning rate, decayed linearly to zero
    #[arg(long, default_value_t = 1e-4)]
    pub learning_rate: f64,

    #[arg(long, default_value_t = 0)]
    pub warmup_steps: usize,

    /// Gradient-norm clipping threshold
    #[arg(long, default_value_t = 1.0)]
    pub max_grad_norm: f32,

    /// Train in f32 instead of f16
    #[arg(long)]
    pub no_fp16: bool,

    /// Keep every activation instead of recomputing them in backward
    #[arg(long)]
    pub no_gradient_checkpointing: bool,

    /// Train on the CPU backend
    #[arg(long)]
    pub cpu: bool,

    /// Print the mean training loss every N optimiser steps
    #[arg(long, default_value_t = 10)]
    pub logging_steps: usize,

    #[arg(long, default_value = "paged_adamw_8bit")]
    pub optim: String,

    /// Seed of the per-epoch batch shuffle
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// LoRA rank
    #[arg(long, default_value_t = 8)]
    pub lora_r: usize,

    #[arg(long, default_value_t = 32.0)]
    pub lora_alpha: f64,

    #[arg(long, default_value_t = 0.05)]
    pub lora_dropout: f64,

    /// Linear layers that receive an adapter
    #[arg(long, value_delimiter = ',', default_value = "query_key_value")]
    pub target_modules: Vec<String>,
}

/// The boundary between Layer 1 and Layer 2:
/// the application layer never sees clap types.
impl From<TrainArgs> for TrainConfig {
    fn from(a: TrainArgs) -> Self {
        TrainConfig {
            model_id:                    a.model_id,
            revision:                    a.revision,
            push_model_id:               a.push_model_id,
            push_to_hub:                 !a.no_push,
            hub_endpoint:                a.hub_endpoint,
            env_file:                    a.env_file,
            data_dir:                    a.data_dir,
            output_dir:                  a.output_dir,
            max_length:                  a.max_length,
            per_device_train_batch_size: a.per_device_train_batch_size,
            gradient_accumulation_steps: a.gradient_accumulation_steps,
            num_train_epochs:            a.num_train_epochs,
            learning_rate:               a.learning_rate,
            warmup_steps:                a.warmup_steps,
            max_grad_norm:               a.max_grad_norm,
            fp16:                        !a.no_fp16,
            gradient_checkpointing:      !a.no_gradient_checkpointing,
            cpu:                         a.cpu,
            logging_steps:               a.logging_steps,
            optim:                       a.optim,
            seed:                        a.seed,
            lora_r:                      a.lora_r,
            lora_alpha:                  a.lora_alpha,
            lora_dropout:                a.lora_dropout,
            target_modules:              a.target_modules,
        }
    }
}
